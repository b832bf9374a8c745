use std::sync::Arc;

use cid::Cid;
use primitives_sealing::{PieceSizeError, SectorNumber, SectorSize, UnpaddedPieceSize};

use crate::sealer::SealerError;

/// Errors surfaced by the packing core.
///
/// Submission-time errors are returned synchronously from
/// [`crate::Packer::add_piece_to_any_sector`]; packing-time errors travel
/// through the submitter's completion channel. `Sealer` errors additionally
/// park the affected sector.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PackerError {
    #[error(transparent)]
    InvalidPieceSize(#[from] PieceSizeError),

    #[error("piece of {size} unpadded bytes cannot fit a {sector_size} sector")]
    PieceTooLarge {
        size: UnpaddedPieceSize,
        sector_size: SectorSize,
    },

    #[error("piece for deal {0} already pending")]
    DuplicatePublishCid(Cid),

    #[error("too many deals assigned to sector {0}, dropping deal")]
    TooManyDealsForSector(SectorNumber),

    #[error("not enough space left in sector {0} for the assigned piece")]
    NotEnoughSpace(SectorNumber),

    #[error("sealer failed to write the piece: {0}")]
    Sealer(#[source] Arc<SealerError>),

    #[error("piece {0} assigned to a sector is no longer pending")]
    PieceLost(Cid),

    #[error("the packer is shutting down")]
    ShuttingDown,
}

impl From<SealerError> for PackerError {
    fn from(err: SealerError) -> Self {
        PackerError::Sealer(Arc::new(err))
    }
}
