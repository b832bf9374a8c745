//! Shared domain types for the deal-to-sector packing core: piece sizes and
//! their padded/unpadded views, sector identities and capacities, deal
//! metadata, and the piece-alignment rule.

mod amounts;
mod deal;
mod padding;
mod piece;
mod sector;

pub use amounts::{PaddedBytesAmount, UnpaddedBytesAmount};
pub use deal::{DealId, DealInfo, DealSchedule};
pub use padding::required_padding;
pub use piece::{PaddedPieceSize, PieceInfo, PieceSizeError, UnpaddedPieceSize};
pub use sector::{max_deals, SealProof, SectorId, SectorNumber, SectorSize, StorageProviderId};

/// Size of a node in the binary Merkle tree built over sector data.
pub const NODE_SIZE: usize = 32;
