use core::ops::{Add, Deref};

use cid::Cid;

use crate::{amounts::PaddedBytesAmount, NODE_SIZE};

/// Piece info carries the piece commitment and the piece size, as confirmed
/// by the sealer after the piece bytes have been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct PieceInfo {
    /// Piece commitment (CommP).
    pub piece_cid: Cid,
    /// Piece size after Fr32 padding.
    pub size: PaddedPieceSize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceSizeError {
    #[error("minimum unpadded piece size is 127 bytes")]
    UnpaddedTooSmall,
    #[error("unpadded piece size must be a power of 2 multiple of 127")]
    UnpaddedNotCanonical,
    #[error("minimum padded piece size is 128 bytes")]
    PaddedTooSmall,
    #[error("padded piece size must be a power of 2")]
    PaddedNotPowerOfTwo,
    #[error("padded piece size must be a multiple of the node size")]
    PaddedNotAMultipleOfNodeSize,
}

/// Size of a piece in bytes before Fr32 padding. Always a power of two
/// multiple of 127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ::serde::Deserialize, ::serde::Serialize)]
pub struct UnpaddedPieceSize(u64);

impl UnpaddedPieceSize {
    /// The minimum piece size.
    pub const MIN: UnpaddedPieceSize = UnpaddedPieceSize(127);

    pub fn new(size: u64) -> Result<Self, PieceSizeError> {
        if size < 127 {
            return Err(PieceSizeError::UnpaddedTooSmall);
        }

        // is 127 * 2^n
        if size >> size.trailing_zeros() != 127 {
            return Err(PieceSizeError::UnpaddedNotCanonical);
        }

        Ok(Self(size))
    }

    /// Converts an unpadded piece size into its padded counterpart.
    pub fn padded(self) -> PaddedPieceSize {
        PaddedPieceSize(self.0 + (self.0 / 127))
    }
}

impl core::fmt::Display for UnpaddedPieceSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for UnpaddedPieceSize {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Size of a piece in bytes after Fr32 padding. Always a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ::serde::Deserialize, ::serde::Serialize)]
pub struct PaddedPieceSize(u64);

impl PaddedPieceSize {
    /// The minimum piece size.
    pub const MIN: PaddedPieceSize = PaddedPieceSize(128);

    pub fn new(size: u64) -> Result<Self, PieceSizeError> {
        if size < 128 {
            return Err(PieceSizeError::PaddedTooSmall);
        }

        if size.count_ones() != 1 {
            return Err(PieceSizeError::PaddedNotPowerOfTwo);
        }

        if size % NODE_SIZE as u64 != 0 {
            return Err(PieceSizeError::PaddedNotAMultipleOfNodeSize);
        }

        Ok(Self(size))
    }

    /// Converts a padded piece size into its unpadded counterpart.
    pub fn unpadded(self) -> UnpaddedPieceSize {
        UnpaddedPieceSize(self.0 - (self.0 / 128))
    }
}

impl core::fmt::Display for PaddedPieceSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for PaddedPieceSize {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Add for PaddedPieceSize {
    type Output = PaddedBytesAmount;

    fn add(self, other: Self) -> Self::Output {
        PaddedBytesAmount(self.0 + other.0)
    }
}
