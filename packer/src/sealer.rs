use std::io::Read;

use async_trait::async_trait;
use primitives_sealing::{PieceInfo, SealProof, SectorId, SectorNumber, UnpaddedPieceSize};

#[derive(Debug, thiserror::Error)]
pub enum SealerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("sealer rejected the operation: {0}")]
    Rejected(String),
}

/// Opaque piece payload. It is read exactly once, by exactly one
/// [`Sealer::add_piece`] call.
pub type PieceData = Box<dyn Read + Send>;

/// Scheduling priority tag propagated on every sealer call. Opaque to the
/// packer; the sealer may use it to preempt background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SealPriority(pub u32);

/// Priority attached to all sealer calls made on behalf of deals.
pub const DEAL_SECTOR_PRIORITY: SealPriority = SealPriority(1024);

/// External interface to the sealing subsystem backing the packer.
///
/// The packer's correctness does not depend on how these are implemented,
/// only on the stated contracts.
#[async_trait]
pub trait Sealer: Send + Sync {
    /// Initializes backing storage for a fresh sector. Idempotent.
    async fn new_sector(&self, sector: SectorId, seal_proof: SealProof) -> Result<(), SealerError>;

    /// Appends `size` unpadded bytes read from `data` to the sector's
    /// unsealed storage, after the pieces listed in `existing_pieces`.
    /// Returns the written piece's commitment and confirmed size.
    async fn add_piece(
        &self,
        priority: SealPriority,
        sector: SectorId,
        existing_pieces: &[UnpaddedPieceSize],
        size: UnpaddedPieceSize,
        data: PieceData,
    ) -> Result<PieceInfo, SealerError>;

    /// Allocates the next sector number. Monotonically increasing.
    async fn next_sector_number(&self) -> Result<SectorNumber, SealerError>;
}

/// Reader producing an exact number of zero bytes, used as the payload of
/// alignment pads.
pub struct ZeroReader {
    remaining: u64,
}

impl ZeroReader {
    pub fn new(len: u64) -> Self {
        Self { remaining: len }
    }
}

impl Read for ZeroReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        let to_read = buf.len().min(self.remaining as usize);
        buf[..to_read].fill(0);
        self.remaining -= to_read as u64;

        Ok(to_read)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::ZeroReader;

    #[test]
    fn zero_reader_produces_exact_length() {
        let mut reader = ZeroReader::new(10);

        let mut buffer = [1u8; 4];
        assert_eq!(reader.read(&mut buffer).unwrap(), 4);
        assert_eq!(buffer, [0, 0, 0, 0]);

        let mut buffer = [1u8; 4];
        assert_eq!(reader.read(&mut buffer).unwrap(), 4);
        assert_eq!(reader.read(&mut buffer).unwrap(), 2);
        assert_eq!(reader.read(&mut buffer).unwrap(), 0);
    }
}
