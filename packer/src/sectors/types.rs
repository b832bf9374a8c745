use primitives_sealing::{
    DealInfo, PaddedBytesAmount, PieceInfo, SealProof, SectorNumber, UnpaddedBytesAmount,
};
use tokio::time::Instant;

use crate::error::PackerError;

/// Packing-relevant states of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorState {
    /// Open for more deals.
    WaitDeals,
    /// Assigned pieces are being written through the sealer.
    AddPiece,
    /// A sealer write failed; the sector is parked until a supervisor
    /// cleans it up.
    AddPieceFailed,
    /// Handed over to the sealing pipeline; no more deals.
    Packing,
}

/// A piece committed into a sector. A piece without deal metadata is an
/// alignment pad.
#[derive(Debug, Clone, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct SectorPiece {
    pub info: PieceInfo,
    pub deal: Option<DealInfo>,
}

/// A sector that finished collecting deals, as handed to the sealing
/// pipeline.
#[derive(Debug, Clone, ::serde::Deserialize, ::serde::Serialize)]
pub struct PackedSector {
    pub number: SectorNumber,
    pub seal_proof: SealProof,
    pub pieces: Vec<SectorPiece>,
}

/// State-machine view of a sector while it is inside the packing core.
pub(crate) struct SectorInfo {
    pub number: SectorNumber,
    pub seal_proof: SealProof,
    pub creation_time: Instant,
    /// Append-only within the packing core.
    pub pieces: Vec<SectorPiece>,
    pub state: SectorState,
}

impl SectorInfo {
    pub fn new(number: SectorNumber, seal_proof: SealProof) -> Self {
        Self {
            number,
            seal_proof,
            creation_time: Instant::now(),
            pieces: Vec::new(),
            state: SectorState::WaitDeals,
        }
    }

    pub fn used(&self) -> UnpaddedBytesAmount {
        self.pieces
            .iter()
            .map(|piece| UnpaddedBytesAmount::from(piece.info.size.unpadded()))
            .sum()
    }

    pub fn used_padded(&self) -> PaddedBytesAmount {
        self.pieces
            .iter()
            .map(|piece| PaddedBytesAmount::from(piece.info.size))
            .sum()
    }
}

/// Events driving the per-sector state machine.
#[derive(Debug)]
pub(crate) enum SectorEvent {
    /// A fresh sector was initialized on the sealer.
    Start {
        number: SectorNumber,
        seal_proof: SealProof,
    },
    /// Stop waiting for deals and enter the sealing pipeline. Duplicates
    /// are no-ops.
    StartPacking { number: SectorNumber },
    /// Pieces were routed to the sector; drain and write them.
    AddPiece { number: SectorNumber },
    /// The add-piece handler finished; commit the written pieces.
    PieceAdded {
        number: SectorNumber,
        new_pieces: Vec<SectorPiece>,
    },
    /// A sealer write failed; park the sector.
    AddPieceFailed {
        number: SectorNumber,
        error: PackerError,
    },
    /// The supervisor is done with the sector (sealed, or cleaned up after a
    /// failure); forget it and release its pipeline slot.
    Retire { number: SectorNumber },
}

/// Immutable view of a sector handed to the add-piece handler.
pub(crate) struct SectorSnapshot {
    pub number: SectorNumber,
    pub seal_proof: SealProof,
    pub pieces: Vec<SectorPiece>,
}
