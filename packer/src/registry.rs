//! Bookkeeping for sectors that can still take deals and for pieces waiting
//! to be routed. All maps here are guarded by the input gate; the registry
//! itself performs no locking and no business logic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cid::Cid;
use primitives_sealing::{DealInfo, SectorId, SectorNumber, UnpaddedBytesAmount, UnpaddedPieceSize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{error::PackerError, sealer::PieceData, sectors::types::SectorState};

/// Completion value delivered to a submitter: the sector the piece landed in
/// and the unpadded offset of its data, or the reason it was dropped.
pub(crate) type PieceAccepted = Result<(SectorNumber, UnpaddedBytesAmount), PackerError>;

/// A deal piece waiting to be routed into a sector.
pub(crate) struct PendingPiece {
    pub size: UnpaddedPieceSize,
    pub deal: DealInfo,
    pub data: PieceData,
    /// Set once the matcher has routed the piece to a sector.
    pub assigned: bool,
    /// One-shot completion channel back to the submitter. Delivered exactly
    /// once; removing the piece from the pending table hands over ownership.
    pub accepted: oneshot::Sender<PieceAccepted>,
}

impl PendingPiece {
    /// Resolves the submitter and drops the piece payload.
    pub fn complete(self, result: PieceAccepted) {
        let _ = self.accepted.send(result);
    }
}

/// A sector in `WaitDeals` that the matcher may route pieces into.
pub(crate) struct OpenSector {
    /// Unpadded bytes already occupied by the sector's pieces, alignment
    /// pads included.
    pub used: UnpaddedBytesAmount,
}

/// Handle of a sector's armed wait-deals deadline.
pub(crate) struct SectorDeadline {
    pub cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl SectorDeadline {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fired_flag(&self) -> Arc<AtomicBool> {
        self.fired.clone()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Everything behind the input gate.
#[derive(Default)]
pub(crate) struct InputState {
    pub open_sectors: HashMap<SectorId, OpenSector>,
    pub pending_pieces: HashMap<Cid, PendingPiece>,
    /// Transient routing table: fingerprints routed to a sector between the
    /// `AddPiece` event send and the handler draining them.
    pub assigned_pieces: HashMap<SectorId, Vec<Cid>>,
    pub sector_deadlines: HashMap<SectorId, SectorDeadline>,
    /// At most one sector creation may be in flight between the matcher and
    /// the state machine.
    pub creating_sector: bool,
}

impl InputState {
    /// Takes a sector out of matching: drops its open entry and cancels its
    /// deadline, if any.
    pub fn retire_open_sector(&mut self, id: &SectorId) {
        self.open_sectors.remove(id);
        if let Some(deadline) = self.sector_deadlines.remove(id) {
            deadline.cancel.cancel();
        }
    }

    pub fn has_unassigned_pieces(&self) -> bool {
        self.pending_pieces.values().any(|piece| !piece.assigned)
    }
}

impl Default for SectorDeadline {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-state sector counts, read by the backpressure checks. Kept apart from
/// the input gate so the state machine can update it without contending with
/// the matcher.
#[derive(Default)]
pub(crate) struct SectorStats {
    by_sector: Mutex<HashMap<SectorNumber, SectorState>>,
}

impl SectorStats {
    pub fn set(&self, number: SectorNumber, state: SectorState) {
        self.by_sector
            .lock()
            .expect("stats lock poisoned")
            .insert(number, state);
    }

    pub fn remove(&self, number: SectorNumber) {
        self.by_sector
            .lock()
            .expect("stats lock poisoned")
            .remove(&number);
    }

    /// Sectors still collecting deals.
    pub fn cur_staging(&self) -> u64 {
        self.count(|state| {
            matches!(state, SectorState::WaitDeals | SectorState::AddPiece)
        })
    }

    /// Deal sectors that left wait-deals and entered the sealing pipeline.
    /// Disjoint from [`Self::cur_staging`]: the two gate separate caps.
    pub fn cur_sealing(&self) -> u64 {
        self.count(|state| matches!(state, SectorState::Packing))
    }

    fn count(&self, pred: impl Fn(&SectorState) -> bool) -> u64 {
        self.by_sector
            .lock()
            .expect("stats lock poisoned")
            .values()
            .filter(|state| pred(state))
            .count() as u64
    }
}
