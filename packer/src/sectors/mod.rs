//! The per-sector state machine: a single task owning every sector inside
//! the packing core, driven by [`SectorEvent`]s.

pub(crate) mod types;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use primitives_sealing::{max_deals, PaddedBytesAmount, SealProof, SectorId, SectorNumber};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::{
    input::{self, PackerInner},
    registry::{OpenSector, SectorDeadline},
    sectors::types::{PackedSector, SectorEvent, SectorInfo, SectorSnapshot, SectorState},
};

pub(crate) struct SectorRunner {
    inner: Arc<PackerInner>,
    packed: UnboundedSender<PackedSector>,
    sectors: HashMap<SectorNumber, SectorInfo>,
}

impl SectorRunner {
    pub(crate) fn new(inner: Arc<PackerInner>, packed: UnboundedSender<PackedSector>) -> Self {
        Self {
            inner,
            packed,
            sectors: HashMap::new(),
        }
    }

    #[tracing::instrument(skip_all)]
    pub(crate) async fn run(mut self, mut events: UnboundedReceiver<SectorEvent>) {
        let token = self.inner.token.clone();
        loop {
            tokio::select! {
                event = events.recv() => {
                    tracing::debug!("received event: {:?}", event);
                    match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                },
                _ = token.cancelled() => {
                    tracing::info!("sector state machine stopped by the cancellation token");
                    break;
                },
            }
        }
    }

    async fn handle(&mut self, event: SectorEvent) {
        match event {
            SectorEvent::Start { number, seal_proof } => {
                self.handle_start(number, seal_proof).await;
            }
            SectorEvent::StartPacking { number } => {
                self.handle_start_packing(number).await;
            }
            SectorEvent::AddPiece { number } => {
                self.handle_add_piece(number);
            }
            SectorEvent::PieceAdded { number, new_pieces } => {
                let Some(sector) = self.sectors.get_mut(&number) else {
                    tracing::warn!(sector = number, "pieces added to an unknown sector");
                    return;
                };
                sector.pieces.extend(new_pieces);
                self.enter_wait_deals(number).await;
            }
            SectorEvent::AddPieceFailed { number, error } => {
                tracing::error!(sector = number, %error, "failed to add pieces, parking sector");
                if let Some(sector) = self.sectors.get_mut(&number) {
                    sector.state = SectorState::AddPieceFailed;
                }
                self.inner.stats.set(number, SectorState::AddPieceFailed);
            }
            SectorEvent::Retire { number } => {
                self.handle_retire(number);
            }
        }
    }

    fn handle_retire(&mut self, number: SectorNumber) {
        match self.sectors.get(&number).map(|sector| sector.state) {
            None => {
                tracing::debug!(sector = number, "retire for an unknown sector");
                return;
            }
            Some(SectorState::WaitDeals) | Some(SectorState::AddPiece) => {
                tracing::warn!(
                    sector = number,
                    "refusing to retire a sector still collecting deals"
                );
                return;
            }
            Some(_) => {}
        }

        tracing::info!(sector = number, "sector retired");
        self.sectors.remove(&number);
        self.inner.stats.remove(number);

        // a sealing slot freed up
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let mut input = inner.input.clone().lock_owned().await;
            input::update_pending(&inner, &mut input).await;
        });
    }

    async fn handle_start(&mut self, number: SectorNumber, seal_proof: SealProof) {
        {
            let mut input = self.inner.input.lock().await;
            input.creating_sector = false;
        }

        tracing::info!(sector = number, "new deal sector");
        self.sectors
            .insert(number, SectorInfo::new(number, seal_proof));
        self.enter_wait_deals(number).await;
    }

    /// Evaluated on every entry to `WaitDeals`: decides whether the sector
    /// keeps waiting for deals or goes off to pack.
    async fn enter_wait_deals(&mut self, number: SectorNumber) {
        let (seal_proof, piece_count, used, used_padded, creation_time) = {
            let Some(sector) = self.sectors.get_mut(&number) else {
                tracing::warn!(sector = number, "wait-deals entry for an unknown sector");
                return;
            };
            sector.state = SectorState::WaitDeals;
            (
                sector.seal_proof,
                sector.pieces.len() as u64,
                sector.used(),
                sector.used_padded(),
                sector.creation_time,
            )
        };
        self.inner.stats.set(number, SectorState::WaitDeals);

        let id = self.inner.sector_id(number);
        let sector_size = seal_proof.sector_size();
        let mut input = self.inner.input.clone().lock_owned().await;

        if let Some(deadline) = input.sector_deadlines.remove(&id) {
            if deadline.has_fired() {
                self.start_packing(number);
                return;
            }
            deadline.cancel.cancel();
        }

        if piece_count >= max_deals(sector_size) {
            tracing::debug!(sector = number, "deal limit reached");
            self.start_packing(number);
            return;
        }

        if used_padded == PaddedBytesAmount(sector_size.bytes()) {
            tracing::debug!(sector = number, "sector filled");
            self.start_packing(number);
            return;
        }

        let config = self.inner.config.sealing_config();
        let seal_time = creation_time + config.wait_deals_delay;
        if Instant::now() >= seal_time {
            tracing::debug!(sector = number, "wait-deals delay expired");
            self.start_packing(number);
            return;
        }

        self.arm_deadline(&mut input.sector_deadlines, id, seal_time);
        input.open_sectors.insert(id, OpenSector { used });

        // the open-sector set changed; run a matching round with the gate
        // handed over
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            input::update_pending(&inner, &mut input).await;
        });
    }

    async fn handle_start_packing(&mut self, number: SectorNumber) {
        let Some(sector) = self.sectors.get_mut(&number) else {
            tracing::debug!(sector = number, "start-packing for an unknown sector");
            return;
        };
        if sector.state != SectorState::WaitDeals {
            tracing::debug!(
                sector = number,
                state = ?sector.state,
                "start-packing is a no-op outside WaitDeals"
            );
            return;
        }

        sector.state = SectorState::Packing;
        let packed = PackedSector {
            number,
            seal_proof: sector.seal_proof,
            pieces: sector.pieces.clone(),
        };
        self.inner.stats.set(number, SectorState::Packing);

        let id = self.inner.sector_id(number);
        {
            let mut input = self.inner.input.lock().await;
            input.retire_open_sector(&id);
        }

        tracing::info!(
            sector = number,
            pieces = packed.pieces.len(),
            "sector starts packing"
        );
        let _ = self.packed.send(packed);

        // a staging slot freed up; pieces held back by backpressure may now
        // get a sector
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let mut input = inner.input.clone().lock_owned().await;
            input::update_pending(&inner, &mut input).await;
        });
    }

    fn handle_add_piece(&mut self, number: SectorNumber) {
        let Some(sector) = self.sectors.get_mut(&number) else {
            tracing::warn!(sector = number, "add-piece for an unknown sector");
            return;
        };
        sector.state = SectorState::AddPiece;
        self.inner.stats.set(number, SectorState::AddPiece);

        let snapshot = SectorSnapshot {
            number,
            seal_proof: sector.seal_proof,
            pieces: sector.pieces.clone(),
        };
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            input::handle_add_piece(inner, snapshot).await;
        });
    }

    /// Arms the one-shot wait-deals deadline. The timer task sends
    /// `StartPacking` on fire; a cancellation race just produces a duplicate
    /// event, which the state machine ignores.
    fn arm_deadline(
        &self,
        deadlines: &mut HashMap<SectorId, SectorDeadline>,
        id: SectorId,
        seal_time: Instant,
    ) {
        let deadline = SectorDeadline::new();
        let cancel = deadline.cancel.clone();
        let fired = deadline.fired_flag();
        let events = self.inner.events.clone();
        let token = self.inner.token.clone();

        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(seal_time) => {
                    fired.store(true, Ordering::SeqCst);
                    tracing::debug!(sector = id.number, "wait-deals deadline reached");
                    let _ = events.send(SectorEvent::StartPacking { number: id.number });
                }
                _ = cancel.cancelled() => {}
                _ = token.cancelled() => {}
            }
        });

        deadlines.insert(id, deadline);
    }

    fn start_packing(&self, number: SectorNumber) {
        let _ = self.inner.events.send(SectorEvent::StartPacking { number });
    }
}
