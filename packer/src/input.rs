//! Deal intake: the input gate serializing every mutation of the packing
//! state, the greedy piece-to-sector matcher, and the handler writing
//! assigned pieces through the sealer.

use std::sync::Arc;

use cid::Cid;
use primitives_sealing::{
    max_deals, required_padding, DealInfo, PaddedBytesAmount, SealProof, SectorId, SectorNumber,
    SectorSize, StorageProviderId, UnpaddedBytesAmount, UnpaddedPieceSize,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::SealingConfigSource,
    error::PackerError,
    registry::{InputState, PendingPiece},
    sealer::{PieceData, Sealer, ZeroReader, DEAL_SECTOR_PRIORITY},
    sectors::{
        types::{PackedSector, SectorEvent, SectorPiece, SectorSnapshot},
        SectorRunner,
    },
};

/// Where a submitted piece ended up: the sector and the padded offset of the
/// piece's data within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorOffset {
    pub sector: SectorNumber,
    pub offset: PaddedBytesAmount,
}

pub(crate) struct PackerInner {
    pub provider: StorageProviderId,
    pub seal_proof: SealProof,
    pub sealer: Arc<dyn Sealer>,
    pub config: Arc<dyn SealingConfigSource>,
    /// The input gate. Every lookup and mutation of [`InputState`] happens
    /// with this lock held.
    pub input: Arc<Mutex<InputState>>,
    pub stats: crate::registry::SectorStats,
    pub events: mpsc::UnboundedSender<SectorEvent>,
    pub tracker: TaskTracker,
    pub token: CancellationToken,
}

impl PackerInner {
    pub fn sector_id(&self, number: SectorNumber) -> SectorId {
        SectorId {
            provider: self.provider,
            number,
        }
    }
}

/// Handle to a running packing core.
///
/// Cloning is cheap; all clones drive the same state.
#[derive(Clone)]
pub struct Packer {
    inner: Arc<PackerInner>,
}

impl Packer {
    /// Starts the packing core. Returns the handle and the stream of sectors
    /// that finished collecting deals, in hand-over order.
    pub fn start(
        provider: StorageProviderId,
        seal_proof: SealProof,
        sealer: Arc<dyn Sealer>,
        config: Arc<dyn SealingConfigSource>,
    ) -> (Packer, mpsc::UnboundedReceiver<PackedSector>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (packed_tx, packed_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(PackerInner {
            provider,
            seal_proof,
            sealer,
            config,
            input: Arc::new(Mutex::new(InputState::default())),
            stats: crate::registry::SectorStats::default(),
            events: events_tx,
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        });

        let runner = SectorRunner::new(inner.clone(), packed_tx);
        inner.tracker.spawn(runner.run(events_rx));

        (Packer { inner }, packed_rx)
    }

    /// Submits a deal piece for packing into whichever open sector fits it,
    /// creating a fresh sector if none does. Blocks until the piece has been
    /// written through the sealer or definitively dropped.
    ///
    /// `size` must be the piece's canonical unpadded size and `data` must
    /// yield exactly that many bytes.
    #[tracing::instrument(skip(self, data), fields(deal_id = deal.deal_id, publish_cid = %deal.publish_cid))]
    pub async fn add_piece_to_any_sector(
        &self,
        size: UnpaddedPieceSize,
        data: PieceData,
        deal: DealInfo,
    ) -> Result<SectorOffset, PackerError> {
        let sector_size = self.inner.seal_proof.sector_size();
        if UnpaddedBytesAmount::from(size) > sector_size.unpadded_bytes() {
            return Err(PackerError::PieceTooLarge { size, sector_size });
        }

        let (accepted, completion) = oneshot::channel();
        {
            let mut input = self.inner.input.clone().lock_owned().await;
            if input.pending_pieces.contains_key(&deal.publish_cid) {
                return Err(PackerError::DuplicatePublishCid(deal.publish_cid));
            }

            tracing::debug!(size = *size, "piece pending");
            input.pending_pieces.insert(
                deal.publish_cid,
                PendingPiece {
                    size,
                    deal,
                    data,
                    assigned: false,
                    accepted,
                },
            );

            // run the matcher with the gate handed over, releasing this
            // caller to wait on its completion channel
            let inner = self.inner.clone();
            self.inner.tracker.spawn(async move {
                update_pending(&inner, &mut input).await;
            });
        }

        let (sector, offset) = completion
            .await
            .map_err(|_| PackerError::ShuttingDown)??;
        Ok(SectorOffset {
            sector,
            offset: offset.padded(),
        })
    }

    /// Administrative force-start: stop waiting for deals on the given
    /// sector. Idempotent; unknown sectors are ignored.
    pub fn start_packing(&self, number: SectorNumber) -> Result<(), PackerError> {
        self.inner
            .events
            .send(SectorEvent::StartPacking { number })
            .map_err(|_| PackerError::ShuttingDown)
    }

    /// Tells the core the supervisor is done with a sector (sealed, or
    /// cleaned up after a failure), releasing its sealing-pipeline slot.
    /// Sectors still collecting deals are not retired.
    pub fn retire_sector(&self, number: SectorNumber) -> Result<(), PackerError> {
        self.inner
            .events
            .send(SectorEvent::Retire { number })
            .map_err(|_| PackerError::ShuttingDown)
    }

    /// Stops the core and waits for in-flight work to settle. Submitters
    /// still waiting resolve with [`PackerError::ShuttingDown`].
    pub async fn shutdown(self) {
        self.inner.token.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

#[derive(Debug, Clone, Copy)]
struct PieceMatch {
    sector: SectorId,
    fingerprint: Cid,
    size: UnpaddedPieceSize,
    /// Unpadded bytes that would remain unusable for another piece of this
    /// size if it were placed here.
    padding: u64,
}

/// Feasible `(sector, piece)` pairs, best placement first: least wasted
/// padding, then biggest piece, then oldest sector.
fn feasible_matches(input: &InputState, sector_size: SectorSize) -> Vec<PieceMatch> {
    let mut matches = Vec::new();
    for (&id, sector) in &input.open_sectors {
        let avail = sector_size.unpadded_bytes() - sector.used;
        for (&fingerprint, piece) in &input.pending_pieces {
            if piece.assigned {
                continue;
            }
            if UnpaddedBytesAmount::from(piece.size) <= avail {
                matches.push(PieceMatch {
                    sector: id,
                    fingerprint,
                    size: piece.size,
                    padding: *avail % *piece.size,
                });
            }
        }
    }

    matches.sort_by(|a, b| {
        a.padding
            .cmp(&b.padding)
            .then(b.size.cmp(&a.size))
            .then(a.sector.number.cmp(&b.sector.number))
    });
    matches
}

/// One matching round. Runs with the input gate held and stays free of
/// blocking I/O apart from the sector-creation metadata calls.
pub(crate) async fn update_pending(inner: &Arc<PackerInner>, input: &mut InputState) {
    let matches = feasible_matches(input, inner.seal_proof.sector_size());

    for mt in matches {
        if !input.open_sectors.contains_key(&mt.sector) {
            continue;
        }
        match input.pending_pieces.get(&mt.fingerprint) {
            Some(piece) if !piece.assigned => {}
            _ => continue,
        }

        // maybe-accept: route the fingerprint and wake the sector
        input
            .assigned_pieces
            .entry(mt.sector)
            .or_default()
            .push(mt.fingerprint);
        if inner
            .events
            .send(SectorEvent::AddPiece {
                number: mt.sector.number,
            })
            .is_err()
        {
            // shutting down; nothing will ever drain the routing table
            input.assigned_pieces.remove(&mt.sector);
            if let Some(piece) = input.pending_pieces.remove(&mt.fingerprint) {
                piece.complete(Err(PackerError::ShuttingDown));
            }
            continue;
        }

        if let Some(piece) = input.pending_pieces.get_mut(&mt.fingerprint) {
            piece.assigned = true;
        }
        // the sector takes one add-piece event per round; it re-opens when
        // the handler is done
        input.retire_open_sector(&mt.sector);
        tracing::debug!(
            sector = mt.sector.number,
            publish_cid = %mt.fingerprint,
            size = *mt.size,
            "assigned piece to sector"
        );
    }

    if input.has_unassigned_pieces() {
        try_create_deal_sector(inner, input).await;
    }
}

/// Brings a fresh sector into `WaitDeals`, unless backpressure or an
/// already-in-flight creation says otherwise.
async fn try_create_deal_sector(inner: &Arc<PackerInner>, input: &mut InputState) {
    if input.creating_sector {
        return;
    }

    let config = inner.config.sealing_config();
    if config.max_sealing_sectors_for_deals > 0
        && inner.stats.cur_sealing() >= config.max_sealing_sectors_for_deals
    {
        return;
    }
    if config.max_wait_deals_sectors > 0
        && inner.stats.cur_staging() >= config.max_wait_deals_sectors
    {
        return;
    }

    let number = match inner.sealer.next_sector_number().await {
        Ok(number) => number,
        Err(err) => {
            tracing::warn!(%err, "failed to allocate a sector number");
            return;
        }
    };
    if let Err(err) = inner
        .sealer
        .new_sector(inner.sector_id(number), inner.seal_proof)
        .await
    {
        tracing::warn!(%err, sector = number, "failed to initialize sector storage");
        return;
    }

    input.creating_sector = true;
    if inner
        .events
        .send(SectorEvent::Start {
            number,
            seal_proof: inner.seal_proof,
        })
        .is_err()
    {
        input.creating_sector = false;
        return;
    }
    tracing::info!(sector = number, "creating a new sector for deals");
}

/// Writes every piece routed to the sector through the sealer. The gate is
/// taken only to drain the routing table and to pop pending pieces; the
/// sealer calls run lock-free.
#[tracing::instrument(skip_all, fields(sector = snapshot.number))]
pub(crate) async fn handle_add_piece(inner: Arc<PackerInner>, snapshot: SectorSnapshot) {
    let id = inner.sector_id(snapshot.number);
    let pending: Vec<Cid> = {
        let mut input = inner.input.lock().await;
        input.assigned_pieces.remove(&id).unwrap_or_default()
    };

    if pending.is_empty() {
        // nothing routed here; acknowledge so the sector re-enters WaitDeals
        let _ = inner.events.send(SectorEvent::PieceAdded {
            number: snapshot.number,
            new_pieces: Vec::new(),
        });
        return;
    }

    let sector_size = snapshot.seal_proof.sector_size();
    let deal_limit = max_deals(sector_size);
    let mut piece_sizes: Vec<UnpaddedPieceSize> = snapshot
        .pieces
        .iter()
        .map(|piece| piece.info.size.unpadded())
        .collect();
    let mut offset: UnpaddedBytesAmount = piece_sizes
        .iter()
        .map(|size| UnpaddedBytesAmount::from(*size))
        .sum();
    let mut new_pieces: Vec<SectorPiece> = Vec::new();

    for (index, fingerprint) in pending.iter().enumerate() {
        let piece = {
            let mut input = inner.input.lock().await;
            input.pending_pieces.remove(fingerprint)
        };
        let Some(piece) = piece else {
            let error = PackerError::PieceLost(*fingerprint);
            tracing::error!(publish_cid = %fingerprint, "assigned piece is no longer pending");
            fail_pieces(&inner, &pending[index + 1..], &error).await;
            let _ = inner.events.send(SectorEvent::AddPieceFailed {
                number: snapshot.number,
                error,
            });
            return;
        };

        if (snapshot.pieces.len() + new_pieces.len() + 1) as u64 > deal_limit {
            piece.complete(Err(PackerError::TooManyDealsForSector(snapshot.number)));
            continue;
        }

        let piece_padded = piece.size.padded();
        let (pads, pad_total) = match required_padding(offset.padded(), piece_padded) {
            Ok(padding) => padding,
            Err(err) => {
                piece.complete(Err(err.into()));
                continue;
            }
        };

        if *offset.padded() + *pad_total + *piece_padded > sector_size.bytes() {
            piece.complete(Err(PackerError::NotEnoughSpace(snapshot.number)));
            continue;
        }

        offset += pad_total.unpadded();

        let PendingPiece {
            size,
            deal,
            data,
            accepted,
            ..
        } = piece;

        let mut failed = None;
        for pad in pads {
            match inner
                .sealer
                .add_piece(
                    DEAL_SECTOR_PRIORITY,
                    id,
                    &piece_sizes,
                    pad.unpadded(),
                    Box::new(ZeroReader::new(*pad.unpadded())),
                )
                .await
            {
                Ok(info) => {
                    piece_sizes.push(pad.unpadded());
                    new_pieces.push(SectorPiece { info, deal: None });
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }

        let written = match failed {
            Some(err) => Err(err),
            None => {
                inner
                    .sealer
                    .add_piece(DEAL_SECTOR_PRIORITY, id, &piece_sizes, size, data)
                    .await
            }
        };

        match written {
            Ok(info) => {
                tracing::info!(
                    deal_id = deal.deal_id,
                    publish_cid = %fingerprint,
                    piece_cid = %info.piece_cid,
                    offset = *offset,
                    "deal added to a sector"
                );
                let _ = accepted.send(Ok((snapshot.number, offset)));
                offset += size.into();
                piece_sizes.push(size);
                new_pieces.push(SectorPiece {
                    info,
                    deal: Some(deal),
                });
            }
            Err(err) => {
                let error = PackerError::from(err);
                tracing::error!(
                    deal_id = deal.deal_id,
                    %error,
                    "writing piece through the sealer failed"
                );
                let _ = accepted.send(Err(error.clone()));
                // unwritten batch siblings get the same verdict instead of
                // hanging on a sector that will never re-open
                fail_pieces(&inner, &pending[index + 1..], &error).await;
                let _ = inner.events.send(SectorEvent::AddPieceFailed {
                    number: snapshot.number,
                    error,
                });
                return;
            }
        }
    }

    let _ = inner.events.send(SectorEvent::PieceAdded {
        number: snapshot.number,
        new_pieces,
    });
}

/// Completes every listed fingerprint still pending with `error`.
async fn fail_pieces(inner: &Arc<PackerInner>, fingerprints: &[Cid], error: &PackerError) {
    if fingerprints.is_empty() {
        return;
    }
    let mut input = inner.input.lock().await;
    for fingerprint in fingerprints {
        if let Some(piece) = input.pending_pieces.remove(fingerprint) {
            piece.complete(Err(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cid::multihash::Multihash;
    use primitives_sealing::{DealSchedule, PaddedPieceSize, PieceInfo, SealProof};

    use super::*;
    use crate::{
        registry::OpenSector,
        sealer::{SealPriority, SealerError},
        SealingConfig,
    };

    fn test_cid(seed: &[u8]) -> Cid {
        let multihash = Multihash::wrap(0x0, seed).expect("seed fits an identity multihash");
        Cid::new_v1(0x55, multihash)
    }

    fn test_deal(n: u64) -> DealInfo {
        DealInfo {
            deal_id: n,
            publish_cid: test_cid(format!("publish-{n}").as_bytes()),
            piece_cid: test_cid(format!("piece-{n}").as_bytes()),
            schedule: DealSchedule {
                start_block: 0,
                end_block: 100,
            },
        }
    }

    fn pending(n: u64, padded: u64) -> (Cid, PendingPiece, oneshot::Receiver<crate::registry::PieceAccepted>) {
        let deal = test_deal(n);
        let fingerprint = deal.publish_cid;
        let size = PaddedPieceSize::new(padded).unwrap().unpadded();
        let (accepted, rx) = oneshot::channel();
        (
            fingerprint,
            PendingPiece {
                size,
                deal,
                data: Box::new(ZeroReader::new(*size)),
                assigned: false,
                accepted,
            },
            rx,
        )
    }

    /// Sealer whose every `add_piece` fails.
    struct BrokenSealer;

    #[async_trait]
    impl Sealer for BrokenSealer {
        async fn new_sector(
            &self,
            _sector: SectorId,
            _seal_proof: SealProof,
        ) -> Result<(), SealerError> {
            Ok(())
        }

        async fn add_piece(
            &self,
            _priority: SealPriority,
            _sector: SectorId,
            _existing_pieces: &[UnpaddedPieceSize],
            _size: UnpaddedPieceSize,
            _data: PieceData,
        ) -> Result<PieceInfo, SealerError> {
            Err(SealerError::Rejected("disk on fire".into()))
        }

        async fn next_sector_number(&self) -> Result<SectorNumber, SealerError> {
            Ok(1)
        }
    }

    fn test_inner(sealer: Arc<dyn Sealer>) -> (Arc<PackerInner>, mpsc::UnboundedReceiver<SectorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PackerInner {
            provider: 1000,
            seal_proof: SealProof::StackedDRG2KiBV1P1,
            sealer,
            config: Arc::new(SealingConfig::default()),
            input: Arc::new(Mutex::new(InputState::default())),
            stats: crate::registry::SectorStats::default(),
            events,
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        });
        (inner, events_rx)
    }

    #[test]
    fn matches_prefer_less_padding_then_bigger_pieces_then_older_sectors() {
        let mut input = InputState::default();
        let provider = 1000;
        // sector 1 holds one 512-padded piece, sector 2 is empty
        input.open_sectors.insert(
            SectorId {
                provider,
                number: 1,
            },
            OpenSector {
                used: UnpaddedBytesAmount(508),
            },
        );
        input.open_sectors.insert(
            SectorId {
                provider,
                number: 2,
            },
            OpenSector {
                used: UnpaddedBytesAmount(0),
            },
        );
        let (small, piece, _rx1) = pending(1, 512);
        input.pending_pieces.insert(small, piece);
        let (large, piece, _rx2) = pending(2, 1024);
        input.pending_pieces.insert(large, piece);

        let matches = feasible_matches(&input, SectorSize::_2KiB);

        let key: Vec<(u64, Cid)> = matches
            .iter()
            .map(|mt| (mt.sector.number, mt.fingerprint))
            .collect();
        assert_eq!(
            key,
            vec![
                // zero-waste placements first, biggest piece leading
                (2, large),
                // equal-size ties break toward the older sector
                (1, small),
                (2, small),
                // sector 1 has 1524 bytes left: taking the 1016-piece there
                // strands 508 bytes of padding, so it sorts last
                (1, large),
            ]
        );
    }

    #[tokio::test]
    async fn sealer_failure_fails_whole_batch() {
        let (inner, mut events_rx) = test_inner(Arc::new(BrokenSealer));
        let number = 1;
        let id = inner.sector_id(number);

        let (first, piece, rx1) = pending(1, 512);
        let (second, piece2, rx2) = pending(2, 512);
        {
            let mut input = inner.input.lock().await;
            input.pending_pieces.insert(first, piece);
            input.pending_pieces.insert(second, piece2);
            input.assigned_pieces.insert(id, vec![first, second]);
        }

        handle_add_piece(
            inner.clone(),
            SectorSnapshot {
                number,
                seal_proof: SealProof::StackedDRG2KiBV1P1,
                pieces: Vec::new(),
            },
        )
        .await;

        // the failing deal and its unwritten sibling get the same verdict
        assert!(matches!(rx1.await.unwrap(), Err(PackerError::Sealer(_))));
        assert!(matches!(rx2.await.unwrap(), Err(PackerError::Sealer(_))));
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SectorEvent::AddPieceFailed { number: 1, .. }
        ));
        // nothing is left pending or routed
        let input = inner.input.lock().await;
        assert!(input.pending_pieces.is_empty());
        assert!(input.assigned_pieces.is_empty());
    }

    #[tokio::test]
    async fn empty_routing_table_acknowledges_with_no_pieces() {
        let (inner, mut events_rx) = test_inner(Arc::new(BrokenSealer));

        handle_add_piece(
            inner.clone(),
            SectorSnapshot {
                number: 7,
                seal_proof: SealProof::StackedDRG2KiBV1P1,
                pieces: Vec::new(),
            },
        )
        .await;

        match events_rx.recv().await.unwrap() {
            SectorEvent::PieceAdded { number, new_pieces } => {
                assert_eq!(number, 7);
                assert!(new_pieces.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
