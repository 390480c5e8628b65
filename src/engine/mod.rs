mod allocation;
mod conflict;
mod denial;
mod directory;
mod error;
mod store;

pub use error::{Conflict, EngineError, Entity, ErrorClass};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::limits::{COMMIT_BACKOFF_BASE_MS, MAX_COMMIT_ATTEMPTS};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBed = Arc<RwLock<Bed>>;
pub type SharedCase = Arc<RwLock<CaseState>>;
pub type SharedRequest = Arc<RwLock<BedCheckInRequest>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// fsync once and answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        // Every sender hears about the failure, so none of the batch may
        // survive on disk or in the buffer.
        warn!(events = batch.len(), "WAL batch failed, rolling back: {e}");
        if let Err(rollback_err) = wal.rollback() {
            tracing::error!("WAL rollback failed, retrying before next append: {rollback_err}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

// ── State transitions shared by live commits and replay ───────────

/// Apply an allocation to locked state. When `request` is given it moves to
/// `ALLOCATED` in the same step.
pub(super) fn apply_allocation(
    case: &mut CaseState,
    request: Option<&mut BedCheckInRequest>,
    bed: &mut Bed,
    occupancy: &Occupancy,
) {
    case.active_occupancy = Some(occupancy.id);
    bed.occupant = Some(occupancy.case_id);
    bed.occupancy_id = Some(occupancy.id);
    if let Some(req) = request {
        req.status = RequestStatus::Allocated;
        req.occupancy_id = Some(occupancy.id);
        req.resolved_by = Some(occupancy.created_by.clone());
        req.resolved_at = Some(occupancy.created_at);
    }
}

/// Free the bed and the case index, but only where they still point at this
/// occupancy.
pub(super) fn apply_release(
    case: &mut CaseState,
    bed: &mut Bed,
    occupancy: &mut Occupancy,
    actor: &Actor,
    at: Ms,
) {
    occupancy.released_at = Some(at);
    occupancy.released_by = Some(actor.clone());
    if case.active_occupancy == Some(occupancy.id) {
        case.active_occupancy = None;
    }
    if bed.occupancy_id == Some(occupancy.id) {
        bed.occupant = None;
        bed.occupancy_id = None;
    }
}

pub(super) fn apply_resolution(
    request: &mut BedCheckInRequest,
    change: &Transition,
    actor: &Actor,
    at: Ms,
) {
    request.status = change.target();
    match change {
        Transition::Denied { reason } => request.denial_reason = Some(reason.clone()),
        Transition::Allocated { occupancy_id } => request.occupancy_id = Some(*occupancy_id),
        Transition::Deleted => {}
    }
    request.resolved_by = Some(actor.clone());
    request.resolved_at = Some(at);
}

/// The authoritative state for one shelter network.
///
/// Locks are always taken in the order commit gate → case → request → bed,
/// and only for the duration of an in-process commit.
pub struct Engine {
    pub(super) agencies: DashMap<Ulid, Agency>,
    pub(super) sites: DashMap<Ulid, Site>,
    pub(super) beds: DashMap<Ulid, SharedBed>,
    pub(super) cases: DashMap<Ulid, SharedCase>,
    pub(super) requests: DashMap<Ulid, SharedRequest>,
    pub(super) occupancies: DashMap<Ulid, Occupancy>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss an in-flight commit.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes directory registrations and request creation so duplicate
    /// ids are caught between the existence check and the insert.
    pub(super) registry: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            agencies: DashMap::new(),
            sites: DashMap::new(),
            beds: DashMap::new(),
            cases: DashMap::new(),
            requests: DashMap::new(),
            occupancies: DashMap::new(),
            commit_gate: RwLock::new(()),
            registry: Mutex::new(()),
            wal_tx,
            notify,
        };
        for event in &events {
            engine.replay_event(event);
        }
        Ok(engine)
    }

    /// Rebuild state from one logged event. We're the sole owner of every
    /// lock during replay, so `try_write` never contends. Never use
    /// `blocking_write` here: replay may run inside an async context (lazy
    /// network creation).
    fn replay_event(&self, event: &Event) {
        match event {
            Event::AgencyRegistered { id, name } => {
                self.agencies.insert(*id, Agency { id: *id, name: name.clone() });
            }
            Event::SiteRegistered { id, agency_id, name } => {
                self.sites.insert(
                    *id,
                    Site {
                        id: *id,
                        agency_id: *agency_id,
                        name: name.clone(),
                    },
                );
            }
            Event::BedRegistered {
                id,
                site_id,
                agency_id,
                name,
                room,
                bed_type,
            } => {
                let bed = Bed {
                    id: *id,
                    site_id: *site_id,
                    agency_id: *agency_id,
                    name: name.clone(),
                    room: room.clone(),
                    bed_type: bed_type.clone(),
                    occupant: None,
                    occupancy_id: None,
                };
                self.beds.insert(*id, Arc::new(RwLock::new(bed)));
            }
            Event::CaseRegistered { id, name } => {
                self.cases
                    .insert(*id, Arc::new(RwLock::new(CaseState::new(*id, name.clone()))));
            }
            Event::RequestCreated { request } => {
                self.requests
                    .insert(request.id, Arc::new(RwLock::new(request.clone())));
            }
            Event::RequestDenied { id, reason, actor, at } => {
                let change = Transition::Denied { reason: reason.clone() };
                self.replay_resolution(id, &change, actor, *at);
            }
            Event::RequestDeleted { id, actor, at } => {
                self.replay_resolution(id, &Transition::Deleted, actor, *at);
            }
            Event::BedAllocated { occupancy } => {
                let (Some(case), Some(bed)) = (
                    self.get_case(&occupancy.case_id),
                    self.get_bed(&occupancy.bed_id),
                ) else {
                    return;
                };
                let request = occupancy.request_id.and_then(|id| self.request_handle(&id));
                let (Ok(mut case), Ok(mut bed)) = (case.try_write(), bed.try_write()) else {
                    return;
                };
                match request.as_ref().map(|r| r.try_write()) {
                    Some(Ok(mut req)) => {
                        apply_allocation(&mut case, Some(&mut req), &mut bed, occupancy)
                    }
                    _ => apply_allocation(&mut case, None, &mut bed, occupancy),
                }
                self.occupancies.insert(occupancy.id, occupancy.clone());
            }
            Event::OccupancyReleased { id, actor, at } => {
                let Some(mut occupancy) = self.get_occupancy(id) else {
                    return;
                };
                if let (Some(case), Some(bed)) = (
                    self.get_case(&occupancy.case_id),
                    self.get_bed(&occupancy.bed_id),
                ) && let (Ok(mut case), Ok(mut bed)) = (case.try_write(), bed.try_write())
                {
                    apply_release(&mut case, &mut bed, &mut occupancy, actor, *at);
                }
                self.occupancies.insert(*id, occupancy);
            }
        }
    }

    fn replay_resolution(&self, id: &Ulid, change: &Transition, actor: &Actor, at: Ms) {
        if let Some(req) = self.request_handle(id)
            && let Ok(mut guard) = req.try_write()
        {
            apply_resolution(&mut guard, change, actor, at);
        }
    }

    async fn wal_append_once(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log an event before it is applied. Storage failures are retried
    /// with exponential backoff; business-rule errors never reach this point.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let mut attempt = 1;
        loop {
            match self.wal_append_once(event).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, "WAL append failed, retrying: {e}");
                    let backoff = COMMIT_BACKOFF_BASE_MS << (attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn get_bed(&self, id: &Ulid) -> Option<SharedBed> {
        self.beds.get(id).map(|e| e.value().clone())
    }

    pub fn get_case(&self, id: &Ulid) -> Option<SharedCase> {
        self.cases.get(id).map(|e| e.value().clone())
    }

    pub(super) fn request_handle(&self, id: &Ulid) -> Option<SharedRequest> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub(super) fn require_bed(&self, id: &Ulid) -> Result<SharedBed, EngineError> {
        self.get_bed(id).ok_or(EngineError::NotFound(Entity::Bed, *id))
    }

    pub(super) fn require_case(&self, id: &Ulid) -> Result<SharedCase, EngineError> {
        self.get_case(id).ok_or(EngineError::NotFound(Entity::Case, *id))
    }

    pub(super) fn require_request(&self, id: &Ulid) -> Result<SharedRequest, EngineError> {
        self.request_handle(id)
            .ok_or(EngineError::NotFound(Entity::Request, *id))
    }

    pub fn get_occupancy(&self, id: &Ulid) -> Option<Occupancy> {
        self.occupancies.get(id).map(|e| e.value().clone())
    }

    /// Rewrite the WAL as the minimal history that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        let mut agencies: Vec<Agency> = self.agencies.iter().map(|e| e.value().clone()).collect();
        agencies.sort_by_key(|a| a.id);
        events.extend(
            agencies
                .into_iter()
                .map(|a| Event::AgencyRegistered { id: a.id, name: a.name }),
        );

        let mut sites: Vec<Site> = self.sites.iter().map(|e| e.value().clone()).collect();
        sites.sort_by_key(|s| s.id);
        events.extend(sites.into_iter().map(|s| Event::SiteRegistered {
            id: s.id,
            agency_id: s.agency_id,
            name: s.name,
        }));

        let beds: Vec<SharedBed> = self.beds.iter().map(|e| e.value().clone()).collect();
        let mut bed_events = Vec::with_capacity(beds.len());
        for bed in beds {
            let b = bed.read().await;
            bed_events.push((
                b.id,
                Event::BedRegistered {
                    id: b.id,
                    site_id: b.site_id,
                    agency_id: b.agency_id,
                    name: b.name.clone(),
                    room: b.room.clone(),
                    bed_type: b.bed_type.clone(),
                },
            ));
        }
        bed_events.sort_by_key(|(id, _)| *id);
        events.extend(bed_events.into_iter().map(|(_, e)| e));

        let cases: Vec<SharedCase> = self.cases.iter().map(|e| e.value().clone()).collect();
        let mut case_events = Vec::with_capacity(cases.len());
        for case in cases {
            let c = case.read().await;
            case_events.push((c.id, Event::CaseRegistered { id: c.id, name: c.name.clone() }));
        }
        case_events.sort_by_key(|(id, _)| *id);
        events.extend(case_events.into_iter().map(|(_, e)| e));

        let requests: Vec<SharedRequest> =
            self.requests.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(requests.len());
        for req in requests {
            snapshots.push(req.read().await.clone());
        }
        snapshots.sort_by_key(|r| r.id);
        events.extend(
            snapshots
                .into_iter()
                .map(|request| Event::RequestCreated { request }),
        );

        // Released occupancies first, each immediately followed by its
        // release, so that active ones set the final bed and case pointers.
        let mut occupancies: Vec<Occupancy> =
            self.occupancies.iter().map(|e| e.value().clone()).collect();
        occupancies.sort_by_key(|o| (o.is_active(), o.id));
        for occ in occupancies {
            let release = occ.released_at.map(|at| Event::OccupancyReleased {
                id: occ.id,
                actor: occ.released_by.clone().unwrap_or_else(|| occ.created_by.clone()),
                at,
            });
            let mut allocated = occ;
            allocated.released_at = None;
            allocated.released_by = None;
            events.push(Event::BedAllocated { occupancy: allocated });
            events.extend(release);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
