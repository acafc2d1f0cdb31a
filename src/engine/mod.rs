mod availability;
mod conflict;
mod directory;
mod error;
mod maintenance;
mod mutations;
mod queries;
mod registry;
mod replicate;
mod store;
mod sync;

pub use availability::{project_availability, AvailabilityGrid, PcAvailability, SlotCell};
pub use conflict::{check_conflict, ConflictReport};
pub use error::{ConflictDetail, ConflictKind, EngineError};
pub use maintenance::{ClearReport, ClearRequest};
pub use replicate::{PreviousBookings, ReplicationReport, SkippedBooking};
pub use store::{DayLedger, UniqueViolation};
pub use sync::{AttendanceEvent, SyncOutcome};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedDayLedger = Arc<RwLock<DayLedger>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued, then
/// does a single fsync for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
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
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal
                .stage_compaction(&events)
                .and_then(|()| wal.commit_compaction());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The lab booking engine. Cheap to share behind an `Arc`.
pub struct Engine {
    pcs: DashMap<Ulid, Pc>,
    /// PC code → id, for duplicate-code checks.
    pc_codes: DashMap<String, Ulid>,
    /// Serializes PC writes so code uniqueness holds across the WAL await.
    registry_lock: Mutex<()>,
    /// Shared by every write path, exclusive for compaction, so the compacted
    /// file never misses an append.
    writers: RwLock<()>,
    days: DashMap<NaiveDate, SharedDayLedger>,
    /// Reverse lookup: booking id → the day ledger that holds it.
    booking_to_day: DashMap<Ulid, NaiveDate>,
    students: DashMap<Ulid, StudentRecord>,
    batches: DashMap<Ulid, BatchRecord>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a single-day booking event to a ledger the caller already holds.
fn apply_to_day(
    ledger: &mut DayLedger,
    event: &Event,
    booking_to_day: &DashMap<Ulid, NaiveDate>,
) -> Result<(), UniqueViolation> {
    match event {
        Event::BookingCreated { booking } => {
            ledger.insert(booking.clone())?;
            booking_to_day.insert(booking.id, booking.date);
        }
        Event::BookingUpdated { booking } => {
            ledger.upsert(booking.clone())?;
            booking_to_day.insert(booking.id, booking.date);
        }
        Event::BookingsCreated { bookings } => {
            ledger.admit_all(bookings)?;
            for booking in bookings {
                ledger.insert(booking.clone())?;
                booking_to_day.insert(booking.id, booking.date);
            }
        }
        Event::BookingDeleted { id } => {
            ledger.remove(id);
            booking_to_day.remove(id);
        }
        Event::BookingsCleared { ids, .. } => {
            for id in ids {
                ledger.remove(id);
                booking_to_day.remove(id);
            }
        }
        Event::PcRegistered { .. }
        | Event::PcUpdated { .. }
        | Event::PcRemoved { .. }
        | Event::StudentRegistered { .. }
        | Event::BatchRegistered { .. } => {}
    }
    Ok(())
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            pcs: DashMap::new(),
            pc_codes: DashMap::new(),
            registry_lock: Mutex::new(()),
            writers: RwLock::new(()),
            days: DashMap::new(),
            booking_to_day: DashMap::new(),
            students: DashMap::new(),
            batches: DashMap::new(),
            wal_tx,
        };

        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            pcs = engine.pcs.len(),
            bookings = engine.booking_to_day.len(),
            "replayed WAL"
        );

        Ok(engine)
    }

    /// Rebuild state from one WAL record. We're the sole owner of every ledger
    /// here, so try_write always succeeds; never block, since replay may run
    /// inside an async context.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::PcRegistered { pc } | Event::PcUpdated { pc } => self.apply_pc(pc.clone()),
            Event::PcRemoved { id } => self.apply_pc_removed(id),
            Event::StudentRegistered { student } => {
                self.students.insert(student.id, student.clone());
            }
            Event::BatchRegistered { batch } => {
                self.batches.insert(batch.id, batch.clone());
            }
            Event::BookingUpdated { booking } => {
                // A date change moves the row between ledgers.
                if let Some(old_date) = self.booking_to_day.get(&booking.id).map(|d| *d)
                    && old_date != booking.date
                    && let Some(old) = self.get_day(old_date)
                {
                    old.try_write().expect("replay: uncontended write").remove(&booking.id);
                }
                self.replay_on_day(booking.date, event);
            }
            Event::BookingCreated { booking } => self.replay_on_day(booking.date, event),
            Event::BookingsCreated { bookings } => {
                if let Some(first) = bookings.first() {
                    self.replay_on_day(first.date, event);
                }
            }
            Event::BookingDeleted { id } => {
                if let Some(date) = self.booking_to_day.get(id).map(|d| *d) {
                    self.replay_on_day(date, event);
                }
            }
            Event::BookingsCleared { date, .. } => self.replay_on_day(*date, event),
        }
    }

    fn replay_on_day(&self, date: NaiveDate, event: &Event) {
        let day = self.day(date);
        let mut guard = day.try_write().expect("replay: uncontended write");
        if let Err(v) = apply_to_day(&mut guard, event, &self.booking_to_day) {
            warn!(?v, %date, "skipping WAL record that violates a booking constraint");
        }
    }

    fn apply_pc(&self, pc: Pc) {
        if let Some(previous) = self.pcs.get(&pc.id).map(|p| p.code.clone())
            && previous != pc.code
        {
            self.pc_codes.remove(&previous);
        }
        self.pc_codes.insert(pc.code.clone(), pc.id);
        self.pcs.insert(pc.id, pc);
    }

    fn apply_pc_removed(&self, id: &Ulid) {
        if let Some((_, pc)) = self.pcs.remove(id) {
            self.pc_codes.remove(&pc.code);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append then apply to a held day ledger.
    async fn persist_and_apply(&self, ledger: &mut DayLedger, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(ledger, event, &self.booking_to_day)
            .map_err(|v| EngineError::WalError(format!("applied record broke a constraint: {v:?}")))
    }

    /// The ledger for `date`, created empty on first use.
    fn day(&self, date: NaiveDate) -> SharedDayLedger {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(date))))
            .clone()
    }

    fn get_day(&self, date: NaiveDate) -> Option<SharedDayLedger> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    fn day_of_booking(&self, id: &Ulid) -> Result<NaiveDate, EngineError> {
        self.booking_to_day
            .get(id)
            .map(|d| *d)
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_pc(&self, id: &Ulid) -> Option<Pc> {
        self.pcs.get(id).map(|e| e.value().clone())
    }

    fn pc_code(&self, id: &Ulid) -> Option<String> {
        self.pcs.get(id).map(|e| e.code.clone())
    }

    pub fn summarize(&self, booking: &Booking) -> BookingSummary {
        BookingSummary {
            id: booking.id,
            pc_id: booking.pc_id,
            pc_code: self.pc_code(&booking.pc_id),
            date: booking.date,
            slot: booking.slot.clone(),
            person_name: booking.person_name.clone(),
            purpose: booking.purpose.clone(),
            status: booking.status,
        }
    }

    /// Turn a conflict report into the caller-facing error, if it has one.
    fn reject_conflict(&self, report: &ConflictReport<'_>) -> Result<(), EngineError> {
        match report.first() {
            None => Ok(()),
            Some((kind, existing)) => {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL, "kind" => kind.as_str())
                    .increment(1);
                Err(EngineError::conflict(kind, self.summarize(existing)))
            }
        }
    }

    /// Map a storage constraint violation to the same `Conflict` error the
    /// pre-check would have produced. `batch` holds the rows being written, for
    /// clashes inside a batch.
    fn violation_error(&self, ledger: &DayLedger, batch: &[Booking], v: UniqueViolation) -> EngineError {
        if v.kind == ConflictKind::Id {
            return EngineError::AlreadyExists(v.rejected);
        }
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL, "kind" => v.kind.as_str())
            .increment(1);
        let holder = v
            .existing
            .and_then(|id| ledger.get(&id))
            .or_else(|| batch.iter().find(|b| b.id == v.rejected));
        match holder {
            Some(b) => EngineError::conflict(v.kind, self.summarize(b)),
            None => EngineError::Validation(format!("constraint violation on {}", v.rejected)),
        }
    }
}
