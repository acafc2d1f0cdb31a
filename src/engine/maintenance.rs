use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Which confirmed bookings to clear. Every constraint left `None` matches all.
#[derive(Debug, Clone, Default)]
pub struct ClearRequest {
    pub date: Option<NaiveDate>,
    pub slot: Option<Slot>,
    pub pc_ids: Option<Vec<Ulid>>,
    pub confirm: bool,
}

impl ClearRequest {
    fn matches(&self, b: &Booking) -> bool {
        b.occupies()
            && self.slot.as_ref().is_none_or(|s| &b.slot == s)
            && self.pc_ids.as_ref().is_none_or(|ids| ids.contains(&b.pc_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClearReport {
    pub cleared_count: usize,
    pub cleared_bookings: Vec<BookingSummary>,
}

impl Engine {
    /// Hard-delete confirmed bookings in bulk. Refuses to do anything unless
    /// `confirm` is set.
    pub async fn clear_booked_slots(&self, request: ClearRequest) -> Result<ClearReport, EngineError> {
        if !request.confirm {
            return Err(EngineError::ConfirmationRequired);
        }
        if request.pc_ids.as_ref().is_some_and(|ids| ids.len() > MAX_IN_CLAUSE_IDS) {
            return Err(EngineError::LimitExceeded("too many pc ids"));
        }

        let _writers = self.writers.read().await;
        let dates = match request.date {
            Some(date) => vec![date],
            None => self.dates(),
        };

        let mut report = ClearReport::default();
        for date in dates {
            let Some(day) = self.get_day(date) else {
                continue;
            };
            let mut guard = day.write().await;
            let mut victims: Vec<Booking> = guard.active().filter(|b| request.matches(b)).cloned().collect();
            if victims.is_empty() {
                continue;
            }
            self.sort_for_display(&mut victims);
            let ids = victims.iter().map(|b| b.id).collect();
            self.persist_and_apply(&mut guard, &Event::BookingsCleared { date, ids })
                .await?;
            report.cleared_count += victims.len();
            report
                .cleared_bookings
                .extend(victims.iter().map(|b| self.summarize(b)));
        }

        info!(
            date = ?request.date,
            slot = ?request.slot.as_ref().map(Slot::as_str),
            cleared = report.cleared_count,
            "cleared booked slots"
        );
        Ok(report)
    }

    /// Rewrite the WAL as the smallest event set that rebuilds current state.
    /// Blocks every writer until the new file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _writers = self.writers.write().await;

        let mut events = Vec::new();
        events.extend(self.pcs.iter().map(|e| Event::PcRegistered { pc: e.value().clone() }));
        events.extend(
            self.batches
                .iter()
                .map(|e| Event::BatchRegistered { batch: e.value().clone() }),
        );
        events.extend(
            self.students
                .iter()
                .map(|e| Event::StudentRegistered { student: e.value().clone() }),
        );
        let mut bookings = 0usize;
        for date in self.dates() {
            let Some(day) = self.get_day(date) else {
                continue;
            };
            let guard = day.read().await;
            bookings += guard.len();
            events.extend(guard.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        info!(events = count, bookings, "compacted WAL");
        Ok(())
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

    /// Every date with a ledger, ascending.
    pub(super) fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        dates
    }
}
