use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::store::DayLedger;
use super::Engine;

/// An attendance mark, as delivered by the attendance feed.
#[derive(Debug, Clone)]
pub struct AttendanceEvent {
    pub student_id: Ulid,
    pub status: AttendanceStatus,
    pub date: NaiveDate,
    /// Defaults to the student's batch timing.
    pub slot: Option<Slot>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub updated_count: usize,
    pub affected_bookings: Vec<BookingSummary>,
    pub message: Option<String>,
}

impl SyncOutcome {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Bookings an attendance mark should flip, in ledger order.
///
/// Absent releases every confirmed booking the student holds in the slot.
/// Present and late restore completed ones, unless someone else has since
/// taken the PC.
pub(super) fn plan_sync(ledger: &DayLedger, person: &str, slot: &Slot, status: AttendanceStatus) -> Vec<Ulid> {
    let (from, restoring) = match status {
        AttendanceStatus::Absent => (BookingStatus::Confirmed, false),
        AttendanceStatus::Present | AttendanceStatus::Late => (BookingStatus::Completed, true),
    };
    ledger
        .active()
        .filter(|b| b.status == from && &b.slot == slot && b.person_key() == Some(person))
        .filter(|b| {
            !restoring
                || ledger
                    .occupant_of_cell(b.pc_id, &b.slot)
                    .is_none_or(|holder| holder.id == b.id)
        })
        .map(|b| b.id)
        .collect()
}

impl Engine {
    /// Release or restore a student's bookings to match an attendance mark.
    ///
    /// Never fails: attendance is already recorded by the time this runs, so
    /// problems come back in `message` and the log.
    pub async fn on_attendance_marked(&self, event: AttendanceEvent) -> SyncOutcome {
        let Some(student) = self.get_student(&event.student_id) else {
            return SyncOutcome::skipped(format!("student {} not found", event.student_id));
        };
        let Some(slot) = event.slot.clone().or_else(|| self.student_slot(&student)) else {
            return SyncOutcome::skipped(format!("no lab slot known for {}", student.name));
        };
        let Some(person) = person_key(&student.name).map(str::to_string) else {
            return SyncOutcome::skipped("student has no name");
        };
        let _writers = self.writers.read().await;
        let Some(day) = self.get_day(event.date) else {
            return SyncOutcome::skipped("no bookings on that date");
        };

        let mut guard = day.write().await;
        let planned = plan_sync(&guard, &person, &slot, event.status);
        if planned.is_empty() {
            return SyncOutcome::skipped("no bookings to update");
        }

        let (to, note, direction) = match event.status {
            AttendanceStatus::Absent => (
                BookingStatus::Completed,
                "Auto-released: student marked absent".to_string(),
                "released",
            ),
            status => (
                BookingStatus::Confirmed,
                format!("Auto-restored: student marked {}", status.as_str()),
                "restored",
            ),
        };
        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

        let mut outcome = SyncOutcome::default();
        for id in planned {
            let Some(mut booking) = guard.get(&id).cloned() else {
                continue;
            };
            booking.status = to;
            booking.append_note(&format!("[{stamp}] {note}"));
            booking.updated_at = now_ms();

            if let Err(v) = guard.admit(&booking) {
                debug!(%id, ?v, "restore would double-book, skipping");
                continue;
            }
            if let Err(e) = self
                .persist_and_apply(&mut guard, &Event::BookingUpdated { booking: booking.clone() })
                .await
            {
                warn!(%id, error = %e, "attendance sync stopped");
                outcome.message = Some(format!("stopped after {} update(s): {e}", outcome.updated_count));
                break;
            }
            metrics::counter!(crate::observability::ATTENDANCE_SYNC_TRANSITIONS_TOTAL, "direction" => direction)
                .increment(1);
            outcome.updated_count += 1;
            outcome.affected_bookings.push(self.summarize(&booking));
        }

        if outcome.updated_count > 0 {
            debug!(
                student = %student.name,
                date = %event.date,
                %slot,
                direction,
                count = outcome.updated_count,
                "attendance synced"
            );
        } else if outcome.message.is_none() {
            outcome.message = Some("no bookings to update".into());
        }
        outcome
    }
}
