use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::store::DayLedger;
use super::{Engine, EngineError};

/// Confirmed bookings of the day before some date.
#[derive(Debug, Clone)]
pub struct PreviousBookings {
    pub source_date: NaiveDate,
    pub bookings: Vec<Booking>,
}

/// A source booking that was not copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBooking {
    pub source: BookingSummary,
    /// The target-day booking (or earlier copy) already holding the cell or
    /// the person. `None` when the PC is unavailable.
    pub holder: Option<BookingSummary>,
}

#[derive(Debug, Clone)]
pub struct ReplicationReport {
    pub source_date: NaiveDate,
    pub target_date: NaiveDate,
    pub applied: Vec<Booking>,
    pub conflicts: Vec<SkippedBooking>,
    pub student_conflicts: Vec<SkippedBooking>,
    pub unavailable_pcs: Vec<SkippedBooking>,
}

impl ReplicationReport {
    pub fn skipped(&self) -> usize {
        self.conflicts.len() + self.student_conflicts.len() + self.unavailable_pcs.len()
    }
}

fn previous_day(date: NaiveDate) -> Result<NaiveDate, EngineError> {
    date.pred_opt()
        .ok_or_else(|| EngineError::Validation(format!("no day before {date}")))
}

impl Engine {
    /// Confirmed bookings of the day before `date` (today, UTC, by default).
    pub async fn get_previous_bookings(&self, date: Option<NaiveDate>) -> Result<PreviousBookings, EngineError> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let source_date = previous_day(date)?;
        Ok(PreviousBookings {
            source_date,
            bookings: self.confirmed_on(source_date).await,
        })
    }

    /// Copy the confirmed bookings of `source` (default: the day before) onto
    /// `target`, skipping any that would take an unavailable PC, an occupied
    /// cell, or a person already booked in that slot. Everything copied lands
    /// as one WAL record; the source day is never touched.
    pub async fn apply_previous_bookings(
        &self,
        target: NaiveDate,
        source: Option<NaiveDate>,
    ) -> Result<ReplicationReport, EngineError> {
        let source = match source {
            Some(s) => s,
            None => previous_day(target)?,
        };
        if source == target {
            return Err(EngineError::Validation(format!(
                "cannot replicate {source} onto itself"
            )));
        }

        let _writers = self.writers.read().await;
        let candidates = self.confirmed_on(source).await;
        if candidates.len() > MAX_REPLICATION_BATCH {
            return Err(EngineError::LimitExceeded("too many bookings to replicate"));
        }

        let day = self.day(target);
        let mut guard = day.write().await;
        let mut report = self.plan_replication(&guard, source, &candidates, now_ms());

        if !report.applied.is_empty() {
            guard
                .admit_all(&report.applied)
                .map_err(|v| self.violation_error(&guard, &report.applied, v))?;
            let event = Event::BookingsCreated {
                bookings: std::mem::take(&mut report.applied),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            if let Event::BookingsCreated { bookings } = event {
                report.applied = bookings;
            }
        }
        drop(guard);

        for (outcome, n) in [
            ("applied", report.applied.len()),
            ("conflict", report.conflicts.len()),
            ("student_conflict", report.student_conflicts.len()),
            ("unavailable_pc", report.unavailable_pcs.len()),
        ] {
            if n > 0 {
                metrics::counter!(crate::observability::REPLICATION_OUTCOMES_TOTAL, "outcome" => outcome)
                    .increment(n as u64);
            }
        }
        info!(
            %source,
            %target,
            applied = report.applied.len(),
            skipped = report.skipped(),
            "replicated bookings"
        );
        Ok(report)
    }

    /// Confirmed, active bookings of one day in display order.
    async fn confirmed_on(&self, date: NaiveDate) -> Vec<Booking> {
        let Some(day) = self.get_day(date) else {
            return Vec::new();
        };
        let mut out: Vec<Booking> = day.read().await.active().filter(|b| b.occupies()).cloned().collect();
        self.sort_for_display(&mut out);
        out
    }

    /// Decide, candidate by candidate, what lands on the target day. Staged
    /// copies join the indexes as they go, so two source bookings can't take
    /// the same cell or person either.
    fn plan_replication(
        &self,
        target: &DayLedger,
        source_date: NaiveDate,
        candidates: &[Booking],
        now: Ms,
    ) -> ReplicationReport {
        let mut cells: HashMap<(Ulid, Slot), Ulid> = HashMap::new();
        let mut people: HashMap<(String, Slot), Ulid> = HashMap::new();
        for b in target.active().filter(|b| b.occupies()) {
            cells.insert((b.pc_id, b.slot.clone()), b.id);
            if let Some(name) = b.person_key() {
                people.insert((name.to_string(), b.slot.clone()), b.id);
            }
        }

        let mut report = ReplicationReport {
            source_date,
            target_date: target.date,
            applied: Vec::new(),
            conflicts: Vec::new(),
            student_conflicts: Vec::new(),
            unavailable_pcs: Vec::new(),
        };

        for src in candidates {
            let holder = |id: &Ulid, staged: &[Booking]| {
                target
                    .get(id)
                    .or_else(|| staged.iter().find(|b| &b.id == id))
                    .map(|b| self.summarize(b))
            };

            if !self.get_pc(&src.pc_id).is_some_and(|pc| pc.is_active()) {
                report.unavailable_pcs.push(SkippedBooking {
                    source: self.summarize(src),
                    holder: None,
                });
                continue;
            }
            if let Some(id) = cells.get(&(src.pc_id, src.slot.clone())) {
                report.conflicts.push(SkippedBooking {
                    source: self.summarize(src),
                    holder: holder(id, &report.applied),
                });
                continue;
            }
            if let Some(name) = src.person_key()
                && let Some(id) = people.get(&(name.to_string(), src.slot.clone()))
            {
                report.student_conflicts.push(SkippedBooking {
                    source: self.summarize(src),
                    holder: holder(id, &report.applied),
                });
                continue;
            }

            let copy = Booking {
                id: Ulid::new(),
                date: target.date,
                status: BookingStatus::Confirmed,
                is_active: true,
                notes: format!("Copied from {source_date}"),
                created_at: now,
                updated_at: now,
                ..src.clone()
            };
            cells.insert((copy.pc_id, copy.slot.clone()), copy.id);
            if let Some(name) = copy.person_key() {
                people.insert((name.to_string(), copy.slot.clone()), copy.id);
            }
            report.applied.push(copy);
        }
        report
    }
}
