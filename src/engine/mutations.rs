use dashmap::mapref::entry::Entry;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_conflict, now_ms, validate_len, validate_slot};
use super::store::DayLedger;
use super::{Engine, EngineError};

fn validate_booking_text(person: &str, purpose: Option<&str>, notes: &str) -> Result<(), EngineError> {
    validate_len(person, MAX_NAME_LEN, "person name too long")?;
    if let Some(p) = purpose {
        validate_len(p, MAX_NAME_LEN, "purpose too long")?;
    }
    validate_len(notes, MAX_NOTES_LEN, "notes too long")
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn apply_patch(mut booking: Booking, patch: BookingPatch, now: Ms) -> Booking {
    if let Some(pc_id) = patch.pc_id {
        booking.pc_id = pc_id;
    }
    if let Some(date) = patch.date {
        booking.date = date;
    }
    if let Some(slot) = patch.slot {
        booking.slot = slot;
    }
    if let Some(name) = patch.person_name {
        booking.person_name = name.trim().to_string();
    }
    if let Some(status) = patch.status {
        booking.status = status;
    }
    if let Some(priority) = patch.priority {
        booking.priority = priority;
    }
    if patch.purpose.is_some() {
        booking.purpose = non_empty(patch.purpose);
    }
    if let Some(notes) = patch.notes {
        booking.notes = notes;
    }
    if let Some(is_active) = patch.is_active {
        booking.is_active = is_active;
    }
    booking.updated_at = now;
    booking
}

impl Engine {
    /// Book a PC for one slot. Nothing is written unless the PC is active and
    /// neither the PC nor the person is already confirmed for that slot.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, EngineError> {
        validate_slot(&draft.slot)?;
        validate_booking_text(&draft.person_name, draft.purpose.as_deref(), &draft.notes)?;

        let pc = self
            .get_pc(&draft.pc_id)
            .ok_or(EngineError::NotFound(draft.pc_id))?;
        if !pc.is_active() {
            return Err(EngineError::ResourceInactive(pc.id));
        }
        let mut person_name = draft.person_name.trim().to_string();
        let mut batch_id = draft.batch_id;
        if let Some(student_id) = draft.student_id {
            let student = self
                .get_student(&student_id)
                .ok_or(EngineError::NotFound(student_id))?;
            if person_name.is_empty() {
                person_name = student.name;
            }
            batch_id = batch_id.or(student.batch_id);
        }

        let now = now_ms();
        let booking = Booking {
            id: draft.id,
            pc_id: draft.pc_id,
            date: draft.date,
            slot: draft.slot,
            status: BookingStatus::Confirmed,
            person_name,
            student_id: draft.student_id,
            batch_id,
            teacher_id: draft.teacher_id,
            priority: draft.priority,
            purpose: non_empty(draft.purpose),
            notes: draft.notes,
            is_active: true,
            booked_by: draft.booked_by,
            created_at: now,
            updated_at: now,
        };

        // Claim the id before any lock so two creates sharing it can't both
        // reach the ledger.
        match self.booking_to_day.entry(booking.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(booking.id)),
            Entry::Vacant(claim) => {
                claim.insert(booking.date);
            }
        }
        if let Err(e) = self.commit_new_booking(&booking).await {
            self.booking_to_day.remove(&booking.id);
            return Err(e);
        }

        debug!(
            id = %booking.id,
            pc = %pc.code,
            date = %booking.date,
            slot = %booking.slot,
            person = %booking.person_name,
            "booking confirmed"
        );
        Ok(booking)
    }

    /// Patch a booking in place. When the result still holds its PC, both
    /// uniqueness checks re-run against everything except the booking itself.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        if let Some(slot) = &patch.slot {
            validate_slot(slot)?;
        }
        validate_booking_text(
            patch.person_name.as_deref().unwrap_or(""),
            patch.purpose.as_deref(),
            patch.notes.as_deref().unwrap_or(""),
        )?;

        let _writers = self.writers.read().await;
        let old_date = self.day_of_booking(&id)?;
        let new_date = patch.date.unwrap_or(old_date);

        if old_date == new_date {
            let day = self.day(old_date);
            let mut guard = day.write().await;
            let current = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
            self.check_pc_change(&current, patch.pc_id)?;
            let updated = apply_patch(current, patch, now_ms());
            self.admit_update(&guard, &updated)?;
            self.persist_and_apply(&mut guard, &Event::BookingUpdated { booking: updated.clone() })
                .await?;
            debug!(%id, status = updated.status.as_str(), "booking updated");
            return Ok(updated);
        }

        // Moving across days: lock both ledgers in date order.
        let (low, high) = if old_date < new_date {
            (old_date, new_date)
        } else {
            (new_date, old_date)
        };
        let low_day = self.day(low);
        let high_day = self.day(high);
        let mut low_guard = low_day.write().await;
        let mut high_guard = high_day.write().await;
        let (source, target): (&mut DayLedger, &mut DayLedger) = if old_date == low {
            (&mut *low_guard, &mut *high_guard)
        } else {
            (&mut *high_guard, &mut *low_guard)
        };

        let current = source.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        self.check_pc_change(&current, patch.pc_id)?;
        let updated = apply_patch(current, patch, now_ms());
        self.admit_update(target, &updated)?;

        self.wal_append(&Event::BookingUpdated { booking: updated.clone() })
            .await?;
        source.remove(&id);
        target
            .upsert(updated.clone())
            .map_err(|v| EngineError::WalError(format!("applied record broke a constraint: {v:?}")))?;
        self.booking_to_day.insert(id, new_date);

        debug!(%id, from = %old_date, to = %new_date, "booking moved");
        Ok(updated)
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _writers = self.writers.read().await;
        let date = self.day_of_booking(&id)?;
        let day = self.day(date);
        let mut guard = day.write().await;
        let existing = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        self.persist_and_apply(&mut guard, &Event::BookingDeleted { id }).await?;
        debug!(%id, %date, "booking deleted");
        Ok(existing)
    }

    async fn commit_new_booking(&self, booking: &Booking) -> Result<(), EngineError> {
        let _writers = self.writers.read().await;
        let day = self.day(booking.date);
        let mut guard = day.write().await;
        if guard.get(&booking.id).is_some() {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        self.reject_conflict(&check_conflict(&guard, booking, None))?;
        guard
            .admit(booking)
            .map_err(|v| self.violation_error(&guard, &[], v))?;
        self.persist_and_apply(&mut guard, &Event::BookingCreated { booking: booking.clone() })
            .await
    }

    fn check_pc_change(&self, current: &Booking, pc_id: Option<Ulid>) -> Result<(), EngineError> {
        match pc_id {
            Some(pc_id) if pc_id != current.pc_id => {
                let pc = self.get_pc(&pc_id).ok_or(EngineError::NotFound(pc_id))?;
                if !pc.is_active() {
                    return Err(EngineError::ResourceInactive(pc_id));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn admit_update(&self, ledger: &DayLedger, updated: &Booking) -> Result<(), EngineError> {
        if updated.occupies() {
            self.reject_conflict(&check_conflict(ledger, updated, Some(updated.id)))?;
        }
        ledger
            .admit(updated)
            .map_err(|v| self.violation_error(ledger, &[], v))
    }
}
