use std::sync::LazyLock;

use regex::Regex;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::ConflictKind;
use super::store::DayLedger;
use super::EngineError;

static PC_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{1,3}-[0-9]{1,3}$").expect("static regex"));

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_code(code: &str) -> Result<String, EngineError> {
    let code = code.trim();
    if !PC_CODE.is_match(code) {
        return Err(EngineError::Validation(format!(
            "pc code {code:?} must look like CS-01 (1-3 letters, dash, 1-3 digits)"
        )));
    }
    Ok(code.to_string())
}

pub(crate) fn validate_row(row: u8) -> Result<(), EngineError> {
    if !(MIN_ROW..=MAX_ROW).contains(&row) {
        return Err(EngineError::Validation(format!(
            "row {row} outside {MIN_ROW}..={MAX_ROW}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_slot(slot: &Slot) -> Result<(), EngineError> {
    if !slot.is_standard() {
        return Err(EngineError::Validation(format!("unknown slot {slot}")));
    }
    Ok(())
}

pub(crate) fn validate_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_specs(specs: &PcSpecs) -> Result<(), EngineError> {
    for field in [&specs.processor, &specs.ram, &specs.storage, &specs.os, &specs.notes]
        .into_iter()
        .flatten()
    {
        validate_len(field, MAX_SPEC_FIELD_LEN, "pc spec field too long")?;
    }
    Ok(())
}

/// Existing confirmed bookings a candidate would collide with. Reporting only.
#[derive(Debug, Default)]
pub struct ConflictReport<'a> {
    pub resource: Option<&'a Booking>,
    pub person: Option<&'a Booking>,
}

impl<'a> ConflictReport<'a> {
    pub fn is_clear(&self) -> bool {
        self.resource.is_none() && self.person.is_none()
    }

    /// The conflict a caller should reject with. Resource wins when both apply.
    pub fn first(&self) -> Option<(ConflictKind, &'a Booking)> {
        self.resource
            .map(|b| (ConflictKind::Resource, b))
            .or_else(|| self.person.map(|b| (ConflictKind::Person, b)))
    }
}

/// Find the confirmed bookings on `ledger`'s day that `candidate` would collide
/// with, ignoring `exclude` (the candidate's own id when updating).
///
/// Scans the ledger instead of reading its unique indexes, so the check stays
/// independent of the storage constraint it front-runs.
pub fn check_conflict<'a>(
    ledger: &'a DayLedger,
    candidate: &Booking,
    exclude: Option<Ulid>,
) -> ConflictReport<'a> {
    let mut report = ConflictReport::default();
    let person = candidate.person_key();

    for existing in ledger.active() {
        if existing.status != BookingStatus::Confirmed
            || Some(existing.id) == exclude
            || existing.id == candidate.id
            || existing.slot != candidate.slot
        {
            continue;
        }
        if report.resource.is_none() && existing.pc_id == candidate.pc_id {
            report.resource = Some(existing);
        }
        if report.person.is_none()
            && let Some(name) = person
            && existing.person_key() == Some(name)
        {
            report.person = Some(existing);
        }
        if report.resource.is_some() && (report.person.is_some() || person.is_none()) {
            break;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn booking(pc_id: Ulid, slot: Slot, person: &str, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            pc_id,
            date: date(),
            slot,
            status,
            person_name: person.into(),
            student_id: None,
            batch_id: None,
            teacher_id: None,
            priority: Priority::Normal,
            purpose: None,
            notes: String::new(),
            is_active: true,
            booked_by: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn code_format() {
        assert_eq!(validate_code(" CS-01 ").unwrap(), "CS-01");
        assert!(validate_code("A-1").is_ok());
        assert!(validate_code("LAB-123").is_ok());
        assert!(validate_code("LABS-1").is_err());
        assert!(validate_code("CS01").is_err());
        assert!(validate_code("CS-1234").is_err());
        assert!(validate_code("1S-01").is_err());
    }

    #[test]
    fn row_bounds() {
        assert!(validate_row(MIN_ROW).is_ok());
        assert!(validate_row(MAX_ROW).is_ok());
        assert!(validate_row(0).is_err());
        assert!(validate_row(MAX_ROW + 1).is_err());
    }

    #[test]
    fn legacy_slot_rejected_for_writes() {
        assert!(validate_slot(&Slot::First).is_ok());
        assert!(matches!(
            validate_slot(&Slot::Legacy("08:00-09:00".into())),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn reports_resource_and_person_independently() {
        let mut ledger = DayLedger::new(date());
        let pc1 = Ulid::new();
        let pc2 = Ulid::new();
        let alice = booking(pc1, Slot::First, "Alice", BookingStatus::Confirmed);
        let bob = booking(pc2, Slot::First, "Bob", BookingStatus::Confirmed);
        let (alice_id, bob_id) = (alice.id, bob.id);
        ledger.upsert(alice).unwrap();
        ledger.upsert(bob).unwrap();

        // Bob again, on Alice's PC: both dimensions collide.
        let candidate = booking(pc1, Slot::First, "Bob", BookingStatus::Confirmed);
        let report = check_conflict(&ledger, &candidate, None);
        assert_eq!(report.resource.map(|b| b.id), Some(alice_id));
        assert_eq!(report.person.map(|b| b.id), Some(bob_id));
        assert_eq!(report.first().map(|(k, _)| k), Some(ConflictKind::Resource));
    }

    #[test]
    fn other_slot_is_clear() {
        let mut ledger = DayLedger::new(date());
        let pc = Ulid::new();
        ledger
            .upsert(booking(pc, Slot::First, "Alice", BookingStatus::Confirmed))
            .unwrap();
        let candidate = booking(pc, Slot::Second, "Alice", BookingStatus::Confirmed);
        assert!(check_conflict(&ledger, &candidate, None).is_clear());
    }

    #[test]
    fn completed_and_cancelled_do_not_block() {
        let mut ledger = DayLedger::new(date());
        let pc = Ulid::new();
        ledger
            .upsert(booking(pc, Slot::First, "Alice", BookingStatus::Completed))
            .unwrap();
        ledger
            .upsert(booking(pc, Slot::First, "Alice", BookingStatus::Cancelled))
            .unwrap();
        let candidate = booking(pc, Slot::First, "Alice", BookingStatus::Confirmed);
        assert!(check_conflict(&ledger, &candidate, None).is_clear());
    }

    #[test]
    fn excluded_id_is_ignored() {
        let mut ledger = DayLedger::new(date());
        let pc = Ulid::new();
        let existing = booking(pc, Slot::First, "Alice", BookingStatus::Confirmed);
        let id = existing.id;
        ledger.upsert(existing.clone()).unwrap();
        let mut moved = existing;
        moved.notes = "edited".into();
        assert!(check_conflict(&ledger, &moved, Some(id)).is_clear());
    }

    #[test]
    fn empty_person_skips_person_check() {
        let mut ledger = DayLedger::new(date());
        ledger
            .upsert(booking(Ulid::new(), Slot::First, "", BookingStatus::Confirmed))
            .unwrap();
        let candidate = booking(Ulid::new(), Slot::First, "", BookingStatus::Confirmed);
        assert!(check_conflict(&ledger, &candidate, None).is_clear());
    }

    #[test]
    fn priority_does_not_preempt() {
        let mut ledger = DayLedger::new(date());
        let pc = Ulid::new();
        ledger
            .upsert(booking(pc, Slot::First, "Alice", BookingStatus::Confirmed))
            .unwrap();
        let mut urgent = booking(pc, Slot::First, "Bob", BookingStatus::Confirmed);
        urgent.priority = Priority::Urgent;
        assert!(check_conflict(&ledger, &urgent, None).resource.is_some());
    }
}
