use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::error::ConflictKind;

/// A write rejected by one of the ledger's partial unique indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueViolation {
    pub kind: ConflictKind,
    /// The booking already holding the index entry. `None` when the clash is
    /// between two rows of the same batch.
    pub existing: Option<Ulid>,
    pub rejected: Ulid,
}

/// All bookings for one calendar date.
///
/// Owns the two partial unique indexes over occupying (confirmed, active)
/// bookings: `(pc, slot)` and `(person, slot)`. Every write goes through
/// `admit`, so the indexes are the last word on double-booking no matter what
/// pre-checks the caller ran.
#[derive(Debug)]
pub struct DayLedger {
    pub date: NaiveDate,
    /// Keyed by ULID, so iteration follows creation order.
    bookings: BTreeMap<Ulid, Booking>,
    by_cell: HashMap<(Ulid, Slot), Ulid>,
    by_person: HashMap<(String, Slot), Ulid>,
}

impl DayLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bookings: BTreeMap::new(),
            by_cell: HashMap::new(),
            by_person: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.get(id)
    }

    /// Every booking, including archived (`is_active == false`) ones.
    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }

    /// Bookings visible to queries.
    pub fn active(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values().filter(|b| b.is_active)
    }

    pub fn occupant_of_cell(&self, pc_id: Ulid, slot: &Slot) -> Option<&Booking> {
        self.by_cell
            .get(&(pc_id, slot.clone()))
            .and_then(|id| self.bookings.get(id))
    }

    pub fn occupant_of_person(&self, person: &str, slot: &Slot) -> Option<&Booking> {
        self.by_person
            .get(&(person.to_string(), slot.clone()))
            .and_then(|id| self.bookings.get(id))
    }

    /// Check a single row against both unique indexes, ignoring its own entry.
    pub fn admit(&self, booking: &Booking) -> Result<(), UniqueViolation> {
        if !booking.occupies() {
            return Ok(());
        }
        if let Some(&holder) = self.by_cell.get(&(booking.pc_id, booking.slot.clone()))
            && holder != booking.id
        {
            return Err(UniqueViolation {
                kind: ConflictKind::Resource,
                existing: Some(holder),
                rejected: booking.id,
            });
        }
        if let Some(person) = booking.person_key()
            && let Some(&holder) = self.by_person.get(&(person.to_string(), booking.slot.clone()))
            && holder != booking.id
        {
            return Err(UniqueViolation {
                kind: ConflictKind::Person,
                existing: Some(holder),
                rejected: booking.id,
            });
        }
        Ok(())
    }

    /// Check a batch of new rows against the indexes and against each other.
    pub fn admit_all(&self, bookings: &[Booking]) -> Result<(), UniqueViolation> {
        let mut cells = HashSet::new();
        let mut people = HashSet::new();
        for b in bookings {
            self.admit(b)?;
            if !b.occupies() {
                continue;
            }
            if !cells.insert((b.pc_id, b.slot.clone())) {
                return Err(UniqueViolation {
                    kind: ConflictKind::Resource,
                    existing: None,
                    rejected: b.id,
                });
            }
            if let Some(person) = b.person_key()
                && !people.insert((person.to_string(), b.slot.clone()))
            {
                return Err(UniqueViolation {
                    kind: ConflictKind::Person,
                    existing: None,
                    rejected: b.id,
                });
            }
        }
        Ok(())
    }

    /// Add a new booking. Unlike `upsert`, an id already on the ledger is a
    /// violation rather than a replacement.
    pub fn insert(&mut self, booking: Booking) -> Result<(), UniqueViolation> {
        if self.bookings.contains_key(&booking.id) {
            return Err(UniqueViolation {
                kind: ConflictKind::Id,
                existing: Some(booking.id),
                rejected: booking.id,
            });
        }
        self.upsert(booking).map(|_| ())
    }

    /// Insert or replace a booking. Returns the previous version, if any.
    pub fn upsert(&mut self, booking: Booking) -> Result<Option<Booking>, UniqueViolation> {
        debug_assert_eq!(booking.date, self.date, "booking filed under the wrong day");
        self.admit(&booking)?;
        let previous = self.remove(&booking.id);
        if booking.occupies() {
            self.by_cell.insert((booking.pc_id, booking.slot.clone()), booking.id);
            if let Some(person) = booking.person_key() {
                self.by_person
                    .insert((person.to_string(), booking.slot.clone()), booking.id);
            }
        }
        self.bookings.insert(booking.id, booking);
        Ok(previous)
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<Booking> {
        let booking = self.bookings.remove(id)?;
        if booking.occupies() {
            let cell = (booking.pc_id, booking.slot.clone());
            if self.by_cell.get(&cell) == Some(id) {
                self.by_cell.remove(&cell);
            }
            if let Some(person) = booking.person_key() {
                let key = (person.to_string(), booking.slot.clone());
                if self.by_person.get(&key) == Some(id) {
                    self.by_person.remove(&key);
                }
            }
        }
        Some(booking)
    }
}
