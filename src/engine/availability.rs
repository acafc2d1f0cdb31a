use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

// ── Availability Projection ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCell {
    pub available: bool,
    /// The confirmed booking holding the cell.
    pub booking: Option<BookingSummary>,
    /// Someone was booked here but the booking was released.
    pub recently_freed: bool,
    pub last_booking: Option<BookingSummary>,
}

impl SlotCell {
    fn free() -> Self {
        Self {
            available: true,
            booking: None,
            recently_freed: false,
            last_booking: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcAvailability {
    pub pc_id: Ulid,
    pub code: String,
    pub row: u8,
    pub cells: BTreeMap<Slot, SlotCell>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityGrid {
    pub date: NaiveDate,
    /// Column order: the standard slots plus any legacy label seen on the day.
    pub slots: Vec<Slot>,
    pub pcs: Vec<PcAvailability>,
}

impl AvailabilityGrid {
    pub fn cell(&self, pc_id: &Ulid, slot: &Slot) -> Option<&SlotCell> {
        self.pcs
            .iter()
            .find(|p| &p.pc_id == pc_id)
            .and_then(|p| p.cells.get(slot))
    }

    pub fn available_count(&self) -> usize {
        self.pcs
            .iter()
            .flat_map(|p| p.cells.values())
            .filter(|c| c.available)
            .count()
    }
}

fn summary(booking: &Booking, pc: &Pc) -> BookingSummary {
    BookingSummary {
        id: booking.id,
        pc_id: booking.pc_id,
        pc_code: Some(pc.code.clone()),
        date: booking.date,
        slot: booking.slot.clone(),
        person_name: booking.person_name.clone(),
        purpose: booking.purpose.clone(),
        status: booking.status,
    }
}

/// Project a day's bookings onto a PC × slot grid.
///
/// Only active PCs get a row. Confirmed bookings take their cell; completed
/// bookings only annotate a cell nobody holds, so a confirmed booking always
/// wins regardless of the order rows arrive in. Cancelled and archived rows
/// are ignored.
pub fn project_availability(date: NaiveDate, pcs: &[Pc], bookings: &[Booking]) -> AvailabilityGrid {
    let day: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.date == date && b.is_active)
        .collect();

    let slots: Vec<Slot> = Slot::STANDARD
        .iter()
        .cloned()
        .chain(day.iter().map(|b| b.slot.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rows: Vec<PcAvailability> = pcs
        .iter()
        .filter(|pc| pc.is_active())
        .map(|pc| PcAvailability {
            pc_id: pc.id,
            code: pc.code.clone(),
            row: pc.row,
            cells: slots.iter().map(|s| (s.clone(), SlotCell::free())).collect(),
        })
        .collect();
    rows.sort_by(|a, b| a.row.cmp(&b.row).then_with(|| a.code.cmp(&b.code)));

    let by_id: BTreeMap<Ulid, &Pc> = pcs.iter().map(|pc| (pc.id, pc)).collect();

    for booking in day.iter().filter(|b| b.status == BookingStatus::Confirmed) {
        let (Some(row), Some(pc)) = (
            rows.iter_mut().find(|r| r.pc_id == booking.pc_id),
            by_id.get(&booking.pc_id),
        ) else {
            continue;
        };
        if let Some(cell) = row.cells.get_mut(&booking.slot) {
            cell.available = false;
            cell.booking = Some(summary(booking, pc));
            cell.recently_freed = false;
            cell.last_booking = None;
        }
    }

    for booking in day.iter().filter(|b| b.status == BookingStatus::Completed) {
        let (Some(row), Some(pc)) = (
            rows.iter_mut().find(|r| r.pc_id == booking.pc_id),
            by_id.get(&booking.pc_id),
        ) else {
            continue;
        };
        if let Some(cell) = row.cells.get_mut(&booking.slot)
            && cell.available
        {
            cell.recently_freed = true;
            cell.last_booking = Some(summary(booking, pc));
        }
    }

    AvailabilityGrid {
        date,
        slots,
        pcs: rows,
    }
}

impl Engine {
    pub async fn get_availability(&self, date: NaiveDate) -> Result<AvailabilityGrid, EngineError> {
        let pcs = self.active_pcs();
        let bookings: Vec<Booking> = match self.get_day(date) {
            Some(day) => day.read().await.active().cloned().collect(),
            None => Vec::new(),
        };
        Ok(project_availability(date, &pcs, &bookings))
    }
}
