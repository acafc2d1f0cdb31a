use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        let date = self.day_of_booking(id)?;
        let day = self.get_day(date).ok_or(EngineError::NotFound(*id))?;
        let guard = day.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(*id))
    }

    /// Active bookings matching `filter`, ordered by date, slot, then PC code.
    /// A date filter reads a single ledger; anything else walks every day.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let days = match filter.date {
            Some(date) => self.get_day(date).into_iter().collect::<Vec<_>>(),
            None => self
                .dates()
                .into_iter()
                .filter_map(|date| self.get_day(date))
                .collect(),
        };

        let mut out = Vec::new();
        for day in days {
            let guard = day.read().await;
            out.extend(guard.active().filter(|b| filter.matches(b)).cloned());
        }
        self.sort_for_display(&mut out);
        out
    }

    /// Date, slot, PC code, then id. Bookings whose PC is gone sort last in
    /// their slot.
    pub(super) fn sort_for_display(&self, bookings: &mut [Booking]) {
        bookings.sort_by_cached_key(|b| {
            let code = self.pc_code(&b.pc_id);
            (b.date, b.slot.clone(), code.is_none(), code, b.id)
        });
    }
}
