use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{DateRange, Horizon, Reservation};

use super::availability::free_intervals;
use super::conflict::validate_range;
use super::{Engine, EngineError};

impl Engine {
    /// True when any persisted reservation overlaps the query range.
    pub async fn is_taken(&self, range: &DateRange) -> Result<bool, EngineError> {
        validate_range(range)?;
        let timeline = self.timeline.read().await;
        Ok(timeline.overlapping(range).next().is_some())
    }

    /// Free intervals of the booking horizon as of `today`. The caller
    /// supplies `today` so one request observes one clock reading.
    pub async fn available_intervals(&self, today: NaiveDate) -> Vec<DateRange> {
        let horizon = Horizon::from_today(today);
        let timeline = self.timeline.read().await;
        let active = timeline.active(today);
        free_intervals(&active, &horizon)
    }

    /// Reservations whose stay has not yet fully elapsed, ascending by start.
    pub async fn active_reservations(&self, today: NaiveDate) -> Vec<Reservation> {
        let timeline = self.timeline.read().await;
        timeline.active(today)
    }

    pub async fn reservations_for_user(&self, user: &str) -> Vec<Reservation> {
        let timeline = self.timeline.read().await;
        timeline.find_by_user(user)
    }

    pub async fn reservation_by_id(&self, id: Ulid) -> Option<Reservation> {
        let timeline = self.timeline.read().await;
        timeline.find_by_id(id).cloned()
    }
}
