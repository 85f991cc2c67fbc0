use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{HORIZON_END_OFFSET_DAYS, HORIZON_START_OFFSET_DAYS};

/// Reserved holder label for synthetic gap rows in availability results.
/// Never a real user; the transport layer rejects it on create.
pub const AVAILABLE_LABEL: &str = "available";

pub fn next_day(d: NaiveDate) -> NaiveDate {
    d + Days::new(1)
}

pub fn prev_day(d: NaiveDate) -> NaiveDate {
    d - Days::new(1)
}

/// Signed number of days from `a` to `b`.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days()
}

/// Closed date interval `[from, to]`, day granularity.
/// Single-day ranges have `from == to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        debug_assert!(from <= to, "DateRange from must not be after to");
        Self { from, to }
    }

    /// Closed-interval intersection test, inclusive on both ends.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.from <= other.to && self.to >= other.from
    }

    /// Number of calendar days covered, at least 1.
    pub fn len_days(&self) -> i64 {
        days_between(self.from, self.to) + 1
    }
}

/// A persisted booking on the room timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user: String,
    pub range: DateRange,
}

/// The booking window `[today + 1, today + 30]`. Recomputed from a single
/// `today` value per request; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl Horizon {
    pub fn from_today(today: NaiveDate) -> Self {
        Self {
            first: today + Days::new(HORIZON_START_OFFSET_DAYS),
            last: today + Days::new(HORIZON_END_OFFSET_DAYS),
        }
    }

    pub fn contains(&self, range: &DateRange) -> bool {
        self.first <= range.from && range.to <= self.last
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: Ulid,
        user: String,
        range: DateRange,
    },
    ReservationReplaced {
        id: Ulid,
        range: DateRange,
    },
    ReservationDeleted {
        id: Ulid,
    },
}

/// The reservation timeline for the room, sorted ascending by `range.from`.
///
/// The engine guarantees persisted reservations never overlap, so ascending
/// `from` order is also ascending `to` order; the store sorts by `from`
/// directly and does not depend on that invariant for its ordering.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    reservations: Vec<Reservation>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Insert maintaining sort order by `range.from`.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.from, |r| r.range.from)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove by id, returning the removed reservation.
    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Replace the date range of an existing reservation, keeping its
    /// identity and holder. Returns the reservation's new state.
    pub fn replace(&mut self, id: Ulid, range: DateRange) -> Option<Reservation> {
        let mut reservation = self.remove(id)?;
        reservation.range = range;
        self.insert(reservation.clone());
        Some(reservation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter()
    }

    pub fn find_by_id(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn find_by_user(&self, user: &str) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|r| r.user == user)
            .cloned()
            .collect()
    }

    /// Reservations overlapping the query range (closed-interval test).
    /// Uses binary search to skip reservations starting after `query.to`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts after query.to → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.from <= query.to);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.to >= query.from)
    }

    /// Reservations still relevant at `today` (`to >= today`), ascending by
    /// `from` — the order the availability sweep relies on.
    pub fn active(&self, today: NaiveDate) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|r| r.range.to >= today)
            .cloned()
            .collect()
    }

    /// Apply a WAL event. Used by replay and by the live mutation path after
    /// the event is durably appended.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ReservationCreated { id, user, range } => {
                self.insert(Reservation {
                    id: *id,
                    user: user.clone(),
                    range: *range,
                });
            }
            Event::ReservationReplaced { id, range } => {
                self.replace(*id, *range);
            }
            Event::ReservationDeleted { id } => {
                self.remove(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn res(user: &str, from: NaiveDate, to: NaiveDate) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user: user.into(),
            range: DateRange::new(from, to),
        }
    }

    #[test]
    fn range_basics() {
        let r = DateRange::new(d(2021, 7, 8), d(2021, 7, 10));
        assert_eq!(r.len_days(), 3);
        let single = DateRange::new(d(2021, 7, 8), d(2021, 7, 8));
        assert_eq!(single.len_days(), 1);
    }

    #[test]
    fn range_overlap_closed() {
        let a = DateRange::new(d(2021, 7, 8), d(2021, 7, 10));
        let b = DateRange::new(d(2021, 7, 10), d(2021, 7, 12));
        let c = DateRange::new(d(2021, 7, 11), d(2021, 7, 12));
        // Shared end day counts as overlap (inclusive bounds).
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn range_overlap_single_day() {
        let a = DateRange::new(d(2021, 7, 8), d(2021, 7, 8));
        let b = DateRange::new(d(2021, 7, 8), d(2021, 7, 8));
        let c = DateRange::new(d(2021, 7, 9), d(2021, 7, 9));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn horizon_bounds() {
        let h = Horizon::from_today(d(2021, 7, 6));
        assert_eq!(h.first, d(2021, 7, 7));
        assert_eq!(h.last, d(2021, 8, 5));
        assert!(h.contains(&DateRange::new(d(2021, 7, 7), d(2021, 7, 9))));
        assert!(!h.contains(&DateRange::new(d(2021, 7, 6), d(2021, 7, 9))));
        assert!(!h.contains(&DateRange::new(d(2021, 8, 4), d(2021, 8, 6))));
    }

    #[test]
    fn timeline_keeps_from_order() {
        let mut tl = Timeline::new();
        tl.insert(res("a", d(2021, 7, 16), d(2021, 7, 16)));
        tl.insert(res("b", d(2021, 7, 8), d(2021, 7, 10)));
        tl.insert(res("c", d(2021, 7, 12), d(2021, 7, 14)));
        let active = tl.active(d(2021, 7, 1));
        assert_eq!(active[0].range.from, d(2021, 7, 8));
        assert_eq!(active[1].range.from, d(2021, 7, 12));
        assert_eq!(active[2].range.from, d(2021, 7, 16));
    }

    #[test]
    fn timeline_remove_and_find() {
        let mut tl = Timeline::new();
        let r = res("alice", d(2021, 7, 8), d(2021, 7, 10));
        let id = r.id;
        tl.insert(r.clone());
        assert_eq!(tl.find_by_id(id), Some(&r));
        assert_eq!(tl.remove(id), Some(r));
        assert!(tl.find_by_id(id).is_none());
        assert!(tl.remove(id).is_none());
    }

    #[test]
    fn timeline_replace_keeps_identity_and_user() {
        let mut tl = Timeline::new();
        let r = res("alice", d(2021, 7, 8), d(2021, 7, 10));
        let id = r.id;
        tl.insert(r);
        let new_range = DateRange::new(d(2021, 7, 20), d(2021, 7, 22));
        let updated = tl.replace(id, new_range).unwrap();
        assert_eq!(updated.id, id);
        assert_eq!(updated.user, "alice");
        assert_eq!(updated.range, new_range);
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut tl = Timeline::new();
        tl.insert(res("a", d(2021, 7, 1), d(2021, 7, 3)));
        tl.insert(res("b", d(2021, 7, 8), d(2021, 7, 10)));
        tl.insert(res("c", d(2021, 7, 20), d(2021, 7, 22)));

        let query = DateRange::new(d(2021, 7, 9), d(2021, 7, 12));
        let hits: Vec<_> = tl.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user, "b");
    }

    #[test]
    fn overlapping_inclusive_boundary() {
        let mut tl = Timeline::new();
        tl.insert(res("a", d(2021, 7, 8), d(2021, 7, 10)));
        // Query starting exactly on the reservation's last day overlaps.
        let query = DateRange::new(d(2021, 7, 10), d(2021, 7, 12));
        assert_eq!(tl.overlapping(&query).count(), 1);
        // Query starting the day after does not.
        let query = DateRange::new(d(2021, 7, 11), d(2021, 7, 12));
        assert_eq!(tl.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_empty_timeline() {
        let tl = Timeline::new();
        let query = DateRange::new(d(2021, 7, 1), d(2021, 7, 31));
        assert_eq!(tl.overlapping(&query).count(), 0);
    }

    #[test]
    fn active_filters_past() {
        let mut tl = Timeline::new();
        tl.insert(res("past", d(2021, 6, 1), d(2021, 6, 3)));
        tl.insert(res("straddling", d(2021, 7, 4), d(2021, 7, 8)));
        tl.insert(res("future", d(2021, 7, 12), d(2021, 7, 14)));
        let active = tl.active(d(2021, 7, 6));
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].user, "straddling");
        assert_eq!(active[1].user, "future");
    }

    #[test]
    fn find_by_user_collects_all() {
        let mut tl = Timeline::new();
        tl.insert(res("alice", d(2021, 7, 8), d(2021, 7, 10)));
        tl.insert(res("bob", d(2021, 7, 12), d(2021, 7, 14)));
        tl.insert(res("alice", d(2021, 7, 20), d(2021, 7, 22)));
        let mine = tl.find_by_user("alice");
        assert_eq!(mine.len(), 2);
        assert!(tl.find_by_user("carol").is_empty());
    }

    #[test]
    fn apply_event_roundtrip() {
        let mut tl = Timeline::new();
        let id = Ulid::new();
        let range = DateRange::new(d(2021, 7, 8), d(2021, 7, 10));
        tl.apply(&Event::ReservationCreated {
            id,
            user: "alice".into(),
            range,
        });
        assert_eq!(tl.len(), 1);

        let moved = DateRange::new(d(2021, 7, 20), d(2021, 7, 21));
        tl.apply(&Event::ReservationReplaced { id, range: moved });
        assert_eq!(tl.find_by_id(id).unwrap().range, moved);

        tl.apply(&Event::ReservationDeleted { id });
        assert!(tl.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            id: Ulid::new(),
            user: "alice".into(),
            range: DateRange::new(d(2021, 7, 8), d(2021, 7, 10)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
