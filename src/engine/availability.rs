use crate::model::{days_between, next_day, prev_day, DateRange, Horizon, Reservation};

// ── Availability sweep ────────────────────────────────────────────

/// Compute the free intervals of the booking horizon, given the active
/// reservations sorted ascending by `from`.
///
/// Precondition: `active` is sorted by `range.from` and pairwise
/// non-overlapping. The store sorts by `from` directly; the non-overlap
/// invariant is what makes the pairwise walk below sufficient.
///
/// Single linear pass:
/// 1. empty input yields the whole horizon as one gap;
/// 2. a gap before the first reservation;
/// 3. a gap between each consecutive pair (adjacent bookings with no free
///    day between emit nothing);
/// 4. a gap after the last reservation, up to the horizon's end.
/// A single-element input evaluates BOTH the first and the last case.
pub fn free_intervals(active: &[Reservation], horizon: &Horizon) -> Vec<DateRange> {
    debug_assert!(
        active.windows(2).all(|w| w[0].range.from <= w[1].range.from),
        "active reservations must be sorted ascending by from"
    );

    let Some(first) = active.first() else {
        return vec![DateRange::new(horizon.first, horizon.last)];
    };

    let mut free = Vec::new();

    if days_between(horizon.first, first.range.from) > 0 {
        free.push(DateRange::new(horizon.first, prev_day(first.range.from)));
    }

    for pair in active.windows(2) {
        let (curr, next) = (&pair[0], &pair[1]);
        if days_between(curr.range.to, next.range.from) > 1 {
            free.push(DateRange::new(
                next_day(curr.range.to),
                prev_day(next.range.from),
            ));
        }
    }

    // `first` and `last` are the same element for a one-reservation timeline;
    // both edge gaps still apply.
    let last = &active[active.len() - 1];
    if days_between(last.range.to, horizon.last) > 1 {
        free.push(DateRange::new(next_day(last.range.to), horizon.last));
    }

    free
}
