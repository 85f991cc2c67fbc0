use ulid::Ulid;

use crate::model::{DateRange, Timeline};

use super::EngineError;

/// Defensive precondition check: the transport layer rejects inverted ranges
/// before the engine sees them, but the engine must never act on one.
pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.from > range.to {
        return Err(EngineError::InvalidRange {
            from: range.from,
            to: range.to,
        });
    }
    Ok(())
}

/// Conflict check for the mutation protocol: the candidate range must not
/// overlap any persisted reservation, except the one named by `exclude`
/// (an update checks the new range against every *other* reservation).
pub(crate) fn check_no_conflict(
    timeline: &Timeline,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for existing in timeline.overlapping(range) {
        if exclude == Some(existing.id) {
            continue;
        }
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reservation;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn timeline_with(ranges: &[(NaiveDate, NaiveDate)]) -> (Timeline, Vec<Ulid>) {
        let mut tl = Timeline::new();
        let mut ids = Vec::new();
        for &(from, to) in ranges {
            let id = Ulid::new();
            tl.insert(Reservation {
                id,
                user: "guest".into(),
                range: DateRange::new(from, to),
            });
            ids.push(id);
        }
        (tl, ids)
    }

    #[test]
    fn inverted_range_rejected() {
        let range = DateRange {
            from: d(2021, 7, 10),
            to: d(2021, 7, 8),
        };
        assert!(matches!(
            validate_range(&range),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn conflict_names_offender() {
        let (tl, ids) = timeline_with(&[(d(2021, 7, 8), d(2021, 7, 10))]);
        let candidate = DateRange::new(d(2021, 7, 10), d(2021, 7, 12));
        match check_no_conflict(&tl, &candidate, None) {
            Err(EngineError::Conflict(id)) => assert_eq!(id, ids[0]),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn no_conflict_in_gap() {
        let (tl, _) = timeline_with(&[
            (d(2021, 7, 8), d(2021, 7, 10)),
            (d(2021, 7, 14), d(2021, 7, 16)),
        ]);
        let candidate = DateRange::new(d(2021, 7, 11), d(2021, 7, 13));
        assert!(check_no_conflict(&tl, &candidate, None).is_ok());
    }

    #[test]
    fn exclusion_skips_own_reservation() {
        let (tl, ids) = timeline_with(&[
            (d(2021, 7, 8), d(2021, 7, 10)),
            (d(2021, 7, 12), d(2021, 7, 14)),
        ]);
        // Extending the first reservation by one day only conflicts with itself.
        let candidate = DateRange::new(d(2021, 7, 8), d(2021, 7, 11));
        assert!(check_no_conflict(&tl, &candidate, Some(ids[0])).is_ok());
        // But reaching into the second reservation still conflicts.
        let candidate = DateRange::new(d(2021, 7, 8), d(2021, 7, 12));
        match check_no_conflict(&tl, &candidate, Some(ids[0])) {
            Err(EngineError::Conflict(id)) => assert_eq!(id, ids[1]),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
