use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::{MAX_RESERVATIONS, MAX_USER_LEN};
use crate::model::{DateRange, Event, Reservation};

use super::conflict::{check_no_conflict, validate_range};
use super::{Engine, EngineError, WalCommand};

/// Result of a conflict-checked update.
///
/// A rejected update is not an error in the protocol sense: the reservation
/// exists and stands unchanged, and the caller gets its current (original)
/// state back alongside the rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new range was free; the reservation now carries it.
    Accepted(Reservation),
    /// The new range conflicted; the reservation is unchanged.
    Rejected(Reservation),
}

impl UpdateOutcome {
    /// The reservation's true state after the call, accepted or not.
    pub fn reservation(&self) -> &Reservation {
        match self {
            UpdateOutcome::Accepted(r) | UpdateOutcome::Rejected(r) => r,
        }
    }
}

impl Engine {
    /// Create a reservation if its range conflicts with nothing persisted.
    /// The conflict check and the commit happen under one write lock, so a
    /// concurrent create for an overlapping range cannot slip in between.
    pub async fn create_reservation(
        &self,
        user: &str,
        range: DateRange,
    ) -> Result<Reservation, EngineError> {
        validate_range(&range)?;
        if user.is_empty() {
            return Err(EngineError::LimitExceeded("user label must not be empty"));
        }
        if user.len() > MAX_USER_LEN {
            return Err(EngineError::LimitExceeded("user label too long"));
        }

        let mut timeline = self.timeline.write().await;
        if timeline.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("reservation table full"));
        }
        check_no_conflict(&timeline, &range, None)?;

        let reservation = Reservation {
            id: Ulid::new(),
            user: user.to_owned(),
            range,
        };
        let event = Event::ReservationCreated {
            id: reservation.id,
            user: reservation.user.clone(),
            range,
        };
        self.persist_and_apply(&mut timeline, &event).await?;

        tracing::debug!(id = %reservation.id, from = %range.from, to = %range.to, "reservation created");
        Ok(reservation)
    }

    /// Move an existing reservation to a new range. The new range is checked
    /// against every reservation *except* the one being moved; on conflict
    /// the stored state is untouched and returned as `Rejected`.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        range: DateRange,
    ) -> Result<UpdateOutcome, EngineError> {
        validate_range(&range)?;

        let mut timeline = self.timeline.write().await;
        let original = timeline
            .find_by_id(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if check_no_conflict(&timeline, &range, Some(id)).is_err() {
            tracing::debug!(id = %id, from = %range.from, to = %range.to, "update rejected");
            return Ok(UpdateOutcome::Rejected(original));
        }

        let event = Event::ReservationReplaced { id, range };
        self.persist_and_apply(&mut timeline, &event).await?;

        tracing::debug!(id = %id, from = %range.from, to = %range.to, "reservation moved");
        Ok(UpdateOutcome::Accepted(Reservation { range, ..original }))
    }

    /// Delete a reservation, returning its last persisted state.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut timeline = self.timeline.write().await;
        let removed = timeline
            .find_by_id(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationDeleted { id };
        self.persist_and_apply(&mut timeline, &event).await?;

        tracing::debug!(id = %id, "reservation deleted");
        Ok(removed)
    }

    /// Rewrite the WAL as one `ReservationCreated` per live reservation.
    /// Holds the read lock across the snapshot so the compacted file is a
    /// consistent point-in-time image.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events: Vec<Event> = {
            let timeline = self.timeline.read().await;
            timeline
                .iter()
                .map(|r| Event::ReservationCreated {
                    id: r.id,
                    user: r.user.clone(),
                    range: r.range,
                })
                .collect()
        };
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        tracing::info!(reservations = count, "WAL compacted");
        Ok(())
    }

    /// Appends written since the last compaction (or since open).
    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
