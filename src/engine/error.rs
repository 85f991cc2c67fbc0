use chrono::NaiveDate;
use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// The id does not resolve to a persisted reservation.
    NotFound(Ulid),
    /// The candidate range overlaps the reservation with this id.
    Conflict(Ulid),
    /// Caller-supplied `from` is after `to`. The transport layer rejects
    /// these before the engine; this is the engine's defensive check.
    InvalidRange { from: NaiveDate, to: NaiveDate },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::InvalidRange { from, to } => {
                write!(f, "invalid range: {from} is after {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
