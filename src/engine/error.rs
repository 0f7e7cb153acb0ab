use ulid::Ulid;

use crate::model::ListingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Dispute raised by someone other than the listing's client.
    Forbidden(Ulid),
    /// Attempted transition out of a terminal status. The listing is left
    /// unchanged.
    InvalidState { listing: Ulid, status: ListingStatus },
    /// Region tracker at or past quota. Internal allocator skip signal —
    /// expected steady state once a tracker expires, never surfaced.
    CapacityExceeded(Ulid),
    LimitExceeded(&'static str),
    Ledger(String),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(id) => {
                write!(f, "listing {id} belongs to a different client")
            }
            EngineError::InvalidState { listing, status } => {
                write!(f, "listing {listing} is {}; no transition from a terminal status", status.label())
            }
            EngineError::CapacityExceeded(region) => {
                write!(f, "region {region} is at its listing quota")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Ledger(e) => write!(f, "creator ledger error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
