//! lodgecast — the listing allocation and lifecycle engine behind a
//! student-housing subscription marketplace.
//!
//! Clients pay for a subscription covering a set of campus regions; the
//! engine picks vacant rooms matching their filters (one per lodge group, up
//! to a fixed quota per region), surfaces each pick as a listing, and walks
//! every listing through a delayed verification state machine. Room-vacancy
//! events and client disputes settle listings early; the background verifier
//! settles the rest.
//!
//! The engine is embeddable: the owning web layer feeds it room-catalog
//! updates and vacancy edges, and reads listings back for dashboards. State
//! is event-sourced into a per-campus write-ahead log and replayed on open.

pub mod campus;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod verifier;
pub mod wal;

pub use engine::{Engine, EngineError};
pub use ledger::{BalanceBook, CreatorLedger};
