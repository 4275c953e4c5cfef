//! Lifecycle managers for stashq.
//!
//! Two managers sit between the facade and the store: [`SessionManager`]
//! owns session records and the heartbeat worker, [`BatchManager`] owns the
//! batch state machine. Each guards its mutable state with one mutex and
//! calls only downward into storage.

#![warn(missing_docs)]

pub mod batch;
pub mod session;

pub use batch::BatchManager;
pub use session::{SessionManager, DEFAULT_HEARTBEAT_INTERVAL};
