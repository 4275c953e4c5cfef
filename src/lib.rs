//! # stashq
//!
//! Durable, crash-safe, per-group append-and-batch queue layered on an
//! ordered key-value store.
//!
//! Producers append opaque byte payloads tagged with a group key; consumers
//! pull payloads in strict FIFO order, grouped into immutable batches,
//! acknowledge them to release storage, or resave an unprocessed suffix as a
//! new batch. Every queue datum survives process restart and is attributable
//! to a producer session.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stashq::prelude::*;
//!
//! # fn main() -> stashq::Result<()> {
//! let store = GroupStore::open("./queue-data")?;
//!
//! // Produce
//! store.save("orders", b"order-1")?;
//! store.save("orders", b"order-2")?;
//!
//! // Consume: each batch is delivered at most once
//! for batch in store.load_batch("orders", 10)? {
//!     for payload in &batch.data {
//!         // process payload
//!     }
//!     store.acknowledge_batch("orders", &batch.batch_id)?;
//! }
//!
//! store.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **FIFO per group**: payloads come back in sequence-assignment order.
//! - **Single delivery of batches**: a batch returned by
//!   [`GroupStore::load_batch`] is never returned again, across all
//!   concurrent consumers.
//! - **Atomic acknowledge**: a batch's metadata and payloads disappear
//!   together or not at all.
//! - **Sessions**: all data is namespaced under a heartbeating session, so
//!   peers can detect and reclaim dead instances.

#![warn(missing_docs)]

mod store;

pub mod prelude;

pub use store::{BatchLoadResult, GroupStore, GroupStoreBuilder, DEFAULT_BATCH_SIZE};

pub use stashq_core::types::{BatchMetadata, BatchStatus, SessionState, SessionStatus};
pub use stashq_core::{ulid, Error, Result};
pub use stashq_storage::{MemoryStorage, RedbStorage, Storage};
