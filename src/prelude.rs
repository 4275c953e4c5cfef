//! Convenient imports for stashq.
//!
//! ```no_run
//! use stashq::prelude::*;
//!
//! # fn main() -> stashq::Result<()> {
//! let store = GroupStore::ephemeral()?;
//! store.save("group", b"payload")?;
//! # Ok(())
//! # }
//! ```

pub use crate::store::{BatchLoadResult, GroupStore, GroupStoreBuilder, DEFAULT_BATCH_SIZE};

pub use stashq_core::types::{BatchMetadata, BatchStatus, SessionState, SessionStatus};
pub use stashq_core::{Error, Result};
