//! Core vocabulary for stashq.
//!
//! This crate holds everything the storage, engine, and facade layers share:
//! the canonical error type, the persisted record types and their JSON
//! encoding, the key schema for the ordered store, and the ULID identifier
//! source.

#![warn(missing_docs)]

pub mod error;
pub mod keys;
pub mod types;
pub mod ulid;

pub use error::{Error, Result};
