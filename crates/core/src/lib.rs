//! Core types and traits for dumpcycle
//!
//! This crate defines the foundational types shared by every layer:
//! - CyclePointer: position in the database change log a cycle has reached
//! - CycleMode: full vs incremental capture, derived from on-disk state
//! - PartFile: one size-bounded piece of a retired artifact
//! - DatabaseConfig: connection parameters handed to the dump engine
//! - Error: error taxonomy (configuration, capture, persistence, split, verify)
//! - Traits: the dump engine port and the producer control capability

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{DumpEngine, ProducerControl};
pub use types::{CycleMode, CyclePointer, DatabaseConfig, PartFile};
