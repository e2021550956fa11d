//! # mqstore testkit
//!
//! Test utilities for the mqstore journal and paging layers.
//!
//! This crate provides:
//! - A crashing file factory that simulates power loss
//! - Journal and broker fixtures over in-memory volumes
//! - Proptest strategies and a reference model for journal operations
//!
//! ## Usage
//!
//! ```rust
//! use mqstore_testkit::prelude::*;
//!
//! let fixture = JournalFixture::new();
//! let (journal, loaded) = fixture.open();
//! assert!(loaded.records.is_empty());
//! journal.append_add_record(1, 0, &payload(1, 16), false).unwrap();
//! journal.stop().unwrap();
//!
//! let (_journal, loaded) = fixture.open();
//! assert_eq!(loaded.records.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
