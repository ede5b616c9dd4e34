//! # optikv Testkit
//!
//! Test utilities for the optikv engine.
//!
//! This crate provides:
//! - Stress drivers for direct-op and commit-contention workloads
//! - A sequential oracle with scripted operation sequences
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use optikv_testkit::prelude::*;
//!
//! let ops = scripted_sequence(7, 32);
//! check_sequence(&ops).expect("engine and oracle agree");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod generators;
pub mod model;
pub mod stress;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::stress::*;
}

pub use generators::*;
pub use model::*;
pub use stress::*;
