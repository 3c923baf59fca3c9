//! # switchyard-core
//!
//! Core abstractions for the Switchyard experimentation platform.
//!
//! This crate provides the foundational types used across all Switchyard
//! components:
//!
//! - **Identifiers**: Strongly-typed ids and names for experiments and
//!   applications
//! - **Clock**: An injectable time source so "is in the past" checks are
//!   testable and never anchored to process start
//! - **Caller Identity**: The `UserInfo` attached to every mutation
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured-logging bootstrap helpers
//!
//! ## Crate Boundary
//!
//! `switchyard-core` is the only crate allowed to define shared primitives.
//! Domain crates (such as `switchyard-experiment`) build on these contracts
//! and never redefine them.
//!
//! ## Example
//!
//! ```rust
//! use switchyard_core::prelude::*;
//!
//! let application = ApplicationName::new("shop").unwrap();
//! let id = ExperimentId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod id;
pub mod observability;
pub mod user;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use switchyard_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::id::{ApplicationName, ExperimentId, ExperimentLabel};
    pub use crate::user::UserInfo;
}

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use id::{ApplicationName, ExperimentId, ExperimentLabel};
pub use observability::{init_logging, LogFormat};
pub use user::UserInfo;
