//! # switchyard-experiment
//!
//! Experiment lifecycle core for the Switchyard experimentation platform.
//!
//! This crate implements the experiment domain, providing:
//!
//! - **Lifecycle Orchestration**: Create, mutate and transition experiments
//!   across their state machine
//! - **Dual-Store Consistency**: A primary (wide-column) store and a
//!   secondary (relational mirror) store kept consistent by reverse-order
//!   compensation; there is no distributed transaction manager
//! - **Segmentation Rules**: Compilation of rule expressions and an
//!   in-memory cache of compiled rules
//! - **Priority Lists**: Per-application evaluation order for overlapping
//!   experiments
//!
//! ## Consistency Model
//!
//! Every externally visible mutation fans out to up to four subsystems
//! (primary store, priority list, secondary store, primary index tables),
//! each of which can fail independently. The service guarantees that on any
//! failure the observable state equals the pre-call state by compensating
//! the already-committed steps in reverse order. The event log is a
//! best-effort sink and is never compensated.
//!
//! A successful update becomes externally visible in the order: primary
//! store → secondary store → priority list → rule cache → event log.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchyard_core::prelude::*;
//! use switchyard_experiment::prelude::*;
//!
//! let primary = Arc::new(MemoryExperimentStore::primary());
//! let secondary = Arc::new(MemoryExperimentStore::secondary());
//! let service = ExperimentService::new(
//!     primary,
//!     secondary,
//!     Arc::new(MemoryBuckets::new()),
//!     Arc::new(MemoryPages::new()),
//! );
//!
//! let id = service.create(new_experiment, &user).await?;
//! let experiment = service.get(id).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod buckets;
pub mod error;
pub mod events;
pub mod experiment;
pub mod pages;
pub mod priority;
pub mod rule;
pub mod service;
pub mod store;
pub mod validate;

mod lock;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use events::{EventLog, ExperimentEvent, TestEventLog, TracingEventLog};
pub use experiment::{AuditEntry, Experiment, ExperimentPatch, NewExperiment, State};
pub use rule::{CompiledRule, RuleCache};
pub use service::ExperimentService;
pub use store::{ExperimentStore, MemoryExperimentStore, RepositoryError};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::buckets::{Bucket, BucketList, Buckets, MemoryBuckets};
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventLog, ExperimentEvent, TestEventLog, TracingEventLog};
    pub use crate::experiment::{AuditEntry, Experiment, ExperimentPatch, NewExperiment, State};
    pub use crate::pages::{MemoryPages, Pages};
    pub use crate::priority::{MemoryPriorityIndex, PriorityList};
    pub use crate::rule::{CompiledRule, RuleCache};
    pub use crate::service::ExperimentService;
    pub use crate::store::{ExperimentStore, MemoryExperimentStore, RepositoryError};
}
