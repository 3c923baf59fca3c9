//! Experiment buckets: the arms of an A/B test.
//!
//! Bucket CRUD lives outside this crate; the lifecycle core only reads the
//! bucket list during the DRAFT → RUNNING transition to sanity-check the
//! allocation before the experiment goes live.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use switchyard_core::ExperimentId;

use crate::store::RepositoryError;

/// One arm of an experiment with an allocation percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Bucket label, unique within the experiment.
    pub label: String,
    /// Fraction of sampled traffic assigned to this bucket, in [0, 1].
    pub allocation: f64,
    /// Whether this bucket is the control arm.
    pub is_control: bool,
    /// Optional free-text description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Bucket {
    /// Creates a treatment bucket.
    #[must_use]
    pub fn new(label: impl Into<String>, allocation: f64) -> Self {
        Self {
            label: label.into(),
            allocation,
            is_control: false,
            description: None,
        }
    }

    /// Creates a control bucket.
    #[must_use]
    pub fn control(label: impl Into<String>, allocation: f64) -> Self {
        Self {
            label: label.into(),
            allocation,
            is_control: true,
            description: None,
        }
    }
}

/// The full set of buckets configured for an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketList {
    /// The buckets, in configuration order.
    pub buckets: Vec<Bucket>,
}

impl BucketList {
    /// Creates a bucket list from the given buckets.
    #[must_use]
    pub fn new(buckets: Vec<Bucket>) -> Self {
        Self { buckets }
    }

    /// Returns the number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true when no buckets are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Read access to the bucket configuration of an experiment.
#[async_trait]
pub trait Buckets: Send + Sync {
    /// Returns the bucket list configured for the experiment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn bucket_list(&self, id: ExperimentId) -> Result<BucketList, RepositoryError>;
}

/// In-memory bucket source for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryBuckets {
    inner: RwLock<HashMap<ExperimentId, BucketList>>,
}

impl MemoryBuckets {
    /// Creates an empty bucket source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the bucket list for an experiment.
    pub fn set_buckets(&self, id: ExperimentId, buckets: BucketList) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(id, buckets);
    }
}

#[async_trait]
impl Buckets for MemoryBuckets {
    async fn bucket_list(&self, id: ExperimentId) -> Result<BucketList, RepositoryError> {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.get(&id).cloned().unwrap_or_default())
    }
}
