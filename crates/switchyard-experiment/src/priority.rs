//! Per-application experiment priority lists.
//!
//! When several experiments on the same application could match the same
//! user, the priority list is authoritative for evaluation order. The list
//! for application A contains exactly the ids of A's experiments whose
//! state is neither TERMINATED nor DELETED, each at most once; the
//! lifecycle service maintains that invariant on every mutation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use switchyard_core::{ApplicationName, ExperimentId};

use crate::store::RepositoryError;

/// Ordered per-application experiment lists.
///
/// Calls are I/O boundaries: production implementations persist the order,
/// so every operation is async and fallible.
#[async_trait]
pub trait PriorityList: Send + Sync {
    /// Appends an experiment to the end of its application's list.
    ///
    /// Idempotent with respect to already-present ids: appending an id that
    /// is already listed leaves the list unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn append(
        &self,
        application: &ApplicationName,
        id: ExperimentId,
    ) -> Result<(), RepositoryError>;

    /// Removes an experiment from its application's list. Removing an
    /// absent id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn remove(
        &self,
        application: &ApplicationName,
        id: ExperimentId,
    ) -> Result<(), RepositoryError>;

    /// Replaces the order of an application's list.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] when `order` is not a
    /// permutation of the current membership.
    async fn reorder(
        &self,
        application: &ApplicationName,
        order: Vec<ExperimentId>,
    ) -> Result<(), RepositoryError>;

    /// Returns a consistent snapshot of an application's list.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn snapshot(
        &self,
        application: &ApplicationName,
    ) -> Result<Vec<ExperimentId>, RepositoryError>;
}

/// Process-local [`PriorityList`] backed by a read-write lock.
///
/// Mutations on the same application serialize on the lock; reads return a
/// consistent snapshot.
#[derive(Debug, Default)]
pub struct MemoryPriorityIndex {
    inner: RwLock<HashMap<ApplicationName, Vec<ExperimentId>>>,
}

impl MemoryPriorityIndex {
    /// Creates an empty priority index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriorityList for MemoryPriorityIndex {
    async fn append(
        &self,
        application: &ApplicationName,
        id: ExperimentId,
    ) -> Result<(), RepositoryError> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let list = guard.entry(application.clone()).or_default();
        if !list.contains(&id) {
            list.push(id);
        }
        Ok(())
    }

    async fn remove(
        &self,
        application: &ApplicationName,
        id: ExperimentId,
    ) -> Result<(), RepositoryError> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = guard.get_mut(application) {
            list.retain(|entry| *entry != id);
            if list.is_empty() {
                guard.remove(application);
            }
        }
        Ok(())
    }

    async fn reorder(
        &self,
        application: &ApplicationName,
        order: Vec<ExperimentId>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let list = guard.entry(application.clone()).or_default();

        let mut current = list.clone();
        let mut proposed = order.clone();
        current.sort_unstable();
        proposed.sort_unstable();
        if current != proposed {
            return Err(RepositoryError::conflict(format!(
                "new order for application '{application}' is not a permutation of the current list"
            )));
        }

        *list = order;
        Ok(())
    }

    async fn snapshot(
        &self,
        application: &ApplicationName,
    ) -> Result<Vec<ExperimentId>, RepositoryError> {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.get(application).cloned().unwrap_or_default())
    }
}
