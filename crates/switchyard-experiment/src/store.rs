//! Experiment persistence.
//!
//! One abstract [`ExperimentStore`] is implemented by two backends behind
//! the same interface: the *primary* wide-column store (authoritative; owns
//! index tables and audit records) and the *secondary* relational store (a
//! denormalised mirror for reporting joins). The service treats both as
//! required writers and keeps them consistent via compensation; the store
//! layer itself offers no cross-backend transactions.
//!
//! Deletion is logical for the primary (the row is tombstoned so the id is
//! never reused) and physical for the secondary mirror. Deleted rows are
//! invisible to every read operation of this interface.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use switchyard_core::{ApplicationName, ExperimentId, ExperimentLabel};

use crate::experiment::{AuditEntry, Experiment, State};

/// Errors surfaced by store backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Timeout or other retryable failure. Callers may retry the whole
    /// operation; the core never retries internally.
    #[error("transient repository error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A uniqueness constraint was violated or a concurrent writer won.
    #[error("repository conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The addressed row does not exist.
    #[error("repository row not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// Non-retryable failure (encoding, schema mismatch, misuse).
    #[error("repository schema error: {message}")]
    Schema {
        /// Description of the failure.
        message: String,
    },
}

impl RepositoryError {
    /// Creates a transient (retryable) error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a schema (non-retryable) error.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Returns true when the operation may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, RepositoryError>;

/// Abstract experiment persistence, implemented by the primary and
/// secondary backends.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Persists a new experiment row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] when a non-deleted experiment
    /// with the same (application, label) or the same id already exists.
    async fn create_experiment(&self, experiment: &Experiment) -> StoreResult<ExperimentId>;

    /// Builds the lookup index entries for a freshly created experiment.
    ///
    /// Primary only; the secondary mirror has no index tables and no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the index write fails.
    async fn create_indices_for_new_experiment(&self, experiment: &Experiment) -> StoreResult<()>;

    /// Fetches an experiment by id. Deleted rows read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_experiment(&self, id: ExperimentId) -> StoreResult<Option<Experiment>>;

    /// Fetches an experiment by (application, label). Deleted rows read as
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_experiment_by_label(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> StoreResult<Option<Experiment>>;

    /// Lists all non-deleted experiments.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_experiments(&self) -> StoreResult<Vec<Experiment>>;

    /// Lists all non-deleted experiments of one application.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_experiments_for_application(
        &self,
        application: &ApplicationName,
    ) -> StoreResult<Vec<Experiment>>;

    /// Overwrites an experiment row and returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the row does not exist or
    /// has been deleted.
    async fn update_experiment(&self, experiment: &Experiment) -> StoreResult<Experiment>;

    /// Deletes an experiment row: logically (tombstone) for the primary,
    /// physically for the secondary mirror. Used by create compensation.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete_experiment(&self, id: ExperimentId) -> StoreResult<()>;

    /// Appends attribute-level audit records for an experiment.
    ///
    /// Primary only; the secondary mirror rejects this with a schema error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the backend has no audit
    /// tables.
    async fn log_experiment_changes(
        &self,
        id: ExperimentId,
        entries: &[AuditEntry],
    ) -> StoreResult<()>;

    /// Lists the distinct application names with at least one non-deleted
    /// experiment, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_applications_list(&self) -> StoreResult<Vec<ApplicationName>>;
}

/// Which backend a [`MemoryExperimentStore`] is standing in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreRole {
    /// Wide-column primary: tombstoning delete, index and audit support.
    Primary,
    /// Relational mirror: physical delete, no index or audit tables.
    Secondary,
}

/// A stored row. Rows are kept in their storage encoding so reads exercise
/// the same decode path a real backend would.
#[derive(Debug, Clone)]
struct StoredRow {
    encoded: serde_json::Value,
    tombstone: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    rows: HashMap<ExperimentId, StoredRow>,
    audit: HashMap<ExperimentId, Vec<AuditEntry>>,
    indexed: HashSet<ExperimentId>,
}

/// In-memory [`ExperimentStore`] used by tests and local development.
///
/// Construct one per role: [`MemoryExperimentStore::primary`] tombstones
/// deletes and supports index and audit writes;
/// [`MemoryExperimentStore::secondary`] deletes physically and has no audit
/// tables.
#[derive(Debug)]
pub struct MemoryExperimentStore {
    role: StoreRole,
    state: RwLock<StoreState>,
}

impl MemoryExperimentStore {
    /// Creates an empty store standing in for the wide-column primary.
    #[must_use]
    pub fn primary() -> Self {
        Self {
            role: StoreRole::Primary,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Creates an empty store standing in for the relational mirror.
    #[must_use]
    pub fn secondary() -> Self {
        Self {
            role: StoreRole::Secondary,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Returns the audit records written for an experiment, in write order.
    #[must_use]
    pub fn audit_entries(&self, id: ExperimentId) -> Vec<AuditEntry> {
        self.read_state(|state| state.audit.get(&id).cloned().unwrap_or_default())
    }

    /// Returns true when index entries exist for the experiment.
    #[must_use]
    pub fn has_indices(&self, id: ExperimentId) -> bool {
        self.read_state(|state| state.indexed.contains(&id))
    }

    /// Returns true when the id is reserved by a tombstoned row.
    #[must_use]
    pub fn has_tombstone(&self, id: ExperimentId) -> bool {
        self.read_state(|state| state.rows.get(&id).is_some_and(|row| row.tombstone))
    }

    fn read_state<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let guard = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&guard)
    }

    fn encode(experiment: &Experiment) -> StoreResult<serde_json::Value> {
        serde_json::to_value(experiment)
            .map_err(|e| RepositoryError::schema(format!("failed to encode experiment row: {e}")))
    }

    fn decode(row: &StoredRow) -> StoreResult<Experiment> {
        serde_json::from_value(row.encoded.clone())
            .map_err(|e| RepositoryError::schema(format!("failed to decode experiment row: {e}")))
    }

    /// Decodes a row if it is visible (not tombstoned, not DELETED).
    fn decode_visible(row: &StoredRow) -> StoreResult<Option<Experiment>> {
        if row.tombstone {
            return Ok(None);
        }
        let experiment = Self::decode(row)?;
        if experiment.state == State::Deleted {
            return Ok(None);
        }
        Ok(Some(experiment))
    }
}

#[async_trait]
impl ExperimentStore for MemoryExperimentStore {
    async fn create_experiment(&self, experiment: &Experiment) -> StoreResult<ExperimentId> {
        let encoded = Self::encode(experiment)?;
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state.rows.contains_key(&experiment.id) {
            return Err(RepositoryError::conflict(format!(
                "experiment id {} already exists",
                experiment.id
            )));
        }

        for row in state.rows.values() {
            if let Some(existing) = Self::decode_visible(row)? {
                if existing.application_name == experiment.application_name
                    && existing.label == experiment.label
                {
                    return Err(RepositoryError::conflict(format!(
                        "experiment '{}' already exists in application '{}'",
                        experiment.label, experiment.application_name
                    )));
                }
            }
        }

        state.rows.insert(
            experiment.id,
            StoredRow {
                encoded,
                tombstone: false,
            },
        );
        Ok(experiment.id)
    }

    async fn create_indices_for_new_experiment(&self, experiment: &Experiment) -> StoreResult<()> {
        if self.role == StoreRole::Secondary {
            return Ok(());
        }
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !state.rows.contains_key(&experiment.id) {
            return Err(RepositoryError::not_found(format!(
                "cannot index missing experiment {}",
                experiment.id
            )));
        }
        state.indexed.insert(experiment.id);
        Ok(())
    }

    async fn get_experiment(&self, id: ExperimentId) -> StoreResult<Option<Experiment>> {
        self.read_state(|state| match state.rows.get(&id) {
            Some(row) => Self::decode_visible(row),
            None => Ok(None),
        })
    }

    async fn get_experiment_by_label(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> StoreResult<Option<Experiment>> {
        self.read_state(|state| {
            for row in state.rows.values() {
                if let Some(experiment) = Self::decode_visible(row)? {
                    if experiment.application_name == *application && experiment.label == *label {
                        return Ok(Some(experiment));
                    }
                }
            }
            Ok(None)
        })
    }

    async fn get_experiments(&self) -> StoreResult<Vec<Experiment>> {
        let mut experiments = self.read_state(|state| {
            state
                .rows
                .values()
                .map(Self::decode_visible)
                .filter_map(Result::transpose)
                .collect::<StoreResult<Vec<_>>>()
        })?;
        experiments.sort_by_key(|e| e.id);
        Ok(experiments)
    }

    async fn get_experiments_for_application(
        &self,
        application: &ApplicationName,
    ) -> StoreResult<Vec<Experiment>> {
        let mut experiments = self.get_experiments().await?;
        experiments.retain(|e| e.application_name == *application);
        Ok(experiments)
    }

    async fn update_experiment(&self, experiment: &Experiment) -> StoreResult<Experiment> {
        let encoded = Self::encode(experiment)?;
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match state.rows.get_mut(&experiment.id) {
            Some(row) if !row.tombstone => {
                row.encoded = encoded;
                Self::decode(row)
            }
            _ => Err(RepositoryError::not_found(format!(
                "experiment {} does not exist",
                experiment.id
            ))),
        }
    }

    async fn delete_experiment(&self, id: ExperimentId) -> StoreResult<()> {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match self.role {
            StoreRole::Primary => match state.rows.get_mut(&id) {
                Some(row) => {
                    row.tombstone = true;
                    Ok(())
                }
                None => Err(RepositoryError::not_found(format!(
                    "experiment {id} does not exist"
                ))),
            },
            StoreRole::Secondary => {
                state.rows.remove(&id);
                Ok(())
            }
        }
    }

    async fn log_experiment_changes(
        &self,
        id: ExperimentId,
        entries: &[AuditEntry],
    ) -> StoreResult<()> {
        if self.role == StoreRole::Secondary {
            return Err(RepositoryError::schema(
                "secondary store has no audit tables",
            ));
        }
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .audit
            .entry(id)
            .or_default()
            .extend(entries.iter().cloned());
        Ok(())
    }

    async fn get_applications_list(&self) -> StoreResult<Vec<ApplicationName>> {
        let experiments = self.get_experiments().await?;
        let mut applications: Vec<ApplicationName> = experiments
            .into_iter()
            .map(|e| e.application_name)
            .collect();
        applications.sort();
        applications.dedup();
        Ok(applications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::experiment::NewExperiment;

    fn experiment(application: &str, label: &str) -> Experiment {
        let start = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2098, 12, 1, 0, 0, 0).unwrap();
        NewExperiment::new(
            ApplicationName::new(application).unwrap(),
            ExperimentLabel::new(label).unwrap(),
            start,
            end,
            0.5,
        )
        .into_experiment(created)
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = MemoryExperimentStore::primary();
        let exp = experiment("shop", "cart-cta");

        let id = store.create_experiment(&exp).await.unwrap();
        assert_eq!(id, exp.id);

        let fetched = store.get_experiment(id).await.unwrap().unwrap();
        assert_eq!(fetched, exp);

        let by_label = store
            .get_experiment_by_label(&exp.application_name, &exp.label)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_label.id, id);
    }

    #[tokio::test]
    async fn duplicate_label_conflicts() {
        let store = MemoryExperimentStore::primary();
        store
            .create_experiment(&experiment("shop", "cart-cta"))
            .await
            .unwrap();

        let result = store.create_experiment(&experiment("shop", "cart-cta")).await;
        assert!(matches!(result, Err(RepositoryError::Conflict { .. })));

        // Same label in a different application is fine.
        store
            .create_experiment(&experiment("storefront", "cart-cta"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn primary_delete_is_logical_and_reserves_the_id() {
        let store = MemoryExperimentStore::primary();
        let exp = experiment("shop", "cart-cta");
        store.create_experiment(&exp).await.unwrap();
        store.delete_experiment(exp.id).await.unwrap();

        assert!(store.get_experiment(exp.id).await.unwrap().is_none());
        assert!(store.has_tombstone(exp.id));

        // The id is reserved: a second create with the same id conflicts.
        let result = store.create_experiment(&exp).await;
        assert!(matches!(result, Err(RepositoryError::Conflict { .. })));

        // But the (application, label) pair is free again.
        store
            .create_experiment(&experiment("shop", "cart-cta"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn secondary_delete_is_physical() {
        let store = MemoryExperimentStore::secondary();
        let exp = experiment("shop", "cart-cta");
        store.create_experiment(&exp).await.unwrap();
        store.delete_experiment(exp.id).await.unwrap();

        assert!(store.get_experiment(exp.id).await.unwrap().is_none());
        assert!(!store.has_tombstone(exp.id));
    }

    #[tokio::test]
    async fn deleted_state_rows_are_invisible() {
        let store = MemoryExperimentStore::primary();
        let mut exp = experiment("shop", "cart-cta");
        store.create_experiment(&exp).await.unwrap();

        exp.state = State::Deleted;
        store.update_experiment(&exp).await.unwrap();

        assert!(store.get_experiment(exp.id).await.unwrap().is_none());
        assert!(store.get_experiments().await.unwrap().is_empty());
        assert!(store.get_applications_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn indices_require_the_row() {
        let store = MemoryExperimentStore::primary();
        let exp = experiment("shop", "cart-cta");

        let result = store.create_indices_for_new_experiment(&exp).await;
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));

        store.create_experiment(&exp).await.unwrap();
        store.create_indices_for_new_experiment(&exp).await.unwrap();
        assert!(store.has_indices(exp.id));
    }

    #[tokio::test]
    async fn secondary_index_build_is_a_noop() {
        let store = MemoryExperimentStore::secondary();
        let exp = experiment("shop", "cart-cta");
        store.create_indices_for_new_experiment(&exp).await.unwrap();
        assert!(!store.has_indices(exp.id));
    }

    #[tokio::test]
    async fn audit_log_is_primary_only() {
        let entries = vec![AuditEntry {
            attribute_name: "description".to_string(),
            old_value: String::new(),
            new_value: "archived".to_string(),
        }];

        let primary = MemoryExperimentStore::primary();
        let id = ExperimentId::generate();
        primary.log_experiment_changes(id, &entries).await.unwrap();
        assert_eq!(primary.audit_entries(id), entries);

        let secondary = MemoryExperimentStore::secondary();
        let result = secondary.log_experiment_changes(id, &entries).await;
        assert!(matches!(result, Err(RepositoryError::Schema { .. })));
    }

    #[tokio::test]
    async fn applications_list_is_sorted_and_distinct() {
        let store = MemoryExperimentStore::primary();
        store
            .create_experiment(&experiment("storefront", "a"))
            .await
            .unwrap();
        store
            .create_experiment(&experiment("shop", "b"))
            .await
            .unwrap();
        store
            .create_experiment(&experiment("shop", "c"))
            .await
            .unwrap();

        let applications = store.get_applications_list().await.unwrap();
        let names: Vec<&str> = applications.iter().map(ApplicationName::as_str).collect();
        assert_eq!(names, vec!["shop", "storefront"]);
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = MemoryExperimentStore::primary();
        let exp = experiment("shop", "cart-cta");
        let result = store.update_experiment(&exp).await;
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }
}
