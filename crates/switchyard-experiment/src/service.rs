//! The experiment lifecycle service.
//!
//! [`ExperimentService`] owns the create/update/transition orchestration
//! across the primary store, the secondary mirror, the priority list, the
//! rule cache, the page binder and the event log. There is no distributed
//! transaction manager: consistency rests on primary-first ordering plus
//! reverse-order compensation of exactly the steps that already committed.
//!
//! ## Failure semantics
//!
//! - Validation failures touch no store.
//! - A downstream failure compensates the committed steps in reverse order;
//!   compensation failures are logged and never replace the original error
//!   (a crash mid-compensation leaves an inconsistency for the operational
//!   reconciliation job to repair).
//! - Event-log failures never abort an operation and are never compensated.
//!
//! ## Concurrency
//!
//! Calls targeting the same experiment id serialize on an in-process keyed
//! lock; creates serialize on the (application, label) pair. Different keys
//! proceed in parallel. Locks are held for one orchestration call only.

use std::sync::Arc;

use switchyard_core::{
    ApplicationName, Clock, ExperimentId, ExperimentLabel, SystemClock, UserInfo,
};

use crate::buckets::Buckets;
use crate::error::{Error, Result};
use crate::events::{EventLog, ExperimentEvent, TracingEventLog};
use crate::experiment::{Experiment, ExperimentPatch, NewExperiment, PatchOutcome, State};
use crate::lock::KeyedLocks;
use crate::pages::Pages;
use crate::priority::{MemoryPriorityIndex, PriorityList};
use crate::rule::{self, RuleCache};
use crate::store::{ExperimentStore, RepositoryError};
use crate::validate;

/// Orchestrates the experiment lifecycle across both stores and the
/// process-local caches.
pub struct ExperimentService {
    primary: Arc<dyn ExperimentStore>,
    secondary: Arc<dyn ExperimentStore>,
    buckets: Arc<dyn Buckets>,
    pages: Arc<dyn Pages>,
    priorities: Arc<dyn PriorityList>,
    rule_cache: Arc<RuleCache>,
    event_log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    id_locks: KeyedLocks<ExperimentId>,
    create_locks: KeyedLocks<(ApplicationName, ExperimentLabel)>,
}

impl std::fmt::Debug for ExperimentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentService").finish_non_exhaustive()
    }
}

impl ExperimentService {
    /// Creates a service over the given stores and collaborators.
    ///
    /// Defaults: an empty in-memory priority index and rule cache, the
    /// tracing event log, and the system clock. Use the `with_*` builders
    /// to swap any of them.
    #[must_use]
    pub fn new(
        primary: Arc<dyn ExperimentStore>,
        secondary: Arc<dyn ExperimentStore>,
        buckets: Arc<dyn Buckets>,
        pages: Arc<dyn Pages>,
    ) -> Self {
        Self {
            primary,
            secondary,
            buckets,
            pages,
            priorities: Arc::new(MemoryPriorityIndex::new()),
            rule_cache: Arc::new(RuleCache::new()),
            event_log: Arc::new(TracingEventLog),
            clock: Arc::new(SystemClock),
            id_locks: KeyedLocks::new(),
            create_locks: KeyedLocks::new(),
        }
    }

    /// Replaces the priority list implementation.
    #[must_use]
    pub fn with_priorities(mut self, priorities: Arc<dyn PriorityList>) -> Self {
        self.priorities = priorities;
        self
    }

    /// Replaces the event log sink.
    #[must_use]
    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = event_log;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the priority list.
    #[must_use]
    pub fn priorities(&self) -> &Arc<dyn PriorityList> {
        &self.priorities
    }

    /// Returns the rule cache.
    #[must_use]
    pub fn rule_cache(&self) -> &Arc<RuleCache> {
        &self.rule_cache
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Lists all non-deleted experiments.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary store fails.
    pub async fn list(&self) -> Result<Vec<Experiment>> {
        Ok(self.primary.get_experiments().await?)
    }

    /// Lists all non-deleted experiments of one application.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary store fails.
    pub async fn list_for_application(
        &self,
        application: &ApplicationName,
    ) -> Result<Vec<Experiment>> {
        Ok(self
            .primary
            .get_experiments_for_application(application)
            .await?)
    }

    /// Lists the applications with at least one non-deleted experiment.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary store fails.
    pub async fn list_applications(&self) -> Result<Vec<ApplicationName>> {
        Ok(self.primary.get_applications_list().await?)
    }

    /// Fetches an experiment by id. Deleted experiments read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary store fails.
    pub async fn get(&self, id: ExperimentId) -> Result<Option<Experiment>> {
        Ok(self.primary.get_experiment(id).await?)
    }

    /// Fetches an experiment by (application, label). Deleted experiments
    /// read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary store fails.
    pub async fn get_by_label(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> Result<Option<Experiment>> {
        Ok(self
            .primary
            .get_experiment_by_label(application, label)
            .await?)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Creates an experiment.
    ///
    /// Orchestration order: validate → primary row (mints the id and
    /// enforces label uniqueness) → priority list → secondary row → primary
    /// index tables → creation event. The priority list is written before
    /// the secondary store so any discovery by other components sees the
    /// experiment as already ordered; the index tables go last because they
    /// depend on both rows existing. On failure every committed step is
    /// compensated in reverse order and the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns a validation, rule-parse, conflict or repository error. When
    /// an error is returned the observable state equals the pre-call state.
    pub async fn create(&self, new: NewExperiment, user: &UserInfo) -> Result<ExperimentId> {
        let _guard = self
            .create_locks
            .acquire((new.application_name.clone(), new.label.clone()))
            .await;

        validate::validate_new_experiment(&new)?;
        // A malformed rule must never touch a store.
        if !new.rule.is_empty() {
            rule::compile(&new.rule)?;
        }

        let experiment = new.into_experiment(self.clock.now());
        let application = experiment.application_name.clone();

        let id = self.primary.create_experiment(&experiment).await?;

        if let Err(error) = self.priorities.append(&application, id).await {
            self.compensate("primary.delete", self.primary.delete_experiment(id))
                .await;
            return Err(error.into());
        }

        if let Err(error) = self.secondary.create_experiment(&experiment).await {
            self.compensate("priorities.remove", self.priorities.remove(&application, id))
                .await;
            self.compensate("primary.delete", self.primary.delete_experiment(id))
                .await;
            return Err(error.into());
        }

        if let Err(error) = self
            .primary
            .create_indices_for_new_experiment(&experiment)
            .await
        {
            self.compensate("priorities.remove", self.priorities.remove(&application, id))
                .await;
            self.compensate("primary.delete", self.primary.delete_experiment(id))
                .await;
            self.compensate("secondary.delete", self.secondary.delete_experiment(id))
                .await;
            return Err(error.into());
        }

        self.event_log.post(ExperimentEvent::Created {
            user: user.clone(),
            experiment,
        });

        tracing::info!(experiment = %id, application = %application, "created experiment");
        Ok(id)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Applies a partial update to an experiment.
    ///
    /// Every attribute of `patch` is either unset (no change requested) or
    /// a concrete new value; setting an attribute to its current value is
    /// not a change. A patch that changes nothing returns the current
    /// experiment untouched.
    ///
    /// After a transition to DELETED the experiment is invisible to reads;
    /// the returned value is the caller's tombstone view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the id is absent or deleted, a
    /// validation / state-transition / rule-parse error when the patch is
    /// illegal for the current state, or a repository error. When the
    /// secondary store fails the primary is reverted before the error is
    /// returned.
    #[allow(clippy::too_many_lines)]
    pub async fn update(
        &self,
        id: ExperimentId,
        patch: ExperimentPatch,
        user: &UserInfo,
    ) -> Result<Experiment> {
        let _guard = self.id_locks.acquire(id).await;

        let current = self
            .primary
            .get_experiment(id)
            .await?
            .ok_or(Error::NotFound { id })?;

        let desired_transition = patch.state.filter(|s| *s != current.state);
        if let Some(desired) = desired_transition {
            validate::validate_state_transition(current.state, desired)?;
            // Going live requires a sane bucket allocation.
            if current.state == State::Draft && desired == State::Running {
                let bucket_list = self.buckets.bucket_list(id).await?;
                validate::validate_experiment_buckets(&bucket_list)?;
            }
        }

        validate::check_terminated_update(&current, &patch)?;
        validate::check_active_update(&current, &patch)?;
        let now = self.clock.now();
        validate::check_time_update(&current, &patch, now)?;

        let PatchOutcome {
            mut updated,
            changes,
            dirty,
        } = patch.apply_to(&current);
        if !dirty {
            return Ok(current);
        }

        validate::validate_experiment(&updated)?;

        let rule_changed = updated.rule != current.rule;
        let application_changed = updated.application_name != current.application_name;

        // Compile before touching any store; a parse failure is validation.
        let compiled = if rule_changed && !updated.rule.is_empty() {
            Some(Arc::new(rule::compile(&updated.rule)?))
        } else {
            None
        };

        updated.modification_time = now;

        let stored = self.primary.update_experiment(&updated).await?;

        if let Err(error) = self.secondary.update_experiment(&updated).await {
            let revert = async {
                self.primary.update_experiment(&current).await.map(|_| ())
            };
            self.compensate("primary.revert", revert).await;
            return Err(error.into());
        }

        if application_changed {
            // The old (application, id) ordering entry is obsolete.
            self.priorities.remove(&current.application_name, id).await?;
            self.priorities.append(&stored.application_name, id).await?;
        }

        if rule_changed {
            match &compiled {
                Some(compiled_rule) => {
                    self.rule_cache.set(id, Arc::clone(compiled_rule));
                    tracing::debug!(
                        experiment = %id,
                        rule = %stored.rule,
                        "segmentation rule updated"
                    );
                }
                None => {
                    self.rule_cache.clear(id);
                    tracing::debug!(experiment = %id, "segmentation rule cleared");
                }
            }
        }

        // DRAFT mutations are not audited.
        if stored.state != State::Draft {
            self.primary.log_experiment_changes(id, &changes).await?;
            for change in &changes {
                self.event_log.post(ExperimentEvent::Changed {
                    user: user.clone(),
                    experiment: stored.clone(),
                    attribute_name: change.attribute_name.clone(),
                    old_value: change.old_value.clone(),
                    new_value: change.new_value.clone(),
                });
            }
        }

        // A transition out of the live set stops the experiment from being
        // evaluated anywhere: drop it from the ordering and erase its page
        // bindings. Later edits of an already-terminated experiment (its
        // description) skip this cleanup.
        if matches!(
            desired_transition,
            Some(State::Terminated | State::Deleted)
        ) {
            self.priorities.remove(&stored.application_name, id).await?;
            self.pages
                .erase_page_data(&stored.application_name, id, user)
                .await?;
        }

        tracing::info!(
            experiment = %id,
            state = %stored.state,
            changes = changes.len(),
            "updated experiment"
        );
        Ok(stored)
    }

    /// Runs one compensation step, logging (but swallowing) its failure so
    /// it never replaces the original error.
    async fn compensate<F>(&self, step: &'static str, outcome: F)
    where
        F: std::future::Future<Output = std::result::Result<(), RepositoryError>>,
    {
        if let Err(error) = outcome.await {
            tracing::error!(
                %error,
                step,
                "compensation step failed; stores may need manual reconciliation"
            );
        }
    }
}
