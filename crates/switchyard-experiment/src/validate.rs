//! Pure validation functions for experiments, buckets and state
//! transitions.
//!
//! Everything here is stateless and side-effect free: validation failures
//! are reported before any store is touched. State-dependent update rules
//! (what may change in TERMINATED, RUNNING or PAUSED) live here too so the
//! service orchestration stays a plain sequence of steps.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::buckets::BucketList;
use crate::error::{Error, Result};
use crate::experiment::{Experiment, ExperimentPatch, NewExperiment, State};

/// Tolerance when checking that bucket allocations sum to 1.
pub const ALLOCATION_EPSILON: f64 = 1e-9;

/// Validates a creation request.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the sampling percentage is outside
/// [0, 1], the times are inverted, or the personalization / rapid settings
/// are incoherent.
pub fn validate_new_experiment(new: &NewExperiment) -> Result<()> {
    validate_fields(
        new.sampling_percent,
        new.start_time,
        new.end_time,
        new.is_personalization_enabled,
        new.model_name.as_deref(),
        new.is_rapid_experiment,
        new.user_cap,
    )
}

/// Validates an updated experiment before it is written to either store.
///
/// Same field-level checks as creation, applied to the overlaid result.
///
/// # Errors
///
/// Returns [`Error::Validation`] when any field-level check fails.
pub fn validate_experiment(experiment: &Experiment) -> Result<()> {
    validate_fields(
        experiment.sampling_percent,
        experiment.start_time,
        experiment.end_time,
        experiment.is_personalization_enabled,
        experiment.model_name.as_deref(),
        experiment.is_rapid_experiment,
        experiment.user_cap,
    )
}

fn validate_fields(
    sampling_percent: f64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    is_personalization_enabled: bool,
    model_name: Option<&str>,
    is_rapid_experiment: bool,
    user_cap: Option<u32>,
) -> Result<()> {
    if !(0.0..=1.0).contains(&sampling_percent) || sampling_percent.is_nan() {
        return Err(Error::validation(format!(
            "sampling percent {sampling_percent} must be between 0 and 1"
        )));
    }
    if start_time > end_time {
        return Err(Error::validation(format!(
            "start time {start_time} must not be after end time {end_time}"
        )));
    }
    if is_personalization_enabled && model_name.unwrap_or_default().is_empty() {
        return Err(Error::validation(
            "personalization requires a model name".to_string(),
        ));
    }
    if is_rapid_experiment && user_cap.map_or(true, |cap| cap == 0) {
        return Err(Error::validation(
            "a rapid experiment requires a user cap of at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates a state transition against the lifecycle graph.
///
/// # Errors
///
/// Returns [`Error::InvalidStateTransition`] when `from → to` is not an
/// edge of the graph.
pub fn validate_state_transition(from: State, to: State) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidStateTransition { from, to })
    }
}

/// Sanity-checks the bucket configuration before an experiment goes live.
///
/// # Errors
///
/// Returns [`Error::Validation`] unless there is at least one bucket,
/// labels are unique, exactly one bucket is the control, and allocations
/// sum to 1 (± [`ALLOCATION_EPSILON`]).
pub fn validate_experiment_buckets(buckets: &BucketList) -> Result<()> {
    if buckets.is_empty() {
        return Err(Error::validation(
            "an experiment needs at least one bucket to run".to_string(),
        ));
    }

    let mut labels = HashSet::new();
    for bucket in &buckets.buckets {
        if !labels.insert(bucket.label.as_str()) {
            return Err(Error::validation(format!(
                "bucket label '{}' is not unique",
                bucket.label
            )));
        }
    }

    let controls = buckets.buckets.iter().filter(|b| b.is_control).count();
    if controls != 1 {
        return Err(Error::validation(format!(
            "expected exactly one control bucket, found {controls}"
        )));
    }

    let total: f64 = buckets.buckets.iter().map(|b| b.allocation).sum();
    if (total - 1.0).abs() > ALLOCATION_EPSILON {
        return Err(Error::validation(format!(
            "bucket allocations sum to {total}, expected 1"
        )));
    }

    Ok(())
}

/// Rejects updates to anything but the description of a TERMINATED
/// experiment (the state itself may still move to DELETED via the graph).
///
/// # Errors
///
/// Returns [`Error::Validation`] when the patch sets any other field to a
/// different value.
pub fn check_terminated_update(current: &Experiment, patch: &ExperimentPatch) -> Result<()> {
    if current.state != State::Terminated {
        return Ok(());
    }

    let blocked: [(&str, bool); 11] = [
        (
            "application name",
            patch
                .application_name
                .as_ref()
                .is_some_and(|v| *v != current.application_name),
        ),
        (
            "label",
            patch.label.as_ref().is_some_and(|v| *v != current.label),
        ),
        (
            "start time",
            patch.start_time.is_some_and(|v| v != current.start_time),
        ),
        (
            "end time",
            patch.end_time.is_some_and(|v| v != current.end_time),
        ),
        (
            "sampling percent",
            patch
                .sampling_percent
                .is_some_and(|v| (v - current.sampling_percent).abs() > f64::EPSILON),
        ),
        ("rule", patch.rule.as_ref().is_some_and(|v| *v != current.rule)),
        (
            "personalization",
            patch
                .is_personalization_enabled
                .is_some_and(|v| v != current.is_personalization_enabled),
        ),
        (
            "model name",
            patch
                .model_name
                .as_ref()
                .is_some_and(|v| *v != current.model_name),
        ),
        (
            "model version",
            patch
                .model_version
                .as_ref()
                .is_some_and(|v| *v != current.model_version),
        ),
        (
            "rapid experiment flag",
            patch
                .is_rapid_experiment
                .is_some_and(|v| v != current.is_rapid_experiment),
        ),
        (
            "user cap",
            patch.user_cap.is_some_and(|v| v != current.user_cap),
        ),
    ];

    for (field, changed) in blocked {
        if changed {
            return Err(Error::validation(format!(
                "cannot change {field} when the experiment is in TERMINATED state"
            )));
        }
    }

    Ok(())
}

/// Rejects application-name and label changes for live experiments.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the experiment is RUNNING or PAUSED
/// and the patch changes the application name or label.
pub fn check_active_update(current: &Experiment, patch: &ExperimentPatch) -> Result<()> {
    if !current.state.is_active() {
        return Ok(());
    }

    if patch
        .application_name
        .as_ref()
        .is_some_and(|v| *v != current.application_name)
    {
        return Err(Error::validation(
            "cannot change the application name once the experiment has left DRAFT".to_string(),
        ));
    }
    if patch.label.as_ref().is_some_and(|v| *v != current.label) {
        return Err(Error::validation(
            "cannot change the label once the experiment has left DRAFT".to_string(),
        ));
    }
    Ok(())
}

/// Enforces the time-edit rules on a patch.
///
/// A changed boundary may never be moved into the past. For live
/// experiments a boundary that has itself already passed may no longer be
/// edited. TERMINATED experiments are handled by
/// [`check_terminated_update`] and skipped here.
///
/// # Errors
///
/// Returns [`Error::Validation`] when a time edit breaks these rules.
pub fn check_time_update(
    current: &Experiment,
    patch: &ExperimentPatch,
    now: DateTime<Utc>,
) -> Result<()> {
    if current.state == State::Terminated {
        return Ok(());
    }

    if let Some(start_time) = patch.start_time.filter(|v| *v != current.start_time) {
        if start_time < now {
            return Err(Error::validation(format!(
                "cannot set the experiment start time to {start_time}, which is in the past"
            )));
        }
        if current.state.is_active() && current.start_time < now {
            return Err(Error::validation(
                "cannot update a start time that has already passed".to_string(),
            ));
        }
    }

    if let Some(end_time) = patch.end_time.filter(|v| *v != current.end_time) {
        if end_time < now {
            return Err(Error::validation(format!(
                "cannot set the experiment end time to {end_time}, which is in the past"
            )));
        }
        if current.state.is_active() && current.end_time < now {
            return Err(Error::validation(
                "cannot update an end time that has already passed".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use switchyard_core::{ApplicationName, ExperimentLabel};

    use crate::buckets::Bucket;

    fn times() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap(),
        )
    }

    fn request() -> NewExperiment {
        let (start, end) = times();
        NewExperiment::new(
            ApplicationName::new("shop").unwrap(),
            ExperimentLabel::new("cart-cta").unwrap(),
            start,
            end,
            0.5,
        )
    }

    fn draft() -> Experiment {
        let (start, _) = times();
        request().into_experiment(start)
    }

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_new_experiment(&request()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_sampling() {
        let mut new = request();
        new.sampling_percent = 1.5;
        assert!(matches!(
            validate_new_experiment(&new),
            Err(Error::Validation { .. })
        ));

        new.sampling_percent = -0.1;
        assert!(validate_new_experiment(&new).is_err());

        new.sampling_percent = f64::NAN;
        assert!(validate_new_experiment(&new).is_err());
    }

    #[test]
    fn rejects_inverted_times() {
        let mut new = request();
        std::mem::swap(&mut new.start_time, &mut new.end_time);
        assert!(validate_new_experiment(&new).is_err());

        // Equal boundaries are legal: a zero-length window is not inverted.
        new.end_time = new.start_time;
        assert!(validate_new_experiment(&new).is_ok());
    }

    #[test]
    fn personalization_requires_a_model_name() {
        let mut new = request();
        new.is_personalization_enabled = true;
        assert!(validate_new_experiment(&new).is_err());

        new.model_name = Some("ranker-v3".to_string());
        assert!(validate_new_experiment(&new).is_ok());
    }

    #[test]
    fn rapid_experiments_require_a_positive_user_cap() {
        let mut new = request();
        new.is_rapid_experiment = true;
        assert!(validate_new_experiment(&new).is_err());

        new.user_cap = Some(0);
        assert!(validate_new_experiment(&new).is_err());

        new.user_cap = Some(5000);
        assert!(validate_new_experiment(&new).is_ok());
    }

    #[test]
    fn transition_validation_mirrors_the_graph() {
        assert!(validate_state_transition(State::Draft, State::Running).is_ok());
        assert!(validate_state_transition(State::Terminated, State::Deleted).is_ok());

        let error = validate_state_transition(State::Draft, State::Paused).unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidStateTransition {
                from: State::Draft,
                to: State::Paused,
            }
        ));
    }

    #[test]
    fn buckets_must_sum_to_one() {
        let short = BucketList::new(vec![
            Bucket::control("control", 0.5),
            Bucket::new("blue", 0.4),
        ]);
        assert!(validate_experiment_buckets(&short).is_err());

        let exact = BucketList::new(vec![
            Bucket::control("control", 0.5),
            Bucket::new("blue", 0.5),
        ]);
        assert!(validate_experiment_buckets(&exact).is_ok());

        // A third of a third of a third: floating error within tolerance.
        let thirds = BucketList::new(vec![
            Bucket::control("control", 1.0 / 3.0),
            Bucket::new("blue", 1.0 / 3.0),
            Bucket::new("green", 1.0 / 3.0),
        ]);
        assert!(validate_experiment_buckets(&thirds).is_ok());
    }

    #[test]
    fn buckets_need_unique_labels_and_one_control() {
        assert!(validate_experiment_buckets(&BucketList::default()).is_err());

        let duplicate = BucketList::new(vec![
            Bucket::control("same", 0.5),
            Bucket::new("same", 0.5),
        ]);
        assert!(validate_experiment_buckets(&duplicate).is_err());

        let no_control =
            BucketList::new(vec![Bucket::new("blue", 0.5), Bucket::new("green", 0.5)]);
        assert!(validate_experiment_buckets(&no_control).is_err());

        let two_controls = BucketList::new(vec![
            Bucket::control("a", 0.5),
            Bucket::control("b", 0.5),
        ]);
        assert!(validate_experiment_buckets(&two_controls).is_err());
    }

    #[test]
    fn terminated_blocks_everything_but_description() {
        let mut current = draft();
        current.state = State::Terminated;

        let blocked = ExperimentPatch {
            sampling_percent: Some(0.9),
            ..ExperimentPatch::default()
        };
        assert!(check_terminated_update(&current, &blocked).is_err());

        let rule_change = ExperimentPatch {
            rule: Some("country = CA".to_string()),
            ..ExperimentPatch::default()
        };
        assert!(check_terminated_update(&current, &rule_change).is_err());

        let description_only = ExperimentPatch {
            description: Some("archived".to_string()),
            ..ExperimentPatch::default()
        };
        assert!(check_terminated_update(&current, &description_only).is_ok());

        // Setting a field to its current value requests no change.
        let echo = ExperimentPatch {
            sampling_percent: Some(current.sampling_percent),
            ..ExperimentPatch::default()
        };
        assert!(check_terminated_update(&current, &echo).is_ok());
    }

    #[test]
    fn active_states_lock_application_and_label() {
        let mut current = draft();
        current.state = State::Running;

        let rename = ExperimentPatch {
            label: Some(ExperimentLabel::new("new-label").unwrap()),
            ..ExperimentPatch::default()
        };
        assert!(check_active_update(&current, &rename).is_err());

        let rehome = ExperimentPatch {
            application_name: Some(ApplicationName::new("storefront").unwrap()),
            ..ExperimentPatch::default()
        };
        assert!(check_active_update(&current, &rehome).is_err());

        current.state = State::Paused;
        assert!(check_active_update(&current, &rename).is_err());

        current.state = State::Draft;
        assert!(check_active_update(&current, &rename).is_ok());
    }

    #[test]
    fn time_edits_cannot_point_into_the_past() {
        let current = draft();
        let now = Utc.with_ymd_and_hms(2098, 12, 15, 0, 0, 0).unwrap();

        let past = ExperimentPatch {
            start_time: Some(Utc.with_ymd_and_hms(2098, 1, 1, 0, 0, 0).unwrap()),
            ..ExperimentPatch::default()
        };
        assert!(check_time_update(&current, &past, now).is_err());

        let future = ExperimentPatch {
            start_time: Some(Utc.with_ymd_and_hms(2099, 2, 1, 0, 0, 0).unwrap()),
            ..ExperimentPatch::default()
        };
        assert!(check_time_update(&current, &future, now).is_ok());
    }

    #[test]
    fn passed_boundaries_of_live_experiments_are_frozen() {
        let mut current = draft();
        current.state = State::Running;

        // The experiment started in 2099; by 2099-03 the start has passed.
        let now = Utc.with_ymd_and_hms(2099, 3, 1, 0, 0, 0).unwrap();
        let push_start = ExperimentPatch {
            start_time: Some(Utc.with_ymd_and_hms(2099, 4, 1, 0, 0, 0).unwrap()),
            ..ExperimentPatch::default()
        };
        assert!(check_time_update(&current, &push_start, now).is_err());

        // The end has not passed yet and may still move (to the future).
        let push_end = ExperimentPatch {
            end_time: Some(Utc.with_ymd_and_hms(2099, 8, 1, 0, 0, 0).unwrap()),
            ..ExperimentPatch::default()
        };
        assert!(check_time_update(&current, &push_end, now).is_ok());

        // In DRAFT the passed-boundary rule does not apply.
        current.state = State::Draft;
        assert!(check_time_update(&current, &push_start, now).is_ok());
    }
}
