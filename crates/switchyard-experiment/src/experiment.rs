//! The experiment domain model.
//!
//! [`Experiment`] is the central entity: an A/B test bound to an application
//! and label, moving through the lifecycle graph
//! `DRAFT → RUNNING ⇄ PAUSED → TERMINATED → DELETED` (with `DRAFT → DELETED`
//! as a shortcut). Mutations arrive as an [`ExperimentPatch`], a partial
//! experiment where every attribute is either unset (no change requested) or
//! a concrete value, and are folded onto the current row by
//! [`ExperimentPatch::apply_to`], which also produces the attribute-level
//! audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use switchyard_core::{ApplicationName, ExperimentId, ExperimentLabel};

/// Lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Being configured; not visible to assignment traffic.
    Draft,
    /// Live and assigning users.
    Running,
    /// Live but temporarily not assigning new users.
    Paused,
    /// Finished; only the description may still be edited.
    Terminated,
    /// Logically destroyed; invisible to all reads. Terminal.
    Deleted,
}

impl State {
    /// Returns true when `self → to` is an edge of the lifecycle graph.
    ///
    /// Self-transitions are not edges: a patch carrying the current state is
    /// treated as "no change requested", never as a transition.
    #[must_use]
    pub fn can_transition_to(self, to: State) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Running)
                | (Self::Draft, Self::Deleted)
                | (Self::Running, Self::Paused)
                | (Self::Paused, Self::Running)
                | (Self::Running, Self::Terminated)
                | (Self::Paused, Self::Terminated)
                | (Self::Terminated, Self::Deleted)
        )
    }

    /// Returns true for the live states RUNNING and PAUSED.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Canonical uppercase name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Terminated => "TERMINATED",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured A/B test bound to an application and label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// Opaque, unique, immutable after creation.
    pub id: ExperimentId,

    /// Namespace key; immutable once the state leaves DRAFT.
    pub application_name: ApplicationName,

    /// Human-readable id, unique per application among non-deleted
    /// experiments; immutable once the state leaves DRAFT.
    pub label: ExperimentLabel,

    /// Free text; always mutable.
    pub description: String,

    /// Lifecycle state.
    pub state: State,

    /// When the experiment opens for assignment. Never after `end_time`.
    pub start_time: DateTime<Utc>,

    /// When the experiment closes.
    pub end_time: DateTime<Utc>,

    /// Fraction of eligible traffic sampled into the experiment, in [0, 1].
    pub sampling_percent: f64,

    /// Segmentation rule expression; empty when every user is eligible.
    pub rule: String,

    /// Whether assignments are steered by a personalization model.
    pub is_personalization_enabled: bool,

    /// Personalization model name; required when personalization is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Personalization model version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,

    /// Whether the experiment terminates itself once `user_cap` is reached.
    pub is_rapid_experiment: bool,

    /// Maximum number of users for a rapid experiment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_cap: Option<u32>,

    /// Set by the service at creation; write-once.
    pub creation_time: DateTime<Utc>,

    /// Set by the service on every persisted mutation; never by callers.
    pub modification_time: DateTime<Utc>,
}

/// A request to create an experiment.
///
/// The id is minted up front so compensation paths can refer to it even
/// when a downstream step fails. New experiments always start in DRAFT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExperiment {
    /// Pre-assigned id of the experiment to create.
    pub id: ExperimentId,
    /// Namespace the experiment belongs to.
    pub application_name: ApplicationName,
    /// Label, unique per application.
    pub label: ExperimentLabel,
    /// Free-text description.
    pub description: String,
    /// Assignment window start.
    pub start_time: DateTime<Utc>,
    /// Assignment window end.
    pub end_time: DateTime<Utc>,
    /// Sampling fraction in [0, 1].
    pub sampling_percent: f64,
    /// Segmentation rule expression; empty for none.
    pub rule: String,
    /// Personalization toggle.
    pub is_personalization_enabled: bool,
    /// Personalization model name.
    pub model_name: Option<String>,
    /// Personalization model version.
    pub model_version: Option<String>,
    /// Rapid-termination toggle.
    pub is_rapid_experiment: bool,
    /// User cap for rapid experiments.
    pub user_cap: Option<u32>,
}

impl NewExperiment {
    /// Creates a request with a freshly minted id and the given required
    /// fields; everything else defaults to off/empty.
    #[must_use]
    pub fn new(
        application_name: ApplicationName,
        label: ExperimentLabel,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        sampling_percent: f64,
    ) -> Self {
        Self {
            id: ExperimentId::generate(),
            application_name,
            label,
            description: String::new(),
            start_time,
            end_time,
            sampling_percent,
            rule: String::new(),
            is_personalization_enabled: false,
            model_name: None,
            model_version: None,
            is_rapid_experiment: false,
            user_cap: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the segmentation rule expression.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = rule.into();
        self
    }

    /// Enables personalization with the given model.
    #[must_use]
    pub fn with_personalization(
        mut self,
        model_name: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Self {
        self.is_personalization_enabled = true;
        self.model_name = Some(model_name.into());
        self.model_version = Some(model_version.into());
        self
    }

    /// Makes this a rapid experiment with the given user cap.
    #[must_use]
    pub fn with_user_cap(mut self, user_cap: u32) -> Self {
        self.is_rapid_experiment = true;
        self.user_cap = Some(user_cap);
        self
    }

    /// Materializes the DRAFT experiment this request describes.
    ///
    /// `now` becomes both the creation and modification time; both fields
    /// are service-owned from here on.
    #[must_use]
    pub fn into_experiment(self, now: DateTime<Utc>) -> Experiment {
        Experiment {
            id: self.id,
            application_name: self.application_name,
            label: self.label,
            description: self.description,
            state: State::Draft,
            start_time: self.start_time,
            end_time: self.end_time,
            sampling_percent: self.sampling_percent,
            rule: self.rule,
            is_personalization_enabled: self.is_personalization_enabled,
            model_name: self.model_name,
            model_version: self.model_version,
            is_rapid_experiment: self.is_rapid_experiment,
            user_cap: self.user_cap,
            creation_time: now,
            modification_time: now,
        }
    }
}

/// An attribute-level change record persisted for non-DRAFT updates.
///
/// Values are the string representation of the typed field: booleans
/// lowercase, timestamps RFC 3339, sampling percentages as decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Name of the changed attribute.
    pub attribute_name: String,
    /// String form of the value before the update.
    pub old_value: String,
    /// String form of the value after the update.
    pub new_value: String,
}

impl AuditEntry {
    fn new(attribute_name: &str, old_value: String, new_value: String) -> Self {
        Self {
            attribute_name: attribute_name.to_string(),
            old_value,
            new_value,
        }
    }
}

/// A partial experiment: every attribute is either unset (no change
/// requested) or a concrete new value.
///
/// `model_name`, `model_version` and `user_cap` use a double `Option` so a
/// patch can distinguish "leave alone" (`None`) from "clear the field"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentPatch {
    /// Desired lifecycle state.
    pub state: Option<State>,
    /// New application name (DRAFT only).
    pub application_name: Option<ApplicationName>,
    /// New label (DRAFT only).
    pub label: Option<ExperimentLabel>,
    /// New description.
    pub description: Option<String>,
    /// New assignment window start.
    pub start_time: Option<DateTime<Utc>>,
    /// New assignment window end.
    pub end_time: Option<DateTime<Utc>>,
    /// New sampling fraction.
    pub sampling_percent: Option<f64>,
    /// New segmentation rule; an empty string clears the rule.
    pub rule: Option<String>,
    /// New personalization toggle.
    pub is_personalization_enabled: Option<bool>,
    /// New model name (`Some(None)` clears it).
    pub model_name: Option<Option<String>>,
    /// New model version (`Some(None)` clears it).
    pub model_version: Option<Option<String>>,
    /// New rapid-experiment toggle.
    pub is_rapid_experiment: Option<bool>,
    /// New user cap (`Some(None)` clears it).
    pub user_cap: Option<Option<u32>>,
}

/// The result of folding a patch onto the current experiment.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// The current experiment overlaid with every set-and-different field.
    pub updated: Experiment,
    /// Audit records for the changed attributes. Application name and label
    /// are excluded: they can only change in DRAFT, and DRAFT mutations are
    /// not audited.
    pub changes: Vec<AuditEntry>,
    /// True when any field (audited or not) actually changed.
    pub dirty: bool,
}

impl ExperimentPatch {
    /// Convenience patch that only requests a state transition.
    #[must_use]
    pub fn with_state(state: State) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Folds this patch onto `current`, collecting the audit change list.
    ///
    /// A field that is set but equal to the current value is not a change.
    /// The returned experiment keeps the current modification time; the
    /// service stamps a new one only when the outcome is dirty.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn apply_to(&self, current: &Experiment) -> PatchOutcome {
        let mut updated = current.clone();
        let mut changes = Vec::new();
        let mut dirty = false;

        if let Some(state) = self.state {
            if state != current.state {
                changes.push(AuditEntry::new(
                    "state",
                    current.state.to_string(),
                    state.to_string(),
                ));
                updated.state = state;
                dirty = true;
            }
        }
        if let Some(description) = &self.description {
            if *description != current.description {
                changes.push(AuditEntry::new(
                    "description",
                    current.description.clone(),
                    description.clone(),
                ));
                updated.description = description.clone();
                dirty = true;
            }
        }
        if let Some(sampling_percent) = self.sampling_percent {
            if (sampling_percent - current.sampling_percent).abs() > f64::EPSILON {
                changes.push(AuditEntry::new(
                    "sampling_percent",
                    current.sampling_percent.to_string(),
                    sampling_percent.to_string(),
                ));
                updated.sampling_percent = sampling_percent;
                dirty = true;
            }
        }
        if let Some(start_time) = self.start_time {
            if start_time != current.start_time {
                changes.push(AuditEntry::new(
                    "start_time",
                    current.start_time.to_rfc3339(),
                    start_time.to_rfc3339(),
                ));
                updated.start_time = start_time;
                dirty = true;
            }
        }
        if let Some(end_time) = self.end_time {
            if end_time != current.end_time {
                changes.push(AuditEntry::new(
                    "end_time",
                    current.end_time.to_rfc3339(),
                    end_time.to_rfc3339(),
                ));
                updated.end_time = end_time;
                dirty = true;
            }
        }
        if let Some(rule) = &self.rule {
            if *rule != current.rule {
                changes.push(AuditEntry::new("rule", current.rule.clone(), rule.clone()));
                updated.rule = rule.clone();
                dirty = true;
            }
        }
        if let Some(enabled) = self.is_personalization_enabled {
            if enabled != current.is_personalization_enabled {
                changes.push(AuditEntry::new(
                    "is_personalization_enabled",
                    current.is_personalization_enabled.to_string(),
                    enabled.to_string(),
                ));
                updated.is_personalization_enabled = enabled;
                dirty = true;
            }
        }
        if let Some(model_name) = &self.model_name {
            if *model_name != current.model_name {
                changes.push(AuditEntry::new(
                    "model_name",
                    optional_text(current.model_name.as_deref()),
                    optional_text(model_name.as_deref()),
                ));
                updated.model_name = model_name.clone();
                dirty = true;
            }
        }
        if let Some(model_version) = &self.model_version {
            if *model_version != current.model_version {
                changes.push(AuditEntry::new(
                    "model_version",
                    optional_text(current.model_version.as_deref()),
                    optional_text(model_version.as_deref()),
                ));
                updated.model_version = model_version.clone();
                dirty = true;
            }
        }
        if let Some(rapid) = self.is_rapid_experiment {
            if rapid != current.is_rapid_experiment {
                changes.push(AuditEntry::new(
                    "is_rapid_experiment",
                    current.is_rapid_experiment.to_string(),
                    rapid.to_string(),
                ));
                updated.is_rapid_experiment = rapid;
                dirty = true;
            }
        }
        if let Some(user_cap) = self.user_cap {
            if user_cap != current.user_cap {
                changes.push(AuditEntry::new(
                    "user_cap",
                    optional_number(current.user_cap),
                    optional_number(user_cap),
                ));
                updated.user_cap = user_cap;
                dirty = true;
            }
        }

        // Application name and label changes are possible in DRAFT only and
        // are deliberately absent from the audit list.
        if let Some(application_name) = &self.application_name {
            if *application_name != current.application_name {
                updated.application_name = application_name.clone();
                dirty = true;
            }
        }
        if let Some(label) = &self.label {
            if *label != current.label {
                updated.label = label.clone();
                dirty = true;
            }
        }

        PatchOutcome {
            updated,
            changes,
            dirty,
        }
    }
}

fn optional_text(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn optional_number(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
