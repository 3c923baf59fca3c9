//! Domain event emission.
//!
//! The event log is an append-only, best-effort sink: posting never fails
//! the surrounding operation and is never compensated. Implementations must
//! be non-blocking from the caller's perspective; sinks that write to slow
//! storage should buffer internally.

use serde::{Deserialize, Serialize};

use switchyard_core::UserInfo;

use crate::experiment::Experiment;

/// A domain event describing an externally visible experiment mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ExperimentEvent {
    /// An experiment was created.
    Created {
        /// Who created it.
        user: UserInfo,
        /// The experiment as created.
        experiment: Experiment,
    },
    /// One attribute of an experiment changed. Emitted once per entry of
    /// the audit change list, only for experiments past DRAFT.
    Changed {
        /// Who changed it.
        user: UserInfo,
        /// The experiment after the update.
        experiment: Experiment,
        /// Name of the changed attribute.
        attribute_name: String,
        /// String form of the value before the update.
        old_value: String,
        /// String form of the value after the update.
        new_value: String,
    },
}

/// Append-only sink for domain events.
///
/// Fire-and-forget: the API is infallible by design. A sink that loses an
/// event logs the loss itself; it never propagates failure into the
/// mutation that produced the event.
pub trait EventLog: Send + Sync {
    /// Posts an event.
    fn post(&self, event: ExperimentEvent);

    /// Flushes any buffered events. Called during graceful shutdown.
    /// Default implementation is a no-op.
    fn flush(&self) {}
}

/// Event log that emits events as structured logs.
///
/// This is the default sink: events land in the log stream at INFO level
/// with the `events` target.
#[derive(Debug, Default, Clone)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn post(&self, event: ExperimentEvent) {
        match &event {
            ExperimentEvent::Created { user, experiment } => {
                tracing::info!(
                    target: "events",
                    user = %user,
                    experiment = %experiment.id,
                    application = %experiment.application_name,
                    label = %experiment.label,
                    "experiment_created"
                );
            }
            ExperimentEvent::Changed {
                user,
                experiment,
                attribute_name,
                old_value,
                new_value,
            } => {
                tracing::info!(
                    target: "events",
                    user = %user,
                    experiment = %experiment.id,
                    attribute = %attribute_name,
                    old = %old_value,
                    new = %new_value,
                    "experiment_changed"
                );
            }
        }
    }
}

/// Event log that captures events for assertions in tests.
#[derive(Debug, Default)]
pub struct TestEventLog {
    events: std::sync::Mutex<Vec<ExperimentEvent>>,
}

impl TestEventLog {
    /// Creates a new empty test log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<ExperimentEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Returns the number of captured events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true if no events have been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the captured creation events.
    #[must_use]
    pub fn created(&self) -> Vec<ExperimentEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, ExperimentEvent::Created { .. }))
            .collect()
    }

    /// Returns the captured change events.
    #[must_use]
    pub fn changed(&self) -> Vec<ExperimentEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, ExperimentEvent::Changed { .. }))
            .collect()
    }

    /// Clears all captured events.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl EventLog for TestEventLog {
    fn post(&self, event: ExperimentEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use switchyard_core::{ApplicationName, ExperimentLabel};

    use crate::experiment::NewExperiment;

    fn experiment() -> Experiment {
        let start = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap();
        NewExperiment::new(
            ApplicationName::new("shop").unwrap(),
            ExperimentLabel::new("cart-cta").unwrap(),
            start,
            end,
            0.5,
        )
        .into_experiment(start)
    }

    #[test]
    fn test_log_captures_events() {
        let log = TestEventLog::new();
        log.post(ExperimentEvent::Created {
            user: UserInfo::from_username("admin"),
            experiment: experiment(),
        });

        assert_eq!(log.len(), 1);
        assert_eq!(log.created().len(), 1);
        assert!(log.changed().is_empty());
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = ExperimentEvent::Changed {
            user: UserInfo::from_username("admin"),
            experiment: experiment(),
            attribute_name: "description".to_string(),
            old_value: String::new(),
            new_value: "archived".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "changed");
        assert_eq!(json["attributeName"], "description");
    }
}
