//! Lifecycle events emitted by a run, one NDJSON object each.

use serde::{Deserialize, Serialize};

use crate::core::state::SUPERVISOR_AUTHOR;
use crate::core::types::{Destination, WorkerId};

/// Prefix of the `finish` payload when the iteration bound forced termination.
pub const BOUND_REACHED_MARKER: &str = "[bound reached]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    Start {
        data: String,
    },
    Decision {
        agent: String,
        decision: Destination,
        reasoning: String,
    },
    Action {
        agent: WorkerId,
        output: String,
    },
    Finish {
        data: String,
    },
    Error {
        error: String,
    },
}

impl RunEvent {
    pub fn start(query: &str) -> Self {
        RunEvent::Start {
            data: format!("Workflow started: {query}"),
        }
    }

    pub fn decision(destination: Destination, reasoning: impl Into<String>) -> Self {
        RunEvent::Decision {
            agent: SUPERVISOR_AUTHOR.to_string(),
            decision: destination,
            reasoning: reasoning.into(),
        }
    }

    pub fn action(worker: WorkerId, output: impl Into<String>) -> Self {
        RunEvent::Action {
            agent: worker,
            output: output.into(),
        }
    }

    pub fn finish(data: impl Into<String>) -> Self {
        RunEvent::Finish { data: data.into() }
    }

    pub fn error(error: impl Into<String>) -> Self {
        RunEvent::Error {
            error: error.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finish { .. } | RunEvent::Error { .. })
    }

    /// Single-line JSON encoding used on the wire.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Check a complete event sequence against the ordering contract.
///
/// Returns one message per violation; an empty vector means the sequence is
/// well-formed: exactly one `start` first, exactly one terminal event last,
/// and every non-Finish decision followed by the matching worker's action
/// before the next decision.
pub fn check_event_sequence(events: &[RunEvent]) -> Vec<String> {
    let mut violations = Vec::new();

    match events.first() {
        Some(RunEvent::Start { .. }) => {}
        Some(_) => violations.push("first event is not start".to_string()),
        None => {
            violations.push("event sequence is empty".to_string());
            return violations;
        }
    }
    if !events.last().is_some_and(RunEvent::is_terminal) {
        violations.push("last event is not terminal".to_string());
    }

    let mut pending: Option<WorkerId> = None;
    let mut finished = false;
    for (idx, event) in events.iter().enumerate() {
        if idx > 0 && matches!(event, RunEvent::Start { .. }) {
            violations.push(format!("event {idx}: duplicate start"));
        }
        if event.is_terminal() && idx + 1 != events.len() {
            violations.push(format!("event {idx}: terminal event before end of stream"));
        }
        match event {
            RunEvent::Decision { decision, .. } => {
                if let Some(worker) = pending {
                    violations.push(format!(
                        "event {idx}: decision before action of {worker}"
                    ));
                }
                if finished {
                    violations.push(format!("event {idx}: decision after Finish"));
                }
                pending = decision.worker();
                finished = *decision == Destination::Finish;
            }
            RunEvent::Action { agent, .. } => match pending.take() {
                Some(expected) if expected == *agent => {}
                Some(expected) => violations.push(format!(
                    "event {idx}: action by {agent} but {expected} was chosen"
                )),
                None => violations.push(format!("event {idx}: action without decision")),
            },
            RunEvent::Finish { .. } => {
                if let Some(worker) = pending {
                    violations.push(format!(
                        "event {idx}: finish before action of {worker}"
                    ));
                }
            }
            RunEvent::Start { .. } | RunEvent::Error { .. } => {}
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_to_wire_shape() {
        let decision = RunEvent::decision(Destination::DataAnalyst, "need numbers");
        assert_eq!(
            decision.to_ndjson().expect("encode"),
            r#"{"type":"decision","agent":"Supervisor","decision":"Data_Analyst","reasoning":"need numbers"}"#
        );
        let action = RunEvent::action(WorkerId::BusinessStrategist, "STRATEGY: {}");
        assert_eq!(
            action.to_ndjson().expect("encode"),
            r#"{"type":"action","agent":"Business_Strategist","output":"STRATEGY: {}"}"#
        );
        assert_eq!(
            RunEvent::error("boom").to_ndjson().expect("encode"),
            r#"{"type":"error","error":"boom"}"#
        );
    }

    #[test]
    fn well_formed_sequence_has_no_violations() {
        let events = vec![
            RunEvent::start("q"),
            RunEvent::decision(Destination::DataAnalyst, "r"),
            RunEvent::action(WorkerId::DataAnalyst, "ANALYSIS: x"),
            RunEvent::decision(Destination::Finish, "done"),
            RunEvent::finish("ANALYSIS: x"),
        ];
        assert!(check_event_sequence(&events).is_empty());
    }

    #[test]
    fn start_then_error_is_well_formed() {
        let events = vec![RunEvent::start("q"), RunEvent::error("run cancelled")];
        assert!(check_event_sequence(&events).is_empty());
    }

    #[test]
    fn missing_action_is_reported() {
        let events = vec![
            RunEvent::start("q"),
            RunEvent::decision(Destination::DataAnalyst, "r"),
            RunEvent::decision(Destination::Finish, "done"),
            RunEvent::finish("x"),
        ];
        let violations = check_event_sequence(&events);
        assert_eq!(
            violations,
            vec!["event 2: decision before action of Data_Analyst".to_string()]
        );
    }

    #[test]
    fn mismatched_action_and_missing_terminal_are_reported() {
        let events = vec![
            RunEvent::start("q"),
            RunEvent::decision(Destination::DataAnalyst, "r"),
            RunEvent::action(WorkerId::BusinessStrategist, "STRATEGY: {}"),
        ];
        let violations = check_event_sequence(&events);
        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&"last event is not terminal".to_string()));
    }
}
