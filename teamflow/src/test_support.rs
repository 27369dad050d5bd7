//! Scripted oracle and sandbox fakes for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{OracleError, SandboxError};
use crate::io::oracle::{DecisionOracle, OracleRequest, OracleTask};
use crate::io::sandbox::SandboxExecutor;

/// Routing response body.
pub fn route(next: &str, reasoning: &str) -> Value {
    json!({ "next": next, "reasoning": reasoning })
}

/// Analysis plan body; `code: None` asks for no tool call.
pub fn analysis(summary: &str, code: Option<&str>) -> Value {
    json!({ "summary": summary, "code": code })
}

/// Strategy body from `(action, rating, rationale)` triples.
pub fn strategy(actions: &[(&str, u8, &str)], summary: &str) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|(action, rating, rationale)| {
            json!({ "action": action, "rating": rating, "rationale": rationale })
        })
        .collect();
    json!({ "actions": actions, "summary": summary })
}

/// Oracle that replays queued responses per task.
///
/// A task with an empty queue falls back to its `always` response, if set;
/// otherwise the call reports malformed output. Hanging tasks never answer.
#[derive(Default)]
pub struct ScriptedOracle {
    queues: Mutex<HashMap<OracleTask, VecDeque<Result<Value, OracleError>>>>,
    always: Mutex<HashMap<OracleTask, Value>>,
    hanging: Mutex<Vec<OracleTask>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: OracleTask, response: Result<Value, OracleError>) -> &Self {
        lock(&self.queues).entry(task).or_default().push_back(response);
        self
    }

    pub fn push_ok(&self, task: OracleTask, response: Value) -> &Self {
        self.push(task, Ok(response))
    }

    pub fn always(&self, task: OracleTask, response: Value) -> &Self {
        lock(&self.always).insert(task, response);
        self
    }

    pub fn hang(&self, task: OracleTask) -> &Self {
        lock(&self.hanging).push(task);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<OracleRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self, task: OracleTask) -> usize {
        lock(&self.requests).iter().filter(|r| r.task == task).count()
    }

    fn next_response(&self, task: OracleTask) -> Result<Value, OracleError> {
        if let Some(response) = lock(&self.queues).get_mut(&task).and_then(VecDeque::pop_front) {
            return response;
        }
        lock(&self.always).get(&task).cloned().ok_or_else(|| {
            OracleError::Malformed(format!("no scripted {} response", task.as_str()))
        })
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        lock(&self.requests).push(request.clone());
        if lock(&self.hanging).contains(&request.task) {
            std::future::pending::<()>().await;
        }
        self.next_response(request.task)
    }
}

/// Sandbox that replays queued outcomes; an empty queue yields empty output.
#[derive(Default)]
pub struct ScriptedSandbox {
    outcomes: Mutex<VecDeque<Result<String, SandboxError>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<String, SandboxError>) -> &Self {
        lock(&self.outcomes).push_back(outcome);
        self
    }

    pub fn push_ok(&self, output: &str) -> &Self {
        self.push(Ok(output.to_string()))
    }

    /// Code received so far, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedSandbox {
    async fn execute(&self, code: &str) -> Result<String, SandboxError> {
        lock(&self.executed).push(code.to_string());
        lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
