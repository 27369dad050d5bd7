//! Per-run shared state and its windowed view.
//!
//! A `SharedState` is created when a run starts and is owned by that run's
//! event stream until termination. All mutation goes through the methods below
//! so that sequence indices, the iteration counter and termination stay
//! consistent.

use crate::core::types::{Message, Role, RoutingDecision, WorkerId};

/// Author label used for the seeded user query.
pub const USER_AUTHOR: &str = "user";
/// Author label used for supervisor decisions.
pub const SUPERVISOR_AUTHOR: &str = "Supervisor";
/// Final output used when no worker produced anything.
pub const NOT_ENOUGH_INFORMATION: &str = "Not enough information to produce a result.";

#[derive(Debug, Clone)]
pub struct SharedState {
    messages: Vec<Message>,
    iteration_count: u32,
    max_iterations: u32,
    message_window: usize,
    last_decision: Option<RoutingDecision>,
    final_output: Option<String>,
}

impl SharedState {
    /// Seed a new state with the user query as the first message.
    pub fn new(query: &str, max_iterations: u32, message_window: usize) -> Self {
        let mut state = Self {
            messages: Vec::new(),
            iteration_count: 0,
            max_iterations,
            message_window,
            last_decision: None,
            final_output: None,
        };
        state.append(Role::User, USER_AUTHOR, query.to_string());
        state
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    #[cfg(test)]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    #[cfg(test)]
    pub fn last_decision(&self) -> Option<&RoutingDecision> {
        self.last_decision.as_ref()
    }

    #[cfg(test)]
    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    #[cfg(test)]
    pub fn is_terminated(&self) -> bool {
        self.final_output.is_some()
    }

    /// The original user query (always the first message).
    #[cfg(test)]
    pub fn query(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn bound_reached(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    /// The most recent `message_window` messages, oldest first.
    pub fn window(&self) -> &[Message] {
        let start = self.messages.len().saturating_sub(self.message_window);
        &self.messages[start..]
    }

    /// Record a supervisor decision: consumes one unit of the iteration budget
    /// and appends the decision as a supervisor message.
    pub fn record_decision(&mut self, decision: RoutingDecision) -> &RoutingDecision {
        self.iteration_count += 1;
        let content = format!(
            "[Supervisor] Routing to {}. Reasoning: {}",
            decision.destination, decision.reasoning
        );
        self.append(Role::Supervisor, SUPERVISOR_AUTHOR, content);
        self.last_decision.insert(decision)
    }

    pub fn record_worker_output(&mut self, worker: WorkerId, output: String) {
        self.append(Role::Worker, worker.as_str(), output);
    }

    /// Mark the run terminated and fix `final_output` from the latest worker message.
    pub fn terminate(&mut self) -> &str {
        let output = self
            .latest_worker_output()
            .unwrap_or(NOT_ENOUGH_INFORMATION)
            .to_string();
        self.final_output.insert(output).as_str()
    }

    /// Force a `Finish` without consuming iteration budget.
    pub fn force_finish(&mut self, reasoning: &str) -> &str {
        self.last_decision = Some(RoutingDecision::finish(reasoning));
        self.terminate()
    }

    fn latest_worker_output(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Worker)
            .map(|m| m.content.as_str())
    }

    fn append(&mut self, role: Role, author: &str, content: String) {
        let sequence_index = self.messages.len() as u64;
        self.messages.push(Message {
            role,
            author: author.to_string(),
            content,
            sequence_index,
        });
    }
}
