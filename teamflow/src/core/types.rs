//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between the engine, the supervisor and
//! the workers. They do not depend on external state or I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tag that opens every analyst output.
pub const ANALYSIS_TAG: &str = "ANALYSIS:";
/// Tag that opens every strategist output.
pub const STRATEGY_TAG: &str = "STRATEGY:";

/// Who appended a message to the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Supervisor,
    Worker,
}

/// One entry of the run's conversation history.
///
/// Messages are immutable once appended; `sequence_index` is assigned by
/// [`crate::core::state::SharedState`] and reflects causal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub author: String,
    pub content: String,
    pub sequence_index: u64,
}

/// Worker identities, one variant per worker the engine can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerId {
    #[serde(rename = "Data_Analyst")]
    DataAnalyst,
    #[serde(rename = "Business_Strategist")]
    BusinessStrategist,
}

impl WorkerId {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerId::DataAnalyst => "Data_Analyst",
            WorkerId::BusinessStrategist => "Business_Strategist",
        }
    }

    /// Tag this worker prefixes onto its output.
    pub fn output_tag(self) -> &'static str {
        match self {
            WorkerId::DataAnalyst => ANALYSIS_TAG,
            WorkerId::BusinessStrategist => STRATEGY_TAG,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of routing destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    #[serde(rename = "Data_Analyst")]
    DataAnalyst,
    #[serde(rename = "Business_Strategist")]
    BusinessStrategist,
    #[serde(rename = "Finish", alias = "FINISH")]
    Finish,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::DataAnalyst,
        Destination::BusinessStrategist,
        Destination::Finish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Destination::DataAnalyst => "Data_Analyst",
            Destination::BusinessStrategist => "Business_Strategist",
            Destination::Finish => "Finish",
        }
    }

    /// Worker to dispatch to, or `None` for `Finish`.
    pub fn worker(self) -> Option<WorkerId> {
        match self {
            Destination::DataAnalyst => Some(WorkerId::DataAnalyst),
            Destination::BusinessStrategist => Some(WorkerId::BusinessStrategist),
            Destination::Finish => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for labels outside the closed destination set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDestination(pub String);

impl fmt::Display for UnknownDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown destination '{}'", self.0)
    }
}

impl std::error::Error for UnknownDestination {}

impl FromStr for Destination {
    type Err = UnknownDestination;

    /// Strict label parsing. `FINISH` is the only accepted alias.
    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label {
            "Data_Analyst" => Ok(Destination::DataAnalyst),
            "Business_Strategist" => Ok(Destination::BusinessStrategist),
            "Finish" | "FINISH" => Ok(Destination::Finish),
            other => Err(UnknownDestination(other.to_string())),
        }
    }
}

/// The supervisor's per-step choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub destination: Destination,
    pub reasoning: String,
}

impl RoutingDecision {
    pub fn new(destination: Destination, reasoning: impl Into<String>) -> Self {
        Self {
            destination,
            reasoning: reasoning.into(),
        }
    }

    pub fn finish(reasoning: impl Into<String>) -> Self {
        Self::new(Destination::Finish, reasoning)
    }
}

/// Verdict of a single code-safety check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Record of one analysis-tool call, discarded once rendered into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub requested_code: String,
    pub validation: ValidationResult,
    pub execution_output: Option<String>,
    pub error: Option<String>,
}

impl ToolInvocation {
    /// Render the invocation as text for the worker message.
    pub fn render(&self) -> String {
        if !self.validation.allowed {
            let reason = self.validation.reason.as_deref().unwrap_or("denied");
            return format!("Code rejected by safety check: {reason}");
        }
        if let Some(err) = &self.error {
            return format!("Execution failed: {}", err.trim());
        }
        match self.execution_output.as_deref().map(str::trim) {
            Some(out) if !out.is_empty() => format!("Result:\n{out}"),
            _ => "Result: (no output)".to_string(),
        }
    }
}

/// One recommended action of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAction {
    pub action: String,
    pub rationale: String,
    pub rating: u8,
}

/// Structured strategist output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub actions: Vec<StrategyAction>,
    pub summary: String,
}

impl Strategy {
    /// Actions ordered by rating, highest first. Ties keep their original order.
    pub fn ranked(mut self) -> Self {
        self.actions.sort_by(|a, b| b.rating.cmp(&a.rating));
        self
    }
}
