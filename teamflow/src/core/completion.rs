//! Completion guards applied by the supervisor before and after consulting the oracle.
//!
//! Both guards are pure functions of the windowed view: they only look at
//! worker messages and the tag each one starts with.

use crate::core::types::{ANALYSIS_TAG, Destination, Message, Role, RoutingDecision, STRATEGY_TAG};

pub const COMPLETED_REASONING: &str = "Analysis and strategy tasks completed successfully.";
pub const STRATEGY_EXISTS_REASONING: &str =
    "Strategy already produced for this request; finishing instead of re-running the strategist.";

fn has_tagged_output(window: &[Message], tag: &str) -> bool {
    window
        .iter()
        .any(|m| m.role == Role::Worker && m.content.trim_start().starts_with(tag))
}

/// Finish without consulting the oracle when the window already holds both an
/// analysis and a strategy.
pub fn pre_decision(window: &[Message]) -> Option<RoutingDecision> {
    (has_tagged_output(window, ANALYSIS_TAG) && has_tagged_output(window, STRATEGY_TAG))
        .then(|| RoutingDecision::finish(COMPLETED_REASONING))
}

/// Replace a repeat strategist dispatch with Finish once a strategy is in the window.
pub fn post_decision(window: &[Message], decision: RoutingDecision) -> RoutingDecision {
    if decision.destination == Destination::BusinessStrategist
        && has_tagged_output(window, STRATEGY_TAG)
    {
        return RoutingDecision::finish(STRATEGY_EXISTS_REASONING);
    }
    decision
}
