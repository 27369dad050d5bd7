//! Supervisor: chooses the next destination from the windowed view.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument};

use crate::agents::OracleClient;
use crate::core::completion;
use crate::core::types::{Destination, Message, RoutingDecision};
use crate::error::EngineError;
use crate::io::oracle::OracleTask;
use crate::io::prompt::PromptInputs;

/// Oracle response for the routing task. `next` parses strictly.
#[derive(Debug, Clone, Deserialize)]
struct RouteResponse {
    next: Destination,
    reasoning: String,
}

/// Holds no per-run state; one instance serves every run.
pub struct Supervisor {
    client: Arc<OracleClient>,
    destinations: Vec<Destination>,
    completion_guards: bool,
}

impl Supervisor {
    pub fn new(
        client: Arc<OracleClient>,
        destinations: Vec<Destination>,
        completion_guards: bool,
    ) -> Self {
        Self {
            client,
            destinations,
            completion_guards,
        }
    }

    #[instrument(skip_all, fields(window = window.len()))]
    pub async fn decide(
        &self,
        query: &str,
        window: &[Message],
    ) -> Result<RoutingDecision, EngineError> {
        if self.completion_guards
            && let Some(decision) = completion::pre_decision(window)
        {
            info!("analysis and strategy present, finishing");
            return Ok(decision);
        }

        let inputs = PromptInputs {
            query,
            conversation: window,
            destinations: &self.destinations,
            allowed_modules: &[],
        };
        let response: RouteResponse = self.client.consult(OracleTask::Route, &inputs).await?;
        let decision = RoutingDecision::new(response.next, response.reasoning.trim());

        if self.completion_guards {
            let guarded = completion::post_decision(window, decision);
            info!(destination = %guarded.destination, "routing decided");
            return Ok(guarded);
        }
        info!(destination = %decision.destination, "routing decided");
        Ok(decision)
    }
}
