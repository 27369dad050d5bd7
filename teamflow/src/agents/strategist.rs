//! Business_Strategist worker.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::agents::OracleClient;
use crate::core::types::{Message, STRATEGY_TAG, Strategy};
use crate::error::EngineError;
use crate::io::oracle::OracleTask;
use crate::io::prompt::PromptInputs;

pub struct BusinessStrategist {
    client: Arc<OracleClient>,
}

impl BusinessStrategist {
    pub fn new(client: Arc<OracleClient>) -> Self {
        Self { client }
    }

    /// Ask for a strategy and render `STRATEGY: <json>` with actions ranked by rating.
    #[instrument(skip_all, fields(window = window.len()))]
    pub async fn act(&self, query: &str, window: &[Message]) -> Result<String, EngineError> {
        let inputs = PromptInputs {
            query,
            conversation: window,
            destinations: &[],
            allowed_modules: &[],
        };
        let strategy: Strategy = self.client.consult(OracleTask::Strategize, &inputs).await?;
        let strategy = strategy.ranked();
        info!(actions = strategy.actions.len(), "strategy ready");
        let json = serde_json::to_string_pretty(&strategy)
            .map_err(|err| EngineError::Internal(format!("encode strategy: {err}")))?;
        Ok(format!("{STRATEGY_TAG} {json}"))
    }
}
