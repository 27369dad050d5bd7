//! Data_Analyst worker.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument};

use crate::agents::OracleClient;
use crate::agents::tool::AnalysisTool;
use crate::core::types::{ANALYSIS_TAG, Message};
use crate::error::EngineError;
use crate::io::oracle::OracleTask;
use crate::io::prompt::PromptInputs;

/// Oracle response for the analysis task.
#[derive(Debug, Clone, Deserialize)]
struct AnalysisPlan {
    summary: String,
    code: Option<String>,
}

pub struct DataAnalyst {
    client: Arc<OracleClient>,
    tool: AnalysisTool,
    allowed_modules: Vec<String>,
}

impl DataAnalyst {
    pub fn new(client: Arc<OracleClient>, tool: AnalysisTool, allowed_modules: Vec<String>) -> Self {
        Self {
            client,
            tool,
            allowed_modules,
        }
    }

    /// Ask for an analysis plan, run its code (if any) once, and render `ANALYSIS: ...`.
    #[instrument(skip_all, fields(window = window.len()))]
    pub async fn act(&self, query: &str, window: &[Message]) -> Result<String, EngineError> {
        let inputs = PromptInputs {
            query,
            conversation: window,
            destinations: &[],
            allowed_modules: &self.allowed_modules,
        };
        let plan: AnalysisPlan = self.client.consult(OracleTask::Analyze, &inputs).await?;

        let mut output = format!("{ANALYSIS_TAG} {}", plan.summary.trim());
        if let Some(code) = plan.code.filter(|code| !code.trim().is_empty()) {
            let invocation = self.tool.execute_analysis(&code).await?;
            info!(
                allowed = invocation.validation.allowed,
                failed = invocation.error.is_some(),
                "analysis tool finished"
            );
            output.push_str("\n\n");
            output.push_str(&invocation.render());
        }
        Ok(output)
    }
}
