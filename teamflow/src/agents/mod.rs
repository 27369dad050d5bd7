//! Supervisor and worker agents, plus the retrying oracle client they share.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::core::types::{Message, WorkerId};
use crate::error::{EngineError, OracleError};
use crate::io::config::RetryConfig;
use crate::io::oracle::{DecisionOracle, OracleRequest, OracleTask, OutputSchemas};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::retry::{backoff_delay, hang_guard};

pub mod analyst;
pub mod strategist;
pub mod supervisor;
pub mod tool;

use analyst::DataAnalyst;
use strategist::BusinessStrategist;

/// Oracle handle with prompt rendering, schema checks, timeouts and retries.
///
/// Malformed output is retried immediately up to `max_malformed_retries`
/// times; transport failures (including timeouts) are retried with
/// exponential backoff up to `max_transport_retries` times.
pub struct OracleClient {
    oracle: Arc<dyn DecisionOracle>,
    schemas: OutputSchemas,
    prompts: PromptBuilder,
    retry: RetryConfig,
}

impl OracleClient {
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        prompts: PromptBuilder,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            oracle,
            schemas: OutputSchemas::compile()?,
            prompts,
            retry,
        })
    }

    #[instrument(skip_all, fields(task = task.as_str()))]
    pub async fn consult<T: DeserializeOwned>(
        &self,
        task: OracleTask,
        inputs: &PromptInputs<'_>,
    ) -> Result<T, EngineError> {
        let prompt = self
            .prompts
            .build(task, inputs)
            .map_err(|err| EngineError::Internal(format!("{err:#}")))?;
        let request = OracleRequest {
            task,
            prompt,
            context: inputs.conversation.to_vec(),
        };

        let mut malformed = 0u32;
        let mut transport = 0u32;
        loop {
            match self.attempt(&request).await {
                Ok(response) => {
                    debug!(attempts = malformed + transport + 1, "oracle answered");
                    return Ok(response);
                }
                Err(OracleError::Malformed(detail)) => {
                    malformed += 1;
                    if malformed > self.retry.max_malformed_retries {
                        return Err(EngineError::OracleMalformed {
                            attempts: malformed + transport,
                            detail,
                        });
                    }
                    warn!(%detail, retry = malformed, "malformed oracle output, retrying");
                }
                Err(OracleError::Transport(detail)) => {
                    transport += 1;
                    if transport > self.retry.max_transport_retries {
                        return Err(EngineError::TransportFailure {
                            target: "oracle",
                            attempts: malformed + transport,
                            detail,
                        });
                    }
                    let delay = backoff_delay(&self.retry, transport);
                    warn!(%detail, retry = transport, delay_ms = delay.as_millis() as u64, "oracle transport failure, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(&self, request: &OracleRequest) -> Result<T, OracleError> {
        // Dropping a timed-out call stops its process before the retry starts.
        let timeout = hang_guard(&self.retry);
        let response = tokio::time::timeout(timeout, self.oracle.complete(request))
            .await
            .map_err(|_| {
                OracleError::Transport(format!("oracle timed out after {}s", timeout.as_secs_f64()))
            })??;
        self.schemas.check(request.task, &response)?;
        serde_json::from_value(response).map_err(|err| {
            OracleError::Malformed(format!("{} response: {err}", request.task.as_str()))
        })
    }
}

/// The worker roster. Dispatch is an exhaustive match over [`WorkerId`].
pub struct Workers {
    analyst: DataAnalyst,
    strategist: BusinessStrategist,
}

impl Workers {
    pub fn new(analyst: DataAnalyst, strategist: BusinessStrategist) -> Self {
        Self {
            analyst,
            strategist,
        }
    }

    /// Run one worker against the windowed view and return its tagged output.
    pub async fn act(
        &self,
        worker: WorkerId,
        query: &str,
        window: &[Message],
    ) -> Result<String, EngineError> {
        match worker {
            WorkerId::DataAnalyst => self.analyst.act(query, window).await,
            WorkerId::BusinessStrategist => self.strategist.act(query, window).await,
        }
    }
}
