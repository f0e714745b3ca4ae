use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use log::{error, warn};
use crate::{config::RegistryConfig, Error};
use super::{ConsensusDecision, DecisionRegistry, GovernanceProposal};

/// 通过 JSON-RPC 访问远端决策登记系统
pub struct RpcDecisionRegistry {
    rpc_url: String,
    max_retries: u32,
    retry_delay_ms: u64,
    client: reqwest::Client,
}

impl RpcDecisionRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            rpc_url: config.rpc_url.clone(),
            max_retries: config.max_retries.max(1),
            retry_delay_ms: config.retry_delay_ms,
            client: reqwest::Client::new(),
        }
    }

    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                // 下游明确返回的错误不重试
                Err(e @ Error::Registry(_)) => return Err(e),
                Err(e) => {
                    retries += 1;
                    if retries >= self.max_retries {
                        error!("Registry call failed after {} attempts: {}", retries, e);
                        return Err(e);
                    }
                    let delay = self.retry_delay_ms * 2u64.pow(retries - 1);
                    warn!("Retry {}/{} for registry call after {}ms. Error: {}", retries, self.max_retries, delay, e);
                    sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Error> {
        self.retry_with_backoff(|| async {
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": method,
                    "params": [params.clone()],
                    "id": 1
                }))
                .send()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;

            if !response.status().is_success() {
                return Err(Error::Network(format!("HTTP status {}", response.status())));
            }

            let result: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::Serialization(e.to_string()))?;

            if let Some(err) = result.get("error") {
                return Err(Error::Registry(format!("{} failed: {}", method, err)));
            }

            Ok(result.get("result").cloned().unwrap_or(serde_json::Value::Null))
        })
        .await
    }
}

#[async_trait]
impl DecisionRegistry for RpcDecisionRegistry {
    async fn record_consensus_decision(&self, decision: &ConsensusDecision) -> Result<(), Error> {
        self.call(
            "registry_recordConsensusDecision",
            serde_json::json!({
                "request_id": decision.request_id,
                "decision_type": decision.decision_type,
                "final_decision": decision.final_decision,
                "confidence": decision.confidence,
                "participating_agents": decision.participating_agents,
                "proof_hash": format!("0x{}", hex::encode(decision.proof_hash)),
            }),
        )
        .await?;
        Ok(())
    }

    async fn create_proposal(&self, proposal: &GovernanceProposal) -> Result<String, Error> {
        let result = self
            .call(
                "registry_createProposal",
                serde_json::json!({
                    "proposal_type": proposal.proposal_type,
                    "content_hash": format!("0x{}", hex::encode(proposal.content_hash)),
                }),
            )
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Serialization(format!("unexpected proposal id: {}", result)))
    }
}
