use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use log::{debug, error, info, warn};
use crate::{
    decision_registry::{ConsensusDecision, DecisionRegistry, GovernanceProposal},
    types::{CrossChainMessage, MessageId, MessageType},
    Error, RelayError,
};

/// 分发失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("No handler for message type {0}")]
    UnknownType(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Downstream call failed: {0}")]
    Downstream(String),
}

/// 分发成功的回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum DispatchReceipt {
    DecisionRecorded { request_id: String },
    ProposalCreated { proposal_id: String },
    EmergencyHandled,
    TrustUpdated,
}

/// 紧急协调与信任参数更新的扩展点
#[async_trait]
pub trait CoordinationHooks: Send + Sync {
    async fn on_emergency(&self, message: &CrossChainMessage) -> Result<(), Error> {
        warn!("Emergency coordination message {} from {}", message.message_id, message.sender);
        Ok(())
    }

    async fn on_trust_update(&self, message: &CrossChainMessage) -> Result<(), Error> {
        info!("Trust update message {} ({} bytes)", message.message_id, message.payload.len());
        Ok(())
    }
}

/// 仅记录日志并报告成功
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl CoordinationHooks for LoggingHooks {}

/// 按消息类型路由到对应处理器
pub struct Dispatcher {
    registry: Arc<dyn DecisionRegistry>,
    hooks: Arc<dyn CoordinationHooks>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn DecisionRegistry>) -> Self {
        Self {
            registry,
            hooks: Arc::new(LoggingHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CoordinationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub async fn dispatch(&self, message: &CrossChainMessage) -> Result<DispatchReceipt, DispatchError> {
        debug!("Dispatching message {} as {}", message.message_id, message.message_type);
        let receipt = match &message.message_type {
            MessageType::ConsensusDecision => {
                let decision: ConsensusDecision = decode(&message.message_id, &message.payload)?;
                self.registry
                    .record_consensus_decision(&decision)
                    .await
                    .map_err(downstream)?;
                DispatchReceipt::DecisionRecorded {
                    request_id: decision.request_id,
                }
            }
            MessageType::GovernanceProposal => {
                let proposal: GovernanceProposal = decode(&message.message_id, &message.payload)?;
                let proposal_id = self
                    .registry
                    .create_proposal(&proposal)
                    .await
                    .map_err(downstream)?;
                DispatchReceipt::ProposalCreated { proposal_id }
            }
            MessageType::EmergencyCoordination => {
                self.hooks.on_emergency(message).await.map_err(downstream)?;
                DispatchReceipt::EmergencyHandled
            }
            MessageType::TrustUpdate => {
                self.hooks.on_trust_update(message).await.map_err(downstream)?;
                DispatchReceipt::TrustUpdated
            }
            MessageType::Unknown(tag) => {
                warn!("No handler for message {} of type {}", message.message_id, tag);
                return Err(DispatchError::UnknownType(tag.clone()));
            }
        };
        info!("Dispatched message {}: {:?}", message.message_id, receipt);
        Ok(receipt)
    }
}

fn downstream(e: Error) -> DispatchError {
    error!("Downstream handler failed: {}", e);
    DispatchError::Downstream(e.to_string())
}

fn decode<T: DeserializeOwned>(id: &MessageId, payload: &[u8]) -> Result<T, DispatchError> {
    decode_payload(payload).map_err(|e| {
        warn!("Malformed payload in message {}: {}", id, e);
        DispatchError::MalformedPayload(e.to_string())
    })
}

/// 按 BCS 编码消息负载
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bcs::to_bytes(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// 按 BCS 解码消息负载；必须完整消费全部字节
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, RelayError> {
    bcs::from_bytes(payload).map_err(|e| RelayError::DecodeFailure(e.to_string()))
}
