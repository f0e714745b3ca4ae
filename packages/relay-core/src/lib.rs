pub mod config;
pub mod types;
pub mod clock;
pub mod events;
pub mod chains;
pub mod participants;
pub mod nonce;
pub mod store;
pub mod decision_registry;
pub mod dispatch;
pub mod verify;
pub mod engine;
pub mod relayer;

pub use config::{Config, EngineParams};
pub use types::{Address, ChainId, CrossChainMessage, MessageId, MessageStatus, MessageType, NodeType, ReceivedMessage, RelayParticipant};
pub use engine::RelayEngine;

/// 基础设施错误：配置、下游注册表、网络与序列化
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// 中继引擎对调用方暴露的错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Caller is not authorized for this operation")]
    Unauthorized,

    #[error("Invalid chain: {0}")]
    InvalidChain(ChainId),

    #[error("Insufficient stake: provided {provided}, required {required}")]
    InsufficientStake { provided: u128, required: u128 },

    #[error("Participant is already registered")]
    AlreadyRegistered,

    #[error("Participant is not active")]
    NotActive,

    #[error("Message already processed")]
    AlreadyProcessed,

    #[error("Message expired")]
    MessageExpired,

    #[error("Message not found")]
    NotFound,

    #[error("Engine is paused")]
    EnginePaused,

    #[error("Payload decode failure: {0}")]
    DecodeFailure(String),

    #[error("Participant already confirmed this message")]
    DuplicateConfirmation,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid source proof: {0}")]
    InvalidProof(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
