use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type ChainId = u64;

/// 32 字节内容哈希
pub type Hash32 = [u8; 32];

/// 账户身份（发送者、中继参与者、管理员）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息 ID，十六进制字符串（`0x` 前缀）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn from_hash(hash: &Hash32) -> Self {
        Self(format!("0x{}", hex::encode(hash)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息类型，决定分发到哪个处理器
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    ConsensusDecision,
    GovernanceProposal,
    EmergencyCoordination,
    TrustUpdate,
    Unknown(String),
}

impl MessageType {
    pub fn tag(&self) -> &str {
        match self {
            MessageType::ConsensusDecision => "CONSENSUS_DECISION",
            MessageType::GovernanceProposal => "GOVERNANCE_PROPOSAL",
            MessageType::EmergencyCoordination => "EMERGENCY_COORDINATION",
            MessageType::TrustUpdate => "TRUST_UPDATE",
            MessageType::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "CONSENSUS_DECISION" => MessageType::ConsensusDecision,
            "GOVERNANCE_PROPOSAL" => MessageType::GovernanceProposal,
            "EMERGENCY_COORDINATION" => MessageType::EmergencyCoordination,
            "TRUST_UPDATE" => MessageType::TrustUpdate,
            other => MessageType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        MessageType::from(tag.as_str())
    }
}

impl From<MessageType> for String {
    fn from(message_type: MessageType) -> Self {
        message_type.tag().to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 消息生命周期状态
///
/// `Created -> AwaitingConfirmation -> Processed`，或者在超时后进入 `Expired`。
/// 分发失败时保持 `AwaitingConfirmation`，等待后续确认触发重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Created,
    AwaitingConfirmation,
    Processed,
    Expired,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Processed | MessageStatus::Expired)
    }

    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Created, AwaitingConfirmation)
                | (AwaitingConfirmation, AwaitingConfirmation)
                | (AwaitingConfirmation, Processed)
                | (Created, Expired)
                | (AwaitingConfirmation, Expired)
        )
    }
}

/// `Vec<u8>` 以 `0x` 前缀十六进制字符串序列化
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub message_id: MessageId,
    pub source_chain_id: ChainId,
    pub target_chain_id: ChainId,
    pub sender: Address,
    pub message_type: MessageType,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub payload_hash: Hash32,
    pub timestamp: u64,
    pub nonce: u64,
    pub confirmations: u32,
    pub confirmed_by: BTreeSet<Address>,
    pub dispatch_attempts: u32,
    pub processed: bool,
    pub status: MessageStatus,
}

impl CrossChainMessage {
    /// 消息是否已超过有效期
    pub fn is_timed_out(&self, now: u64, timeout: u64) -> bool {
        now > self.timestamp.saturating_add(timeout)
    }
}

/// 目标链一侧由中继提交的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub source_chain_id: ChainId,
    pub sender: Address,
    pub message_type: MessageType,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub origin_timestamp: u64,
    pub origin_nonce: u64,
    #[serde(default, with = "hex_bytes")]
    pub proof: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Validator,
    Agent,
    Oracle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayParticipant {
    pub identity: Address,
    pub node_type: NodeType,
    pub stake: u128,
    pub active: bool,
    pub successful_relays: u64,
    pub failed_relays: u64,
    pub registered_at: u64,
}
