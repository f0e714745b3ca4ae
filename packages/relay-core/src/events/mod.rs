use serde::Serialize;
use crate::types::{Address, ChainId, MessageId, MessageType, NodeType};

/// 对外可观察的通知事件，引擎只追加不回读
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    ChainAdded {
        chain_id: ChainId,
        name: String,
        confirmation_blocks: u64,
    },
    ChainStatusChanged {
        chain_id: ChainId,
        enabled: bool,
    },
    ParticipantRegistered {
        identity: Address,
        node_type: NodeType,
        stake: u128,
    },
    ParticipantDeactivated {
        identity: Address,
        stake_returned: u128,
    },
    MessageSent {
        message_id: MessageId,
        source_chain_id: ChainId,
        target_chain_id: ChainId,
        sender: Address,
        message_type: MessageType,
    },
    MessageReceived {
        message_id: MessageId,
        source_chain_id: ChainId,
        sender: Address,
        relayer: Address,
    },
    MessageConfirmed {
        message_id: MessageId,
        participant: Address,
        confirmations: u32,
    },
    MessageProcessed {
        message_id: MessageId,
        message_type: MessageType,
    },
    DispatchFailed {
        message_id: MessageId,
        reason: String,
    },
    MessageExpired {
        message_id: MessageId,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
    ParameterUpdated {
        name: String,
        value: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: u64,
    pub event: RelayEvent,
}

/// 追加写的事件日志
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, timestamp: u64, event: RelayEvent) -> u64 {
        let sequence = self.records.len() as u64;
        self.records.push(EventRecord {
            sequence,
            timestamp,
            event,
        });
        sequence
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// 返回序号 >= `sequence` 的事件，供外部索引器增量拉取
    pub fn since(&self, sequence: u64) -> &[EventRecord] {
        let start = (sequence as usize).min(self.records.len());
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
