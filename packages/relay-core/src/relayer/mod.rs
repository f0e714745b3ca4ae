use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use log::{error, info, warn};
use crate::{
    engine::{ConfirmationOutcome, RelayEngine},
    types::{hex_bytes, Address, ChainId, MessageId, MessageType, NodeType, ReceivedMessage},
    Error, Result,
};

/// 引擎对外暴露的全部操作，每个都携带调用者身份
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AddSupportedChain {
        caller: Address,
        chain_id: ChainId,
        name: String,
        confirmation_blocks: u64,
        bridge_reference: String,
    },
    SetChainEnabled {
        caller: Address,
        chain_id: ChainId,
        enabled: bool,
    },
    Register {
        caller: Address,
        node_type: NodeType,
        stake: u128,
    },
    Deactivate {
        caller: Address,
        identity: Address,
    },
    Send {
        caller: Address,
        target_chain_id: ChainId,
        message_type: MessageType,
        #[serde(with = "hex_bytes")]
        payload: Vec<u8>,
    },
    Receive {
        caller: Address,
        message: ReceivedMessage,
    },
    Confirm {
        caller: Address,
        message_id: MessageId,
    },
    Pause {
        caller: Address,
    },
    Unpause {
        caller: Address,
    },
    SetMinConfirmations {
        caller: Address,
        value: u32,
    },
    SetMessageTimeout {
        caller: Address,
        secs: u64,
    },
    SetMinRelayStake {
        caller: Address,
        stake: u128,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddSupportedChain { .. } => "add_supported_chain",
            Operation::SetChainEnabled { .. } => "set_chain_enabled",
            Operation::Register { .. } => "register",
            Operation::Deactivate { .. } => "deactivate",
            Operation::Send { .. } => "send",
            Operation::Receive { .. } => "receive",
            Operation::Confirm { .. } => "confirm",
            Operation::Pause { .. } => "pause",
            Operation::Unpause { .. } => "unpause",
            Operation::SetMinConfirmations { .. } => "set_min_confirmations",
            Operation::SetMessageTimeout { .. } => "set_message_timeout",
            Operation::SetMinRelayStake { .. } => "set_min_relay_stake",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    Done,
    MessageSent { message_id: MessageId },
    Confirmation(ConfirmationOutcome),
    StakeReturned { amount: u128 },
}

/// 提交给中继服务的一次操作及其回复通道
pub struct Submission {
    pub operation: Operation,
    pub reply: oneshot::Sender<Result<OperationOutcome>>,
}

/// 中继提交者持有的发送端
#[derive(Clone)]
pub struct RelaySubmitter {
    tx: mpsc::Sender<Submission>,
}

impl RelaySubmitter {
    pub async fn submit(&self, operation: Operation) -> std::result::Result<Result<OperationOutcome>, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission { operation, reply })
            .await
            .map_err(|_| Error::Network("relay service stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Network("relay service dropped the reply".to_string()))
    }
}

pub fn submission_channel(buffer: usize) -> (RelaySubmitter, mpsc::Receiver<Submission>) {
    let (tx, rx) = mpsc::channel(buffer);
    (RelaySubmitter { tx }, rx)
}

/// 顺序执行操作的中继服务：每个操作在写锁内完整执行，互不交错
pub struct RelayService {
    engine: Arc<RwLock<RelayEngine>>,
}

impl RelayService {
    pub fn new(engine: RelayEngine) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
        }
    }

    /// 共享引擎句柄，供只读查询使用
    pub fn engine(&self) -> Arc<RwLock<RelayEngine>> {
        self.engine.clone()
    }

    pub async fn execute(&self, operation: Operation) -> Result<OperationOutcome> {
        let op_name = operation.name();
        let mut engine = self.engine.write().await;
        let outcome = match operation {
            Operation::AddSupportedChain {
                caller,
                chain_id,
                name,
                confirmation_blocks,
                bridge_reference,
            } => engine
                .add_supported_chain(&caller, chain_id, &name, confirmation_blocks, &bridge_reference)
                .map(|_| OperationOutcome::Done),
            Operation::SetChainEnabled { caller, chain_id, enabled } => engine
                .set_chain_enabled(&caller, chain_id, enabled)
                .map(|_| OperationOutcome::Done),
            Operation::Register { caller, node_type, stake } => engine
                .register(&caller, node_type, stake)
                .map(|_| OperationOutcome::Done),
            Operation::Deactivate { caller, identity } => engine
                .deactivate(&caller, &identity)
                .map(|amount| OperationOutcome::StakeReturned { amount }),
            Operation::Send {
                caller,
                target_chain_id,
                message_type,
                payload,
            } => engine
                .send(&caller, target_chain_id, message_type, payload)
                .map(|message_id| OperationOutcome::MessageSent { message_id }),
            Operation::Receive { caller, message } => engine
                .receive(&caller, message)
                .await
                .map(OperationOutcome::Confirmation),
            Operation::Confirm { caller, message_id } => engine
                .confirm(&caller, &message_id)
                .await
                .map(OperationOutcome::Confirmation),
            Operation::Pause { caller } => engine.pause(&caller).map(|_| OperationOutcome::Done),
            Operation::Unpause { caller } => engine.unpause(&caller).map(|_| OperationOutcome::Done),
            Operation::SetMinConfirmations { caller, value } => engine
                .set_min_confirmations(&caller, value)
                .map(|_| OperationOutcome::Done),
            Operation::SetMessageTimeout { caller, secs } => engine
                .set_message_timeout(&caller, secs)
                .map(|_| OperationOutcome::Done),
            Operation::SetMinRelayStake { caller, stake } => engine
                .set_min_relay_stake(&caller, stake)
                .map(|_| OperationOutcome::Done),
        };

        if let Err(e) = &outcome {
            warn!("Operation {} rejected: {}", op_name, e);
        }
        outcome
    }

    /// 依次处理提交的操作，直到所有发送端关闭
    pub async fn run(&self, mut submissions: mpsc::Receiver<Submission>) {
        info!("Starting relay service...");
        while let Some(Submission { operation, reply }) = submissions.recv().await {
            let outcome = self.execute(operation).await;
            if reply.send(outcome).is_err() {
                error!("Submitter went away before receiving the outcome");
            }
        }
        info!("Relay service stopped: all submitters closed");
    }
}
