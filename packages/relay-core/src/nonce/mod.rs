use blake2::{digest::consts::U32, Blake2b, Digest};
use std::collections::HashMap;
use log::debug;
use crate::{
    types::{Address, ChainId, Hash32, MessageId},
    RelayError, Result,
};

type Blake2b256 = Blake2b<U32>;

const MESSAGE_ID_DOMAIN: &[u8] = b"relay-core/message-id/v1";

/// 按发送者分配严格递增的 nonce
#[derive(Debug, Default, Clone)]
pub struct NonceAllocator {
    consumed: HashMap<Address, u64>,
}

impl NonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配下一个 nonce，返回前即记为已消耗
    pub fn allocate(&mut self, sender: &Address) -> Result<u64> {
        let last = self.consumed.get(sender).copied().unwrap_or(0);
        let next = last
            .checked_add(1)
            .ok_or_else(|| RelayError::InvalidParameter(format!("nonce space exhausted for {}", sender)))?;
        self.consumed.insert(sender.clone(), next);
        debug!("Allocated nonce {} for {}", next, sender);
        Ok(next)
    }

    pub fn last_allocated(&self, sender: &Address) -> Option<u64> {
        self.consumed.get(sender).copied()
    }
}

pub fn content_hash(bytes: &[u8]) -> Hash32 {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// 由 (源链, 目标链, 发送者, nonce, 时间戳) 确定性推导消息 ID
pub fn derive_message_id(
    source_chain_id: ChainId,
    target_chain_id: ChainId,
    sender: &Address,
    nonce: u64,
    timestamp: u64,
) -> MessageId {
    let sender_bytes = sender.as_str().as_bytes();
    let mut hasher = Blake2b256::new();
    hasher.update(MESSAGE_ID_DOMAIN);
    hasher.update(source_chain_id.to_be_bytes());
    hasher.update(target_chain_id.to_be_bytes());
    // 长度前缀，避免发送者与后续字段拼接产生歧义
    hasher.update((sender_bytes.len() as u64).to_be_bytes());
    hasher.update(sender_bytes);
    hasher.update(nonce.to_be_bytes());
    hasher.update(timestamp.to_be_bytes());
    let hash: Hash32 = hasher.finalize().into();
    MessageId::from_hash(&hash)
}
