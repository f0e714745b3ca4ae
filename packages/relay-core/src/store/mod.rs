use std::collections::{HashMap, HashSet};
use log::{debug, warn};
use crate::{
    types::{Address, CrossChainMessage, MessageId, MessageStatus},
    RelayError, Result,
};

/// 幂等保护：已完成分发的消息 ID，只追加
#[derive(Debug, Default, Clone)]
pub struct ProcessedLedger {
    ids: HashSet<MessageId>,
    order: Vec<MessageId>,
}

impl ProcessedLedger {
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// 首次插入返回 true
    fn insert(&mut self, id: &MessageId) -> bool {
        if self.ids.insert(id.clone()) {
            self.order.push(id.clone());
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 消息存储与生命周期状态机
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: HashMap<MessageId, CrossChainMessage>,
    processed: ProcessedLedger,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &MessageId) -> Option<&CrossChainMessage> {
        self.messages.get(id)
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.processed.contains(id)
    }

    pub fn ledger(&self) -> &ProcessedLedger {
        &self.processed
    }

    /// 本链发出的消息，状态为 `Created`
    pub fn insert_created(&mut self, message: CrossChainMessage) -> Result<()> {
        if self.messages.contains_key(&message.message_id) {
            return Err(RelayError::InvalidParameter(format!(
                "message {} already exists",
                message.message_id
            )));
        }
        debug!("Stored created message {}", message.message_id);
        self.messages.insert(message.message_id.clone(), message);
        Ok(())
    }

    /// 中继提交的消息：新建或覆盖本地记录
    pub fn upsert_received(&mut self, message: CrossChainMessage) -> Result<()> {
        if self.processed.contains(&message.message_id) {
            return Err(RelayError::AlreadyProcessed);
        }
        if let Some(existing) = self.messages.get(&message.message_id) {
            if existing.status == MessageStatus::Expired {
                warn!("Refusing to overwrite expired message {}", message.message_id);
                return Err(RelayError::MessageExpired);
            }
            debug!("Overwriting unprocessed message {}", message.message_id);
        }
        self.messages.insert(message.message_id.clone(), message);
        Ok(())
    }

    /// 检查消息是否仍可操作；已处理返回 `AlreadyProcessed`，已过期返回 `MessageExpired`
    pub fn ensure_actionable(&self, id: &MessageId) -> Result<&CrossChainMessage> {
        let message = self.messages.get(id).ok_or(RelayError::NotFound)?;
        if self.processed.contains(id) || message.processed {
            return Err(RelayError::AlreadyProcessed);
        }
        if message.status == MessageStatus::Expired {
            return Err(RelayError::MessageExpired);
        }
        Ok(message)
    }

    /// 记录一次确认，返回当前确认数；同一参与者不能重复计数
    pub fn record_confirmation(&mut self, id: &MessageId, participant: &Address) -> Result<u32> {
        self.ensure_actionable(id)?;
        let message = self.messages.get_mut(id).ok_or(RelayError::NotFound)?;
        if message.confirmed_by.contains(participant) {
            return Err(RelayError::DuplicateConfirmation);
        }
        transition(message, MessageStatus::AwaitingConfirmation)?;
        message.confirmed_by.insert(participant.clone());
        message.confirmations += 1;
        Ok(message.confirmations)
    }

    /// 分发成功：幂等保护与 `Processed` 状态一起设置
    pub fn mark_processed(&mut self, id: &MessageId) -> Result<()> {
        if self.processed.contains(id) {
            return Err(RelayError::AlreadyProcessed);
        }
        let message = self.messages.get_mut(id).ok_or(RelayError::NotFound)?;
        transition(message, MessageStatus::Processed)?;
        message.processed = true;
        message.dispatch_attempts += 1;
        self.processed.insert(id);
        Ok(())
    }

    /// 分发失败：`AwaitingConfirmation -> AwaitingConfirmation`，等待后续确认重试
    pub fn mark_dispatch_failed(&mut self, id: &MessageId) -> Result<u32> {
        let message = self.messages.get_mut(id).ok_or(RelayError::NotFound)?;
        transition(message, MessageStatus::AwaitingConfirmation)?;
        message.dispatch_attempts += 1;
        Ok(message.dispatch_attempts)
    }

    pub fn mark_expired(&mut self, id: &MessageId) -> Result<()> {
        let message = self.messages.get_mut(id).ok_or(RelayError::NotFound)?;
        transition(message, MessageStatus::Expired)
    }

    /// 尚未进入终态的消息
    pub fn pending(&self) -> Vec<&CrossChainMessage> {
        let mut pending: Vec<_> = self
            .messages
            .values()
            .filter(|m| !m.status.is_terminal())
            .collect();
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.message_id.cmp(&b.message_id)));
        pending
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn transition(message: &mut CrossChainMessage, next: MessageStatus) -> Result<()> {
    if !message.status.can_transition_to(next) {
        warn!(
            "Rejected transition {:?} -> {:?} for message {}",
            message.status, next, message.message_id
        );
        return Err(match message.status {
            MessageStatus::Processed => RelayError::AlreadyProcessed,
            MessageStatus::Expired => RelayError::MessageExpired,
            _ => RelayError::InvalidParameter(format!(
                "illegal transition {:?} -> {:?}",
                message.status, next
            )),
        });
    }
    message.status = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;
    use std::collections::BTreeSet;

    fn message(id: &str, status: MessageStatus) -> CrossChainMessage {
        CrossChainMessage {
            message_id: MessageId::from(id),
            source_chain_id: 1,
            target_chain_id: 7,
            sender: Address::from("alice"),
            message_type: MessageType::TrustUpdate,
            payload: vec![1, 2, 3],
            payload_hash: [0u8; 32],
            timestamp: 100,
            nonce: 1,
            confirmations: 0,
            confirmed_by: BTreeSet::new(),
            dispatch_attempts: 0,
            processed: false,
            status,
        }
    }

    #[test]
    fn test_confirmations_count_distinct_participants() {
        let mut store = MessageStore::new();
        let id = MessageId::from("m1");
        store.insert_created(message("m1", MessageStatus::Created)).unwrap();

        assert_eq!(store.record_confirmation(&id, &"a".into()).unwrap(), 1);
        assert_eq!(store.get(&id).unwrap().status, MessageStatus::AwaitingConfirmation);
        assert_eq!(
            store.record_confirmation(&id, &"a".into()).unwrap_err(),
            RelayError::DuplicateConfirmation
        );
        assert_eq!(store.record_confirmation(&id, &"b".into()).unwrap(), 2);
    }

    #[test]
    fn test_processed_is_terminal() {
        let mut store = MessageStore::new();
        let id = MessageId::from("m1");
        store.insert_created(message("m1", MessageStatus::Created)).unwrap();
        store.record_confirmation(&id, &"a".into()).unwrap();
        store.mark_processed(&id).unwrap();

        assert!(store.is_processed(&id));
        assert_eq!(store.mark_processed(&id).unwrap_err(), RelayError::AlreadyProcessed);
        assert_eq!(
            store.record_confirmation(&id, &"b".into()).unwrap_err(),
            RelayError::AlreadyProcessed
        );
        assert_eq!(
            store.upsert_received(message("m1", MessageStatus::AwaitingConfirmation)).unwrap_err(),
            RelayError::AlreadyProcessed
        );
        assert_eq!(store.ledger().len(), 1);
        assert_eq!(store.get(&id).unwrap().confirmations, 1);
    }

    #[test]
    fn test_failed_dispatch_stays_awaiting() {
        let mut store = MessageStore::new();
        let id = MessageId::from("m1");
        store.upsert_received(message("m1", MessageStatus::AwaitingConfirmation)).unwrap();
        assert_eq!(store.mark_dispatch_failed(&id).unwrap(), 1);
        assert_eq!(store.get(&id).unwrap().status, MessageStatus::AwaitingConfirmation);
        assert!(!store.is_processed(&id));
        assert_eq!(store.pending().len(), 1);
    }

    #[test]
    fn test_expired_rejects_further_transitions() {
        let mut store = MessageStore::new();
        let id = MessageId::from("m1");
        store.insert_created(message("m1", MessageStatus::Created)).unwrap();
        store.mark_expired(&id).unwrap();
        assert_eq!(
            store.record_confirmation(&id, &"a".into()).unwrap_err(),
            RelayError::MessageExpired
        );
        assert_eq!(store.mark_processed(&id).unwrap_err(), RelayError::MessageExpired);
        assert!(store.pending().is_empty());
        assert_eq!(
            store.ensure_actionable(&MessageId::from("missing")).unwrap_err(),
            RelayError::NotFound
        );
    }

    #[test]
    fn test_expired_record_is_not_overwritten() {
        let mut store = MessageStore::new();
        let id = MessageId::from("m1");
        store.upsert_received(message("m1", MessageStatus::AwaitingConfirmation)).unwrap();
        store.mark_expired(&id).unwrap();

        let mut fresh = message("m1", MessageStatus::AwaitingConfirmation);
        fresh.timestamp = 10_000;
        assert_eq!(store.upsert_received(fresh).unwrap_err(), RelayError::MessageExpired);
        let stored = store.get(&id).unwrap();
        assert_eq!(stored.status, MessageStatus::Expired);
        assert_eq!(stored.timestamp, 100);
    }
}
