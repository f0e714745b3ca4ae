use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use log::{debug, error, info, warn};
use crate::{
    chains::{ChainConfig, ChainRegistry},
    clock::{Clock, SystemClock},
    config::{Config, EngineParams},
    decision_registry::DecisionRegistry,
    dispatch::{CoordinationHooks, DispatchError, DispatchReceipt, Dispatcher},
    events::{EventLog, RelayEvent},
    nonce::{content_hash, derive_message_id, NonceAllocator},
    participants::ParticipantRegistry,
    store::MessageStore,
    types::{Address, ChainId, CrossChainMessage, MessageId, MessageStatus, MessageType, NodeType, ReceivedMessage, RelayParticipant},
    verify::{AcceptAllVerifier, SourceProofVerifier},
    Error, RelayError, Result,
};

/// 一次分发尝试的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered(DispatchReceipt),
    Failed(DispatchError),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}

/// `receive` / `confirm` 的返回值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationOutcome {
    pub message_id: MessageId,
    pub confirmations: u32,
    /// 未达到法定确认数时为 `None`
    pub dispatch: Option<DispatchOutcome>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub dispatch_successes: u64,
    pub dispatch_failures: u64,
    pub active_participants: usize,
    pub total_escrowed: u128,
}

/// 跨链消息中继与确认共识引擎
///
/// 每个对外操作都以 `&mut self` 独占执行，要么完整提交，要么在校验失败时不留下任何状态变更。
pub struct RelayEngine {
    local_chain_id: ChainId,
    admin: Address,
    params: EngineParams,
    paused: bool,
    chains: ChainRegistry,
    participants: ParticipantRegistry,
    nonces: NonceAllocator,
    store: MessageStore,
    dispatcher: Dispatcher,
    verifier: Box<dyn SourceProofVerifier>,
    clock: Arc<dyn Clock>,
    events: EventLog,
    stats: EngineStats,
}

impl RelayEngine {
    pub fn new(local_chain_id: ChainId, admin: Address, registry: Arc<dyn DecisionRegistry>) -> Self {
        info!("Creating relay engine for chain {} (admin {})", local_chain_id, admin);
        Self {
            local_chain_id,
            admin,
            params: EngineParams::default(),
            paused: false,
            chains: ChainRegistry::new(local_chain_id),
            participants: ParticipantRegistry::new(),
            nonces: NonceAllocator::new(),
            store: MessageStore::new(),
            dispatcher: Dispatcher::new(registry),
            verifier: Box::new(AcceptAllVerifier),
            clock: Arc::new(SystemClock),
            events: EventLog::new(),
            stats: EngineStats::default(),
        }
    }

    /// 按配置构建引擎并注册配置中的远端链
    pub fn from_config(config: &Config, registry: Arc<dyn DecisionRegistry>, clock: Arc<dyn Clock>) -> std::result::Result<Self, Error> {
        let mut engine = Self::new(config.engine.local_chain_id, config.engine.admin.clone(), registry)
            .with_params(config.engine.params())
            .map_err(|e| Error::Config(e.to_string()))?
            .with_clock(clock);

        let admin = engine.admin.clone();
        for chain in &config.chains {
            engine
                .add_supported_chain(&admin, chain.id, &chain.name, chain.confirmation_blocks, &chain.bridge_reference)
                .map_err(|e| Error::Config(format!("Failed to register chain {}: {}", chain.id, e)))?;
            if !chain.enabled {
                engine
                    .set_chain_enabled(&admin, chain.id, false)
                    .map_err(|e| Error::Config(e.to_string()))?;
            }
        }
        Ok(engine)
    }

    pub fn with_params(mut self, params: EngineParams) -> Result<Self> {
        params.validate()?;
        self.params = params;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_verifier(mut self, verifier: Box<dyn SourceProofVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CoordinationHooks>) -> Self {
        self.dispatcher = self.dispatcher.with_hooks(hooks);
        self
    }

    fn emit(&mut self, event: RelayEvent) {
        let now = self.clock.now();
        self.events.append(now, event);
    }

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        if caller != &self.admin {
            warn!("Unauthorized admin call from {}", caller);
            return Err(RelayError::Unauthorized);
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.paused {
            return Err(RelayError::EnginePaused);
        }
        Ok(())
    }

    // ---- 链注册 ----

    pub fn add_supported_chain(
        &mut self,
        caller: &Address,
        chain_id: ChainId,
        name: &str,
        confirmation_blocks_required: u64,
        remote_bridge_reference: &str,
    ) -> Result<()> {
        self.ensure_admin(caller)?;
        self.chains
            .add(chain_id, name, confirmation_blocks_required, remote_bridge_reference)?;
        self.emit(RelayEvent::ChainAdded {
            chain_id,
            name: name.to_string(),
            confirmation_blocks: confirmation_blocks_required,
        });
        Ok(())
    }

    pub fn set_chain_enabled(&mut self, caller: &Address, chain_id: ChainId, enabled: bool) -> Result<()> {
        self.ensure_admin(caller)?;
        self.chains.set_enabled(chain_id, enabled)?;
        self.emit(RelayEvent::ChainStatusChanged { chain_id, enabled });
        Ok(())
    }

    pub fn is_chain_supported(&self, chain_id: ChainId) -> bool {
        self.chains.is_supported(chain_id)
    }

    // ---- 中继参与者 ----

    pub fn register(&mut self, caller: &Address, node_type: NodeType, stake: u128) -> Result<()> {
        let now = self.clock.now();
        self.participants
            .register(caller, node_type, stake, self.params.min_relay_stake, now)?;
        self.emit(RelayEvent::ParticipantRegistered {
            identity: caller.clone(),
            node_type,
            stake,
        });
        Ok(())
    }

    /// 停用参与者，返回全额退回的质押
    pub fn deactivate(&mut self, caller: &Address, identity: &Address) -> Result<u128> {
        self.ensure_admin(caller)?;
        let returned = self.participants.deactivate(identity)?;
        self.emit(RelayEvent::ParticipantDeactivated {
            identity: identity.clone(),
            stake_returned: returned,
        });
        Ok(returned)
    }

    // ---- 消息生命周期 ----

    /// 本链发出消息，状态为 `Created`
    pub fn send(
        &mut self,
        caller: &Address,
        target_chain_id: ChainId,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<MessageId> {
        self.ensure_running()?;
        self.chains.ensure_supported(target_chain_id)?;

        let now = self.clock.now();
        let nonce = self.nonces.allocate(caller)?;
        let message_id = derive_message_id(self.local_chain_id, target_chain_id, caller, nonce, now);
        let message = CrossChainMessage {
            message_id: message_id.clone(),
            source_chain_id: self.local_chain_id,
            target_chain_id,
            sender: caller.clone(),
            message_type: message_type.clone(),
            payload_hash: content_hash(&payload),
            payload,
            timestamp: now,
            nonce,
            confirmations: 0,
            confirmed_by: BTreeSet::new(),
            dispatch_attempts: 0,
            processed: false,
            status: MessageStatus::Created,
        };
        self.store.insert_created(message)?;
        self.stats.messages_sent += 1;

        info!("Message {} sent to chain {} (nonce {})", message_id, target_chain_id, nonce);
        self.emit(RelayEvent::MessageSent {
            message_id: message_id.clone(),
            source_chain_id: self.local_chain_id,
            target_chain_id,
            sender: caller.clone(),
            message_type,
        });
        Ok(message_id)
    }

    /// 中继提交远端消息，提交者计为第一个确认
    pub async fn receive(&mut self, caller: &Address, received: ReceivedMessage) -> Result<ConfirmationOutcome> {
        self.ensure_running()?;
        self.participants.ensure_active(caller)?;
        self.chains.ensure_supported(received.source_chain_id)?;

        if self.store.is_processed(&received.message_id) {
            warn!("Rejecting replay of processed message {}", received.message_id);
            return Err(RelayError::AlreadyProcessed);
        }
        let now = self.clock.now();
        if let Some(existing) = self.store.get(&received.message_id) {
            // 已过期的记录不可被重新提交覆盖
            if existing.status == MessageStatus::Expired {
                warn!("Rejecting resubmission of expired message {}", received.message_id);
                return Err(RelayError::MessageExpired);
            }
            if existing.is_timed_out(now, self.params.message_timeout) {
                return self.expire(&received.message_id);
            }
        }
        if now > received.origin_timestamp.saturating_add(self.params.message_timeout) {
            warn!("Rejecting expired message {} (origin {})", received.message_id, received.origin_timestamp);
            return Err(RelayError::MessageExpired);
        }
        self.verifier.verify(&received, self.local_chain_id)?;

        let message_id = received.message_id.clone();
        let mut confirmed_by = BTreeSet::new();
        confirmed_by.insert(caller.clone());
        let message = CrossChainMessage {
            message_id: message_id.clone(),
            source_chain_id: received.source_chain_id,
            target_chain_id: self.local_chain_id,
            sender: received.sender.clone(),
            message_type: received.message_type,
            payload_hash: content_hash(&received.payload),
            payload: received.payload,
            timestamp: received.origin_timestamp,
            nonce: received.origin_nonce,
            confirmations: 1,
            confirmed_by,
            dispatch_attempts: 0,
            processed: false,
            status: MessageStatus::AwaitingConfirmation,
        };
        self.store.upsert_received(message)?;
        self.stats.messages_received += 1;

        info!("Message {} received from chain {} via {}", message_id, received.source_chain_id, caller);
        self.emit(RelayEvent::MessageReceived {
            message_id: message_id.clone(),
            source_chain_id: received.source_chain_id,
            sender: received.sender,
            relayer: caller.clone(),
        });

        let dispatch = self.maybe_dispatch(&message_id, caller, 1).await;
        Ok(ConfirmationOutcome {
            message_id,
            confirmations: 1,
            dispatch,
        })
    }

    /// 增加一个确认；达到法定确认数且尚未处理时自动分发
    pub async fn confirm(&mut self, caller: &Address, message_id: &MessageId) -> Result<ConfirmationOutcome> {
        self.ensure_running()?;
        self.participants.ensure_active(caller)?;

        let now = self.clock.now();
        let timed_out = self
            .store
            .ensure_actionable(message_id)?
            .is_timed_out(now, self.params.message_timeout);
        if timed_out {
            return self.expire(message_id);
        }

        let confirmations = self.store.record_confirmation(message_id, caller)?;
        debug!("Message {} has {} confirmations", message_id, confirmations);
        self.emit(RelayEvent::MessageConfirmed {
            message_id: message_id.clone(),
            participant: caller.clone(),
            confirmations,
        });

        let dispatch = self.maybe_dispatch(message_id, caller, confirmations).await;
        Ok(ConfirmationOutcome {
            message_id: message_id.clone(),
            confirmations,
            dispatch,
        })
    }

    /// 过期在下一次引用该消息时落定，之后不再有任何转换
    fn expire<T>(&mut self, message_id: &MessageId) -> Result<T> {
        self.store.mark_expired(message_id)?;
        warn!("Message {} expired before reaching quorum", message_id);
        self.emit(RelayEvent::MessageExpired {
            message_id: message_id.clone(),
        });
        Err(RelayError::MessageExpired)
    }

    async fn maybe_dispatch(&mut self, message_id: &MessageId, relayer: &Address, confirmations: u32) -> Option<DispatchOutcome> {
        if confirmations < self.params.min_confirmations || self.store.is_processed(message_id) {
            return None;
        }
        let message = self.store.get(message_id)?.clone();

        let outcome = match self.dispatcher.dispatch(&message).await {
            Ok(receipt) => {
                if let Err(e) = self.store.mark_processed(message_id) {
                    error!("Failed to mark message {} processed: {}", message_id, e);
                    return Some(DispatchOutcome::Failed(DispatchError::Downstream(e.to_string())));
                }
                self.stats.dispatch_successes += 1;
                self.participants.record_relay(relayer, true);
                info!("Message {} processed", message_id);
                self.emit(RelayEvent::MessageProcessed {
                    message_id: message_id.clone(),
                    message_type: message.message_type.clone(),
                });
                DispatchOutcome::Delivered(receipt)
            }
            Err(err) => {
                // 失败不标记已处理，后续确认会再次尝试
                match self.store.mark_dispatch_failed(message_id) {
                    Ok(attempts) => warn!("Dispatch attempt {} for {} failed: {}", attempts, message_id, err),
                    Err(e) => error!("Failed to record dispatch failure for {}: {}", message_id, e),
                }
                self.stats.dispatch_failures += 1;
                self.participants.record_relay(relayer, false);
                self.emit(RelayEvent::DispatchFailed {
                    message_id: message_id.clone(),
                    reason: err.to_string(),
                });
                DispatchOutcome::Failed(err)
            }
        };
        Some(outcome)
    }

    // ---- 管理操作 ----

    pub fn pause(&mut self, caller: &Address) -> Result<()> {
        self.ensure_admin(caller)?;
        if !self.paused {
            self.paused = true;
            warn!("Relay engine paused by {}", caller);
            self.emit(RelayEvent::Paused { by: caller.clone() });
        }
        Ok(())
    }

    pub fn unpause(&mut self, caller: &Address) -> Result<()> {
        self.ensure_admin(caller)?;
        if self.paused {
            self.paused = false;
            info!("Relay engine unpaused by {}", caller);
            self.emit(RelayEvent::Unpaused { by: caller.clone() });
        }
        Ok(())
    }

    pub fn set_min_confirmations(&mut self, caller: &Address, value: u32) -> Result<()> {
        self.ensure_admin(caller)?;
        EngineParams::check_min_confirmations(value)?;
        self.params.min_confirmations = value;
        self.parameter_updated("min_confirmations", value.to_string());
        Ok(())
    }

    pub fn set_message_timeout(&mut self, caller: &Address, secs: u64) -> Result<()> {
        self.ensure_admin(caller)?;
        EngineParams::check_message_timeout(secs)?;
        self.params.message_timeout = secs;
        self.parameter_updated("message_timeout", secs.to_string());
        Ok(())
    }

    pub fn set_min_relay_stake(&mut self, caller: &Address, stake: u128) -> Result<()> {
        self.ensure_admin(caller)?;
        EngineParams::check_min_relay_stake(stake)?;
        self.params.min_relay_stake = stake;
        self.parameter_updated("min_relay_stake", stake.to_string());
        Ok(())
    }

    fn parameter_updated(&mut self, name: &str, value: String) {
        info!("Parameter {} set to {}", name, value);
        self.emit(RelayEvent::ParameterUpdated {
            name: name.to_string(),
            value,
        });
    }

    // ---- 查询 ----

    pub fn local_chain_id(&self) -> ChainId {
        self.local_chain_id
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    pub fn params(&self) -> EngineParams {
        self.params
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn message(&self, message_id: &MessageId) -> Option<&CrossChainMessage> {
        self.store.get(message_id)
    }

    pub fn is_processed(&self, message_id: &MessageId) -> bool {
        self.store.is_processed(message_id)
    }

    pub fn processed_ids(&self) -> Vec<MessageId> {
        self.store.ledger().iter().cloned().collect()
    }

    pub fn pending_messages(&self) -> Vec<&CrossChainMessage> {
        self.store.pending()
    }

    pub fn participant(&self, identity: &Address) -> Option<&RelayParticipant> {
        self.participants.get(identity)
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.get(chain_id)
    }

    pub fn chains(&self) -> Vec<&ChainConfig> {
        self.chains.iter().collect()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_participants: self.participants.active_count(),
            total_escrowed: self.participants.total_escrowed(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::decision_registry::{GovernanceProposal, InMemoryDecisionRegistry};
    use crate::dispatch::encode_payload;
    use crate::verify::MessageIdBindingVerifier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const LOCAL: ChainId = 1;
    const REMOTE: ChainId = 7;
    const STAKE: u128 = 1_000;
    const START: u64 = 1_700_000_000;

    fn admin() -> Address {
        Address::from("admin")
    }

    fn setup() -> (RelayEngine, Arc<ManualClock>, Arc<InMemoryDecisionRegistry>) {
        let clock = Arc::new(ManualClock::new(START));
        let registry = Arc::new(InMemoryDecisionRegistry::new());
        let mut engine = RelayEngine::new(LOCAL, admin(), registry.clone())
            .with_params(EngineParams {
                min_relay_stake: STAKE,
                ..EngineParams::default()
            })
            .unwrap()
            .with_clock(clock.clone());
        engine.add_supported_chain(&admin(), REMOTE, "TestChain", 2, "bridge.test").unwrap();
        for name in ["a", "b", "c"] {
            engine.register(&Address::from(name), NodeType::Validator, STAKE).unwrap();
        }
        (engine, clock, registry)
    }

    fn received(id: &str, message_type: MessageType, payload: Vec<u8>, origin_timestamp: u64) -> ReceivedMessage {
        ReceivedMessage {
            message_id: MessageId::from(id),
            source_chain_id: REMOTE,
            sender: Address::from("remote-agent"),
            message_type,
            payload,
            origin_timestamp,
            origin_nonce: 1,
            proof: vec![],
        }
    }

    #[test]
    fn test_admin_only_operations() {
        let (mut engine, _, _) = setup();
        let mallory = Address::from("mallory");
        assert_eq!(engine.add_supported_chain(&mallory, 9, "X", 1, "r"), Err(RelayError::Unauthorized));
        assert_eq!(engine.pause(&mallory), Err(RelayError::Unauthorized));
        assert_eq!(engine.deactivate(&mallory, &Address::from("a")), Err(RelayError::Unauthorized));
        assert_eq!(engine.set_min_confirmations(&mallory, 3), Err(RelayError::Unauthorized));
        assert_eq!(engine.add_supported_chain(&admin(), LOCAL, "Self", 1, "r"), Err(RelayError::InvalidChain(LOCAL)));
        assert!(!engine.is_paused());
    }

    #[test]
    fn test_send_creates_message() {
        let (mut engine, _, _) = setup();
        let alice = Address::from("alice");
        let id = engine.send(&alice, REMOTE, MessageType::TrustUpdate, vec![1, 2]).unwrap();
        let message = engine.message(&id).unwrap();
        assert_eq!(message.status, MessageStatus::Created);
        assert_eq!(message.confirmations, 0);
        assert_eq!(message.source_chain_id, LOCAL);
        assert_eq!(message.nonce, 1);
        assert_eq!(message.payload_hash, content_hash(&[1, 2]));

        let second = engine.send(&alice, REMOTE, MessageType::TrustUpdate, vec![1, 2]).unwrap();
        assert_ne!(id, second);
        assert_eq!(engine.message(&second).unwrap().nonce, 2);
        assert_eq!(
            engine.send(&alice, 99, MessageType::TrustUpdate, vec![]),
            Err(RelayError::InvalidChain(99))
        );
        assert!(matches!(
            engine.events().records().last().unwrap().event,
            RelayEvent::MessageSent { .. }
        ));
    }

    #[tokio::test]
    async fn test_quorum_triggers_single_dispatch() {
        let (mut engine, _, _) = setup();
        let id = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();

        let first = engine.confirm(&Address::from("a"), &id).await.unwrap();
        assert_eq!(first.confirmations, 1);
        assert!(first.dispatch.is_none());
        assert!(!engine.is_processed(&id));

        let second = engine.confirm(&Address::from("b"), &id).await.unwrap();
        assert_eq!(second.confirmations, 2);
        assert_eq!(second.dispatch, Some(DispatchOutcome::Delivered(DispatchReceipt::TrustUpdated)));
        assert!(engine.is_processed(&id));
        assert_eq!(engine.message(&id).unwrap().status, MessageStatus::Processed);
        assert_eq!(engine.participant(&Address::from("b")).unwrap().successful_relays, 1);

        assert_eq!(engine.confirm(&Address::from("c"), &id).await, Err(RelayError::AlreadyProcessed));
        assert_eq!(engine.stats().dispatch_successes, 1);
        assert_eq!(engine.message(&id).unwrap().confirmations, 2);
    }

    #[tokio::test]
    async fn test_duplicate_confirmation_rejected() {
        let (mut engine, _, _) = setup();
        let id = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();
        engine.confirm(&Address::from("a"), &id).await.unwrap();
        assert_eq!(engine.confirm(&Address::from("a"), &id).await, Err(RelayError::DuplicateConfirmation));
        assert_eq!(engine.message(&id).unwrap().confirmations, 1);
        assert_eq!(
            engine.confirm(&Address::from("a"), &MessageId::from("0xmissing")).await,
            Err(RelayError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_receive_with_governance_payload() {
        let (mut engine, _, registry) = setup();
        let payload = encode_payload(&GovernanceProposal {
            proposal_type: "system_upgrade".to_string(),
            content_hash: [4u8; 32],
        })
        .unwrap();

        let outcome = engine
            .receive(&Address::from("a"), received("0x01", MessageType::GovernanceProposal, payload, START - 10))
            .await
            .unwrap();
        assert_eq!(outcome.confirmations, 1);
        assert!(outcome.dispatch.is_none());

        let outcome = engine.confirm(&Address::from("b"), &MessageId::from("0x01")).await.unwrap();
        assert_eq!(
            outcome.dispatch,
            Some(DispatchOutcome::Delivered(DispatchReceipt::ProposalCreated {
                proposal_id: "proposal-1".to_string()
            }))
        );
        assert_eq!(registry.proposals().await.len(), 1);

        // 重放已处理的消息
        let replay = engine
            .receive(&Address::from("c"), received("0x01", MessageType::GovernanceProposal, vec![], START))
            .await;
        assert_eq!(replay, Err(RelayError::AlreadyProcessed));
    }

    #[tokio::test]
    async fn test_receive_rejections() {
        let (mut engine, _, _) = setup();
        let outsider = Address::from("outsider");
        let msg = received("0x02", MessageType::TrustUpdate, vec![], START);
        assert_eq!(engine.receive(&outsider, msg.clone()).await, Err(RelayError::Unauthorized));

        let mut wrong_chain = msg.clone();
        wrong_chain.source_chain_id = 99;
        assert_eq!(engine.receive(&Address::from("a"), wrong_chain).await, Err(RelayError::InvalidChain(99)));

        let stale = received("0x03", MessageType::TrustUpdate, vec![], START - 3_601);
        assert_eq!(engine.receive(&Address::from("a"), stale).await, Err(RelayError::MessageExpired));
        assert!(engine.message(&MessageId::from("0x03")).is_none());

        let boundary = received("0x04", MessageType::TrustUpdate, vec![], START - 3_600);
        assert!(engine.receive(&Address::from("a"), boundary).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_on_confirm() {
        let (mut engine, clock, _) = setup();
        let id = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();
        engine.confirm(&Address::from("a"), &id).await.unwrap();

        clock.advance(3_601);
        assert_eq!(engine.confirm(&Address::from("b"), &id).await, Err(RelayError::MessageExpired));
        assert_eq!(engine.message(&id).unwrap().status, MessageStatus::Expired);
        assert_eq!(engine.confirm(&Address::from("c"), &id).await, Err(RelayError::MessageExpired));
        assert!(!engine.is_processed(&id));
        assert!(engine.pending_messages().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_retries_until_success() {
        struct FlakyHooks {
            failures_left: AtomicU32,
        }

        #[async_trait]
        impl CoordinationHooks for FlakyHooks {
            async fn on_emergency(&self, _message: &CrossChainMessage) -> std::result::Result<(), Error> {
                if self.failures_left.load(Ordering::SeqCst) > 0 {
                    self.failures_left.fetch_sub(1, Ordering::SeqCst);
                    return Err(Error::Network("coordinator offline".to_string()));
                }
                Ok(())
            }
        }

        let (engine, _, _) = setup();
        let mut engine = engine.with_hooks(Arc::new(FlakyHooks {
            failures_left: AtomicU32::new(1),
        }));
        let id = engine
            .send(&Address::from("alice"), REMOTE, MessageType::EmergencyCoordination, vec![])
            .unwrap();
        engine.confirm(&Address::from("a"), &id).await.unwrap();

        let failed = engine.confirm(&Address::from("b"), &id).await.unwrap();
        assert!(matches!(failed.dispatch, Some(DispatchOutcome::Failed(DispatchError::Downstream(_)))));
        let message = engine.message(&id).unwrap();
        assert_eq!(message.status, MessageStatus::AwaitingConfirmation);
        assert_eq!(message.dispatch_attempts, 1);
        assert_eq!(engine.participant(&Address::from("b")).unwrap().failed_relays, 1);

        let retried = engine.confirm(&Address::from("c"), &id).await.unwrap();
        assert_eq!(retried.dispatch, Some(DispatchOutcome::Delivered(DispatchReceipt::EmergencyHandled)));
        assert!(engine.is_processed(&id));
        assert_eq!(engine.stats().dispatch_failures, 1);
        assert_eq!(engine.stats().dispatch_successes, 1);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_block_pipeline() {
        let (mut engine, _, _) = setup();
        let bad = engine
            .send(&Address::from("alice"), REMOTE, MessageType::ConsensusDecision, vec![0xff])
            .unwrap();
        let good = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();

        engine.confirm(&Address::from("a"), &bad).await.unwrap();
        let outcome = engine.confirm(&Address::from("b"), &bad).await.unwrap();
        assert!(matches!(outcome.dispatch, Some(DispatchOutcome::Failed(DispatchError::MalformedPayload(_)))));

        engine.confirm(&Address::from("a"), &good).await.unwrap();
        let outcome = engine.confirm(&Address::from("b"), &good).await.unwrap();
        assert!(outcome.dispatch.unwrap().is_delivered());
        assert_eq!(engine.processed_ids(), vec![good]);
    }

    #[tokio::test]
    async fn test_pause_blocks_message_operations() {
        let (mut engine, _, _) = setup();
        let id = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();
        engine.confirm(&Address::from("a"), &id).await.unwrap();

        engine.pause(&admin()).unwrap();
        assert_eq!(
            engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]),
            Err(RelayError::EnginePaused)
        );
        assert_eq!(engine.confirm(&Address::from("b"), &id).await, Err(RelayError::EnginePaused));
        assert_eq!(
            engine
                .receive(&Address::from("a"), received("0x09", MessageType::TrustUpdate, vec![], START))
                .await,
            Err(RelayError::EnginePaused)
        );
        assert_eq!(engine.message(&id).unwrap().confirmations, 1);

        engine.unpause(&admin()).unwrap();
        let outcome = engine.confirm(&Address::from("b"), &id).await.unwrap();
        assert!(outcome.dispatch.unwrap().is_delivered());
    }

    #[tokio::test]
    async fn test_deactivated_participant_cannot_confirm() {
        let (mut engine, _, _) = setup();
        let returned = engine.deactivate(&admin(), &Address::from("a")).unwrap();
        assert_eq!(returned, STAKE);
        assert_eq!(engine.stats().total_escrowed, 2 * STAKE);
        assert_eq!(engine.deactivate(&admin(), &Address::from("a")), Err(RelayError::NotActive));

        let id = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();
        assert_eq!(engine.confirm(&Address::from("a"), &id).await, Err(RelayError::Unauthorized));
    }

    #[tokio::test]
    async fn test_tunable_parameters() {
        let (mut engine, _, _) = setup();
        assert!(matches!(engine.set_min_confirmations(&admin(), 0), Err(RelayError::InvalidParameter(_))));
        engine.set_min_confirmations(&admin(), 1).unwrap();

        let id = engine.send(&Address::from("alice"), REMOTE, MessageType::TrustUpdate, vec![]).unwrap();
        let outcome = engine.confirm(&Address::from("a"), &id).await.unwrap();
        assert!(outcome.dispatch.unwrap().is_delivered());

        engine.set_min_relay_stake(&admin(), 10 * STAKE).unwrap();
        assert_eq!(
            engine.register(&Address::from("d"), NodeType::Agent, STAKE),
            Err(RelayError::InsufficientStake { provided: STAKE, required: 10 * STAKE })
        );
        assert!(engine.set_message_timeout(&admin(), 30).is_err());
        engine.set_message_timeout(&admin(), 120).unwrap();
        assert_eq!(engine.params().message_timeout, 120);
    }

    #[tokio::test]
    async fn test_receive_overwrites_unprocessed_record() {
        let (mut engine, _, _) = setup();
        engine.set_min_confirmations(&admin(), 3).unwrap();
        let id = MessageId::from("0x10");
        engine
            .receive(&Address::from("a"), received("0x10", MessageType::TrustUpdate, vec![1], START - 5))
            .await
            .unwrap();
        let outcome = engine.confirm(&Address::from("b"), &id).await.unwrap();
        assert_eq!(outcome.confirmations, 2);
        assert!(outcome.dispatch.is_none());

        let mut resubmitted = received("0x10", MessageType::TrustUpdate, vec![9, 9], START);
        resubmitted.sender = Address::from("other-agent");
        let outcome = engine.receive(&Address::from("c"), resubmitted).await.unwrap();
        assert_eq!(outcome.confirmations, 1);
        assert!(outcome.dispatch.is_none());

        let stored = engine.message(&id).unwrap();
        assert_eq!(stored.confirmations, 1);
        assert_eq!(stored.confirmed_by, BTreeSet::from([Address::from("c")]));
        assert_eq!(stored.payload, vec![9, 9]);
        assert_eq!(stored.payload_hash, content_hash(&[9, 9]));
        assert_eq!(stored.sender, Address::from("other-agent"));
        assert_eq!(stored.status, MessageStatus::AwaitingConfirmation);

        assert!(engine.confirm(&Address::from("a"), &id).await.unwrap().dispatch.is_none());
        let outcome = engine.confirm(&Address::from("b"), &id).await.unwrap();
        assert_eq!(outcome.confirmations, 3);
        assert_eq!(outcome.dispatch, Some(DispatchOutcome::Delivered(DispatchReceipt::TrustUpdated)));
    }

    #[tokio::test]
    async fn test_expired_message_cannot_be_resubmitted() {
        let (mut engine, clock, _) = setup();
        let id = MessageId::from("0x11");
        engine
            .receive(&Address::from("a"), received("0x11", MessageType::TrustUpdate, vec![], START))
            .await
            .unwrap();
        clock.advance(3_601);
        assert_eq!(engine.confirm(&Address::from("b"), &id).await, Err(RelayError::MessageExpired));
        assert_eq!(engine.message(&id).unwrap().status, MessageStatus::Expired);

        let fresh = received("0x11", MessageType::TrustUpdate, vec![], clock.now());
        assert_eq!(engine.receive(&Address::from("c"), fresh).await, Err(RelayError::MessageExpired));
        let stored = engine.message(&id).unwrap();
        assert_eq!(stored.status, MessageStatus::Expired);
        assert_eq!(stored.timestamp, START);
        assert_eq!(engine.confirm(&Address::from("c"), &id).await, Err(RelayError::MessageExpired));
        assert!(!engine.is_processed(&id));
        assert_eq!(engine.stats().dispatch_successes, 0);
    }

    #[tokio::test]
    async fn test_receive_settles_expiry_of_stale_record() {
        let (mut engine, clock, _) = setup();
        let id = MessageId::from("0x12");
        engine
            .receive(&Address::from("a"), received("0x12", MessageType::TrustUpdate, vec![], START))
            .await
            .unwrap();
        clock.advance(3_601);

        let fresh = received("0x12", MessageType::TrustUpdate, vec![], clock.now());
        assert_eq!(engine.receive(&Address::from("b"), fresh).await, Err(RelayError::MessageExpired));
        assert_eq!(engine.message(&id).unwrap().status, MessageStatus::Expired);
        assert!(matches!(
            &engine.events().records().last().unwrap().event,
            RelayEvent::MessageExpired { message_id } if message_id == &id
        ));
        assert!(engine.pending_messages().is_empty());
    }

    #[tokio::test]
    async fn test_binding_verifier_rejects_forged_id() {
        let (engine, _, _) = setup();
        let mut engine = engine.with_verifier(Box::new(MessageIdBindingVerifier));
        let forged = received("0xforged", MessageType::TrustUpdate, vec![], START);
        assert!(matches!(
            engine.receive(&Address::from("a"), forged).await,
            Err(RelayError::InvalidProof(_))
        ));

        let sender = Address::from("remote-agent");
        let id = derive_message_id(REMOTE, LOCAL, &sender, 1, START);
        let mut genuine = received("", MessageType::TrustUpdate, vec![], START);
        genuine.message_id = id.clone();
        engine.receive(&Address::from("a"), genuine).await.unwrap();
        assert_eq!(engine.message(&id).unwrap().status, MessageStatus::AwaitingConfirmation);
    }
}
