use std::collections::HashMap;
use log::{info, warn};
use crate::{
    types::{Address, NodeType, RelayParticipant},
    RelayError, Result,
};

/// 质押中继参与者注册表
///
/// 质押只在注册时托管、在停用时全额退回，确认与分发逻辑从不修改质押。
#[derive(Debug, Default, Clone)]
pub struct ParticipantRegistry {
    participants: HashMap<Address, RelayParticipant>,
    total_escrowed: u128,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        identity: &Address,
        node_type: NodeType,
        stake: u128,
        min_stake: u128,
        now: u64,
    ) -> Result<&RelayParticipant> {
        if stake < min_stake {
            warn!("Stake {} from {} below minimum {}", stake, identity, min_stake);
            return Err(RelayError::InsufficientStake {
                provided: stake,
                required: min_stake,
            });
        }
        if self.is_active(identity) {
            return Err(RelayError::AlreadyRegistered);
        }
        let total_escrowed = self
            .total_escrowed
            .checked_add(stake)
            .ok_or_else(|| RelayError::InvalidParameter("escrow overflow".to_string()))?;

        // 停用后重新注册会覆盖旧记录，计数器归零
        let participant = RelayParticipant {
            identity: identity.clone(),
            node_type,
            stake,
            active: true,
            successful_relays: 0,
            failed_relays: 0,
            registered_at: now,
        };
        self.total_escrowed = total_escrowed;
        self.participants.insert(identity.clone(), participant);
        info!("Registered relay participant {} ({:?}) with stake {}", identity, node_type, stake);

        self.participants
            .get(identity)
            .ok_or(RelayError::NotFound)
    }

    /// 停用参与者并返回退回的质押数额
    pub fn deactivate(&mut self, identity: &Address) -> Result<u128> {
        let participant = self
            .participants
            .get_mut(identity)
            .filter(|p| p.active)
            .ok_or(RelayError::NotActive)?;

        let returned = participant.stake;
        participant.stake = 0;
        participant.active = false;
        self.total_escrowed = self.total_escrowed.saturating_sub(returned);
        info!("Deactivated relay participant {}, returned stake {}", identity, returned);
        Ok(returned)
    }

    pub fn is_active(&self, identity: &Address) -> bool {
        self.participants
            .get(identity)
            .map(|p| p.active)
            .unwrap_or(false)
    }

    /// 非活跃参与者调用参与者专属操作时返回 `Unauthorized`
    pub fn ensure_active(&self, identity: &Address) -> Result<()> {
        if self.is_active(identity) {
            Ok(())
        } else {
            Err(RelayError::Unauthorized)
        }
    }

    pub fn record_relay(&mut self, identity: &Address, success: bool) {
        if let Some(participant) = self.participants.get_mut(identity) {
            if success {
                participant.successful_relays += 1;
            } else {
                participant.failed_relays += 1;
            }
        }
    }

    pub fn get(&self, identity: &Address) -> Option<&RelayParticipant> {
        self.participants.get(identity)
    }

    pub fn active_count(&self) -> usize {
        self.participants.values().filter(|p| p.active).count()
    }

    pub fn total_escrowed(&self) -> u128 {
        self.total_escrowed
    }
}
