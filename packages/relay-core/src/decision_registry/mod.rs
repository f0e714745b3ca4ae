use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use log::info;
use crate::{types::Hash32, Error};

pub mod rpc;

pub use rpc::RpcDecisionRegistry;

/// 最终共识决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub request_id: String,
    pub decision_type: String,
    pub final_decision: String,
    /// 置信度，基点（0..=10000）
    pub confidence: u64,
    pub participating_agents: Vec<String>,
    pub proof_hash: Hash32,
}

/// 治理提案
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceProposal {
    pub proposal_type: String,
    pub content_hash: Hash32,
}

/// 外部决策登记系统
#[async_trait]
pub trait DecisionRegistry: Send + Sync {
    /// 记录共识决策
    async fn record_consensus_decision(&self, decision: &ConsensusDecision) -> Result<(), Error>;

    /// 创建治理提案，返回提案 ID
    async fn create_proposal(&self, proposal: &GovernanceProposal) -> Result<String, Error>;
}

/// 内存实现，供 CLI 回放和测试使用
#[derive(Debug, Default)]
pub struct InMemoryDecisionRegistry {
    decisions: RwLock<Vec<ConsensusDecision>>,
    proposals: RwLock<Vec<(String, GovernanceProposal)>>,
}

impl InMemoryDecisionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decisions(&self) -> Vec<ConsensusDecision> {
        self.decisions.read().await.clone()
    }

    pub async fn proposals(&self) -> Vec<(String, GovernanceProposal)> {
        self.proposals.read().await.clone()
    }
}

#[async_trait]
impl DecisionRegistry for InMemoryDecisionRegistry {
    async fn record_consensus_decision(&self, decision: &ConsensusDecision) -> Result<(), Error> {
        info!("Recording consensus decision {}", decision.request_id);
        self.decisions.write().await.push(decision.clone());
        Ok(())
    }

    async fn create_proposal(&self, proposal: &GovernanceProposal) -> Result<String, Error> {
        let mut proposals = self.proposals.write().await;
        let proposal_id = format!("proposal-{}", proposals.len() + 1);
        info!("Created proposal {} ({})", proposal_id, proposal.proposal_type);
        proposals.push((proposal_id.clone(), proposal.clone()));
        Ok(proposal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_registry() {
        tokio_test::block_on(async {
            let registry = InMemoryDecisionRegistry::new();
            let proposal = GovernanceProposal {
                proposal_type: "system_upgrade".to_string(),
                content_hash: [7u8; 32],
            };
            assert_eq!(registry.create_proposal(&proposal).await.unwrap(), "proposal-1");
            assert_eq!(registry.create_proposal(&proposal).await.unwrap(), "proposal-2");

            let decision = ConsensusDecision {
                request_id: "req-1".to_string(),
                decision_type: "access".to_string(),
                final_decision: "allow".to_string(),
                confidence: 9_000,
                participating_agents: vec!["neutral".to_string(), "strict".to_string()],
                proof_hash: [1u8; 32],
            };
            registry.record_consensus_decision(&decision).await.unwrap();
            assert_eq!(registry.decisions().await, vec![decision]);
            assert_eq!(registry.proposals().await.len(), 2);
        });
    }
}
