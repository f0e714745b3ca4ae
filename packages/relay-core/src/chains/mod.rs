use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use log::{debug, info, warn};
use crate::{types::ChainId, RelayError, Result};

/// 远端链配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub confirmation_blocks_required: u64,
    pub enabled: bool,
    pub remote_bridge_reference: String,
}

/// 支持的远端链注册表
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    local_chain_id: ChainId,
    chains: BTreeMap<ChainId, ChainConfig>,
}

impl ChainRegistry {
    pub fn new(local_chain_id: ChainId) -> Self {
        Self {
            local_chain_id,
            chains: BTreeMap::new(),
        }
    }

    /// 注册远端链；本链 ID 与重复注册都会被拒绝
    pub fn add(
        &mut self,
        chain_id: ChainId,
        name: &str,
        confirmation_blocks_required: u64,
        remote_bridge_reference: &str,
    ) -> Result<&ChainConfig> {
        if chain_id == self.local_chain_id {
            warn!("Refusing to register local chain {} as remote", chain_id);
            return Err(RelayError::InvalidChain(chain_id));
        }
        if self.chains.contains_key(&chain_id) {
            warn!("Chain {} is already registered", chain_id);
            return Err(RelayError::InvalidChain(chain_id));
        }

        let config = ChainConfig {
            chain_id,
            chain_name: name.to_string(),
            confirmation_blocks_required,
            enabled: true,
            remote_bridge_reference: remote_bridge_reference.to_string(),
        };
        info!("Registered chain {} ({})", name, chain_id);
        Ok(&*self.chains.entry(chain_id).or_insert(config))
    }

    pub fn set_enabled(&mut self, chain_id: ChainId, enabled: bool) -> Result<()> {
        let chain = self
            .chains
            .get_mut(&chain_id)
            .ok_or(RelayError::InvalidChain(chain_id))?;
        chain.enabled = enabled;
        debug!("Chain {} enabled={}", chain_id, enabled);
        Ok(())
    }

    pub fn is_supported(&self, chain_id: ChainId) -> bool {
        self.chains.get(&chain_id).map(|c| c.enabled).unwrap_or(false)
    }

    pub fn ensure_supported(&self, chain_id: ChainId) -> Result<()> {
        if self.is_supported(chain_id) {
            Ok(())
        } else {
            Err(RelayError::InvalidChain(chain_id))
        }
    }

    pub fn get(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.get(&chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut registry = ChainRegistry::new(1);
        registry.add(7, "TestChain", 2, "0xbridge").unwrap();
        assert!(registry.is_supported(7));
        assert!(!registry.is_supported(8));
        assert_eq!(registry.get(7).unwrap().chain_name, "TestChain");
    }

    #[test]
    fn test_rejects_local_and_duplicate() {
        let mut registry = ChainRegistry::new(1);
        assert_eq!(
            registry.add(1, "Self", 1, "ref").unwrap_err(),
            RelayError::InvalidChain(1)
        );
        registry.add(7, "TestChain", 2, "ref").unwrap();
        assert_eq!(
            registry.add(7, "Again", 3, "ref").unwrap_err(),
            RelayError::InvalidChain(7)
        );
        assert_eq!(registry.get(7).unwrap().confirmation_blocks_required, 2);
    }

    #[test]
    fn test_disabled_chain_is_unsupported() {
        let mut registry = ChainRegistry::new(1);
        registry.add(137, "Polygon", 20, "ref").unwrap();
        registry.set_enabled(137, false).unwrap();
        assert!(!registry.is_supported(137));
        assert!(registry.ensure_supported(137).is_err());
        assert!(registry.set_enabled(5, true).is_err());
    }
}
