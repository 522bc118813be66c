use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{aptos::AptosPlugin, injective::InjectivePlugin, mock::MockPlugin, sonic::SonicPlugin};
use super::ChainPlugin;
use crate::config::ChainEndpoints;
use crate::error::Error;
use crate::models::Chain;
use crate::Result;

/// Maps a chain to its capability object. Registration is last-writer-wins,
/// so calling [`PluginRegistry::initialize`] twice is harmless.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<Chain, Arc<dyn ChainPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Register the built-in plugins against the configured endpoints.
    pub fn initialize(&self, endpoints: &ChainEndpoints) {
        self.register(
            Chain::Injective,
            Arc::new(InjectivePlugin::new(endpoints.injective.clone())),
        );
        self.register(
            Chain::Aptos,
            Arc::new(AptosPlugin::new(endpoints.aptos.clone())),
        );
        self.register(
            Chain::Sonic,
            Arc::new(SonicPlugin::new(endpoints.sonic.clone())),
        );
        self.register(Chain::Mock, Arc::new(MockPlugin::new()));

        tracing::info!("Plugin registry initialized with {} chains", self.len());
    }

    pub fn register(&self, chain: Chain, plugin: Arc<dyn ChainPlugin>) {
        self.write().insert(chain, plugin);
        tracing::debug!(chain = %chain, "Registered chain plugin");
    }

    pub fn get(&self, chain: Chain) -> Result<Arc<dyn ChainPlugin>> {
        self.read()
            .get(&chain)
            .cloned()
            .ok_or(Error::UnknownChain(chain))
    }

    pub fn contains(&self, chain: Chain) -> bool {
        self.read().contains_key(&chain)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Chain, Arc<dyn ChainPlugin>>> {
        match self.plugins.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Chain, Arc<dyn ChainPlugin>>> {
        match self.plugins.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unregistered_chain_fails() {
        let registry = PluginRegistry::new();
        let err = registry.get(Chain::Injective).unwrap_err();
        assert!(matches!(err, Error::UnknownChain(Chain::Injective)));
    }

    #[test]
    fn test_initialize_registers_all_chains() {
        let registry = PluginRegistry::new();
        registry.initialize(&ChainEndpoints::default());

        for chain in [Chain::Injective, Chain::Aptos, Chain::Sonic, Chain::Mock] {
            assert!(registry.contains(chain), "missing plugin for {}", chain);
        }
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let registry = PluginRegistry::new();
        registry.initialize(&ChainEndpoints::default());
        registry.initialize(&ChainEndpoints::default());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_reregister_last_writer_wins() {
        let registry = PluginRegistry::new();
        registry.register(Chain::Mock, Arc::new(MockPlugin::new()));

        let failing = Arc::new(MockPlugin::new());
        failing.set_failing(true);
        registry.register(Chain::Mock, failing);

        let plugin = registry.get(Chain::Mock).unwrap();
        assert_eq!(plugin.chain(), Chain::Mock);
    }
}
