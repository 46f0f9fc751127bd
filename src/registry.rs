use std::collections::HashMap;
use std::sync::Arc;

use alloy::json_abi::JsonAbi;
use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{DecodeError, IndexerResult};
use crate::events::{EventDecoder, canonical_address, parse_address};
use crate::repository::{Contract, PersistenceStore};

/// A watched contract and the decoder derived from its ABI.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    address: Address,
    address_str: String,
    name: String,
    abi: JsonAbi,
    decoder: EventDecoder,
}

impl ContractBinding {
    pub fn new(address: &str, name: &str, abi: JsonAbi) -> Result<Self, DecodeError> {
        let address = parse_address(address)?;
        let decoder = EventDecoder::from_abi(&abi);
        Ok(Self {
            address,
            address_str: canonical_address(&address),
            name: name.to_string(),
            abi,
            decoder,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lowercase hex address.
    pub fn address_str(&self) -> &str {
        &self.address_str
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    fn to_contract(&self) -> IndexerResult<Contract> {
        let abi = serde_json::to_value(&self.abi).map_err(|e| DecodeError::InvalidAbi {
            address: self.address_str.clone(),
            message: e.to_string(),
        })?;
        Ok(Contract {
            address: self.address_str.clone(),
            name: self.name.clone(),
            abi,
        })
    }
}

/// Binding description as found in a contracts file.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingSpec {
    pub address: String,
    pub name: String,
    pub abi: JsonAbi,
}

/// The set of watched contracts, keyed by lowercase address.
///
/// Readers take a [`snapshot`](Self::snapshot) before iterating, so a
/// concurrent add or remove is never observed half-applied.
pub struct ContractRegistry {
    bindings: RwLock<HashMap<String, Arc<ContractBinding>>>,
    store: Arc<dyn PersistenceStore>,
}

impl ContractRegistry {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Register a contract. Returns `false` when it was already registered.
    pub async fn add_binding(&self, address: &str, name: &str, abi: JsonAbi) -> IndexerResult<bool> {
        let binding = ContractBinding::new(address, name, abi)?;
        if self.bindings.read().contains_key(binding.address_str()) {
            info!("Contract {} already registered", name);
            return Ok(false);
        }

        self.store.upsert_contract(&binding.to_contract()?).await?;

        let inserted = {
            let mut bindings = self.bindings.write();
            if bindings.contains_key(binding.address_str()) {
                false
            } else {
                bindings.insert(binding.address_str().to_string(), Arc::new(binding));
                true
            }
        };
        if inserted {
            info!("Contract {} added successfully", name);
        }
        Ok(inserted)
    }

    /// Unregister a contract. Unknown addresses are logged and ignored.
    pub async fn remove_binding(&self, address: &str) -> IndexerResult<bool> {
        let key = address.trim().to_lowercase();
        let Some(binding) = self.bindings.write().remove(&key) else {
            info!("Contract {} not found in memory", address);
            return Ok(false);
        };
        info!("Contract {} removed from memory", binding.name());

        if self.store.delete_contract(&key).await? {
            info!("Contract {} removed from database", binding.name());
        } else {
            info!("Contract {} not found in database", key);
        }
        Ok(true)
    }

    pub async fn add_bindings(&self, specs: Vec<BindingSpec>) -> IndexerResult<usize> {
        let mut added = 0;
        for spec in specs {
            if self.add_binding(&spec.address, &spec.name, spec.abi).await? {
                added += 1;
            }
        }
        info!("Added {} contracts", added);
        Ok(added)
    }

    pub async fn remove_bindings(&self, addresses: &[String]) -> IndexerResult<usize> {
        let mut removed = 0;
        for address in addresses {
            if self.remove_binding(address).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Rebuild in-memory bindings from contracts persisted by an earlier run.
    pub async fn load_persisted(&self) -> IndexerResult<usize> {
        let contracts = self.store.get_contracts().await?;
        let mut loaded = 0;
        for contract in contracts {
            let binding = serde_json::from_value::<JsonAbi>(contract.abi)
                .map_err(|e| DecodeError::InvalidAbi {
                    address: contract.address.clone(),
                    message: e.to_string(),
                })
                .and_then(|abi| ContractBinding::new(&contract.address, &contract.name, abi));
            match binding {
                Ok(binding) => {
                    self.bindings
                        .write()
                        .entry(binding.address_str().to_string())
                        .or_insert_with(|| Arc::new(binding));
                    loaded += 1;
                }
                Err(e) => warn!("Skipping stored contract {}: {}", contract.address, e),
            }
        }
        info!("Loaded {} persisted contracts", loaded);
        Ok(loaded)
    }

    pub fn decoder_for(&self, address: &str) -> Option<Arc<ContractBinding>> {
        self.bindings
            .read()
            .get(&address.trim().to_lowercase())
            .cloned()
    }

    /// Point-in-time copy of all bindings, ordered by address.
    pub fn snapshot(&self) -> Vec<Arc<ContractBinding>> {
        let mut bindings: Vec<_> = self.bindings.read().values().cloned().collect();
        bindings.sort_by(|a, b| a.address_str().cmp(b.address_str()));
        bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Drop every in-memory binding without touching the store.
    pub fn clear(&self) {
        self.bindings.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    const ADDRESS: &str = "0x820507043F0abdC50C629B09cbC61323967331e3";

    fn abi() -> JsonAbi {
        serde_json::from_str(
            r#"[{"type":"event","name":"Ping","anonymous":false,"inputs":[{"name":"who","type":"address","indexed":true}]}]"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_binding_is_idempotent_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let registry = ContractRegistry::new(store.clone());

        assert!(registry.add_binding(ADDRESS, "LendBit", abi()).await.unwrap());
        assert!(!registry.add_binding(&ADDRESS.to_lowercase(), "LendBit", abi()).await.unwrap());

        assert_eq!(registry.len(), 1);
        let contracts = store.get_contracts().await.unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].address, ADDRESS.to_lowercase());

        let binding = registry.decoder_for(ADDRESS).unwrap();
        assert_eq!(binding.name(), "LendBit");
        assert_eq!(binding.decoder().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_binding_unknown_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let registry = ContractRegistry::new(store.clone());

        assert!(!registry.remove_binding(ADDRESS).await.unwrap());

        registry.add_binding(ADDRESS, "LendBit", abi()).await.unwrap();
        assert!(registry.remove_binding(ADDRESS).await.unwrap());
        assert!(registry.is_empty());
        assert!(store.get_contracts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_persisted_restores_bindings() {
        let store = Arc::new(MemoryStore::new());
        ContractRegistry::new(store.clone())
            .add_binding(ADDRESS, "LendBit", abi())
            .await
            .unwrap();

        let restored = ContractRegistry::new(store);
        assert_eq!(restored.load_persisted().await.unwrap(), 1);
        assert!(restored.decoder_for(ADDRESS).is_some());
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let registry = ContractRegistry::new(Arc::new(MemoryStore::new()));
        assert!(registry.add_binding("0x1234", "Broken", abi()).await.is_err());
        assert!(registry.is_empty());
    }
}
