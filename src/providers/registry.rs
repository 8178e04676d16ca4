//! Adapter registry
//!
//! Instance-scoped lookup from [`Provider`] to its adapter. Built once at
//! startup and handed to the services that dispatch on it; there is no
//! global registry, which keeps test doubles trivial to inject.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::Provider;
use crate::providers::ProviderAdapter;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{0}' has no registered adapter")]
    NotRegistered(Provider),
    #[error("provider '{0}' is already registered")]
    AlreadyRegistered(Provider),
}

/// Registry mapping providers to their adapters.
///
/// Backed by a `BTreeMap` so iteration order is the providers' sort order,
/// which keeps every dispatch loop in the crate deterministic.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Register an adapter under the provider it reports.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<(), RegistryError> {
        let provider = adapter.provider();
        if self.adapters.contains_key(&provider) {
            return Err(RegistryError::AlreadyRegistered(provider));
        }
        self.adapters.insert(provider, adapter);
        Ok(())
    }

    /// Get the adapter for a provider.
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or(RegistryError::NotRegistered(provider))
    }

    /// Whether an adapter is registered for `provider`.
    pub fn contains(&self, provider: Provider) -> bool {
        self.adapters.contains_key(&provider)
    }

    /// Registered providers in sort order.
    pub fn providers(&self) -> Vec<Provider> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
