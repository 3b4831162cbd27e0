// Dependency provider consumed by the resolver middleware

use crate::error::DispatchError;
use crate::logging::{debug, trace};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Marker trait for types the service provider can hold.
pub trait Provider: Send + Sync + 'static {}

/// The dependency provider.
///
/// Handler instances (and anything handlers depend on) are registered here
/// and resolved by type. The resolver middleware prefers an instance from
/// the provider over direct construction, so handlers with dependencies can
/// be wired up once at startup.
#[derive(Clone)]
pub struct ServiceProvider {
    providers: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a provider instance.
    pub fn register<T: Provider>(&self, instance: T) {
        let type_id = TypeId::of::<T>();
        let type_name = type_name::<T>();

        let mut providers = self.providers.write().unwrap();
        providers.insert(type_id, Arc::new(instance));

        debug!(provider = type_name, "provider registered");
    }

    /// Register a provider built by a factory function.
    pub fn register_factory<T: Provider, F>(&self, factory: F)
    where
        F: FnOnce() -> T,
    {
        self.register(factory());
    }

    /// Resolve a provider by type.
    pub fn resolve<T: Provider>(&self) -> Result<Arc<T>, DispatchError> {
        let type_id = TypeId::of::<T>();
        let type_name = type_name::<T>();

        let providers = self.providers.read().unwrap();
        let result = providers
            .get(&type_id)
            .and_then(|any| any.clone().downcast::<T>().ok())
            .ok_or(DispatchError::ProviderNotFound(type_name));

        match &result {
            Ok(_) => trace!(provider = type_name, "provider resolved"),
            Err(_) => debug!(provider = type_name, "provider not found"),
        }

        result
    }

    /// Resolve a provider by `TypeId`, type-erased. Used by the resolver
    /// middleware, which only knows the handler's `TypeId` from the
    /// registry entry.
    pub fn resolve_by_id(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        let providers = self.providers.read().unwrap();
        providers.get(&type_id).cloned()
    }

    /// Check whether a provider is registered.
    pub fn has<T: Provider>(&self) -> bool {
        let providers = self.providers.read().unwrap();
        providers.contains_key(&TypeId::of::<T>())
    }

    /// Clear all providers.
    pub fn clear(&self) {
        let mut providers = self.providers.write().unwrap();
        providers.clear();
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}
