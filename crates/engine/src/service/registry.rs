//! Service registry for by-name service creation
//!
//! The container never knows concrete service types; it asks the registry to
//! build whichever service the configuration names.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Service, ServiceError};
use crate::config::DashConfig;

/// Factory function type for creating services from configuration
pub type ServiceFactory =
    Box<dyn Fn(&DashConfig) -> Result<Arc<dyn Service>, ServiceError> + Send + Sync>;

/// Registry of service factories
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in services
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::services::register_builtin(&mut registry);
        registry
    }

    /// Register a factory under `name`, replacing any previous one
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = ServiceRegistry::new();
    /// registry.register("ping", |config| Ok(Arc::new(build_ping(config)?) as Arc<dyn Service>));
    /// ```
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&DashConfig) -> Result<Arc<dyn Service>, ServiceError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Check if a service name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the service registered under `name`
    pub fn create(&self, name: &str, config: &DashConfig) -> Result<Arc<dyn Service>, ServiceError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ServiceError::UnknownService(name.to_string()))?;
        factory(config)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered service names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
