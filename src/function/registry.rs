//! Compiled registration table of handlers.

use crate::function::handler::Handler;
use crate::function::provider::{HandlerLocator, HandlerProvider, ResolveError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Errors raised while registering handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handler '{0}' is already registered")]
    Duplicate(String),

    #[error(transparent)]
    Locator(#[from] ResolveError),
}

/// Registry mapping locator strings to handlers linked into the binary.
pub struct HandlerRegistry {
    /// Registered handlers keyed by locator.
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under `locator` (`<module>.<function>`).
    pub async fn register(
        &self,
        locator: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<(), RegistryError> {
        self.register_arc(locator, Arc::new(handler)).await
    }

    /// Register an already shared handler.
    pub async fn register_arc(
        &self,
        locator: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let locator = HandlerLocator::parse(&locator.into())?;
        let mut handlers = self.handlers.write().await;

        if handlers.contains_key(locator.as_str()) {
            return Err(RegistryError::Duplicate(locator.to_string()));
        }

        handlers.insert(locator.to_string(), handler);
        info!("Registered handler: {}", locator);
        Ok(())
    }

    /// Look up a handler by locator string.
    pub async fn get(&self, locator: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().await.get(locator).cloned()
    }

    /// List all registered locators, sorted.
    pub async fn list(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a handler from the registry.
    pub async fn remove(&self, locator: &str) -> Option<Arc<dyn Handler>> {
        let removed = self.handlers.write().await.remove(locator);
        if removed.is_some() {
            info!("Removed handler: {}", locator);
        }
        removed
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HandlerProvider for HandlerRegistry {
    async fn resolve(
        &self,
        locator: &HandlerLocator,
        _task_root: &Path,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        debug!("Looking up handler {} in registry", locator);
        self.get(locator.as_str())
            .await
            .ok_or_else(|| ResolveError::HandlerNotFound(locator.to_string()))
    }
}
