//! Handler resolution.
//!
//! A [`HandlerProvider`] turns a locator string into a callable handler.
//! [`HandlerResolver`] asks its provider at most once and remembers the
//! answer, success or failure, for the rest of the process.

use crate::function::handler::{ErrorReport, Handler};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors raised while resolving a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The locator is not of the form `<module>.<function>`.
    #[error("Malformed handler locator {0:?}, expected <module>.<function>")]
    MalformedLocator(String),

    /// Nothing callable is registered or exported under the locator.
    #[error("Can't find the handler {0}")]
    HandlerNotFound(String),

    /// The module exists but could not be loaded.
    #[error("Failed to load module {module}: {reason}")]
    Load { module: String, reason: String },
}

impl ResolveError {
    /// Classification tag used when reporting this as an init error.
    pub fn error_type(&self) -> &'static str {
        match self {
            ResolveError::MalformedLocator(_) => "Runtime.MalformedHandlerName",
            ResolveError::HandlerNotFound(_) => "Runtime.HandlerNotFound",
            ResolveError::Load { .. } => "Runtime.ImportModuleError",
        }
    }

    /// Wire body for `POST /init/error`.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            error_message: self.to_string(),
            error_type: self.error_type().to_string(),
        }
    }
}

/// Parsed `<module>.<function>` handler locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerLocator {
    raw: String,
    module: String,
    function: String,
}

impl HandlerLocator {
    /// Parse a locator. The module is everything before the first dot.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        match raw.split_once('.') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => Ok(Self {
                raw: raw.to_string(),
                module: module.to_string(),
                function: function.to_string(),
            }),
            _ => Err(ResolveError::MalformedLocator(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

impl std::fmt::Display for HandlerLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Capability to turn a locator into a handler.
#[async_trait]
pub trait HandlerProvider: Send + Sync {
    async fn resolve(
        &self,
        locator: &HandlerLocator,
        task_root: &Path,
    ) -> Result<Arc<dyn Handler>, ResolveError>;
}

#[async_trait]
impl<P: HandlerProvider + ?Sized> HandlerProvider for Arc<P> {
    async fn resolve(
        &self,
        locator: &HandlerLocator,
        task_root: &Path,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        (**self).resolve(locator, task_root).await
    }
}

/// Caches the single resolution attempt of a provider.
pub struct HandlerResolver {
    provider: Box<dyn HandlerProvider>,
    resolved: Option<Result<Arc<dyn Handler>, ResolveError>>,
}

impl HandlerResolver {
    pub fn new(provider: impl HandlerProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            resolved: None,
        }
    }

    /// Resolve the handler named by `locator`, asking the provider only the
    /// first time. Later calls return the cached result without looking at
    /// their arguments.
    pub async fn resolve(
        &mut self,
        locator: &str,
        task_root: &Path,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        if let Some(cached) = &self.resolved {
            debug!("Using cached handler resolution");
            return cached.clone();
        }

        let result = match HandlerLocator::parse(locator) {
            Ok(parsed) => self.provider.resolve(&parsed, task_root).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(_) => info!("Resolved handler {}", locator),
            Err(err) => error!("Failed to resolve handler {}: {}", locator, err),
        }
        self.resolved = Some(result.clone());
        result
    }

    /// Whether a resolution attempt has been made.
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_module_and_function() {
        let locator = HandlerLocator::parse("index.handler").unwrap();
        assert_eq!(locator.module(), "index");
        assert_eq!(locator.function(), "handler");
        assert_eq!(locator.to_string(), "index.handler");

        let nested = HandlerLocator::parse("app.handlers.main").unwrap();
        assert_eq!(nested.module(), "app");
        assert_eq!(nested.function(), "handlers.main");
    }

    #[test]
    fn rejects_locators_without_a_dot() {
        for raw in ["index", ".handler", "index.", ""] {
            assert_eq!(
                HandlerLocator::parse(raw),
                Err(ResolveError::MalformedLocator(raw.to_string()))
            );
        }
    }

    #[test]
    fn init_error_report_carries_type() {
        let report = ResolveError::HandlerNotFound("index.handler".into()).report();
        assert_eq!(report.error_type, "Runtime.HandlerNotFound");
        assert_eq!(report.error_message, "Can't find the handler index.handler");
    }
}
