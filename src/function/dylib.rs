//! Handlers loaded from dynamic libraries in the task root.
//!
//! For a locator `<module>.<function>` the provider opens
//! `<task_root>/lib<module>.so` (platform prefix and suffix apply, and the
//! unprefixed name is tried second) and looks up the `<function>` and
//! `<function>_free` exports of the byte ABI in [`abi`](crate::function::abi).
//! Libraries built with `#[lambda_loop::handler(export)]` or
//! [`export_handler!`](crate::export_handler) provide both.
//!
//! Each call runs on a blocking thread: the library drives the handler on
//! its own runtime and returns only once it has an outcome.

use crate::function::abi::{self, FreeFn, HandleFn, WireInvocation, FREE_SUFFIX};
use crate::function::handler::{Completion, Handler, HandlerError};
use crate::function::provider::{HandlerLocator, HandlerProvider, ResolveError};
use crate::function::{Callback, Context};
use async_trait::async_trait;
use libloading::Library;
use serde_json::Value;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Provider that loads handlers from shared libraries.
#[derive(Debug, Default, Clone)]
pub struct DynamicLibraryProvider;

impl DynamicLibraryProvider {
    pub fn new() -> Self {
        Self
    }

    /// Candidate library paths for `module`, in lookup order.
    pub fn candidates(task_root: &Path, module: &str) -> Vec<PathBuf> {
        vec![
            task_root.join(format!("{}{}{}", DLL_PREFIX, module, DLL_SUFFIX)),
            task_root.join(format!("{}{}", module, DLL_SUFFIX)),
        ]
    }
}

/// A pair of exports together with the library they live in.
struct LibraryHandler {
    handle: HandleFn,
    free: FreeFn,
    library: Arc<Library>,
}

impl Handler for LibraryHandler {
    fn call(
        &self,
        event: Value,
        ctx: Context,
        _callback: Callback,
    ) -> Result<Completion, HandlerError> {
        let request = serde_json::to_vec(&WireInvocation {
            event,
            context: ctx.to_wire(),
        })?;
        let (handle, free) = (self.handle, self.free);
        let library = self.library.clone();

        Ok(Completion::deferred(async move {
            let response = tokio::task::spawn_blocking(move || {
                // The library stays loaded until the call returns.
                let _library = library;
                unsafe { abi::call(handle, free, &request) }
            })
            .await
            .map_err(|e| HandlerError::with_type("Runtime.LibraryCallFailed", e.to_string()))?;
            abi::decode_outcome(&response)
        }))
    }
}

#[async_trait]
impl HandlerProvider for DynamicLibraryProvider {
    async fn resolve(
        &self,
        locator: &HandlerLocator,
        task_root: &Path,
    ) -> Result<Arc<dyn Handler>, ResolveError> {
        let path = Self::candidates(task_root, locator.module())
            .into_iter()
            .find(|candidate| candidate.exists())
            .ok_or_else(|| ResolveError::HandlerNotFound(locator.to_string()))?;

        debug!("Loading handler library {}", path.display());
        let module = locator.module().to_string();
        let symbol = locator.function().to_string();
        let name = locator.to_string();

        let handler = tokio::task::spawn_blocking(move || load(&path, &module, &symbol, &name))
            .await
            .map_err(|e| ResolveError::Load {
                module: locator.module().to_string(),
                reason: format!("loader task failed: {}", e),
            })??;

        info!("Loaded handler {} from library", locator);
        Ok(Arc::new(handler))
    }
}

fn load(path: &Path, module: &str, symbol: &str, name: &str) -> Result<LibraryHandler, ResolveError> {
    // Loading runs the library's initialisers; the task root is trusted.
    let library = unsafe { Library::new(path) }.map_err(|e| ResolveError::Load {
        module: module.to_string(),
        reason: e.to_string(),
    })?;

    let not_found = |_| ResolveError::HandlerNotFound(name.to_string());
    let free_symbol = format!("{}{}", symbol, FREE_SUFFIX);
    let (handle, free) = unsafe {
        let handle = library.get::<HandleFn>(symbol.as_bytes()).map_err(not_found)?;
        let free = library.get::<FreeFn>(free_symbol.as_bytes()).map_err(not_found)?;
        (*handle, *free)
    };

    Ok(LibraryHandler {
        handle,
        free,
        library: Arc::new(library),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_use_platform_naming() {
        let paths = DynamicLibraryProvider::candidates(Path::new("/var/task"), "index");
        assert_eq!(
            paths[0],
            PathBuf::from(format!("/var/task/{}index{}", DLL_PREFIX, DLL_SUFFIX))
        );
        assert_eq!(paths[1], PathBuf::from(format!("/var/task/index{}", DLL_SUFFIX)));
    }

    #[tokio::test]
    async fn missing_library_is_not_found() {
        let locator = HandlerLocator::parse("nope.handler").unwrap();
        let result = DynamicLibraryProvider::new()
            .resolve(&locator, Path::new("/definitely/not/a/task/root"))
            .await;
        assert_eq!(
            result.err(),
            Some(ResolveError::HandlerNotFound("nope.handler".to_string()))
        );
    }
}
