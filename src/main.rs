//! `bootstrap` - the runtime entry point.
//!
//! Reads its configuration from the environment, loads the handler named by
//! `_HANDLER` from a shared library in the task root and serves
//! invocations until the process is stopped.

use lambda_loop::DynamicLibraryProvider;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Runtime starting...");

    match lambda_loop::start(DynamicLibraryProvider::new()).await {
        Ok(never) => match never {},
        Err(err) => {
            tracing::error!("Runtime exiting: {}", err);
            Err(err.into())
        }
    }
}
