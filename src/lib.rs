//! # lambda-loop - a custom runtime for the serverless runtime API
//!
//! `lambda-loop` stands in for the managed execution environment: it polls
//! the control endpoint for the next invocation, runs a user handler
//! against it and reports the outcome back, one invocation at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  Control endpoint (runtime API)              │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲ GET /invocation/next          │ POST .../response|error
//!        │                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Runtime                                                     │
//! │  fetch ─► Context ─► completion adapter ─► report ─► fetch … │
//! │                          │                                   │
//! │                  Handler (resolved once)                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lambda_loop::prelude::*;
//! use serde_json::{json, Value};
//!
//! #[handler]
//! async fn double(event: Value, _ctx: Context) -> Result<Value, HandlerError> {
//!     let n = event["n"].as_i64().ok_or("missing n")?;
//!     Ok(json!({ "doubled": n * 2 }))
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let registry = HandlerRegistry::new();
//!     registry.register("index.double", DoubleHandler::new()).await?;
//!
//!     match lambda_loop::start(registry).await {
//!         Ok(never) => match never {},
//!         Err(err) => Err(err.into()),
//!     }
//! }
//! ```
//!
//! ## Completion styles
//!
//! A handler may finish by calling its [`Callback`], by returning a
//! [`Completion::Deferred`] future, or by failing synchronously. The first
//! signal wins; later ones are logged and ignored.

pub mod function;
pub mod http;
pub mod runtime;

use std::convert::Infallible;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::function::{
        Callback, Completion, Context, DynamicLibraryProvider, Handler, HandlerError,
        HandlerProvider, HandlerRegistry,
    };
    pub use crate::runtime::{Config, Runtime, RuntimeError};
    pub use lambda_loop_macro::handler;
}

pub use function::{
    Callback, Completion, Context, DynamicLibraryProvider, Handler, HandlerError, HandlerProvider,
    HandlerRegistry, Outcome,
};
pub use http::{RuntimeApi, RuntimeApiClient};
pub use lambda_loop_macro::handler;
pub use serde_json;
pub use runtime::{Config, Runtime, RuntimeError};

/// Load the configuration from the environment and run the invocation loop
/// with handlers from `provider`.
///
/// Returns only on a fatal configuration or initialisation error. Must be
/// driven by a current_thread tokio runtime, as the `bootstrap` binary is.
pub async fn start(provider: impl HandlerProvider + 'static) -> Result<Infallible, RuntimeError> {
    let config = Config::load()?;
    Runtime::from_config(config, provider).run().await
}
