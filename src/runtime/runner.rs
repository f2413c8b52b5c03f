//! The invocation loop.

use crate::function::completion::{self, Outcome, OutcomeKind};
use crate::function::provider::{HandlerProvider, HandlerResolver, ResolveError};
use crate::function::{Context, Handler, HandlerError};
use crate::http::{RuntimeApi, RuntimeApiClient};
use crate::runtime::config::{Config, ConfigError};
use crate::runtime::invocation::Invocation;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Environment variable carrying the trace header of the current invocation.
pub const TRACE_ID_ENV: &str = "_X_AMZN_TRACE_ID";

/// Fatal runtime errors. Everything else is logged and absorbed.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The handler could not be resolved; reported as an init error.
    #[error("Initialization failed: {0}")]
    Init(#[from] ResolveError),

    /// The loop exports the trace header through the process environment,
    /// which is only sound while a single thread runs.
    #[error("The runtime loop must run on a current_thread tokio runtime")]
    UnsupportedScheduler,
}

/// Result of one pass through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// No invocation was obtained; fetch again.
    SoftFailure,
    /// The outcome was reported.
    Reported(OutcomeKind),
    /// Reporting the outcome failed and was dropped.
    ReportFailed(OutcomeKind),
}

/// Long-lived runtime state: configuration, control channel and the
/// resolved handler.
pub struct Runtime<A: RuntimeApi> {
    config: Config,
    api: A,
    resolver: HandlerResolver,
}

impl Runtime<RuntimeApiClient> {
    /// Build a runtime talking HTTP to the endpoint named in `config`.
    pub fn from_config(config: Config, provider: impl HandlerProvider + 'static) -> Self {
        let api = RuntimeApiClient::new(config.runtime_api.clone())
            .with_timeout(config.request_timeout);
        Self::new(config, api, provider)
    }
}

impl<A: RuntimeApi> Runtime<A> {
    pub fn new(config: Config, api: A, provider: impl HandlerProvider + 'static) -> Self {
        Self {
            config,
            api,
            resolver: HandlerResolver::new(provider),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The control channel.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Resolve the handler. On failure the error is posted to `/init/error`
    /// and returned; the caller must not enter the loop.
    pub async fn init(&mut self) -> Result<Arc<dyn Handler>, RuntimeError> {
        let resolved = self
            .resolver
            .resolve(&self.config.handler, &self.config.task_root)
            .await;

        match resolved {
            Ok(handler) => Ok(handler),
            Err(err) => {
                if let Err(report_err) = self.api.post_init_error(&err.report()).await {
                    error!("Failed to send the init error: {}", report_err);
                }
                Err(RuntimeError::Init(err))
            }
        }
    }

    /// Fetch one invocation, run it and report its outcome.
    ///
    /// Sets or clears [`TRACE_ID_ENV`] in the process environment, so callers
    /// must not run it while other threads may read or write the environment.
    /// [`run`](Self::run) enforces this by requiring a current_thread runtime.
    pub async fn process_next(&mut self, handler: &Arc<dyn Handler>) -> Cycle {
        let response = match self.api.next_invocation().await {
            Ok(response) => response,
            Err(err) => {
                warn!("Failed to fetch the next invocation: {}. Retrying...", err);
                return Cycle::SoftFailure;
            }
        };

        let invocation = match Invocation::from_response(response) {
            Ok(invocation) => invocation,
            Err(rejected) => {
                warn!("{}. Retrying...", rejected);
                return Cycle::SoftFailure;
            }
        };

        let span = info_span!("invocation", request_id = %invocation.request_id);
        self.handle(handler, invocation).instrument(span).await
    }

    async fn handle(&mut self, handler: &Arc<dyn Handler>, invocation: Invocation) -> Cycle {
        match &invocation.trace_id {
            Some(trace_id) => std::env::set_var(TRACE_ID_ENV, trace_id),
            None => std::env::remove_var(TRACE_ID_ENV),
        }

        let outcome = match invocation.event() {
            Ok(event) => {
                let ctx = Context::new(&invocation, &self.config);
                debug!("Invoking handler");
                completion::invoke(handler.as_ref(), event, ctx).await
            }
            Err(err) => Outcome::Failure(HandlerError::with_type(
                "Runtime.MalformedPayload",
                err.to_string(),
            )),
        };

        let kind = outcome.kind();
        let reported = match &outcome {
            Outcome::Success(value) => {
                self.api
                    .post_response(&invocation.request_id, value)
                    .await
            }
            Outcome::Failure(err) => {
                info!("Handler failed: {}", err);
                self.api
                    .post_error(&invocation.request_id, &err.report())
                    .await
            }
        };

        match reported {
            Ok(()) => {
                debug!("Reported {:?} outcome", kind);
                Cycle::Reported(kind)
            }
            Err(err) => {
                error!("Failed to send the {:?} response: {}", kind, err);
                Cycle::ReportFailed(kind)
            }
        }
    }

    /// Initialise, then process invocations until the process ends.
    ///
    /// Returns only when initialisation fails, or straight away with
    /// [`RuntimeError::UnsupportedScheduler`] when not driven by a
    /// current_thread tokio runtime.
    pub async fn run(mut self) -> Result<Infallible, RuntimeError> {
        let flavor = Handle::try_current().map(|handle| handle.runtime_flavor());
        if !matches!(flavor, Ok(RuntimeFlavor::CurrentThread)) {
            return Err(RuntimeError::UnsupportedScheduler);
        }

        let handler = self.init().await?;
        info!(
            "Runtime ready: function={} version={}",
            self.config.function_name, self.config.function_version
        );

        loop {
            if self.process_next(&handler).await == Cycle::SoftFailure {
                tokio::task::yield_now().await;
            }
        }
    }
}
