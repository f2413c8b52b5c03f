//! Completion adapter.
//!
//! A handler can finish in three ways: through the callback, by settling the
//! future it returned, or by failing (or panicking) synchronously. All three
//! feed a single [`Settlement`] cell; the first signal claims it and every
//! later one is logged and dropped.

use crate::function::context::Context;
use crate::function::handler::{Completion, Handler, HandlerError};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Settled result of one handler run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(HandlerError),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Failure(_) => OutcomeKind::Failure,
        }
    }
}

/// Which side an [`Outcome`] settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// When a winning outcome is handed to the waiting adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Immediately, on the signalling call.
    Inline,
    /// On the next scheduling turn, after the current one has unwound.
    NextTurn,
}

#[derive(Debug)]
struct SettleState {
    resolved: bool,
    rejected: bool,
    tx: Option<oneshot::Sender<Outcome>>,
}

/// Single-assignment result cell shared by every completion path.
#[derive(Debug)]
pub struct Settlement {
    state: Mutex<SettleState>,
}

impl Settlement {
    fn channel() -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let settlement = Arc::new(Self {
            state: Mutex::new(SettleState {
                resolved: false,
                rejected: false,
                tx: Some(tx),
            }),
        });
        (settlement, rx)
    }

    /// Settle with a value. Returns `false` if the cell was already settled.
    pub fn resolve(&self, value: Value, delivery: Delivery) -> bool {
        self.settle(Outcome::Success(value), delivery)
    }

    /// Settle with an error. Returns `false` if the cell was already settled.
    pub fn reject(&self, error: HandlerError, delivery: Delivery) -> bool {
        self.settle(Outcome::Failure(error), delivery)
    }

    /// Whether any signal has claimed the cell.
    pub fn is_settled(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.resolved || state.rejected
    }

    fn settle(&self, outcome: Outcome, delivery: Delivery) -> bool {
        // Check and claim under one lock so no interleaving can split them.
        let tx = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let attempt = outcome.kind();
            match (attempt, state.resolved, state.rejected) {
                (OutcomeKind::Success, true, _) => {
                    warn!("resolve has already been called, ignoring");
                    return false;
                }
                (OutcomeKind::Success, _, true) => {
                    warn!("resolve called but reject has already been called, ignoring");
                    return false;
                }
                (OutcomeKind::Failure, _, true) => {
                    warn!("reject has already been called, ignoring");
                    return false;
                }
                (OutcomeKind::Failure, true, _) => {
                    warn!("reject called but resolve has already been called, ignoring");
                    return false;
                }
                (OutcomeKind::Success, false, false) => state.resolved = true,
                (OutcomeKind::Failure, false, false) => state.rejected = true,
            }
            state.tx.take()
        };

        if let Some(tx) = tx {
            deliver(tx, outcome, delivery);
        }
        true
    }
}

fn deliver(tx: oneshot::Sender<Outcome>, outcome: Outcome, delivery: Delivery) {
    let send = |tx: oneshot::Sender<Outcome>, outcome| {
        if tx.send(outcome).is_err() {
            debug!("outcome receiver already gone");
        }
    };

    match (delivery, tokio::runtime::Handle::try_current()) {
        (Delivery::NextTurn, Ok(handle)) => {
            handle.spawn(async move {
                tokio::task::yield_now().await;
                send(tx, outcome);
            });
        }
        // Outside a runtime there is no next turn to wait for.
        _ => send(tx, outcome),
    }
}

/// Explicit completion callback handed to a handler.
///
/// Clones share one settlement, so the callback can be moved into spawned
/// work. Calls after the first settlement are logged and ignored.
#[derive(Clone)]
pub struct Callback {
    settlement: Arc<Settlement>,
    wait_for_drain: Arc<AtomicBool>,
}

impl Callback {
    fn new(settlement: Arc<Settlement>, ctx: &Context) -> Self {
        Self {
            settlement,
            wait_for_drain: ctx.drain_flag(),
        }
    }

    /// Complete with either an error or a value.
    pub fn call(&self, result: Result<Value, HandlerError>) -> bool {
        let delivery = if self.wait_for_drain.load(Ordering::SeqCst) {
            Delivery::NextTurn
        } else {
            Delivery::Inline
        };
        match result {
            Ok(value) => self.settlement.resolve(value, delivery),
            Err(error) => self.settlement.reject(error, delivery),
        }
    }

    /// Complete successfully with `value`.
    pub fn succeed(&self, value: Value) -> bool {
        self.call(Ok(value))
    }

    /// Complete with an error.
    pub fn fail(&self, error: impl Into<HandlerError>) -> bool {
        self.call(Err(error.into()))
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("settled", &self.settlement.is_settled())
            .finish()
    }
}

/// Run `handler` against `event` and wait for its single outcome.
///
/// Never fails on handler misbehaviour: errors, panics and a handler that
/// drops every completion path without signalling all become
/// [`Outcome::Failure`].
pub async fn invoke(handler: &dyn Handler, event: Value, ctx: Context) -> Outcome {
    let (settlement, rx) = Settlement::channel();
    let callback = Callback::new(settlement.clone(), &ctx);

    let returned = std::panic::catch_unwind(AssertUnwindSafe(|| {
        handler.call(event, ctx, callback)
    }));

    match returned {
        Ok(Ok(Completion::Callback)) => {}
        Ok(Ok(Completion::Deferred(future))) => {
            let settlement = settlement.clone();
            let task = tokio::spawn(future);
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(value)) => settlement.resolve(value, Delivery::Inline),
                    Ok(Err(error)) => settlement.reject(error, Delivery::Inline),
                    Err(join) if join.is_panic() => settlement.reject(
                        HandlerError::from_panic(join.into_panic()),
                        Delivery::Inline,
                    ),
                    Err(join) => settlement.reject(
                        HandlerError::with_type("Runtime.Cancelled", join.to_string()),
                        Delivery::Inline,
                    ),
                };
            });
        }
        Ok(Err(error)) => {
            settlement.reject(error, Delivery::Inline);
        }
        Err(panic) => {
            settlement.reject(HandlerError::from_panic(panic), Delivery::Inline);
        }
    }
    drop(settlement);

    match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Outcome::Failure(HandlerError::with_type(
            "Runtime.NoCompletion",
            "handler dropped its callback without signalling completion",
        )),
    }
}
