//! Handler library loaded by the dynamic-library integration tests.

use lambda_loop::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

/// Needs a timer from the library's own runtime.
#[handler(name = "sleepy", export)]
async fn sleepy(event: Value, ctx: Context) -> Result<Value, HandlerError> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(json!({ "slept": event, "request_id": ctx.aws_request_id }))
}

#[handler(name = "failing", export)]
async fn failing(_event: Value, _ctx: Context) -> Result<Value, HandlerError> {
    Err(HandlerError::with_type("Fixture.Failed", "nope"))
}

/// Completes through the callback from a spawned task.
struct Drained;

impl Handler for Drained {
    fn call(&self, _event: Value, ctx: Context, cb: Callback) -> Result<Completion, HandlerError> {
        let waits = ctx.callback_waits_for_empty_event_loop();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cb.succeed(json!({ "waits": waits }));
        });
        Ok(Completion::Callback)
    }
}

lambda_loop::export_handler!("drained", Drained);

struct Panicking;

impl Handler for Panicking {
    fn call(&self, _event: Value, _ctx: Context, _cb: Callback) -> Result<Completion, HandlerError> {
        panic!("fixture panic")
    }
}

lambda_loop::export_handler!("panicking", Panicking);
