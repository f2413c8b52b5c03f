//! Per-invocation execution context.

use crate::function::abi::WireContext;
use crate::runtime::invocation::Invocation;
use crate::runtime::Config;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Execution context handed to a handler.
///
/// Cloning is cheap; clones share the drain flag so a handler can flip it
/// from anywhere before signalling through the callback.
#[derive(Debug, Clone)]
pub struct Context {
    /// Request id of the invocation.
    pub aws_request_id: String,
    /// ARN the caller used to invoke the function.
    pub invoked_function_arn: String,
    /// Tracing header value for this invocation.
    pub xray_trace_id: Option<String>,
    /// Raw client context JSON, if the caller sent one.
    pub client_context: Option<String>,
    /// Raw cognito identity JSON, if the caller sent one.
    pub identity: Option<String>,
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_in_mb: u32,
    pub log_group_name: String,
    pub log_stream_name: String,
    deadline_ms: f64,
    wait_for_drain: Arc<AtomicBool>,
}

impl Context {
    /// Build the context for `invocation` under `config`.
    pub fn new(invocation: &Invocation, config: &Config) -> Self {
        Self {
            aws_request_id: invocation.request_id.clone(),
            invoked_function_arn: invocation.invoked_function_arn.clone(),
            xray_trace_id: invocation.trace_id.clone(),
            client_context: invocation.client_context.clone(),
            identity: invocation.cognito_identity.clone(),
            function_name: config.function_name.clone(),
            function_version: config.function_version.clone(),
            memory_limit_in_mb: config.memory_limit_mb,
            log_group_name: config.log_group_name.clone(),
            log_stream_name: config.log_stream_name.clone(),
            deadline_ms: invocation.deadline_ms,
            wait_for_drain: Arc::new(AtomicBool::new(
                config.callback_waits_for_empty_event_loop,
            )),
        }
    }

    /// Deadline as epoch milliseconds. `NaN` when the header was malformed.
    pub fn deadline_ms(&self) -> f64 {
        self.deadline_ms
    }

    /// Milliseconds left until the deadline, computed at call time.
    pub fn remaining_time_in_millis(&self) -> f64 {
        self.deadline_ms - now_millis()
    }

    /// Whether callback outcomes wait for the current turn to unwind.
    pub fn callback_waits_for_empty_event_loop(&self) -> bool {
        self.wait_for_drain.load(Ordering::SeqCst)
    }

    pub fn set_callback_waits_for_empty_event_loop(&self, wait: bool) {
        self.wait_for_drain.store(wait, Ordering::SeqCst);
    }

    pub(crate) fn drain_flag(&self) -> Arc<AtomicBool> {
        self.wait_for_drain.clone()
    }

    pub(crate) fn to_wire(&self) -> WireContext {
        WireContext {
            aws_request_id: self.aws_request_id.clone(),
            invoked_function_arn: self.invoked_function_arn.clone(),
            xray_trace_id: self.xray_trace_id.clone(),
            client_context: self.client_context.clone(),
            identity: self.identity.clone(),
            function_name: self.function_name.clone(),
            function_version: self.function_version.clone(),
            memory_limit_in_mb: self.memory_limit_in_mb,
            log_group_name: self.log_group_name.clone(),
            log_stream_name: self.log_stream_name.clone(),
            deadline_ms: Some(self.deadline_ms).filter(|d| d.is_finite()),
            callback_waits_for_empty_event_loop: self.callback_waits_for_empty_event_loop(),
        }
    }

    pub(crate) fn from_wire(wire: WireContext) -> Self {
        Self {
            aws_request_id: wire.aws_request_id,
            invoked_function_arn: wire.invoked_function_arn,
            xray_trace_id: wire.xray_trace_id,
            client_context: wire.client_context,
            identity: wire.identity,
            function_name: wire.function_name,
            function_version: wire.function_version,
            memory_limit_in_mb: wire.memory_limit_in_mb,
            log_group_name: wire.log_group_name,
            log_stream_name: wire.log_stream_name,
            deadline_ms: wire.deadline_ms.unwrap_or(f64::NAN),
            wait_for_drain: Arc::new(AtomicBool::new(
                wire.callback_waits_for_empty_event_loop,
            )),
        }
    }

    /// Parsed client context, `None` if absent or not JSON.
    pub fn client_context_json(&self) -> Option<Value> {
        self.client_context
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Parsed cognito identity, `None` if absent or not JSON.
    pub fn identity_json(&self) -> Option<Value> {
        self.identity
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn invocation(deadline_ms: f64) -> Invocation {
        Invocation {
            request_id: "r1".to_string(),
            deadline_ms,
            invoked_function_arn: "arn:aws:lambda:us-east-1:123456789012:function:echo".to_string(),
            trace_id: Some("Root=1-abc".to_string()),
            client_context: Some(r#"{"custom":{"key":"value"}}"#.to_string()),
            cognito_identity: Some("not json".to_string()),
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn maps_invocation_and_config_fields() {
        let config = Config::new()
            .function("echo", "7")
            .memory_limit_mb(512)
            .log("/aws/lambda/echo", "stream-1");
        let ctx = Context::new(&invocation(0.0), &config);

        assert_eq!(ctx.aws_request_id, "r1");
        assert_eq!(ctx.function_name, "echo");
        assert_eq!(ctx.function_version, "7");
        assert_eq!(ctx.memory_limit_in_mb, 512);
        assert_eq!(ctx.log_group_name, "/aws/lambda/echo");
        assert_eq!(ctx.log_stream_name, "stream-1");
        assert_eq!(ctx.xray_trace_id.as_deref(), Some("Root=1-abc"));
        assert_eq!(
            ctx.client_context_json(),
            Some(serde_json::json!({"custom": {"key": "value"}}))
        );
        assert_eq!(ctx.identity_json(), None);
    }

    #[test]
    fn remaining_time_strictly_decreases() {
        let deadline = now_millis() + 5000.0;
        let ctx = Context::new(&invocation(deadline), &Config::new());

        let mut previous = ctx.remaining_time_in_millis();
        assert!(previous <= 5000.0 && previous > 4000.0);
        for _ in 0..5 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            let current = ctx.remaining_time_in_millis();
            assert!(current < previous, "{current} !< {previous}");
            previous = current;
        }
    }

    #[test]
    fn malformed_deadline_propagates_nan() {
        let ctx = Context::new(&invocation(f64::NAN), &Config::new());
        assert!(ctx.remaining_time_in_millis().is_nan());
    }

    #[test]
    fn wire_form_keeps_fields_and_nan_deadline() {
        let config = Config::new().function("echo", "7");
        let ctx = Context::new(&invocation(f64::NAN), &config);
        ctx.set_callback_waits_for_empty_event_loop(true);

        let wire = ctx.to_wire();
        assert_eq!(wire.deadline_ms, None);
        assert!(wire.callback_waits_for_empty_event_loop);

        let back = Context::from_wire(wire);
        assert_eq!(back.aws_request_id, "r1");
        assert_eq!(back.function_version, "7");
        assert_eq!(back.client_context, ctx.client_context);
        assert!(back.deadline_ms().is_nan());
        assert!(back.callback_waits_for_empty_event_loop());
    }

    #[test]
    fn drain_flag_is_shared_between_clones() {
        let ctx = Context::new(&invocation(0.0), &Config::new());
        let clone = ctx.clone();
        assert!(!ctx.callback_waits_for_empty_event_loop());
        clone.set_callback_waits_for_empty_event_loop(true);
        assert!(ctx.callback_waits_for_empty_event_loop());
    }
}
