//! Byte-level C ABI between the runtime and handler libraries.
//!
//! A handler library links its own copy of std, tokio and this crate, so no
//! Rust type may cross the boundary. The runtime serializes the event and
//! context as JSON into a [`WireSlice`]; the library decodes it, drives the
//! handler to completion on a runtime it builds itself, catches its own
//! panics and hands back a [`WireOwned`] JSON outcome. The buffer is freed
//! by the library's `<name>_free` export, never by the caller's allocator.
//!
//! Libraries export a handler with [`export_handler!`](crate::export_handler)
//! or `#[handler(export)]`.

use crate::function::completion::{invoke, Outcome};
use crate::function::context::Context;
use crate::function::handler::{ErrorReport, Handler, HandlerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;

/// Suffix of the export that releases a buffer returned by a handler export.
pub const FREE_SUFFIX: &str = "_free";

/// Borrowed input buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WireSlice {
    pub ptr: *const u8,
    pub len: usize,
}

/// Buffer allocated by the library; must be returned to its free export.
#[repr(C)]
#[derive(Debug)]
pub struct WireOwned {
    pub ptr: *mut u8,
    pub len: usize,
}

/// Signature of a handler export.
pub type HandleFn = unsafe extern "C" fn(WireSlice) -> WireOwned;
/// Signature of the matching free export.
pub type FreeFn = unsafe extern "C" fn(WireOwned);

/// Context fields as they travel to the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireContext {
    pub aws_request_id: String,
    pub invoked_function_arn: String,
    pub xray_trace_id: Option<String>,
    pub client_context: Option<String>,
    pub identity: Option<String>,
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_in_mb: u32,
    pub log_group_name: String,
    pub log_stream_name: String,
    /// `None` stands for a malformed deadline; JSON has no NaN.
    pub deadline_ms: Option<f64>,
    pub callback_waits_for_empty_event_loop: bool,
}

/// Request body of a handler export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireInvocation {
    pub event: Value,
    pub context: WireContext,
}

/// Response body of a handler export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireOutcome {
    Success(Value),
    Failure(ErrorReport),
}

impl From<Outcome> for WireOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success(value) => WireOutcome::Success(value),
            Outcome::Failure(err) => WireOutcome::Failure(err.report()),
        }
    }
}

impl From<WireOutcome> for Result<Value, HandlerError> {
    fn from(outcome: WireOutcome) -> Self {
        match outcome {
            WireOutcome::Success(value) => Ok(value),
            WireOutcome::Failure(report) => {
                Err(HandlerError::with_type(report.error_type, report.error_message))
            }
        }
    }
}

fn failure(error_type: &str, message: impl Into<String>) -> WireOutcome {
    WireOutcome::Failure(HandlerError::with_type(error_type, message).report())
}

/// Library side: run `handler` against the invocation in `input`.
///
/// Never unwinds. Decode errors, a runtime that cannot be built and panics
/// all come back as a failure outcome.
///
/// # Safety
///
/// `input` must point to `len` readable bytes, or have `len == 0`.
pub unsafe fn serve(input: WireSlice, handler: &dyn Handler) -> WireOwned {
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| unsafe { run(input, handler) })) {
        Ok(outcome) => outcome,
        Err(panic) => WireOutcome::Failure(HandlerError::from_panic(panic).report()),
    };
    let bytes = serde_json::to_vec(&outcome).unwrap_or_else(|err| {
        serde_json::to_vec(&failure("Runtime.SerializationError", err.to_string()))
            .unwrap_or_default()
    });
    into_owned(bytes)
}

unsafe fn run(input: WireSlice, handler: &dyn Handler) -> WireOutcome {
    let bytes = if input.len == 0 {
        &[][..]
    } else if input.ptr.is_null() {
        return failure("Runtime.InvalidInvocation", "null input with non-zero length");
    } else {
        unsafe { std::slice::from_raw_parts(input.ptr, input.len) }
    };

    let invocation: WireInvocation = match serde_json::from_slice(bytes) {
        Ok(invocation) => invocation,
        Err(err) => return failure("Runtime.InvalidInvocation", err.to_string()),
    };

    // The caller's tokio is a different copy; timers and spawns need ours.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => return failure("Runtime.LibraryRuntime", err.to_string()),
    };

    let ctx = Context::from_wire(invocation.context);
    runtime
        .block_on(invoke(handler, invocation.event, ctx))
        .into()
}

fn into_owned(bytes: Vec<u8>) -> WireOwned {
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut u8;
    WireOwned { ptr, len }
}

/// Library side: free a buffer produced by [`serve`].
///
/// # Safety
///
/// `buf` must come from [`serve`] in the same library and be released once.
pub unsafe fn release(buf: WireOwned) {
    if buf.ptr.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(buf.ptr, buf.len)) });
}

/// Runtime side: call a handler export and copy its response out.
///
/// # Safety
///
/// `handle` and `free` must be a matching pair from a loaded library that
/// stays loaded for the duration of the call.
pub unsafe fn call(handle: HandleFn, free: FreeFn, request: &[u8]) -> Vec<u8> {
    let owned = unsafe {
        handle(WireSlice {
            ptr: request.as_ptr(),
            len: request.len(),
        })
    };
    let response = if owned.ptr.is_null() || owned.len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(owned.ptr, owned.len).to_vec() }
    };
    unsafe { free(owned) };
    response
}

/// Runtime side: decode a handler export's response.
pub fn decode_outcome(bytes: &[u8]) -> Result<Value, HandlerError> {
    match serde_json::from_slice::<WireOutcome>(bytes) {
        Ok(outcome) => outcome.into(),
        Err(err) => Err(HandlerError::with_type(
            "Runtime.InvalidLibraryResponse",
            err.to_string(),
        )),
    }
}

/// Export a [`Handler`] from a `cdylib` under `name`.
///
/// Emits the `name` handler export and its `name_free` companion, which is
/// what `DynamicLibraryProvider` looks up for the locator `<module>.<name>`.
///
/// ```ignore
/// lambda_loop::export_handler!("echo", EchoHandler);
/// ```
#[macro_export]
macro_rules! export_handler {
    ($name:literal, $handler:expr) => {
        const _: () = {
            #[export_name = $name]
            pub unsafe extern "C" fn handle(
                input: $crate::function::abi::WireSlice,
            ) -> $crate::function::abi::WireOwned {
                unsafe { $crate::function::abi::serve(input, &$handler) }
            }

            #[export_name = concat!($name, "_free")]
            pub unsafe extern "C" fn free(buf: $crate::function::abi::WireOwned) {
                unsafe { $crate::function::abi::release(buf) }
            }
        };
    };
}
