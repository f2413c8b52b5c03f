//! Handler trait, completion styles and handler error type.

use crate::function::completion::Callback;
use crate::function::context::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Future returned by a handler that completes through a deferred value.
pub type DeferredValue = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'static>>;

/// How a handler intends to complete after its synchronous phase.
pub enum Completion {
    /// The handler will (or already did) signal through the callback.
    Callback,
    /// The settlement of this future is the outcome.
    Deferred(DeferredValue),
}

impl Completion {
    /// Wrap a future as a deferred completion.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Completion::Deferred(Box::pin(future))
    }

    /// A deferred completion that is already settled.
    pub fn ready(result: Result<Value, HandlerError>) -> Self {
        Self::deferred(std::future::ready(result))
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Callback => write!(f, "Completion::Callback"),
            Completion::Deferred(_) => write!(f, "Completion::Deferred(..)"),
        }
    }
}

/// A user function invoked once per invocation.
///
/// The handler receives the payload, the invocation context and a
/// callback. It either returns [`Completion::Callback`] and signals through
/// the callback (possibly from a spawned task), or returns
/// [`Completion::Deferred`] and lets the future's result stand. Returning
/// `Err` is a synchronous failure.
///
/// Whichever signal arrives first decides the outcome; the rest are ignored.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        event: Value,
        ctx: Context,
        callback: Callback,
    ) -> Result<Completion, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Value, Context, Callback) -> Result<Completion, HandlerError> + Send + Sync,
{
    fn call(
        &self,
        event: Value,
        ctx: Context,
        callback: Callback,
    ) -> Result<Completion, HandlerError> {
        self(event, ctx, callback)
    }
}

/// Error signalled by a handler, or produced by the runtime on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Human readable message.
    pub message: String,
    /// Classification tag reported as `errorType`.
    pub error_type: String,
}

impl HandlerError {
    /// Create a new error with the generic `Error` type.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_type("Error", message)
    }

    /// Create an error with a specific type tag.
    pub fn with_type(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
        }
    }

    /// Build an error from any `std::error::Error`, tagged with its type name.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::with_type(short_type_name::<E>(), err.to_string())
    }

    /// Build an error from a panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::with_type("Runtime.HandlerPanic", message)
    }

    /// The wire body for this error.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            error_message: self.message.clone(),
            error_type: self.error_type.clone(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::from_error(&err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::from_error(&err)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

/// JSON body posted to the error endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_message: String,
    pub error_type: String,
}

impl From<&HandlerError> for ErrorReport {
    fn from(err: &HandlerError) -> Self {
        err.report()
    }
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_uses_camel_case_keys() {
        let body = serde_json::to_value(HandlerError::new("boom").report()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"errorMessage": "boom", "errorType": "Error"})
        );
    }

    #[test]
    fn from_error_uses_short_type_name() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = HandlerError::from(io);
        assert_eq!(err.error_type, "Error");
        assert_eq!(err.message, "disk on fire");

        let json = serde_json::from_str::<Value>("{").unwrap_err();
        assert_eq!(HandlerError::from(json).error_type, "Error");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = HandlerError::from_panic(Box::new("kaput"));
        assert_eq!(err.error_type, "Runtime.HandlerPanic");
        assert_eq!(err.message, "kaput");

        let err = HandlerError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.message, "owned");

        let err = HandlerError::from_panic(Box::new(42u8));
        assert_eq!(err.message, "Unknown panic");
    }
}
