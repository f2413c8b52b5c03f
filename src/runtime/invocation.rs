//! Invocations fetched from `GET /invocation/next`.

use crate::http::ApiResponse;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

pub const HEADER_REQUEST_ID: &str = "lambda-runtime-aws-request-id";
pub const HEADER_DEADLINE_MS: &str = "lambda-runtime-deadline-ms";
pub const HEADER_FUNCTION_ARN: &str = "lambda-runtime-invoked-function-arn";
pub const HEADER_TRACE_ID: &str = "lambda-runtime-trace-id";
pub const HEADER_CLIENT_CONTEXT: &str = "lambda-runtime-client-context";
pub const HEADER_COGNITO_IDENTITY: &str = "lambda-runtime-cognito-identity";

/// Why a fetch-next response did not yield an invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchRejected {
    /// Anything but 200.
    #[error("Expected status 200, received {0}")]
    Status(u16),

    /// A 200 without a request id cannot be answered.
    #[error("Response is missing the lambda-runtime-aws-request-id header")]
    MissingRequestId,
}

/// One unit of work.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    /// Epoch milliseconds; `NaN` when the header is absent or malformed.
    pub deadline_ms: f64,
    pub invoked_function_arn: String,
    pub trace_id: Option<String>,
    pub client_context: Option<String>,
    pub cognito_identity: Option<String>,
    /// Raw JSON payload.
    pub payload: Bytes,
}

impl Invocation {
    /// Extract an invocation from a fetch-next response.
    pub fn from_response(response: ApiResponse) -> Result<Self, FetchRejected> {
        if response.status != 200 {
            return Err(FetchRejected::Status(response.status));
        }

        let header = |name: &str| response.get_header(name).map(str::to_string);

        let request_id = header(HEADER_REQUEST_ID)
            .filter(|id| !id.is_empty())
            .ok_or(FetchRejected::MissingRequestId)?;
        let deadline_ms = header(HEADER_DEADLINE_MS)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN);
        let invoked_function_arn = header(HEADER_FUNCTION_ARN).unwrap_or_default();
        let trace_id = header(HEADER_TRACE_ID);
        let client_context = header(HEADER_CLIENT_CONTEXT);
        let cognito_identity = header(HEADER_COGNITO_IDENTITY);

        Ok(Self {
            request_id,
            deadline_ms,
            invoked_function_arn,
            trace_id,
            client_context,
            cognito_identity,
            payload: response.body,
        })
    }

    /// Decode the payload. An empty body decodes to `null`.
    pub fn event(&self) -> Result<Value, serde_json::Error> {
        if self.payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_response() -> ApiResponse {
        ApiResponse::new(200)
            .header("Lambda-Runtime-Aws-Request-Id", "r1")
            .header("Lambda-Runtime-Deadline-Ms", "1700000005000")
            .header("Lambda-Runtime-Invoked-Function-Arn", "arn:fn")
            .header("Lambda-Runtime-Trace-Id", "Root=1-xyz")
            .body(r#"{"n":1}"#)
    }

    #[test]
    fn parses_headers_and_payload() {
        let invocation = Invocation::from_response(next_response()).unwrap();
        assert_eq!(invocation.request_id, "r1");
        assert_eq!(invocation.deadline_ms, 1_700_000_005_000.0);
        assert_eq!(invocation.invoked_function_arn, "arn:fn");
        assert_eq!(invocation.trace_id.as_deref(), Some("Root=1-xyz"));
        assert_eq!(invocation.client_context, None);
        assert_eq!(invocation.event().unwrap(), serde_json::json!({"n": 1}));
    }

    #[test]
    fn non_200_is_rejected() {
        let response = ApiResponse::new(500).body("oops");
        assert_eq!(
            Invocation::from_response(response).unwrap_err(),
            FetchRejected::Status(500)
        );
    }

    #[test]
    fn missing_request_id_is_rejected() {
        let response = ApiResponse::new(200).body("{}");
        assert_eq!(
            Invocation::from_response(response).unwrap_err(),
            FetchRejected::MissingRequestId
        );
    }

    #[test]
    fn bad_deadline_is_nan() {
        let response = next_response().header("Lambda-Runtime-Deadline-Ms", "soon");
        let invocation = Invocation::from_response(response).unwrap();
        assert!(invocation.deadline_ms.is_nan());
    }

    #[test]
    fn empty_payload_is_null() {
        let response = next_response().body("");
        let invocation = Invocation::from_response(response).unwrap();
        assert_eq!(invocation.event().unwrap(), Value::Null);
    }
}
