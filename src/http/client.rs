//! Control-channel client for the runtime API.

use crate::function::handler::ErrorReport;
use crate::http::ApiResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Path prefix shared by every runtime API route.
pub const API_PREFIX: &str = "/2018-06-01/runtime";

/// Errors raised by a control-channel round trip.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not open the TCP connection.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Protocol or transport failure on an open connection.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The request did not finish within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with a non-2xx status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The request body could not be encoded.
    #[error("Failed to serialize body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The four request shapes of the runtime API.
#[async_trait]
pub trait RuntimeApi: Send {
    /// `GET /invocation/next`. Any status is returned as-is.
    async fn next_invocation(&mut self) -> Result<ApiResponse, ClientError>;

    /// `POST /invocation/{id}/response`.
    async fn post_response(&mut self, request_id: &str, value: &Value) -> Result<(), ClientError>;

    /// `POST /invocation/{id}/error`.
    async fn post_error(
        &mut self,
        request_id: &str,
        error: &ErrorReport,
    ) -> Result<(), ClientError>;

    /// `POST /init/error`.
    async fn post_init_error(&mut self, error: &ErrorReport) -> Result<(), ClientError>;
}

/// HTTP/1.1 client holding a single reused connection to the endpoint.
///
/// The connection is opened on first use and reopened only after the
/// previous one closed or a request on it failed.
pub struct RuntimeApiClient {
    /// Endpoint address as `host:port`.
    addr: String,
    /// Timeout applied to each round trip.
    timeout: Option<Duration>,
    /// Sender half of the live connection.
    sender: Option<SendRequest<Full<Bytes>>>,
}

impl RuntimeApiClient {
    /// Create a client for `addr` (`host:port`). No connection is opened yet.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
            sender: None,
        }
    }

    /// Set a timeout for report posts.
    ///
    /// `GET /invocation/next` is a long poll that legitimately blocks until
    /// work arrives, so it is never subject to this limit.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(addr: &str) -> Result<SendRequest<Full<Bytes>>, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let io = TokioIo::new(stream);
        let (sender, conn) = http1::handshake(io).await?;

        let peer = addr.to_string();
        tokio::task::spawn(async move {
            if let Err(err) = conn.await {
                debug!("Connection to {} closed: {:?}", peer, err);
            }
        });

        debug!("Connected to runtime API at {}", addr);
        Ok(sender)
    }

    async fn round_trip(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<ApiResponse, ClientError> {
        let sender = match self.sender.take() {
            Some(sender) if !sender.is_closed() => sender,
            _ => Self::connect(&self.addr).await?,
        };
        let sender = self.sender.insert(sender);
        sender.ready().await?;

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", API_PREFIX, path))
            .header(HOST, self.addr.as_str())
            .header(ACCEPT, "application/json");
        let body = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder.body(body)?;

        let response = sender.send_request(request).await?;
        let (parts, incoming) = response.into_parts();
        let body = incoming.collect().await?.to_bytes();

        Ok(ApiResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
        })
    }

    async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<ApiResponse, ClientError> {
        trace!("{} {}{}", method, API_PREFIX, path);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.round_trip(method, path, body))
                .await
                .unwrap_or(Err(ClientError::Timeout(limit))),
            None => self.round_trip(method, path, body).await,
        };
        if result.is_err() {
            // The connection may be mid-message; start fresh next time.
            self.sender = None;
        }
        result
    }

    async fn post_json(&mut self, path: &str, body: Vec<u8>) -> Result<(), ClientError> {
        let response = self
            .request(Method::POST, path, Some(body), self.timeout)
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(ClientError::UnexpectedStatus {
                status: response.status,
                body: response.text(),
            })
        }
    }
}

#[async_trait]
impl RuntimeApi for RuntimeApiClient {
    async fn next_invocation(&mut self) -> Result<ApiResponse, ClientError> {
        self.request(Method::GET, "/invocation/next", None, None)
            .await
    }

    async fn post_response(&mut self, request_id: &str, value: &Value) -> Result<(), ClientError> {
        let body = serde_json::to_vec(value)?;
        self.post_json(&format!("/invocation/{}/response", request_id), body)
            .await
    }

    async fn post_error(
        &mut self,
        request_id: &str,
        error: &ErrorReport,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_vec(error)?;
        self.post_json(&format!("/invocation/{}/error", request_id), body)
            .await
    }

    async fn post_init_error(&mut self, error: &ErrorReport) -> Result<(), ClientError> {
        let body = serde_json::to_vec(error)?;
        self.post_json("/init/error", body).await
    }
}
