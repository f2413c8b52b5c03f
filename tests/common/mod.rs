//! Mock runtime API used by the integration tests.
//!
//! Serves scripted `GET /invocation/next` responses from a queue and records
//! every request it sees. When the queue is empty a fetch is held open, the
//! way the real endpoint long-polls.

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use lambda_loop::Config;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// A request the mock endpoint received.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl Recorded {
    /// Body parsed as JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// A scripted answer to `GET /invocation/next`.
#[derive(Debug, Clone)]
pub struct Next {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Next {
    /// A 200 carrying an invocation with `request_id` and a deadline five
    /// seconds from now.
    pub fn invocation(request_id: &str, body: &str) -> Self {
        let deadline = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis()
            + 5000;
        Self {
            status: 200,
            headers: vec![
                ("Lambda-Runtime-Aws-Request-Id".into(), request_id.into()),
                ("Lambda-Runtime-Deadline-Ms".into(), deadline.to_string()),
                (
                    "Lambda-Runtime-Invoked-Function-Arn".into(),
                    "arn:aws:lambda:us-east-1:123456789012:function:test".into(),
                ),
            ],
            body: body.into(),
        }
    }

    /// A bare status with no invocation.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct State {
    next: VecDeque<Next>,
    report_status: VecDeque<u16>,
    requests: Vec<Recorded>,
}

/// Handle to a running mock endpoint.
#[derive(Clone)]
pub struct MockRuntimeApi {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    queued: Arc<Notify>,
}

impl MockRuntimeApi {
    /// Bind to an ephemeral local port and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mock = Self {
            addr,
            state: Arc::new(Mutex::new(State::default())),
            queued: Arc::new(Notify::new()),
        };

        let server = mock.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let io = TokioIo::new(stream);
                let server = server.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let server = server.clone();
                        async move { server.handle(req).await }
                    });
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });

        mock
    }

    /// `host:port` of the endpoint.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// A config pointing at this endpoint.
    pub fn config(&self) -> Config {
        Config::new()
            .runtime_api(self.addr())
            .function("test", "1")
            .request_timeout(Duration::from_secs(5))
    }

    /// Queue an answer for the next fetch.
    pub fn push(&self, next: Next) {
        self.state.lock().unwrap().next.push_back(next);
        self.queued.notify_one();
    }

    /// Answer the next report POST with `status` instead of 202.
    pub fn fail_next_report(&self, status: u16) {
        self.state.lock().unwrap().report_status.push_back(status);
    }

    /// Snapshot of every request seen so far.
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests other than fetches.
    pub fn reports(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect()
    }

    /// Number of `GET /invocation/next` calls seen so far.
    pub fn fetches(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "GET")
            .count()
    }

    /// Wait until at least `count` requests were recorded.
    pub async fn wait_for_requests(&self, count: usize) -> Vec<Recorded> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let requests = self.requests();
                if requests.len() >= count {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mock runtime API did not see enough requests")
    }

    async fn handle(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let body = req.collect().await?.to_bytes();

        self.state.lock().unwrap().requests.push(Recorded {
            method: method.clone(),
            path: path.clone(),
            body: String::from_utf8_lossy(&body).to_string(),
        });

        if method == "GET" && path == "/2018-06-01/runtime/invocation/next" {
            let next = self.next().await;
            let mut builder = Response::builder().status(next.status);
            for (name, value) in &next.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            return Ok(builder.body(Full::new(Bytes::from(next.body))).unwrap());
        }

        let status = self
            .state
            .lock()
            .unwrap()
            .report_status
            .pop_front()
            .unwrap_or(202);
        Ok(Response::builder()
            .status(status)
            .body(Full::new(Bytes::from_static(b"{\"status\":\"OK\"}")))
            .unwrap())
    }

    async fn next(&self) -> Next {
        loop {
            if let Some(next) = self.state.lock().unwrap().next.pop_front() {
                return next;
            }
            self.queued.notified().await;
        }
    }
}
