//! Mock round-trippers shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use cluster_transport::{
    GetBody, Request, Response, RoundTripper, TransportError, ports::TransportResult,
};
use http::{HeaderMap, Method, Uri};
use http_body_util::BodyExt;
use parking_lot::Mutex;

pub const GREETING: &str = r#"{
    "name": "node-1",
    "cluster_name": "test-cluster",
    "version": { "number": "2.11.0" }
}"#;

/// What the transport saw for one attempt.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub has_get_body: bool,
}

impl Recorded {
    pub fn host(&self) -> &str {
        self.uri.host().unwrap_or_default()
    }
}

/// A canned answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Json(u16, String),
    Error(TransportError),
}

impl Reply {
    pub fn ok_json(body: &str) -> Self {
        Reply::Json(200, body.to_string())
    }

    pub fn connection_refused() -> Self {
        Reply::Error(TransportError::Connection("connection refused".to_string()))
    }

    pub fn timeout() -> Self {
        Reply::Error(TransportError::Timeout("operation timed out".to_string()))
    }

    fn into_result(self) -> TransportResult<Response> {
        match self {
            Reply::Status(status) => Ok(http::Response::builder()
                .status(status)
                .body(Body::empty())
                .unwrap()),
            Reply::Json(status, json) => Ok(http::Response::builder()
                .status(status)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(json))
                .unwrap()),
            Reply::Error(err) => Err(err),
        }
    }
}

type Handler = Box<dyn Fn(&Recorded) -> Reply + Send + Sync>;

/// Round-tripper that records every request and answers through a handler.
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<Recorded>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Same answer for every request.
    pub fn always(reply: Reply) -> Arc<Self> {
        Self::new(move |_| reply.clone())
    }

    /// Answers in order; the last one repeats.
    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            let mut replies = replies.lock();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests whose path is `path`.
    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.uri.path() == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RoundTripper for MockTransport {
    async fn round_trip(&self, req: Request) -> TransportResult<Response> {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?
            .to_bytes();

        let recorded = Recorded {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            has_get_body: parts.extensions.get::<GetBody>().is_some(),
        };
        let reply = (self.handler)(&recorded);
        self.requests.lock().push(recorded);
        reply.into_result()
    }
}

/// Counts calls of a retry backoff.
#[derive(Debug, Default, Clone)]
pub struct BackoffCounter(Arc<AtomicUsize>);

impl BackoffCounter {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Body for a `/_nodes/http` answer: `(id, name, roles, publish_address)`.
pub fn nodes_json(nodes: &[(&str, &str, &[&str], &str)]) -> String {
    let entries: serde_json::Map<String, serde_json::Value> = nodes
        .iter()
        .map(|(id, name, roles, address)| {
            (
                id.to_string(),
                serde_json::json!({
                    "name": name,
                    "roles": roles,
                    "http": { "publish_address": address }
                }),
            )
        })
        .collect();
    serde_json::json!({ "nodes": entries }).to_string()
}

pub fn get(path: &str) -> Request {
    http::Request::get(path).body(Body::empty()).unwrap()
}

pub fn post(path: &str, body: &'static str) -> Request {
    http::Request::post(path).body(Body::from(body)).unwrap()
}
