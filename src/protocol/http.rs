//! Web backend.
//!
//! # Responsibilities
//! - Serve static files from the document root for GET/HEAD
//! - Echo POST/PUT bodies back as JSON
//! - Acknowledge DELETE/PATCH
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Accept through the bounded listener so `max_connections` holds

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tower::ServiceExt;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::backend::{BackendKind, Engine};
use crate::config::{AddressSpec, ServerConfig};
use crate::lifecycle::{ServiceError, ShutdownSignal};
use crate::net::listener::{Accepted, ConnectionPermit};
use crate::net::{Admission, ConnectionLimits, Listener, ListenerError};

pub struct HttpEngine {
    root: PathBuf,
    request_timeout: Duration,
    max_body_bytes: usize,
    max_connections: usize,
    drain_timeout: Duration,
}

#[derive(Clone)]
struct HttpState {
    files: ServeDir,
    max_body_bytes: usize,
}

/// Body of every non-file response.
#[derive(Debug, Serialize)]
struct Ack {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl Ack {
    fn new(method: &Method) -> Self {
        Self {
            status: "ok",
            message: format!("{method} request received."),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Request IDs are random UUIDv4 strings.
#[derive(Debug, Clone, Copy, Default)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

impl HttpEngine {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            root: config.http.root.clone(),
            request_timeout: Duration::from_secs(config.http.request_timeout_secs),
            max_body_bytes: config.http.max_body_bytes,
            max_connections: config.http.max_connections,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let state = HttpState {
            files: ServeDir::new(&self.root),
            max_body_bytes: self.max_body_bytes,
        };

        Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(self.max_body_bytes))
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }
}

#[async_trait]
impl Engine for HttpEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    fn limits(&self) -> ConnectionLimits {
        ConnectionLimits::new(self.max_connections)
    }

    async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    async fn serve(
        &self,
        listener: Listener,
        _bound: AddressSpec,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServiceError> {
        let mut graceful = shutdown.clone();
        let server = axum::serve(BoundedListener(listener), self.router())
            .with_graceful_shutdown(async move { graceful.recv().await })
            .into_future();

        let mut deadline = shutdown;
        let drain_timeout = self.drain_timeout;
        tokio::select! {
            result = server => result.map_err(ServiceError::Transport),
            _ = async move {
                deadline.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                tracing::warn!(backend = self.kind().display_name(), "Drain timeout elapsed, abandoning connections");
                Ok(())
            }
        }
    }
}

/// Feeds hyper only the connections the listener admits.
struct BoundedListener(Listener);

impl axum::serve::Listener for BoundedListener {
    type Io = PermittedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.0.accept().await {
                Ok(Admission::Admitted(Accepted { stream, peer, permit })) => {
                    return (PermittedStream { stream, _permit: permit }, peer);
                }
                Ok(Admission::Refused { peer, .. }) => {
                    tracing::debug!(peer_addr = %peer, "HTTP connection refused");
                }
                // The semaphore is never closed while the listener lives.
                Err(ListenerError::Closed) => std::future::pending::<()>().await,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.0.local_addr()
    }
}

/// A TCP stream that holds its connection slot until hyper drops it.
struct PermittedStream {
    stream: TcpStream,
    _permit: ConnectionPermit,
}

impl AsyncRead for PermittedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for PermittedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

async fn dispatch(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let method = request.method().clone();

    match method {
        Method::GET | Method::HEAD => match state.files.oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        },
        Method::POST | Method::PUT => echo(&method, request, state.max_body_bytes).await,
        Method::DELETE | Method::PATCH => Json(Ack::new(&method)).into_response(),
        _ => (StatusCode::NOT_IMPLEMENTED, "Unsupported method").into_response(),
    }
}

async fn echo(method: &Method, request: Request<Body>, limit: usize) -> Response {
    let bytes = match axum::body::to_bytes(request.into_body(), limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let data = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Json(Ack::new(method).with_data(data)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        root: PathBuf,
        engine: HttpEngine,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn fixture() -> Fixture {
        let root = std::env::temp_dir().join(format!("http-files-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("hello.txt"), "hello world").unwrap();

        let mut config = ServerConfig::default();
        config.http.root = root.clone();
        config.http.max_body_bytes = 64;
        Fixture {
            engine: HttpEngine::new(&config),
            root,
        }
    }

    async fn send(engine: &HttpEngine, method: Method, uri: &str, body: &'static str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        engine.router().oneshot(request).await.unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn serves_static_files() {
        let fx = fixture();
        let response = send(&fx.engine, Method::GET, "/hello.txt", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let missing = send(&fx.engine, Method::GET, "/nope.txt", "").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_echoes_json_body() {
        let fx = fixture();
        let response = send(&fx.engine, Method::POST, "/submit", r#"{"a":1}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json(response).await,
            serde_json::json!({"status": "ok", "message": "POST request received.", "data": {"a": 1}})
        );
    }

    #[tokio::test]
    async fn put_with_empty_body_echoes_null() {
        let fx = fixture();
        let body = json(send(&fx.engine, Method::PUT, "/", "").await).await;
        assert_eq!(body["message"], "PUT request received.");
        assert_eq!(body["data"], Value::Null);
    }

    #[tokio::test]
    async fn non_json_body_is_echoed_as_text() {
        let fx = fixture();
        let body = json(send(&fx.engine, Method::POST, "/", "plain text").await).await;
        assert_eq!(body["data"], "plain text");
    }

    #[tokio::test]
    async fn delete_and_patch_are_acknowledged() {
        let fx = fixture();
        for method in [Method::DELETE, Method::PATCH] {
            let expected = format!("{method} request received.");
            let body = json(send(&fx.engine, method, "/thing", "").await).await;
            assert_eq!(body, serde_json::json!({"status": "ok", "message": expected}));
        }
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let fx = fixture();
        let big = "x".repeat(200).leak();
        let response = send(&fx.engine, Method::POST, "/", big).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn other_methods_are_not_implemented() {
        let fx = fixture();
        let response = send(&fx.engine, Method::OPTIONS, "/", "").await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
