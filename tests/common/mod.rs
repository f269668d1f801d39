//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use simple_test_server::config::{AddressSpec, ServerConfig};
use simple_test_server::{BackendRegistry, ServiceError, ServiceLifecycle};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

static BACKEND_TURN: Mutex<()> = Mutex::const_new(());

/// Only one backend serves per process, so tests that start one take turns.
pub async fn serial() -> MutexGuard<'static, ()> {
    BACKEND_TURN.lock().await
}

/// Config with throwaway directories and a short drain timeout.
pub fn test_config() -> ServerConfig {
    let scratch = scratch_dir();
    let mut config = ServerConfig::default();
    config.http.root = scratch.join("http-files");
    config.ftp.root = scratch.join("ftp-files");
    config.smb.share_path = scratch.join("smb-share");
    config.lifecycle.drain_timeout_secs = 1;
    config
}

pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("simple-test-server-{}", uuid::Uuid::new_v4()))
}

pub fn registry() -> BackendRegistry {
    BackendRegistry::builtin(Arc::new(test_config()))
}

/// A backend whose `start()` runs on a spawned task.
pub struct Running {
    pub backend: Arc<dyn ServiceLifecycle>,
    pub task: JoinHandle<Result<(), ServiceError>>,
    pub addr: SocketAddr,
}

impl Running {
    /// Stop the backend and wait for `start()` to return.
    pub async fn stop(self) -> Result<(), ServiceError> {
        self.backend.stop();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("backend did not stop in time")
            .expect("backend task panicked")
    }
}

/// Resolve `tag`, bind it to an ephemeral loopback port and start it.
pub async fn spawn_backend(registry: &BackendRegistry, tag: &str) -> Running {
    let backend = registry.resolve(tag).unwrap();
    backend.set_address(AddressSpec::new("127.0.0.1", 0)).unwrap();

    let task = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.start().await })
    };
    let addr = wait_for_bound(backend.as_ref()).await;

    Running { backend, task, addr }
}

/// Poll until the backend reports its bound socket address.
pub async fn wait_for_bound(backend: &dyn ServiceLifecycle) -> SocketAddr {
    for _ in 0..500 {
        if let Some(addr) = backend.bound_address() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never bound", backend.name());
}

/// Read until the accumulated text ends with `suffix`.
pub async fn read_until<R: AsyncRead + Unpin>(reader: &mut R, suffix: &str) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    let read = async {
        while !out.ends_with(suffix.as_bytes()) {
            let n = reader.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before {suffix:?}");
            out.extend_from_slice(&buf[..n]);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for server output");
    String::from_utf8(out).unwrap()
}

/// Read until the peer closes; returns everything read.
pub async fn read_to_close<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_to_end(&mut out))
        .await
        .expect("peer did not close")
        .unwrap();
    String::from_utf8(out).unwrap()
}
