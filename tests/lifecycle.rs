//! Start/stop behaviour of real backends on loopback.

use std::time::Duration;

use simple_test_server::config::AddressSpec;
use simple_test_server::{LifecycleState, ServiceError};

mod common;

#[tokio::test]
async fn stop_releases_the_address() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let running = common::spawn_backend(&registry, "ssh").await;
    let addr = running.addr;
    let backend = running.backend.clone();
    assert_eq!(backend.state(), LifecycleState::Running);

    running.stop().await.unwrap();

    assert_eq!(backend.state(), LifecycleState::Stopped);
    assert!(backend.bound_address().is_none());
    std::net::TcpListener::bind(addr).expect("address still held after stop");
}

#[tokio::test]
async fn new_backend_binds_the_same_address_after_stop() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let first = common::spawn_backend(&registry, "ssh").await;
    let port = first.addr.port();
    first.stop().await.unwrap();

    let second = registry.resolve("ssh").unwrap();
    second.set_address(AddressSpec::new("127.0.0.1", port)).unwrap();
    let task = {
        let backend = second.clone();
        tokio::spawn(async move { backend.start().await })
    };
    let addr = common::wait_for_bound(second.as_ref()).await;
    assert_eq!(addr.port(), port);

    second.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_twice_is_a_no_op() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let running = common::spawn_backend(&registry, "mqtt").await;
    let backend = running.backend.clone();

    backend.stop();
    backend.stop();
    running.stop().await.unwrap();
    backend.stop();
    assert_eq!(backend.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn stopped_backend_does_not_restart() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let running = common::spawn_backend(&registry, "smtp").await;
    let backend = running.backend.clone();
    running.stop().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), backend.start())
        .await
        .expect("start on a stopped backend should return at once")
        .unwrap();
    assert_eq!(backend.state(), LifecycleState::Stopped);
    assert!(backend.bound_address().is_none());
}

#[tokio::test]
async fn second_start_while_running_returns_immediately() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let running = common::spawn_backend(&registry, "ssh").await;

    tokio::time::timeout(Duration::from_secs(1), running.backend.start())
        .await
        .expect("second start() should not block")
        .unwrap();
    assert_eq!(running.backend.state(), LifecycleState::Running);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn only_one_backend_runs_at_a_time() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let first = common::spawn_backend(&registry, "ssh").await;

    let second = registry.resolve("http").unwrap();
    second.set_address(AddressSpec::new("127.0.0.1", 0)).unwrap();
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::AnotherBackendRunning));
    assert_eq!(second.state(), LifecycleState::Idle);

    first.stop().await.unwrap();

    let third = common::spawn_backend(&registry, "http").await;
    assert_eq!(third.backend.state(), LifecycleState::Running);
    third.stop().await.unwrap();
}

#[tokio::test]
async fn separate_registries_share_one_run_slot() {
    let _serial = common::serial().await;
    let first_registry = common::registry();
    let second_registry = common::registry();
    let first = common::spawn_backend(&first_registry, "ssh").await;

    let second = second_registry.resolve("mqtt").unwrap();
    second.set_address(AddressSpec::new("127.0.0.1", 0)).unwrap();
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::AnotherBackendRunning));
    assert_eq!(second.state(), LifecycleState::Idle);
    assert!(second.bound_address().is_none());

    first.stop().await.unwrap();
}

#[tokio::test]
async fn bind_conflict_fails_start_and_stops_backend() {
    let _serial = common::serial().await;
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();

    let registry = common::registry();
    let backend = registry.resolve("ftp").unwrap();
    backend.set_address(AddressSpec::new("127.0.0.1", port)).unwrap();

    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::Bind { .. }));
    assert_eq!(backend.state(), LifecycleState::Stopped);

    // The failed backend gave its run slot back.
    let other = common::spawn_backend(&registry, "smb").await;
    other.stop().await.unwrap();
}

#[tokio::test]
async fn address_is_frozen_while_running() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let running = common::spawn_backend(&registry, "ssh").await;

    let err = running
        .backend
        .set_address(AddressSpec::new("127.0.0.1", 2222))
        .unwrap_err();
    assert!(matches!(err, ServiceError::AddressFrozen(LifecycleState::Running)));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn stop_before_start_leaves_backend_startable() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let backend = registry.resolve("ssh").unwrap();
    backend.stop();
    assert_eq!(backend.state(), LifecycleState::Idle);

    backend.set_address(AddressSpec::new("127.0.0.1", 0)).unwrap();
    let task = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.start().await })
    };
    common::wait_for_bound(backend.as_ref()).await;
    backend.stop();
    task.await.unwrap().unwrap();
}
