//! Web backend over a real socket.

use std::time::Duration;

use serde_json::{json, Value};

mod common;

#[tokio::test]
async fn serves_files_and_echoes_bodies() {
    let _serial = common::serial().await;
    let mut config = common::test_config();
    std::fs::create_dir_all(&config.http.root).unwrap();
    std::fs::write(config.http.root.join("index.html"), "<h1>ok</h1>").unwrap();
    config.server_type = "http".into();

    let registry = simple_test_server::BackendRegistry::builtin(std::sync::Arc::new(config));
    let running = common::spawn_backend(&registry, "http").await;
    let base = format!("http://{}", running.addr);
    let client = reqwest::Client::new();

    let page = client.get(format!("{base}/index.html")).send().await.unwrap();
    assert_eq!(page.status(), 200);
    assert!(page.headers().contains_key("x-request-id"));
    assert_eq!(page.text().await.unwrap(), "<h1>ok</h1>");

    let echoed: Value = client
        .post(format!("{base}/api"))
        .json(&json!({"name": "probe"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        echoed,
        json!({"status": "ok", "message": "POST request received.", "data": {"name": "probe"}})
    );

    let deleted: Value = client
        .delete(format!("{base}/api/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted, json!({"status": "ok", "message": "DELETE request received."}));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn stop_releases_http_port() {
    let _serial = common::serial().await;
    let registry = common::registry();
    let running = common::spawn_backend(&registry, "http").await;
    let addr = running.addr;

    let response = reqwest::get(format!("http://{addr}/missing")).await.unwrap();
    assert_eq!(response.status(), 404);

    running.stop().await.unwrap();
    std::net::TcpListener::bind(addr).expect("address still held after stop");
}

#[tokio::test]
async fn connection_limit_holds_back_extra_clients() {
    let _serial = common::serial().await;
    let mut config = common::test_config();
    config.http.max_connections = 1;
    let registry = simple_test_server::BackendRegistry::builtin(std::sync::Arc::new(config));
    let running = common::spawn_backend(&registry, "http").await;
    let url = format!("http://{}/missing", running.addr);

    // An idle keep-alive connection occupies the only slot.
    let idle = tokio::net::TcpStream::connect(running.addr).await.unwrap();

    let blocked = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap()
        .get(&url)
        .send()
        .await;
    assert!(blocked.is_err(), "second connection was served over the limit");

    drop(idle);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let served = client.get(&url).send().await.unwrap();
    assert_eq!(served.status(), 404);
    drop(client);

    running.stop().await.unwrap();
}
