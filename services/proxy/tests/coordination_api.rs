//! Endpoint matrix for the coordination HTTP server.

use proxy::coordination::{CoordinationEvent, CoordinationServer};
use serde_json::Value;
use std::time::Duration;

async fn start_server(dir: &std::path::Path) -> (CoordinationServer, String) {
    let server = CoordinationServer::start("127.0.0.1:0".parse().unwrap(), dir)
        .await
        .unwrap();
    let base = format!("http://{}", server.local_addr());
    (server, base)
}

#[tokio::test]
async fn history_404_until_uploaded_then_served_raw() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_server, base) = start_server(dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/history")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "No current history available");

    let payload = b"\x08\x01\x12\x04test".to_vec();
    let resp = client
        .post(format!("{base}/history"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client.get(format!("{base}/history")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/octet-stream"
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload.as_slice());
}

#[tokio::test]
async fn breakpoints_follow_hash_invalidation_matrix() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_server, base) = start_server(dir.path()).await;
    let client = reqwest::Client::new();

    let upload = |bytes: &'static [u8]| {
        let client = client.clone();
        let url = format!("{base}/history");
        async move {
            assert_eq!(
                client.post(url).body(bytes).send().await.unwrap().status(),
                200
            );
        }
    };
    let breakpoints = || {
        let client = client.clone();
        let url = format!("{base}/breakpoints");
        async move {
            let body: Value = client.get(url).send().await.unwrap().json().await.unwrap();
            body["breakpoints"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_u64().unwrap())
                .collect::<Vec<u64>>()
        }
    };

    upload(b"H1").await;
    let resp = client
        .post(format!("{base}/breakpoints"))
        .body(r#"{"breakpoints":[3,9]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(breakpoints().await, vec![3u64, 9]);

    // Same bytes: set preserved.
    upload(b"H1").await;
    assert_eq!(breakpoints().await, vec![3u64, 9]);

    // Different bytes: cleared.
    upload(b"H2").await;
    assert!(breakpoints().await.is_empty());

    // Re-upload of H2: still empty.
    upload(b"H2").await;
    assert!(breakpoints().await.is_empty());

    // Back to H1: hash changed again, still empty.
    upload(b"H1").await;
    assert!(breakpoints().await.is_empty());
}

#[tokio::test]
async fn current_event_reports_reach_the_ui_bus() {
    let dir = tempfile::TempDir::new().unwrap();
    let (server, base) = start_server(dir.path()).await;
    let client = reqwest::Client::new();
    let mut events = server.subscribe();

    let resp = client
        .post(format!("{base}/current-event"))
        .body(r#"{"eventId":17}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event published")
        .unwrap();
    assert_eq!(
        event,
        CoordinationEvent::CurrentEventChanged { event_id: Some(17) }
    );

    let resp = client
        .delete(format!("{base}/current-event"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event published")
        .unwrap();
    assert_eq!(
        event,
        CoordinationEvent::CurrentEventChanged { event_id: None }
    );
}

#[tokio::test]
async fn malformed_current_event_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_server, base) = start_server(dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/current-event"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_endpoint_reports_bound_port() {
    let dir = tempfile::TempDir::new().unwrap();
    let (server, base) = start_server(dir.path()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{base}/test"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(
        body["port"].as_u64().unwrap(),
        u64::from(server.local_addr().port())
    );
}

#[tokio::test]
async fn state_survives_server_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = reqwest::Client::new();

    {
        let (_server, base) = start_server(dir.path()).await;
        client
            .post(format!("{base}/history"))
            .body(b"persisted".as_slice())
            .send()
            .await
            .unwrap();
        client
            .post(format!("{base}/breakpoints"))
            .body(r#"{"breakpoints":[5]}"#)
            .send()
            .await
            .unwrap();
    }

    let (_server, base) = start_server(dir.path()).await;
    let resp = client.get(format!("{base}/history")).send().await.unwrap();
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"persisted");

    let body: Value = client
        .get(format!("{base}/breakpoints"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["breakpoints"].as_array().unwrap().len(), 1);

    // Re-uploading the same bytes after restart keeps the set.
    client
        .post(format!("{base}/history"))
        .body(b"persisted".as_slice())
        .send()
        .await
        .unwrap();
    let body: Value = client
        .get(format!("{base}/breakpoints"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["breakpoints"][0], 5);
}
