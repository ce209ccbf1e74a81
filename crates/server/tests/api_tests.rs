//! In-process tests of the operator API and metrics endpoint.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::{sleep, timeout};

use relay_core::{AckToken, ChannelEvent, ServerMessage, SessionConfig};

use common::{TestFixture, API_KEY};

async fn start_transcode(channel: &mut relay_core::ClientChannel) {
    channel
        .intents
        .send(ChannelEvent::Start {
            config: SessionConfig::new(30, 44100, "rtmp://ingest.example.com/live/key"),
            ack: Some(AckToken::Request(1)),
        })
        .await
        .unwrap();

    let ack = timeout(Duration::from_secs(5), channel.messages.recv())
        .await
        .expect("timed out waiting for start ack")
        .expect("channel closed");
    assert_eq!(
        ack,
        ServerMessage::Ack {
            token: AckToken::Request(1),
            error: None
        }
    );
}

// =============================================================================
// Health and config
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["connections"], 0);
    assert_eq!(response.body["active_transcodes"], 0);
    assert_eq!(response.body["shutting_down"], false);
}

#[tokio::test]
async fn test_config_endpoint_hides_secrets() {
    let mut config = TestFixture::base_config();
    config.policy.rtmp_url_template = Some("rtmp://ingest.example.com/live/{key}".to_string());
    config.limits.max_concurrent_transcodes = Some(2);
    let fixture = TestFixture::with_config(config);

    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["auth"]["method"], "none");
    assert_eq!(response.body["auth"]["api_key_configured"], false);
    assert_eq!(response.body["limits"]["max_concurrent_transcodes"], 2);
    assert_eq!(response.body["policy"]["rtmp_url_template_configured"], true);
    assert!(!response.text.contains("{key}"));
}

#[tokio::test]
async fn test_config_endpoint_never_returns_api_key() {
    let fixture = TestFixture::with_api_key();

    let response = fixture
        .get_with_header("/api/v1/config", "x-api-key", API_KEY)
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["auth"]["method"], "api_key");
    assert_eq!(response.body["auth"]["api_key_configured"], true);
    assert!(!response.text.contains(API_KEY));
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_api_requires_key_when_configured() {
    let fixture = TestFixture::with_api_key();

    let missing = fixture.get("/api/v1/connections").await;
    assert_status!(missing, StatusCode::UNAUTHORIZED);

    let wrong = fixture
        .get_with_header("/api/v1/connections", "authorization", "Bearer nope")
        .await;
    assert_status!(wrong, StatusCode::UNAUTHORIZED);

    let ok = fixture
        .get_with_header(
            "/api/v1/connections",
            "authorization",
            &format!("Bearer {}", API_KEY),
        )
        .await;
    assert_status!(ok, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_is_not_behind_auth() {
    let fixture = TestFixture::with_api_key();

    let response = fixture.get("/metrics").await;

    assert_status!(response, StatusCode::OK);
    assert!(response.text.contains("relay_connections"));
    assert!(response.text.contains("# TYPE"));
}

// =============================================================================
// Connections
// =============================================================================

#[tokio::test]
async fn test_connections_listed_in_accept_order() {
    let fixture = TestFixture::new();
    let first = fixture.connect().await;
    let second = fixture.connect().await;

    let response = fixture.get("/api/v1/connections").await;

    assert_status!(response, StatusCode::OK);
    let connections = response.body["connections"].as_array().unwrap();
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[0]["id"], first.id.to_string());
    assert_eq!(connections[1]["id"], second.id.to_string());
    assert!(connections[0]["transcoder"].is_null());
    assert!(connections[0]["connectedAt"].is_string());
}

#[tokio::test]
async fn test_connection_detail_shows_running_transcoder() {
    let fixture = TestFixture::new();
    let mut channel = fixture.connect().await;
    start_transcode(&mut channel).await;

    let response = fixture
        .get(&format!("/api/v1/connections/{}", channel.id))
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["id"], channel.id.to_string());
    assert_eq!(response.body["transcoder"]["state"], "RUNNING");
    assert_eq!(response.body["transcoder"]["config"]["framerate"], 30);

    let health = fixture.get("/api/v1/health").await;
    assert_eq!(health.body["active_transcodes"], 1);
}

#[tokio::test]
async fn test_connection_removed_after_disconnect() {
    let fixture = TestFixture::new();
    let mut channel = fixture.connect().await;
    start_transcode(&mut channel).await;
    let id = channel.id;

    channel.intents.send(ChannelEvent::Disconnect).await.unwrap();
    timeout(Duration::from_secs(5), channel.task)
        .await
        .unwrap()
        .unwrap();

    let response = fixture.get(&format!("/api/v1/connections/{}", id)).await;
    assert_status!(response, StatusCode::NOT_FOUND);

    // The slot is released once the process has exited.
    for _ in 0..100 {
        if fixture.relay.active_transcodes() == 0 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let health = fixture.get("/api/v1/health").await;
    assert_eq!(health.body["connections"], 0);
    assert_eq!(health.body["active_transcodes"], 0);
}

#[tokio::test]
async fn test_unknown_connection_is_not_found() {
    let fixture = TestFixture::new();

    let response = fixture
        .get("/api/v1/connections/550e8400-e29b-41d4-a716-446655440000")
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("Connection not found"));

    let malformed = fixture.get("/api/v1/connections/not-a-uuid").await;
    assert_status!(malformed, StatusCode::NOT_FOUND);
}
