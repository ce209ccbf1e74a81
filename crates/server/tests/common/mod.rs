//! Common test utilities for in-process API testing.
//!
//! The fixture builds the real router around a relay whose "ffmpeg" is a
//! shell that swallows its input, so transcodes can be started without
//! external infrastructure.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use relay_core::{
    create_authenticator, AuthMethod, ClientChannel, Config, PeerInfo, RelayOptions, RelayServer,
};
use relay_server::{api::create_router, state::AppState};

pub const API_KEY: &str = "test-operator-key";

/// Test fixture for in-process API testing.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// The relay behind the router, for opening client channels directly
    pub relay: RelayServer,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a new test fixture with no operator authentication.
    pub fn new() -> Self {
        Self::with_config(Self::base_config())
    }

    /// Create a fixture requiring [`API_KEY`] on the operator API.
    pub fn with_api_key() -> Self {
        let mut config = Self::base_config();
        config.auth.method = AuthMethod::ApiKey;
        config.auth.api_key = Some(API_KEY.to_string());
        Self::with_config(config)
    }

    /// Create a test fixture with custom configuration.
    pub fn with_config(config: Config) -> Self {
        let authenticator = Arc::from(
            create_authenticator(&config.auth).expect("Failed to create authenticator"),
        );
        let options = RelayOptions::from_config(&config).expect("Invalid relay options");
        let relay = RelayServer::new(options);
        let state = Arc::new(AppState::new(config, authenticator, relay.clone()));

        Self {
            router: create_router(state),
            relay,
        }
    }

    /// Config whose transcoder is `sh -c 'exec cat >/dev/null'`.
    pub fn base_config() -> Config {
        let mut config = Config::default();
        config.transcoder.ffmpeg_path = PathBuf::from("/bin/sh");
        config.transcoder.global_args = vec!["-c".to_string(), "exec cat >/dev/null".to_string()];
        config
    }

    /// Open a client channel on the relay, bypassing the WebSocket layer.
    pub async fn connect(&self) -> ClientChannel {
        self.relay.spawn_connection(PeerInfo::new(None)).await
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Request::builder().uri(path)).await
    }

    /// Send a GET request with one extra header.
    pub async fn get_with_header(&self, path: &str, name: &str, value: &str) -> TestResponse {
        self.request(Request::builder().uri(path).header(name, value))
            .await
    }

    async fn request(&self, builder: axum::http::request::Builder) -> TestResponse {
        let request = builder.body(Body::empty()).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}
