// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

// Allow expect/unwrap in tests - they provide clear panic messages on failure
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Integration tests for the transfer agent HTTP API.
//!
//! Each test boots one or two real agents on ephemeral ports. A wiremock
//! server stands in for the control plane, and where a test needs a
//! misbehaving source node, for that too.
//!
//! Scenarios:
//! 1. Archive download: missing archive, auth failures, headers and body
//! 2. Outgoing transfer: archive built and reported to the control plane
//! 3. Incoming transfer: upstream error, checksum mismatch, stale archive
//! 4. Full migration of a server from one agent to another

use std::path::{Path, PathBuf};
use std::time::Duration;

use dropshot::{ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HttpServerStarter};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use transfer_agent::auth::TokenSigner;
use transfer_agent::config::AgentConfig;
use transfer_types::{IncomingTransferPayload, TransferSessionView, TransferState};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "integration-secret";

// ============================================================================
// Test Infrastructure
// ============================================================================

/// A running agent plus the mock control plane it reports to
struct TestContext {
    /// HTTP client for talking to the agent
    client: reqwest::Client,
    /// Base URL for the agent server
    agent_url: String,
    /// Mock control plane
    panel: MockServer,
    /// Agent configuration
    config: AgentConfig,
    /// Temp directory for agent data (kept alive for test duration)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Start an agent hosting the given servers, each with a couple of files
    async fn new(servers: &[&str]) -> Self {
        transfer_agent::install_crypto_provider();
        transfer_agent::metrics::register_metrics();

        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let panel = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/remote/servers/.+"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&panel)
            .await;

        let config = AgentConfig {
            data_dir: temp_dir.path().join("volumes"),
            archive_dir: temp_dir.path().join("archives"),
            download_limit: 0,
            stop_timeout: Duration::from_secs(5),
            panel_url: panel.uri(),
            panel_token: "panel-token".to_string(),
            token_secret: SECRET.to_string(),
        };

        for server in servers {
            let dir = config.workload_dir(server);
            std::fs::create_dir_all(dir.join("world")).unwrap();
            std::fs::write(dir.join("server.properties"), format!("motd={}", server)).unwrap();
            std::fs::write(dir.join("world").join("level.dat"), vec![42u8; 64 * 1024]).unwrap();
        }

        let api_context = transfer_agent::context::ApiContext::new(config.clone())
            .await
            .expect("failed to create API context");

        let api = transfer_agent_api::transfer_agent_api_mod::api_description::<
            transfer_agent::TransferAgentImpl,
        >()
        .expect("failed to create API description");

        let config_dropshot = ConfigDropshot {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            default_request_body_max_bytes: 1024 * 1024,
            default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
            ..Default::default()
        };

        let config_logging = ConfigLogging::StderrTerminal {
            level: ConfigLoggingLevel::Error,
        };
        let log = config_logging
            .to_logger("test-agent")
            .expect("failed to create logger");

        let server = HttpServerStarter::new(&config_dropshot, api, api_context, &log)
            .expect("failed to create server")
            .start();

        let agent_url = format!("http://{}", server.local_addr());

        // Leak the server handle to keep it running for the duration of the test
        std::mem::forget(server);

        Self {
            client: reqwest::Client::new(),
            agent_url,
            panel,
            config,
            _temp_dir: temp_dir,
        }
    }

    fn archive_url(&self, server: &str) -> String {
        format!("{}/api/servers/{}/archive", self.agent_url, server)
    }

    fn token(server: &str) -> String {
        TokenSigner::new(SECRET)
            .sign(server, Duration::from_secs(600))
            .unwrap()
    }

    async fn get_archive(&self, server: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.archive_url(server));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("failed to send request")
    }

    async fn post_archive(&self, server: &str) -> StatusCode {
        self.client
            .post(self.archive_url(server))
            .send()
            .await
            .expect("failed to send request")
            .status()
    }

    async fn post_transfer(&self, payload: &IncomingTransferPayload) -> StatusCode {
        self.client
            .post(format!("{}/api/transfer", self.agent_url))
            .json(payload)
            .send()
            .await
            .expect("failed to send request")
            .status()
    }

    async fn get_transfer(&self, server: &str) -> Option<TransferSessionView> {
        let response = self
            .client
            .get(format!("{}/api/servers/{}/transfer", self.agent_url, server))
            .send()
            .await
            .expect("failed to send request");
        if response.status() == StatusCode::NOT_FOUND {
            return None;
        }
        assert_eq!(response.status(), StatusCode::OK);
        Some(response.json().await.expect("failed to parse session"))
    }

    /// Poll the transfer endpoint until the session is finished
    async fn wait_for_transfer(&self, server: &str) -> TransferSessionView {
        for _ in 0..200 {
            if let Some(view) = self.get_transfer(server).await {
                if view.state.is_terminal() {
                    return view;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("transfer for {} did not finish in time", server);
    }

    /// Control-plane requests received for `path`
    async fn panel_calls(&self, path: &str) -> Vec<wiremock::Request> {
        self.panel
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }

    fn payload(&self, server: &str, url: String) -> IncomingTransferPayload {
        IncomingTransferPayload {
            server_id: server.to_string(),
            url,
            token: Self::token(server),
            server: serde_json::json!({ "uuid": server }),
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn write_file(path: &Path, data: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// Build a valid gzip'd tar containing a single file
fn tiny_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    ));
    let data = b"eula=true";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "eula.txt", &data[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

// ============================================================================
// Archive download
// ============================================================================

#[tokio::test]
async fn test_get_archive_not_found() {
    let ctx = TestContext::new(&["w1"]).await;

    let response = ctx
        .get_archive("w1", Some(&TestContext::token("w1")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown servers are also 404
    let response = ctx
        .get_archive("w9", Some(&TestContext::token("w9")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_archive_requires_token() {
    let ctx = TestContext::new(&["w1"]).await;
    let content = vec![1u8; 1024];
    write_file(&ctx.config.archive_path("w1"), &content);

    let response = ctx.get_archive("w1", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx
        .client
        .get(ctx.archive_url("w1"))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx.get_archive("w1", Some("not-a-jwt")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = TokenSigner::new("wrong-secret")
        .sign("w1", Duration::from_secs(600))
        .unwrap();
    let response = ctx.get_archive("w1", Some(&forged)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_archive_subject_mismatch_is_forbidden() {
    let ctx = TestContext::new(&["w1", "w2"]).await;
    write_file(&ctx.config.archive_path("w1"), b"data");

    let response = ctx
        .get_archive("w1", Some(&TestContext::token("w2")))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_get_archive_headers_and_body() {
    let ctx = TestContext::new(&["w1"]).await;
    let content: Vec<u8> = (0..1_048_576u32).map(|i| (i % 253) as u8).collect();
    write_file(&ctx.config.archive_path("w1"), &content);

    let response = ctx
        .get_archive("w1", Some(&TestContext::token("w1")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(
        headers.get("x-checksum").unwrap().to_str().unwrap(),
        sha256_hex(&content)
    );
    assert_eq!(headers.get("content-length").unwrap(), "1048576");
    assert_eq!(headers.get("x-mime-type").unwrap(), "application/tar+gzip");
    assert_eq!(
        headers.get("content-disposition").unwrap(),
        "attachment; filename=w1.tar.gz"
    );
    assert_eq!(
        headers.get("content-type").unwrap(),
        "application/octet-stream"
    );

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), content.len());
    assert_eq!(&body[..], &content[..]);
}

// ============================================================================
// Outgoing transfer
// ============================================================================

#[tokio::test]
async fn test_post_archive_builds_and_reports() {
    let ctx = TestContext::new(&["w1"]).await;

    assert_eq!(ctx.post_archive("w1").await, StatusCode::ACCEPTED);
    let view = ctx.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Succeeded, "{:?}", view.error);

    let calls = ctx.panel_calls("/api/remote/servers/w1/archive").await;
    assert_eq!(calls.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(body, serde_json::json!({"successful": true}));
    assert_eq!(
        calls[0].headers.get("authorization").unwrap(),
        "Bearer panel-token"
    );

    // The archive is now downloadable
    let response = ctx
        .get_archive("w1", Some(&TestContext::token("w1")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let checksum = response
        .headers()
        .get("x-checksum")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = response.bytes().await.unwrap();
    assert_eq!(sha256_hex(&body), checksum);
}

#[tokio::test]
async fn test_post_archive_unknown_server() {
    let ctx = TestContext::new(&[]).await;
    assert_eq!(ctx.post_archive("nope").await, StatusCode::NOT_FOUND);
    assert!(ctx.get_transfer("nope").await.is_none());
}

// ============================================================================
// Incoming transfer
// ============================================================================

#[tokio::test]
async fn test_incoming_upstream_error_rolls_back() {
    let ctx = TestContext::new(&[]).await;
    let source = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("source exploded"))
        .expect(1)
        .mount(&source)
        .await;

    let payload = ctx.payload("w1", format!("{}/api/servers/w1/archive", source.uri()));
    assert_eq!(ctx.post_transfer(&payload).await, StatusCode::ACCEPTED);

    let view = ctx.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Failed);
    assert!(view.error.unwrap().contains("500"));

    // De-registered: the server can no longer be archived here
    assert_eq!(ctx.post_archive("w1").await, StatusCode::NOT_FOUND);
    assert!(!ctx.config.archive_path("w1").exists());

    assert_eq!(
        ctx.panel_calls("/api/remote/servers/w1/transfer/failure")
            .await
            .len(),
        1
    );
    assert!(
        ctx.panel_calls("/api/remote/servers/w1/transfer/success")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_incoming_checksum_mismatch() {
    let ctx = TestContext::new(&[]).await;
    let archive = tiny_archive();

    let source = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers/w1/archive"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Checksum", sha256_hex(b"something else").as_str())
                .set_body_bytes(archive),
        )
        .mount(&source)
        .await;

    let payload = ctx.payload("w1", format!("{}/api/servers/w1/archive", source.uri()));
    assert_eq!(ctx.post_transfer(&payload).await, StatusCode::ACCEPTED);

    let view = ctx.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Failed);
    assert_ne!(view.source_checksum, view.computed_checksum);
    assert!(view.computed_checksum.is_some());

    assert!(!ctx.config.archive_path("w1").exists());
    assert!(!ctx.config.workload_dir("w1").join("eula.txt").exists());
    assert_eq!(ctx.post_archive("w1").await, StatusCode::NOT_FOUND);
    assert_eq!(
        ctx.panel_calls("/api/remote/servers/w1/transfer/failure")
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_incoming_replaces_stale_archive() {
    let ctx = TestContext::new(&[]).await;
    let archive = tiny_archive();

    // Leftover from an earlier, interrupted attempt
    write_file(&ctx.config.archive_path("w1"), &vec![0xEE; 128 * 1024]);

    let source = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Checksum", sha256_hex(&archive).as_str())
                .set_body_bytes(archive.clone()),
        )
        .mount(&source)
        .await;

    let payload = ctx.payload("w1", format!("{}/archive", source.uri()));
    assert_eq!(ctx.post_transfer(&payload).await, StatusCode::ACCEPTED);

    let view = ctx.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Succeeded, "{:?}", view.error);
    assert_eq!(view.expected_size, Some(archive.len() as u64));
    assert_eq!(view.transferred_bytes, archive.len() as u64);
    assert_eq!(
        std::fs::read(ctx.config.workload_dir("w1").join("eula.txt")).unwrap(),
        b"eula=true"
    );
    assert!(!ctx.config.archive_path("w1").exists());
}

#[tokio::test]
async fn test_concurrent_incoming_is_conflict() {
    let ctx = TestContext::new(&[]).await;
    let source = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_secs(1)))
        .mount(&source)
        .await;

    let payload = ctx.payload("w1", format!("{}/archive", source.uri()));
    assert_eq!(ctx.post_transfer(&payload).await, StatusCode::ACCEPTED);
    assert_eq!(ctx.post_transfer(&payload).await, StatusCode::CONFLICT);

    let view = ctx.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Failed);

    // A finished session no longer blocks a new one
    assert_eq!(ctx.post_transfer(&payload).await, StatusCode::ACCEPTED);
    ctx.wait_for_transfer("w1").await;
}

#[tokio::test]
async fn test_incoming_rejects_invalid_server_ids() {
    let ctx = TestContext::new(&[]).await;
    let sibling = ctx
        .config
        .data_dir
        .parent()
        .expect("data dir has a parent")
        .join("escape");
    write_file(&sibling.join("precious"), b"keep me");

    for server in ["", "..", "../escape", "a/b"] {
        let payload = ctx.payload(server, "http://127.0.0.1:1/archive".to_string());
        assert_eq!(
            ctx.post_transfer(&payload).await,
            StatusCode::BAD_REQUEST,
            "{:?}",
            server
        );
    }

    assert_eq!(std::fs::read(sibling.join("precious")).unwrap(), b"keep me");
    assert!(ctx.panel.received_requests().await.unwrap_or_default().is_empty());
}

// ============================================================================
// Full migration
// ============================================================================

#[tokio::test]
async fn test_migrate_server_between_agents() {
    let source = TestContext::new(&["w1"]).await;
    let target = TestContext::new(&[]).await;

    // Source: stop and archive
    assert_eq!(source.post_archive("w1").await, StatusCode::ACCEPTED);
    let view = source.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Succeeded, "{:?}", view.error);

    // Target: pull the archive from the source
    let payload = target.payload("w1", source.archive_url("w1"));
    assert_eq!(target.post_transfer(&payload).await, StatusCode::ACCEPTED);
    let view = target.wait_for_transfer("w1").await;
    assert_eq!(view.state, TransferState::Succeeded, "{:?}", view.error);
    assert_eq!(view.source_checksum, view.computed_checksum);

    let source_dir: PathBuf = source.config.workload_dir("w1");
    let target_dir: PathBuf = target.config.workload_dir("w1");
    assert_eq!(
        std::fs::read(target_dir.join("server.properties")).unwrap(),
        std::fs::read(source_dir.join("server.properties")).unwrap()
    );
    assert_eq!(
        std::fs::read(target_dir.join("world").join("level.dat")).unwrap(),
        vec![42u8; 64 * 1024]
    );
    assert!(!target.config.archive_path("w1").exists());

    assert_eq!(
        target
            .panel_calls("/api/remote/servers/w1/transfer/success")
            .await
            .len(),
        1
    );

    // The target now hosts the server and can send it on again
    assert_eq!(target.post_archive("w1").await, StatusCode::ACCEPTED);
    let view = target.wait_for_transfer("w1").await;
    assert_eq!(view.direction, transfer_types::TransferDirection::Outgoing);
    assert_eq!(view.state, TransferState::Succeeded, "{:?}", view.error);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let ctx = TestContext::new(&[]).await;
    let response = ctx
        .client
        .get(format!("{}/metrics", ctx.agent_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(text.contains("transfer_agent_"));
}
