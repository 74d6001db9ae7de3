// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Control-plane status notifications
//!
//! Every notification is a single attempt. Callers log the outcome and move
//! on; nothing here retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use transfer_types::ArchiveStatusRequest;

/// Timeout applied to each control-plane request
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum NotifyError {
    /// The control plane answered, but rejected the request
    #[error("control plane responded with {status}: {body}")]
    Request { status: u16, body: String },

    /// The control plane could not be reached
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl NotifyError {
    /// Whether this is the soft, request-level class of failure
    pub fn is_request_error(&self) -> bool {
        matches!(self, NotifyError::Request { .. })
    }
}

#[async_trait]
pub trait ControlPlaneNotifier: Send + Sync {
    /// Report whether the source node managed to build the archive
    async fn send_archive_status(
        &self,
        server_id: &str,
        successful: bool,
    ) -> Result<(), NotifyError>;

    /// Report that the target node finished materializing the server
    async fn send_transfer_success(&self, server_id: &str) -> Result<(), NotifyError>;

    /// Report that the target node gave up on the transfer
    async fn send_transfer_failure(&self, server_id: &str) -> Result<(), NotifyError>;
}

/// HTTP client for the control plane's remote API
#[derive(Debug, Clone)]
pub struct PanelClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PanelClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, reqwest::Error> {
        crate::install_crypto_provider();
        let client = Client::builder().timeout(NOTIFY_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, server_id: &str, suffix: &str) -> String {
        format!("{}/api/remote/servers/{}/{}", self.base_url, server_id, suffix)
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        url: String,
        body: Option<&B>,
    ) -> Result<(), NotifyError> {
        let mut request = self.client.post(&url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Request {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ControlPlaneNotifier for PanelClient {
    async fn send_archive_status(
        &self,
        server_id: &str,
        successful: bool,
    ) -> Result<(), NotifyError> {
        let body = ArchiveStatusRequest { successful };
        self.post(self.url(server_id, "archive"), Some(&body)).await
    }

    async fn send_transfer_success(&self, server_id: &str) -> Result<(), NotifyError> {
        self.post::<()>(self.url(server_id, "transfer/success"), None)
            .await
    }

    async fn send_transfer_failure(&self, server_id: &str) -> Result<(), NotifyError> {
        self.post::<()>(self.url(server_id, "transfer/failure"), None)
            .await
    }
}
