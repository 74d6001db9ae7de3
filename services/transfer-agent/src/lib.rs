// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Transfer Agent Library
//!
//! This library provides the core functionality for the transfer agent
//! service. The agent runs on every node hosting servers and moves a server
//! from one node to another: the source node archives and serves it, the
//! target node downloads, verifies and unpacks it.
//!
//! # Modules
//!
//! - [`config`] - Agent configuration (directories, download limit, control plane)
//! - [`context`] - API context for request handlers
//! - [`coordinator`] - Outgoing and incoming transfer state machines
//! - [`archive`] - Per-server archive: build, stat, checksum, open
//! - [`extract`] - Archive extraction with cleanup on failure
//! - [`ratelimit`] - Token-bucket throttled reader
//! - [`progress`] - Download progress counter and reporter
//! - [`checksum`] - SHA-256 helpers
//! - [`notifier`] - Control-plane status notifications
//! - [`auth`] - Node-to-node transfer tokens
//! - [`workload`] - Hosted servers and the registry tracking them
//! - [`events`] - Per-server event stream
//! - [`environment`] - Process environment abstraction
//! - [`metrics`] - Prometheus metrics

pub mod archive;
pub mod auth;
pub mod checksum;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod environment;
pub mod error;
pub mod events;
pub mod extract;
pub mod metrics;
pub mod notifier;
pub mod progress;
pub mod ratelimit;
pub mod workload;

use dropshot::{
    Body, ClientErrorStatusCode, HttpError, HttpResponseAccepted, HttpResponseOk, Path,
    RequestContext, TypedBody,
};
use futures_util::TryStreamExt;
use http::Response;
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http_body_util::StreamBody;
use hyper::body::Frame;
use tokio_util::io::ReaderStream;
use transfer_agent_api::{ServerPath, TransferAgentApi};
use transfer_types::{IncomingTransferPayload, TransferAccepted, TransferSessionView};

use crate::archive::ArchiveError;
use crate::auth::AuthError;
use crate::context::ApiContext;
use crate::coordinator::CHECKSUM_HEADER;
use crate::error::CoordinatorError;

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a default provider, so one must be installed
/// before the first client is constructed. Later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Transfer Agent API implementation
///
/// This enum serves as the implementation type for the `TransferAgentApi` trait.
/// It contains no data - all state is stored in the `ApiContext`.
pub enum TransferAgentImpl {}

impl TransferAgentApi for TransferAgentImpl {
    type Context = ApiContext;

    async fn get_server_archive(
        rqctx: RequestContext<Self::Context>,
        path: Path<ServerPath>,
    ) -> Result<Response<Body>, HttpError> {
        let ctx = rqctx.context();
        let server_id = path.into_inner().server;

        ctx.tokens()
            .authorize(rqctx.request.headers(), &server_id)
            .map_err(|e| auth_error(&server_id, e))?;

        let workload = ctx.find_workload(&server_id).ok_or_else(|| {
            HttpError::for_not_found(None, format!("Server {} not found", server_id))
        })?;
        let archiver = workload.archiver();

        let stat = archiver
            .stat()
            .await
            .map_err(|e| archive_error(&server_id, e))?;
        let checksum = archiver
            .checksum()
            .await
            .map_err(|e| archive_error(&server_id, e))?;
        let file = archiver
            .open()
            .await
            .map_err(|e| archive_error(&server_id, e))?;

        tracing::info!(
            server_id = %server_id,
            size = stat.size,
            checksum = %checksum,
            "Serving transfer archive"
        );

        let body = StreamBody::new(ReaderStream::new(file).map_ok(Frame::data));

        Response::builder()
            .status(http::StatusCode::OK)
            .header(CHECKSUM_HEADER, checksum)
            .header("X-Mime-Type", stat.mime_type)
            .header(CONTENT_LENGTH, stat.size)
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename={}", archiver.name()),
            )
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap(body))
            .map_err(|e| HttpError::for_internal_error(format!("Failed to build response: {}", e)))
    }

    async fn post_server_archive(
        rqctx: RequestContext<Self::Context>,
        path: Path<ServerPath>,
    ) -> Result<HttpResponseAccepted<TransferAccepted>, HttpError> {
        let ctx = rqctx.context();
        let server_id = path.into_inner().server;

        ctx.coordinator()
            .start_outgoing(&server_id)
            .map_err(coordinator_error)?;

        Ok(HttpResponseAccepted(TransferAccepted { server_id }))
    }

    async fn get_server_transfer(
        rqctx: RequestContext<Self::Context>,
        path: Path<ServerPath>,
    ) -> Result<HttpResponseOk<TransferSessionView>, HttpError> {
        let ctx = rqctx.context();
        let server_id = path.into_inner().server;

        let view = ctx.coordinator().session(&server_id).ok_or_else(|| {
            HttpError::for_not_found(None, format!("No transfer found for server {}", server_id))
        })?;

        Ok(HttpResponseOk(view))
    }

    async fn post_transfer(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<IncomingTransferPayload>,
    ) -> Result<HttpResponseAccepted<TransferAccepted>, HttpError> {
        let ctx = rqctx.context();
        let payload = body.into_inner();
        let server_id = payload.server_id.clone();

        ctx.coordinator()
            .start_incoming(payload)
            .map_err(coordinator_error)?;

        Ok(HttpResponseAccepted(TransferAccepted { server_id }))
    }

    async fn get_metrics(
        _rqctx: RequestContext<Self::Context>,
    ) -> Result<Response<Body>, HttpError> {
        Response::builder()
            .status(http::StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(metrics::gather_metrics().into())
            .map_err(|e| HttpError::for_internal_error(format!("Failed to build response: {}", e)))
    }
}

fn auth_error(server_id: &str, e: AuthError) -> HttpError {
    tracing::warn!(server_id = %server_id, error = %e, "Rejected archive request");
    match e {
        AuthError::SubjectMismatch { .. } => HttpError::for_client_error(
            None,
            ClientErrorStatusCode::FORBIDDEN,
            "token is not valid for this server".to_string(),
        ),
        AuthError::Missing | AuthError::Malformed | AuthError::Invalid(_) => {
            HttpError::for_client_error(
                None,
                ClientErrorStatusCode::UNAUTHORIZED,
                e.to_string(),
            )
        }
    }
}

fn archive_error(server_id: &str, e: ArchiveError) -> HttpError {
    if e.is_not_found() {
        return HttpError::for_not_found(
            None,
            format!("No archive exists for server {}", server_id),
        );
    }
    tracing::error!(server_id = %server_id, error = %e, "Failed to read transfer archive");
    HttpError::for_internal_error(format!("Failed to read archive: {}", e))
}

fn coordinator_error(e: CoordinatorError) -> HttpError {
    match e {
        CoordinatorError::AlreadyActive(_) => HttpError::for_client_error(
            None,
            ClientErrorStatusCode::CONFLICT,
            e.to_string(),
        ),
        CoordinatorError::UnknownServer(_) => HttpError::for_not_found(None, e.to_string()),
        CoordinatorError::InvalidServerId(_) => HttpError::for_bad_request(None, e.to_string()),
    }
}
