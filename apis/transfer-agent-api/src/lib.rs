// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Dropshot API trait for the server transfer agent.
//!
//! The transfer agent runs on every node that hosts servers. During a
//! migration the source node archives a server's data and serves it, and
//! the target node downloads, verifies and unpacks that archive. Both sides
//! report their progress to the control plane.
//!
//! ## Endpoints
//!
//! - `GET /api/servers/{server}/archive` - Download a server's archive
//! - `POST /api/servers/{server}/archive` - Stop and archive a server
//! - `GET /api/servers/{server}/transfer` - Inspect the latest transfer session
//! - `POST /api/transfer` - Begin an incoming transfer
//! - `GET /metrics` - Prometheus metrics

use dropshot::{
    Body, HttpError, HttpResponseAccepted, HttpResponseOk, Path, RequestContext, TypedBody,
};
use http::Response;
use schemars::JsonSchema;
use serde::Deserialize;
use transfer_types::{IncomingTransferPayload, TransferAccepted, TransferSessionView};

/// Path parameters for server-specific endpoints.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ServerPath {
    /// The server identifier
    pub server: String,
}

/// Transfer Agent API
///
/// Used node-to-node to move a server's archive, and by the control plane to
/// trigger both halves of a migration.
#[dropshot::api_description]
pub trait TransferAgentApi {
    /// Context type for request handlers
    type Context: Send + Sync + 'static;

    /// Download a server's transfer archive
    ///
    /// Requires `Authorization: Bearer <token>` where the token's subject is
    /// the server identifier. The response carries the archive's checksum in
    /// `X-Checksum` so the receiving node can verify the download.
    ///
    /// Returns 401 if the header is missing, malformed or the token is not
    /// valid, 403 if the token was issued for another server, and 404 if no
    /// archive exists.
    #[endpoint {
        method = GET,
        path = "/api/servers/{server}/archive",
        tags = ["transfers"],
    }]
    async fn get_server_archive(
        rqctx: RequestContext<Self::Context>,
        path: Path<ServerPath>,
    ) -> Result<Response<Body>, HttpError>;

    /// Archive a server for transfer
    ///
    /// Stops the server and builds a fresh archive in the background. The
    /// outcome is reported on the server's event stream and to the control
    /// plane; this call only acknowledges that the work was queued.
    ///
    /// Returns 404 if the server is unknown and 409 if a transfer for the
    /// server is already running.
    #[endpoint {
        method = POST,
        path = "/api/servers/{server}/archive",
        tags = ["transfers"],
    }]
    async fn post_server_archive(
        rqctx: RequestContext<Self::Context>,
        path: Path<ServerPath>,
    ) -> Result<HttpResponseAccepted<TransferAccepted>, HttpError>;

    /// Get the latest transfer session for a server
    ///
    /// Returns 404 if no transfer has run for the server since the agent
    /// started.
    #[endpoint {
        method = GET,
        path = "/api/servers/{server}/transfer",
        tags = ["transfers"],
    }]
    async fn get_server_transfer(
        rqctx: RequestContext<Self::Context>,
        path: Path<ServerPath>,
    ) -> Result<HttpResponseOk<TransferSessionView>, HttpError>;

    /// Begin an incoming transfer
    ///
    /// Registers the server described by the payload, then downloads,
    /// verifies and extracts its archive in the background.
    ///
    /// Returns 409 if a transfer for the server is already running.
    #[endpoint {
        method = POST,
        path = "/api/transfer",
        tags = ["transfers"],
    }]
    async fn post_transfer(
        rqctx: RequestContext<Self::Context>,
        body: TypedBody<IncomingTransferPayload>,
    ) -> Result<HttpResponseAccepted<TransferAccepted>, HttpError>;

    /// Prometheus metrics in text exposition format
    #[endpoint {
        method = GET,
        path = "/metrics",
        tags = ["system"],
    }]
    async fn get_metrics(
        rqctx: RequestContext<Self::Context>,
    ) -> Result<Response<Body>, HttpError>;
}
