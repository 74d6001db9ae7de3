// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for server transfers.
//!
//! These are the wire types exchanged between the source node, the target
//! node and the control plane while a server (workload) is migrated from one
//! node to another.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ============================================================================
// Type Aliases
// ============================================================================

/// Server (workload) identifier
pub type ServerId = String;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Payload sent by the control plane to the target node to begin an
/// incoming transfer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IncomingTransferPayload {
    /// Identifier of the server being transferred
    pub server_id: ServerId,
    /// URL of the archive on the source node
    pub url: String,
    /// Bearer token accepted by the source node for `url`
    pub token: String,
    /// Provisioning data used to construct the server on this node
    pub server: serde_json::Value,
}

/// Acknowledgement returned when a transfer has been queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransferAccepted {
    pub server_id: ServerId,
}

/// Body of the archive status notification sent to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArchiveStatusRequest {
    pub successful: bool,
}

// ============================================================================
// Transfer State
// ============================================================================

/// Status values published on a server's event stream during a transfer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransferStatus {
    /// The source node has begun preparing the archive
    Starting,
    /// The transfer failed on this node
    Failure,
    /// The target node finished materializing the server
    Success,
    /// The source node finished building the archive
    Archived,
}

/// Which side of a migration a session runs on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransferDirection {
    /// Source node: stop, archive and serve
    Outgoing,
    /// Target node: download, verify and extract
    Incoming,
}

/// Step a transfer session is currently in.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransferState {
    #[default]
    Idle,
    Stopping,
    Archiving,
    Serving,
    Registered,
    RequestingDownload,
    Downloading,
    Verifying,
    CreatingEnvironment,
    Extracting,
    Succeeded,
    Failed,
}

impl TransferState {
    /// Whether the session can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Succeeded | TransferState::Failed)
    }
}

/// Snapshot of a transfer session, as reported by the inspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransferSessionView {
    pub server_id: ServerId,
    pub direction: TransferDirection,
    pub state: TransferState,
    /// Total archive size announced by the source, if known
    pub expected_size: Option<u64>,
    /// Bytes written to disk so far
    pub transferred_bytes: u64,
    /// Checksum announced by the source node
    pub source_checksum: Option<String>,
    /// Checksum computed locally over the downloaded archive
    pub computed_checksum: Option<String>,
    /// Reason the session failed, once it has
    pub error: Option<String>,
}
