// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Errors that end a transfer session

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::environment::EnvironmentError;
use crate::workload::WorkloadError;

/// A failure at any step of a transfer; every variant terminates the session
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to stop server: {0}")]
    Stop(EnvironmentError),

    #[error("failed to build archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("invalid server data: {0}")]
    Workload(#[from] WorkloadError),

    #[error("request to source node failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("expected 200 from source node, received {0}")]
    UnexpectedStatus(u16),

    #[error("source node response is missing {0}")]
    MissingHeader(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: source {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("failed to create server environment: {0}")]
    Environment(EnvironmentError),

    #[error("failed to extract archive: {0}")]
    Extract(std::io::Error),
}

impl TransferError {
    /// Short label used for the errors metric
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Stop(_) => "stop",
            TransferError::Archive(_) => "archive",
            TransferError::Workload(_) => "workload",
            TransferError::Request(_) => "network",
            TransferError::UnexpectedStatus(_) => "http_status",
            TransferError::MissingHeader(_) => "missing_header",
            TransferError::Io(_) => "io",
            TransferError::ChecksumMismatch { .. } => "checksum",
            TransferError::Environment(_) => "environment",
            TransferError::Extract(_) => "extract",
        }
    }
}

/// Why a transfer could not be started
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("a transfer for server {0} is already in progress")]
    AlreadyActive(String),

    #[error("server {0} not found")]
    UnknownServer(String),

    #[error("invalid server id {0:?}")]
    InvalidServerId(String),
}
