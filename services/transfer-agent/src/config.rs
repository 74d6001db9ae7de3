// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Agent configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::archive::ARCHIVE_EXTENSION;

/// Default root for server data directories
const DEFAULT_DATA_DIR: &str = "/var/lib/transfer-agent/volumes";

/// Default directory for produced and downloaded archives
const DEFAULT_ARCHIVE_DIR: &str = "/var/lib/transfer-agent/archives";

/// Default time to wait for a server to stop before archiving (seconds)
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Root directory holding one data directory per server
    pub data_dir: PathBuf,
    /// Directory where transfer archives are written
    pub archive_dir: PathBuf,
    /// Download throughput ceiling in MiB/s; zero or negative is unlimited
    pub download_limit: i64,
    /// How long to wait for a server to stop before giving up
    pub stop_timeout: Duration,
    /// Base URL of the control plane
    pub panel_url: String,
    /// Bearer token presented to the control plane
    pub panel_token: String,
    /// Shared secret used to sign and verify node-to-node transfer tokens
    pub token_secret: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            download_limit: 0,
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            panel_url: String::new(),
            panel_token: String::new(),
            token_secret: String::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        let archive_dir = std::env::var("ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARCHIVE_DIR));

        let download_limit = std::env::var("DOWNLOAD_LIMIT")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("Invalid DOWNLOAD_LIMIT")?;

        let stop_timeout_secs: u64 = std::env::var("STOP_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_STOP_TIMEOUT_SECS.to_string())
            .parse()
            .context("Invalid STOP_TIMEOUT_SECS")?;

        let panel_url =
            std::env::var("PANEL_URL").context("PANEL_URL environment variable required")?;

        let panel_token =
            std::env::var("PANEL_TOKEN").context("PANEL_TOKEN environment variable required")?;

        let token_secret = std::env::var("TRANSFER_TOKEN_SECRET")
            .context("TRANSFER_TOKEN_SECRET environment variable required")?;

        Ok(Self {
            data_dir,
            archive_dir,
            download_limit,
            stop_timeout: Duration::from_secs(stop_timeout_secs),
            panel_url,
            panel_token,
            token_secret,
        })
    }

    /// Path of the transfer archive for a server
    pub fn archive_path(&self, server_id: &str) -> PathBuf {
        self.archive_dir.join(format!("{}.{}", server_id, ARCHIVE_EXTENSION))
    }

    /// Data directory of a server
    pub fn workload_dir(&self, server_id: &str) -> PathBuf {
        self.data_dir.join(server_id)
    }

    /// Download ceiling in bytes per second, or `None` when unlimited
    pub fn rate_limit(&self) -> Option<u64> {
        if self.download_limit < 1 {
            return None;
        }
        Some((self.download_limit as u64).saturating_mul(1024 * 1024))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = AgentConfig::default();
        assert_eq!(config.stop_timeout, Duration::from_secs(60));
        assert_eq!(config.download_limit, 0);
        assert!(config.rate_limit().is_none());
    }

    #[test]
    fn archive_path_uses_server_id() {
        let config = AgentConfig {
            archive_dir: PathBuf::from("/tmp/archives"),
            ..Default::default()
        };
        assert_eq!(
            config.archive_path("w1"),
            PathBuf::from("/tmp/archives/w1.tar.gz")
        );
    }

    #[test]
    fn non_positive_limit_is_unlimited() {
        for limit in [0, -1, -100] {
            let config = AgentConfig {
                download_limit: limit,
                ..Default::default()
            };
            assert_eq!(config.rate_limit(), None, "limit {}", limit);
        }
    }

    #[test]
    fn positive_limit_is_mebibytes_per_second() {
        let config = AgentConfig {
            download_limit: 5,
            ..Default::default()
        };
        assert_eq!(config.rate_limit(), Some(5 * 1024 * 1024));
    }
}
