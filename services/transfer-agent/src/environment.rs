// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Process environment abstraction
//!
//! The agent does not manage server processes itself. It only needs two
//! things from whatever does: a way to wait until a server has stopped, and
//! a way to create the environment a server runs in on a new node.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvironmentError {
    /// The server was not running; nothing had to be stopped
    #[error("server is not running")]
    NotRunning,

    #[error("timed out after {0:?} waiting for server to stop")]
    Timeout(Duration),

    #[error("environment error: {0}")]
    Other(String),
}

impl From<std::io::Error> for EnvironmentError {
    fn from(e: std::io::Error) -> Self {
        EnvironmentError::Other(e.to_string())
    }
}

#[async_trait]
pub trait ProcessEnvironment: Send + Sync {
    /// Stop the server and wait until it is no longer running.
    async fn wait_for_stop(&self) -> Result<(), EnvironmentError>;

    /// Create whatever the server needs to run on this node.
    async fn create_environment(&self) -> Result<(), EnvironmentError>;
}

/// Environment for servers that are plain directories on the host
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    data_dir: PathBuf,
}

impl HostEnvironment {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[async_trait]
impl ProcessEnvironment for HostEnvironment {
    async fn wait_for_stop(&self) -> Result<(), EnvironmentError> {
        // No process is ever attached to a host directory.
        Err(EnvironmentError::NotRunning)
    }

    async fn create_environment(&self) -> Result<(), EnvironmentError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// Stop a server, bounded by `timeout`. A server that was not running counts
/// as stopped.
pub async fn stop_with_timeout(
    env: &dyn ProcessEnvironment,
    timeout: Duration,
) -> Result<(), EnvironmentError> {
    match tokio::time::timeout(timeout, env.wait_for_stop()).await {
        Ok(Ok(())) | Ok(Err(EnvironmentError::NotRunning)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(EnvironmentError::Timeout(timeout)),
    }
}
