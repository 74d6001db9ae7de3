// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! API context for the transfer agent

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::TokenVerifier;
use crate::config::AgentConfig;
use crate::coordinator::TransferCoordinator;
use crate::notifier::{ControlPlaneNotifier, PanelClient};
use crate::workload::{
    DirectoryWorkloadFactory, InMemoryRegistry, Workload, WorkloadFactory, WorkloadRegistry,
    discover_workloads,
};

/// API context shared across all request handlers
pub struct ApiContext {
    registry: Arc<dyn WorkloadRegistry>,
    coordinator: Arc<TransferCoordinator>,
    tokens: TokenVerifier,
}

impl ApiContext {
    /// Create a new API context, registering every server already present
    /// in the data directory
    pub async fn new(config: AgentConfig) -> Result<Self> {
        crate::install_crypto_provider();

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    config.data_dir.display()
                )
            })?;
        tokio::fs::create_dir_all(&config.archive_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create archive directory: {}",
                    config.archive_dir.display()
                )
            })?;

        let registry = Arc::new(InMemoryRegistry::new());
        let workloads = discover_workloads(&config.data_dir, &config.archive_dir)
            .await
            .context("Failed to discover servers")?;
        let servers = workloads.len();
        for workload in workloads {
            tracing::debug!(server_id = %workload.id(), "Registered existing server");
            registry.add(Arc::new(workload));
        }
        tracing::info!(servers, "Loaded servers from data directory");

        let notifier = Arc::new(
            PanelClient::new(&config.panel_url, &config.panel_token)
                .context("Failed to create control plane client")?,
        );
        let factory = Arc::new(DirectoryWorkloadFactory::new(
            config.data_dir.clone(),
            config.archive_dir.clone(),
        ));

        Self::with_parts(config, registry, factory, notifier)
    }

    /// Assemble a context from explicit collaborators
    pub fn with_parts(
        config: AgentConfig,
        registry: Arc<dyn WorkloadRegistry>,
        factory: Arc<dyn WorkloadFactory>,
        notifier: Arc<dyn ControlPlaneNotifier>,
    ) -> Result<Self> {
        let tokens = TokenVerifier::new(&config.token_secret);
        let coordinator =
            TransferCoordinator::new(config, Arc::clone(&registry), factory, notifier)
                .context("Failed to create transfer HTTP client")?;

        Ok(Self {
            registry,
            coordinator: Arc::new(coordinator),
            tokens,
        })
    }

    pub fn coordinator(&self) -> &Arc<TransferCoordinator> {
        &self.coordinator
    }

    pub fn tokens(&self) -> &TokenVerifier {
        &self.tokens
    }

    pub fn find_workload(&self, server_id: &str) -> Option<Arc<Workload>> {
        self.registry.find(server_id)
    }
}
