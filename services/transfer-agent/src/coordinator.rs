// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Transfer orchestration
//!
//! The [`TransferCoordinator`] drives both halves of a server migration:
//!
//! - **Outgoing** (source node): mark the server as transferring, stop it,
//!   build a fresh archive and tell the control plane the archive is ready.
//! - **Incoming** (target node): register the server described by the
//!   control plane, download its archive from the source node, verify the
//!   checksum, create the server's environment and extract the archive.
//!
//! Both flows run on a spawned task; the HTTP handler that starts them only
//! learns whether the session could be started. Outcomes are published on
//! the server's event stream, reported to the control plane, and kept in a
//! per-server [`TransferSessionView`] for inspection.
//!
//! At most one session per server is active at a time. The transferring
//! flag on a workload is set before anything destructive happens and is only
//! cleared when a session succeeds.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::TryStreamExt;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use reqwest::Client;
use tokio::fs::File;
use tokio_util::io::StreamReader;

use transfer_types::{
    IncomingTransferPayload, ServerId, TransferDirection, TransferSessionView, TransferState,
    TransferStatus,
};

use crate::checksum::checksum_file;
use crate::config::AgentConfig;
use crate::environment::stop_with_timeout;
use crate::error::{CoordinatorError, TransferError};
use crate::events::{EventBus, NodeRole, TransferLog};
use crate::extract::extract_archive;
use crate::metrics;
use crate::notifier::{ControlPlaneNotifier, NotifyError};
use crate::progress::{
    DownloadProgress, ProgressReporter, REPORT_INTERVAL, copy_with_progress, format_bytes,
    render_bar,
};
use crate::ratelimit::RateLimitedReader;
use crate::workload::{Workload, WorkloadFactory, WorkloadRegistry, validate_server_id};

/// Header carrying the archive checksum on the source node's response
pub const CHECKSUM_HEADER: &str = "X-Checksum";

/// State shared between a running session and the inspection endpoint
#[derive(Debug)]
struct SessionShared {
    view: Mutex<TransferSessionView>,
    progress: Mutex<Option<Arc<DownloadProgress>>>,
    active: AtomicBool,
}

impl SessionShared {
    fn snapshot(&self) -> TransferSessionView {
        let mut view = self
            .view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(progress) = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            view.transferred_bytes = progress.progress();
        }
        view
    }
}

/// Handle owned by the task running one session
struct TransferSession {
    shared: Arc<SessionShared>,
    server_id: ServerId,
    direction: TransferDirection,
    started: Instant,
}

impl TransferSession {
    fn state(&self) -> TransferState {
        self.view(|v| v.state)
    }

    fn view<T>(&self, f: impl FnOnce(&mut TransferSessionView) -> T) -> T {
        let mut view = self
            .shared
            .view
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut view)
    }

    fn transition(&self, state: TransferState) {
        let changed = self.view(|v| {
            if v.state.is_terminal() {
                return false;
            }
            // Cleared before the terminal state becomes visible.
            if state.is_terminal() {
                self.shared.active.store(false, Ordering::SeqCst);
            }
            v.state = state;
            true
        });
        if changed {
            tracing::debug!(
                server_id = %self.server_id,
                direction = %self.direction,
                state = %state,
                "Transfer state changed"
            );
        }
    }

    fn succeed(&self) {
        self.transition(TransferState::Succeeded);
        metrics::record_transfer_succeeded(self.direction, self.started.elapsed().as_secs_f64());
    }

    fn fail(&self, error: &TransferError) {
        self.view(|v| v.error = Some(error.to_string()));
        self.transition(TransferState::Failed);
        metrics::record_transfer_failed(
            self.direction,
            error.kind(),
            self.started.elapsed().as_secs_f64(),
        );
    }

    fn attach_progress(&self, progress: Arc<DownloadProgress>) {
        self.view(|v| {
            v.expected_size = Some(progress.size());
            v.transferred_bytes = 0;
        });
        *self
            .shared
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(progress);
    }

    fn detach_progress(&self) {
        let progress = self
            .shared
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(progress) = progress {
            self.view(|v| v.transferred_bytes = progress.progress());
        }
    }

    fn set_source_checksum(&self, checksum: &str) {
        self.view(|v| v.source_checksum = Some(checksum.to_string()));
    }

    fn set_computed_checksum(&self, checksum: &str) {
        self.view(|v| v.computed_checksum = Some(checksum.to_string()));
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

/// Removes a freshly registered workload unless the transfer committed it
struct RegistrationGuard {
    registry: Arc<dyn WorkloadRegistry>,
    workload: Arc<Workload>,
    committed: bool,
}

impl RegistrationGuard {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let target = Arc::as_ptr(&self.workload);
        let removed = self.registry.remove_if(&|w| std::ptr::eq(w, target));
        tracing::info!(
            server_id = %self.workload.id(),
            removed,
            "Removed server registered by failed transfer"
        );
    }
}

/// Orchestrates incoming and outgoing transfers for this node
pub struct TransferCoordinator {
    config: AgentConfig,
    registry: Arc<dyn WorkloadRegistry>,
    factory: Arc<dyn WorkloadFactory>,
    notifier: Arc<dyn ControlPlaneNotifier>,
    client: Client,
    sessions: Mutex<HashMap<ServerId, Arc<SessionShared>>>,
}

impl TransferCoordinator {
    pub fn new(
        config: AgentConfig,
        registry: Arc<dyn WorkloadRegistry>,
        factory: Arc<dyn WorkloadFactory>,
        notifier: Arc<dyn ControlPlaneNotifier>,
    ) -> Result<Self, reqwest::Error> {
        crate::install_crypto_provider();

        // No overall timeout: archives can take arbitrarily long to download.
        let client = Client::builder().build()?;

        Ok(Self {
            config,
            registry,
            factory,
            notifier,
            client,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Latest session for `server_id`, if any has run
    pub fn session(&self, server_id: &str) -> Option<TransferSessionView> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .map(|s| s.snapshot())
    }

    /// Whether a session for `server_id` is still running
    pub fn is_active(&self, server_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .is_some_and(|s| s.active.load(Ordering::SeqCst))
    }

    fn begin(
        &self,
        server_id: &str,
        direction: TransferDirection,
    ) -> Result<TransferSession, CoordinatorError> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if sessions
            .get(server_id)
            .is_some_and(|s| s.active.load(Ordering::SeqCst))
        {
            return Err(CoordinatorError::AlreadyActive(server_id.to_string()));
        }

        let shared = Arc::new(SessionShared {
            view: Mutex::new(TransferSessionView {
                server_id: server_id.to_string(),
                direction,
                state: TransferState::Idle,
                expected_size: None,
                transferred_bytes: 0,
                source_checksum: None,
                computed_checksum: None,
                error: None,
            }),
            progress: Mutex::new(None),
            active: AtomicBool::new(true),
        });
        sessions.insert(server_id.to_string(), Arc::clone(&shared));

        Ok(TransferSession {
            shared,
            server_id: server_id.to_string(),
            direction,
            started: Instant::now(),
        })
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Stop and archive `server_id` in the background
    pub fn start_outgoing(self: &Arc<Self>, server_id: &str) -> Result<(), CoordinatorError> {
        let workload = self
            .registry
            .find(server_id)
            .ok_or_else(|| CoordinatorError::UnknownServer(server_id.to_string()))?;
        let session = self.begin(server_id, TransferDirection::Outgoing)?;

        tracing::info!(server_id = %server_id, "Starting outgoing transfer");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_outgoing(workload, session).await;
        });
        Ok(())
    }

    async fn run_outgoing(&self, workload: Arc<Workload>, session: TransferSession) {
        let server_id = workload.id().to_string();
        let log = TransferLog::new(workload.events().clone(), NodeRole::Source);

        workload.set_transferring(true);
        workload.events().publish_status(TransferStatus::Starting);
        log.send("Attempting to archive server..");

        match self.archive_workload(&workload, &session, &log).await {
            Ok(()) => {
                log.send("Successfully created archive, attempting to notify panel..");
                tracing::info!(server_id = %server_id, "Created transfer archive, notifying panel");

                let result = self.notifier.send_archive_status(&server_id, true).await;
                report_notification(&log, &server_id, "successful archive status", result);

                workload.set_transferring(false);
                workload.events().publish_status(TransferStatus::Archived);
                session.succeed();
            }
            Err(e) => {
                tracing::error!(
                    server_id = %server_id,
                    step = %session.state(),
                    error = %e,
                    "Outgoing transfer failed"
                );
                workload.events().publish_status(TransferStatus::Failure);

                log.send("Attempting to notify panel of archive failure..");
                let result = self.notifier.send_archive_status(&server_id, false).await;
                report_notification(&log, &server_id, "failed archive status", result);

                session.fail(&e);
            }
        }
    }

    async fn archive_workload(
        &self,
        workload: &Workload,
        session: &TransferSession,
        log: &TransferLog,
    ) -> Result<(), TransferError> {
        session.transition(TransferState::Stopping);
        if let Err(e) = stop_with_timeout(workload.environment(), self.config.stop_timeout).await {
            log.send("Failed to stop server, aborting transfer..");
            return Err(TransferError::Stop(e));
        }

        session.transition(TransferState::Archiving);
        if let Err(e) = workload.archiver().archive().await {
            log.send(&format!("An error occurred while archiving the server: {}", e));
            return Err(e.into());
        }

        session.transition(TransferState::Serving);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------

    /// Receive the server described by `payload` in the background
    pub fn start_incoming(
        self: &Arc<Self>,
        payload: IncomingTransferPayload,
    ) -> Result<(), CoordinatorError> {
        validate_server_id(&payload.server_id)
            .map_err(|_| CoordinatorError::InvalidServerId(payload.server_id.clone()))?;
        let session = self.begin(&payload.server_id, TransferDirection::Incoming)?;

        tracing::info!(server_id = %payload.server_id, "Incoming transfer for server");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_incoming(payload, session).await;
        });
        Ok(())
    }

    async fn run_incoming(&self, payload: IncomingTransferPayload, session: TransferSession) {
        let server_id = payload.server_id.clone();

        let workload = match self.factory.build(&server_id, &payload.server) {
            Ok(workload) => Arc::new(workload),
            Err(e) => {
                tracing::error!(
                    server_id = %server_id,
                    error = %e,
                    "Failed to validate received server data"
                );
                // Nothing was registered, so nobody can be subscribed yet.
                let log = TransferLog::new(EventBus::new(), NodeRole::Target);
                let e = TransferError::from(e);
                self.notify_transfer_failure(&log, &server_id).await;
                session.fail(&e);
                return;
            }
        };

        workload.set_transferring(true);
        self.registry.add(Arc::clone(&workload));
        let registration = RegistrationGuard {
            registry: Arc::clone(&self.registry),
            workload: Arc::clone(&workload),
            committed: false,
        };
        session.transition(TransferState::Registered);

        let log = TransferLog::new(workload.events().clone(), NodeRole::Target);
        log.send(
            "Received incoming transfer from Panel, attempting to download archive from source node..",
        );

        let archive_path = self.config.archive_path(&server_id);
        let result = self
            .receive_archive(&payload, &workload, &session, &log, &archive_path)
            .await;
        remove_downloaded_archive(&server_id, &archive_path).await;

        match result {
            Ok(()) => {
                registration.commit();

                log.send("Archive has been extracted, attempting to notify panel..");
                tracing::info!(server_id = %server_id, "Transfer archive extracted, notifying panel");

                let result = self.notifier.send_transfer_success(&server_id).await;
                report_notification(&log, &server_id, "transfer success", result);

                workload.set_transferring(false);
                workload.events().publish_status(TransferStatus::Success);
                log.send("Transfer completed");
                session.succeed();
            }
            Err(e) => {
                tracing::error!(
                    server_id = %server_id,
                    step = %session.state(),
                    error = %e,
                    "Incoming transfer failed"
                );
                log.send(&format!("Transfer failed: {}", e));

                drop(registration);
                workload.events().publish_status(TransferStatus::Failure);
                self.notify_transfer_failure(&log, &server_id).await;
                session.fail(&e);
            }
        }
    }

    async fn notify_transfer_failure(&self, log: &TransferLog, server_id: &str) {
        tracing::info!(server_id = %server_id, "Server transfer failed, notifying panel");
        let result = self.notifier.send_transfer_failure(server_id).await;
        report_notification(log, server_id, "transfer failure", result);
    }

    async fn receive_archive(
        &self,
        payload: &IncomingTransferPayload,
        workload: &Workload,
        session: &TransferSession,
        log: &TransferLog,
        archive_path: &Path,
    ) -> Result<(), TransferError> {
        let source_checksum = self
            .download_archive(payload, session, log, archive_path)
            .await?;

        session.transition(TransferState::Verifying);
        log.send("Successfully downloaded archive, computing checksum..");
        let computed = checksum_file(archive_path).await?;
        session.set_computed_checksum(&computed);

        log.send("Successfully computed checksum");
        log.send(&format!("  -   Source Checksum: {}", source_checksum));
        log.send(&format!("  - Computed Checksum: {}", computed));
        tracing::info!(
            server_id = %payload.server_id,
            checksum = %computed,
            "Computed checksum of transfer archive"
        );

        if computed != source_checksum {
            log.send("Checksum verification failed, aborting..");
            metrics::record_checksum_mismatch();
            return Err(TransferError::ChecksumMismatch {
                expected: source_checksum,
                computed,
            });
        }
        log.send("Archive checksum has been validated, continuing with transfer");

        session.transition(TransferState::CreatingEnvironment);
        log.send("Creating server environment, this could take a while..");
        workload
            .environment()
            .create_environment()
            .await
            .map_err(TransferError::Environment)?;

        session.transition(TransferState::Extracting);
        log.send("Server environment has been created, extracting transfer archive..");
        extract_archive(archive_path, workload.data_dir())
            .await
            .map_err(TransferError::Extract)?;

        Ok(())
    }

    /// Stream the archive to `archive_path`, returning the checksum the
    /// source node announced for it.
    async fn download_archive(
        &self,
        payload: &IncomingTransferPayload,
        session: &TransferSession,
        log: &TransferLog,
        archive_path: &Path,
    ) -> Result<String, TransferError> {
        session.transition(TransferState::RequestingDownload);
        log.send("Requesting archive from source node..");
        tracing::info!(server_id = %payload.server_id, "Requesting archive for server transfer");

        let response = self
            .client
            .get(&payload.url)
            .bearer_auth(bare_token(&payload.token))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            log.send(&format!(
                "Expected 200 but received \"{}\" from source node while requesting archive",
                status.as_u16()
            ));
            // Drain so the connection can be reused.
            if let Err(e) = response.bytes().await {
                tracing::warn!(
                    server_id = %payload.server_id,
                    status = %status,
                    error = %e,
                    "Failed to read transfer response body"
                );
            }
            return Err(TransferError::UnexpectedStatus(status.as_u16()));
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(TransferError::MissingHeader("Content-Length"))?;
        let source_checksum = response
            .headers()
            .get(CHECKSUM_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .ok_or(TransferError::MissingHeader(CHECKSUM_HEADER))?;
        session.set_source_checksum(&source_checksum);

        if let Some(parent) = archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::remove_file(archive_path).await {
            Ok(()) => {
                tracing::debug!(path = %archive_path.display(), "Removed stale transfer archive")
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                log.send(&format!("Failed to remove old archive file: {}", e));
                return Err(e.into());
            }
        }
        let mut file = File::create(archive_path).await?;

        session.transition(TransferState::Downloading);
        log.send("Starting to write archive to disk..");
        tracing::info!(
            server_id = %payload.server_id,
            size,
            limited = self.config.rate_limit().is_some(),
            "Writing transfer archive to disk"
        );

        let progress = Arc::new(DownloadProgress::new(size));
        session.attach_progress(Arc::clone(&progress));
        let reporter = {
            let log = log.clone();
            ProgressReporter::spawn(Arc::clone(&progress), REPORT_INTERVAL, move |line| {
                log.send(&line)
            })
        };

        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let mut reader = RateLimitedReader::new(StreamReader::new(body), self.config.rate_limit());
        let copied = copy_with_progress(&mut reader, &mut file, &progress).await;

        reporter.stop();
        session.detach_progress();

        let copied = copied.inspect_err(|e| {
            log.send(&format!("Failed to write archive file to disk: {}", e));
        })?;
        metrics::record_bytes_downloaded(copied);

        let human = format_bytes(size);
        log.send(&format!(
            "Downloading [{}] {} / {}",
            render_bar(size, size),
            human,
            human
        ));

        file.sync_all().await?;
        drop(file);
        log.send("Successfully wrote archive to disk");
        tracing::info!(
            server_id = %payload.server_id,
            bytes = copied,
            "Finished writing transfer archive to disk"
        );

        Ok(source_checksum)
    }
}

/// Strip a leading `Bearer ` so the header is never double-prefixed
fn bare_token(token: &str) -> &str {
    token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token)
        .trim()
}

async fn remove_downloaded_archive(server_id: &str, path: &Path) {
    tracing::debug!(server_id = %server_id, "Deleting temporary transfer archive");
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(server_id = %server_id, "Deleted temporary transfer archive"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            metrics::record_cleanup_failure();
            tracing::warn!(
                server_id = %server_id,
                path = %path.display(),
                error = %e,
                "Failed to delete transfer archive"
            );
        }
    }
}

/// Log the outcome of a single-attempt control-plane notification.
///
/// A rejection by the control plane is logged as a warning, failing to reach
/// it as an error. Neither affects the session.
fn report_notification(
    log: &TransferLog,
    server_id: &str,
    what: &str,
    result: Result<(), NotifyError>,
) {
    match result {
        Ok(()) => {
            log.send(&format!("Successfully notified panel of {}", what));
            tracing::info!(server_id = %server_id, "Notified panel of {}", what);
        }
        Err(e) if e.is_request_error() => {
            log.send(&format!(
                "Panel returned an error while notifying it of {}: {}",
                what, e
            ));
            tracing::warn!(
                server_id = %server_id,
                error = %e,
                "Panel returned an error when notified of {}",
                what
            );
        }
        Err(e) => {
            log.send(&format!("Failed to notify panel of {}: {}", what, e));
            tracing::error!(
                server_id = %server_id,
                error = %e,
                "Failed to notify panel of {}",
                what
            );
        }
    }
}
