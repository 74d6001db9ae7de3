// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Workloads hosted on this node and the registry that tracks them

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::archive::ArchiveService;
use crate::environment::{HostEnvironment, ProcessEnvironment};
use crate::events::EventBus;

#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("server id {0:?} is not a plain directory name")]
    InvalidId(String),

    #[error("provisioning data must be a JSON object")]
    NotAnObject,

    #[error("provisioning data is missing the \"uuid\" field")]
    MissingId,

    #[error("provisioning data is for server {found}, expected {expected}")]
    IdMismatch { expected: String, found: String },
}

/// Check that `id` can be joined onto a directory without leaving it.
///
/// Ids become `<data_dir>/<id>` and `<archive_dir>/<id>.tar.gz`, so they must
/// be exactly one normal path component.
pub fn validate_server_id(id: &str) -> Result<(), WorkloadError> {
    let mut components = Path::new(id).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || id.contains(['/', '\\', '\0']) {
        return Err(WorkloadError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// One server hosted (or being received) by this node
pub struct Workload {
    id: String,
    data_dir: PathBuf,
    transferring: AtomicBool,
    events: EventBus,
    environment: Arc<dyn ProcessEnvironment>,
    archiver: ArchiveService,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("id", &self.id)
            .field("data_dir", &self.data_dir)
            .field("transferring", &self.is_transferring())
            .finish_non_exhaustive()
    }
}

impl Workload {
    pub fn new(
        id: &str,
        data_dir: PathBuf,
        archive_dir: &Path,
        environment: Arc<dyn ProcessEnvironment>,
    ) -> Self {
        let archiver = ArchiveService::new(id, data_dir.clone(), archive_dir);
        Self {
            id: id.to_string(),
            data_dir,
            transferring: AtomicBool::new(false),
            events: EventBus::new(),
            environment,
            archiver,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn environment(&self) -> &dyn ProcessEnvironment {
        self.environment.as_ref()
    }

    pub fn archiver(&self) -> &ArchiveService {
        &self.archiver
    }

    /// Whether a transfer has claimed this workload
    pub fn is_transferring(&self) -> bool {
        self.transferring.load(Ordering::SeqCst)
    }

    pub fn set_transferring(&self, transferring: bool) {
        self.transferring.store(transferring, Ordering::SeqCst);
    }
}

/// Builds the workload described by an incoming transfer's provisioning data
pub trait WorkloadFactory: Send + Sync {
    fn build(&self, server_id: &str, data: &serde_json::Value) -> Result<Workload, WorkloadError>;
}

/// Factory for workloads that live in `<data_dir>/<id>`
#[derive(Debug, Clone)]
pub struct DirectoryWorkloadFactory {
    data_dir: PathBuf,
    archive_dir: PathBuf,
}

impl DirectoryWorkloadFactory {
    pub fn new(data_dir: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            data_dir,
            archive_dir,
        }
    }
}

impl WorkloadFactory for DirectoryWorkloadFactory {
    fn build(&self, server_id: &str, data: &serde_json::Value) -> Result<Workload, WorkloadError> {
        validate_server_id(server_id)?;
        let object = data.as_object().ok_or(WorkloadError::NotAnObject)?;
        let uuid = object
            .get("uuid")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(WorkloadError::MissingId)?;

        if uuid != server_id {
            return Err(WorkloadError::IdMismatch {
                expected: server_id.to_string(),
                found: uuid.to_string(),
            });
        }

        let dir = self.data_dir.join(server_id);
        Ok(Workload::new(
            server_id,
            dir.clone(),
            &self.archive_dir,
            Arc::new(HostEnvironment::new(dir)),
        ))
    }
}

/// The node's set of active workloads
pub trait WorkloadRegistry: Send + Sync {
    /// Add a workload, replacing any existing one with the same id
    fn add(&self, workload: Arc<Workload>);

    /// Remove every workload matching `predicate`, returning how many were
    /// removed
    fn remove_if(&self, predicate: &dyn Fn(&Workload) -> bool) -> usize;

    fn find(&self, id: &str) -> Option<Arc<Workload>>;
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    workloads: RwLock<Vec<Arc<Workload>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkloadRegistry for InMemoryRegistry {
    fn add(&self, workload: Arc<Workload>) {
        let mut workloads = self
            .workloads
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        workloads.retain(|w| w.id() != workload.id());
        workloads.push(workload);
    }

    fn remove_if(&self, predicate: &dyn Fn(&Workload) -> bool) -> usize {
        let mut workloads = self
            .workloads
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = workloads.len();
        workloads.retain(|w| !predicate(w));
        before - workloads.len()
    }

    fn find(&self, id: &str) -> Option<Arc<Workload>> {
        self.workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|w| w.id() == id)
            .cloned()
    }
}

/// Build a workload for every subdirectory of `data_dir`
pub async fn discover_workloads(
    data_dir: &Path,
    archive_dir: &Path,
) -> std::io::Result<Vec<Workload>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(data_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 directory");
            continue;
        };
        let dir = entry.path();
        found.push(Workload::new(
            &id,
            dir.clone(),
            archive_dir,
            Arc::new(HostEnvironment::new(dir)),
        ));
    }
    found.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(found)
}
