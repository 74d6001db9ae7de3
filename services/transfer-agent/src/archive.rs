// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Per-server transfer archive
//!
//! Each server owns at most one archive at `<archive_dir>/<id>.tar.gz`. The
//! archive is produced by the source node and read back either to serve it
//! to a target node or to compute its checksum. The checksum is computed on
//! first use and cached until the archive is rebuilt.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;
use tokio::fs::File;
use tokio::sync::Mutex;

use crate::checksum::checksum_file;

/// File extension of transfer archives
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// MIME type reported for transfer archives
pub const ARCHIVE_MIME_TYPE: &str = "application/tar+gzip";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive not found: {0}")]
    NotFound(PathBuf),

    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound(_))
    }
}

/// Metadata of an existing archive
#[derive(Debug, Clone)]
pub struct ArchiveStat {
    pub size: u64,
    pub mime_type: &'static str,
    pub modified: Option<DateTime<Utc>>,
}

/// Archive of one server's data directory
#[derive(Debug)]
pub struct ArchiveService {
    server_id: String,
    source_dir: PathBuf,
    path: PathBuf,
    checksum: Mutex<Option<String>>,
}

impl ArchiveService {
    pub fn new(server_id: &str, source_dir: PathBuf, archive_dir: &Path) -> Self {
        let path = archive_dir.join(format!("{}.{}", server_id, ARCHIVE_EXTENSION));
        Self {
            server_id: server_id.to_string(),
            source_dir,
            path,
            checksum: Mutex::new(None),
        }
    }

    /// File name presented to downloaders
    pub fn name(&self) -> String {
        format!("{}.{}", self.server_id, ARCHIVE_EXTENSION)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata of the archive, or [`ArchiveError::NotFound`] if it does not
    /// exist.
    pub async fn stat(&self) -> Result<ArchiveStat, ArchiveError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.map_io(e))?;

        Ok(ArchiveStat {
            size: meta.len(),
            mime_type: ARCHIVE_MIME_TYPE,
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// SHA-256 of the archive in lowercase hex
    pub async fn checksum(&self) -> Result<String, ArchiveError> {
        let mut cached = self.checksum.lock().await;
        if let Some(sum) = cached.as_ref() {
            return Ok(sum.clone());
        }

        let sum = checksum_file(&self.path).await.map_err(|e| self.map_io(e))?;
        *cached = Some(sum.clone());
        Ok(sum)
    }

    /// Open the archive for streaming
    pub async fn open(&self) -> Result<File, ArchiveError> {
        File::open(&self.path).await.map_err(|e| self.map_io(e))
    }

    /// Build a fresh archive of the server's data directory.
    ///
    /// The archive is written beside its final path and renamed into place,
    /// so a concurrent reader never sees a partial file.
    pub async fn archive(&self) -> Result<(), ArchiveError> {
        let mut cached = self.checksum.lock().await;
        *cached = None;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let source_dir = self.source_dir.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_archive(&source_dir, &path)).await??;

        tracing::debug!(
            server_id = %self.server_id,
            path = %self.path.display(),
            "Archive written"
        );
        Ok(())
    }

    fn map_io(&self, e: io::Error) -> ArchiveError {
        if e.kind() == io::ErrorKind::NotFound {
            ArchiveError::NotFound(self.path.clone())
        } else {
            ArchiveError::Io(e)
        }
    }
}

fn write_archive(source_dir: &Path, path: &Path) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let file = fs::File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", source_dir)?;
        builder.into_inner()?.finish()?.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
