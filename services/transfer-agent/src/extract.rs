// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Archive extraction into a server's data directory

use std::io;
use std::path::{Path, PathBuf};

/// Unpack the gzip'd tar at `archive` into `dest`.
///
/// If unpacking fails, `dest` is removed so no partially extracted tree is
/// left behind, and the unpack error is returned.
pub async fn extract_archive(archive: &Path, dest: &Path) -> io::Result<()> {
    let archive_path = archive.to_path_buf();
    let dest_path = dest.to_path_buf();

    let result = tokio::task::spawn_blocking(move || unpack(&archive_path, &dest_path))
        .await
        .map_err(io::Error::other)
        .and_then(|r| r);

    if let Err(e) = &result {
        tracing::warn!(
            archive = %archive.display(),
            dest = %dest.display(),
            error = %e,
            "Extraction failed, removing partially extracted data"
        );
        remove_partial(dest.to_path_buf()).await;
    }

    result
}

fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let file = std::fs::File::open(archive)?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(dest)
}

async fn remove_partial(dest: PathBuf) {
    match tokio::fs::remove_dir_all(&dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            crate::metrics::record_cleanup_failure();
            tracing::warn!(
                path = %dest.display(),
                error = %e,
                "Failed to remove partially extracted data"
            );
        }
    }
}
