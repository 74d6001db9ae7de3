// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Download progress tracking and rendering
//!
//! A [`DownloadProgress`] counter is shared between the copy loop, which
//! bumps it after every write, and a [`ProgressReporter`] task which renders
//! it on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Number of segments in the rendered bar
pub const TICKS: u64 = 25;

/// Percentage of the total each segment represents
pub const TICK_PERCENTAGE: u64 = 100 / TICKS;

/// How often progress lines are emitted while downloading
pub const REPORT_INTERVAL: Duration = Duration::from_secs(3);

/// Copy buffer size
const COPY_BUFFER_SIZE: usize = 4 * 1024;

/// Byte counter for one in-flight download
#[derive(Debug)]
pub struct DownloadProgress {
    size: u64,
    progress: AtomicU64,
}

impl DownloadProgress {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            progress: AtomicU64::new(0),
        }
    }

    /// Expected total in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes written so far
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Record `n` more bytes written
    pub fn add(&self, n: u64) {
        self.progress.fetch_add(n, Ordering::Relaxed);
    }

    /// Human readable progress line
    pub fn render(&self) -> String {
        let current = self.progress();
        format!(
            "Downloading [{}] {} / {}",
            render_bar(current, self.size),
            format_bytes(current),
            format_bytes(self.size)
        )
    }
}

/// Fill a `TICKS`-wide bar proportionally to `current / size`.
///
/// A zero `size` renders as complete.
pub fn render_bar(current: u64, size: u64) -> String {
    let filled = if size == 0 {
        TICKS
    } else {
        let percent = (current as u128 * 100 / size as u128).min(100) as u64;
        (percent / TICK_PERCENTAGE).min(TICKS)
    };

    let mut bar = "=".repeat(filled as usize);
    bar.push_str(&" ".repeat((TICKS - filled) as usize));
    bar
}

/// Format a byte count using binary units, e.g. `250 B` or `1.5 KiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}iB", bytes as f64 / div as f64, prefix)
}

/// Copy `reader` into `writer`, recording every write in `progress`.
///
/// Returns the total number of bytes copied.
pub async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    progress: &DownloadProgress,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        progress.add(n as u64);
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Periodic progress emitter
///
/// The background task is aborted by [`ProgressReporter::stop`] or on drop,
/// so it never outlives the download it reports on.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Emit `progress.render()` every `interval`, starting one interval from
    /// now.
    pub fn spawn<F>(progress: Arc<DownloadProgress>, interval: Duration, mut emit: F) -> Self
    where
        F: FnMut(String) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                emit(progress.render());
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
