// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Token-bucket throttling for archive downloads.
//!
//! [`RateLimitedReader`] wraps any [`AsyncRead`]. With no limit configured it
//! is a plain pass-through. With a limit of `L` bytes/second the bucket holds
//! at most `L` tokens and refills at `L` tokens per second; once a read
//! overdraws the bucket, the next read is parked on a timer until the debt
//! is repaid. Nothing is buffered by the limiter itself.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Token bucket with capacity and refill rate both equal to the limit.
///
/// Tokens are counted in nano-bytes, so refill over sub-millisecond gaps
/// accumulates. The balance may go negative; callers sleep off that debt
/// while the regular refill repays it.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_bytes_per_sec: u64,
    capacity: i128,
    balance: i128,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        let capacity = i128::from(rate_bytes_per_sec.max(1)) * NANOS_PER_SEC;
        Self {
            rate_bytes_per_sec,
            capacity,
            balance: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Take `bytes` tokens at time `now`, returning how long the caller must
    /// wait before the bucket is back out of debt.
    pub fn reserve_at(&mut self, bytes: u64, now: Instant) -> Duration {
        if self.rate_bytes_per_sec == 0 || bytes == 0 {
            return Duration::ZERO;
        }
        let rate = i128::from(self.rate_bytes_per_sec);

        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_nanos();
            let added = i128::try_from(elapsed)
                .unwrap_or(i128::MAX)
                .saturating_mul(rate);
            self.balance = self.balance.saturating_add(added).min(self.capacity);
            self.last_refill = now;
        }

        self.balance -= i128::from(bytes) * NANOS_PER_SEC;
        if self.balance >= 0 {
            return Duration::ZERO;
        }

        let debt = -self.balance;
        let wait_nanos = (debt + rate - 1) / rate;
        Duration::from_nanos(u64::try_from(wait_nanos).unwrap_or(u64::MAX))
    }
}

/// Reader that optionally caps sustained throughput.
pub struct RateLimitedReader<R> {
    inner: R,
    bucket: Option<TokenBucket>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl<R> RateLimitedReader<R> {
    /// Wrap `inner`; `limit` is in bytes per second, `None` disables
    /// throttling.
    pub fn new(inner: R, limit: Option<u64>) -> Self {
        Self {
            inner,
            bucket: limit.filter(|l| *l > 0).map(TokenBucket::new),
            delay: None,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for RateLimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(delay) = this.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            this.delay = None;
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = (buf.filled().len() - before) as u64;

        if let Some(bucket) = this.bucket.as_mut() {
            let wait = bucket.reserve_at(read, Instant::now());
            if !wait.is_zero() {
                this.delay = Some(Box::pin(tokio::time::sleep(wait)));
            }
        }

        Poll::Ready(Ok(()))
    }
}
