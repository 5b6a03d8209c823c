//! Cancellation and deadlines for device poll loops.
//!
//! The probes never tell the host how long a scan will take, so every loop
//! that waits on the device (frame collection, radio status polling, sniffer
//! reads, network scans) runs under a [`Poller`]. It is consulted each time a
//! read times out and decides whether to keep waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ProbeError, Result};
use crate::protocol::DEFAULT_READ_TIMEOUT_MS;

/// Shared flag that aborts in-flight poll loops when set.
///
/// Cloning yields a handle to the same flag, so one clone can live in a
/// Ctrl+C handler while another is handed to the device.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can guard the next operation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-device polling behavior.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Timeout of each individual bulk read.
    pub read_timeout: Duration,
    /// Upper bound on one whole operation. `None` = wait indefinitely.
    pub max_duration: Option<Duration>,
    /// Optional external abort switch.
    pub cancel: Option<CancelToken>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            max_duration: None,
            cancel: None,
        }
    }
}

impl PollOptions {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Start the clock for one operation.
    pub fn start(&self) -> Poller {
        Poller {
            read_timeout: self.read_timeout,
            deadline: self.max_duration.map(|d| (Instant::now() + d, d)),
            cancel: self.cancel.clone(),
            idle_polls: 0,
        }
    }
}

/// Running state of one poll loop.
#[derive(Debug)]
pub struct Poller {
    read_timeout: Duration,
    deadline: Option<(Instant, Duration)>,
    cancel: Option<CancelToken>,
    idle_polls: u64,
}

impl Poller {
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Fail if the operation was cancelled or ran out of time.
    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(ProbeError::Cancelled);
        }
        if let Some((deadline, limit)) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(ProbeError::DeadlineExceeded(limit));
        }
        Ok(())
    }

    /// Record a read that returned no data, then [`check`](Self::check).
    pub fn idle(&mut self) -> Result<()> {
        self.idle_polls += 1;
        if self.idle_polls % 50 == 0 {
            log::debug!("still waiting on device ({} empty reads)", self.idle_polls);
        }
        self.check()
    }

    /// Sleep for `interval`, then [`check`](Self::check).
    ///
    /// Used by loops that poll a status register rather than a stream.
    pub fn sleep(&mut self, interval: Duration) -> Result<()> {
        self.check()?;
        std::thread::sleep(interval);
        self.idle()
    }

    pub fn idle_polls(&self) -> u64 {
        self.idle_polls
    }
}
