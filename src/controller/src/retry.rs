//! Deferred re-evaluation of segments that could not be purged yet.
//!
//! The scheduler only defers; it never decides anything. Once a timer fires,
//! the request is handed to a `RetryQueue` drained by
//! `SegmentDeletionManager::process_retries`.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::config::RetryConfig;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{DeletionError, Result};

/// A batch of segments of one table to evaluate for deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionRequest {
    pub table_name: String,
    pub segment_ids: BTreeSet<String>,
    /// Delay before segments that cannot be purged are looked at again.
    pub retry_delay: Duration,
    /// 1 for a fresh request, incremented on every rescheduling.
    pub attempt: u32,
}

impl DeletionRequest {
    pub fn new<I, S>(table_name: impl Into<String>, segment_ids: I, retry_delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table_name: table_name.into(),
            segment_ids: segment_ids.into_iter().map(Into::into).collect(),
            retry_delay,
            attempt: 1,
        }
    }

    /// Reject requests that can never be evaluated.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(DeletionError::InvalidRequest(
                "table name must not be empty".to_string(),
            ));
        }
        if self.table_name.contains('/') {
            return Err(DeletionError::InvalidRequest(format!(
                "table name {:?} must not contain '/'",
                self.table_name
            )));
        }
        if let Some(segment_id) = self
            .segment_ids
            .iter()
            .find(|segment_id| segment_id.is_empty() || segment_id.contains('/'))
        {
            return Err(DeletionError::InvalidRequest(format!(
                "invalid segment id {segment_id:?} for table {}",
                self.table_name
            )));
        }
        Ok(())
    }

    /// Follow-up request for `segment_ids`, one attempt later.
    pub fn follow_up(&self, segment_ids: BTreeSet<String>, retry_delay: Duration) -> Self {
        Self {
            table_name: self.table_name.clone(),
            segment_ids,
            retry_delay,
            attempt: self.attempt.saturating_add(1),
        }
    }
}

/// How long to wait between attempts, and when to call a segment stuck.
///
/// Retries never stop; `alert_after_attempts` only makes stuck segments
/// visible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_multiplier: u32,
    pub max_delay: Duration,
    pub alert_after_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            backoff_multiplier: config.backoff_multiplier.max(1),
            max_delay: config.max_delay,
            alert_after_attempts: config.alert_after_attempts,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, no alerting.
    pub fn fixed() -> Self {
        Self {
            backoff_multiplier: 1,
            max_delay: Duration::MAX,
            alert_after_attempts: None,
        }
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.backoff_multiplier)
            .min(self.max_delay.max(current))
    }

    /// True on every multiple of `alert_after_attempts`.
    pub fn should_alert(&self, attempt: u32) -> bool {
        match self.alert_after_attempts {
            Some(threshold) if threshold > 0 => attempt > 0 && attempt % threshold == 0,
            _ => false,
        }
    }
}

/// Backend deferring a request by `delay`.
///
/// Must return immediately; the request is re-submitted later, off the
/// caller's stack.
#[cfg_attr(test, mockall::automock)]
pub trait RetryScheduler: Send + Sync {
    fn schedule_retry(&self, request: DeletionRequest, delay: Duration);
}

/// Receiving end of `DelayedRetryScheduler`: requests whose delay elapsed.
#[derive(Debug)]
pub struct RetryQueue {
    receiver: mpsc::UnboundedReceiver<DeletionRequest>,
}

impl RetryQueue {
    /// Next due request, or `None` once the scheduler shut down.
    pub async fn next(&mut self) -> Option<DeletionRequest> {
        self.receiver.recv().await
    }
}

/// In-process scheduler arming one tokio timer per retry.
pub struct DelayedRetryScheduler {
    runtime: Handle,
    sender: Mutex<Option<mpsc::UnboundedSender<DeletionRequest>>>,
    timers: Mutex<JoinSet<()>>,
    shut_down: AtomicBool,
}

impl DelayedRetryScheduler {
    pub fn new(runtime: Handle) -> (Self, RetryQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            runtime,
            sender: Mutex::new(Some(sender)),
            timers: Mutex::new(JoinSet::new()),
            shut_down: AtomicBool::new(false),
        };
        (scheduler, RetryQueue { receiver })
    }

    /// Timers armed and not yet fired.
    pub fn pending(&self) -> usize {
        let mut timers = lock(&self.timers);
        while timers.try_join_next().is_some() {}
        timers.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Disarm every pending timer and close the queue.
    ///
    /// Segments of disarmed requests stay in the metadata store and resurface
    /// on the next deletion sweep.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut timers = lock(&self.timers);
        let disarmed = timers.len();
        timers.abort_all();
        lock(&self.sender).take();
        debug!(disarmed, "Retry scheduler shut down");
    }
}

impl RetryScheduler for DelayedRetryScheduler {
    fn schedule_retry(&self, request: DeletionRequest, delay: Duration) {
        // Held until the timer is armed so `shutdown` cannot slip in between.
        let mut timers = lock(&self.timers);
        let sender = match lock(&self.sender).as_ref() {
            Some(sender) if !self.is_shut_down() => sender.clone(),
            _ => {
                warn!(
                    table_name = %request.table_name,
                    segments = request.segment_ids.len(),
                    "Retry scheduler is shut down, dropping retry"
                );
                return;
            }
        };

        debug!(
            table_name = %request.table_name,
            segments = request.segment_ids.len(),
            attempt = request.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        while timers.try_join_next().is_some() {}
        timers.spawn_on(
            async move {
                tokio::time::sleep(delay).await;
                // Receiver gone means the worker stopped; nothing left to do.
                let _ = sender.send(request);
            },
            &self.runtime,
        );
    }
}

impl Drop for DelayedRetryScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
