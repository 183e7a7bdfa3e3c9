//! Segment Deletion Manager
//!
//! Decides, for a batch of segments of one table, which metadata records can
//! be purged now, removes them in one bulk call, and reschedules the rest.
//!
//! ## Protocol
//!
//! 1. Read the ideal state and the external view of the table.
//! 2. Segments still claimed by either view are rescheduled untouched.
//! 3. The remaining candidates are removed with a single positional
//!    `bulk_remove`; a failed position whose record turns out to be absent
//!    counts as removed.
//! 4. Every removed segment is reported to the outcome sink, every store
//!    failure is rescheduled.
//!
//! Every input segment ends up either removed or rescheduled. The manager
//! keeps no state between calls, so concurrent runs over overlapping segment
//! sets are independent.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cluster::ClusterStateReader;
use crate::error::{DeletionError, Result};
use crate::metrics::DeletionMetrics;
use crate::reference;
use crate::retry::{DeletionRequest, RetryPolicy, RetryQueue, RetryScheduler};
use crate::sink::{DeletionOutcomeSink, NoopSink};
use crate::store::{MetadataStoreGateway, StorePath};

/// Default root component of segment metadata paths.
pub const DEFAULT_METADATA_ROOT: &str = "SEGMENTS";

/// Why a segment was rescheduled instead of removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    /// A placement view still maps the segment to an instance.
    StillReferenced,
    /// The metadata store could not remove the record.
    StoreRemovalFailed,
}

/// Outcome of one deletion run.
#[derive(Debug, Clone)]
pub struct DeletionReport {
    pub request_id: String,
    pub table_name: String,
    pub attempt: u32,
    pub removed: BTreeSet<String>,
    pub retry: BTreeMap<String, RetryReason>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DeletionReport {
    fn new(request_id: String, request: &DeletionRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            table_name: request.table_name.clone(),
            attempt: request.attempt,
            removed: BTreeSet::new(),
            retry: BTreeMap::new(),
            started_at,
            completed_at: started_at,
        }
    }

    /// Nothing was rescheduled.
    pub fn is_complete(&self) -> bool {
        self.retry.is_empty()
    }

    pub fn still_referenced(&self) -> BTreeSet<String> {
        self.segments_with(RetryReason::StillReferenced)
    }

    pub fn store_failures(&self) -> BTreeSet<String> {
        self.segments_with(RetryReason::StoreRemovalFailed)
    }

    fn segments_with(&self, reason: RetryReason) -> BTreeSet<String> {
        self.retry
            .iter()
            .filter(|(_, r)| **r == reason)
            .map(|(segment_id, _)| segment_id.clone())
            .collect()
    }
}

pub struct SegmentDeletionManager {
    cluster: Arc<dyn ClusterStateReader>,
    store: Arc<dyn MetadataStoreGateway>,
    scheduler: Arc<dyn RetryScheduler>,
    sink: Arc<dyn DeletionOutcomeSink>,
    policy: RetryPolicy,
    metadata_root: String,
    metrics: DeletionMetrics,
}

impl SegmentDeletionManager {
    pub fn new(
        cluster: Arc<dyn ClusterStateReader>,
        store: Arc<dyn MetadataStoreGateway>,
        scheduler: Arc<dyn RetryScheduler>,
    ) -> Self {
        Self {
            cluster,
            store,
            scheduler,
            sink: Arc::new(NoopSink),
            policy: RetryPolicy::default(),
            metadata_root: DEFAULT_METADATA_ROOT.to_string(),
            metrics: DeletionMetrics::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DeletionOutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metadata_root(mut self, metadata_root: impl Into<String>) -> Self {
        self.metadata_root = metadata_root.into();
        self
    }

    pub fn with_metrics(mut self, metrics: DeletionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &DeletionMetrics {
        &self.metrics
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the deletion protocol for `segment_ids` of `table_name` now.
    ///
    /// Fails only for an invalid request or when the cluster coordinator
    /// cannot be read; in both cases nothing was removed or rescheduled.
    pub async fn delete_segments<I, S>(
        &self,
        table_name: &str,
        segment_ids: I,
        retry_delay: Duration,
    ) -> Result<DeletionReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = DeletionRequest::new(table_name, segment_ids, retry_delay);
        self.execute(&request).await
    }

    /// Hand the request to the retry backend for immediate evaluation and
    /// return without waiting for it.
    pub fn submit<I, S>(&self, table_name: &str, segment_ids: I, retry_delay: Duration) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = DeletionRequest::new(table_name, segment_ids, retry_delay);
        request.validate()?;
        if request.segment_ids.is_empty() {
            return Ok(());
        }
        self.scheduler.schedule_retry(request, Duration::ZERO);
        Ok(())
    }

    /// Evaluate one request, first attempt or retry alike.
    pub async fn execute(&self, request: &DeletionRequest) -> Result<DeletionReport> {
        request.validate()?;

        let started_at = Utc::now();
        let request_id = format!("deletion_{}", started_at.timestamp_millis());
        let table_name = request.table_name.as_str();
        let mut report = DeletionReport::new(request_id, request, started_at);

        if request.segment_ids.is_empty() {
            debug!(table_name = %table_name, "No segments to delete");
            return Ok(report);
        }

        self.metrics.record_request(request.segment_ids.len());

        let ideal = self.cluster.ideal_state(table_name).await?;
        let external = self.cluster.external_view(table_name).await?;

        let split = reference::partition(&request.segment_ids, &ideal, &external);

        info!(
            request_id = %report.request_id,
            table_name = %table_name,
            attempt = request.attempt,
            segments = request.segment_ids.len(),
            referenced = split.referenced.len(),
            candidates = split.candidates.len(),
            "Evaluating segments for deletion"
        );

        let next_delay = self.policy.next_delay(request.retry_delay);

        if !split.referenced.is_empty() {
            debug!(
                table_name = %table_name,
                segments = ?split.referenced,
                "Segments still referenced by the cluster, postponing"
            );
            for segment_id in &split.referenced {
                report
                    .retry
                    .insert(segment_id.clone(), RetryReason::StillReferenced);
            }
            self.metrics.record_still_referenced(split.referenced.len());
            self.reschedule(request, split.referenced.iter().cloned().collect(), next_delay);
        }

        if !split.candidates.is_empty() {
            let failed = self
                .remove_from_store(table_name, &split.candidates, &mut report)
                .await;

            if !failed.is_empty() {
                self.metrics.record_store_failures(failed.len());
                self.reschedule(request, failed, next_delay);
            }
        }

        report.completed_at = Utc::now();
        self.metrics.record_duration_ms(
            (report.completed_at - report.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );

        if !report.retry.is_empty() && self.policy.should_alert(request.attempt) {
            self.metrics.record_stuck_alert();
            warn!(
                request_id = %report.request_id,
                table_name = %table_name,
                attempt = request.attempt,
                still_referenced = ?report.still_referenced(),
                store_failures = ?report.store_failures(),
                "Segments repeatedly failed to delete"
            );
        }

        info!(
            request_id = %report.request_id,
            table_name = %table_name,
            removed = report.removed.len(),
            postponed = report.retry.len(),
            "Deletion run completed"
        );

        Ok(report)
    }

    /// Bulk-remove the candidates' metadata records. Returns the segments
    /// that must be retried.
    async fn remove_from_store(
        &self,
        table_name: &str,
        candidates: &[String],
        report: &mut DeletionReport,
    ) -> BTreeSet<String> {
        // Ordered: results are matched back to segments by position.
        let paths: Vec<StorePath> = candidates
            .iter()
            .map(|segment_id| StorePath::for_segment(&self.metadata_root, table_name, segment_id))
            .collect();

        let results = self.store.bulk_remove(&paths).await;
        if results.len() != paths.len() {
            warn!(
                table_name = %table_name,
                expected = paths.len(),
                actual = results.len(),
                "Bulk removal returned a mismatched result count, treating missing positions as failed"
            );
        }

        let mut failed = BTreeSet::new();
        for (position, path) in paths.iter().enumerate() {
            let segment_id = path.segment_id();
            let removed = results.get(position).copied().unwrap_or(false);

            let already_absent = !removed && self.is_absent(path).await;
            if removed || already_absent {
                report.removed.insert(segment_id.to_string());
                self.metrics.record_removed(already_absent);
                self.notify_removed(table_name, segment_id).await;
            } else {
                warn!(
                    table_name = %table_name,
                    segment_id = %segment_id,
                    path = %path,
                    "Could not remove segment metadata, will retry"
                );
                report
                    .retry
                    .insert(segment_id.to_string(), RetryReason::StoreRemovalFailed);
                failed.insert(segment_id.to_string());
            }
        }

        failed
    }

    /// A failed removal of a record that does not exist is a success.
    async fn is_absent(&self, path: &StorePath) -> bool {
        match self.store.exists(path).await {
            Ok(exists) => !exists,
            Err(e) => {
                warn!(path = %path, error = %e, "Existence check failed, assuming record is present");
                false
            }
        }
    }

    async fn notify_removed(&self, table_name: &str, segment_id: &str) {
        if let Err(e) = self.sink.on_segment_removed(table_name, segment_id).await {
            self.metrics.record_hook_failure();
            warn!(
                table_name = %table_name,
                segment_id = %segment_id,
                error = %e,
                "Segment removal hook failed"
            );
        }
    }

    fn reschedule(&self, request: &DeletionRequest, segment_ids: BTreeSet<String>, delay: Duration) {
        self.metrics.record_retry_scheduled();
        self.scheduler
            .schedule_retry(request.follow_up(segment_ids, delay), delay);
    }

    /// Drain `queue`, evaluating every request whose delay elapsed, until the
    /// scheduler shuts down.
    ///
    /// A retry whose placement views cannot be read is rescheduled whole, so
    /// its segments are never lost track of.
    pub async fn process_retries(self: Arc<Self>, mut queue: RetryQueue) {
        while let Some(request) = queue.next().await {
            match self.execute(&request).await {
                Ok(report) => {
                    debug!(
                        request_id = %report.request_id,
                        table_name = %report.table_name,
                        attempt = report.attempt,
                        removed = report.removed.len(),
                        postponed = report.retry.len(),
                        "Retry evaluated"
                    );
                }
                Err(DeletionError::InvalidRequest(reason)) => {
                    warn!(table_name = %request.table_name, reason = %reason, "Dropping invalid retry");
                }
                Err(e) => {
                    warn!(
                        table_name = %request.table_name,
                        error = %e,
                        "Retry failed before partitioning, rescheduling"
                    );
                    let delay = self.policy.next_delay(request.retry_delay);
                    self.reschedule(&request, request.segment_ids.clone(), delay);
                }
            }
        }
        debug!("Retry queue closed, stopping retry processing");
    }
}
