//! Read-only access to a table's placement as seen by the cluster coordinator.
//!
//! Two views exist per table: the ideal state (where replicas should live) and
//! the external view (where replicas are actually served). Both are backed by
//! an eventually-consistent coordinator and may disagree at any instant.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::Result;

/// Instance id → state label (e.g. `ONLINE`, `OFFLINE`) for one segment.
pub type InstanceStateMap = BTreeMap<String, String>;

/// Segment id → instance state map for one table.
///
/// A segment missing from the view and a segment mapped to an empty instance
/// map mean the same thing: nothing currently claims it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementView {
    segments: BTreeMap<String, InstanceStateMap>,
}

impl PlacementView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mostly useful in tests.
    pub fn with_segment<I, K, V>(mut self, segment_id: impl Into<String>, instances: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let instances = instances
            .into_iter()
            .map(|(instance, state)| (instance.into(), state.into()))
            .collect();
        self.segments.insert(segment_id.into(), instances);
        self
    }

    pub fn insert(&mut self, segment_id: impl Into<String>, instances: InstanceStateMap) {
        self.segments.insert(segment_id.into(), instances);
    }

    pub fn remove(&mut self, segment_id: &str) -> Option<InstanceStateMap> {
        self.segments.remove(segment_id)
    }

    pub fn instance_states(&self, segment_id: &str) -> Option<&InstanceStateMap> {
        self.segments.get(segment_id)
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Placement queries against the cluster coordinator.
///
/// Implementations return an empty view for unknown tables and never fail for
/// unknown segments. An error means the coordinator itself could not be
/// reached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterStateReader: Send + Sync {
    /// Desired placement of the table's segments.
    async fn ideal_state(&self, table_name: &str) -> Result<PlacementView>;

    /// Observed serving placement of the table's segments.
    async fn external_view(&self, table_name: &str) -> Result<PlacementView>;
}

#[derive(Clone, Debug, Default)]
struct TablePlacement {
    ideal: PlacementView,
    external: PlacementView,
}

/// Coordinator stand-in holding placement views in memory.
#[derive(Debug, Default)]
pub struct InMemoryClusterState {
    tables: RwLock<HashMap<String, TablePlacement>>,
}

impl InMemoryClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_ideal_state(&self, table_name: &str, view: PlacementView) {
        let mut tables = self.tables.write().await;
        tables.entry(table_name.to_string()).or_default().ideal = view;
    }

    pub async fn set_external_view(&self, table_name: &str, view: PlacementView) {
        let mut tables = self.tables.write().await;
        tables.entry(table_name.to_string()).or_default().external = view;
    }

    /// Drop a segment from both views, as happens once the coordinator has
    /// converged after the segment was unassigned.
    pub async fn remove_segment(&self, table_name: &str, segment_id: &str) {
        let mut tables = self.tables.write().await;
        if let Some(placement) = tables.get_mut(table_name) {
            placement.ideal.remove(segment_id);
            placement.external.remove(segment_id);
        }
    }

    pub async fn drop_table(&self, table_name: &str) {
        self.tables.write().await.remove(table_name);
    }
}

#[async_trait]
impl ClusterStateReader for InMemoryClusterState {
    async fn ideal_state(&self, table_name: &str) -> Result<PlacementView> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table_name)
            .map(|placement| placement.ideal.clone())
            .unwrap_or_default())
    }

    async fn external_view(&self, table_name: &str) -> Result<PlacementView> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table_name)
            .map(|placement| placement.external.clone())
            .unwrap_or_default())
    }
}
