//! Fleet management.
//!
//! ## Lifecycle
//! A storage node is registered the first time the master observes its address, either through
//! an explicit add or through its first heartbeat response. From then on it is mutated by every
//! heartbeat response, by the liveness monitor, and by the carry scheduler whenever it is
//! selected as a write target. This module never removes nodes on its own.
//!
//! ## Locking
//! Every node guards its mutable state with its own lock. The registry itself is a
//! copy-on-write snapshot, so scanning the fleet never blocks heartbeat ingestion for unrelated
//! nodes, and no code path holds more than one node lock at a time.

mod liveness;
mod node;
#[cfg(test)]
mod node_test;
mod registry;
#[cfg(test)]
mod registry_test;
mod sender;

pub use liveness::LivenessMonitor;
pub use node::StorageNodeView;
pub use registry::Registry;

pub(self) const METRIC_HEARTBEATS_INGESTED: &str = "tidepool_master_heartbeats_ingested";
pub(self) const METRIC_NODES_INACTIVATED: &str = "tidepool_master_nodes_inactivated";
pub(self) const METRIC_NODES_ACTIVE: &str = "tidepool_master_nodes_active";
pub(self) const METRIC_NODES_SELECTED: &str = "tidepool_master_nodes_selected";
pub(self) const METRIC_TASKS_DROPPED: &str = "tidepool_master_admin_tasks_dropped";
