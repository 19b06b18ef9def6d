use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use rand::rngs::StdRng;
use rand::SeedableRng;

use tidepool_core::admin::HeartbeatResponse;
use tidepool_core::carry;
use tidepool_core::{AppError, AppResult};

use super::node::StorageNode;
use super::{METRIC_HEARTBEATS_INGESTED, METRIC_NODES_ACTIVE, METRIC_NODES_INACTIVATED, METRIC_NODES_SELECTED};
use crate::config::Config;

/// An immutable snapshot of the fleet.
#[derive(Clone, Default)]
struct Fleet {
    /// All known nodes, ordered by ID.
    nodes: BTreeMap<u64, Arc<StorageNode>>,
    /// An index of node addresses to IDs.
    addrs: HashMap<String, u64>,
}

/// The authoritative store of all storage nodes known to this master.
///
/// Readers load a snapshot of the fleet without blocking. Membership changes are serialized
/// through `membership` and published by swapping in a new snapshot.
pub struct Registry {
    config: Arc<Config>,
    fleet: ArcSwap<Fleet>,
    /// Serializes membership changes, and holds the next node ID along with the RNG used to
    /// seed node carry values.
    membership: Mutex<Membership>,
}

struct Membership {
    next_id: u64,
    rng: StdRng,
}

impl Registry {
    /// Create a new instance.
    pub fn new(config: Arc<Config>) -> Self {
        metrics::register_counter!(METRIC_HEARTBEATS_INGESTED, metrics::Unit::Count, "heartbeat responses ingested from storage nodes");
        metrics::register_counter!(METRIC_NODES_SELECTED, metrics::Unit::Count, "storage nodes selected as write targets");
        metrics::register_counter!(METRIC_NODES_INACTIVATED, metrics::Unit::Count, "storage nodes marked inactive by the liveness check");
        metrics::register_gauge!(METRIC_NODES_ACTIVE, metrics::Unit::Count, "storage nodes currently active");

        let rng = match config.carry_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            fleet: ArcSwap::from_pointee(Fleet::default()),
            membership: Mutex::new(Membership { next_id: 1, rng }),
        }
    }

    /// Register the node at `addr`, returning the existing node if it is already known.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn register(&self, addr: &str) -> AppResult<Arc<StorageNode>> {
        if addr.is_empty() {
            return Err(AppError::InvalidInput("storage node address must not be empty".into()));
        }
        if let Some(node) = self.get_by_addr(addr) {
            return Ok(node);
        }

        let mut membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have registered the node while we waited on the lock.
        let orig = self.fleet.load_full();
        if let Some(node) = orig.addrs.get(addr).and_then(|id| orig.nodes.get(id)) {
            return Ok(node.clone());
        }

        let id = membership.next_id;
        membership.next_id += 1;
        let node = Arc::new(StorageNode::new(id, addr, &mut membership.rng));
        let mut updated = orig.as_ref().clone();
        updated.nodes.insert(id, node.clone());
        updated.addrs.insert(addr.into(), id);
        self.fleet.store(Arc::new(updated));

        tracing::info!(id, addr, "registered storage node");
        Ok(node)
    }

    /// Remove the node at `addr`, closing its task sender.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn remove(&self, addr: &str) -> Option<Arc<StorageNode>> {
        let _membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner);
        let orig = self.fleet.load_full();
        let id = *orig.addrs.get(addr)?;
        let mut updated = orig.as_ref().clone();
        updated.addrs.remove(addr);
        let node = updated.nodes.remove(&id)?;
        self.fleet.store(Arc::new(updated));

        node.clean();
        tracing::info!(id, addr, "removed storage node");
        Some(node)
    }

    /// Apply a heartbeat response from the node at `addr`, registering the node if needed.
    #[tracing::instrument(level = "debug", skip(self, resp))]
    pub fn ingest_heartbeat(&self, addr: &str, resp: &HeartbeatResponse) -> AppResult<Arc<StorageNode>> {
        let node = self.register(addr)?;
        node.update_metrics(resp);
        metrics::increment_counter!(METRIC_HEARTBEATS_INGESTED);
        tracing::debug!(
            id = node.id(),
            total = resp.total,
            used = resp.used,
            available = resp.available,
            reports = resp.partition_reports.len(),
            "heartbeat ingested"
        );
        Ok(node)
    }

    pub fn get_by_addr(&self, addr: &str) -> Option<Arc<StorageNode>> {
        let fleet = self.fleet.load();
        fleet.addrs.get(addr).and_then(|id| fleet.nodes.get(id)).cloned()
    }

    /// A snapshot of all known nodes, ordered by ID.
    pub fn nodes(&self) -> Vec<Arc<StorageNode>> {
        self.fleet.load().nodes.values().cloned().collect()
    }

    /// Run the liveness check against every node, returning the number of active nodes.
    pub fn check_liveness_all(&self) -> usize {
        let timeout = self.config.node_timeout();
        let mut active = 0;
        for node in self.nodes() {
            if node.check_liveness(timeout) {
                tracing::warn!(id = node.id(), addr = node.addr(), "storage node missed its heartbeat deadline, marked inactive");
                metrics::increment_counter!(METRIC_NODES_INACTIVATED);
            }
            if node.is_active() {
                active += 1;
            }
        }
        metrics::gauge!(METRIC_NODES_ACTIVE, active as f64);
        active
    }

    /// Select the storage node which should receive the next write.
    ///
    /// Nodes whose IDs are in `exclude` are never returned.
    pub fn select_node_for_write(&self, exclude: &HashSet<u64>) -> AppResult<Arc<StorageNode>> {
        let min_writable_bytes = self.config.min_writable_bytes;
        let nodes = self.nodes();
        let node = carry::select(&nodes, exclude, |node| node.is_write_able(min_writable_bytes))?;
        metrics::increment_counter!(METRIC_NODES_SELECTED);
        tracing::debug!(id = node.id(), addr = node.addr(), "storage node selected for write");
        Ok(node)
    }
}
