use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use tidepool_core::admin::{AdminTask, HeartbeatResponse, PartitionReport};
use tidepool_core::carry::{CarryNode, CarryState};

use super::sender::{AdminTaskSender, DEFAULT_TASK_QUEUE_SIZE};

/// A storage node of the fleet.
///
/// All mutable state is guarded by a per-node lock. Reads take the lock shared, while metric
/// updates, liveness transitions and carry mutation take it exclusively.
pub struct StorageNode {
    id: u64,
    addr: String,
    sender: AdminTaskSender,
    state: RwLock<NodeState>,
}

struct NodeState {
    total: u64,
    used: u64,
    available: u64,
    rack_name: String,
    usage_ratio: f64,
    partition_count: u32,
    partition_reports: Vec<PartitionReport>,
    carry: CarryState,
    is_active: bool,
    report_time: Instant,
    /// Unix seconds of the last report, 0 if the node never reported.
    report_unix: i64,
}

/// A point in time snapshot of a storage node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StorageNodeView {
    #[serde(rename = "ID")]
    pub id: u64,
    pub addr: String,
    #[serde(rename = "Rack")]
    pub rack_name: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub ratio: f64,
    pub carry: f64,
    pub select_count: u64,
    pub is_active: bool,
    pub report_time: i64,
    pub data_partition_count: u32,
    pub bad_partition_reports: usize,
}

impl StorageNode {
    /// Create a new instance for the node at `addr`.
    ///
    /// The node starts inactive, with a nominal total of 1 byte, and a carry drawn from `rng`.
    pub fn new<R: Rng + ?Sized>(id: u64, addr: &str, rng: &mut R) -> Self {
        Self {
            id,
            addr: addr.into(),
            sender: AdminTaskSender::new(addr, DEFAULT_TASK_QUEUE_SIZE),
            state: RwLock::new(NodeState {
                total: 1,
                used: 0,
                available: 0,
                rack_name: String::new(),
                usage_ratio: 0.0,
                partition_count: 0,
                partition_reports: Vec::new(),
                carry: CarryState::seeded(rng),
                is_active: false,
                report_time: Instant::now(),
                report_unix: 0,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The queue of outbound administrative tasks for this node.
    pub fn sender(&self) -> &AdminTaskSender {
        &self.sender
    }

    fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the metrics of a heartbeat response, marking this node active.
    ///
    /// This is the only path which may mark a node active.
    pub fn update_metrics(&self, resp: &HeartbeatResponse) {
        self.update_metrics_at(resp, Instant::now());
    }

    /// Apply the metrics of a heartbeat response received at `now`.
    pub fn update_metrics_at(&self, resp: &HeartbeatResponse, now: Instant) {
        let mut state = self.write();
        state.total = resp.total;
        state.used = resp.used;
        state.available = resp.available;
        state.rack_name = resp.rack_name.clone();
        state.partition_count = resp.created_partition_cnt;
        state.partition_reports = resp.partition_reports.clone();
        state.usage_ratio = usage_ratio(state.used, state.total);
        state.report_time = now;
        state.report_unix = time::OffsetDateTime::now_utc().unix_timestamp();
        state.is_active = true;
    }

    /// Mark this node inactive if it has not reported within `timeout`.
    ///
    /// Returns true if this call transitioned the node from active to inactive.
    pub fn check_liveness(&self, timeout: Duration) -> bool {
        self.check_liveness_at(Instant::now(), timeout)
    }

    /// Mark this node inactive if it has not reported within `timeout` of `now`.
    pub fn check_liveness_at(&self, now: Instant, timeout: Duration) -> bool {
        let mut state = self.write();
        if now.saturating_duration_since(state.report_time) > timeout {
            let was_active = state.is_active;
            state.is_active = false;
            return was_active;
        }
        false
    }

    /// The IDs of all partitions reported as bad on the given disk, in report order.
    pub fn bad_partition_ids(&self, disk_path: &str) -> Vec<u64> {
        self.read()
            .partition_reports
            .iter()
            .filter(|report| report.disk_path == disk_path)
            .map(|report| report.partition_id)
            .collect()
    }

    /// True if this node is active and has more than `min_writable_bytes` available.
    pub fn is_write_able(&self, min_writable_bytes: u64) -> bool {
        let state = self.read();
        state.is_active && state.available > min_writable_bytes
    }

    pub fn is_active(&self) -> bool {
        self.read().is_active
    }

    /// Build a heartbeat task addressed to this node.
    pub fn create_heartbeat_task(&self, master_addr: &str) -> AdminTask {
        AdminTask::new_heartbeat(&self.addr, master_addr)
    }

    /// A snapshot of this node's current state.
    pub fn view(&self) -> StorageNodeView {
        let state = self.read();
        StorageNodeView {
            id: self.id,
            addr: self.addr.clone(),
            rack_name: state.rack_name.clone(),
            total: state.total,
            used: state.used,
            available: state.available,
            ratio: state.usage_ratio,
            carry: state.carry.carry,
            select_count: state.carry.select_count,
            is_active: state.is_active,
            report_time: state.report_unix,
            data_partition_count: state.partition_count,
            bad_partition_reports: state.partition_reports.len(),
        }
    }

    /// Release resources tied to this node's lifetime.
    pub fn clean(&self) {
        self.sender.exit();
    }

    #[cfg(test)]
    pub(super) fn set_carry(&self, carry: f64) {
        self.write().carry.carry = carry;
    }
}

impl CarryNode for StorageNode {
    type Id = u64;

    fn carry_id(&self) -> u64 {
        self.id
    }

    fn carry_state(&self) -> CarryState {
        self.read().carry
    }

    fn accrue_carry(&self) -> f64 {
        let mut state = self.write();
        let ratio = state.usage_ratio;
        state.carry.accrue(ratio)
    }

    fn try_select(&self) -> Option<CarryState> {
        let mut state = self.write();
        if !state.carry.is_ready() {
            return None;
        }
        state.usage_ratio = usage_ratio(state.used, state.total);
        state.carry.take();
        Some(state.carry)
    }
}

/// The ratio of used to total bytes, 0.0 for a node reporting no capacity.
fn usage_ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}
