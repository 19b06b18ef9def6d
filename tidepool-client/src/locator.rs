//! Partition location.
//!
//! The client keeps a copy-on-write view of the data partitions of its volume. The view is
//! refreshed wholesale by the metadata subsystem, while writes pick their target partition
//! through the carry scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arc_swap::ArcSwap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use tidepool_core::carry::{self, CarryNode, CarryState};
use tidepool_core::AppResult;

/// A type capable of locating data partitions.
pub trait PartitionLocator: Send + Sync + 'static {
    /// Pick the partition which should receive the next write, skipping the excluded IDs.
    fn write_partition(&self, exclude: &HashSet<u64>) -> AppResult<Arc<DataPartition>>;

    /// Get the partition with the given ID.
    fn partition(&self, partition_id: u64) -> Option<Arc<DataPartition>>;
}

/// The status of a data partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum PartitionStatus {
    ReadOnly,
    ReadWrite,
}

/// The metadata of a data partition, as published by the master.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartitionInfo {
    #[serde(rename = "PartitionID")]
    pub partition_id: u64,
    /// Replica hosts, leader first.
    pub hosts: Vec<String>,
    pub status: PartitionStatus,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
}

/// A replicated storage unit.
pub struct DataPartition {
    info: PartitionInfo,
    carry: RwLock<CarryState>,
}

impl DataPartition {
    fn new(info: PartitionInfo, carry: CarryState) -> Self {
        Self {
            info,
            carry: RwLock::new(carry),
        }
    }

    pub fn partition_id(&self) -> u64 {
        self.info.partition_id
    }

    /// Replica hosts, leader first.
    pub fn hosts(&self) -> &[String] {
        &self.info.hosts
    }

    /// The host which serves writes and deletes.
    pub fn leader(&self) -> Option<&str> {
        self.info.hosts.first().map(String::as_str)
    }

    pub fn status(&self) -> PartitionStatus {
        self.info.status
    }

    /// True if this partition may receive writes.
    pub fn is_writable(&self) -> bool {
        self.info.status == PartitionStatus::ReadWrite && !self.info.hosts.is_empty()
    }

    fn usage_ratio(&self) -> f64 {
        if self.info.total == 0 {
            0.0
        } else {
            self.info.used as f64 / self.info.total as f64
        }
    }
}

impl CarryNode for DataPartition {
    type Id = u64;

    fn carry_id(&self) -> u64 {
        self.info.partition_id
    }

    fn carry_state(&self) -> CarryState {
        *self.carry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn accrue_carry(&self) -> f64 {
        let ratio = self.usage_ratio();
        self.carry.write().unwrap_or_else(PoisonError::into_inner).accrue(ratio)
    }

    fn try_select(&self) -> Option<CarryState> {
        let mut carry = self.carry.write().unwrap_or_else(PoisonError::into_inner);
        if !carry.take() {
            return None;
        }
        Some(*carry)
    }
}

/// A copy-on-write view of the data partitions of a volume.
pub struct PartitionView {
    partitions: ArcSwap<HashMap<u64, Arc<DataPartition>>>,
    /// Serializes updates, and seeds the carry of newly observed partitions.
    rng: Mutex<StdRng>,
}

impl PartitionView {
    /// Create a new empty view, optionally seeding the carry RNG.
    pub fn new(carry_seed: Option<u64>) -> Self {
        let rng = match carry_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            partitions: Default::default(),
            rng: Mutex::new(rng),
        }
    }

    /// Replace the view with the given partitions.
    ///
    /// Partitions already present keep their carry state, so a refresh does not reset the
    /// fairness of the write lottery.
    #[tracing::instrument(level = "debug", skip(self, partitions), fields(count = partitions.len()))]
    pub fn update(&self, partitions: Vec<PartitionInfo>) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let orig = self.partitions.load_full();
        let mut updated = HashMap::with_capacity(partitions.len());
        for info in partitions {
            let carry = match orig.get(&info.partition_id) {
                Some(old) => old.carry_state(),
                None => CarryState::seeded(&mut *rng),
            };
            updated.insert(info.partition_id, Arc::new(DataPartition::new(info, carry)));
        }
        self.partitions.store(Arc::new(updated));
    }

    /// A snapshot of all partitions, ordered by ID.
    pub fn partitions(&self) -> Vec<Arc<DataPartition>> {
        let mut partitions: Vec<_> = self.partitions.load().values().cloned().collect();
        partitions.sort_by_key(|partition| partition.partition_id());
        partitions
    }
}

impl PartitionLocator for PartitionView {
    fn write_partition(&self, exclude: &HashSet<u64>) -> AppResult<Arc<DataPartition>> {
        let partitions = self.partitions();
        carry::select(&partitions, exclude, DataPartition::is_writable)
    }

    fn partition(&self, partition_id: u64) -> Option<Arc<DataPartition>> {
        self.partitions.load().get(&partition_id).cloned()
    }
}
