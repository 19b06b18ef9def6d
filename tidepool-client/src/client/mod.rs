//! Tidepool blob client.

mod delete;
mod read;
mod validate;
mod write;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::key::{self, BlobKey};
use crate::locator::{DataPartition, PartitionLocator};
use crate::pool::ConnPool;
use tidepool_core::{AppError, AppResult};

pub(crate) const METRIC_WRITE_RETRIES: &str = "tidepool_client_write_retries";
pub(crate) const METRIC_READ_FALLBACKS: &str = "tidepool_client_read_replica_fallbacks";
pub(crate) const METRIC_INTEGRITY_FAILURES: &str = "tidepool_client_integrity_failures";

/// Blob client configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// The maximum number of partitions a single write attempts.
    #[serde(default = "ClientConfig::default_max_retries")]
    pub max_retries: usize,
    /// The deadline for each packet exchanged with a storage node.
    #[serde(default = "ClientConfig::default_read_deadline_seconds")]
    pub read_deadline_seconds: u64,
}

impl ClientConfig {
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_seconds)
    }

    fn default_max_retries() -> usize {
        100
    }

    fn default_read_deadline_seconds() -> u64 {
        5
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            read_deadline_seconds: Self::default_read_deadline_seconds(),
        }
    }
}

/// A client for writing, reading and deleting blobs of a single volume.
///
/// Instances can be cheaply cloned.
#[derive(Clone)]
pub struct BlobClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// Client internal state.
pub(crate) struct ClientInner {
    pub(crate) cluster: String,
    pub(crate) volume: String,
    pub(crate) conns: Arc<dyn ConnPool>,
    pub(crate) locator: Arc<dyn PartitionLocator>,
    pub(crate) config: ClientConfig,
}

impl BlobClient {
    /// Construct a new client instance.
    ///
    /// ## parameters
    /// - `cluster` & `volume`: the names embedded in, and expected of, every blob key.
    /// - `conns`: the pool used for all storage node connections.
    /// - `locator`: the source of data partitions for the volume.
    pub fn new(cluster: &str, volume: &str, conns: Arc<dyn ConnPool>, locator: Arc<dyn PartitionLocator>, config: ClientConfig) -> AppResult<Self> {
        key::validate_name("cluster", cluster)?;
        key::validate_name("volume", volume)?;
        if config.max_retries == 0 {
            return Err(AppError::InvalidInput("max_retries must be greater than 0".into()));
        }

        metrics::register_counter!(METRIC_WRITE_RETRIES, metrics::Unit::Count, "write attempts retried against another partition");
        metrics::register_counter!(METRIC_READ_FALLBACKS, metrics::Unit::Count, "reads which fell back to another replica");
        metrics::register_counter!(METRIC_INTEGRITY_FAILURES, metrics::Unit::Count, "replies rejected by a CRC mismatch");

        Ok(Self {
            inner: Arc::new(ClientInner {
                cluster: cluster.into(),
                volume: volume.into(),
                conns,
                locator,
                config,
            }),
        })
    }

    /// Decode the given key and resolve its partition.
    fn locate(&self, key: &str) -> AppResult<(BlobKey, Arc<DataPartition>)> {
        let key = BlobKey::decode(key)?;
        if key.cluster != self.inner.cluster || key.volume != self.inner.volume {
            return Err(AppError::InvalidInput(format!(
                "blob key belongs to {}/{}, this client serves {}/{}",
                key.cluster, key.volume, self.inner.cluster, self.inner.volume
            )));
        }
        let partition = self
            .inner
            .locator
            .partition(key.partition_id)
            .ok_or_else(|| AppError::ResourceNotFound(format!("data partition {}", key.partition_id)))?;
        Ok((key, partition))
    }
}
