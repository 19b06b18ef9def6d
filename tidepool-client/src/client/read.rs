//! The read path.

use std::sync::Arc;

use tidepool_core::packet::Packet;
use tidepool_core::{AppError, AppResult};

use super::validate::validate_read_reply;
use super::{BlobClient, METRIC_READ_FALLBACKS};
use crate::key::BlobKey;
use crate::locator::DataPartition;
use crate::pool::PooledConn;

/// The failures collected while walking a partition's replicas.
#[derive(Debug, Default)]
pub(crate) struct ReplicaWalk {
    /// The number of times a failed replica handed over to the next one.
    pub(crate) fallbacks: usize,
    pub(crate) causes: Vec<AppError>,
}

impl BlobClient {
    /// Read the blob stored under the given key.
    ///
    /// Replicas are tried in order until one serves a reply which passes validation. If every
    /// replica fails, `AppError::ReplicasExhausted` carries one cause per replica.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn read(&self, key: &str) -> AppResult<Vec<u8>> {
        let (key, partition) = self.locate(key)?;

        let mut walk = ReplicaWalk::default();
        match self.read_replicas(&partition, &key, &mut walk).await {
            Some(data) => Ok(data),
            None => Err(AppError::ReplicasExhausted {
                partition_id: partition.partition_id(),
                causes: walk.causes,
            }),
        }
    }

    /// Walk the partition's replicas in order, returning the first valid payload.
    pub(crate) async fn read_replicas(&self, partition: &Arc<DataPartition>, key: &BlobKey, walk: &mut ReplicaWalk) -> Option<Vec<u8>> {
        let hosts = partition.hosts();
        for (idx, host) in hosts.iter().enumerate() {
            match self.read_from_host(partition, host, key).await {
                Ok(data) => return Some(data),
                Err(err) => {
                    tracing::warn!(partition = partition.partition_id(), host = %host, error = %err, "read from replica failed");
                    walk.causes.push(err);
                    if idx + 1 < hosts.len() {
                        walk.fallbacks += 1;
                        metrics::increment_counter!(METRIC_READ_FALLBACKS);
                    }
                }
            }
        }
        None
    }

    async fn read_from_host(&self, partition: &Arc<DataPartition>, host: &str, key: &BlobKey) -> AppResult<Vec<u8>> {
        let request = Packet::new_read(partition.partition_id(), key.file_id, key.object_id, key.size);

        let mut conn = PooledConn::acquire(self.inner.conns.clone(), host).await?;
        let mut reply = conn.round_trip(&request, self.inner.config.read_deadline()).await?;
        validate_read_reply(&request, &reply)?;
        conn.finish(false);

        let size = reply.payload().len();
        reply.data.truncate(size);
        Ok(reply.data)
    }
}
