use tidepool_core::packet::Packet;
use tidepool_core::{AppError, AppResult};

use super::validate::validate_delete_reply;
use super::BlobClient;
use crate::pool::PooledConn;

impl BlobClient {
    /// Mark the blob stored under the given key as deleted.
    ///
    /// A single request is sent to the partition leader; failures are not retried.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let (key, partition) = self.locate(key)?;
        let leader = partition
            .leader()
            .ok_or_else(|| AppError::ResourceNotFound(format!("leader of data partition {}", partition.partition_id())))?;
        let request = Packet::new_mark_delete(partition.partition_id(), key.file_id, key.object_id);

        let mut conn = PooledConn::acquire(self.inner.conns.clone(), leader).await?;
        let reply = conn.round_trip(&request, self.inner.config.read_deadline()).await?;
        if let Err(err) = validate_delete_reply(&request, &reply) {
            tracing::warn!(req = %request.unique_log_id(), host = leader, error = %err, "delete rejected");
            return Err(err);
        }
        conn.finish(false);
        Ok(())
    }
}
