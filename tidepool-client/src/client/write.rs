//! The write path.

use std::collections::HashSet;
use std::sync::Arc;

use tidepool_core::packet::{Packet, MAX_PACKET_DATA_SIZE};
use tidepool_core::{AppError, AppResult, ErrorKind};

use super::validate::validate_write_reply;
use super::{BlobClient, METRIC_WRITE_RETRIES};
use crate::key::BlobKey;
use crate::locator::DataPartition;
use crate::pool::PooledConn;

/// The state carried from one write attempt to the next.
#[derive(Debug, Default)]
pub(crate) struct WriteAttempt {
    /// The number of attempts made so far.
    pub(crate) attempt: usize,
    /// Partitions which already failed this write.
    pub(crate) exclude: HashSet<u64>,
    /// The cause of the most recent failure.
    pub(crate) last_cause: Option<AppError>,
}

impl WriteAttempt {
    /// The context of the attempt following a failure against the given partition.
    fn failed(mut self, partition_id: u64, cause: AppError) -> Self {
        self.attempt += 1;
        self.exclude.insert(partition_id);
        self.last_cause = Some(cause);
        self
    }
}

/// The outcome of a single write attempt.
#[derive(Debug)]
pub(crate) enum Step {
    Done(String),
    Retry(WriteAttempt),
}

impl BlobClient {
    /// Write the given bytes, returning the key under which they are stored.
    ///
    /// Each attempt targets a different partition. `AppError::CapacityExhausted` is returned only
    /// when no partition was ever eligible. Once an attempt has failed, running out of untried
    /// partitions or of retry budget yields `AppError::RetryExhausted` carrying the last failure.
    #[tracing::instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    pub async fn write(&self, data: &[u8]) -> AppResult<String> {
        if data.len() > MAX_PACKET_DATA_SIZE as usize {
            return Err(AppError::InvalidInput(format!(
                "blob of {} bytes exceeds the max of {} bytes",
                data.len(),
                MAX_PACKET_DATA_SIZE
            )));
        }
        let mut ctx = WriteAttempt::default();
        while ctx.attempt < self.inner.config.max_retries {
            match self.attempt_write(ctx, data).await? {
                Step::Done(key) => return Ok(key),
                Step::Retry(next) => {
                    metrics::increment_counter!(METRIC_WRITE_RETRIES);
                    ctx = next;
                }
            }
        }
        Err(AppError::RetryExhausted {
            attempts: ctx.attempt,
            source: ctx.last_cause.map(Box::new),
        })
    }

    /// Run a single write attempt against the next partition chosen by the locator.
    pub(crate) async fn attempt_write(&self, ctx: WriteAttempt, data: &[u8]) -> AppResult<Step> {
        let partition = match self.inner.locator.write_partition(&ctx.exclude) {
            Ok(partition) => partition,
            Err(err) if err.kind() == ErrorKind::CapacityExhausted && ctx.last_cause.is_some() => {
                tracing::warn!(attempts = ctx.attempt, "no untried writable partition remains");
                return Err(AppError::RetryExhausted {
                    attempts: ctx.attempt,
                    source: ctx.last_cause.map(Box::new),
                });
            }
            Err(err) => return Err(err),
        };

        match self.write_to_partition(&partition, data).await {
            Ok(key) => Ok(Step::Done(key)),
            Err(err) if err.kind() == ErrorKind::InvalidArgument => Err(err),
            Err(err) => {
                tracing::warn!(
                    attempt = ctx.attempt + 1,
                    partition = partition.partition_id(),
                    error = %err,
                    "write attempt failed, excluding partition"
                );
                Ok(Step::Retry(ctx.failed(partition.partition_id(), err)))
            }
        }
    }

    async fn write_to_partition(&self, partition: &Arc<DataPartition>, data: &[u8]) -> AppResult<String> {
        let leader = partition
            .leader()
            .ok_or_else(|| AppError::ResourceNotFound(format!("leader of data partition {}", partition.partition_id())))?;
        let request = Packet::new_write(partition.partition_id(), data.to_vec());

        let mut conn = PooledConn::acquire(self.inner.conns.clone(), leader).await?;
        let reply = conn.round_trip(&request, self.inner.config.read_deadline()).await?;
        validate_write_reply(&request, &reply)?;
        conn.finish(false);

        tracing::debug!(req = %request.unique_log_id(), host = leader, "write committed");
        let key = BlobKey::new(
            &self.inner.cluster,
            &self.inner.volume,
            reply.partition_id,
            reply.file_id,
            reply.object_id,
            reply.size,
        )?;
        Ok(key.encode())
    }
}
