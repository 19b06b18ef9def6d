//! The Tidepool blob data client.

mod client;
#[cfg(test)]
mod fixtures;
pub mod key;
pub mod locator;
pub mod pool;

pub use crate::client::{BlobClient, ClientConfig};
pub use crate::key::BlobKey;
pub use crate::locator::{DataPartition, PartitionInfo, PartitionLocator, PartitionStatus, PartitionView};
pub use crate::pool::{ConnPool, PacketConn, PoolConfig, PooledConn, TcpConnPool, TcpPacketConn};
pub use async_trait::async_trait;
pub use tidepool_core::{AppError, AppResult, ErrorKind};
