//! Connection pooling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;

use tidepool_core::packet::Packet;
use tidepool_core::{AppError, AppResult};

/// A connection to a storage node which exchanges packets.
#[async_trait]
pub trait PacketConn: Send {
    /// Write a packet to the connection within the given deadline.
    async fn write_packet(&mut self, packet: &Packet, deadline: Duration) -> AppResult<()>;

    /// Read the next packet from the connection within the given deadline.
    async fn read_packet(&mut self, deadline: Duration) -> AppResult<Packet>;
}

/// A pool of connections keyed by storage node address.
#[async_trait]
pub trait ConnPool: Send + Sync + 'static {
    /// Get a connection to the given address, reusing an idle one where possible.
    async fn acquire(&self, addr: &str) -> AppResult<Box<dyn PacketConn>>;

    /// Return a connection to the pool. A discarded connection is closed instead of reused.
    fn release(&self, addr: &str, conn: Box<dyn PacketConn>, discard: bool);
}

/// A connection checked out of a pool.
///
/// Every acquired connection is released exactly once: explicitly through `finish`, or with
/// `discard = true` when the guard is dropped unfinished.
pub struct PooledConn {
    pool: Arc<dyn ConnPool>,
    addr: String,
    conn: Option<Box<dyn PacketConn>>,
}

impl PooledConn {
    /// Acquire a connection to `addr` from the given pool.
    pub async fn acquire(pool: Arc<dyn ConnPool>, addr: &str) -> AppResult<Self> {
        let conn = pool.acquire(addr).await?;
        Ok(Self {
            pool,
            addr: addr.into(),
            conn: Some(conn),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a request and await its reply, each bounded by `deadline`.
    pub async fn round_trip(&mut self, request: &Packet, deadline: Duration) -> AppResult<Packet> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| AppError::Ise(anyhow!("connection to {} used after release", self.addr)))?;
        conn.write_packet(request, deadline).await?;
        conn.read_packet(deadline).await
    }

    /// Release the connection to the pool.
    pub fn finish(mut self, discard: bool) {
        self.release(discard);
    }

    fn release(&mut self, discard: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(&self.addr, conn, discard);
        }
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.release(true);
    }
}

/// TCP connection pool configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct PoolConfig {
    /// The time allowed for establishing a new connection.
    #[serde(default = "PoolConfig::default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// The maximum number of idle connections kept per address.
    #[serde(default = "PoolConfig::default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    fn default_connect_timeout_seconds() -> u64 {
        3
    }

    fn default_max_idle_per_host() -> usize {
        16
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: Self::default_connect_timeout_seconds(),
            max_idle_per_host: Self::default_max_idle_per_host(),
        }
    }
}

/// A pool of TCP connections.
pub struct TcpConnPool {
    config: PoolConfig,
    idle: Mutex<HashMap<String, Vec<Box<dyn PacketConn>>>>,
}

impl TcpConnPool {
    /// Create a new instance.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            idle: Default::default(),
        }
    }

    /// The number of idle connections currently held for `addr`.
    pub fn idle_count(&self, addr: &str) -> usize {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.get(addr).map(Vec::len).unwrap_or(0)
    }

    fn take_idle(&self, addr: &str) -> Option<Box<dyn PacketConn>> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.get_mut(addr).and_then(Vec::pop)
    }
}

#[async_trait]
impl ConnPool for TcpConnPool {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn acquire(&self, addr: &str) -> AppResult<Box<dyn PacketConn>> {
        if let Some(conn) = self.take_idle(addr) {
            return Ok(conn);
        }
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| AppError::connectivity(addr, anyhow!("timeout after {:?} connecting", self.config.connect_timeout())))?
            .map_err(|err| AppError::connectivity(addr, err))?;
        let _ = stream.set_nodelay(true);
        tracing::debug!(addr, "new storage node connection established");
        Ok(Box::new(TcpPacketConn::new(addr, stream)))
    }

    fn release(&self, addr: &str, conn: Box<dyn PacketConn>, discard: bool) {
        if discard {
            tracing::trace!(addr, "discarding storage node connection");
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let conns = idle.entry(addr.into()).or_default();
        if conns.len() < self.config.max_idle_per_host {
            conns.push(conn);
        }
    }
}

/// A packet connection over a TCP stream.
pub struct TcpPacketConn {
    addr: String,
    stream: TcpStream,
}

impl TcpPacketConn {
    pub fn new(addr: &str, stream: TcpStream) -> Self {
        Self { addr: addr.into(), stream }
    }
}

#[async_trait]
impl PacketConn for TcpPacketConn {
    async fn write_packet(&mut self, packet: &Packet, deadline: Duration) -> AppResult<()> {
        tokio::time::timeout(deadline, packet.write_to(&mut self.stream))
            .await
            .map_err(|_| AppError::connectivity(&self.addr, anyhow!("timeout after {:?} writing {}", deadline, packet.unique_log_id())))?
            .map_err(|err| AppError::connectivity(&self.addr, err))
    }

    async fn read_packet(&mut self, deadline: Duration) -> AppResult<Packet> {
        tokio::time::timeout(deadline, Packet::read_from(&mut self.stream))
            .await
            .map_err(|_| AppError::connectivity(&self.addr, anyhow!("timeout after {:?} reading reply", deadline)))?
            .map_err(|err| AppError::connectivity(&self.addr, err))
    }
}
