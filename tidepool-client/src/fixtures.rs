use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::client::{BlobClient, ClientConfig};
use crate::locator::{PartitionInfo, PartitionStatus, PartitionView};
use crate::pool::{ConnPool, PacketConn};
use tidepool_core::packet::{Packet, OP_MARK_DELETE, OP_READ, OP_WRITE};
use tidepool_core::{AppError, AppResult};

pub const CLUSTER: &str = "tidepool-test";
pub const VOLUME: &str = "vol-test";
pub const GIB: u64 = 1024 * 1024 * 1024;

/// The scripted behavior of a mock storage node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostBehavior {
    /// Serve every request correctly.
    Healthy,
    /// Refuse every connection.
    Unreachable,
    /// Serve reads with a payload mutated after its CRC was computed.
    CorruptReads,
    /// Answer every request with the given opcode.
    Reject(u8),
}

/// Per-host connection accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Calls to acquire, successful or not.
    pub attempts: u64,
    pub released: u64,
    pub discarded: u64,
    pub requests: u64,
}

#[derive(Default)]
struct MockState {
    behaviors: Mutex<HashMap<String, HostBehavior>>,
    stats: Mutex<HashMap<String, HostStats>>,
    /// Objects shared by every host, keyed by partition, file and object ID.
    objects: Mutex<HashMap<(u64, u64, u64), Vec<u8>>>,
    next_object_id: AtomicU64,
}

/// A connection pool backed by in-memory storage nodes.
#[derive(Clone, Default)]
pub struct MockPool {
    state: Arc<MockState>,
}

impl MockPool {
    pub fn set_behavior(&self, addr: &str, behavior: HostBehavior) {
        self.state.behaviors.lock().unwrap().insert(addr.into(), behavior);
    }

    pub fn put_object(&self, partition_id: u64, file_id: u64, object_id: u64, data: &[u8]) {
        self.state.objects.lock().unwrap().insert((partition_id, file_id, object_id), data.to_vec());
    }

    pub fn has_object(&self, partition_id: u64, file_id: u64, object_id: u64) -> bool {
        self.state.objects.lock().unwrap().contains_key(&(partition_id, file_id, object_id))
    }

    pub fn stats(&self, addr: &str) -> HostStats {
        self.state.stats.lock().unwrap().get(addr).copied().unwrap_or_default()
    }

    /// The total number of acquire calls across every host.
    pub fn total_attempts(&self) -> u64 {
        self.state.stats.lock().unwrap().values().map(|stats| stats.attempts).sum()
    }

    fn behavior(&self, addr: &str) -> HostBehavior {
        self.state.behaviors.lock().unwrap().get(addr).copied().unwrap_or(HostBehavior::Healthy)
    }

    fn with_stats(&self, addr: &str, f: impl FnOnce(&mut HostStats)) {
        f(self.state.stats.lock().unwrap().entry(addr.into()).or_default());
    }
}

#[async_trait]
impl ConnPool for MockPool {
    async fn acquire(&self, addr: &str) -> AppResult<Box<dyn PacketConn>> {
        self.with_stats(addr, |stats| stats.attempts += 1);
        let behavior = self.behavior(addr);
        if behavior == HostBehavior::Unreachable {
            return Err(AppError::connectivity(addr, anyhow!("connection refused")));
        }
        Ok(Box::new(MockConn {
            pool: self.clone(),
            addr: addr.into(),
            behavior,
            reply: None,
        }))
    }

    fn release(&self, addr: &str, _conn: Box<dyn PacketConn>, discard: bool) {
        self.with_stats(addr, |stats| if discard { stats.discarded += 1 } else { stats.released += 1 });
    }
}

struct MockConn {
    pool: MockPool,
    addr: String,
    behavior: HostBehavior,
    reply: Option<Packet>,
}

impl MockConn {
    fn serve(&self, request: &Packet) -> Packet {
        if let HostBehavior::Reject(opcode) = self.behavior {
            return Packet::new_reply(request).with_opcode(opcode).with_data(b"scripted failure".to_vec());
        }
        let state = &self.pool.state;
        match request.opcode {
            OP_WRITE => {
                let object_id = state.next_object_id.fetch_add(1, Ordering::Relaxed) + 1;
                state
                    .objects
                    .lock()
                    .unwrap()
                    .insert((request.partition_id, 1, object_id), request.payload().to_vec());
                let mut reply = Packet::new_reply(request);
                reply.file_id = 1;
                reply.object_id = object_id;
                reply.size = request.size;
                reply.crc = request.payload_crc();
                reply
            }
            OP_READ => {
                let data = state
                    .objects
                    .lock()
                    .unwrap()
                    .get(&(request.partition_id, request.file_id, request.object_id))
                    .cloned()
                    .unwrap_or_default();
                let mut reply = Packet::new_reply(request).with_data(data);
                if self.behavior == HostBehavior::CorruptReads {
                    if let Some(byte) = reply.data.first_mut() {
                        *byte ^= 0xFF;
                    }
                }
                reply
            }
            OP_MARK_DELETE => {
                state
                    .objects
                    .lock()
                    .unwrap()
                    .remove(&(request.partition_id, request.file_id, request.object_id));
                Packet::new_reply(request)
            }
            _ => Packet::new_reply(request).with_opcode(tidepool_core::packet::OP_ERR),
        }
    }
}

#[async_trait]
impl PacketConn for MockConn {
    async fn write_packet(&mut self, packet: &Packet, _deadline: Duration) -> AppResult<()> {
        self.pool.with_stats(&self.addr, |stats| stats.requests += 1);
        self.reply = Some(self.serve(packet));
        Ok(())
    }

    async fn read_packet(&mut self, _deadline: Duration) -> AppResult<Packet> {
        self.reply
            .take()
            .ok_or_else(|| AppError::connectivity(&self.addr, anyhow!("no request in flight")))
    }
}

/// Build read-write partition metadata with the given capacity.
pub fn partition(partition_id: u64, hosts: &[&str], total: u64, used: u64) -> PartitionInfo {
    PartitionInfo {
        partition_id,
        hosts: hosts.iter().map(|host| host.to_string()).collect(),
        status: PartitionStatus::ReadWrite,
        total,
        used,
    }
}

/// Build a client over a mock pool and a view of the given partitions.
pub fn setup_client(partitions: Vec<PartitionInfo>, config: ClientConfig) -> anyhow::Result<(BlobClient, MockPool, Arc<PartitionView>)> {
    let pool = MockPool::default();
    let view = Arc::new(PartitionView::new(Some(11)));
    view.update(partitions);
    let client = BlobClient::new(CLUSTER, VOLUME, Arc::new(pool.clone()), view.clone(), config)?;
    Ok((client, pool, view))
}
