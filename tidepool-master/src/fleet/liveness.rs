use std::sync::Arc;

use anyhow::Result;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::BroadcastStream;

use super::registry::Registry;
use crate::config::Config;

/// A periodic task which checks the liveness of every node and queues heartbeat tasks.
pub struct LivenessMonitor {
    config: Arc<Config>,
    registry: Arc<Registry>,
    shutdown: BroadcastStream<()>,
}

impl LivenessMonitor {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, registry: Arc<Registry>, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            config,
            registry,
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.config.heartbeat_interval(), timeout = ?self.config.node_timeout(), "liveness monitor initialized");
        loop {
            tokio::select! {
                _ = ticker.tick() => { self.round(); }
                _ = self.shutdown.next() => break,
            }
        }

        tracing::debug!("liveness monitor shutdown");
        Ok(())
    }

    /// Run a single round of liveness checks and heartbeat task dispatch.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn round(&self) -> usize {
        let active = self.registry.check_liveness_all();
        for node in self.registry.nodes() {
            let task = node.create_heartbeat_task(&self.config.master_addr);
            node.sender().put_task(task);
        }
        active
    }
}
