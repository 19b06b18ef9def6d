use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::fleet::{LivenessMonitor, Registry};
use crate::server::spawn_http_server;

/// The application object for when the Tidepool master is running as a server.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// The registry of all known storage nodes.
    registry: Arc<Registry>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the liveness monitor.
    liveness_handle: JoinHandle<Result<()>>,
    /// The join handle of the HTTP server.
    http_server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(Registry::new(config.clone()));

        let liveness_handle = LivenessMonitor::new(config.clone(), registry.clone(), shutdown_tx.subscribe()).spawn();
        let http_server = spawn_http_server(&config, registry.clone(), shutdown_tx.subscribe());

        Ok(Self {
            _config: config,
            registry,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            liveness_handle,
            http_server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("Tidepool master is shutting down");
        if let Err(err) = self.liveness_handle.await.context("error joining liveness monitor handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down liveness monitor");
        }
        if let Err(err) = self.http_server.await.context("error joining HTTP server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down HTTP server");
        }
        for node in self.registry.nodes() {
            node.clean();
        }

        tracing::debug!("Tidepool master shutdown complete");
        Ok(())
    }
}
