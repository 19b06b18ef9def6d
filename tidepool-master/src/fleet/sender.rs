use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use tidepool_core::admin::AdminTask;

use super::METRIC_TASKS_DROPPED;

/// The default number of tasks which may be queued for a single node.
pub const DEFAULT_TASK_QUEUE_SIZE: usize = 64;

/// A queue of outbound administrative tasks for a single storage node.
///
/// The queue lives exactly as long as the node it belongs to. Delivery of the queued tasks is
/// the job of the task dispatch subsystem, which drains them with `drain`.
pub struct AdminTaskSender {
    target_addr: String,
    tx: mpsc::Sender<AdminTask>,
    rx: Mutex<mpsc::Receiver<AdminTask>>,
}

impl AdminTaskSender {
    /// Create a new instance for the node at `target_addr`.
    pub fn new(target_addr: &str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            target_addr: target_addr.into(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Queue a task for delivery, returning false if it was dropped.
    ///
    /// Tasks are dropped when the queue is full or the sender has exited. Heartbeat tasks are
    /// periodic, so a dropped task is replaced on the next round.
    pub fn put_task(&self, task: AdminTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(task)) => {
                tracing::warn!(addr = %self.target_addr, task = %task.id, "admin task queue is full, dropping task");
                metrics::increment_counter!(METRIC_TASKS_DROPPED);
                false
            }
            Err(TrySendError::Closed(task)) => {
                tracing::debug!(addr = %self.target_addr, task = %task.id, "admin task sender has exited, dropping task");
                false
            }
        }
    }

    /// Drain up to `max` queued tasks.
    pub fn drain(&self, max: usize) -> Vec<AdminTask> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tasks = Vec::new();
        while tasks.len() < max {
            match rx.try_recv() {
                Ok(task) => tasks.push(task),
                Err(_) => break,
            }
        }
        tasks
    }

    /// Stop accepting tasks. Tasks already queued may still be drained.
    pub fn exit(&self) {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).close();
        tracing::debug!(addr = %self.target_addr, "admin task sender has exited");
    }
}
