//! Administrative task models exchanged between the master and storage nodes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::packet::OP_DATA_NODE_HEARTBEAT;

/// A problem report for a single partition hosted on a storage node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartitionReport {
    #[serde(rename = "PartitionID")]
    pub partition_id: u64,
    pub disk_path: String,
}

/// The request body of a data node heartbeat task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatRequest {
    /// The master's clock when the task was created, unix seconds.
    pub curr_time: i64,
    /// The address of the master to report back to.
    pub master_addr: String,
}

/// The metrics a storage node reports in response to a heartbeat task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatResponse {
    pub total: u64,
    pub used: u64,
    /// Space the node is willing to allocate, which may be less than `total - used`.
    pub available: u64,
    pub rack_name: String,
    pub created_partition_cnt: u32,
    #[serde(default)]
    pub partition_reports: Vec<PartitionReport>,
}

/// A task addressed to a single storage node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdminTask {
    #[serde(rename = "ID")]
    pub id: String,
    pub op_code: u8,
    /// The address of the node this task is addressed to.
    pub operator_addr: String,
    /// Task creation time, unix seconds.
    pub create_time: i64,
    pub request: HeartbeatRequest,
    /// Populated by the node when the task is answered.
    #[serde(default)]
    pub response: Option<HeartbeatResponse>,
}

impl AdminTask {
    /// Create a new data node heartbeat task addressed to `operator_addr`.
    pub fn new_heartbeat(operator_addr: &str, master_addr: &str) -> Self {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Self {
            id: format!("{}_{}", operator_addr, Uuid::new_v4()),
            op_code: OP_DATA_NODE_HEARTBEAT,
            operator_addr: operator_addr.into(),
            create_time: now,
            request: HeartbeatRequest {
                curr_time: now,
                master_addr: master_addr.into(),
            },
            response: None,
        }
    }
}
