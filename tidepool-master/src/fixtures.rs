use tidepool_core::admin::HeartbeatResponse;

/// Build a heartbeat response with the given capacity and no partition reports.
pub fn heartbeat(total: u64, used: u64, available: u64) -> HeartbeatResponse {
    HeartbeatResponse {
        total,
        used,
        available,
        rack_name: "rack-a".into(),
        created_partition_cnt: 3,
        partition_reports: Vec::new(),
    }
}
