use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::node::StorageNode;
use crate::fixtures;
use tidepool_core::admin::PartitionReport;
use tidepool_core::carry::CarryNode;
use tidepool_core::packet::OP_DATA_NODE_HEARTBEAT;

fn new_node() -> StorageNode {
    StorageNode::new(1, "10.0.0.1:17310", &mut StdRng::seed_from_u64(1))
}

#[test]
fn new_node_starts_inactive_with_nominal_total() -> Result<()> {
    let node = new_node();
    let view = node.view();

    assert!(!view.is_active, "expected new node to be inactive");
    assert!(view.total == 1, "expected new node total to be 1, got {}", view.total);
    assert!(view.carry >= 0.0 && view.carry < 1.0, "expected initial carry in [0, 1), got {}", view.carry);
    assert!(!node.is_write_able(0), "expected new node to not be write-able");

    Ok(())
}

#[test]
fn update_metrics_marks_active_and_recomputes_ratio() -> Result<()> {
    let node = new_node();
    node.update_metrics(&fixtures::heartbeat(100, 25, 60));
    let view = node.view();

    assert!(view.is_active, "expected node to be active after a metric update");
    assert!(view.used == 25 && view.total == 100, "unexpected capacity in view {:?}", view);
    assert!(view.available == 60, "expected reported available to be kept as is, got {}", view.available);
    assert!((view.ratio - 0.25).abs() < f64::EPSILON, "expected usage ratio 0.25, got {}", view.ratio);
    assert!(view.report_time > 0, "expected report time to be set, got {}", view.report_time);

    Ok(())
}

#[test]
fn zero_total_yields_zero_ratio() -> Result<()> {
    let node = new_node();
    node.update_metrics(&fixtures::heartbeat(0, 0, 0));

    assert!(node.view().ratio == 0.0, "expected usage ratio 0.0 for zero total, got {}", node.view().ratio);
    Ok(())
}

#[test]
fn check_liveness_marks_stale_node_inactive() -> Result<()> {
    let node = new_node();
    let reported_at = Instant::now();
    let timeout = Duration::from_secs(30);
    node.update_metrics_at(&fixtures::heartbeat(100, 0, 100), reported_at);

    let changed = node.check_liveness_at(reported_at + Duration::from_secs(10), timeout);
    assert!(!changed && node.is_active(), "expected node within the timeout to stay active");

    let changed = node.check_liveness_at(reported_at + Duration::from_secs(31), timeout);
    assert!(changed, "expected liveness check to report the transition");
    assert!(!node.is_active(), "expected stale node to be inactive");

    let changed = node.check_liveness_at(reported_at + Duration::from_secs(40), timeout);
    assert!(!changed, "expected no transition for an already inactive node");

    node.update_metrics_at(&fixtures::heartbeat(100, 0, 100), reported_at + Duration::from_secs(41));
    assert!(node.is_active(), "expected fresh metric update to mark node active again");

    Ok(())
}

#[test]
fn write_able_requires_activity_and_available_space() -> Result<()> {
    let node = new_node();
    node.update_metrics(&fixtures::heartbeat(1000, 100, 500));

    assert!(node.is_write_able(499), "expected node with 500 available to be write-able above 499");
    assert!(!node.is_write_able(500), "expected available space to be strictly greater than the minimum");

    let stale = Instant::now().checked_sub(Duration::from_secs(60)).context("clock too close to boot")?;
    node.update_metrics_at(&fixtures::heartbeat(1000, 100, 500), stale);
    node.check_liveness(Duration::from_secs(30));
    assert!(!node.is_write_able(0), "expected inactive node to not be write-able");

    Ok(())
}

#[test]
fn bad_partition_ids_filters_by_disk_in_order() -> Result<()> {
    let node = new_node();
    let mut resp = fixtures::heartbeat(100, 0, 100);
    resp.partition_reports = vec![
        PartitionReport { partition_id: 9, disk_path: "/disk1".into() },
        PartitionReport { partition_id: 3, disk_path: "/disk2".into() },
        PartitionReport { partition_id: 4, disk_path: "/disk1".into() },
    ];
    node.update_metrics(&resp);

    let ids = node.bad_partition_ids("/disk1");
    assert!(ids == vec![9, 4], "expected bad partitions [9, 4] on /disk1, got {:?}", ids);
    let ids = node.bad_partition_ids("/disk3");
    assert!(ids.is_empty(), "expected no bad partitions on /disk3, got {:?}", ids);

    node.update_metrics(&fixtures::heartbeat(100, 0, 100));
    let ids = node.bad_partition_ids("/disk1");
    assert!(ids.is_empty(), "expected reports to be replaced by the next heartbeat, got {:?}", ids);

    Ok(())
}

#[test]
fn selection_gives_back_exactly_one_carry() -> Result<()> {
    let node = new_node();
    node.update_metrics(&fixtures::heartbeat(100, 50, 50));
    node.set_carry(1.75);

    let state = node.try_select().context("expected ready node to be selected")?;
    assert!((state.carry - 0.75).abs() < 1e-9, "expected carry 0.75 after selection, got {}", state.carry);
    assert!(state.select_count == 1, "expected select count 1, got {}", state.select_count);
    assert!(node.try_select().is_none(), "expected node below the threshold to not be selected");

    let added = node.accrue_carry();
    assert!((added - 0.5).abs() < 1e-9, "expected accrual of 0.5 at half usage, got {}", added);

    Ok(())
}

#[test]
fn heartbeat_task_is_addressed_to_node() -> Result<()> {
    let node = new_node();
    let task = node.create_heartbeat_task("10.0.0.100:17010");

    assert!(task.op_code == OP_DATA_NODE_HEARTBEAT, "unexpected opcode {:#x}", task.op_code);
    assert!(task.operator_addr == node.addr(), "expected task addressed to {}, got {}", node.addr(), task.operator_addr);
    assert!(task.request.master_addr == "10.0.0.100:17010", "unexpected master addr {}", task.request.master_addr);
    assert!(task.request.curr_time > 0, "expected current time to be set");
    assert!(task.response.is_none(), "expected no response on a fresh task");

    Ok(())
}

#[test]
fn clean_closes_the_sender() -> Result<()> {
    let node = new_node();
    assert!(node.sender().put_task(node.create_heartbeat_task("m")), "expected task to be queued before clean");

    node.clean();
    assert!(!node.sender().put_task(node.create_heartbeat_task("m")), "expected task to be dropped after clean");
    let drained = node.sender().drain(10);
    assert!(drained.len() == 1, "expected the task queued before clean to remain drainable, got {}", drained.len());

    Ok(())
}

#[test]
fn view_serializes_with_wire_names() -> Result<()> {
    let node = new_node();
    node.update_metrics(&fixtures::heartbeat(100, 10, 90));
    let json = serde_json::to_value(node.view())?;

    assert!(json["ID"] == 1, "expected ID field in view json, got {}", json);
    assert!(json["Addr"] == "10.0.0.1:17310", "expected Addr field in view json, got {}", json);
    assert!(json["IsActive"] == true, "expected IsActive field in view json, got {}", json);

    Ok(())
}
