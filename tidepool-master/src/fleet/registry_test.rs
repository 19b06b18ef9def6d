use std::collections::{HashMap, HashSet};

use anyhow::Result;

use super::registry::Registry;
use crate::config::Config;
use crate::fixtures;
use tidepool_core::ErrorKind;

const GIB: u64 = 1024 * 1024 * 1024;

#[test]
fn register_is_idempotent() -> Result<()> {
    let registry = Registry::new(Config::new_test());

    let first = registry.register("10.0.0.1:17310")?;
    let second = registry.register("10.0.0.1:17310")?;
    let other = registry.register("10.0.0.2:17310")?;

    assert!(first.id() == second.id(), "expected the same node for the same address, got {} and {}", first.id(), second.id());
    assert!(first.id() != other.id(), "expected distinct ids for distinct addresses");
    assert!(registry.nodes().len() == 2, "expected 2 registered nodes, got {}", registry.nodes().len());

    Ok(())
}

#[test]
fn register_rejects_empty_address() -> Result<()> {
    let registry = Registry::new(Config::new_test());
    let err = match registry.register("") {
        Ok(_) => anyhow::bail!("expected empty address to be rejected"),
        Err(err) => err,
    };
    assert!(err.kind() == ErrorKind::InvalidArgument, "expected invalid argument, got {:?}", err.kind());
    Ok(())
}

#[test]
fn ingest_heartbeat_registers_on_first_report() -> Result<()> {
    let registry = Registry::new(Config::new_test());

    let node = registry.ingest_heartbeat("10.0.0.1:17310", &fixtures::heartbeat(10 * GIB, 0, 10 * GIB))?;
    let again = registry.ingest_heartbeat("10.0.0.1:17310", &fixtures::heartbeat(10 * GIB, GIB, 9 * GIB))?;

    assert!(node.id() == again.id(), "expected repeated reports to update the same node");
    assert!(registry.nodes().len() == 1, "expected a single node, got {}", registry.nodes().len());
    let found = registry.get_by_addr("10.0.0.1:17310").map(|node| node.view());
    assert!(found.as_ref().map(|view| view.used) == Some(GIB), "expected latest report to be applied, got {:?}", found);

    Ok(())
}

#[test]
fn remove_drops_node_and_closes_sender() -> Result<()> {
    let registry = Registry::new(Config::new_test());
    let node = registry.register("10.0.0.1:17310")?;

    let removed = registry.remove("10.0.0.1:17310");
    assert!(removed.map(|node| node.id()) == Some(node.id()), "expected removed node to be returned");
    assert!(registry.get_by_addr("10.0.0.1:17310").is_none(), "expected node to be gone from the address index");
    assert!(registry.nodes().is_empty(), "expected node to be gone from the fleet");
    assert!(!node.sender().put_task(node.create_heartbeat_task("m")), "expected sender to be closed after removal");
    assert!(registry.remove("10.0.0.1:17310").is_none(), "expected second removal to be a no-op");

    Ok(())
}

#[test]
fn select_node_for_write_skips_ineligible_and_excluded() -> Result<()> {
    let registry = Registry::new(Config::new_test());
    let full = registry.ingest_heartbeat("10.0.0.1:17310", &fixtures::heartbeat(10 * GIB, 10 * GIB, 0))?;
    let idle = registry.register("10.0.0.2:17310")?;
    let good = registry.ingest_heartbeat("10.0.0.3:17310", &fixtures::heartbeat(10 * GIB, GIB, 9 * GIB))?;
    let other = registry.ingest_heartbeat("10.0.0.4:17310", &fixtures::heartbeat(10 * GIB, GIB, 9 * GIB))?;

    let exclude: HashSet<u64> = vec![other.id()].into_iter().collect();
    for _ in 0..50 {
        let selected = registry.select_node_for_write(&exclude)?;
        assert!(selected.id() == good.id(), "expected only {} to be selected, got {}", good.id(), selected.id());
    }
    assert!(full.view().select_count == 0, "expected full node to never be selected");
    assert!(idle.view().select_count == 0, "expected inactive node to never be selected");

    let exclude: HashSet<u64> = vec![good.id(), other.id()].into_iter().collect();
    let err = match registry.select_node_for_write(&exclude) {
        Ok(node) => anyhow::bail!("expected no node to be selectable, got {}", node.id()),
        Err(err) => err,
    };
    assert!(err.kind() == ErrorKind::CapacityExhausted, "expected capacity exhausted, got {:?}", err.kind());

    Ok(())
}

#[test]
fn select_node_for_write_favours_free_capacity() -> Result<()> {
    let registry = Registry::new(Config::new_test());
    let mostly_free = registry.ingest_heartbeat("10.0.0.1:17310", &fixtures::heartbeat(100 * GIB, 10 * GIB, 90 * GIB))?;
    let mostly_used = registry.ingest_heartbeat("10.0.0.2:17310", &fixtures::heartbeat(100 * GIB, 70 * GIB, 30 * GIB))?;

    let mut counts: HashMap<u64, u64> = HashMap::new();
    for _ in 0..10_000 {
        let node = registry.select_node_for_write(&HashSet::new())?;
        *counts.entry(node.id()).or_default() += 1;
    }

    let free_share = *counts.get(&mostly_free.id()).unwrap_or(&0) as f64 / 10_000.0;
    let used_share = *counts.get(&mostly_used.id()).unwrap_or(&0) as f64 / 10_000.0;
    // Free capacities are 0.9 and 0.3, so expected shares are 0.75 and 0.25.
    assert!((free_share - 0.75).abs() < 0.02, "expected share near 0.75 for the free node, got {}", free_share);
    assert!((used_share - 0.25).abs() < 0.02, "expected share near 0.25 for the used node, got {}", used_share);

    Ok(())
}
