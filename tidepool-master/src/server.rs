//! The master's HTTP API.

mod prom;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Extension, Json, Query};
use axum::routing::{get, post};
use axum::{AddExtensionLayer, Router};
use futures::prelude::*;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AppError, AppErrorExt, HttpResult};
use crate::fleet::{Registry, StorageNodeView};
use crate::get_metrics_recorder;
use tidepool_core::admin::AdminTask;
use tidepool_core::AppResult;

/// The maximum number of tasks handed out by a single task poll.
const MAX_TASKS_PER_POLL: usize = 32;

/// Spawn the HTTP server, which also serves Prometheus metrics.
pub fn spawn_http_server(config: &Config, registry: Arc<Registry>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    let state = get_metrics_recorder(config).handle();
    let app = Router::new()
        .route("/dataNode/add", get(add_node))
        .route("/dataNode/get", get(get_node))
        .route("/dataNode/response", post(heartbeat_response))
        .route("/dataNode/badPartitions", get(bad_partitions))
        .route("/dataNode/tasks", get(poll_tasks))
        .route("/dataNode/remove", get(remove_node))
        .route("/dataNode/allocate", get(allocate_node))
        .route("/metrics", get(prom::prometheus_scrape))
        .layer(AddExtensionLayer::new(registry))
        .layer(AddExtensionLayer::new(state));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.http_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!("HTTP server is listening at 0.0.0.0:{}", config.http_port);
    tokio::spawn(server.map_err(anyhow::Error::from))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddrParams {
    pub addr: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AllocateParams {
    /// A comma separated list of node IDs which must not be returned.
    #[serde(default)]
    pub exclude: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BadPartitionsParams {
    pub addr: String,
    pub disk: String,
}

/// Register a storage node, returning its ID.
#[tracing::instrument(level = "debug", skip(registry))]
pub(crate) async fn add_node(Extension(registry): Extension<Arc<Registry>>, Query(params): Query<AddrParams>) -> HttpResult<Json<u64>> {
    let node = registry.register(&params.addr).map_err(AppErrorExt::into_http)?;
    Ok(Json(node.id()))
}

/// Get a view of a storage node.
#[tracing::instrument(level = "debug", skip(registry))]
pub(crate) async fn get_node(Extension(registry): Extension<Arc<Registry>>, Query(params): Query<AddrParams>) -> HttpResult<Json<StorageNodeView>> {
    let node = registry
        .get_by_addr(&params.addr)
        .ok_or_else(|| AppError::ResourceNotFound(format!("storage node {}", params.addr)).into_http())?;
    Ok(Json(node.view()))
}

/// Ingest the response of a heartbeat task.
#[tracing::instrument(level = "debug", skip(registry, task), fields(task = %task.id, addr = %task.operator_addr))]
pub(crate) async fn heartbeat_response(Extension(registry): Extension<Arc<Registry>>, Json(task): Json<AdminTask>) -> HttpResult<Json<u64>> {
    let resp = task
        .response
        .as_ref()
        .ok_or_else(|| AppError::InvalidInput(format!("admin task {} carries no response", task.id)).into_http())?;
    let node = registry.ingest_heartbeat(&task.operator_addr, resp).map_err(AppErrorExt::into_http)?;
    Ok(Json(node.id()))
}

/// Get the IDs of all partitions a node reported as bad on the given disk.
#[tracing::instrument(level = "debug", skip(registry))]
pub(crate) async fn bad_partitions(Extension(registry): Extension<Arc<Registry>>, Query(params): Query<BadPartitionsParams>) -> HttpResult<Json<Vec<u64>>> {
    let node = registry
        .get_by_addr(&params.addr)
        .ok_or_else(|| AppError::ResourceNotFound(format!("storage node {}", params.addr)).into_http())?;
    Ok(Json(node.bad_partition_ids(&params.disk)))
}

/// Hand out the tasks queued for a storage node.
#[tracing::instrument(level = "debug", skip(registry))]
pub(crate) async fn poll_tasks(Extension(registry): Extension<Arc<Registry>>, Query(params): Query<AddrParams>) -> HttpResult<Json<Vec<AdminTask>>> {
    let node = registry
        .get_by_addr(&params.addr)
        .ok_or_else(|| AppError::ResourceNotFound(format!("storage node {}", params.addr)).into_http())?;
    Ok(Json(node.sender().drain(MAX_TASKS_PER_POLL)))
}

/// Remove a storage node from the fleet, returning its ID.
#[tracing::instrument(level = "debug", skip(registry))]
pub(crate) async fn remove_node(Extension(registry): Extension<Arc<Registry>>, Query(params): Query<AddrParams>) -> HttpResult<Json<u64>> {
    let node = registry
        .remove(&params.addr)
        .ok_or_else(|| AppError::ResourceNotFound(format!("storage node {}", params.addr)).into_http())?;
    Ok(Json(node.id()))
}

/// Select the storage node which should host the next write, for partition placement.
#[tracing::instrument(level = "debug", skip(registry))]
pub(crate) async fn allocate_node(Extension(registry): Extension<Arc<Registry>>, Query(params): Query<AllocateParams>) -> HttpResult<Json<StorageNodeView>> {
    let exclude = parse_id_list(&params.exclude).map_err(AppErrorExt::into_http)?;
    let node = registry.select_node_for_write(&exclude).map_err(AppErrorExt::into_http)?;
    Ok(Json(node.view()))
}

fn parse_id_list(list: &str) -> AppResult<HashSet<u64>> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse().map_err(|_| AppError::InvalidInput(format!("invalid node id {:?}", id))))
        .collect()
}
