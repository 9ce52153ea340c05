#![forbid(unsafe_code)]
//! Fixtures shared by the osmdb test suites.

use std::sync::Arc;

use futures::{Stream, TryStreamExt};
use osmdb_core::{BatchOp, Element, Id, MemoryKv, MemoryLog, Osm, OsmConfig, Result, Revision};

pub mod kv_conformance;

/// In-memory database with default configuration.
pub fn create_db() -> Osm<MemoryLog> {
    create_db_with(OsmConfig::default())
}

pub fn create_db_with(config: OsmConfig) -> Osm<MemoryLog> {
    Osm::new(Arc::new(MemoryLog::new()), Arc::new(MemoryKv::new()), config)
}

/// Write every fixture under its given id in one batch. Returns the stored revisions in order.
pub async fn setup<L>(osm: &Osm<L>, fixtures: Vec<(&str, Element)>) -> Result<Vec<Revision>>
where
    L: osmdb_core::Log + 'static,
{
    let ops = fixtures
        .into_iter()
        .map(|(id, element)| BatchOp::put(Some(Id::from(id)), element))
        .collect();
    osm.batch(ops).await
}

/// Sorted ids of `revisions`, duplicates kept.
pub fn ids_of(revisions: &[Revision]) -> Vec<String> {
    let mut ids: Vec<String> = revisions.iter().map(|r| r.id.to_string()).collect();
    ids.sort();
    ids
}

/// Drain a query stream into sorted ids.
pub async fn collect_ids<S>(stream: S) -> Result<Vec<String>>
where
    S: Stream<Item = Result<Revision>>,
{
    let revisions: Vec<Revision> = stream.try_collect().await?;
    Ok(ids_of(&revisions))
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
