//! Point index: `(lat, lon) -> version` for the live heads of every node.
//!
//! Rows are laid out as a grid point store. The key of a point is
//! `<row>!<col>!<lat bits>!<lon bits>!<version>` with fixed-width hex cells, so one range scan per
//! grid row covers a box's column span. Coordinates are stored as exact `f64` bit patterns and
//! re-checked against the box after the scan.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::task::JoinHandle;

use crate::bbox::BoundingBox;
use crate::config::{IndexerConfig, SpatialConfig};
use crate::element::{Element, ElementKind};
use crate::error::{Error, Result};
use crate::indexer::{self, Indexer, Processor};
use crate::kv::{KeyRange, KvOp, KvStore, SubKv};
use crate::log::{previous_revisions, Entry, Log};
use crate::version::Version;

/// Concurrent row scans per range query.
const ROW_SCAN_CONCURRENCY: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Grid {
    cell: f64,
    max_row: u32,
    max_col: u32,
}

impl Grid {
    pub fn new(config: &SpatialConfig) -> Self {
        let zoom = config.zoom_level.clamp(1, 24);
        let cols = 1u32 << zoom;
        let cell = 360.0 / f64::from(cols);
        let rows = ((180.0 / cell).ceil() as u32).max(1);
        Self {
            cell,
            max_row: rows - 1,
            max_col: cols - 1,
        }
    }

    fn row(&self, lat: f64) -> u32 {
        (((lat.clamp(-90.0, 90.0) + 90.0) / self.cell).floor() as u32).min(self.max_row)
    }

    fn col(&self, lon: f64) -> u32 {
        (((lon.clamp(-180.0, 180.0) + 180.0) / self.cell).floor() as u32).min(self.max_col)
    }

    fn key(&self, lat: f64, lon: f64, version: &Version) -> String {
        format!(
            "{:08x}!{:08x}!{:016x}!{:016x}!{}",
            self.row(lat),
            self.col(lon),
            lat.to_bits(),
            lon.to_bits(),
            version
        )
    }
}

/// Decoded `(lat, lon, version)` of one index row.
fn parse_row(key: &str, value: &[u8]) -> Result<(f64, f64, Version)> {
    let corrupted = || Error::IndexCorrupted(format!("spatial row {key:?}"));
    let mut parts = key.split('!');
    let (_row, _col) = (parts.next(), parts.next());
    let lat = parts
        .next()
        .and_then(|p| u64::from_str_radix(p, 16).ok())
        .map(f64::from_bits)
        .ok_or_else(corrupted)?;
    let lon = parts
        .next()
        .and_then(|p| u64::from_str_radix(p, 16).ok())
        .map(f64::from_bits)
        .ok_or_else(corrupted)?;
    let version = Version::from_bytes(value).map_err(|_| corrupted())?;
    Ok((lat, lon, version))
}

fn live_point(element: &Element) -> Option<(f64, f64)> {
    if element.kind != ElementKind::Node || element.deleted {
        return None;
    }
    element.point()
}

pub struct SpatialProcessor<L> {
    log: Arc<L>,
    grid: Grid,
}

#[async_trait]
impl<L: Log + 'static> Processor for SpatialProcessor<L> {
    fn name(&self) -> &'static str {
        "spatial"
    }

    async fn process(&self, entry: &Entry, ops: &mut Vec<KvOp>) -> Result<()> {
        let version = entry.version();
        if let Some((lat, lon)) = live_point(&entry.value) {
            ops.push(KvOp::put(self.grid.key(lat, lon, &version), version.to_bytes()));
        }

        // Any kind may replace a node, including a changeset.
        for prev in previous_revisions(self.log.as_ref(), entry).await? {
            if let Some((lat, lon)) = live_point(&prev.value) {
                let old = prev.version();
                tracing::trace!(id = %entry.id(), version = %old, "retiring point");
                ops.push(KvOp::del(self.grid.key(lat, lon, &old)));
            }
        }
        Ok(())
    }
}

pub struct SpatialIndex<L> {
    indexer: Arc<Indexer<L, SpatialProcessor<L>>>,
    grid: Grid,
}

impl<L: Log + 'static> SpatialIndex<L> {
    pub fn new(
        log: Arc<L>,
        kv: Arc<dyn KvStore>,
        spatial: &SpatialConfig,
        indexer: &IndexerConfig,
    ) -> Self {
        let grid = Grid::new(spatial);
        let processor = SpatialProcessor {
            log: Arc::clone(&log),
            grid,
        };
        Self {
            indexer: Arc::new(Indexer::new(
                log,
                processor,
                SubKv::new(kv, "geo"),
                indexer.batch_size,
            )),
            grid,
        }
    }

    pub fn indexer(&self) -> &Indexer<L, SpatialProcessor<L>> {
        &self.indexer
    }

    pub async fn ready(&self) -> Result<()> {
        self.indexer.ready().await
    }

    /// Keep this index caught up from a background task.
    pub fn spawn(&self) -> JoinHandle<()> {
        indexer::spawn(Arc::clone(&self.indexer))
    }

    /// Versions of every live node head inside `bbox`, after catching up with the log.
    pub async fn range(&self, bbox: &BoundingBox) -> Result<Vec<Version>> {
        self.ready().await?;
        let (min_col, max_col) = (self.grid.col(bbox.min_lon), self.grid.col(bbox.max_lon));
        let rows = self.grid.row(bbox.min_lat)..=self.grid.row(bbox.max_lat);
        let data = self.indexer.data();

        let scans: Vec<Vec<(String, Vec<u8>)>> = stream::iter(rows)
            .map(|row| {
                let range = KeyRange::new(
                    format!("{row:08x}!{min_col:08x}!"),
                    format!("{row:08x}!{:08x}!", max_col + 1),
                );
                data.scan(range)
            })
            .buffered(ROW_SCAN_CONCURRENCY)
            .try_collect()
            .await?;

        let mut versions = Vec::new();
        for (key, value) in scans.iter().flatten() {
            let (lat, lon, version) = parse_row(key, value)?;
            if bbox.contains(lat, lon) {
                versions.push(version);
            }
        }
        Ok(versions)
    }
}
