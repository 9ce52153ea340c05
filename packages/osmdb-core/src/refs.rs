//! Reference index: which ways and relations name a given element.
//!
//! Rows are `<targetId>!<referrerVersion> -> {id, type}` of the referrer. Facts contributed by a
//! revision are retired once a later revision of the same referrer supersedes it; tombstoned
//! referrers contribute nothing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::IndexerConfig;
use crate::element::{Element, ElementKind};
use crate::error::{Error, Result};
use crate::ids::Id;
use crate::indexer::{self, Indexer, Processor};
use crate::kv::{KeyRange, KvOp, KvStore, SubKv};
use crate::log::{previous_revisions, Entry, Log};
use crate::version::Version;

/// One `(referring element, version)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Referrer {
    pub id: Id,
    pub version: Version,
    #[serde(rename = "type")]
    pub kind: ElementKind,
}

#[derive(Serialize, Deserialize)]
struct RowValue {
    id: Id,
    #[serde(rename = "type")]
    kind: ElementKind,
}

fn row_key(target: &Id, version: &Version) -> String {
    format!("{target}!{version}")
}

/// Targets this revision contributes rows for.
fn targets(element: &Element) -> Vec<&Id> {
    if element.deleted {
        return Vec::new();
    }
    let mut ids = element.referenced_ids();
    ids.sort();
    ids.dedup();
    ids
}

pub struct RefsProcessor<L> {
    log: Arc<L>,
}

#[async_trait]
impl<L: Log + 'static> Processor for RefsProcessor<L> {
    fn name(&self) -> &'static str {
        "refs"
    }

    async fn process(&self, entry: &Entry, ops: &mut Vec<KvOp>) -> Result<()> {
        let id = entry.id();
        let version = entry.version();

        for prev in previous_revisions(self.log.as_ref(), entry).await? {
            let old = prev.version();
            for target in targets(&prev.value) {
                ops.push(KvOp::del(row_key(target, &old)));
            }
        }

        let new_targets = targets(&entry.value);
        if new_targets.is_empty() {
            return Ok(());
        }
        let value = serde_json::to_vec(&RowValue {
            id: id.clone(),
            kind: entry.value.kind,
        })
        .map_err(|e| Error::Storage(e.to_string()))?;
        for target in new_targets {
            ops.push(KvOp::put(row_key(target, &version), value.clone()));
        }
        Ok(())
    }
}

pub struct RefsIndex<L> {
    indexer: Arc<Indexer<L, RefsProcessor<L>>>,
}

impl<L: Log + 'static> RefsIndex<L> {
    pub fn new(log: Arc<L>, kv: Arc<dyn KvStore>, config: &IndexerConfig) -> Self {
        let processor = RefsProcessor {
            log: Arc::clone(&log),
        };
        Self {
            indexer: Arc::new(Indexer::new(
                log,
                processor,
                SubKv::new(kv, "refs"),
                config.batch_size,
            )),
        }
    }

    pub fn indexer(&self) -> &Indexer<L, RefsProcessor<L>> {
        &self.indexer
    }

    pub async fn ready(&self) -> Result<()> {
        self.indexer.ready().await
    }

    /// Keep this index caught up from a background task.
    pub fn spawn(&self) -> JoinHandle<()> {
        indexer::spawn(Arc::clone(&self.indexer))
    }

    /// Every way or relation revision that currently names `id`, after catching up with the log.
    pub async fn get_referrers(&self, id: &Id) -> Result<Vec<Referrer>> {
        self.ready().await?;
        let prefix = format!("{id}!");
        let rows = self.indexer.data().scan(KeyRange::prefix(&prefix)).await?;
        let mut referrers = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let corrupted = || Error::IndexCorrupted(format!("refs row {key:?}"));
            let (target, token) = key.rsplit_once('!').ok_or_else(corrupted)?;
            // Ids that merely start with `<id>!` share the prefix.
            if target != id.as_str() {
                continue;
            }
            let version = token.parse::<Version>().map_err(|_| corrupted())?;
            let row: RowValue = serde_json::from_slice(&value).map_err(|_| corrupted())?;
            referrers.push(Referrer {
                id: row.id,
                version,
                kind: row.kind,
            });
        }
        Ok(referrers)
    }
}
