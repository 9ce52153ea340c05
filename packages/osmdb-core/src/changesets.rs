//! Changeset index: the elements written under each changeset.
//!
//! Rows are `<hex changesetId>!<elementId> -> version token` of the latest revision seen. The
//! changeset segment is hex so it never contains the separator. A changeset
//! records history, so rows are never retired when an element moves to a later changeset.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::IndexerConfig;
use crate::error::{Error, Result};
use crate::ids::Id;
use crate::indexer::{self, Indexer, Processor};
use crate::kv::{KeyRange, KvOp, KvStore, SubKv};
use crate::log::{Entry, Log};
use crate::version::Version;

pub struct ChangesetProcessor;

fn row_prefix(changeset: &str) -> String {
    format!("{}!", hex::encode(changeset))
}

#[async_trait]
impl Processor for ChangesetProcessor {
    fn name(&self) -> &'static str {
        "changesets"
    }

    async fn process(&self, entry: &Entry, ops: &mut Vec<KvOp>) -> Result<()> {
        if !entry.value.kind.is_feature() {
            return Ok(());
        }
        match entry.value.changeset.as_deref() {
            Some(changeset) if !changeset.is_empty() => {
                ops.push(KvOp::put(
                    format!("{}{}", row_prefix(changeset), entry.id()),
                    entry.version().to_token(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

pub struct ChangesetIndex<L> {
    indexer: Arc<Indexer<L, ChangesetProcessor>>,
}

impl<L: Log + 'static> ChangesetIndex<L> {
    pub fn new(log: Arc<L>, kv: Arc<dyn KvStore>, config: &IndexerConfig) -> Self {
        Self {
            indexer: Arc::new(Indexer::new(
                log,
                ChangesetProcessor,
                SubKv::new(kv, "changesets"),
                config.batch_size,
            )),
        }
    }

    pub fn indexer(&self) -> &Indexer<L, ChangesetProcessor> {
        &self.indexer
    }

    pub async fn ready(&self) -> Result<()> {
        self.indexer.ready().await
    }

    /// Keep this index caught up from a background task.
    pub fn spawn(&self) -> JoinHandle<()> {
        indexer::spawn(Arc::clone(&self.indexer))
    }

    /// `(element id, latest version written under the changeset)`, sorted by id.
    pub async fn get_element_versions(&self, changeset: &str) -> Result<Vec<(Id, Version)>> {
        self.ready().await?;
        let prefix = row_prefix(changeset);
        let rows = self.indexer.data().scan(KeyRange::prefix(&prefix)).await?;
        rows.into_iter()
            .map(|(key, value)| {
                let corrupted = || Error::IndexCorrupted(format!("changeset row {key:?}"));
                let id = key.strip_prefix(prefix.as_str()).ok_or_else(corrupted)?;
                let version = std::str::from_utf8(&value)
                    .ok()
                    .and_then(|token| token.parse::<Version>().ok())
                    .ok_or_else(corrupted)?;
                Ok((Id::new(id), version))
            })
            .collect()
    }

    /// Ids of every element written under `changeset`, sorted.
    pub async fn get_elements(&self, changeset: &str) -> Result<Vec<Id>> {
        Ok(self
            .get_element_versions(changeset)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }
}
