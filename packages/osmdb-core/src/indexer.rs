//! Incremental index driver.
//!
//! An [`Indexer`] consumes the log in global append order and hands each entry to its
//! [`Processor`], which turns it into key/value ops. The ops of every processed entry are
//! committed in the same atomic batch as the advanced checkpoint, so a crash or a failing entry
//! never leaves the checkpoint past an entry whose ops were not written.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::kv::{KvOp, KvStore, SubKv};
use crate::log::{Entry, Log};

const CHECKPOINT_KEY: &str = "checkpoint";
const DATA: &str = "data";

/// Turns one log entry into index writes.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Push the ops for `entry` onto `ops`. Entries the index does not care about push nothing.
    async fn process(&self, entry: &Entry, ops: &mut Vec<KvOp>) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Checkpoint {
    position: u64,
}

#[derive(Default)]
struct DriverState {
    halted: Option<String>,
}

pub struct Indexer<L, P> {
    log: Arc<L>,
    processor: P,
    namespace: SubKv,
    data: SubKv,
    batch_size: usize,
    state: Mutex<DriverState>,
}

impl<L, P> Indexer<L, P>
where
    L: Log + 'static,
    P: Processor,
{
    /// `namespace` is owned exclusively by this indexer.
    pub fn new(log: Arc<L>, processor: P, namespace: SubKv, batch_size: usize) -> Self {
        let data = namespace.sub(DATA);
        Self {
            log,
            processor,
            namespace,
            data,
            batch_size: batch_size.max(1),
            state: Mutex::new(DriverState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.processor.name()
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Read-only view of the index rows.
    pub fn data(&self) -> &SubKv {
        &self.data
    }

    /// Log position up to which entries have been applied.
    pub async fn checkpoint(&self) -> Result<u64> {
        match self.namespace.get(CHECKPOINT_KEY).await? {
            None => Ok(0),
            Some(raw) => serde_json::from_slice::<Checkpoint>(&raw)
                .map(|c| c.position)
                .map_err(|e| {
                    Error::IndexCorrupted(format!("{} checkpoint: {e}", self.name()))
                }),
        }
    }

    /// Catch up with every entry the log held when this call started.
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.halted {
            return Err(Error::IndexUnavailable(format!(
                "{} index halted: {reason}",
                self.name()
            )));
        }

        let target = self.log.position()?;
        let mut position = self.checkpoint().await?;
        if position >= target {
            return Ok(());
        }
        tracing::debug!(index = self.name(), from = position, to = target, "catching up");

        while position < target {
            let limit = self.batch_size.min((target - position) as usize);
            let page = self.log.entries(position, limit).await?;
            if page.is_empty() {
                break;
            }

            let mut ops = Vec::new();
            let mut failure = None;
            let mut applied = position;
            for entry in &page {
                let mut entry_ops = Vec::new();
                if let Err(err) = self.processor.process(entry, &mut entry_ops).await {
                    failure = Some(err);
                    break;
                }
                ops.extend(entry_ops.into_iter().map(into_data_op));
                applied += 1;
            }

            if applied > position {
                ops.push(checkpoint_op(applied)?);
                self.namespace.batch(ops).await?;
                position = applied;
            }

            if let Some(err) = failure {
                tracing::warn!(
                    index = self.name(),
                    position,
                    error = %err,
                    "indexing halted"
                );
                state.halted = Some(err.to_string());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Clear a halt so the next [`Indexer::ready`] retries the failing entry.
    pub async fn resume(&self) {
        self.state.lock().await.halted = None;
    }

    pub async fn is_halted(&self) -> bool {
        self.state.lock().await.halted.is_some()
    }
}

fn into_data_op(op: KvOp) -> KvOp {
    match op {
        KvOp::Put { key, value } => KvOp::Put {
            key: format!("!{DATA}!{key}"),
            value,
        },
        KvOp::Del { key } => KvOp::Del {
            key: format!("!{DATA}!{key}"),
        },
    }
}

fn checkpoint_op(position: u64) -> Result<KvOp> {
    let raw = serde_json::to_vec(&Checkpoint { position })
        .map_err(|e| Error::Storage(e.to_string()))?;
    Ok(KvOp::put(CHECKPOINT_KEY, raw))
}

/// Follow the log in the background, catching up after every append.
///
/// The task ends when the indexer halts or the log is dropped.
pub fn spawn<L, P>(indexer: Arc<Indexer<L, P>>) -> JoinHandle<()>
where
    L: Log + 'static,
    P: Processor + 'static,
{
    let mut changes = indexer.log.subscribe();
    tokio::spawn(async move {
        loop {
            if let Err(err) = indexer.ready().await {
                tracing::warn!(index = indexer.name(), error = %err, "background indexer stopped");
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::element::Element;
    use crate::kv::{KeyRange, MemoryKv};
    use crate::log::MemoryLog;

    struct KeyCounter {
        fail_on: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Processor for KeyCounter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn process(&self, entry: &Entry, ops: &mut Vec<KvOp>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(entry.key.as_str()) {
                return Err(Error::Storage("boom".into()));
            }
            ops.push(KvOp::put(entry.key.clone(), entry.seq.to_string()));
            Ok(())
        }
    }

    fn indexer(
        log: Arc<MemoryLog>,
        kv: Arc<dyn KvStore>,
        fail_on: Option<&str>,
    ) -> Indexer<MemoryLog, KeyCounter> {
        Indexer::new(
            log,
            KeyCounter {
                fail_on: fail_on.map(String::from),
                calls: AtomicUsize::new(0),
            },
            SubKv::new(kv, "counter"),
            2,
        )
    }

    #[tokio::test]
    async fn catches_up_in_pages_and_persists_checkpoint() {
        let log = Arc::new(MemoryLog::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        for key in ["a", "b", "c", "d", "e"] {
            log.put(key, Element::changeset()).await.unwrap();
        }

        let idx = indexer(Arc::clone(&log), Arc::clone(&kv), None);
        idx.ready().await.unwrap();
        assert_eq!(idx.checkpoint().await.unwrap(), 5);
        assert_eq!(idx.data().scan(KeyRange::prefix("")).await.unwrap().len(), 5);

        // A fresh indexer over the same store resumes from the checkpoint.
        let again = indexer(Arc::clone(&log), Arc::clone(&kv), None);
        again.ready().await.unwrap();
        assert_eq!(again.processor().calls.load(Ordering::SeqCst), 0);

        log.put("f", Element::changeset()).await.unwrap();
        again.ready().await.unwrap();
        assert_eq!(again.processor().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_halts_without_skipping_the_entry() {
        let log = Arc::new(MemoryLog::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        for key in ["a", "bad", "c"] {
            log.put(key, Element::changeset()).await.unwrap();
        }

        let idx = indexer(Arc::clone(&log), Arc::clone(&kv), Some("bad"));
        assert!(matches!(idx.ready().await, Err(Error::Storage(_))));
        assert_eq!(idx.checkpoint().await.unwrap(), 1);
        assert!(idx.is_halted().await);
        assert!(matches!(
            idx.ready().await,
            Err(Error::IndexUnavailable(_))
        ));

        // A fixed processor picks up exactly where the failed one stopped.
        let fixed = indexer(Arc::clone(&log), Arc::clone(&kv), None);
        fixed.ready().await.unwrap();
        assert_eq!(fixed.processor().calls.load(Ordering::SeqCst), 2);
        assert_eq!(fixed.checkpoint().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn corrupted_checkpoint_is_reported() {
        let log = Arc::new(MemoryLog::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        SubKv::new(Arc::clone(&kv), "counter")
            .put(CHECKPOINT_KEY, b"not json".to_vec())
            .await
            .unwrap();
        let idx = indexer(log, kv, None);
        let err = idx.checkpoint().await.unwrap_err();
        assert!(matches!(err, Error::IndexCorrupted(_)));
        assert!(!err.is_bad_input());
    }

    #[tokio::test]
    async fn background_task_follows_appends() {
        let log = Arc::new(MemoryLog::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let idx = Arc::new(indexer(Arc::clone(&log), kv, None));
        let handle = spawn(Arc::clone(&idx));

        log.put("a", Element::changeset()).await.unwrap();
        for _ in 0..100 {
            if idx.checkpoint().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(idx.checkpoint().await.unwrap(), 1);
        handle.abort();
    }
}
