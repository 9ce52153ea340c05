//! Ordered key/value collaborator used to persist index state.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvOp {
    Put { key: String, value: Vec<u8> },
    Del { key: String },
}

impl KvOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        KvOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        KvOp::Del { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            KvOp::Put { key, .. } | KvOp::Del { key } => key,
        }
    }
}

/// Half-open key range `[gte, lt)`; `lt = None` means unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub gte: String,
    pub lt: Option<String>,
}

impl KeyRange {
    pub fn new(gte: impl Into<String>, lt: impl Into<String>) -> Self {
        Self {
            gte: gte.into(),
            lt: Some(lt.into()),
        }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            gte: prefix.to_string(),
            lt: prefix_upper_bound(prefix),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.gte.as_str() && self.lt.as_deref().map_or(true, |lt| key < lt)
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Apply all ops atomically, in order.
    async fn batch(&self, ops: Vec<KvOp>) -> Result<()>;

    /// Rows in `range`, ascending by key.
    async fn scan(&self, range: KeyRange) -> Result<Vec<(String, Vec<u8>)>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.batch(vec![KvOp::put(key, value)]).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.batch(vec![KvOp::del(key)]).await
    }
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn batch(&self, ops: Vec<KvOp>) -> Result<()> {
        (**self).batch(ops).await
    }

    async fn scan(&self, range: KeyRange) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).scan(range).await
    }
}

/// BTreeMap-backed store for tests and ephemeral indexes.
#[derive(Clone, Default)]
pub struct MemoryKv {
    rows: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| Error::Storage("kv lock poisoned".into()))?;
        Ok(rows.get(key).cloned())
    }

    async fn batch(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| Error::Storage("kv lock poisoned".into()))?;
        for op in ops {
            match op {
                KvOp::Put { key, value } => {
                    rows.insert(key, value);
                }
                KvOp::Del { key } => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn scan(&self, range: KeyRange) -> Result<Vec<(String, Vec<u8>)>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| Error::Storage("kv lock poisoned".into()))?;
        Ok(rows
            .range(range.gte.clone()..)
            .take_while(|(k, _)| range.lt.as_deref().map_or(true, |lt| k.as_str() < lt))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Namespaced view over another store: every key is stored as `!<name>!<key>`.
#[derive(Clone)]
pub struct SubKv {
    inner: Arc<dyn KvStore>,
    prefix: String,
}

impl SubKv {
    pub fn new(inner: Arc<dyn KvStore>, name: &str) -> Self {
        Self {
            inner,
            prefix: format!("!{name}!"),
        }
    }

    /// Nested namespace: `!<outer>!!<name>!<key>`.
    pub fn sub(&self, name: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            prefix: format!("{}!{name}!", self.prefix),
        }
    }

    fn outer(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl KvStore for SubKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.outer(key)).await
    }

    async fn batch(&self, ops: Vec<KvOp>) -> Result<()> {
        let ops = ops
            .into_iter()
            .map(|op| match op {
                KvOp::Put { key, value } => KvOp::Put {
                    key: self.outer(&key),
                    value,
                },
                KvOp::Del { key } => KvOp::Del {
                    key: self.outer(&key),
                },
            })
            .collect();
        self.inner.batch(ops).await
    }

    async fn scan(&self, range: KeyRange) -> Result<Vec<(String, Vec<u8>)>> {
        let outer = KeyRange {
            gte: self.outer(&range.gte),
            lt: match range.lt {
                Some(lt) => Some(self.outer(&lt)),
                None => prefix_upper_bound(&self.prefix),
            },
        };
        let rows = self.inner.scan(outer).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(self.prefix.as_str())
                    .map(|inner| (inner.to_string(), v))
            })
            .collect())
    }
}
