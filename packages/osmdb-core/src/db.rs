//! Facade wiring the log, element store, indexes, and query engine together.
//!
//! Construction is explicit and acyclic: log -> element store -> indexes -> query engine.

use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::task::JoinHandle;

use crate::bbox::IntoBoundingBox;
use crate::changesets::ChangesetIndex;
use crate::config::OsmConfig;
use crate::element::{Element, Revision};
use crate::error::Result;
use crate::ids::Id;
use crate::kv::KvStore;
use crate::log::Log;
use crate::query::{QueryEngine, QueryOptions};
use crate::refs::{Referrer, RefsIndex};
use crate::spatial::SpatialIndex;
use crate::store::{BatchOp, ElementStore};
use crate::version::Version;

pub struct Osm<L> {
    store: Arc<ElementStore<L>>,
    spatial: Arc<SpatialIndex<L>>,
    refs: Arc<RefsIndex<L>>,
    changesets: Arc<ChangesetIndex<L>>,
    query: QueryEngine<L>,
}

impl<L: Log + 'static> Osm<L> {
    /// Every index keeps its state in its own namespace of `kv`.
    pub fn new(log: Arc<L>, kv: Arc<dyn KvStore>, config: OsmConfig) -> Self {
        Self::with_store(Arc::new(ElementStore::new(log)), kv, config)
    }

    /// Use a store built with a custom validator.
    pub fn with_store(store: Arc<ElementStore<L>>, kv: Arc<dyn KvStore>, config: OsmConfig) -> Self {
        let log = Arc::clone(store.log());
        let spatial = Arc::new(SpatialIndex::new(
            Arc::clone(&log),
            Arc::clone(&kv),
            &config.spatial,
            &config.indexer,
        ));
        let refs = Arc::new(RefsIndex::new(Arc::clone(&log), Arc::clone(&kv), &config.indexer));
        let changesets = Arc::new(ChangesetIndex::new(log, kv, &config.indexer));
        let query = QueryEngine::new(
            Arc::clone(&store),
            Arc::clone(&spatial),
            Arc::clone(&refs),
            config.query,
        );
        Self {
            store,
            spatial,
            refs,
            changesets,
            query,
        }
    }

    pub fn log(&self) -> &Arc<L> {
        self.store.log()
    }

    pub fn store(&self) -> &ElementStore<L> {
        &self.store
    }

    pub fn spatial(&self) -> &SpatialIndex<L> {
        &self.spatial
    }

    pub fn refs(&self) -> &RefsIndex<L> {
        &self.refs
    }

    pub fn changesets(&self) -> &ChangesetIndex<L> {
        &self.changesets
    }

    pub async fn create(&self, element: Element) -> Result<Revision> {
        self.store.create(element).await
    }

    pub async fn get(&self, id: &Id) -> Result<Vec<Revision>> {
        self.store.get(id).await
    }

    pub async fn get_by_version(&self, version: &Version) -> Result<Revision> {
        self.store.get_by_version(version).await
    }

    pub async fn put(&self, id: &Id, element: Element) -> Result<Revision> {
        self.store.put(id, element).await
    }

    pub async fn del(&self, id: &Id, patch: Element) -> Result<Revision> {
        self.store.del(id, patch).await
    }

    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<Vec<Revision>> {
        self.store.batch(ops).await
    }

    pub async fn query<B: IntoBoundingBox>(
        &self,
        bbox: B,
        options: QueryOptions,
    ) -> Result<Vec<Revision>> {
        self.query.query(bbox, options).await
    }

    pub fn query_stream<B: IntoBoundingBox>(
        &self,
        bbox: B,
        options: QueryOptions,
    ) -> BoxStream<'_, Result<Revision>> {
        self.query.query_stream(bbox, options)
    }

    pub async fn get_referrers(&self, id: &Id) -> Result<Vec<Referrer>> {
        self.refs.get_referrers(id).await
    }

    /// Ids of the elements written under `changeset`.
    pub async fn get_changes(&self, changeset: &str) -> Result<Vec<Id>> {
        self.changesets.get_elements(changeset).await
    }

    /// Catch every index up with the log.
    pub async fn ready(&self) -> Result<()> {
        futures::try_join!(
            self.spatial.ready(),
            self.refs.ready(),
            self.changesets.ready()
        )?;
        Ok(())
    }

    /// Follow the log in the background with one task per index.
    pub fn spawn_indexers(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.spatial.spawn(),
            self.refs.spawn(),
            self.changesets.spawn(),
        ]
    }
}
