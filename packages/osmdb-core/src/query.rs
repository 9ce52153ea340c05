//! Bounding-box queries that return the rendering closure of the box.
//!
//! Starting from the live node heads inside the box, the traversal pulls in:
//! - every way that names one of those nodes, plus all current heads of every node the way names
//!   (even outside the box), so the way can be drawn;
//! - every relation that has any included element as a member, transitively up through
//!   super-relations.
//!
//! Nodes pulled in only to complete a way's geometry add their relations but never further ways.
//! The work proceeds breadth-first: each layer's referrer lookups and head fetches run
//! concurrently and are joined before the next layer starts. Traversal ends at the first layer
//! that discovers nothing new.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::bbox::{BoundingBox, IntoBoundingBox};
use crate::config::QueryConfig;
use crate::element::{ElementKind, Revision};
use crate::error::{Error, Result};
use crate::ids::Id;
use crate::log::Log;
use crate::refs::{Referrer, RefsIndex};
use crate::spatial::SpatialIndex;
use crate::store::ElementStore;
use crate::version::Version;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOrder {
    /// Stream nodes as found; hold ways and relations back and emit them last, ways first.
    Type,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub order: Option<QueryOrder>,
}

impl QueryOptions {
    pub fn by_type() -> Self {
        Self {
            order: Some(QueryOrder::Type),
        }
    }
}

/// Why an id's referrers are being looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    /// Node head inside the box: ways and relations both count.
    Primary,
    /// Node fetched to complete a way: relations only.
    Secondary,
    /// Way or relation already in the result: relations only.
    Member,
}

pub struct QueryEngine<L> {
    store: Arc<ElementStore<L>>,
    spatial: Arc<SpatialIndex<L>>,
    refs: Arc<RefsIndex<L>>,
    config: QueryConfig,
}

impl<L: Log + 'static> QueryEngine<L> {
    pub fn new(
        store: Arc<ElementStore<L>>,
        spatial: Arc<SpatialIndex<L>>,
        refs: Arc<RefsIndex<L>>,
        config: QueryConfig,
    ) -> Self {
        Self {
            store,
            spatial,
            refs,
            config,
        }
    }

    /// Collect the whole closure. An invalid box fails before any lookup.
    pub async fn query<B: IntoBoundingBox>(
        &self,
        bbox: B,
        options: QueryOptions,
    ) -> Result<Vec<Revision>> {
        let bbox = bbox.into_bbox()?;
        self.query_stream(bbox, options).try_collect().await
    }

    /// Lazily produce the closure. Dropping the stream stops the traversal; no later layer
    /// starts. An invalid box is the stream's only item.
    pub fn query_stream<B: IntoBoundingBox>(
        &self,
        bbox: B,
        options: QueryOptions,
    ) -> BoxStream<'_, Result<Revision>> {
        let bbox = match bbox.into_bbox() {
            Ok(bbox) => bbox,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let traversal = Traversal::new(self, bbox, options);
        stream::try_unfold(traversal, |mut traversal| async move {
            let next = traversal.next().await?;
            Ok::<_, Error>(next.map(|rev| (rev, traversal)))
        })
        .boxed()
    }

    fn fan_out(&self) -> usize {
        self.config.max_concurrent_lookups.max(1)
    }
}

struct Traversal<'a, L> {
    engine: &'a QueryEngine<L>,
    bbox: BoundingBox,
    order: Option<QueryOrder>,
    /// Ids whose current heads were fetched.
    visited_ids: HashSet<Id>,
    /// Ids whose referrers were (or are about to be) looked up.
    expanded_ids: HashSet<Id>,
    emitted_versions: HashSet<Version>,
    frontier: Vec<(Id, Role)>,
    out: VecDeque<Revision>,
    deferred: Vec<Revision>,
    layer: usize,
    seeded: bool,
    done: bool,
}

impl<'a, L: Log + 'static> Traversal<'a, L> {
    fn new(engine: &'a QueryEngine<L>, bbox: BoundingBox, options: QueryOptions) -> Self {
        Self {
            engine,
            bbox,
            order: options.order,
            visited_ids: HashSet::new(),
            expanded_ids: HashSet::new(),
            emitted_versions: HashSet::new(),
            frontier: Vec::new(),
            out: VecDeque::new(),
            deferred: Vec::new(),
            layer: 0,
            seeded: false,
            done: false,
        }
    }

    async fn next(&mut self) -> Result<Option<Revision>> {
        loop {
            if let Some(rev) = self.out.pop_front() {
                return Ok(Some(rev));
            }
            if self.done {
                return Ok(None);
            }
            if self.seeded {
                self.expand().await?;
            } else {
                self.seed().await?;
            }
            if self.frontier.is_empty() {
                self.finish();
            }
        }
    }

    fn emit(&mut self, rev: Revision) {
        if rev.is_deleted() || !self.emitted_versions.insert(rev.version) {
            return;
        }
        if self.order == Some(QueryOrder::Type) && rev.kind() != ElementKind::Node {
            self.deferred.push(rev);
        } else {
            self.out.push_back(rev);
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let mut deferred = std::mem::take(&mut self.deferred);
        deferred.sort_by_key(Revision::kind);
        self.out.extend(deferred);
        tracing::debug!(
            layers = self.layer,
            emitted = self.emitted_versions.len(),
            "query closure complete"
        );
    }

    async fn seed(&mut self) -> Result<()> {
        self.seeded = true;
        let engine = self.engine;
        engine.refs.ready().await?;
        let versions = engine.spatial.range(&self.bbox).await?;
        tracing::debug!(seeds = versions.len(), "query seeded");

        let store = engine.store.as_ref();
        let seeds: Vec<Revision> = stream::iter(versions)
            .map(|version| async move { store.get_by_version(&version).await })
            .buffer_unordered(engine.fan_out())
            .try_collect()
            .await?;

        for rev in seeds {
            if rev.kind() != ElementKind::Node || rev.is_deleted() {
                continue;
            }
            if self.expanded_ids.insert(rev.id.clone()) {
                self.frontier.push((rev.id.clone(), Role::Primary));
            }
            self.emit(rev);
        }
        Ok(())
    }

    async fn expand(&mut self) -> Result<()> {
        self.layer += 1;
        let frontier = std::mem::take(&mut self.frontier);
        tracing::debug!(layer = self.layer, frontier = frontier.len(), "expanding layer");
        let engine = self.engine;
        let limit = engine.fan_out();

        let refs = engine.refs.as_ref();
        let lookups: Vec<(Role, Vec<Referrer>)> = stream::iter(frontier)
            .map(|(id, role)| async move {
                refs.get_referrers(&id).await.map(|found| (role, found))
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;

        // Referrers not fetched before, flagged with whether they came from a primary node.
        let mut candidates: Vec<(Id, bool)> = Vec::new();
        for (role, referrers) in lookups {
            for referrer in referrers {
                let wanted = match referrer.kind {
                    ElementKind::Way => role == Role::Primary,
                    ElementKind::Relation => true,
                    _ => false,
                };
                if wanted && self.visited_ids.insert(referrer.id.clone()) {
                    candidates.push((referrer.id, role == Role::Primary));
                }
            }
        }

        let mut geometry: Vec<(Id, ())> = Vec::new();
        for ((id, from_primary), heads) in fetch_heads(engine, candidates).await? {
            let mut included = false;
            for head in heads {
                if head.is_deleted() {
                    continue;
                }
                match head.kind() {
                    ElementKind::Way if from_primary => {
                        for node in head.element.refs.iter().flatten() {
                            if self.visited_ids.insert(node.clone()) {
                                geometry.push((node.clone(), ()));
                            }
                        }
                    }
                    ElementKind::Relation => {}
                    _ => continue,
                }
                included = true;
                self.emit(head);
            }
            if included && self.expanded_ids.insert(id.clone()) {
                self.frontier.push((id, Role::Member));
            }
        }

        for ((id, ()), heads) in fetch_heads(engine, geometry).await? {
            let mut included = false;
            for head in heads.into_iter().filter(|h| !h.is_deleted()) {
                included = true;
                self.emit(head);
            }
            if included && self.expanded_ids.insert(id.clone()) {
                self.frontier.push((id, Role::Secondary));
            }
        }
        Ok(())
    }
}

/// Current heads of every id, fetched concurrently. Tags ride along unchanged.
async fn fetch_heads<L: Log + 'static, T: Send>(
    engine: &QueryEngine<L>,
    ids: Vec<(Id, T)>,
) -> Result<Vec<((Id, T), Vec<Revision>)>> {
    let store = engine.store.as_ref();
    stream::iter(ids)
        .map(|(id, tag)| async move {
            let heads = store.get(&id).await?;
            Ok::<_, Error>(((id, tag), heads))
        })
        .buffer_unordered(engine.fan_out())
        .try_collect()
        .await
}
