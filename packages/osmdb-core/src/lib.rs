#![forbid(unsafe_code)]
//! Peer-to-peer OpenStreetMap element store over a multi-writer append-only log.
//! Elements are stored as log entries, derived indexes (spatial, referrers, changesets) are
//! rebuilt incrementally from the log, and bounding-box queries return the heads of every
//! matching element together with everything needed to draw them.

pub mod bbox;
pub mod changesets;
pub mod clock;
pub mod config;
pub mod db;
pub mod element;
pub mod error;
pub mod ids;
pub mod indexer;
pub mod kv;
pub mod log;
pub mod query;
pub mod refs;
pub mod spatial;
pub mod store;
pub mod validate;
pub mod version;

pub use bbox::{BoundingBox, IntoBoundingBox};
pub use changesets::ChangesetIndex;
pub use clock::CausalClock;
pub use config::{IndexerConfig, OsmConfig, QueryConfig, SpatialConfig};
pub use db::Osm;
pub use element::{Element, ElementKind, Member, Revision};
pub use error::{Error, Result, ValidationError};
pub use ids::{Id, Seq, WriterKey};
pub use indexer::{Indexer, Processor};
pub use kv::{KeyRange, KvOp, KvStore, MemoryKv, SubKv};
pub use log::{previous_revisions, replicate, Entry, Log, LogView, MemoryLog};
pub use query::{QueryEngine, QueryOptions, QueryOrder};
pub use refs::{Referrer, RefsIndex};
pub use spatial::{Grid, SpatialIndex};
pub use store::{BatchOp, BatchOpKind, ElementStore};
pub use validate::{DefaultValidator, Validator};
pub use version::Version;
