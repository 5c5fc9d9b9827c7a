//! Collection manager and the in-process service surface.
//!
//! An [`Engine`] owns every collection; a [`CollectionHandle`] is a cheap
//! clone pointing at one of them and carries all data-path operations.
//! Each collection walks the lifecycle in [`state::LifecycleState`]; the
//! handle checks the state before touching segments or the index, so a
//! wrong-order call fails before any data moves.

pub mod state;

use crate::config::Config;
use crate::filter::{Filter, FilterError};
use crate::query::{self, QueryRow, SearchHit, SearchParams};
use crate::schema::{CollectionSchema, SchemaError, Value};
use crate::segment::persist::{self, CentroidsMeta, CollectionLayout};
use crate::segment::{SegmentError, SegmentSnapshot, SegmentStore};
use crate::vector::ivf::{IndexError, IvfFlatIndex, KmeansConfig, PostingEntry};
use crate::vector::Metric;
use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use state::{LifecycleState, StateError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use crate::segment::persist::{ConsistencyLevel, IndexMeta, IndexType};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("collection `{0}` already exists")]
    CollectionAlreadyExists(String),
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("field `{0}` is not a vector field")]
    NotVectorField(String),
    #[error("collection `{0}` has no index")]
    NotIndexed(String),
    #[error("search field `{requested}` does not match indexed field `{indexed}`")]
    IndexFieldMismatch { requested: String, indexed: String },
    #[error("index build requires at least one vector")]
    EmptyIndexInput,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),
}

/// Index build knobs. Only IVF_FLAT exists, so the params are its own.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct IndexParams {
    pub nlist: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self { nlist: 128 }
    }
}

struct IndexState {
    meta: persist::IndexMeta,
    field_idx: usize,
    index: Arc<IvfFlatIndex>,
}

struct CollectionCore {
    name: String,
    consistency: ConsistencyLevel,
    store: SegmentStore,
    state: RwLock<LifecycleState>,
    index: RwLock<Option<IndexState>>,
    load_snapshot_seq: AtomicU64,
}

struct EngineInner {
    config: Config,
    data_dir: Option<PathBuf>,
    collections: RwLock<HashMap<String, Arc<CollectionCore>>>,
}

/// The embedded engine. Clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens the engine, recovering every collection found under the
    /// configured data directory. Without a data directory everything is
    /// in memory and nothing survives the process.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let data_dir = config.data_dir.as_ref().map(PathBuf::from);
        let mut collections = HashMap::new();
        if let Some(dir) = &data_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create data dir {}", dir.display()))?;
            for entry in std::fs::read_dir(dir)
                .with_context(|| format!("read data dir {}", dir.display()))?
            {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let layout = CollectionLayout::new(dir, &name);
                if !layout.manifest_path.exists() {
                    continue;
                }
                let core = CollectionCore::recover(&config, layout)
                    .with_context(|| format!("recover collection `{name}`"))?;
                collections.insert(name, Arc::new(core));
            }
        }
        tracing::info!(
            collections = collections.len(),
            persistent = data_dir.is_some(),
            "engine opened"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                data_dir,
                collections: RwLock::new(collections),
            }),
        })
    }

    /// Purely in-memory engine, mostly for tests and embedding.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: Config::in_memory(),
                data_dir: None,
                collections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn create_collection(
        &self,
        name: &str,
        schema: CollectionSchema,
        consistency: ConsistencyLevel,
    ) -> Result<CollectionHandle, EngineError> {
        let mut map = self.inner.collections.write();
        if map.contains_key(name) {
            return Err(EngineError::CollectionAlreadyExists(name.to_string()));
        }
        let layout = self
            .inner
            .data_dir
            .as_ref()
            .map(|dir| CollectionLayout::new(dir, name));
        let store = SegmentStore::create(
            name,
            schema,
            consistency,
            self.inner.config.growing_segment_max_rows,
            layout,
        )?;
        let core = Arc::new(CollectionCore {
            name: name.to_string(),
            consistency,
            store,
            state: RwLock::new(LifecycleState::Created),
            index: RwLock::new(None),
            load_snapshot_seq: AtomicU64::new(0),
        });
        map.insert(name.to_string(), Arc::clone(&core));
        tracing::info!(collection = name, consistency = %consistency, "created collection");
        Ok(CollectionHandle {
            core,
            config: self.inner.config.clone(),
        })
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.inner.collections.read().contains_key(name)
    }

    pub fn collection(&self, name: &str) -> Result<CollectionHandle, EngineError> {
        let map = self.inner.collections.read();
        let core = map
            .get(name)
            .ok_or_else(|| EngineError::UnknownCollection(name.to_string()))?;
        Ok(CollectionHandle {
            core: Arc::clone(core),
            config: self.inner.config.clone(),
        })
    }

    /// Drops the collection and deletes its on-disk directory. Outstanding
    /// handles observe the terminal state and fail from then on.
    pub fn drop_collection(&self, name: &str) -> Result<(), EngineError> {
        let core = self
            .inner
            .collections
            .write()
            .remove(name)
            .ok_or_else(|| EngineError::UnknownCollection(name.to_string()))?;
        *core.state.write() = LifecycleState::Dropped;
        *core.index.write() = None;
        if let Some(layout) = core.store.layout() {
            std::fs::remove_dir_all(&layout.dir)?;
        }
        tracing::info!(collection = name, "dropped collection");
        Ok(())
    }
}

/// Shared reference to one collection plus the engine config it was opened
/// with. All data-path operations live here.
#[derive(Clone)]
pub struct CollectionHandle {
    core: Arc<CollectionCore>,
    config: Config,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn schema(&self) -> &CollectionSchema {
        self.core.store.schema()
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.core.consistency
    }

    pub fn state(&self) -> LifecycleState {
        *self.core.state.read()
    }

    /// Count of live rows (accepted inserts minus deletes).
    pub fn num_entities(&self) -> Result<usize, EngineError> {
        self.core.check_not_dropped()?;
        Ok(self.core.store.live_count())
    }

    /// Inserts a batch of positional rows and returns their primary keys.
    /// With an `auto_id` schema the rows omit the primary key. Newly
    /// accepted vectors go straight into the index when one exists.
    pub fn insert(&self, rows: Vec<Vec<Value>>) -> Result<Vec<String>, EngineError> {
        self.core.check_not_dropped()?;
        let accepted = self.core.store.insert(rows)?;
        let guard = self.core.index.read();
        if let Some(index_state) = guard.as_ref() {
            let snap = self.core.store.snapshot(self.core.store.current_seq());
            for (pk, seq) in &accepted {
                if let Some(row) = snap.find(pk) {
                    if let Some(vector) = row.vector(index_state.field_idx) {
                        index_state.index.insert(pk.clone(), *seq, vector.to_vec());
                    }
                }
            }
        }
        drop(guard);
        tracing::debug!(collection = %self.core.name, rows = accepted.len(), "inserted");
        Ok(accepted.into_iter().map(|(pk, _)| pk).collect())
    }

    /// Seals the growing segment; idempotent when there is nothing to seal.
    /// Returns the flush watermark.
    pub fn flush(&self) -> Result<u64, EngineError> {
        self.core.check_not_dropped()?;
        let watermark = self.core.store.flush()?;
        Ok(watermark)
    }

    /// Builds (or rebuilds) the IVF_FLAT index on `field` from a snapshot
    /// of the current live rows. Requires at least one flush so the bulk of
    /// the data sits in sealed segments.
    pub fn create_index(
        &self,
        field: &str,
        metric: Metric,
        params: IndexParams,
    ) -> Result<(), EngineError> {
        let state = self.core.read_state()?;
        if !matches!(state, LifecycleState::Created | LifecycleState::IndexBuilt) {
            return Err(StateError::InvalidState {
                op: "create_index",
                state,
            }
            .into());
        }
        if self.core.store.last_flush_seq() == 0 {
            return Err(StateError::InvalidState {
                op: "create_index",
                state,
            }
            .into());
        }
        self.core.build_index(field, metric, params.nlist, &self.config)?;
        *self.core.state.write() = LifecycleState::IndexBuilt;
        Ok(())
    }

    /// Re-trains the existing index from the current snapshot, the explicit
    /// answer to centroid drift from incremental inserts.
    pub fn rebuild_index(&self) -> Result<(), EngineError> {
        let state = self.core.read_state()?;
        if !matches!(state, LifecycleState::IndexBuilt | LifecycleState::Loaded) {
            return Err(StateError::InvalidState {
                op: "rebuild_index",
                state,
            }
            .into());
        }
        let meta = {
            let guard = self.core.index.read();
            guard
                .as_ref()
                .map(|s| s.meta.clone())
                .ok_or_else(|| EngineError::NotIndexed(self.core.name.clone()))?
        };
        self.core
            .build_index(&meta.field, meta.metric, meta.nlist, &self.config)
    }

    /// Makes the collection servable. Pins the Eventually-consistency
    /// snapshot at the current sequence; calling again refreshes it.
    pub fn load(&self) -> Result<(), EngineError> {
        let state = self.core.read_state()?;
        if !matches!(state, LifecycleState::IndexBuilt | LifecycleState::Loaded) {
            return Err(StateError::InvalidState { op: "load", state }.into());
        }
        self.core
            .load_snapshot_seq
            .store(self.core.store.current_seq(), Ordering::SeqCst);
        *self.core.state.write() = LifecycleState::Loaded;
        tracing::info!(collection = %self.core.name, "loaded");
        Ok(())
    }

    pub fn release(&self) -> Result<(), EngineError> {
        let state = self.core.read_state()?;
        if state != LifecycleState::Loaded {
            return Err(StateError::InvalidState { op: "release", state }.into());
        }
        *self.core.state.write() = LifecycleState::IndexBuilt;
        tracing::info!(collection = %self.core.name, "released");
        Ok(())
    }

    /// Vector search over the indexed field, one ranked hit list per query
    /// vector. An optional filter restricts candidates to matching rows
    /// before ranking, so filtered-out neighbors never displace results.
    pub fn search(
        &self,
        field: &str,
        queries: &[Vec<f32>],
        params: SearchParams,
        limit: usize,
        filter: Option<&str>,
        output_fields: &[&str],
    ) -> Result<Vec<Vec<SearchHit>>, EngineError> {
        self.core.require_loaded()?;
        let guard = self.core.index.read();
        let index_state = guard
            .as_ref()
            .ok_or_else(|| EngineError::NotIndexed(self.core.name.clone()))?;
        if index_state.meta.field != field {
            return Err(EngineError::IndexFieldMismatch {
                requested: field.to_string(),
                indexed: index_state.meta.field.clone(),
            });
        }
        let output = self.resolve_output(output_fields)?;
        let snap = self.core.snapshot();
        let allow = match filter {
            Some(expr) => {
                let filter = Filter::parse(expr, self.schema())?;
                Some(query::matching_pks(
                    &snap,
                    &filter,
                    self.config.parallel_scan_min_segments,
                ))
            }
            None => None,
        };
        let mut results = Vec::with_capacity(queries.len());
        for vector in queries {
            results.push(query::vector_search(
                &index_state.index,
                &snap,
                vector,
                params.nprobe,
                limit,
                allow.as_ref(),
                &output,
            )?);
        }
        Ok(results)
    }

    /// Scalar query in insertion order with offset/limit pagination.
    pub fn query(
        &self,
        expr: &str,
        output_fields: &[&str],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<QueryRow>, EngineError> {
        self.core.require_loaded()?;
        let filter = Filter::parse(expr, self.schema())?;
        let output = self.resolve_output(output_fields)?;
        let snap = self.core.snapshot();
        Ok(query::run_query(
            &snap,
            Some(&filter),
            &output,
            offset,
            limit.unwrap_or(usize::MAX),
        ))
    }

    /// Deletes every row matching the filter expression, evaluated against
    /// the latest data regardless of consistency level. Returns the number
    /// of rows deleted.
    pub fn delete(&self, expr: &str) -> Result<usize, EngineError> {
        self.core.check_not_dropped()?;
        let filter = Filter::parse(expr, self.schema())?;
        let snap = self.core.store.snapshot(self.core.store.current_seq());
        let pks: Vec<String> = snap
            .rows()
            .filter(|row| filter.matches(row))
            .map(|row| row.pk().to_string())
            .collect();
        drop(snap);
        let deleted = self.core.store.delete(&pks)?;
        tracing::debug!(collection = %self.core.name, deleted, "deleted rows");
        Ok(deleted)
    }

    fn resolve_output(&self, names: &[&str]) -> Result<Vec<(String, usize)>, EngineError> {
        names
            .iter()
            .map(|name| {
                self.schema()
                    .field(name)
                    .map(|(idx, _)| (name.to_string(), idx))
                    .ok_or_else(|| EngineError::UnknownField(name.to_string()))
            })
            .collect()
    }
}

impl CollectionCore {
    fn recover(config: &Config, layout: CollectionLayout) -> anyhow::Result<Self> {
        let manifest = persist::read_manifest(&layout).context("read manifest")?;
        let name = manifest.name.clone();
        let consistency = manifest.consistency;
        let index_meta = manifest.index.clone();
        let store = SegmentStore::recover(layout.clone(), manifest, config.growing_segment_max_rows)
            .context("recover segments")?;
        let index = match index_meta {
            Some(meta) => {
                let (field_idx, _) = store
                    .schema()
                    .field(&meta.field)
                    .ok_or_else(|| anyhow::anyhow!("indexed field `{}` missing", meta.field))?;
                match persist::load_centroids(&layout).context("load centroids")? {
                    Some((centroids_meta, centroids)) => {
                        let index = IvfFlatIndex::from_centroids(
                            centroids,
                            centroids_meta.dim,
                            centroids_meta.metric,
                            centroids_meta.nlist_requested,
                            centroids_meta.trained_at_ms,
                            config.simd_enabled,
                        );
                        let snap = store.snapshot(store.current_seq());
                        for row in snap.rows() {
                            if let Some(vector) = row.vector(field_idx) {
                                index.insert(row.pk().to_string(), row.seq(), vector.to_vec());
                            }
                        }
                        Some(IndexState {
                            meta,
                            field_idx,
                            index: Arc::new(index),
                        })
                    }
                    None => None,
                }
            }
            None => None,
        };
        let state = if index.is_some() {
            LifecycleState::IndexBuilt
        } else {
            LifecycleState::Created
        };
        tracing::info!(collection = %name, state = %state, rows = store.live_count(), "recovered collection");
        Ok(Self {
            name,
            consistency,
            store,
            state: RwLock::new(state),
            index: RwLock::new(index),
            load_snapshot_seq: AtomicU64::new(0),
        })
    }

    fn read_state(&self) -> Result<LifecycleState, EngineError> {
        let state = *self.state.read();
        if state == LifecycleState::Dropped {
            return Err(StateError::CollectionDropped.into());
        }
        Ok(state)
    }

    fn check_not_dropped(&self) -> Result<(), EngineError> {
        self.read_state().map(|_| ())
    }

    fn require_loaded(&self) -> Result<(), EngineError> {
        match self.read_state()? {
            LifecycleState::Loaded => Ok(()),
            _ => Err(StateError::NotLoaded.into()),
        }
    }

    /// Read watermark for the collection's consistency level.
    fn read_seq(&self) -> u64 {
        match self.consistency {
            ConsistencyLevel::Strong => self.store.current_seq(),
            ConsistencyLevel::Bounded => self.store.last_flush_seq(),
            ConsistencyLevel::Eventually => self.load_snapshot_seq.load(Ordering::SeqCst),
        }
    }

    fn snapshot(&self) -> SegmentSnapshot {
        self.store.snapshot(self.read_seq())
    }

    fn build_index(
        &self,
        field: &str,
        metric: Metric,
        nlist: usize,
        config: &Config,
    ) -> Result<(), EngineError> {
        let (field_idx, field_schema) = self
            .store
            .schema()
            .field(field)
            .ok_or_else(|| EngineError::UnknownField(field.to_string()))?;
        let dim = field_schema
            .field_type
            .dim()
            .ok_or_else(|| EngineError::NotVectorField(field.to_string()))?;
        let snap = self.store.snapshot(self.store.current_seq());
        let entries: Vec<PostingEntry> = snap
            .rows()
            .filter_map(|row| {
                row.vector(field_idx).map(|vector| PostingEntry {
                    pk: row.pk().to_string(),
                    seq: row.seq(),
                    vector: vector.to_vec(),
                })
            })
            .collect();
        let kmeans = KmeansConfig {
            max_iters: config.kmeans_max_iters,
            training_sample: config.kmeans_training_sample,
        };
        let index = IvfFlatIndex::build(entries, dim, metric, nlist, &kmeans, config.simd_enabled)
            .map_err(|err| match err {
                IndexError::EmptyInput => EngineError::EmptyIndexInput,
                other => EngineError::Index(other),
            })?;
        let meta = persist::IndexMeta {
            field: field.to_string(),
            index_type: IndexType::IvfFlat,
            metric,
            nlist,
            trained_at_ms: index.trained_at_ms(),
        };
        if let Some(layout) = self.store.layout() {
            persist::store_centroids(
                layout,
                &CentroidsMeta {
                    version: 1,
                    field: field.to_string(),
                    dim,
                    metric,
                    nlist_requested: nlist,
                    clusters: index.nlist(),
                    trained_at_ms: index.trained_at_ms(),
                },
                index.centroids(),
            )?;
        }
        self.store.store_index_meta(Some(meta.clone()))?;
        tracing::info!(
            collection = %self.name,
            field,
            metric = %metric,
            nlist = index.nlist(),
            "built index"
        );
        *self.index.write() = Some(IndexState {
            meta,
            field_idx,
            index: Arc::new(index),
        });
        Ok(())
    }
}
