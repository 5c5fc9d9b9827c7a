//! Columnar segment storage for one collection.
//!
//! Rows land in a single mutable growing segment and move to immutable
//! sealed segments on flush (or automatically once the growing segment hits
//! its row cap). Deletes never rewrite segment data; they record the row's
//! sequence number in the owning segment's tombstone set and drop the key
//! from the live map. Tombstones are keyed by sequence number rather than
//! primary key so a reinserted key never shadows, or is shadowed by, an
//! older row version carrying the same key. Sequence numbers order every
//! accepted row globally and double as the read watermarks for the
//! consistency levels.
//!
//! Lock order is growing, then live_pks, then sealed. Every path that takes
//! more than one of them follows that order.

pub mod persist;

use crate::schema::{codec, CollectionSchema, FieldType, SchemaError, Value};
use parking_lot::{Mutex, RwLock};
use persist::{CollectionLayout, DiskSegment, Manifest, SegmentInfo, WalRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("primary key `{0}` already exists")]
    DuplicatePrimaryKey(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),
}

/// Typed column storage. Vectors are flattened row-major so a row's vector
/// is a contiguous `dim`-wide slice.
#[derive(Clone, Debug)]
pub enum Column {
    Str(Vec<String>),
    Double(Vec<f64>),
    Vector { dim: usize, data: Vec<f32> },
}

impl Column {
    fn for_type(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::VarChar { .. } => Column::Str(Vec::new()),
            FieldType::Double => Column::Double(Vec::new()),
            FieldType::FloatVector { dim } => Column::Vector {
                dim: *dim,
                data: Vec::new(),
            },
        }
    }

    fn push(&mut self, value: &Value) {
        match (self, value) {
            (Column::Str(col), Value::Str(s)) => col.push(s.clone()),
            (Column::Double(col), Value::Double(d)) => col.push(*d),
            (Column::Vector { data, .. }, Value::Vector(v)) => data.extend_from_slice(v),
            _ => unreachable!("row validated against schema before push"),
        }
    }

    pub fn value(&self, slot: usize) -> Value {
        match self {
            Column::Str(col) => Value::Str(col[slot].clone()),
            Column::Double(col) => Value::Double(col[slot]),
            Column::Vector { dim, data } => {
                Value::Vector(data[slot * dim..(slot + 1) * dim].to_vec())
            }
        }
    }

    pub fn vector_slice(&self, slot: usize) -> Option<&[f32]> {
        match self {
            Column::Vector { dim, data } => Some(&data[slot * dim..(slot + 1) * dim]),
            _ => None,
        }
    }

    fn to_values(&self, rows: usize) -> Vec<Value> {
        (0..rows).map(|slot| self.value(slot)).collect()
    }
}

/// Row storage shared by growing and sealed segments. `pk_slots` maps a
/// primary key to its row slot for O(1) point lookups.
#[derive(Clone, Debug)]
pub struct SegmentData {
    pub id: u64,
    pub pks: Vec<String>,
    pub seqs: Vec<u64>,
    pub columns: Vec<Column>,
    pk_slots: HashMap<String, usize>,
}

impl SegmentData {
    fn new(id: u64, schema: &CollectionSchema) -> Self {
        Self {
            id,
            pks: Vec::new(),
            seqs: Vec::new(),
            columns: schema
                .fields()
                .iter()
                .map(|f| Column::for_type(&f.field_type))
                .collect(),
            pk_slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pks.is_empty()
    }

    pub fn slot_of(&self, pk: &str) -> Option<usize> {
        self.pk_slots.get(pk).copied()
    }

    fn push_row(&mut self, pk: String, seq: u64, values: &[Value]) {
        let slot = self.pks.len();
        for (column, value) in self.columns.iter_mut().zip(values.iter()) {
            column.push(value);
        }
        self.pk_slots.insert(pk.clone(), slot);
        self.pks.push(pk);
        self.seqs.push(seq);
    }
}

struct SealedSegment {
    data: Arc<SegmentData>,
    tombstones: RwLock<HashSet<u64>>,
}

struct GrowingSegment {
    data: SegmentData,
    tombstones: HashSet<u64>,
}

struct PersistState {
    layout: CollectionLayout,
    manifest: Mutex<Manifest>,
}

/// Segment store for one collection. Shared-read, single-writer: inserts
/// and deletes serialize on the growing segment lock while readers work
/// from point-in-time snapshots.
pub struct SegmentStore {
    schema: CollectionSchema,
    growing_max_rows: usize,
    sealed: RwLock<Vec<Arc<SealedSegment>>>,
    growing: Mutex<GrowingSegment>,
    live_pks: RwLock<HashMap<String, u64>>,
    next_seq: AtomicU64,
    next_segment_id: AtomicU64,
    last_flush_seq: AtomicU64,
    persist: Option<PersistState>,
}

impl SegmentStore {
    /// Creates an empty store, writing the initial manifest when a layout
    /// is given.
    pub fn create(
        name: &str,
        schema: CollectionSchema,
        consistency: persist::ConsistencyLevel,
        growing_max_rows: usize,
        layout: Option<CollectionLayout>,
    ) -> Result<Self, SegmentError> {
        let persist_state = match layout {
            Some(layout) => {
                let manifest = Manifest::new(name, schema.clone(), consistency);
                persist::init_collection(&layout, &manifest)?;
                Some(PersistState {
                    layout,
                    manifest: Mutex::new(manifest),
                })
            }
            None => None,
        };
        Ok(Self {
            growing: Mutex::new(GrowingSegment {
                data: SegmentData::new(0, &schema),
                tombstones: HashSet::new(),
            }),
            schema,
            growing_max_rows: growing_max_rows.max(1),
            sealed: RwLock::new(Vec::new()),
            live_pks: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            next_segment_id: AtomicU64::new(1),
            last_flush_seq: AtomicU64::new(0),
            persist: persist_state,
        })
    }

    /// Rebuilds the store from a manifest: sealed blocks, their tombstone
    /// files, then a WAL replay into the growing segment.
    pub fn recover(
        layout: CollectionLayout,
        manifest: Manifest,
        growing_max_rows: usize,
    ) -> Result<Self, SegmentError> {
        let schema = manifest.schema.clone();
        let mut sealed = Vec::with_capacity(manifest.segments.len());
        let mut live_pks = HashMap::new();
        for info in &manifest.segments {
            let disk = persist::load_segment(&layout, info.id)?;
            let tombstones: HashSet<u64> =
                persist::load_tombstones(&layout, info.id)?.into_iter().collect();
            let mut data = SegmentData::new(disk.id, &schema);
            let rows = disk.pks.len();
            let mut columns = Vec::with_capacity(schema.fields().len());
            for (field, blob) in schema.fields().iter().zip(disk.columns.iter()) {
                let values = codec::decode_column(blob, &field.field_type, rows)?;
                let mut column = Column::for_type(&field.field_type);
                for value in &values {
                    column.push(value);
                }
                columns.push(column);
            }
            data.columns = columns;
            for (slot, (pk, seq)) in disk.pks.iter().zip(disk.seqs.iter()).enumerate() {
                data.pk_slots.insert(pk.clone(), slot);
                if !tombstones.contains(seq) {
                    live_pks.insert(pk.clone(), *seq);
                }
            }
            data.pks = disk.pks;
            data.seqs = disk.seqs;
            sealed.push(Arc::new(SealedSegment {
                data: Arc::new(data),
                tombstones: RwLock::new(tombstones),
            }));
        }

        let mut growing = GrowingSegment {
            data: SegmentData::new(0, &schema),
            tombstones: HashSet::new(),
        };
        let mut max_seq = manifest.flushed_seq;
        let wal_records = persist::read_wal(&layout)?;
        let replayed = wal_records.len();
        for record in wal_records {
            match record {
                WalRecord::Insert { pk, seq, values } => {
                    max_seq = max_seq.max(seq);
                    growing.data.push_row(pk.clone(), seq, &values);
                    live_pks.insert(pk, seq);
                }
                WalRecord::Delete { pk } => {
                    // The live map holds the seq of the one version this
                    // delete targets; older versions are already tombstoned.
                    let Some(seq) = live_pks.remove(&pk) else {
                        continue;
                    };
                    if growing.data.slot_of(&pk).map(|s| growing.data.seqs[s]) == Some(seq) {
                        growing.tombstones.insert(seq);
                    } else {
                        for segment in &sealed {
                            let slot = segment.data.slot_of(&pk);
                            if slot.map(|s| segment.data.seqs[s]) == Some(seq) {
                                segment.tombstones.write().insert(seq);
                                break;
                            }
                        }
                    }
                }
            }
        }
        if replayed > 0 {
            tracing::info!(collection = %manifest.name, records = replayed, "replayed wal");
        }

        Ok(Self {
            schema,
            growing_max_rows: growing_max_rows.max(1),
            sealed: RwLock::new(sealed),
            growing: Mutex::new(growing),
            live_pks: RwLock::new(live_pks),
            next_seq: AtomicU64::new(max_seq),
            next_segment_id: AtomicU64::new(manifest.next_segment_id),
            last_flush_seq: AtomicU64::new(manifest.flushed_seq),
            persist: Some(PersistState {
                layout,
                manifest: Mutex::new(manifest),
            }),
        })
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Highest sequence number assigned so far.
    pub fn current_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Highest sequence number covered by sealed segments.
    pub fn last_flush_seq(&self) -> u64 {
        self.last_flush_seq.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.live_pks.read().len()
    }

    /// True when `pk` is live and its current version is `seq`.
    pub fn is_live_version(&self, pk: &str, seq: u64) -> bool {
        self.live_pks.read().get(pk) == Some(&seq)
    }

    /// Inserts a batch atomically: every row is validated and checked for
    /// primary key conflicts before any row is admitted. With `auto_id`
    /// the rows omit the primary key and it is filled in from the assigned
    /// sequence number. Returns the accepted `(pk, seq)` pairs in order.
    pub fn insert(&self, rows: Vec<Vec<Value>>) -> Result<Vec<(String, u64)>, SegmentError> {
        let auto_id = self.schema.auto_id();
        let field_count = self.schema.fields().len();
        let primary_idx = self.schema.primary_idx();

        let mut growing = self.growing.lock();
        let mut live = self.live_pks.write();

        // Validation pass. Nothing is admitted until the whole batch passes.
        let mut batch_pks = HashSet::new();
        let mut full_rows: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            let full = if auto_id {
                if row.len() != field_count - 1 {
                    return Err(SchemaError::FieldCount {
                        expected: field_count - 1,
                        got: row.len(),
                    }
                    .into());
                }
                let mut full = row;
                // Placeholder until the sequence number is assigned.
                full.insert(primary_idx, Value::Str(String::new()));
                full
            } else {
                row
            };
            self.schema.validate_row(&full)?;
            if !auto_id {
                let pk = full[primary_idx]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                if live.contains_key(&pk) || !batch_pks.insert(pk.clone()) {
                    return Err(SegmentError::DuplicatePrimaryKey(pk));
                }
            }
            full_rows.push(full);
        }

        // Admission pass.
        let mut accepted = Vec::with_capacity(full_rows.len());
        for mut full in full_rows {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
            if auto_id {
                full[primary_idx] = Value::Str(seq.to_string());
            }
            let pk = full[primary_idx]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if let Some(state) = &self.persist {
                persist::append_wal(
                    &state.layout,
                    &WalRecord::Insert {
                        pk: pk.clone(),
                        seq,
                        values: full.clone(),
                    },
                )?;
            }
            growing.data.push_row(pk.clone(), seq, &full);
            live.insert(pk.clone(), seq);
            accepted.push((pk, seq));
        }
        drop(live);

        if growing.data.len() >= self.growing_max_rows {
            tracing::debug!(rows = growing.data.len(), "growing segment reached cap, sealing");
            self.seal_growing(&mut growing)?;
        }
        Ok(accepted)
    }

    /// Seals the growing segment into an immutable block. A no-op on an
    /// empty growing segment, so repeated flushes are idempotent. Returns
    /// the flush watermark.
    pub fn flush(&self) -> Result<u64, SegmentError> {
        let mut growing = self.growing.lock();
        if growing.data.is_empty() {
            return Ok(self.last_flush_seq());
        }
        self.seal_growing(&mut growing)?;
        Ok(self.last_flush_seq())
    }

    fn seal_growing(&self, growing: &mut GrowingSegment) -> Result<(), SegmentError> {
        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let mut data = std::mem::replace(&mut growing.data, SegmentData::new(0, &self.schema));
        let tombstones = std::mem::take(&mut growing.tombstones);
        data.id = id;
        let watermark = *data.seqs.iter().max().unwrap_or(&self.last_flush_seq());
        let min_seq = *data.seqs.iter().min().unwrap_or(&0);
        let rows = data.len();

        if let Some(state) = &self.persist {
            let mut columns = Vec::with_capacity(self.schema.fields().len());
            for (field, column) in self.schema.fields().iter().zip(data.columns.iter()) {
                let values = column.to_values(rows);
                columns.push(codec::encode_column(&values, &field.field_type)?);
            }
            persist::store_segment(
                &state.layout,
                &DiskSegment {
                    id,
                    pks: data.pks.clone(),
                    seqs: data.seqs.clone(),
                    columns,
                },
            )?;
            if !tombstones.is_empty() {
                let mut seqs: Vec<u64> = tombstones.iter().copied().collect();
                seqs.sort_unstable();
                persist::store_tombstones(&state.layout, id, &seqs)?;
            }
            let mut manifest = state.manifest.lock();
            manifest.segments.push(SegmentInfo {
                id,
                rows,
                min_seq,
                max_seq: watermark,
            });
            manifest.flushed_seq = watermark;
            manifest.next_segment_id = self.next_segment_id.load(Ordering::SeqCst);
            persist::store_manifest(&state.layout, &manifest)?;
            drop(manifest);
            persist::truncate_wal(&state.layout)?;
        }

        self.sealed.write().push(Arc::new(SealedSegment {
            data: Arc::new(data),
            tombstones: RwLock::new(tombstones),
        }));
        self.last_flush_seq.store(watermark, Ordering::SeqCst);
        tracing::info!(segment = id, rows, watermark, "sealed segment");
        Ok(())
    }

    /// Tombstones the live version of each given primary key. Unknown keys
    /// are skipped; the returned count is the number of rows actually
    /// deleted. Deletes are visible to every subsequent read regardless of
    /// consistency level.
    pub fn delete(&self, pks: &[String]) -> Result<usize, SegmentError> {
        let mut growing = self.growing.lock();
        let mut live = self.live_pks.write();
        let sealed = self.sealed.read();
        let mut deleted = 0usize;
        let mut dirty_sealed: HashSet<u64> = HashSet::new();
        for pk in pks {
            let Some(seq) = live.remove(pk) else {
                continue;
            };
            deleted += 1;
            if growing.data.slot_of(pk).map(|s| growing.data.seqs[s]) == Some(seq) {
                growing.tombstones.insert(seq);
                if let Some(state) = &self.persist {
                    persist::append_wal(&state.layout, &WalRecord::Delete { pk: pk.clone() })?;
                }
                continue;
            }
            // Only the segment holding the live version matches on seq; any
            // earlier copies of this key were tombstoned by earlier deletes.
            for segment in sealed.iter() {
                let slot = segment.data.slot_of(pk);
                if slot.map(|s| segment.data.seqs[s]) == Some(seq) {
                    segment.tombstones.write().insert(seq);
                    dirty_sealed.insert(segment.data.id);
                    break;
                }
            }
        }
        if let Some(state) = &self.persist {
            for segment in sealed.iter() {
                if !dirty_sealed.contains(&segment.data.id) {
                    continue;
                }
                let mut seqs: Vec<u64> = segment.tombstones.read().iter().copied().collect();
                seqs.sort_unstable();
                persist::store_tombstones(&state.layout, segment.data.id, &seqs)?;
            }
        }
        Ok(deleted)
    }

    /// Point-in-time view over every segment. Rows above `read_seq` are
    /// hidden; tombstoned rows are hidden unconditionally.
    pub fn snapshot(&self, read_seq: u64) -> SegmentSnapshot {
        let growing = self.growing.lock();
        let growing_part = if growing.data.is_empty() {
            None
        } else {
            Some(SnapshotPart {
                data: Arc::new(growing.data.clone()),
                tombstones: growing.tombstones.clone(),
            })
        };
        drop(growing);
        let sealed = self.sealed.read();
        let mut parts: Vec<SnapshotPart> = sealed
            .iter()
            .map(|segment| SnapshotPart {
                data: Arc::clone(&segment.data),
                tombstones: segment.tombstones.read().clone(),
            })
            .collect();
        drop(sealed);
        parts.extend(growing_part);
        SegmentSnapshot { parts, read_seq }
    }

    /// Persists or clears the index metadata in the manifest.
    pub fn store_index_meta(
        &self,
        meta: Option<persist::IndexMeta>,
    ) -> Result<(), SegmentError> {
        if let Some(state) = &self.persist {
            let mut manifest = state.manifest.lock();
            manifest.index = meta;
            persist::store_manifest(&state.layout, &manifest)?;
        }
        Ok(())
    }

    pub fn layout(&self) -> Option<&CollectionLayout> {
        self.persist.as_ref().map(|state| &state.layout)
    }
}

#[derive(Clone)]
pub struct SnapshotPart {
    data: Arc<SegmentData>,
    tombstones: HashSet<u64>,
}

impl SnapshotPart {
    fn visible(&self, slot: usize, read_seq: u64) -> bool {
        let seq = self.data.seqs[slot];
        seq <= read_seq && !self.tombstones.contains(&seq)
    }
}

#[derive(Clone)]
pub struct SegmentSnapshot {
    parts: Vec<SnapshotPart>,
    read_seq: u64,
}

impl SegmentSnapshot {
    pub fn read_seq(&self) -> u64 {
        self.read_seq
    }

    pub fn parts(&self) -> &[SnapshotPart] {
        &self.parts
    }

    /// Visible rows across all segments, sealed first then growing, which
    /// is global insertion order because segments seal in sequence order.
    pub fn rows(&self) -> impl Iterator<Item = RowCursor<'_>> {
        self.parts.iter().flat_map(move |part| {
            (0..part.data.len()).filter_map(move |slot| {
                part.visible(slot, self.read_seq).then_some(RowCursor { part, slot })
            })
        })
    }

    /// Visible rows of one snapshot part, for parallel per-segment scans.
    pub fn part_rows<'a>(&'a self, part: &'a SnapshotPart) -> impl Iterator<Item = RowCursor<'a>> {
        (0..part.data.len()).filter_map(move |slot| {
            part.visible(slot, self.read_seq).then_some(RowCursor { part, slot })
        })
    }

    /// Point lookup by primary key, honoring the watermark and tombstones.
    pub fn find(&self, pk: &str) -> Option<RowCursor<'_>> {
        for part in &self.parts {
            if let Some(slot) = part.data.slot_of(pk) {
                if part.visible(slot, self.read_seq) {
                    return Some(RowCursor { part, slot });
                }
            }
        }
        None
    }

    pub fn count(&self) -> usize {
        self.rows().count()
    }
}

#[derive(Clone, Copy)]
pub struct RowCursor<'a> {
    part: &'a SnapshotPart,
    slot: usize,
}

impl<'a> RowCursor<'a> {
    pub fn pk(&self) -> &'a str {
        &self.part.data.pks[self.slot]
    }

    pub fn seq(&self) -> u64 {
        self.part.data.seqs[self.slot]
    }

    pub fn value(&self, field_idx: usize) -> Value {
        self.part.data.columns[field_idx].value(self.slot)
    }

    pub fn vector(&self, field_idx: usize) -> Option<&'a [f32]> {
        self.part.data.columns[field_idx].vector_slice(self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, FieldType};

    fn demo_schema() -> CollectionSchema {
        CollectionSchema::new(
            vec![
                FieldSchema::new("pk", FieldType::VarChar { max_length: 100 }).primary(),
                FieldSchema::new("random", FieldType::Double),
                FieldSchema::new("embeddings", FieldType::FloatVector { dim: 2 }),
            ],
            "demo",
        )
        .unwrap()
    }

    fn store() -> SegmentStore {
        SegmentStore::create(
            "demo",
            demo_schema(),
            persist::ConsistencyLevel::Strong,
            1024,
            None,
        )
        .unwrap()
    }

    fn row(pk: &str, random: f64) -> Vec<Value> {
        vec![
            Value::Str(pk.into()),
            Value::Double(random),
            Value::Vector(vec![0.0, 1.0]),
        ]
    }

    #[test]
    fn insert_assigns_sequential_seqs() {
        let store = store();
        let accepted = store
            .insert(vec![row("a", 0.1), row("b", 0.2)])
            .unwrap();
        assert_eq!(accepted, vec![("a".into(), 1), ("b".into(), 2)]);
        assert_eq!(store.current_seq(), 2);
    }

    #[test]
    fn duplicate_pk_rejects_whole_batch() {
        let store = store();
        store.insert(vec![row("a", 0.1)]).unwrap();
        let err = store
            .insert(vec![row("b", 0.2), row("a", 0.3)])
            .unwrap_err();
        assert!(matches!(err, SegmentError::DuplicatePrimaryKey(pk) if pk == "a"));
        // "b" must not have been admitted.
        assert_eq!(store.live_count(), 1);
        assert!(store.snapshot(store.current_seq()).find("b").is_none());
    }

    #[test]
    fn duplicate_within_batch_is_rejected() {
        let store = store();
        let err = store
            .insert(vec![row("x", 0.1), row("x", 0.2)])
            .unwrap_err();
        assert!(matches!(err, SegmentError::DuplicatePrimaryKey(_)));
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn auto_id_fills_primary_key_from_seq() {
        let schema = CollectionSchema::new(
            vec![
                FieldSchema::new("pk", FieldType::VarChar { max_length: 100 })
                    .primary()
                    .with_auto_id(),
                FieldSchema::new("random", FieldType::Double),
            ],
            "",
        )
        .unwrap();
        let store = SegmentStore::create(
            "auto",
            schema,
            persist::ConsistencyLevel::Strong,
            1024,
            None,
        )
        .unwrap();
        let accepted = store
            .insert(vec![vec![Value::Double(0.5)], vec![Value::Double(0.7)]])
            .unwrap();
        assert_eq!(accepted[0].0, "1");
        assert_eq!(accepted[1].0, "2");
    }

    #[test]
    fn flush_is_idempotent() {
        let store = store();
        store.insert(vec![row("a", 0.1)]).unwrap();
        let first = store.flush().unwrap();
        assert_eq!(first, 1);
        let second = store.flush().unwrap();
        assert_eq!(second, 1);
        assert_eq!(store.snapshot(store.current_seq()).count(), 1);
    }

    #[test]
    fn growing_cap_auto_seals() {
        let schema = demo_schema();
        let store = SegmentStore::create(
            "demo",
            schema,
            persist::ConsistencyLevel::Strong,
            2,
            None,
        )
        .unwrap();
        store.insert(vec![row("a", 0.1), row("b", 0.2)]).unwrap();
        // Cap reached; the seal moves the flush watermark without an
        // explicit flush call.
        assert_eq!(store.last_flush_seq(), 2);
        store.insert(vec![row("c", 0.3)]).unwrap();
        assert_eq!(store.last_flush_seq(), 2);
        assert_eq!(store.snapshot(store.current_seq()).count(), 3);
    }

    #[test]
    fn snapshot_watermark_hides_later_rows() {
        let store = store();
        store.insert(vec![row("a", 0.1)]).unwrap();
        let watermark = store.current_seq();
        store.insert(vec![row("b", 0.2)]).unwrap();
        let snap = store.snapshot(watermark);
        assert!(snap.find("a").is_some());
        assert!(snap.find("b").is_none());
        assert_eq!(snap.count(), 1);
    }

    #[test]
    fn delete_hides_rows_in_sealed_and_growing() {
        let store = store();
        store.insert(vec![row("sealed", 0.1)]).unwrap();
        store.flush().unwrap();
        store.insert(vec![row("growing", 0.2)]).unwrap();
        let deleted = store
            .delete(&["sealed".into(), "growing".into(), "missing".into()])
            .unwrap();
        assert_eq!(deleted, 2);
        let snap = store.snapshot(store.current_seq());
        assert_eq!(snap.count(), 0);
        assert!(!store.is_live_version("sealed", 1));
    }

    #[test]
    fn deleted_pk_can_be_reinserted() {
        let store = store();
        store.insert(vec![row("a", 0.1)]).unwrap();
        store.delete(&["a".into()]).unwrap();
        store.insert(vec![row("a", 0.9)]).unwrap();
        let snap = store.snapshot(store.current_seq());
        let cursor = snap.find("a").unwrap();
        assert_eq!(cursor.seq(), 2);
        assert_eq!(cursor.value(1), Value::Double(0.9));
        // The old version must not resurface alongside the new one.
        assert_eq!(snap.count(), 1);
    }

    #[test]
    fn reinserted_row_survives_sealing_with_old_version_hidden() {
        let store = store();
        store.insert(vec![row("a", 0.1)]).unwrap();
        store.delete(&["a".into()]).unwrap();
        store.insert(vec![row("a", 0.9)]).unwrap();
        // Both versions land in the same sealed segment.
        store.flush().unwrap();
        let snap = store.snapshot(store.current_seq());
        assert_eq!(snap.count(), 1);
        assert_eq!(snap.find("a").unwrap().value(1), Value::Double(0.9));
    }

    #[test]
    fn delete_after_reinsert_across_sealed_segments() {
        let store = store();
        store.insert(vec![row("a", 0.1)]).unwrap();
        store.flush().unwrap();
        store.delete(&["a".into()]).unwrap();
        store.insert(vec![row("a", 0.9)]).unwrap();
        store.flush().unwrap();
        // "a" now sits in two sealed segments; the delete must reach the
        // live copy, not re-tombstone the old one.
        assert_eq!(store.delete(&["a".into()]).unwrap(), 1);
        assert_eq!(store.live_count(), 0);
        let snap = store.snapshot(store.current_seq());
        assert!(snap.find("a").is_none());
        assert_eq!(snap.count(), 0);
    }

    #[test]
    fn rows_iterate_in_insertion_order() {
        let store = store();
        store.insert(vec![row("a", 0.1), row("b", 0.2)]).unwrap();
        store.flush().unwrap();
        store.insert(vec![row("c", 0.3)]).unwrap();
        let snap = store.snapshot(store.current_seq());
        let pks: Vec<&str> = snap.rows().map(|c| c.pk()).collect();
        assert_eq!(pks, vec!["a", "b", "c"]);
    }

    #[test]
    fn recover_restores_sealed_wal_and_tombstones() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = CollectionLayout::new(tmp.path(), "demo");
        {
            let store = SegmentStore::create(
                "demo",
                demo_schema(),
                persist::ConsistencyLevel::Strong,
                1024,
                Some(layout.clone()),
            )
            .unwrap();
            store.insert(vec![row("a", 0.1), row("b", 0.2)]).unwrap();
            store.flush().unwrap();
            store.insert(vec![row("c", 0.3)]).unwrap();
            store.delete(&["a".into()]).unwrap();
        }
        let manifest = persist::read_manifest(&layout).unwrap();
        let store = SegmentStore::recover(layout, manifest, 1024).unwrap();
        assert_eq!(store.current_seq(), 3);
        assert_eq!(store.last_flush_seq(), 2);
        assert_eq!(store.live_count(), 2);
        let snap = store.snapshot(store.current_seq());
        assert!(snap.find("a").is_none());
        assert!(snap.find("b").is_some());
        let c = snap.find("c").unwrap();
        assert_eq!(c.value(1), Value::Double(0.3));
    }
}
