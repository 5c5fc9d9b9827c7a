//! On-disk layout for one collection directory:
//!
//! ```text
//! <data_dir>/<collection>/
//!   manifest.json     collection metadata, sealed segment list, watermarks
//!   seg-00001.bin     sealed segment block (framed bincode)
//!   seg-00001.tomb    tombstoned row sequence numbers for that segment
//!   wal.bin           framed records for rows not yet in a sealed block
//!   centroids.json    trained index metadata
//!   centroids.bin     raw centroid matrix
//! ```
//!
//! Every frame is `[magic u32][version u16][flags u16][len u32][crc32 u32]`
//! followed by a bincode payload. Readers stop at the first torn or corrupt
//! frame, so a crash mid-append loses at most the tail.

use crate::schema::{CollectionSchema, Value};
use crate::vector::Metric;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MANIFEST_VERSION: u32 = 1;
const FRAME_MAGIC: u32 = 0x56584442;
const FRAME_VERSION: u16 = 1;
const FRAME_HEADER_BYTES: usize = 16;

#[derive(Clone, Debug)]
pub struct CollectionLayout {
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub wal_path: PathBuf,
    pub centroids_meta_path: PathBuf,
    pub centroids_bin_path: PathBuf,
}

impl CollectionLayout {
    pub fn new(base: &Path, collection: &str) -> Self {
        let dir = base.join(collection);
        Self {
            manifest_path: dir.join("manifest.json"),
            wal_path: dir.join("wal.bin"),
            centroids_meta_path: dir.join("centroids.json"),
            centroids_bin_path: dir.join("centroids.bin"),
            dir,
        }
    }

    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("seg-{id:05}.bin"))
    }

    pub fn tombstone_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("seg-{id:05}.tomb"))
    }
}

/// When reads observe writes, fixed per collection at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Reads see everything up to the moment the read starts.
    Strong,
    /// Reads see everything up to the last flush.
    Bounded,
    /// Reads see everything up to the moment the collection was loaded.
    Eventually,
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyLevel::Strong => write!(f, "Strong"),
            ConsistencyLevel::Bounded => write!(f, "Bounded"),
            ConsistencyLevel::Eventually => write!(f, "Eventually"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    IvfFlat,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    pub field: String,
    pub index_type: IndexType,
    pub metric: Metric,
    pub nlist: usize,
    #[serde(default)]
    pub trained_at_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub id: u64,
    pub rows: usize,
    pub min_seq: u64,
    pub max_seq: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub name: String,
    pub schema: CollectionSchema,
    pub consistency: ConsistencyLevel,
    #[serde(default)]
    pub segments: Vec<SegmentInfo>,
    /// Highest sequence number covered by the sealed segment blocks.
    #[serde(default)]
    pub flushed_seq: u64,
    #[serde(default)]
    pub next_segment_id: u64,
    #[serde(default)]
    pub index: Option<IndexMeta>,
    #[serde(default)]
    pub created_at_ms: u64,
}

impl Manifest {
    pub fn new(name: &str, schema: CollectionSchema, consistency: ConsistencyLevel) -> Self {
        Self {
            version: MANIFEST_VERSION,
            name: name.to_string(),
            schema,
            consistency,
            segments: Vec::new(),
            flushed_seq: 0,
            next_segment_id: 1,
            index: None,
            created_at_ms: now_ms(),
        }
    }
}

/// A sealed segment as stored on disk. Columns are the codec blobs for each
/// field in schema order; the row count comes from `pks.len()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSegment {
    pub id: u64,
    pub pks: Vec<String>,
    pub seqs: Vec<u64>,
    pub columns: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WalRecord {
    Insert {
        pk: String,
        seq: u64,
        values: Vec<Value>,
    },
    Delete {
        pk: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CentroidsMeta {
    pub version: u32,
    pub field: String,
    pub dim: usize,
    pub metric: Metric,
    pub nlist_requested: usize,
    pub clusters: usize,
    pub trained_at_ms: u64,
}

pub fn init_collection(layout: &CollectionLayout, manifest: &Manifest) -> io::Result<()> {
    std::fs::create_dir_all(&layout.dir)?;
    store_manifest(layout, manifest)?;
    if !layout.wal_path.exists() {
        let _ = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&layout.wal_path)?;
    }
    Ok(())
}

pub fn store_manifest(layout: &CollectionLayout, manifest: &Manifest) -> io::Result<()> {
    let tmp = layout.dir.join("manifest.json.tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    serde_json::to_writer_pretty(&mut f, manifest)?;
    f.flush()?;
    f.sync_data()?;
    std::fs::rename(tmp, &layout.manifest_path)?;
    Ok(())
}

pub fn read_manifest(layout: &CollectionLayout) -> io::Result<Manifest> {
    let bytes = std::fs::read(&layout.manifest_path)?;
    let manifest: Manifest = serde_json::from_slice(&bytes)?;
    Ok(manifest)
}

pub fn store_segment(layout: &CollectionLayout, segment: &DiskSegment) -> io::Result<()> {
    let path = layout.segment_path(segment.id);
    let tmp = path.with_extension("bin.tmp");
    let payload = bincode::serialize(segment)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "segment serialize"))?;
    let mut writer = BufWriter::new(
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?,
    );
    writer.write_all(&frame_header(&payload))?;
    writer.write_all(&payload)?;
    writer.flush()?;
    writer.get_ref().sync_data()?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

pub fn load_segment(layout: &CollectionLayout, id: u64) -> io::Result<DiskSegment> {
    let mut reader = BufReader::new(File::open(layout.segment_path(id))?);
    let payload = read_frame(&mut reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "truncated segment block"))?;
    bincode::deserialize(&payload)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "segment deserialize"))
}

/// Rewrites the full tombstone set for one sealed segment. The set only
/// grows, so a whole-file rewrite stays small and crash-safe via rename.
pub fn store_tombstones(layout: &CollectionLayout, id: u64, seqs: &[u64]) -> io::Result<()> {
    let path = layout.tombstone_path(id);
    let tmp = path.with_extension("tomb.tmp");
    let payload = bincode::serialize(seqs)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "tombstone serialize"))?;
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    f.write_all(&frame_header(&payload))?;
    f.write_all(&payload)?;
    f.flush()?;
    f.sync_data()?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

pub fn load_tombstones(layout: &CollectionLayout, id: u64) -> io::Result<Vec<u64>> {
    let path = layout.tombstone_path(id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    match read_frame(&mut reader)? {
        Some(payload) => bincode::deserialize(&payload)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "tombstone deserialize")),
        None => Ok(Vec::new()),
    }
}

pub fn append_wal(layout: &CollectionLayout, record: &WalRecord) -> io::Result<()> {
    let payload = bincode::serialize(record)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "wal serialize"))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&layout.wal_path)?;
    file.write_all(&frame_header(&payload))?;
    file.write_all(&payload)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Replays the log in append order, stopping silently at a torn tail.
pub fn read_wal(layout: &CollectionLayout) -> io::Result<Vec<WalRecord>> {
    if !layout.wal_path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(&layout.wal_path)?);
    let mut records = Vec::new();
    while let Some(payload) = read_frame(&mut reader)? {
        match bincode::deserialize::<WalRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
    }
    Ok(records)
}

/// Called after a flush seals the logged rows into a segment block.
pub fn truncate_wal(layout: &CollectionLayout) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&layout.wal_path)?;
    file.sync_data()?;
    Ok(())
}

pub fn store_centroids(
    layout: &CollectionLayout,
    meta: &CentroidsMeta,
    centroids: &[Vec<f32>],
) -> io::Result<()> {
    let tmp_bin = layout.dir.join("centroids.bin.tmp");
    let mut writer = BufWriter::new(
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_bin)?,
    );
    bincode::serialize_into(&mut writer, centroids)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "centroids serialize"))?;
    writer.flush()?;
    writer.get_ref().sync_data()?;
    std::fs::rename(&tmp_bin, &layout.centroids_bin_path)?;

    let tmp_meta = layout.dir.join("centroids.json.tmp");
    let mut meta_writer = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_meta)?;
    serde_json::to_writer_pretty(&mut meta_writer, meta)?;
    meta_writer.flush()?;
    meta_writer.sync_data()?;
    std::fs::rename(&tmp_meta, &layout.centroids_meta_path)?;
    Ok(())
}

pub fn load_centroids(
    layout: &CollectionLayout,
) -> io::Result<Option<(CentroidsMeta, Vec<Vec<f32>>)>> {
    if !layout.centroids_bin_path.exists() || !layout.centroids_meta_path.exists() {
        return Ok(None);
    }
    let meta_bytes = std::fs::read(&layout.centroids_meta_path)?;
    let meta: CentroidsMeta = serde_json::from_slice(&meta_bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "centroids meta deserialize"))?;
    let mut reader = BufReader::new(File::open(&layout.centroids_bin_path)?);
    let centroids: Vec<Vec<f32>> = bincode::deserialize_from(&mut reader)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "centroids deserialize"))?;
    Ok(Some((meta, centroids)))
}

fn frame_header(payload: &[u8]) -> [u8; FRAME_HEADER_BYTES] {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let mut buf = [0u8; FRAME_HEADER_BYTES];
    buf[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf[4..6].copy_from_slice(&FRAME_VERSION.to_le_bytes());
    buf[6..8].copy_from_slice(&0u16.to_le_bytes());
    buf[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&hasher.finalize().to_le_bytes());
    buf
}

/// Reads one frame; `None` on clean EOF, torn tail, or checksum mismatch.
fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_BYTES];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let version = u16::from_le_bytes([header[4], header[5]]);
    if magic != FRAME_MAGIC || version != FRAME_VERSION {
        return Ok(None);
    }
    let len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let crc32 = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != crc32 {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
