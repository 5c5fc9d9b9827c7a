//! IVF_FLAT: coarse k-means partitioning with exact distances over the
//! probed posting lists. No compression; recall is traded against latency
//! purely through `nprobe`.

use crate::vector::{simd, Metric};
use parking_lot::RwLock;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::collections::HashSet;

const KMEANS_SEED: u64 = 0xC0FFEE;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index build requires at least one vector")]
    EmptyInput,
    #[error("query vector has {got} elements, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct KmeansConfig {
    pub max_iters: usize,
    pub training_sample: usize,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        Self {
            max_iters: 15,
            training_sample: 200_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostingEntry {
    pub pk: String,
    pub seq: u64,
    pub vector: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct IndexHit {
    pub pk: String,
    pub seq: u64,
    pub distance: f32,
}

/// Inverted-file index over one vector field. Centroids are fixed at build
/// time; incremental inserts assign to the nearest existing centroid and
/// never trigger retraining, so the partition drifts until an explicit
/// rebuild. Posting lists are individually locked so inserts into one
/// cluster do not block searches over the others.
#[derive(Debug)]
pub struct IvfFlatIndex {
    dim: usize,
    metric: Metric,
    nlist_requested: usize,
    centroids: Vec<Vec<f32>>,
    posting: Vec<RwLock<Vec<PostingEntry>>>,
    trained_at_ms: u64,
    simd_enabled: bool,
}

impl IvfFlatIndex {
    /// Trains centroids from a point-in-time snapshot and fills the posting
    /// lists. Fewer vectors than `nlist` reduces the cluster count to the
    /// vector count; only an empty snapshot is an error.
    pub fn build(
        entries: Vec<PostingEntry>,
        dim: usize,
        metric: Metric,
        nlist: usize,
        config: &KmeansConfig,
        simd_enabled: bool,
    ) -> Result<Self, IndexError> {
        if entries.is_empty() {
            return Err(IndexError::EmptyInput);
        }
        let effective_nlist = nlist.max(1).min(entries.len());
        if effective_nlist < nlist {
            tracing::info!(
                requested = nlist,
                effective = effective_nlist,
                vectors = entries.len(),
                "reduced nlist to vector count"
            );
        }
        let samples = sample_training_vectors(&entries, config.training_sample);
        let centroids = train_centroids(&samples, effective_nlist, metric, config, simd_enabled);
        let posting: Vec<RwLock<Vec<PostingEntry>>> =
            (0..centroids.len()).map(|_| RwLock::new(Vec::new())).collect();
        let index = Self {
            dim,
            metric,
            nlist_requested: nlist,
            centroids,
            posting,
            trained_at_ms: now_ms(),
            simd_enabled,
        };
        for entry in entries {
            index.insert(entry.pk, entry.seq, entry.vector);
        }
        Ok(index)
    }

    /// Reconstructs an index from persisted centroids; posting lists start
    /// empty and the caller replays the stored vectors.
    pub fn from_centroids(
        centroids: Vec<Vec<f32>>,
        dim: usize,
        metric: Metric,
        nlist_requested: usize,
        trained_at_ms: u64,
        simd_enabled: bool,
    ) -> Self {
        let posting = (0..centroids.len()).map(|_| RwLock::new(Vec::new())).collect();
        Self {
            dim,
            metric,
            nlist_requested,
            centroids,
            posting,
            trained_at_ms,
            simd_enabled,
        }
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    pub fn nlist_requested(&self) -> usize {
        self.nlist_requested
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn trained_at_ms(&self) -> u64 {
        self.trained_at_ms
    }

    /// Nearest-centroid assignment in O(nlist); only the target posting
    /// list is locked.
    pub fn insert(&self, pk: String, seq: u64, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dim);
        let cluster = self.nearest_centroid(&vector);
        self.posting[cluster]
            .write()
            .push(PostingEntry { pk, seq, vector });
    }

    /// Scans the `nprobe` nearest clusters, computing the exact distance for
    /// every candidate that passes the visibility check and the optional
    /// allow-set. Ties on distance break toward the earlier insertion.
    pub fn search(
        &self,
        query: &[f32],
        nprobe: usize,
        limit: usize,
        visible: &dyn Fn(&str, u64) -> bool,
        allow: Option<&HashSet<String>>,
    ) -> Result<Vec<IndexHit>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        let probes = self.select_probes(query, nprobe.max(1));
        let mut hits: Vec<IndexHit> = Vec::new();
        for cluster in probes {
            let entries = self.posting[cluster].read();
            for entry in entries.iter() {
                if let Some(set) = allow {
                    if !set.contains(&entry.pk) {
                        continue;
                    }
                }
                if !visible(&entry.pk, entry.seq) {
                    continue;
                }
                let distance = self
                    .metric
                    .distance(&entry.vector, query, self.simd_enabled);
                hits.push(IndexHit {
                    pk: entry.pk.clone(),
                    seq: entry.seq,
                    distance,
                });
            }
        }
        hits.sort_by(|a, b| {
            self.metric
                .cmp_distance(a.distance, b.distance)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        let mut best_idx = 0usize;
        let mut best_affinity = f32::MIN;
        for (idx, centroid) in self.centroids.iter().enumerate() {
            let affinity = centroid_affinity(self.metric, centroid, vector, self.simd_enabled);
            if affinity > best_affinity {
                best_affinity = affinity;
                best_idx = idx;
            }
        }
        best_idx
    }

    fn select_probes(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(idx, centroid)| {
                (
                    idx,
                    centroid_affinity(self.metric, centroid, query, self.simd_enabled),
                )
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(nprobe.min(self.centroids.len()))
            .map(|(idx, _)| idx)
            .collect()
    }
}

fn sample_training_vectors(entries: &[PostingEntry], limit: usize) -> Vec<Vec<f32>> {
    let mut vectors: Vec<Vec<f32>> = entries.iter().map(|e| e.vector.clone()).collect();
    let limit = limit.max(1);
    if vectors.len() > limit {
        let mut rng = StdRng::seed_from_u64(KMEANS_SEED ^ vectors.len() as u64);
        vectors.shuffle(&mut rng);
        vectors.truncate(limit);
    }
    vectors
}

/// Higher is closer. Negated squared distance for L2 keeps one comparison
/// direction across both metrics.
fn centroid_affinity(metric: Metric, centroid: &[f32], vector: &[f32], simd_enabled: bool) -> f32 {
    match metric {
        Metric::L2 => -simd::l2_sq(centroid, vector, simd_enabled),
        Metric::Ip => simd::dot(centroid, vector, simd_enabled),
    }
}

fn train_centroids(
    vectors: &[Vec<f32>],
    k: usize,
    metric: Metric,
    config: &KmeansConfig,
    simd_enabled: bool,
) -> Vec<Vec<f32>> {
    let k = k.min(vectors.len()).max(1);
    let mut centroids = init_kmeans_pp(vectors, k, metric, simd_enabled);
    for _ in 0..config.max_iters.max(1) {
        let mut buckets: Vec<Vec<&[f32]>> = vec![Vec::new(); centroids.len()];
        for vec in vectors.iter() {
            let mut best_idx = 0usize;
            let mut best_affinity = f32::MIN;
            for (idx, centroid) in centroids.iter().enumerate() {
                let affinity = centroid_affinity(metric, centroid, vec, simd_enabled);
                if affinity > best_affinity {
                    best_affinity = affinity;
                    best_idx = idx;
                }
            }
            buckets[best_idx].push(vec);
        }
        for (idx, bucket) in buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let mut new_centroid = vec![0.0f32; centroids[idx].len()];
            for vec in bucket {
                for (dst, &src) in new_centroid.iter_mut().zip(vec.iter()) {
                    *dst += src;
                }
            }
            let inv = 1.0f32 / bucket.len() as f32;
            for value in new_centroid.iter_mut() {
                *value *= inv;
            }
            centroids[idx] = new_centroid;
        }
    }
    centroids
}

fn init_kmeans_pp(
    vectors: &[Vec<f32>],
    k: usize,
    metric: Metric,
    simd_enabled: bool,
) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut centroids = Vec::with_capacity(k);
    if let Some(first) = vectors.choose(&mut rng) {
        centroids.push(first.clone());
    }
    while centroids.len() < k {
        let mut weights = Vec::with_capacity(vectors.len());
        let mut total = 0.0f32;
        for vec in vectors {
            let mut nearest = f32::MIN;
            for centroid in &centroids {
                let affinity = centroid_affinity(metric, centroid, vec, simd_enabled);
                nearest = nearest.max(affinity);
            }
            let weight = match metric {
                Metric::L2 => (-nearest).max(0.0),
                Metric::Ip => {
                    let d = (1.0 - nearest).max(0.0);
                    d * d
                }
            };
            weights.push(weight);
            total += weight;
        }
        if total <= f32::EPSILON {
            break;
        }
        let mut target = rng.gen::<f32>() * total;
        let mut chosen_idx = 0usize;
        for (idx, weight) in weights.iter().enumerate() {
            target -= *weight;
            if target <= 0.0 {
                chosen_idx = idx;
                break;
            }
        }
        centroids.push(vectors[chosen_idx].clone());
    }
    centroids
}

fn now_ms() -> u64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(vectors: &[(&str, [f32; 2])]) -> Vec<PostingEntry> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, (pk, v))| PostingEntry {
                pk: pk.to_string(),
                seq: i as u64 + 1,
                vector: v.to_vec(),
            })
            .collect()
    }

    fn all_visible(_: &str, _: u64) -> bool {
        true
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = IvfFlatIndex::build(
            Vec::new(),
            2,
            Metric::L2,
            4,
            &KmeansConfig::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::EmptyInput));
    }

    #[test]
    fn nlist_reduced_to_vector_count() {
        let index = IvfFlatIndex::build(
            entries(&[("a", [0.0, 0.0]), ("b", [1.0, 1.0])]),
            2,
            Metric::L2,
            128,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        assert_eq!(index.nlist(), 2);
        assert_eq!(index.nlist_requested(), 128);
    }

    #[test]
    fn self_query_returns_zero_distance() {
        let index = IvfFlatIndex::build(
            entries(&[("a", [0.1, 0.9]), ("b", [0.8, 0.2]), ("c", [0.5, 0.5])]),
            2,
            Metric::L2,
            2,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        let hits = index
            .search(&[0.8, 0.2], index.nlist(), 3, &all_visible, None)
            .unwrap();
        assert_eq!(hits[0].pk, "b");
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn ties_break_toward_earlier_insertion() {
        let index = IvfFlatIndex::build(
            entries(&[("late", [1.0, 0.0]), ("dup", [1.0, 0.0])]),
            2,
            Metric::L2,
            1,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        let hits = index
            .search(&[1.0, 0.0], 1, 2, &all_visible, None)
            .unwrap();
        assert_eq!(hits[0].pk, "late");
        assert_eq!(hits[1].pk, "dup");
    }

    #[test]
    fn visibility_check_excludes_entries() {
        let index = IvfFlatIndex::build(
            entries(&[("a", [0.0, 1.0]), ("b", [0.0, 0.9])]),
            2,
            Metric::L2,
            1,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        let hits = index
            .search(&[0.0, 1.0], 1, 2, &|pk, _| pk != "a", None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "b");
    }

    #[test]
    fn allow_set_is_a_hard_restriction() {
        let index = IvfFlatIndex::build(
            entries(&[("a", [0.0, 1.0]), ("b", [0.0, 0.9]), ("c", [0.0, 0.8])]),
            2,
            Metric::L2,
            1,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        let allow: HashSet<String> = ["c".to_string()].into_iter().collect();
        let hits = index
            .search(&[0.0, 1.0], 1, 3, &all_visible, Some(&allow))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "c");
    }

    #[test]
    fn inner_product_ranks_descending() {
        let index = IvfFlatIndex::build(
            entries(&[("low", [0.1, 0.1]), ("high", [1.0, 1.0])]),
            2,
            Metric::Ip,
            1,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        let hits = index
            .search(&[1.0, 1.0], 1, 2, &all_visible, None)
            .unwrap();
        assert_eq!(hits[0].pk, "high");
        assert!(hits[0].distance > hits[1].distance);
    }

    #[test]
    fn query_dim_mismatch_is_an_error() {
        let index = IvfFlatIndex::build(
            entries(&[("a", [0.0, 1.0])]),
            2,
            Metric::L2,
            1,
            &KmeansConfig::default(),
            true,
        )
        .unwrap();
        let err = index
            .search(&[0.0, 1.0, 2.0], 1, 1, &all_visible, None)
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 2, got: 3 }
        ));
    }
}
