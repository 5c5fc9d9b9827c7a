mod resolve;

pub use resolve::{
    resolve_growing_segment_max_rows, resolve_kmeans_max_iters, resolve_kmeans_training_sample,
    resolve_nlist, resolve_nprobe, resolve_parallel_scan_min_segments,
};

/// Engine tuning knobs. Every value resolves CLI flag, then env var, then
/// the built-in default, so tests can construct one directly while the demo
/// binary picks settings up from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory for persisted collections. `None` runs fully in memory.
    pub data_dir: Option<String>,
    /// Default cluster count for index builds when the caller passes none.
    pub default_nlist: usize,
    /// Default probe count for searches when the caller passes none.
    pub default_nprobe: usize,
    /// Lloyd iteration cap for k-means training.
    pub kmeans_max_iters: usize,
    /// Upper bound on vectors sampled for centroid training.
    pub kmeans_training_sample: usize,
    /// Growing segment row cap; reaching it seals the segment implicitly.
    pub growing_segment_max_rows: usize,
    /// Minimum sealed segment count before scans fan out across threads.
    pub parallel_scan_min_segments: usize,
    /// Allow AVX2 kernels when the host supports them.
    pub simd_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_nlist: 128,
            default_nprobe: 8,
            kmeans_max_iters: 15,
            kmeans_training_sample: 200_000,
            growing_segment_max_rows: 8_192,
            parallel_scan_min_segments: 4,
            simd_enabled: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            data_dir: resolve::resolve_data_dir(),
            default_nlist: resolve_nlist(),
            default_nprobe: resolve_nprobe(),
            kmeans_max_iters: resolve_kmeans_max_iters(),
            kmeans_training_sample: resolve_kmeans_training_sample(),
            growing_segment_max_rows: resolve_growing_segment_max_rows(),
            parallel_scan_min_segments: resolve_parallel_scan_min_segments(),
            simd_enabled: resolve::resolve_simd_enabled(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            ..Self::default()
        }
    }

    pub fn with_data_dir(dir: impl Into<String>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }
}
