pub fn resolve_data_dir() -> Option<String> {
    if let Some(val) = cli_arg("--data-dir") {
        return Some(val);
    }
    std::env::var("DATA_DIR").ok().filter(|v| !v.is_empty())
}

pub fn resolve_nlist() -> usize {
    resolve_usize("--nlist", "DEFAULT_NLIST", 128)
}

pub fn resolve_nprobe() -> usize {
    resolve_usize("--nprobe", "DEFAULT_NPROBE", 8)
}

pub fn resolve_kmeans_max_iters() -> usize {
    resolve_usize("--kmeans-max-iters", "KMEANS_MAX_ITERS", 15)
}

pub fn resolve_kmeans_training_sample() -> usize {
    resolve_usize("--kmeans-training-sample", "KMEANS_TRAINING_SAMPLE", 200_000)
}

pub fn resolve_growing_segment_max_rows() -> usize {
    resolve_usize("--growing-max-rows", "GROWING_SEGMENT_MAX_ROWS", 8_192)
}

pub fn resolve_parallel_scan_min_segments() -> usize {
    resolve_usize("--parallel-scan-min", "PARALLEL_SCAN_MIN_SEGMENTS", 4)
}

pub fn resolve_simd_enabled() -> bool {
    resolve_bool("--simd", "SIMD_ENABLED", true)
}

// Helpers

fn cli_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn resolve_usize(flag: &str, env: &str, default: usize) -> usize {
    if let Some(val_str) = cli_arg(flag) {
        if let Ok(v) = val_str.parse::<usize>() {
            return v;
        }
    }
    if let Ok(val_str) = std::env::var(env) {
        if let Ok(v) = val_str.parse::<usize>() {
            return v;
        }
    }
    default
}

fn resolve_bool(flag: &str, env: &str, default: bool) -> bool {
    if let Some(val_str) = cli_arg(flag) {
        if let Ok(v) = val_str.parse::<bool>() {
            return v;
        }
    }
    if let Ok(val_str) = std::env::var(env) {
        if let Ok(v) = val_str.parse::<bool>() {
            return v;
        }
    }
    default
}
