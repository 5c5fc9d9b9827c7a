pub mod ivf;
pub(crate) mod simd;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Distance metric for vector search. `L2` ranks ascending (squared
/// euclidean, no square root), `Ip` ranks descending (inner product).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
    L2,
    Ip,
}

impl Metric {
    /// Exact distance between two vectors of equal length.
    pub fn distance(self, a: &[f32], b: &[f32], simd_enabled: bool) -> f32 {
        match self {
            Metric::L2 => simd::l2_sq(a, b, simd_enabled),
            Metric::Ip => simd::dot(a, b, simd_enabled),
        }
    }

    /// Ordering of two distances under this metric; `Less` means `a` ranks
    /// ahead of `b`.
    pub fn cmp_distance(self, a: f32, b: f32) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Metric::L2 => ord,
            Metric::Ip => ord.reverse(),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::L2 => write!(f, "L2"),
            Metric::Ip => write!(f, "IP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_ranks_ascending() {
        assert_eq!(Metric::L2.cmp_distance(0.5, 2.0), Ordering::Less);
        assert_eq!(Metric::L2.cmp_distance(2.0, 0.5), Ordering::Greater);
    }

    #[test]
    fn ip_ranks_descending() {
        assert_eq!(Metric::Ip.cmp_distance(2.0, 0.5), Ordering::Less);
        assert_eq!(Metric::Ip.cmp_distance(0.5, 2.0), Ordering::Greater);
    }

    #[test]
    fn zero_distance_to_self() {
        let v = vec![1.0f32, -2.0, 3.5, 0.25];
        assert_eq!(Metric::L2.distance(&v, &v, true), 0.0);
    }
}
