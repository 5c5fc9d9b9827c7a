//! Query execution over a segment snapshot: scalar queries with pagination,
//! filtered pk collection for hybrid search, and index-backed vector search.
//!
//! Everything here runs against a point-in-time `SegmentSnapshot`, so a
//! concurrent insert or delete never changes a result set mid-scan.

use crate::filter::Filter;
use crate::schema::Value;
use crate::segment::SegmentSnapshot;
use crate::vector::ivf::{IndexError, IvfFlatIndex};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-request search knobs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SearchParams {
    pub nprobe: usize,
}

/// One result of a vector search, distance under the collection's metric.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub pk: String,
    pub distance: f32,
    pub fields: Vec<(String, Value)>,
}

/// One row of a scalar query result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub pk: String,
    pub fields: Vec<(String, Value)>,
}

/// Collects the primary keys of rows matching `filter`. Scans segments in
/// parallel once the snapshot has enough of them to pay for the fan-out.
pub fn matching_pks(
    snapshot: &SegmentSnapshot,
    filter: &Filter,
    parallel_min_segments: usize,
) -> HashSet<String> {
    let parts = snapshot.parts();
    if parts.len() >= parallel_min_segments.max(2) {
        parts
            .par_iter()
            .flat_map_iter(|part| {
                snapshot
                    .part_rows(part)
                    .filter(|row| filter.matches(row))
                    .map(|row| row.pk().to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        snapshot
            .rows()
            .filter(|row| filter.matches(row))
            .map(|row| row.pk().to_string())
            .collect()
    }
}

/// Scalar query in insertion order with offset/limit pagination. An offset
/// past the end of the match set yields an empty page.
pub fn run_query(
    snapshot: &SegmentSnapshot,
    filter: Option<&Filter>,
    output: &[(String, usize)],
    offset: usize,
    limit: usize,
) -> Vec<QueryRow> {
    snapshot
        .rows()
        .filter(|row| filter.map_or(true, |f| f.matches(row)))
        .skip(offset)
        .take(limit)
        .map(|row| QueryRow {
            pk: row.pk().to_string(),
            fields: project(&row, output),
        })
        .collect()
}

/// Top-`limit` nearest neighbors for one query vector. Visibility is the
/// snapshot's: a candidate counts only if the snapshot still holds that
/// exact row version, which screens out deletes, reinserted pks, and rows
/// above the read watermark. `allow` restricts candidates to a pre-filtered
/// pk set for hybrid search.
pub fn vector_search(
    index: &IvfFlatIndex,
    snapshot: &SegmentSnapshot,
    query: &[f32],
    nprobe: usize,
    limit: usize,
    allow: Option<&HashSet<String>>,
    output: &[(String, usize)],
) -> Result<Vec<SearchHit>, IndexError> {
    let visible = |pk: &str, seq: u64| snapshot.find(pk).map(|row| row.seq()) == Some(seq);
    let hits = index.search(query, nprobe, limit, &visible, allow)?;
    Ok(hits
        .into_iter()
        .map(|hit| {
            let fields = snapshot
                .find(&hit.pk)
                .map(|row| project(&row, output))
                .unwrap_or_default();
            SearchHit {
                pk: hit.pk,
                distance: hit.distance,
                fields,
            }
        })
        .collect())
}

fn project(row: &crate::segment::RowCursor<'_>, output: &[(String, usize)]) -> Vec<(String, Value)> {
    output
        .iter()
        .map(|(name, idx)| (name.clone(), row.value(*idx)))
        .collect()
}
