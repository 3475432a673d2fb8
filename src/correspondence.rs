use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::*;

/// Candidate match between descriptor `left` of one image and `right` of another.
///
/// Not geometrically verified.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub left: u32,
    pub right: u32,
    /// Descriptor distance, when descriptors were supplied
    pub distance: Option<f32>,
}

/// Correspondences of every resolved (query, match) document pair.
pub type PairwiseCorrespondences = BTreeMap<(DocId, DocId), Vec<Correspondence>>;

/// Pair the descriptors of words holding exactly one descriptor in both documents.
///
/// Bins with several descriptors on either side are skipped.
pub fn extract(left: &SparseHistogram, right: &SparseHistogram) -> Vec<Correspondence> {
    unambiguous_pairs(left, right)
        .map(|(l, r)| Correspondence {
            left: l,
            right: r,
            distance: None,
        })
        .collect()
}

/// Like [`extract`], attaching the distance between the paired descriptors.
///
/// Pairs referencing a descriptor missing from `left_desc` / `right_desc` are skipped.
pub fn extract_with_distances<D: Descriptor>(
    left: &SparseHistogram,
    right: &SparseHistogram,
    left_desc: &[D],
    right_desc: &[D],
) -> Vec<Correspondence> {
    unambiguous_pairs(left, right)
        .filter_map(|(l, r)| match (left_desc.get(l as usize), right_desc.get(r as usize)) {
            (Some(a), Some(b)) => Some(Correspondence {
                left: l,
                right: r,
                distance: Some(D::distance(a.elems(), b.elems())),
            }),
            _ => {
                tracing::warn!("descriptor pair ({}, {}) is out of range, skipping", l, r);
                None
            }
        })
        .collect()
}

/// Extract correspondences between a query and each of its matches.
///
/// Matches whose document is missing from `documents` are logged and skipped.
pub fn extract_for_matches(
    query_id: DocId,
    query: &SparseHistogram,
    matches: &[DocMatch],
    documents: &BTreeMap<DocId, SparseHistogram>,
) -> PairwiseCorrespondences {
    let mut all = PairwiseCorrespondences::new();
    for m in matches {
        match documents.get(&m.id) {
            Some(doc) => {
                all.insert((query_id, m.id), extract(query, doc));
            }
            None => {
                tracing::warn!("Could not find the histogram of document {}, skipping", m.id);
            }
        }
    }
    all
}

fn unambiguous_pairs<'a>(
    left: &'a SparseHistogram,
    right: &'a SparseHistogram,
) -> impl Iterator<Item = (u32, u32)> + 'a {
    left.iter().filter_map(move |(word, l)| match (l.as_slice(), right.get(word)) {
        ([l], Some(r)) if r.len() == 1 => Some((*l, r[0])),
        _ => None,
    })
}
