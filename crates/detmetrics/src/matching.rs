//! One-to-one assignment of predictions to targets from an IoU matrix.
//!
//! Two call sites use this, with different rules:
//!
//! * the confusion matrix matches purely by geometry, on IoU strictly above the
//!   threshold, and deduplicates in two passes (per prediction, re-sort, per
//!   target);
//! * the AP sweep matches only same-class pairs, on IoU at or above the
//!   threshold, and deduplicates per prediction then per target without
//!   re-sorting in between.
//!
//! The passes are kept separate because they can keep different pairs when
//! several candidates share a target.

use std::collections::BTreeMap;

use ndarray::ArrayView2;

/// A matched (target, prediction) pair and the IoU between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub target: usize,
    pub prediction: usize,
    pub iou: f64,
}

/// Match targets (rows) to predictions (columns) for the confusion matrix.
///
/// Candidates are pairs with IoU `> iou_threshold`, regardless of class. The
/// result holds each target and each prediction at most once and is ordered
/// by target index.
pub fn match_boxes(iou: ArrayView2<'_, f64>, iou_threshold: f64) -> Vec<Match> {
    let candidates = collect_candidates(iou, |_, _, v| v > iou_threshold);
    drop_extra_matches(candidates)
}

/// Match targets to predictions of the same class for one AP IoU level.
///
/// Candidates are pairs with equal class ids and IoU `>= iou_threshold`.
pub fn match_boxes_class_aware(
    iou: ArrayView2<'_, f64>,
    target_classes: &[i64],
    prediction_classes: &[i64],
    iou_threshold: f64,
) -> Vec<Match> {
    let candidates = collect_candidates(iou, |t, p, v| {
        v >= iou_threshold && target_classes[t] == prediction_classes[p]
    });
    if candidates.len() > 1 {
        dedup_single_sort(candidates)
    } else {
        candidates
    }
}

/// Pairs accepted by `keep`, in row-major order.
fn collect_candidates<F>(iou: ArrayView2<'_, f64>, keep: F) -> Vec<Match>
where
    F: Fn(usize, usize, f64) -> bool,
{
    iou.indexed_iter()
        .filter(|&((t, p), &v)| keep(t, p, v))
        .map(|((target, prediction), &iou)| Match {
            target,
            prediction,
            iou,
        })
        .collect()
}

/// Sort → unique by prediction → sort → unique by target.
pub(crate) fn drop_extra_matches(mut matches: Vec<Match>) -> Vec<Match> {
    if matches.is_empty() {
        return matches;
    }
    sort_by_iou_desc(&mut matches);
    let mut matches = first_per_key(&matches, |m| m.prediction);
    sort_by_iou_desc(&mut matches);
    first_per_key(&matches, |m| m.target)
}

/// Sort → unique by prediction → unique by target.
pub(crate) fn dedup_single_sort(mut matches: Vec<Match>) -> Vec<Match> {
    sort_by_iou_desc(&mut matches);
    let matches = first_per_key(&matches, |m| m.prediction);
    first_per_key(&matches, |m| m.target)
}

// Stable: among equal IoUs the earlier candidate stays first.
fn sort_by_iou_desc(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.iou.total_cmp(&a.iou));
}

/// First occurrence of each key, returned in ascending key order.
fn first_per_key<K>(matches: &[Match], key: K) -> Vec<Match>
where
    K: Fn(&Match) -> usize,
{
    let mut first: BTreeMap<usize, Match> = BTreeMap::new();
    for m in matches {
        first.entry(key(m)).or_insert(*m);
    }
    first.into_values().collect()
}
