//! Mean average precision over an IoU sweep.
//!
//! Per image, each prediction is marked correct or not at every IoU level.
//! The per-image results are concatenated in image order, then AP is computed
//! per class from the confidence-sorted cumulative TP/FP counts with 101-point
//! interpolation (COCO protocol).

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::iou::box_iou_batch;
use crate::matching::match_boxes_class_aware;
use crate::params::Params;
use crate::types::{
    check_columns, class_ids, confidences, detections_to_tensors, validate_input_tensors,
    Detections, PREDICTION_COLUMNS, TARGET_COLUMNS,
};

/// Added to the target count when computing recall.
const RECALL_EPS: f64 = 1e-16;

/// Matching statistics of a single image.
#[derive(Debug, Clone)]
struct ImageStats {
    /// `correct[[d, t]]`: prediction `d` matched a target at IoU level `t`.
    correct: Array2<bool>,
    confidences: Vec<f64>,
    prediction_classes: Vec<i64>,
    target_classes: Vec<i64>,
}

/// Mean average precision results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanAveragePrecision {
    /// Mean over all classes and all IoU levels.
    pub map: f64,
    /// Mean over classes at IoU 0.50.
    pub map50: f64,
    /// Mean over classes at IoU 0.75.
    pub map75: f64,
    /// Per-class AP averaged over the IoU levels.
    pub per_class_ap: Array1<f64>,
    /// AP table: one row per class in `class_ids`, one column per IoU level.
    pub average_precisions: Array2<f64>,
    /// Classes observed among the targets, ascending.
    pub class_ids: Vec<i64>,
    pub iou_thresholds: Vec<f64>,
}

impl MeanAveragePrecision {
    /// Compute mAP from per-image detection results.
    pub fn from_detections(predictions: &[Detections], targets: &[Detections]) -> Result<Self> {
        let (prediction_tensors, target_tensors) = detections_to_tensors(predictions, targets)?;
        Self::from_tensors(&prediction_tensors, &target_tensors)
    }

    /// Compute mAP with the default COCO sweep (IoU 0.50:0.05:0.95).
    ///
    /// Tensors follow the same layout as
    /// [`ConfusionMatrix::from_tensors`](crate::ConfusionMatrix::from_tensors).
    /// No confidence cut is applied.
    pub fn from_tensors(predictions: &[Array2<f64>], targets: &[Array2<f64>]) -> Result<Self> {
        Self::from_tensors_with_params(predictions, targets, &Params::default())
    }

    pub fn from_tensors_with_params(
        predictions: &[Array2<f64>],
        targets: &[Array2<f64>],
        params: &Params,
    ) -> Result<Self> {
        validate_input_tensors(predictions, targets)?;
        params.validate()?;
        let idx50 = level_index(params, 0.5)?;
        let idx75 = level_index(params, 0.75)?;
        let iou_thrs = &params.iou_thrs;

        info!(
            images = predictions.len(),
            levels = iou_thrs.len(),
            "accumulating average precision"
        );

        let stats: Vec<Option<ImageStats>> = predictions
            .par_iter()
            .zip(targets.par_iter())
            .map(|(p, t)| image_stats(p.view(), t.view(), iou_thrs))
            .collect::<Result<_>>()?;
        let stats: Vec<ImageStats> = stats.into_iter().flatten().collect();

        let total: usize = stats.iter().map(|s| s.correct.nrows()).sum();
        let mut correct = Array2::from_elem((total, iou_thrs.len()), false);
        let mut confidences = Vec::with_capacity(total);
        let mut prediction_classes = Vec::with_capacity(total);
        let mut target_classes = Vec::new();
        let mut offset = 0;
        for image in &stats {
            let n = image.correct.nrows();
            correct
                .slice_mut(s![offset..offset + n, ..])
                .assign(&image.correct);
            offset += n;
            confidences.extend_from_slice(&image.confidences);
            prediction_classes.extend_from_slice(&image.prediction_classes);
            target_classes.extend_from_slice(&image.target_classes);
        }

        if !correct.iter().any(|&c| c) {
            debug!("no correct predictions, reporting zero mAP");
            return Ok(MeanAveragePrecision {
                map: 0.0,
                map50: 0.0,
                map75: 0.0,
                per_class_ap: Array1::zeros(0),
                average_precisions: Array2::zeros((0, iou_thrs.len())),
                class_ids: Vec::new(),
                iou_thresholds: iou_thrs.clone(),
            });
        }

        let (class_ids, average_precisions) = average_precisions_per_class(
            correct.view(),
            &confidences,
            &prediction_classes,
            &target_classes,
            &params.rec_thrs,
        );

        let per_class_ap = average_precisions
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(0));
        let map50 = average_precisions.column(idx50).mean().unwrap_or(0.0);
        let map75 = average_precisions.column(idx75).mean().unwrap_or(0.0);
        let map = average_precisions.mean().unwrap_or(0.0);

        Ok(MeanAveragePrecision {
            map,
            map50,
            map75,
            per_class_ap,
            average_precisions,
            class_ids,
            iou_thresholds: iou_thrs.clone(),
        })
    }
}

impl fmt::Display for MeanAveragePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.iou_thresholds.first().copied().unwrap_or(0.5);
        let last = self.iou_thresholds.last().copied().unwrap_or(0.95);
        let sweep = format!("{:.2}:{:.2}", first, last);
        let rows = [(sweep.as_str(), self.map), ("0.50", self.map50), ("0.75", self.map75)];
        for (iou, value) in rows {
            writeln!(
                f,
                " {:<18} @[ IoU={:<9} ] = {:0.3}",
                "Average Precision (AP)", iou, value
            )?;
        }
        for (class_id, ap) in self.class_ids.iter().zip(self.per_class_ap.iter()) {
            writeln!(f, "   class {:>4}: {:0.3}", class_id, ap)?;
        }
        Ok(())
    }
}

fn level_index(params: &Params, level: f64) -> Result<usize> {
    params.iou_level_index(level).ok_or_else(|| {
        Error::InvalidParams(format!("iou_thrs must contain {:.2}", level))
    })
}

/// Mark each prediction as correct or not at every IoU level.
///
/// Returns an `(M, iou_levels.len())` matrix. A prediction is correct at a
/// level when it is matched to a target of the same class with IoU at or
/// above that level; matching is redone independently for each level.
///
/// When several predictions compete for one target, the one with the lowest
/// index wins, not the one with the highest IoU. The result therefore depends
/// on the order of the prediction rows.
pub fn match_detection_batch(
    predictions: ArrayView2<'_, f64>,
    targets: ArrayView2<'_, f64>,
    iou_levels: &[f64],
) -> Result<Array2<bool>> {
    check_columns(predictions, "predictions", 0, PREDICTION_COLUMNS)?;
    check_columns(targets, "targets", 0, TARGET_COLUMNS)?;
    let mut correct = Array2::from_elem((predictions.nrows(), iou_levels.len()), false);
    let iou = box_iou_batch(targets, predictions)?;
    let target_classes = class_ids(targets);
    let prediction_classes = class_ids(predictions);

    for (i, &level) in iou_levels.iter().enumerate() {
        let matches =
            match_boxes_class_aware(iou.view(), &target_classes, &prediction_classes, level);
        for m in matches {
            correct[[m.prediction, i]] = true;
        }
    }
    Ok(correct)
}

/// Statistics of one image, or `None` when the image has no targets.
fn image_stats(
    predictions: ArrayView2<'_, f64>,
    targets: ArrayView2<'_, f64>,
    iou_levels: &[f64],
) -> Result<Option<ImageStats>> {
    if targets.nrows() == 0 {
        return Ok(None);
    }
    let target_classes = class_ids(targets);
    if predictions.nrows() == 0 {
        // Targets still count toward recall.
        return Ok(Some(ImageStats {
            correct: Array2::from_elem((0, iou_levels.len()), false),
            confidences: Vec::new(),
            prediction_classes: Vec::new(),
            target_classes,
        }));
    }
    Ok(Some(ImageStats {
        correct: match_detection_batch(predictions, targets, iou_levels)?,
        confidences: confidences(predictions).to_vec(),
        prediction_classes: class_ids(predictions),
        target_classes,
    }))
}

/// AP for every class present among the targets and every IoU level.
///
/// Returns the class ids (ascending) and a `(classes, levels)` table. Classes
/// without any prediction keep an AP of 0.
fn average_precisions_per_class(
    correct: ArrayView2<'_, bool>,
    confidences: &[f64],
    prediction_classes: &[i64],
    target_classes: &[i64],
    rec_thrs: &[f64],
) -> (Vec<i64>, Array2<f64>) {
    let mut order: Vec<usize> = (0..confidences.len()).collect();
    order.sort_by(|&a, &b| confidences[b].total_cmp(&confidences[a]));

    let mut class_counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &c in target_classes {
        *class_counts.entry(c).or_default() += 1;
    }

    let levels = correct.ncols();
    let mut table = Array2::<f64>::zeros((class_counts.len(), levels));

    for (ci, (&class_id, &num_targets)) in class_counts.iter().enumerate() {
        let rows: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&d| prediction_classes[d] == class_id)
            .collect();
        if rows.is_empty() {
            continue;
        }

        for level in 0..levels {
            let mut tp = 0.0;
            let mut fp = 0.0;
            let mut recall = Vec::with_capacity(rows.len());
            let mut precision = Vec::with_capacity(rows.len());
            for &d in &rows {
                if correct[[d, level]] {
                    tp += 1.0;
                } else {
                    fp += 1.0;
                }
                recall.push(tp / (num_targets as f64 + RECALL_EPS));
                precision.push(tp / (tp + fp));
            }
            table[[ci, level]] = interpolated_average_precision(&recall, &precision, rec_thrs);
        }

        debug!(
            class_id,
            targets = num_targets,
            predictions = rows.len(),
            ap = table.row(ci).mean().unwrap_or(0.0),
            "class average precision"
        );
    }

    (class_counts.into_keys().collect(), table)
}

/// Average precision of a precision/recall curve, 101-point interpolation.
///
/// `recall` must be non-decreasing and as long as `precision`. An empty curve
/// has an AP of 0.
pub fn compute_average_precision(recall: &[f64], precision: &[f64]) -> f64 {
    let rec_thrs: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
    interpolated_average_precision(recall, precision, &rec_thrs)
}

fn interpolated_average_precision(recall: &[f64], precision: &[f64], rec_thrs: &[f64]) -> f64 {
    debug_assert_eq!(recall.len(), precision.len());
    if recall.is_empty() || rec_thrs.len() < 2 {
        return 0.0;
    }

    let mut extended_recall = Vec::with_capacity(recall.len() + 2);
    extended_recall.push(0.0);
    extended_recall.extend_from_slice(recall);
    extended_recall.push(1.0);

    let mut envelope = Vec::with_capacity(precision.len() + 2);
    envelope.push(1.0);
    envelope.extend_from_slice(precision);
    envelope.push(0.0);
    for d in (0..envelope.len() - 1).rev() {
        envelope[d] = envelope[d].max(envelope[d + 1]);
    }

    let interpolated: Vec<f64> = rec_thrs
        .iter()
        .map(|&r| interp(r, &extended_recall, &envelope))
        .collect();

    rec_thrs
        .windows(2)
        .zip(interpolated.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` is non-decreasing and may repeat values; at a repeated value the last
/// of the equal points is used. Outside the range the end values are returned.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if x < xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    // Largest j with xp[j] <= x; j < last since x < xp[last].
    let j = xp.partition_point(|&v| v <= x) - 1;
    if xp[j] == x {
        return fp[j];
    }
    let slope = (fp[j + 1] - fp[j]) / (xp[j + 1] - xp[j]);
    slope * (x - xp[j]) + fp[j]
}
