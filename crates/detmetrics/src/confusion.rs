//! Confusion matrix for object detection.
//!
//! Rows are ground-truth classes, columns are predicted classes. The extra
//! last row collects false positives (predictions matched to nothing) and the
//! extra last column collects false negatives (targets left unmatched).

use std::fmt;

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::iou::box_iou_batch;
use crate::matching::match_boxes;
use crate::types::{
    check_columns, class_ids, confidences, detections_to_tensors, validate_input_tensors,
    Detections, PREDICTION_COLUMNS, TARGET_COLUMNS,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    /// `(classes.len() + 1)²` counts.
    pub matrix: Array2<f64>,
    pub classes: Vec<String>,
    pub conf_threshold: f64,
    pub iou_threshold: f64,
}

impl ConfusionMatrix {
    /// All-zero matrix for the given classes.
    pub fn empty(classes: Vec<String>, conf_threshold: f64, iou_threshold: f64) -> Self {
        let size = classes.len() + 1;
        ConfusionMatrix {
            matrix: Array2::zeros((size, size)),
            classes,
            conf_threshold,
            iou_threshold,
        }
    }

    /// Build the matrix from per-image detection results.
    pub fn from_detections(
        predictions: &[Detections],
        targets: &[Detections],
        classes: Vec<String>,
        conf_threshold: f64,
        iou_threshold: f64,
    ) -> Result<Self> {
        let (prediction_tensors, target_tensors) = detections_to_tensors(predictions, targets)?;
        Self::from_tensors(
            &prediction_tensors,
            &target_tensors,
            classes,
            conf_threshold,
            iou_threshold,
        )
    }

    /// Build the matrix from per-image tensors.
    ///
    /// `predictions[i]` is an `(M, 6)` array of
    /// `(x_min, y_min, x_max, y_max, class_id, confidence)` rows and
    /// `targets[i]` an `(N, 5)` array of `(x_min, y_min, x_max, y_max, class_id)`
    /// rows for the same image.
    pub fn from_tensors(
        predictions: &[Array2<f64>],
        targets: &[Array2<f64>],
        classes: Vec<String>,
        conf_threshold: f64,
        iou_threshold: f64,
    ) -> Result<Self> {
        validate_input_tensors(predictions, targets)?;
        let num_classes = classes.len();

        info!(
            images = predictions.len(),
            num_classes, conf_threshold, iou_threshold, "building confusion matrix"
        );

        let per_image: Vec<Array2<f64>> = predictions
            .par_iter()
            .zip(targets.par_iter())
            .map(|(p, t)| {
                Self::evaluate_detection_batch(
                    p.view(),
                    t.view(),
                    num_classes,
                    conf_threshold,
                    iou_threshold,
                )
            })
            .collect::<Result<_>>()?;

        let mut result = Self::empty(classes, conf_threshold, iou_threshold);
        for m in &per_image {
            result.matrix += m;
        }
        Ok(result)
    }

    /// Confusion matrix of a single image.
    ///
    /// Predictions with confidence `<= conf_threshold` are dropped first. A
    /// target matched to a prediction (IoU `> iou_threshold`) counts in
    /// `[target_class, prediction_class]`, whatever the two classes are.
    pub fn evaluate_detection_batch(
        predictions: ArrayView2<'_, f64>,
        targets: ArrayView2<'_, f64>,
        num_classes: usize,
        conf_threshold: f64,
        iou_threshold: f64,
    ) -> Result<Array2<f64>> {
        check_columns(predictions, "predictions", 0, PREDICTION_COLUMNS)?;
        check_columns(targets, "targets", 0, TARGET_COLUMNS)?;
        check_class_range(predictions, num_classes)?;
        check_class_range(targets, num_classes)?;

        let mut result = Array2::<f64>::zeros((num_classes + 1, num_classes + 1));

        let keep: Vec<usize> = confidences(predictions)
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > conf_threshold)
            .map(|(i, _)| i)
            .collect();
        let filtered = predictions.select(Axis(0), &keep);

        let true_classes = class_ids(targets);
        let detection_classes = class_ids(filtered.view());

        let iou = box_iou_batch(targets, filtered.view())?;
        let matches = match_boxes(iou.view(), iou_threshold);

        let mut matched_prediction: Vec<Option<usize>> = vec![None; true_classes.len()];
        let mut prediction_matched = vec![false; detection_classes.len()];
        for m in &matches {
            matched_prediction[m.target] = Some(m.prediction);
            prediction_matched[m.prediction] = true;
        }

        for (t, &true_class) in true_classes.iter().enumerate() {
            let column = match matched_prediction[t] {
                Some(p) => detection_classes[p] as usize, // TP or class confusion
                None => num_classes,                       // FN
            };
            result[[true_class as usize, column]] += 1.0;
        }

        for (p, &detection_class) in detection_classes.iter().enumerate() {
            if !prediction_matched[p] {
                result[[num_classes, detection_class as usize]] += 1.0; // FP
            }
        }

        debug!(
            targets = true_classes.len(),
            predictions = detection_classes.len(),
            matches = matches.len(),
            "evaluated confusion batch"
        );
        Ok(result)
    }

    /// Add another matrix built over the same classes.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if self.classes != other.classes {
            return Err(Error::ClassMismatch {
                expected: self.classes.clone(),
                found: other.classes.clone(),
            });
        }
        self.matrix += &other.matrix;
        Ok(())
    }

    /// Copy of the matrix with each column divided by its sum.
    pub fn normalized(&self) -> Array2<f64> {
        let eps = 1e-8;
        let column_sums = self.matrix.sum_axis(Axis(0)).insert_axis(Axis(0));
        &self.matrix / &(column_sums + eps)
    }

    /// Labels of the predicted axis: class names followed by `FN`.
    pub fn predicted_labels(&self) -> Vec<String> {
        let mut labels = self.classes.clone();
        labels.push("FN".into());
        labels
    }

    /// Labels of the ground-truth axis: class names followed by `FP`.
    pub fn true_labels(&self) -> Vec<String> {
        let mut labels = self.classes.clone();
        labels.push("FP".into());
        labels
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicted = self.predicted_labels();
        let truth = self.true_labels();
        let width = predicted
            .iter()
            .chain(&truth)
            .map(|l| l.len())
            .max()
            .unwrap_or(0)
            .max(6);

        write!(f, "{:>width$}", "")?;
        for label in &predicted {
            write!(f, " {:>width$}", label)?;
        }
        writeln!(f)?;
        for (label, row) in truth.iter().zip(self.matrix.rows()) {
            write!(f, "{:>width$}", label)?;
            for v in row {
                write!(f, " {:>width$}", v)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn check_class_range(tensor: ArrayView2<'_, f64>, num_classes: usize) -> Result<()> {
    match class_ids(tensor)
        .into_iter()
        .find(|&c| c < 0 || c as usize >= num_classes)
    {
        Some(class_id) => Err(Error::ClassIdOutOfRange {
            class_id,
            num_classes,
        }),
        None => Ok(()),
    }
}
