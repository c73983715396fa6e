//! Dataset-driven evaluation with a detector callback.
//!
//! The callback is invoked once per image, sequentially and in dataset order.
//! Any callback error aborts the run; no partial result is returned.

use std::error::Error as StdError;

use serde::Serialize;
use tracing::{debug, info};

use crate::confusion::ConfusionMatrix;
use crate::dataset::DetectionDataset;
use crate::error::{Error, Result};
use crate::eval::MeanAveragePrecision;
use crate::params::Params;
use crate::types::{detections_to_tensors, Detections};

/// Both metrics computed over one pass of the detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub confusion_matrix: ConfusionMatrix,
    pub mean_average_precision: MeanAveragePrecision,
}

/// Run `callback` over every image and compute both metrics.
pub fn evaluate<I, F, E>(
    dataset: &DetectionDataset<I>,
    callback: F,
    params: &Params,
) -> Result<Evaluation>
where
    F: FnMut(&I) -> std::result::Result<Detections, E>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    params.validate()?;
    let (predictions, targets) = run_detector(dataset, callback)?;
    let (prediction_tensors, target_tensors) = detections_to_tensors(&predictions, &targets)?;

    let confusion_matrix = ConfusionMatrix::from_tensors(
        &prediction_tensors,
        &target_tensors,
        dataset.classes.clone(),
        params.conf_threshold,
        params.iou_threshold,
    )?;
    let mean_average_precision =
        MeanAveragePrecision::from_tensors_with_params(&prediction_tensors, &target_tensors, params)?;

    info!(
        map = mean_average_precision.map,
        map50 = mean_average_precision.map50,
        map75 = mean_average_precision.map75,
        "evaluation finished"
    );
    Ok(Evaluation {
        confusion_matrix,
        mean_average_precision,
    })
}

impl ConfusionMatrix {
    /// Build the confusion matrix from a dataset and a detector callback.
    pub fn benchmark<I, F, E>(
        dataset: &DetectionDataset<I>,
        callback: F,
        conf_threshold: f64,
        iou_threshold: f64,
    ) -> Result<Self>
    where
        F: FnMut(&I) -> std::result::Result<Detections, E>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (predictions, targets) = run_detector(dataset, callback)?;
        ConfusionMatrix::from_detections(
            &predictions,
            &targets,
            dataset.classes.clone(),
            conf_threshold,
            iou_threshold,
        )
    }
}

impl MeanAveragePrecision {
    /// Compute mAP from a dataset and a detector callback.
    pub fn benchmark<I, F, E>(dataset: &DetectionDataset<I>, callback: F) -> Result<Self>
    where
        F: FnMut(&I) -> std::result::Result<Detections, E>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (predictions, targets) = run_detector(dataset, callback)?;
        MeanAveragePrecision::from_detections(&predictions, &targets)
    }
}

/// Collect `(predictions, targets)` for every image in dataset order.
///
/// Missing annotations are reported before the detector runs at all.
fn run_detector<I, F, E>(
    dataset: &DetectionDataset<I>,
    mut callback: F,
) -> Result<(Vec<Detections>, Vec<Detections>)>
where
    F: FnMut(&I) -> std::result::Result<Detections, E>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    if let Some((name, _, _)) = dataset.iter().find(|(_, _, ann)| ann.is_none()) {
        return Err(Error::MissingAnnotations(name.to_string()));
    }

    info!(images = dataset.len(), "running detector over dataset");
    let mut predictions = Vec::with_capacity(dataset.len());
    let mut targets = Vec::with_capacity(dataset.len());
    for (name, image, annotations) in dataset.iter() {
        let detections = callback(image).map_err(|e| Error::Callback(e.into()))?;
        debug!(image = name, detections = detections.len(), "detector returned");
        predictions.push(detections);
        if let Some(annotations) = annotations {
            targets.push(annotations.clone());
        }
    }
    Ok((predictions, targets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Images are plain ids; the "detector" looks up canned results.
    fn dataset() -> DetectionDataset<usize> {
        let mut dataset = DetectionDataset::new(vec!["a".into(), "b".into(), "c".into()]);
        dataset.insert(
            "first",
            0,
            Detections::new(vec![[0.0, 0.0, 3.0, 3.0], [2.0, 2.0, 5.0, 5.0], [6.0, 1.0, 8.0, 3.0]])
                .with_class_id(vec![1, 1, 2])
                .unwrap(),
        );
        dataset.insert(
            "second",
            1,
            Detections::new(vec![[1.0, 1.0, 2.0, 2.0]])
                .with_class_id(vec![2])
                .unwrap(),
        );
        dataset
    }

    fn detector(image: &usize) -> std::result::Result<Detections, Infallible> {
        let det = match image {
            0 => Detections::new(vec![
                [0.0, 0.0, 3.0, 3.0],
                [0.1, 0.1, 3.0, 3.0],
                [6.0, 1.0, 8.0, 3.0],
                [1.0, 6.0, 2.0, 7.0],
            ])
            .with_class_id(vec![1, 0, 1, 1])
            .and_then(|d| d.with_confidence(vec![0.9, 0.9, 0.8, 0.8])),
            _ => Detections::new(vec![[1.0, 1.0, 2.0, 2.0]])
                .with_class_id(vec![2])
                .and_then(|d| d.with_confidence(vec![0.8])),
        };
        Ok(det.unwrap())
    }

    #[test]
    fn test_confusion_benchmark() {
        let cm = ConfusionMatrix::benchmark(&dataset(), detector, 0.3, 0.5).unwrap();
        assert_eq!(cm.matrix[[1, 1]], 1.0);
        assert_eq!(cm.matrix[[2, 2]], 1.0);
        assert_eq!(cm.matrix.sum(), 6.0);
        assert_eq!(cm.classes.len(), 3);
    }

    #[test]
    fn test_callback_called_in_order() {
        let mut seen = Vec::new();
        let _ = MeanAveragePrecision::benchmark(&dataset(), |image: &usize| {
            seen.push(*image);
            detector(image)
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_evaluate_both_metrics() {
        let evaluation = evaluate(&dataset(), detector, &Params::default()).unwrap();
        assert_eq!(evaluation.confusion_matrix.matrix.sum(), 6.0);
        assert!((evaluation.mean_average_precision.map - 0.665).abs() < 1e-9);
    }

    #[test]
    fn test_callback_error_aborts() {
        let mut calls = 0;
        let err = evaluate(
            &dataset(),
            |_: &usize| {
                calls += 1;
                Err::<Detections, _>("corrupt image")
            },
            &Params::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
        assert_eq!(err.to_string(), "detector callback failed: corrupt image");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_missing_annotations_checked_first() {
        let mut dataset = dataset();
        let mut annotations = std::collections::HashMap::new();
        annotations.insert(
            "first".to_string(),
            dataset.annotations("first").unwrap().clone(),
        );
        dataset = DetectionDataset::from_parts(
            dataset.classes.clone(),
            vec![("first".to_string(), 0), ("second".to_string(), 1)],
            annotations,
        );

        let mut calls = 0;
        let err = ConfusionMatrix::benchmark(
            &dataset,
            |image: &usize| {
                calls += 1;
                detector(image)
            },
            0.3,
            0.5,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingAnnotations(ref name) if name == "second"));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_detections_without_confidence_rejected() {
        let err = MeanAveragePrecision::benchmark(&dataset(), |_: &usize| {
            Detections::new(vec![[0.0, 0.0, 1.0, 1.0]]).with_class_id(vec![0])
        })
        .unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "confidence" }));
    }
}
