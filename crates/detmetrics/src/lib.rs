//! Object-detection evaluation metrics.
//!
//! Two metrics are provided over per-image predictions and ground truth:
//!
//! * [`ConfusionMatrix`]: per-class confusion counts with extra rows/columns
//!   for false positives and false negatives;
//! * [`MeanAveragePrecision`]: COCO-style mAP over an IoU sweep.
//!
//! Both accept either raw tensors (one `ndarray::Array2<f64>` per image) or
//! [`Detections`], and can drive a detector over a [`DetectionDataset`].

pub mod benchmark;
pub mod confusion;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod iou;
pub mod matching;
pub mod params;
pub mod types;

pub use benchmark::{evaluate, Evaluation};
pub use confusion::ConfusionMatrix;
pub use dataset::DetectionDataset;
pub use error::{Error, Result};
pub use eval::{compute_average_precision, match_detection_batch, MeanAveragePrecision};
pub use iou::{box_area, box_iou_batch};
pub use matching::{match_boxes, match_boxes_class_aware, Match};
pub use params::Params;
pub use types::{detections_to_tensors, validate_input_tensors, Detections};
