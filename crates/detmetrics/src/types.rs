use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Leading `(x_min, y_min, x_max, y_max)` columns of every box tensor.
pub const BOX_COLUMNS: usize = 4;
/// Column holding the class id in prediction and target tensors.
pub const CLASS_ID_COLUMN: usize = 4;
/// Column holding the confidence in prediction tensors.
pub const CONFIDENCE_COLUMN: usize = 5;
/// Width of a prediction tensor row: `(x_min, y_min, x_max, y_max, class_id, confidence)`.
pub const PREDICTION_COLUMNS: usize = 6;
/// Width of a target tensor row: `(x_min, y_min, x_max, y_max, class_id)`.
pub const TARGET_COLUMNS: usize = 5;

/// Detection result for a single image: boxes plus optional per-box fields.
///
/// Boxes are `[x_min, y_min, x_max, y_max]`. Ground truth usually carries
/// only `class_id`; model output carries `class_id` and `confidence`. Every
/// present field has exactly one entry per box.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Detections {
    pub xyxy: Vec<[f64; 4]>,
    #[serde(default)]
    pub class_id: Option<Vec<i64>>,
    #[serde(default)]
    pub confidence: Option<Vec<f64>>,
    #[serde(default)]
    pub tracker_id: Option<Vec<i64>>,
}

impl Detections {
    /// Boxes only; attach per-box fields with the `with_*` builders.
    pub fn new(xyxy: Vec<[f64; 4]>) -> Self {
        Detections {
            xyxy,
            ..Default::default()
        }
    }

    /// Attach class ids, one per box.
    pub fn with_class_id(mut self, class_id: Vec<i64>) -> Result<Self> {
        self.check_len("class_id", class_id.len())?;
        self.class_id = Some(class_id);
        Ok(self)
    }

    /// Attach confidences, one per box.
    pub fn with_confidence(mut self, confidence: Vec<f64>) -> Result<Self> {
        self.check_len("confidence", confidence.len())?;
        self.confidence = Some(confidence);
        Ok(self)
    }

    /// Attach tracker ids, one per box. Carried along but not used by the
    /// metrics.
    pub fn with_tracker_id(mut self, tracker_id: Vec<i64>) -> Result<Self> {
        self.check_len("tracker_id", tracker_id.len())?;
        self.tracker_id = Some(tracker_id);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.xyxy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xyxy.is_empty()
    }

    /// Check that every present optional field matches the number of boxes.
    ///
    /// Needed for values built through struct literals or deserialization,
    /// which bypass the `with_*` builders.
    pub fn validate(&self) -> Result<()> {
        if let Some(ids) = &self.class_id {
            self.check_len("class_id", ids.len())?;
        }
        if let Some(conf) = &self.confidence {
            self.check_len("confidence", conf.len())?;
        }
        if let Some(ids) = &self.tracker_id {
            self.check_len("tracker_id", ids.len())?;
        }
        Ok(())
    }

    /// Flatten into the tensor form used by the metrics.
    ///
    /// Rows are `(x_min, y_min, x_max, y_max, class_id)`, with a trailing
    /// confidence column when `with_confidence` is set.
    pub fn to_tensor(&self, with_confidence: bool) -> Result<Array2<f64>> {
        self.validate()?;
        let class_id = self
            .class_id
            .as_ref()
            .ok_or(Error::MissingField { field: "class_id" })?;
        let confidence = if with_confidence {
            Some(
                self.confidence
                    .as_ref()
                    .ok_or(Error::MissingField {
                        field: "confidence",
                    })?,
            )
        } else {
            None
        };

        let cols = if with_confidence {
            PREDICTION_COLUMNS
        } else {
            TARGET_COLUMNS
        };
        let mut tensor = Array2::<f64>::zeros((self.len(), cols));
        for (i, mut row) in tensor.axis_iter_mut(Axis(0)).enumerate() {
            let [x1, y1, x2, y2] = self.xyxy[i];
            row[0] = x1;
            row[1] = y1;
            row[2] = x2;
            row[3] = y2;
            row[CLASS_ID_COLUMN] = class_id[i] as f64;
            if let Some(conf) = confidence {
                row[CONFIDENCE_COLUMN] = conf[i];
            }
        }
        Ok(tensor)
    }

    fn check_len(&self, field: &'static str, found: usize) -> Result<()> {
        if found != self.len() {
            return Err(Error::FieldLength {
                field,
                expected: self.len(),
                found,
            });
        }
        Ok(())
    }
}

/// Convert paired prediction / target detections into tensors.
pub fn detections_to_tensors(
    predictions: &[Detections],
    targets: &[Detections],
) -> Result<(Vec<Array2<f64>>, Vec<Array2<f64>>)> {
    if predictions.len() != targets.len() {
        return Err(Error::LengthMismatch {
            predictions: predictions.len(),
            targets: targets.len(),
        });
    }
    let prediction_tensors = predictions
        .iter()
        .map(|p| p.to_tensor(true))
        .collect::<Result<Vec<_>>>()?;
    let target_tensors = targets
        .iter()
        .map(|t| t.to_tensor(false))
        .collect::<Result<Vec<_>>>()?;
    Ok((prediction_tensors, target_tensors))
}

/// Check list lengths and column counts of per-image tensors.
pub fn validate_input_tensors(predictions: &[Array2<f64>], targets: &[Array2<f64>]) -> Result<()> {
    if predictions.len() != targets.len() {
        return Err(Error::LengthMismatch {
            predictions: predictions.len(),
            targets: targets.len(),
        });
    }
    for (index, p) in predictions.iter().enumerate() {
        check_columns(p.view(), "predictions", index, PREDICTION_COLUMNS)?;
    }
    for (index, t) in targets.iter().enumerate() {
        check_columns(t.view(), "targets", index, TARGET_COLUMNS)?;
    }
    Ok(())
}

/// Require exactly `expected` columns.
pub(crate) fn check_columns(
    tensor: ArrayView2<'_, f64>,
    what: &'static str,
    index: usize,
    expected: usize,
) -> Result<()> {
    if tensor.ncols() != expected {
        return Err(Error::InvalidShape {
            what,
            index,
            expected,
            found: tensor.ncols(),
        });
    }
    Ok(())
}

/// Require the four box coordinates; extra columns are allowed.
pub(crate) fn check_box_columns(boxes: ArrayView2<'_, f64>, what: &'static str) -> Result<()> {
    if boxes.ncols() < BOX_COLUMNS {
        return Err(Error::TooFewColumns {
            what,
            expected: BOX_COLUMNS,
            found: boxes.ncols(),
        });
    }
    Ok(())
}

/// Class ids of a tensor, truncated toward zero.
pub(crate) fn class_ids(tensor: ArrayView2<'_, f64>) -> Vec<i64> {
    tensor
        .column(CLASS_ID_COLUMN)
        .iter()
        .map(|&c| c as i64)
        .collect()
}

pub(crate) fn confidences(predictions: ArrayView2<'_, f64>) -> ArrayView1<'_, f64> {
    predictions.index_axis_move(Axis(1), CONFIDENCE_COLUMN)
}
