use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Evaluation parameters shared by the confusion matrix and mAP computations.
///
/// Defaults follow the COCO protocol for the AP sweep: 10 IoU thresholds
/// (0.50:0.05:0.95) and 101 recall points. The confusion matrix defaults to a
/// 0.3 confidence cut and a 0.5 IoU match threshold.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Params {
    /// Predictions with confidence at or below this value are dropped before
    /// building the confusion matrix.
    pub conf_threshold: f64,
    /// A target and a prediction match in the confusion matrix when their IoU
    /// is strictly above this value.
    pub iou_threshold: f64,
    /// IoU levels of the AP sweep (default: 0.50, 0.55, ..., 0.95).
    pub iou_thrs: Vec<f64>,
    /// Recall points for interpolated precision (default: 0.00, 0.01, ..., 1.00).
    pub rec_thrs: Vec<f64>,
}

impl Params {
    /// COCO defaults: IoU levels 0.50:0.05:0.95, 101 recall points,
    /// `conf_threshold = 0.3` and `iou_threshold = 0.5`.
    pub fn new() -> Self {
        let iou_thrs: Vec<f64> = (0..10).map(|i| 0.5 + 0.05 * i as f64).collect();
        let rec_thrs: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();

        Params {
            conf_threshold: 0.3,
            iou_threshold: 0.5,
            iou_thrs,
            rec_thrs,
        }
    }

    /// Load parameters from a JSON file. Missing keys fall back to the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let params: Params = serde_json::from_reader(reader)?;
        params.validate()?;
        Ok(params)
    }

    /// Check that thresholds lie in `[0, 1]`, that the sweep contains the
    /// 0.50 and 0.75 levels reported as map50 / map75, and that the recall
    /// points are increasing.
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.conf_threshold) {
            return Err(Error::InvalidParams(format!(
                "conf_threshold must be in [0, 1], got {}",
                self.conf_threshold
            )));
        }
        if !unit.contains(&self.iou_threshold) {
            return Err(Error::InvalidParams(format!(
                "iou_threshold must be in [0, 1], got {}",
                self.iou_threshold
            )));
        }
        if let Some(bad) = self.iou_thrs.iter().find(|t| !unit.contains(*t)) {
            return Err(Error::InvalidParams(format!(
                "iou_thrs must be in [0, 1], got {}",
                bad
            )));
        }
        for level in [0.5, 0.75] {
            if self.iou_level_index(level).is_none() {
                return Err(Error::InvalidParams(format!(
                    "iou_thrs must contain {:.2}",
                    level
                )));
            }
        }
        if self.rec_thrs.len() < 2 || self.rec_thrs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidParams(
                "rec_thrs must hold at least two strictly increasing values".into(),
            ));
        }
        Ok(())
    }

    /// Position of `level` in the IoU sweep.
    pub fn iou_level_index(&self, level: f64) -> Option<usize> {
        self.iou_thrs.iter().position(|&t| (t - level).abs() < 1e-9)
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = Params::default();
        assert_eq!(params.iou_thrs.len(), 10);
        assert_eq!(params.rec_thrs.len(), 101);
        assert!((params.iou_thrs[9] - 0.95).abs() < 1e-9);
        assert_eq!(params.iou_level_index(0.5), Some(0));
        assert_eq!(params.iou_level_index(0.75), Some(5));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: Params = serde_json::from_str(r#"{"conf_threshold": 0.25}"#).unwrap();
        assert_eq!(params.conf_threshold, 0.25);
        assert_eq!(params.iou_threshold, 0.5);
        assert_eq!(params.iou_thrs.len(), 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut params = Params::new();
        params.iou_threshold = 1.5;
        assert!(matches!(params.validate(), Err(Error::InvalidParams(_))));

        let mut params = Params::new();
        params.iou_thrs = vec![0.5, 0.6];
        assert!(matches!(params.validate(), Err(Error::InvalidParams(_))));

        let mut params = Params::new();
        params.rec_thrs = vec![0.0, 0.5, 0.5, 1.0];
        assert!(matches!(params.validate(), Err(Error::InvalidParams(_))));
    }
}
