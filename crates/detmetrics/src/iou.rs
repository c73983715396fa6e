//! Batched box IoU.
//!
//! Boxes are `(x_min, y_min, x_max, y_max)` rows. Only the first four columns
//! of each input are read, so full prediction / target tensors can be passed
//! as they are.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

use crate::error::Result;
use crate::types::check_box_columns;

/// Area of each box.
pub fn box_area(boxes: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    check_box_columns(boxes, "boxes")?;
    Ok(areas(boxes))
}

fn areas(boxes: ArrayView2<'_, f64>) -> Array1<f64> {
    Zip::from(boxes.column(0))
        .and(boxes.column(1))
        .and(boxes.column(2))
        .and(boxes.column(3))
        .map_collect(|&x1, &y1, &x2, &y2| (x2 - x1) * (y2 - y1))
}

/// Compute the IoU between every target and every prediction.
///
/// Returns an N×M matrix (`boxes_true.nrows()` rows, `boxes_detection.nrows()`
/// columns). Disjoint boxes and zero-area unions give 0. Either input with
/// fewer than four columns is an error, even when it has no rows.
pub fn box_iou_batch(
    boxes_true: ArrayView2<'_, f64>,
    boxes_detection: ArrayView2<'_, f64>,
) -> Result<Array2<f64>> {
    check_box_columns(boxes_true, "boxes_true")?;
    check_box_columns(boxes_detection, "boxes_detection")?;
    let n = boxes_true.nrows();
    let m = boxes_detection.nrows();
    if n == 0 || m == 0 {
        return Ok(Array2::zeros((n, m)));
    }

    let area_true = areas(boxes_true);
    let area_detection = areas(boxes_detection);

    let inter_w = axis_overlap(
        boxes_true.column(0),
        boxes_true.column(2),
        boxes_detection.column(0),
        boxes_detection.column(2),
    );
    let inter_h = axis_overlap(
        boxes_true.column(1),
        boxes_true.column(3),
        boxes_detection.column(1),
        boxes_detection.column(3),
    );

    let mut iou = inter_w * &inter_h;
    Zip::from(&mut iou)
        .and_broadcast(area_true.view().insert_axis(Axis(1)))
        .and_broadcast(area_detection.view().insert_axis(Axis(0)))
        .for_each(|inter, &a_t, &a_d| {
            let union = a_t + a_d - *inter;
            *inter = if union == 0.0 { 0.0 } else { *inter / union };
        });
    Ok(iou)
}

/// Non-negative overlap of `[lo_t, hi_t]` (one per target, as rows) with
/// `[lo_d, hi_d]` (one per detection, as columns).
fn axis_overlap(
    lo_t: ArrayView1<'_, f64>,
    hi_t: ArrayView1<'_, f64>,
    lo_d: ArrayView1<'_, f64>,
    hi_d: ArrayView1<'_, f64>,
) -> Array2<f64> {
    let mut overlap = Array2::<f64>::zeros((lo_t.len(), lo_d.len()));
    Zip::from(&mut overlap)
        .and_broadcast(lo_t.insert_axis(Axis(1)))
        .and_broadcast(hi_t.insert_axis(Axis(1)))
        .and_broadcast(lo_d.insert_axis(Axis(0)))
        .and_broadcast(hi_d.insert_axis(Axis(0)))
        .for_each(|o, &lt, &ht, &ld, &hd| *o = (ht.min(hd) - lt.max(ld)).max(0.0));
    overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ndarray::array;

    #[test]
    fn test_iou_self_is_one() {
        let boxes = array![[0.0, 0.0, 3.0, 3.0], [6.0, 1.0, 8.0, 3.0]];
        let iou = box_iou_batch(boxes.view(), boxes.view()).unwrap();
        assert!((iou[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((iou[[1, 1]] - 1.0).abs() < 1e-12);
        assert_eq!(iou[[0, 1]], 0.0);
        assert_eq!(iou[[1, 0]], 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let t = array![[0.0, 0.0, 10.0, 10.0]];
        let d = array![[5.0, 5.0, 15.0, 15.0]];
        let iou = box_iou_batch(t.view(), d.view()).unwrap();
        // inter = 5*5 = 25, union = 100 + 100 - 25 = 175
        assert!((iou[[0, 0]] - 25.0 / 175.0).abs() < 1e-12);
    }

    #[test]
    fn test_touching_boxes_do_not_overlap() {
        let t = array![[0.0, 0.0, 1.0, 1.0]];
        let d = array![[1.0, 0.0, 2.0, 1.0]];
        assert_eq!(box_iou_batch(t.view(), d.view()).unwrap()[[0, 0]], 0.0);
    }

    #[test]
    fn test_iou_transpose_symmetry() {
        let a = array![
            [0.0, 0.0, 3.0, 3.0],
            [2.0, 2.0, 5.0, 5.0],
            [6.0, 1.0, 8.0, 3.0]
        ];
        let b = array![
            [0.1, 0.1, 3.0, 3.0],
            [1.0, 6.0, 2.0, 7.0],
            [2.5, 0.0, 7.0, 4.0],
            [0.0, 0.0, 3.0, 3.0]
        ];
        let ab = box_iou_batch(a.view(), b.view()).unwrap();
        let ba = box_iou_batch(b.view(), a.view()).unwrap();
        assert_eq!(ab.dim(), (3, 4));
        for ((i, j), v) in ab.indexed_iter() {
            assert!((v - ba[[j, i]]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_degenerate_boxes() {
        let t = array![[1.0, 1.0, 1.0, 1.0]];
        let iou = box_iou_batch(t.view(), t.view()).unwrap();
        assert_eq!(iou[[0, 0]], 0.0);
    }

    #[test]
    fn test_empty_inputs_keep_shape() {
        let t = Array2::<f64>::zeros((0, 5));
        let d = array![[0.0, 0.0, 1.0, 1.0, 0.0, 0.5]];
        assert_eq!(box_iou_batch(t.view(), d.view()).unwrap().dim(), (0, 1));
        assert_eq!(box_iou_batch(d.view(), t.view()).unwrap().dim(), (1, 0));
    }

    #[test]
    fn test_extra_columns_ignored() {
        let t = array![[0.0, 0.0, 2.0, 2.0, 1.0]];
        let d = array![[0.0, 0.0, 2.0, 1.0, 0.0, 0.9]];
        let iou = box_iou_batch(t.view(), d.view()).unwrap();
        assert!((iou[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_box_area() {
        let boxes = array![[0.0, 0.0, 3.0, 3.0], [0.1, 0.1, 3.0, 3.0]];
        let area = box_area(boxes.view()).unwrap();
        assert!((area[0] - 9.0).abs() < 1e-12);
        assert!((area[1] - 8.41).abs() < 1e-9);
    }

    #[test]
    fn test_narrow_boxes_rejected() {
        let narrow = array![[0.0, 0.0, 1.0]];
        let ok = array![[0.0, 0.0, 1.0, 1.0]];
        assert!(matches!(
            box_area(narrow.view()),
            Err(Error::TooFewColumns { found: 3, .. })
        ));
        assert!(matches!(
            box_iou_batch(ok.view(), narrow.view()),
            Err(Error::TooFewColumns {
                what: "boxes_detection",
                ..
            })
        ));
        let empty_narrow = Array2::<f64>::zeros((0, 2));
        assert!(box_iou_batch(empty_narrow.view(), ok.view()).is_err());
    }
}
