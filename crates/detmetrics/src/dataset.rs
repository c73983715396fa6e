//! In-memory detection dataset used by the benchmark driver.

use std::collections::HashMap;

use crate::types::Detections;

/// Images and their ground-truth annotations, in insertion order.
///
/// The image type is left to the caller; the dataset only hands images to the
/// detector callback.
#[derive(Debug, Clone)]
pub struct DetectionDataset<I> {
    pub classes: Vec<String>,
    images: Vec<(String, I)>,
    /// image name -> index into `images`
    index: HashMap<String, usize>,
    annotations: HashMap<String, Detections>,
}

impl<I> DetectionDataset<I> {
    pub fn new(classes: Vec<String>) -> Self {
        DetectionDataset {
            classes,
            images: Vec::new(),
            index: HashMap::new(),
            annotations: HashMap::new(),
        }
    }

    /// Build a dataset from ordered images and a name -> annotations map.
    ///
    /// Images without an entry in `annotations` are kept; the benchmark
    /// rejects them before running the detector.
    pub fn from_parts(
        classes: Vec<String>,
        images: Vec<(String, I)>,
        annotations: HashMap<String, Detections>,
    ) -> Self {
        let mut dataset = DetectionDataset::new(classes);
        for (name, image) in images {
            dataset.insert_image(name, image);
        }
        dataset.annotations = annotations;
        dataset
    }

    /// Add an image with its annotations. Re-inserting a name replaces the
    /// previous entry but keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, image: I, annotations: Detections) {
        let name = name.into();
        self.annotations.insert(name.clone(), annotations);
        self.insert_image(name, image);
    }

    fn insert_image(&mut self, name: String, image: I) {
        match self.index.get(&name) {
            Some(&i) => self.images[i].1 = image,
            None => {
                self.index.insert(name.clone(), self.images.len());
                self.images.push((name, image));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, name: &str) -> Option<&I> {
        self.index.get(name).map(|&i| &self.images[i].1)
    }

    pub fn annotations(&self, name: &str) -> Option<&Detections> {
        self.annotations.get(name)
    }

    /// Iterate over `(name, image, annotations)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &I, Option<&Detections>)> + '_ {
        self.images
            .iter()
            .map(move |(name, image)| (name.as_str(), image, self.annotations.get(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(class_id: i64) -> Detections {
        Detections::new(vec![[0.0, 0.0, 1.0, 1.0]])
            .with_class_id(vec![class_id])
            .unwrap()
    }

    #[test]
    fn test_insertion_order_kept() {
        let mut dataset = DetectionDataset::new(vec!["a".into(), "b".into()]);
        dataset.insert("z.jpg", 1u8, ann(0));
        dataset.insert("a.jpg", 2u8, ann(1));
        dataset.insert("m.jpg", 3u8, ann(0));
        let names: Vec<&str> = dataset.iter().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["z.jpg", "a.jpg", "m.jpg"]);
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let mut dataset = DetectionDataset::new(vec!["a".into(), "b".into()]);
        dataset.insert("x", 1u8, ann(0));
        dataset.insert("y", 2u8, ann(0));
        dataset.insert("x", 9u8, ann(1));
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.image("x"), Some(&9));
        assert_eq!(dataset.annotations("x").unwrap().class_id, Some(vec![1]));
        assert_eq!(dataset.iter().next().unwrap().0, "x");
    }

    #[test]
    fn test_from_parts_missing_annotations() {
        let mut annotations = HashMap::new();
        annotations.insert("x".to_string(), ann(0));
        let dataset = DetectionDataset::from_parts(
            vec!["a".into()],
            vec![("x".to_string(), ()), ("y".to_string(), ())],
            annotations,
        );
        let missing: Vec<&str> = dataset
            .iter()
            .filter(|(_, _, a)| a.is_none())
            .map(|(n, _, _)| n)
            .collect();
        assert_eq!(missing, vec!["y"]);
        assert!(!dataset.is_empty());
    }
}
