use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LabelMapError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid labels file: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Duplicate label '{0}' in label list")]
    Duplicate(String),
    #[error("Label list is empty")]
    Empty,
}

/// The index ↔ label mapping of a trained classifier.
///
/// Built once from the training corpus (labels sorted lexicographically,
/// ids contiguous from 0), persisted as `labels.json` and loaded verbatim at
/// inference time. Inference never re-derives it from label strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelMap {
    /// Collects the distinct labels and sorts them.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Result<Self, LabelMapError> {
        let unique: BTreeSet<&str> = labels.into_iter().collect();
        Self::from_ordered(unique.into_iter().map(String::from).collect())
    }

    /// Keeps the given order as the id assignment.
    pub fn from_ordered(labels: Vec<String>) -> Result<Self, LabelMapError> {
        if labels.is_empty() {
            return Err(LabelMapError::Empty);
        }
        let mut index = HashMap::with_capacity(labels.len());
        for (id, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), id).is_some() {
                return Err(LabelMapError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels, index })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn id(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// `{"0": "add_to_cart", ...}` as stored in an encoder `config.json`.
    pub fn id2label(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .enumerate()
            .map(|(id, label)| (id.to_string(), label.clone()))
            .collect()
    }

    pub fn label2id(&self) -> BTreeMap<String, usize> {
        self.index.iter().map(|(label, id)| (label.clone(), *id)).collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LabelMapError> {
        let json = serde_json::to_string_pretty(&self.labels)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelMapError> {
        let bytes = fs::read(path)?;
        let labels: Vec<String> = serde_json::from_slice(&bytes)?;
        Self::from_ordered(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_contiguous_ids() {
        let map = LabelMap::from_labels(["refine", "greeting", "add_to_cart", "greeting"]).unwrap();
        assert_eq!(map.labels(), &["add_to_cart", "greeting", "refine"]);
        assert_eq!(map.id("add_to_cart"), Some(0));
        assert_eq!(map.id("refine"), Some(2));
        assert_eq!(map.label(1), Some("greeting"));
        assert_eq!(map.label(3), None);
    }

    #[test]
    fn test_config_maps() {
        let map = LabelMap::from_labels(["goodbye", "greeting"]).unwrap();
        assert_eq!(map.id2label()["1"], "greeting");
        assert_eq!(map.label2id()["goodbye"], 0);
    }

    #[test]
    fn test_duplicates_and_empty_rejected() {
        assert!(matches!(
            LabelMap::from_ordered(vec!["a".into(), "a".into()]),
            Err(LabelMapError::Duplicate(_))
        ));
        assert!(matches!(LabelMap::from_ordered(vec![]), Err(LabelMapError::Empty)));
    }
}
