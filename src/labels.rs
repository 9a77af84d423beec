use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};

/// Dense class indices for cluster labels, ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        let classes: Vec<String> = labels
            .iter()
            .map(|label| label.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.is_empty() {
            return Err(anyhow!("Cannot fit a label encoder without labels"));
        }
        let index = classes
            .iter()
            .enumerate()
            .map(|(idx, class)| (class.clone(), idx))
            .collect();
        Ok(Self { classes, index })
    }

    /// Fits on a target column; a missing label is an error.
    pub fn fit_column(labels: &[Option<String>]) -> Result<(Self, Vec<usize>)> {
        let present = labels
            .iter()
            .enumerate()
            .map(|(row, label)| {
                label
                    .as_deref()
                    .ok_or_else(|| anyhow!("Training row {} has no end_cluster", row))
            })
            .collect::<Result<Vec<&str>>>()?;
        let encoder = Self::fit(&present)?;
        let encoded = encoder.encode_all(&present)?;
        Ok((encoder, encoded))
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, label: &str) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("Unknown cluster label {}", label))
    }

    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| self.encode(label.as_ref()))
            .collect()
    }

    pub fn decode(&self, index: usize) -> Result<&str> {
        self.classes
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Class index {} outside {} classes", index, self.len()))
    }
}
