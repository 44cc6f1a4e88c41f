//! Result collation: predictions keyed by id, and their on-disk form.
//!
//! A result file is a pretty-printed JSON array of `{id, types, reason}`.
//! Older tooling sometimes wrote an object whose values are the records, so
//! readers accept both shapes.

use crate::error::{DatasetError, Result};
use crate::types::{Prediction, SubmissionRecord};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// Predictions accumulated during a run, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    entries: Vec<Prediction>,
    positions: HashMap<String, usize>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prediction. A second prediction for the same id is rejected.
    pub fn insert(&mut self, prediction: Prediction) -> std::result::Result<(), DatasetError> {
        if self.positions.contains_key(&prediction.id) {
            return Err(DatasetError::DuplicateId {
                id: prediction.id,
                source_name: "result set".to_string(),
            });
        }
        self.positions
            .insert(prediction.id.clone(), self.entries.len());
        self.entries.push(prediction);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Prediction> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.entries.iter()
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn into_predictions(self) -> Vec<Prediction> {
        self.entries
    }

    /// Reorder entries to follow `order`; ids not listed keep their relative order at the end.
    pub fn sort_by_order<'a>(&mut self, order: impl IntoIterator<Item = &'a str>) {
        let rank: HashMap<&str, usize> = order
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        self.entries
            .sort_by_key(|p| rank.get(p.id.as_str()).copied().unwrap_or(usize::MAX));
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
    }

    /// Build a set from predictions, rejecting duplicate ids.
    pub fn from_predictions(
        predictions: impl IntoIterator<Item = Prediction>,
    ) -> std::result::Result<Self, DatasetError> {
        let mut set = Self::new();
        for prediction in predictions {
            set.insert(prediction)?;
        }
        Ok(set)
    }

    /// Write as a pretty-printed JSON array, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_pretty_json(path, &self.entries)?;
        debug!(path = %path.display(), count = self.len(), "Wrote result set");
        Ok(())
    }

    /// Read a result file written by [`ResultSet::write_json`] (or the object form).
    pub fn read_json(path: &Path) -> Result<Self> {
        let records = read_records(path)?;
        let mut set = Self::new();
        for record in records {
            let prediction: Prediction =
                serde_json::from_value(record).map_err(|e| DatasetError::Malformed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            set.insert(prediction).map_err(|e| match e {
                DatasetError::DuplicateId { id, .. } => DatasetError::DuplicateId {
                    id,
                    source_name: path.display().to_string(),
                },
                other => other,
            })?;
        }
        Ok(set)
    }

    /// Predictions without their reasons.
    pub fn to_submission(&self) -> Vec<SubmissionRecord> {
        self.entries.iter().cloned().map(SubmissionRecord::from).collect()
    }
}

/// Serialize `value` as pretty JSON to `path`, creating parent directories.
pub fn write_pretty_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Read the records of a JSON file that is either an array of records or an
/// object whose values are records.
pub fn read_records(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Err(DatasetError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| DatasetError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, v)| v).filter(Value::is_object).collect()),
        other => Err(DatasetError::Malformed {
            path: path.to_path_buf(),
            message: format!("expected an array or object, found {}", json_kind(&other)),
        }
        .into()),
    }
}

/// The set of ids present in a result or reference file.
///
/// Records without a string `id` are ignored.
pub fn read_ids(path: &Path) -> Result<BTreeSet<String>> {
    Ok(read_records(path)?
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prediction(id: &str, ty: &str) -> Prediction {
        Prediction {
            id: id.to_string(),
            types: vec![ty.to_string()],
            reason: format!("{} looks like a {}", id, ty),
        }
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut set = ResultSet::new();
        set.insert(prediction("A", "Process")).unwrap();
        let err = set.insert(prediction("A", "Material")).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateId { ref id, .. } if id == "A"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("A").unwrap().types, vec!["Process"]);
    }

    #[test]
    fn test_sort_by_order() {
        let mut set =
            ResultSet::from_predictions(vec![prediction("C", "x"), prediction("Z", "x"), prediction("A", "x")])
                .unwrap();
        set.sort_by_order(["A", "B", "C"]);
        let ids: Vec<_> = set.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "Z"]);
        assert_eq!(set.get("Z").unwrap().id, "Z");
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/gpt-4o/sweet_results.json");
        let set = ResultSet::from_predictions(vec![prediction("A", "Process"), prediction("B", "Material")])
            .unwrap();
        set.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n"));

        let back = ResultSet::read_json(&path).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_write_and_read_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        ResultSet::new().write_json(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        assert!(ResultSet::read_json(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.json");
        std::fs::write(
            &path,
            r#"[{"id":"A","types":["x"],"reason":""},{"id":"A","types":["y"],"reason":""}]"#,
        )
        .unwrap();
        let err = ResultSet::read_json(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate id 'A'"));
    }

    #[test]
    fn test_read_ids_from_object_form() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.json");
        std::fs::write(
            &path,
            r#"{"0": {"id": "A", "types": ["x"]}, "1": {"id": "C"}, "meta": 3}"#,
        )
        .unwrap();
        let ids = read_ids(&path).unwrap();
        assert_eq!(ids, BTreeSet::from(["A".to_string(), "C".to_string()]));
    }

    #[test]
    fn test_read_records_missing_file() {
        let err = read_records(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(
            err,
            crate::error::BenchError::Dataset(DatasetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_read_records_rejects_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalar.json");
        std::fs::write(&path, "42").unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn test_to_submission_strips_reason() {
        let set = ResultSet::from_predictions(vec![prediction("A", "Process")]).unwrap();
        let submission = set.to_submission();
        assert_eq!(
            serde_json::to_value(&submission).unwrap(),
            serde_json::json!([{"id": "A", "types": ["Process"]}])
        );
    }
}
