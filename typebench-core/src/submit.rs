//! Reformatting results: reason-free submission files and the CSV join with
//! test data that feeds the reason stage.

use crate::error::{DatasetError, Result};
use crate::results::{ResultSet, write_pretty_json};
use crate::types::{Prediction, SubmissionRecord, TermRecord};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Separator used when flattening a type list into one CSV cell.
pub const TYPES_SEPARATOR: &str = "; ";

/// One row of a `need_reason_data` CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonRow {
    pub id: String,
    pub term: String,
    pub types: String,
}

/// Drop the reason from every prediction.
pub fn strip_reasons(predictions: &[Prediction]) -> Vec<SubmissionRecord> {
    predictions
        .iter()
        .cloned()
        .map(SubmissionRecord::from)
        .collect()
}

/// Read a result file and write its reason-free form. Returns the record count.
pub fn strip_file(input: &Path, output: &Path) -> Result<usize> {
    let results = ResultSet::read_json(input)?;
    let submission = results.to_submission();
    write_pretty_json(output, &submission)?;
    debug!(input = %input.display(), output = %output.display(), count = submission.len(), "Stripped reasons");
    Ok(submission.len())
}

/// Inner join of test records with results on id, in test order.
pub fn join_with_test(test: &[TermRecord], results: &ResultSet) -> Vec<ReasonRow> {
    let rows: Vec<ReasonRow> = test
        .iter()
        .filter_map(|record| {
            results.get(&record.id).map(|prediction| ReasonRow {
                id: record.id.clone(),
                term: record.term.clone(),
                types: prediction.types.join(TYPES_SEPARATOR),
            })
        })
        .collect();
    if rows.len() < test.len() {
        warn!(
            unmatched = test.len() - rows.len(),
            "Test records without a result were left out of the join"
        );
    }
    rows
}

/// Write rows as CSV with an `id,term,types` header, creating parent directories.
pub fn write_reason_csv(path: &Path, rows: &[ReasonRow]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(["id", "term", "types"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a reason CSV. The header row is skipped and columns are taken by position.
pub fn read_reason_rows(path: &Path) -> Result<Vec<ReasonRow>> {
    if !path.exists() {
        return Err(DatasetError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        match (record.get(0), record.get(1), record.get(2)) {
            (Some(id), Some(term), Some(types)) => rows.push(ReasonRow {
                id: id.to_string(),
                term: term.to_string(),
                types: types.to_string(),
            }),
            _ => {
                return Err(DatasetError::MalformedLine {
                    path: path.to_path_buf(),
                    line: record.position().map(|p| p.line() as usize).unwrap_or(0),
                    message: format!("expected 3 columns, found {}", record.len()),
                }
                .into());
            }
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prediction(id: &str, types: &[&str]) -> Prediction {
        Prediction {
            id: id.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            reason: "because".to_string(),
        }
    }

    fn record(id: &str, term: &str) -> TermRecord {
        TermRecord {
            id: id.to_string(),
            term: term.to_string(),
            types: Vec::new(),
        }
    }

    #[test]
    fn test_strip_reasons() {
        let stripped = strip_reasons(&[prediction("A", &["X", "Y"])]);
        assert_eq!(
            stripped,
            vec![SubmissionRecord {
                id: "A".into(),
                types: vec!["X".into(), "Y".into()]
            }]
        );
    }

    #[test]
    fn test_strip_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out/sub.json");
        ResultSet::from_predictions(vec![prediction("A", &["X"]), prediction("B", &["Y"])])
            .unwrap()
            .write_json(&input)
            .unwrap();

        assert_eq!(strip_file(&input, &output).unwrap(), 2);
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!([{"id": "A", "types": ["X"]}, {"id": "B", "types": ["Y"]}])
        );
    }

    #[test]
    fn test_join_is_inner_and_in_test_order() {
        let test = vec![record("C", "cobalt"), record("A", "argon"), record("B", "boron")];
        let results =
            ResultSet::from_predictions(vec![prediction("A", &["Element", "Gas"]), prediction("C", &["Metal"])])
                .unwrap();
        let rows = join_with_test(&test, &results);
        assert_eq!(
            rows,
            vec![
                ReasonRow {
                    id: "C".into(),
                    term: "cobalt".into(),
                    types: "Metal".into()
                },
                ReasonRow {
                    id: "A".into(),
                    term: "argon".into(),
                    types: "Element; Gas".into()
                },
            ]
        );
    }

    #[test]
    fn test_csv_roundtrip_with_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("need_reason_data/gpt-4o/sweet.csv");
        let rows = vec![
            ReasonRow {
                id: "S1".into(),
                term: "rain, heavy".into(),
                types: "Phenomenon".into(),
            },
            ReasonRow {
                id: "S2".into(),
                term: "\"quoted\" term".into(),
                types: "A; B".into(),
            },
        ];
        write_reason_csv(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,term,types\n"));

        assert_eq!(read_reason_rows(&path).unwrap(), rows);
    }

    #[test]
    fn test_csv_empty_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_reason_csv(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,term,types\n");
        assert!(read_reason_rows(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_short_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "id,term,types\nA,alpha\n").unwrap();
        assert!(read_reason_rows(&path).is_err());
    }
}
