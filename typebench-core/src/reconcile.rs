//! Reconciliation: which reference ids have no result, and which request
//! items would produce them on a re-run.

use crate::error::Result;
use crate::results::write_pretty_json;
use crate::types::RequestItem;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Matches `id: X`, `'id': 'X'` and `"id": "X"`; the id is in whichever group matched.
static EMBEDDED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:['"]id['"]|\bid)\s*:\s*(?:'([^']*)'|"([^"]*)"|([^\s,'"}\]]+))"#)
        .expect("embedded id pattern is valid")
});

/// First id embedded in a prompt text, if any.
pub fn extract_embedded_id(text: &str) -> Option<String> {
    embedded_ids(text).next()
}

/// Whether `text` embeds exactly `id` (not merely an id starting with it).
pub fn contains_embedded_id(text: &str, id: &str) -> bool {
    embedded_ids(text).any(|found| found == id)
}

fn embedded_ids(text: &str) -> impl Iterator<Item = String> + '_ {
    EMBEDDED_ID.captures_iter(text).filter_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim().to_string())
            .filter(|id| !id.is_empty())
    })
}

/// Reference ids with no result: `reference - results`.
pub fn missing_ids(reference: &BTreeSet<String>, results: &BTreeSet<String>) -> BTreeSet<String> {
    reference.difference(results).cloned().collect()
}

/// A missing id together with the request item that asks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingEntry {
    pub id: String,
    pub prompt: RequestItem,
}

/// Find the request item for each missing id.
///
/// Items are matched on their structured id first; items whose id could not
/// be derived are searched by text. Ids with no item are left out.
pub fn locate_items(missing: &BTreeSet<String>, items: &[RequestItem]) -> Vec<MissingEntry> {
    let by_id: HashMap<&str, &RequestItem> = items
        .iter()
        .filter_map(|item| item.id.as_deref().map(|id| (id, item)))
        .collect();

    let mut located = Vec::new();
    for id in missing {
        let found = by_id.get(id.as_str()).copied().or_else(|| {
            items.iter().find(|item| {
                item.id.is_none()
                    && item
                        .messages
                        .iter()
                        .any(|m| m.role == crate::types::Role::User && contains_embedded_id(&m.content, id))
            })
        });
        match found {
            Some(item) => located.push(MissingEntry {
                id: id.clone(),
                prompt: item.clone(),
            }),
            None => warn!(id = %id, "No request item found for missing id"),
        }
    }
    located
}

/// Counts describing a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingSummary {
    pub total_reference_ids: usize,
    pub total_result_ids: usize,
    pub total_missing_ids: usize,
    pub missing_ids: Vec<String>,
    pub missing_prompts_found: usize,
}

/// The missing-data report written by the `missing` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingReport {
    pub missing_in_results: Vec<MissingEntry>,
    pub summary: MissingSummary,
    pub generated_at: DateTime<Utc>,
}

impl MissingReport {
    /// Reconcile `items` and `result_ids` against `reference_ids`.
    pub fn build(
        items: &[RequestItem],
        result_ids: &BTreeSet<String>,
        reference_ids: &BTreeSet<String>,
    ) -> Self {
        let missing = missing_ids(reference_ids, result_ids);
        let located = locate_items(&missing, items);
        info!(
            reference = reference_ids.len(),
            results = result_ids.len(),
            missing = missing.len(),
            located = located.len(),
            "Reconciled results against reference"
        );
        Self {
            summary: MissingSummary {
                total_reference_ids: reference_ids.len(),
                total_result_ids: result_ids.len(),
                total_missing_ids: missing.len(),
                missing_ids: missing.into_iter().collect(),
                missing_prompts_found: located.len(),
            },
            missing_in_results: located,
            generated_at: Utc::now(),
        }
    }

    /// The located items, ready to be dispatched again.
    pub fn prompts(&self) -> Vec<RequestItem> {
        self.missing_in_results
            .iter()
            .map(|entry| entry.prompt.clone())
            .collect()
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_pretty_json(path, self)
    }

    /// Write the located items as JSON Lines, one message array per line.
    pub fn write_prompts_jsonl(&self, path: &Path) -> Result<()> {
        crate::dataset::write_items_jsonl(path, &self.prompts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_judge_style() {
        assert_eq!(
            extract_embedded_id("id: SW-12\nterm: rain\n").as_deref(),
            Some("SW-12")
        );
    }

    #[test]
    fn test_extract_python_dict_style() {
        assert_eq!(
            extract_embedded_id("{'id': 'MO_77', 'term': 'steel'}").as_deref(),
            Some("MO_77")
        );
        assert_eq!(
            extract_embedded_id("'id': 'OB.1', 'term': 'assay'\nYour prediction: 'types': 'x'")
                .as_deref(),
            Some("OB.1")
        );
    }

    #[test]
    fn test_extract_json_style() {
        assert_eq!(
            extract_embedded_id(r#"{"id": "X9", "term": "ice"}"#).as_deref(),
            Some("X9")
        );
    }

    #[test]
    fn test_extract_ignores_words_ending_in_id() {
        assert_eq!(extract_embedded_id("valid: yes\nfluid: water"), None);
    }

    #[test]
    fn test_contains_requires_whole_id() {
        let text = "id: T10\nterm: x";
        assert!(contains_embedded_id(text, "T10"));
        assert!(!contains_embedded_id(text, "T1"));
    }

    #[test]
    fn test_missing_ids_basic() {
        let missing = missing_ids(&ids(&["A", "B", "C"]), &ids(&["A", "C"]));
        assert_eq!(missing, ids(&["B"]));
    }

    #[test]
    fn test_missing_ids_covered() {
        assert!(missing_ids(&ids(&["A", "B"]), &ids(&["B", "A", "Z"])).is_empty());
    }

    #[test]
    fn test_locate_by_structured_id_and_text_fallback() {
        let structured = RequestItem::new("A", "sys", "{'id': 'A', 'term': 'a'}");
        let legacy = RequestItem {
            id: None,
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::user("preamble\nid: B\nterm: b"),
            ],
        };
        let located = locate_items(&ids(&["A", "B", "C"]), &[structured.clone(), legacy.clone()]);
        assert_eq!(located.len(), 2);
        assert_eq!(located[0].id, "A");
        assert_eq!(located[0].prompt, structured);
        assert_eq!(located[1].id, "B");
        assert_eq!(located[1].prompt, legacy);
    }

    #[test]
    fn test_report_summary_and_shape() {
        let items = vec![
            RequestItem::new("A", "sys", "id: A\nterm: a\n"),
            RequestItem::new("B", "sys", "id: B\nterm: b\n"),
        ];
        let report = MissingReport::build(&items, &ids(&["A"]), &ids(&["A", "B", "C"]));
        assert_eq!(report.summary.total_reference_ids, 3);
        assert_eq!(report.summary.total_result_ids, 1);
        assert_eq!(report.summary.total_missing_ids, 2);
        assert_eq!(report.summary.missing_ids, vec!["B", "C"]);
        assert_eq!(report.summary.missing_prompts_found, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["missing_in_results"][0]["id"], "B");
        assert_eq!(json["missing_in_results"][0]["prompt"][1]["role"], "user");
        assert!(json["generated_at"].is_string());
    }

    #[test]
    fn test_write_prompts_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![RequestItem::new("B", "sys", "id: B\nterm: b\n")];
        let report = MissingReport::build(&items, &ids(&[]), &ids(&["B"]));
        let path = dir.path().join("missing_prompts.jsonl");
        report.write_prompts_jsonl(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        let back: RequestItem = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(back.id.as_deref(), Some("B"));
    }
}
