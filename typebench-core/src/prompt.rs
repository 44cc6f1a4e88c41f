//! Building request items from dataset splits and prompt templates.
//!
//! Three item shapes exist:
//! - term typing: the system turn is the dataset template with labels and
//!   few-shot examples filled in, the user turn is the test record;
//! - judge: the user turn lists every reasoner's prediction for one term;
//! - reason: the user turn restates an existing prediction and asks for a justification.

use crate::submit::ReasonRow;
use crate::types::{Prediction, RequestItem, TermRecord};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

pub const NUM_LABELS_PLACEHOLDER: &str = "[NUM_LABELS]";
pub const LABELS_PLACEHOLDER: &str = "[LABELS]";
pub const FEW_SHOT_PLACEHOLDER: &str = "[FIRST_FIVE_DATASET]";

/// Number of train records shown as examples.
pub const FEW_SHOT_COUNT: usize = 5;

/// Distinct first types of the train records, sorted.
///
/// Records without types are skipped.
pub fn extract_labels(train: &[TermRecord]) -> Vec<String> {
    train
        .iter()
        .filter_map(|record| record.types.first().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Quote a string the way a Python `repr` does.
fn py_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Render a record as a Python-style dict, e.g. `{'id': 'A', 'term': 'rain', 'types': ['Process']}`.
pub fn render_record(record: &TermRecord) -> String {
    let mut out = format!("{{'id': {}, 'term': {}", py_str(&record.id), py_str(&record.term));
    if !record.types.is_empty() {
        let types: Vec<String> = record.types.iter().map(|t| py_str(t)).collect();
        out.push_str(&format!(", 'types': [{}]", types.join(", ")));
    }
    out.push('}');
    out
}

/// The user turn of a term-typing item: the record's id and term only.
pub fn render_query(record: &TermRecord) -> String {
    format!("{{'id': {}, 'term': {}}}", py_str(&record.id), py_str(&record.term))
}

fn render_labels(labels: &[String]) -> String {
    format!("- {}", labels.join("\n- "))
}

/// Fill the label placeholders of a template.
fn fill_labels(template: &str, labels: &[String]) -> String {
    template
        .replace(NUM_LABELS_PLACEHOLDER, &labels.len().to_string())
        .replace(LABELS_PLACEHOLDER, &render_labels(labels))
}

/// Fill a term-typing template: label count, label list and few-shot examples.
pub fn term_typing_system_prompt(template: &str, train: &[TermRecord], labels: &[String]) -> String {
    let examples: String = train
        .iter()
        .take(FEW_SHOT_COUNT)
        .map(|record| format!("{}\n", render_record(record)))
        .collect();
    fill_labels(&template.replace(FEW_SHOT_PLACEHOLDER, &examples), labels)
}

/// One term-typing item per test record.
pub fn build_term_typing_items(
    template: &str,
    train: &[TermRecord],
    test: &[TermRecord],
) -> Vec<RequestItem> {
    let labels = extract_labels(train);
    let system = term_typing_system_prompt(template, train, &labels);
    test.iter()
        .map(|record| RequestItem::new(record.id.clone(), system.clone(), render_query(record)))
        .collect()
}

/// One reasoner model's predictions, keyed by id.
#[derive(Debug, Clone)]
pub struct ReasonerResults {
    pub model: String,
    pub predictions: HashMap<String, Prediction>,
}

impl ReasonerResults {
    pub fn new(model: impl Into<String>, predictions: impl IntoIterator<Item = Prediction>) -> Self {
        Self {
            model: model.into(),
            predictions: predictions
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }
}

/// The user turn of a judge item.
pub fn render_judge_query(record: &TermRecord, reasoners: &[ReasonerResults]) -> Option<String> {
    let blocks = reasoners
        .iter()
        .map(|r| {
            r.predictions.get(&record.id).map(|p| {
                format!(
                    "{} prediction:\nType: {}\nReason: {}",
                    r.model,
                    p.types.first().map(String::as_str).unwrap_or(""),
                    p.reason
                )
            })
        })
        .collect::<Option<Vec<_>>>()?;
    Some(format!(
        "id: {}\nterm: {}\n{}",
        record.id,
        record.term,
        blocks.join("\n\n")
    ))
}

/// One judge item per test record that every reasoner predicted.
///
/// Records lacking a prediction from any reasoner are skipped with a warning.
pub fn build_judge_items(
    template: &str,
    labels: &[String],
    test: &[TermRecord],
    reasoners: &[ReasonerResults],
) -> Vec<RequestItem> {
    let system = fill_labels(template, labels);
    let mut items = Vec::with_capacity(test.len());
    for record in test {
        match render_judge_query(record, reasoners) {
            Some(user) => items.push(RequestItem::new(record.id.clone(), system.clone(), user)),
            None => warn!(
                id = %record.id,
                "Skipping item missing predictions from some reasoners"
            ),
        }
    }
    items
}

/// One reason item per CSV row.
pub fn build_reason_items(system_prompt: &str, rows: &[ReasonRow]) -> Vec<RequestItem> {
    rows.iter()
        .map(|row| {
            RequestItem::new(
                row.id.clone(),
                system_prompt,
                format!(
                    "'id': {}, 'term': {}\nYour prediction: 'types': {}",
                    py_str(&row.id),
                    py_str(&row.term),
                    py_str(&row.types)
                ),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, term: &str, types: &[&str]) -> TermRecord {
        TermRecord {
            id: id.to_string(),
            term: term.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn prediction(id: &str, ty: &str, reason: &str) -> Prediction {
        Prediction {
            id: id.to_string(),
            types: vec![ty.to_string()],
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_extract_labels_distinct_sorted() {
        let train = vec![
            record("1", "a", &["Process"]),
            record("2", "b", &["Process", "Event"]),
            record("3", "c", &["Material"]),
            record("4", "d", &[]),
        ];
        assert_eq!(extract_labels(&train), vec!["Material", "Process"]);
    }

    #[test]
    fn test_render_record_python_style() {
        assert_eq!(
            render_record(&record("T1", "sea water", &["Liquid"])),
            "{'id': 'T1', 'term': 'sea water', 'types': ['Liquid']}"
        );
        assert_eq!(
            render_record(&record("T2", "Earth's crust", &[])),
            "{'id': 'T2', 'term': \"Earth's crust\"}"
        );
        assert_eq!(py_str("a'b\"c"), "'a\\'b\"c'");
    }

    #[test]
    fn test_term_typing_prompt_placeholders() {
        let train: Vec<_> = (0..7)
            .map(|i| record(&format!("tr{}", i), &format!("t{}", i), &[if i % 2 == 0 { "A" } else { "B" }]))
            .collect();
        let template = "Choose among [NUM_LABELS]:\n[LABELS]\nExamples:\n[FIRST_FIVE_DATASET]End";
        let labels = extract_labels(&train);
        let system = term_typing_system_prompt(template, &train, &labels);

        assert!(system.starts_with("Choose among 2:\n- A\n- B\nExamples:\n"));
        assert!(system.contains("{'id': 'tr4', 'term': 't4', 'types': ['A']}\nEnd"));
        assert!(!system.contains("tr5"));
    }

    #[test]
    fn test_build_term_typing_items() {
        let train = vec![record("tr", "x", &["Process"])];
        let test = vec![record("A", "rain", &[]), record("B", "snow", &[])];
        let items = build_term_typing_items("[LABELS]", &train, &test);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id.as_deref(), Some("A"));
        assert_eq!(items[0].messages[0].content, "- Process");
        assert_eq!(items[1].user_text(), Some("{'id': 'B', 'term': 'snow'}"));
    }

    #[test]
    fn test_judge_query_format() {
        let reasoners = vec![
            ReasonerResults::new("gpt-4o", vec![prediction("A", "Process", "it happens")]),
            ReasonerResults::new("deepseek-chat", vec![prediction("A", "Event", "it occurs")]),
        ];
        let query = render_judge_query(&record("A", "rain", &[]), &reasoners).unwrap();
        assert_eq!(
            query,
            "id: A\nterm: rain\ngpt-4o prediction:\nType: Process\nReason: it happens\n\n\
             deepseek-chat prediction:\nType: Event\nReason: it occurs"
        );
    }

    #[test]
    fn test_judge_items_skip_incomplete() {
        let reasoners = vec![
            ReasonerResults::new("m1", vec![prediction("A", "X", "r"), prediction("B", "Y", "r")]),
            ReasonerResults::new("m2", vec![prediction("A", "X", "r")]),
        ];
        let test = vec![record("A", "a", &[]), record("B", "b", &[])];
        let labels = vec!["X".to_string(), "Y".to_string()];
        let items = build_judge_items("[NUM_LABELS] labels:\n[LABELS]", &labels, &test, &reasoners);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_deref(), Some("A"));
        assert_eq!(items[0].messages[0].content, "2 labels:\n- X\n- Y");
    }

    #[test]
    fn test_reason_items() {
        let rows = vec![ReasonRow {
            id: "O1".into(),
            term: "assay".into(),
            types: "planned process; assay".into(),
        }];
        let items = build_reason_items("Explain.", &rows);
        assert_eq!(items[0].messages[0].content, "Explain.");
        assert_eq!(
            items[0].user_text(),
            Some("'id': 'O1', 'term': 'assay'\nYour prediction: 'types': 'planned process; assay'")
        );
        assert_eq!(items[0].id.as_deref(), Some("O1"));
    }

    #[test]
    fn test_reason_item_id_with_quote_survives_reload() {
        let rows = vec![ReasonRow {
            id: "M'7".into(),
            term: "Young's modulus".into(),
            types: "quality".into(),
        }];
        let items = build_reason_items("Explain.", &rows);
        assert_eq!(
            items[0].user_text(),
            Some("'id': \"M'7\", 'term': \"Young's modulus\"\nYour prediction: 'types': 'quality'")
        );

        let line = serde_json::to_string(&items[0]).unwrap();
        let reloaded: RequestItem = serde_json::from_str(&line).unwrap();
        assert_eq!(reloaded.id.as_deref(), Some("M'7"));
    }
}
