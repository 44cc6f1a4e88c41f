//! Dataset files: train/test splits, prompt templates and request-item batches.

use crate::error::{DatasetError, Result};
use crate::types::{RequestItem, TermRecord};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

fn read_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(DatasetError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(std::fs::read_to_string(path)?)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Load a JSON array of term records.
pub fn load_records(path: &Path) -> Result<Vec<TermRecord>> {
    let text = read_text(path)?;
    let records: Vec<TermRecord> =
        serde_json::from_str(&text).map_err(|e| DatasetError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    debug!(path = %path.display(), count = records.len(), "Loaded records");
    Ok(records)
}

/// Load a test split, rejecting duplicate ids.
pub fn load_test_records(path: &Path) -> Result<Vec<TermRecord>> {
    let records = load_records(path)?;
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.id.as_str()) {
            return Err(DatasetError::DuplicateId {
                id: record.id.clone(),
                source_name: path.display().to_string(),
            }
            .into());
        }
    }
    Ok(records)
}

#[derive(Deserialize)]
struct PromptFile {
    prompt: Option<String>,
}

/// Load the template of a `{"prompt": "..."}` file.
pub fn load_prompt(path: &Path) -> Result<String> {
    let text = read_text(path)?;
    let file: PromptFile = serde_json::from_str(&text).map_err(|e| DatasetError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    file.prompt.ok_or_else(|| {
        DatasetError::MissingPrompt {
            path: path.to_path_buf(),
        }
        .into()
    })
}

/// Read a JSON Lines batch of request items.
///
/// Blank lines are skipped. Two items carrying the same id are rejected.
pub fn read_items_jsonl(path: &Path) -> Result<Vec<RequestItem>> {
    if !path.exists() {
        return Err(DatasetError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: RequestItem =
            serde_json::from_str(&line).map_err(|e| DatasetError::MalformedLine {
                path: path.to_path_buf(),
                line: index + 1,
                message: e.to_string(),
            })?;
        if let Some(id) = &item.id
            && !seen.insert(id.clone())
        {
            return Err(DatasetError::DuplicateId {
                id: id.clone(),
                source_name: path.display().to_string(),
            }
            .into());
        }
        items.push(item);
    }

    debug!(path = %path.display(), count = items.len(), "Loaded request items");
    Ok(items)
}

/// Write request items as JSON Lines, creating parent directories.
pub fn write_items_jsonl(path: &Path, items: &[RequestItem]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    debug!(path = %path.display(), count = items.len(), "Wrote request items");
    Ok(())
}
