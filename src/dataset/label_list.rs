//! Label-list text files.
//!
//! One entry per line: `<image path>\t<integer label>`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{DefectError, Result};

/// One (image path, label) entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub path: PathBuf,
    pub label: usize,
}

impl LabelEntry {
    pub fn new(path: impl Into<PathBuf>, label: usize) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }
}

/// Parse label-list content. The path is the first tab-separated field and
/// the label the last one; blank lines are skipped.
pub fn parse_label_list(content: &str, source: &Path) -> Result<Vec<LabelEntry>> {
    let mut entries = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split('\t');
        let path = fields.next().unwrap_or_default();
        let label_field = line.rsplit('\t').next().unwrap_or_default();

        let label = label_field.trim().parse::<usize>().map_err(|e| {
            DefectError::Dataset(format!(
                "{}:{}: invalid label '{}': {}",
                source.display(),
                line_no + 1,
                label_field,
                e
            ))
        })?;

        entries.push(LabelEntry::new(path, label));
    }

    Ok(entries)
}

/// Read a label-list file
pub fn read_label_list<P: AsRef<Path>>(path: P) -> Result<Vec<LabelEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DefectError::PathNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let entries = parse_label_list(&content, path)?;
    debug!("Read {} entries from {:?}", entries.len(), path);
    Ok(entries)
}

/// Format one entry as a line, dropping `[`, `]`, `'` and `,`.
pub fn format_entry(entry: &LabelEntry) -> String {
    let line = format!("{}\t{}", entry.path.to_string_lossy(), entry.label);
    line.chars()
        .filter(|c| !matches!(c, '[' | ']' | '\'' | ','))
        .collect()
}

/// Write entries to a label-list file, truncating it
pub fn write_label_list<P: AsRef<Path>>(path: P, entries: &[LabelEntry]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    for entry in entries {
        writeln!(writer, "{}", format_entry(entry))?;
    }
    writer.flush()?;

    debug!("Wrote {} entries to {:?}", entries.len(), path);
    Ok(())
}
