//! Workspace tree scanning.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::{ChatError, ChatResult};

/// Kind of a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a workspace scan, relative to the workspace root with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStructureEntry {
    pub kind: EntryKind,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
}

impl FileStructureEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::File,
            relative_path: path.into(),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            relative_path: path.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Lower-cased final path component.
    pub fn base_name(&self) -> String {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// How much of the tree to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Files only (chat-path analysis)
    Quick,
    /// Files and directories (standalone report)
    Full,
}

/// Result of a scan: the entries found and how many unreadable entries were skipped.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub entries: Vec<FileStructureEntry>,
    pub skipped: usize,
}

impl ScanReport {
    pub fn files(&self) -> impl Iterator<Item = &FileStructureEntry> {
        self.entries.iter().filter(|e| e.is_file())
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }

    pub fn has_files(&self) -> bool {
        self.files().next().is_some()
    }
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk the workspace, skipping hidden entries and excluded directories.
///
/// Entries that cannot be read are counted in [`ScanReport::skipped`].
pub fn scan_workspace(root: &Path, config: &ScanConfig, mode: ScanMode) -> ScanReport {
    let mut report = ScanReport::default();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if config.is_hidden(&name) {
                return false;
            }
            !(entry.file_type().is_dir() && config.is_excluded_dir(&name))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.skipped += 1;
                warn!("Skipping unreadable workspace entry: {}", e);
                continue;
            }
        };

        let Some(rel) = relative(root, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            if mode == ScanMode::Full {
                report.entries.push(FileStructureEntry::directory(rel));
            }
        } else if config.is_allowed_file(&entry.file_name().to_string_lossy()) {
            report.entries.push(FileStructureEntry::file(rel));
        }
    }

    report
}

/// Read a workspace file and keep at most `max_chars` characters.
///
/// Truncated excerpts end with `...`.
pub fn read_excerpt(root: &Path, relative_path: &str, max_chars: usize) -> ChatResult<String> {
    let path = root.join(relative_path);
    let content = std::fs::read_to_string(&path).map_err(|source| ChatError::FileRead {
        path: path.clone(),
        source,
    })?;
    Ok(truncate_chars(&content, max_chars))
}

pub(crate) fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}
