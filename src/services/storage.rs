use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::Serialize;
use uuid::Uuid;

use crate::models::outcome::{OutcomeStatus, ProcessedItem};
use crate::models::work_item::{ItemStatus, WorkItem};
use crate::services::queue::{Results, WorkQueue};

const PAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Load every page image in `dir` as a work item, ordered by file name.
///
/// Files with a page extension whose header is not a known image format are
/// skipped with a warning.
pub fn load_work_items(dir: &Path) -> Result<Vec<WorkItem>, StorageError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_page = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_page {
            paths.push(path);
        }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(&path)?;
        if image::guess_format(&bytes).is_err() {
            tracing::warn!(path = %path.display(), "Skipping file that is not an image");
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        items.push(WorkItem::new(name, bytes));
    }
    Ok(items)
}

/// Output file name for a page: `kor_<stem>.png`.
pub fn output_file_name(item_name: &str) -> String {
    let stem = Path::new(item_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| item_name.to_string());
    format!("kor_{stem}.png")
}

/// Output file name not yet in `taken`: `kor_<stem>.png`, then
/// `kor_<stem>_2.png`, `kor_<stem>_3.png`, ...
fn unique_output_name(item_name: &str, taken: &mut HashSet<String>) -> String {
    let base = output_file_name(item_name);
    if taken.insert(base.clone()) {
        return base;
    }
    let stem = base.trim_end_matches(".png");
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}.png");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Write a produced image as PNG, re-encoding if the model returned another format.
pub fn save_page(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    if image::guess_format(bytes)? == ImageFormat::Png {
        std::fs::write(&path, bytes)?;
    } else {
        let decoded = image::load_from_memory(bytes)?;
        let mut png = Vec::new();
        decoded.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        std::fs::write(&path, png)?;
    }
    Ok(path)
}

/// One line of `results.json`.
#[derive(Debug, Serialize)]
pub struct ReportEntry {
    pub id: Uuid,
    pub name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ReportEntry>,
}

/// Save every produced page and write `results.json` next to them.
///
/// Pages whose names share a stem get numbered file names instead of
/// overwriting each other. A page that fails to save is reported with the save
/// error instead of an output file; the rest of the batch is still written.
/// Items left in `pending` (a cancelled batch) are listed as `pending`.
pub fn export_results(
    dir: &Path,
    results: &Results,
    pending: &WorkQueue,
) -> Result<BatchReport, StorageError> {
    std::fs::create_dir_all(dir)?;
    let mut taken = HashSet::new();
    let mut items: Vec<ReportEntry> = results
        .iter()
        .map(|entry| export_entry(dir, entry, &mut taken))
        .collect();
    items.extend(pending.iter().map(|item| ReportEntry {
        id: item.id,
        name: item.name.clone(),
        status: ItemStatus::Pending,
        outcome: None,
        output_file: None,
        error: None,
        elapsed_ms: 0,
    }));
    let report = BatchReport {
        generated_at: Utc::now(),
        items,
    };

    let json = serde_json::to_vec_pretty(&report)?;
    std::fs::write(dir.join("results.json"), json)?;
    Ok(report)
}

fn export_entry(dir: &Path, entry: &ProcessedItem, taken: &mut HashSet<String>) -> ReportEntry {
    let mut report = ReportEntry {
        id: entry.item.id,
        name: entry.item.name.clone(),
        status: entry.status,
        outcome: entry.outcome.as_ref().map(|o| o.status.clone()),
        output_file: None,
        error: entry.error.clone(),
        elapsed_ms: entry.elapsed_ms,
    };

    if let Some(bytes) = entry.outcome.as_ref().and_then(|o| o.image.as_deref()) {
        let file_name = unique_output_name(&entry.item.name, taken);
        match save_page(dir, &file_name, bytes) {
            Ok(path) => {
                report.output_file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
            }
            Err(e) => {
                tracing::error!(item_id = %entry.item.id, error = %e, "Failed to save page");
                report.error = Some(e.to_string());
            }
        }
    }
    report
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image could not be decoded or encoded: {0}")]
    Image(#[from] image::ImageError),

    #[error("Report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
