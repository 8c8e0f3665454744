//! Catalog loading from CSV.
//!
//! One row per category. The header is matched against a fixed schema:
//! - `Full Path` (required): the hierarchy, e.g. `Mobility > Walking > Rollators`
//! - `Last Level` (optional): the leaf label
//! - `Care Group` (optional): the top-level group label
//!
//! Missing optional columns, or empty cells in them, are derived from the
//! path by splitting on [`PATH_DELIMITER`].

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::errors::{SearchError, SearchResult};

/// Separator between hierarchy levels in a path
pub const PATH_DELIMITER: char = '>';

const PATH_ALIASES: [&str; 3] = ["full path", "path", "category path"];
const LEAF_ALIASES: [&str; 4] = ["last level", "leaf", "item", "leaf label"];
const GROUP_ALIASES: [&str; 4] = ["care group", "group", "main group", "group label"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRecord {
    pub full_path: String,
    pub leaf_label: String,
    pub group_label: String,
}

impl CategoryRecord {
    /// Build a record from a path alone, deriving both labels.
    pub fn from_path(full_path: &str) -> Self {
        Self::with_labels(full_path, None, None)
    }

    fn with_labels(full_path: &str, leaf: Option<&str>, group: Option<&str>) -> Self {
        let full_path = full_path.trim();
        let leaf_label = leaf
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_leaf(full_path));
        let group_label = group
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_group(full_path));

        Self {
            full_path: full_path.to_string(),
            leaf_label,
            group_label,
        }
    }
}

fn segments(full_path: &str) -> impl DoubleEndedIterator<Item = &str> {
    full_path
        .split(PATH_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn derive_leaf(full_path: &str) -> String {
    segments(full_path)
        .next_back()
        .unwrap_or(full_path)
        .to_string()
}

fn derive_group(full_path: &str) -> String {
    segments(full_path).next().unwrap_or(full_path).to_string()
}

/// The loaded, immutable set of records.
#[derive(Debug, Clone)]
pub struct Catalog {
    records: Vec<CategoryRecord>,
    source: PathBuf,
}

impl Catalog {
    pub fn new(records: Vec<CategoryRecord>, source: impl Into<PathBuf>) -> Self {
        Self {
            records,
            source: source.into(),
        }
    }

    pub fn records(&self) -> &[CategoryRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CategoryRecord> {
        self.records
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Resolved header positions.
#[derive(Debug, PartialEq)]
struct Columns {
    path: usize,
    leaf: Option<usize>,
    group: Option<usize>,
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

fn resolve_columns(headers: &csv::StringRecord) -> Option<Columns> {
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();

    let path = find_column(&normalized, &PATH_ALIASES)?;
    Some(Columns {
        path,
        leaf: find_column(&normalized, &LEAF_ALIASES),
        group: find_column(&normalized, &GROUP_ALIASES),
    })
}

/// Load the catalog at `path`.
///
/// Fails with [`SearchError::DataLoad`] when the file is missing, unreadable,
/// malformed, or has no path column. An empty catalog is not an error here.
pub fn load(path: &Path) -> SearchResult<Catalog> {
    if let Err(err) = std::fs::metadata(path) {
        let reason = match err.kind() {
            ErrorKind::NotFound => "file not found".to_string(),
            _ => err.to_string(),
        };
        return Err(SearchError::data_load(path, reason));
    }

    let now = Instant::now();
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| SearchError::data_load(path, e.to_string()))?;

    let headers = csv_reader
        .headers()
        .map_err(|e| SearchError::data_load(path, e.to_string()))?
        .clone();

    let columns = resolve_columns(&headers).ok_or_else(|| {
        let found = headers.iter().collect::<Vec<_>>().join(", ");
        SearchError::data_load(
            path,
            format!("no 'Full Path' column (found headers: [{found}])"),
        )
    })?;

    if columns.leaf.is_none() || columns.group.is_none() {
        log::debug!("catalog has no leaf/group columns, deriving labels from paths");
    }

    let mut records = vec![];
    let mut seen = HashSet::new();
    for (row, record) in csv_reader.records().enumerate() {
        // header is line 1
        let line = row + 2;
        let record = record.map_err(|e| SearchError::data_load(path, e.to_string()))?;

        let full_path = record.get(columns.path).unwrap_or_default();
        if full_path.trim().is_empty() {
            log::warn!("skipping catalog line {line}: empty path");
            continue;
        }

        let category = CategoryRecord::with_labels(
            full_path,
            columns.leaf.and_then(|i| record.get(i)),
            columns.group.and_then(|i| record.get(i)),
        );

        if !seen.insert(category.full_path.clone()) {
            log::warn!("duplicate catalog path at line {line}: {}", category.full_path);
        }

        records.push(category);
    }

    log::info!(
        "loaded {} catalog records from {} in {}ms",
        records.len(),
        path.display(),
        now.elapsed().as_micros() as f64 / 1000.0
    );

    Ok(Catalog::new(records, path))
}
