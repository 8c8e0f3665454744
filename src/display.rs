//! Rendering of hits and errors for terminal output.

use std::fmt::Write as _;

use crate::catalog::CategoryRecord;
use crate::errors::SearchError;
use crate::semantic::SearchHit;

/// One line per hit: leaf label with its match percentage, then the path.
pub fn render_hits(hits: &[SearchHit], threshold: f32) -> String {
    if hits.is_empty() {
        return no_match(threshold);
    }

    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} ({}% match)",
            rank + 1,
            hit.record.leaf_label,
            hit.percent()
        );
        let _ = writeln!(out, "   {}", hit.record.full_path);
    }
    out
}

pub fn no_match(threshold: f32) -> String {
    format!(
        "No confident match (no category scored above {}%). Try rephrasing the query.\n",
        (threshold * 100.0).round() as u32
    )
}

/// Message shown to a person for each kind of failure.
pub fn user_message(err: &SearchError) -> String {
    match err {
        SearchError::DataLoad { path, reason } => format!(
            "Could not load the catalog file '{}': {reason}. Check that the file exists and has a 'Full Path' column.",
            path.display()
        ),
        SearchError::ModelUnavailable(reason) => format!(
            "The embedding model is not available right now ({reason}). Please try again in a moment."
        ),
        SearchError::EmptyIndex => {
            "The catalog has no usable categories, so there is nothing to search.".to_string()
        }
        SearchError::Config(reason) => format!("Invalid configuration: {reason}"),
    }
}

pub fn render_catalog(records: &[CategoryRecord]) -> String {
    let mut out = format!("{} categories\n", records.len());
    for record in records {
        let _ = writeln!(
            out,
            "{:<24} {:<32} {}",
            record.group_label, record.leaf_label, record.full_path
        );
    }
    out
}
