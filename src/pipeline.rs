//! Pipeline orchestration
//!
//! JSON-in / JSON-out entry points used by the CLI and the C ABI: one session
//! to one analytics row, and a roster of stored rows to a summary.

use crate::error::ComputeError;
use crate::roster::{RosterSummarizer, RosterSummary};
use crate::row::{AnalyticsRow, RowBuilder};
use crate::types::Session;

/// Convert a session JSON document into a flat analytics row.
///
/// # Arguments
/// * `session_json` - Session object: ids, `posts` and the ordered `events`
///
/// # Returns
/// The row as a flat JSON object keyed `${post_id}_${field}`
///
/// # Example
/// ```ignore
/// let row = session_to_row(r#"{"participant_id": "P-1", "posts": [{"id": "a"}], "events": []}"#.to_string())?;
/// ```
pub fn session_to_row(session_json: String) -> Result<String, ComputeError> {
    let session = parse_session(&session_json)?;
    let row = RowBuilder::build(&session);
    serde_json::to_string(&row).map_err(|e| ComputeError::EncodingError(e.to_string()))
}

/// Summarize a JSON array of stored rows.
///
/// `null` is accepted and treated as an empty roster.
pub fn roster_to_summary(rows_json: String) -> Result<String, ComputeError> {
    let rows = parse_rows(&rows_json)?;
    let summary = RosterSummarizer::summarize(&rows);
    serde_json::to_string(&summary).map_err(|e| ComputeError::EncodingError(e.to_string()))
}

/// Parse and sanity-check a session document
pub fn parse_session(json: &str) -> Result<Session, ComputeError> {
    let session: Session = serde_json::from_str(json)?;
    if let Some(index) = session.posts.iter().position(|p| p.id.trim().is_empty()) {
        return Err(ComputeError::InvalidSession(format!(
            "post at index {} has an empty id",
            index
        )));
    }
    Ok(session)
}

/// Parse a JSON array of stored rows, or `null`.
///
/// Elements that are not objects are skipped.
pub fn parse_rows(json: &str) -> Result<Vec<AnalyticsRow>, ComputeError> {
    let entries: Option<Vec<serde_json::Value>> = serde_json::from_str(json)?;
    let mut rows = Vec::new();
    for (index, entry) in entries.unwrap_or_default().into_iter().enumerate() {
        match entry.as_object() {
            Some(record) => rows.push(AnalyticsRow::from_record(record)),
            None => log::debug!("skipping roster entry {}: not an object", index),
        }
    }
    Ok(rows)
}

/// Parse stored rows as NDJSON (one record per line)
pub fn parse_rows_ndjson(ndjson: &str) -> Result<Vec<AnalyticsRow>, ComputeError> {
    let mut rows = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<AnalyticsRow>(trimmed) {
            Ok(row) => rows.push(row),
            Err(e) => {
                return Err(ComputeError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(rows)
}

/// Stateful processor that accumulates rows across sessions.
///
/// Use this when sessions arrive one at a time and the roster summary is
/// needed along the way.
#[derive(Debug, Default)]
pub struct RosterProcessor {
    rows: Vec<AnalyticsRow>,
}

impl RosterProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the row of a session JSON document, keep it, and return it
    pub fn process_session(&mut self, session_json: &str) -> Result<String, ComputeError> {
        let session = parse_session(session_json)?;
        let row = RowBuilder::build(&session);
        let json =
            serde_json::to_string(&row).map_err(|e| ComputeError::EncodingError(e.to_string()))?;
        self.rows.push(row);
        Ok(json)
    }

    /// Keep an already built row
    pub fn add_row(&mut self, row: AnalyticsRow) {
        self.rows.push(row);
    }

    pub fn summary(&self) -> RosterSummary {
        RosterSummarizer::summarize(&self.rows)
    }

    pub fn summary_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string(&self.summary())
            .map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    /// Replace the accumulated rows with a stored JSON array
    pub fn load_rows(&mut self, json: &str) -> Result<(), ComputeError> {
        self.rows = parse_rows(json).map_err(|e| ComputeError::ParseError(e.to_string()))?;
        Ok(())
    }

    /// Save the accumulated rows as a JSON array
    pub fn save_rows(&self) -> Result<String, ComputeError> {
        serde_json::to_string(&self.rows).map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    pub fn rows(&self) -> &[AnalyticsRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
