//! Roster summaries
//!
//! Aggregates stored analytics rows into completion, timing and per-post
//! engagement statistics. Summaries are computed on demand and never stored.

use crate::row::AnalyticsRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Completion counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterCounts {
    pub total: usize,
    pub completed: usize,
    /// `completed / total`, 0 for an empty roster
    pub completion_rate: f64,
}

/// Latency statistics in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterTiming {
    pub avg_ms_enter_to_submit: Option<f64>,
    pub median_ms_enter_to_submit: Option<f64>,
    pub avg_ms_enter_to_last_interaction: Option<f64>,
    pub median_ms_enter_to_last_interaction: Option<f64>,
}

/// Engagement with one post across the roster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub reacted: usize,
    pub expandable: usize,
    pub expanded: usize,
    /// `expanded / expandable`, None when nothing was expandable
    pub expand_rate: Option<f64>,
    pub commented: usize,
    pub shared: usize,
    pub reported: usize,
    pub avg_dwell_seconds: Option<f64>,
}

/// Statistics over a set of analytics rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSummary {
    pub counts: RosterCounts,
    pub timing: RosterTiming,
    pub per_post: BTreeMap<String, PostSummary>,
    /// Record keys that matched no known field
    pub unrecognized_fields: usize,
}

/// Stateless roster aggregator
pub struct RosterSummarizer;

impl RosterSummarizer {
    pub fn summarize(rows: &[AnalyticsRow]) -> RosterSummary {
        let total = rows.len();
        let completed = rows.iter().filter(|r| r.is_completed()).count();
        let completion_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };

        let submit: Vec<f64> = rows.iter().filter_map(|r| r.ms_enter_to_submit).collect();
        let last: Vec<f64> = rows
            .iter()
            .filter_map(|r| r.ms_enter_to_last_interaction)
            .collect();

        let mut per_post: BTreeMap<String, PostSummary> = BTreeMap::new();
        let mut dwell: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

        for row in rows {
            for post in &row.posts {
                let summary = per_post.entry(post.post_id.clone()).or_default();
                summary.reacted += usize::from(post.reacted);
                summary.expandable += usize::from(post.expandable);
                summary.expanded += usize::from(post.expanded);
                summary.commented += usize::from(post.commented);
                summary.shared += usize::from(post.shared);
                summary.reported += usize::from(post.reported_misinfo);

                if let Some(seconds) = post.dwell_seconds() {
                    dwell.entry(post.post_id.as_str()).or_default().push(seconds);
                }
            }
        }

        for (post_id, summary) in per_post.iter_mut() {
            summary.expand_rate = (summary.expandable > 0)
                .then(|| summary.expanded as f64 / summary.expandable as f64);
            summary.avg_dwell_seconds = dwell.get(post_id.as_str()).and_then(|v| mean(v));
        }

        let unrecognized_fields = rows.iter().map(|r| r.unrecognized.len()).sum();
        if unrecognized_fields > 0 {
            log::debug!("{} record keys matched no known field", unrecognized_fields);
        }

        RosterSummary {
            counts: RosterCounts {
                total,
                completed,
                completion_rate,
            },
            timing: RosterTiming {
                avg_ms_enter_to_submit: mean(&submit),
                median_ms_enter_to_submit: median(&submit),
                avg_ms_enter_to_last_interaction: mean(&last),
                median_ms_enter_to_last_interaction: median(&last),
            },
            per_post,
            unrecognized_fields,
        }
    }
}

/// Mean of the finite values
pub fn mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Median of the finite values, averaging the middle pair for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::PostGroup;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rows_from(json: serde_json::Value) -> Vec<AnalyticsRow> {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[5.0]), Some(5.0));
        assert_eq!(median(&[2.0, 4.0]), Some(3.0));
        assert_eq!(median(&[9.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[f64::NAN, 3.0]), Some(3.0));
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
        assert_eq!(mean(&[f64::INFINITY]), None);
    }

    #[test]
    fn test_completion_rate() {
        let rows = rows_from(json!([
            {"session_id": "a", "submitted_at_iso": "2024-05-01T10:00:00.000Z", "ms_enter_to_submit": 1000},
            {"session_id": "b", "submitted_at_iso": "", "ms_enter_to_submit": 3000},
            {"session_id": "c", "submitted_at_iso": "", "ms_enter_to_submit": null}
        ]));

        let summary = RosterSummarizer::summarize(&rows);
        assert_eq!(summary.counts.total, 3);
        assert_eq!(summary.counts.completed, 2);
        assert!((summary.counts.completion_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.timing.avg_ms_enter_to_submit, Some(2000.0));
        assert_eq!(summary.timing.median_ms_enter_to_submit, Some(2000.0));
        assert_eq!(summary.timing.avg_ms_enter_to_last_interaction, None);
    }

    #[test]
    fn test_completion_by_submit_timestamp() {
        let rows = rows_from(json!([
            {"session_id": "a", "submitted_at_iso": "2024-05-01T10:00:00.000Z"},
            {"session_id": "b", "submitted_at_iso": "2024-05-01T10:05:00.000Z"},
            {"session_id": "c", "submitted_at_iso": ""}
        ]));

        let counts = RosterSummarizer::summarize(&rows).counts;
        assert_eq!(counts.completed, 2);
        assert!((counts.completion_rate - 0.667).abs() < 0.001);
    }

    #[test]
    fn test_empty_roster() {
        let summary = RosterSummarizer::summarize(&[]);
        assert_eq!(summary, RosterSummary::default());
        assert_eq!(summary.counts.completion_rate, 0.0);
    }

    #[test]
    fn test_per_post_union_across_snapshots() {
        let rows = rows_from(json!([
            {
                "session_id": "a",
                "p1_reacted": 1, "p1_expandable": 1, "p1_expanded": 1, "p1_dwell_s": 4,
                "p2_shared": "1", "p2_expandable": 0, "p2_dwell_s": ""
            },
            {
                "session_id": "b",
                "p1_reacted": 0, "p1_expandable": "true", "p1_expanded": 0, "p1_dwell_s": 2,
                "p3_reported_misinfo": true, "p3_dwell_ms": 1500
            }
        ]));

        let summary = RosterSummarizer::summarize(&rows);
        assert_eq!(summary.per_post.len(), 3);

        let p1 = &summary.per_post["p1"];
        assert_eq!(p1.reacted, 1);
        assert_eq!(p1.expandable, 2);
        assert_eq!(p1.expanded, 1);
        assert_eq!(p1.expand_rate, Some(0.5));
        assert_eq!(p1.avg_dwell_seconds, Some(3.0));

        let p2 = &summary.per_post["p2"];
        assert_eq!(p2.shared, 1);
        assert_eq!(p2.expand_rate, None);
        assert_eq!(p2.avg_dwell_seconds, None);

        assert_eq!(summary.per_post["p3"].reported, 1);
        assert_eq!(summary.per_post["p3"].avg_dwell_seconds, Some(1.5));
    }

    #[test]
    fn test_any_post_field_registers_the_post() {
        let rows = rows_from(json!([
            {"session_id": "a", "pX_dwell_s": 7},
            {"session_id": "b", "pY_comment_texts": "ok"}
        ]));
        let summary = RosterSummarizer::summarize(&rows);
        assert_eq!(summary.per_post.len(), 2);
        assert_eq!(summary.per_post["pX"].avg_dwell_seconds, Some(7.0));
        assert_eq!(summary.per_post["pX"].reacted, 0);
        assert_eq!(summary.per_post["pY"].commented, 0);
    }

    #[test]
    fn test_unrecognized_fields_counted() {
        let rows = rows_from(json!([
            {"session_id": "a", "browser": "firefox", "_shared": 1, "p1_shared": 1}
        ]));
        let summary = RosterSummarizer::summarize(&rows);
        assert_eq!(summary.unrecognized_fields, 2);
        assert_eq!(summary.per_post["p1"].shared, 1);
    }

    #[test]
    fn test_summary_from_built_rows() {
        let mut row = AnalyticsRow {
            ms_enter_to_submit: Some(900.0),
            ms_enter_to_last_interaction: Some(400.0),
            ..Default::default()
        };
        row.posts.push(PostGroup {
            commented: true,
            dwell_s: Some(0.0),
            ..PostGroup::new("x")
        });

        let summary = RosterSummarizer::summarize(&[row]);
        assert_eq!(summary.counts.completed, 1);
        assert_eq!(summary.timing.median_ms_enter_to_last_interaction, Some(400.0));
        assert_eq!(summary.per_post["x"].commented, 1);
        assert_eq!(summary.per_post["x"].avg_dwell_seconds, Some(0.0));
    }

    #[test]
    fn test_summary_keys_are_camel_case() {
        let value = serde_json::to_value(RosterSummarizer::summarize(&[])).unwrap();
        assert!(value["counts"].get("completionRate").is_some());
        assert!(value["timing"].get("medianMsEnterToSubmit").is_some());
        assert!(value.get("perPost").is_some());
        assert!(value.get("unrecognizedFields").is_some());
    }
}
