//! Dwell aggregation
//!
//! Reconstructs, per post, how long it was visible above its threshold from
//! the `vp_enter` / `vp_exit` pairs of an event log. A post may be visited
//! several times; visits add up.

use crate::event_log::last_finite_ts;
use crate::types::Event;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Dwell totals for one post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDwell {
    /// Total visible time in milliseconds
    pub dwell_ms: f64,
    /// Total visible time rounded to the nearest whole second
    pub dwell_s: f64,
    /// Largest rendered height seen on any visibility event
    pub post_h_px_max: Option<f64>,
    /// `dwell_ms / post_h_px_max`, when the height is known and positive
    pub dwell_ms_per_px: Option<f64>,
}

/// Stateless aggregator over event logs
pub struct DwellAggregator;

impl DwellAggregator {
    /// Compute per-post dwell from events in emission order.
    ///
    /// Events with a non-finite timestamp or without a post are skipped. An
    /// exit with no open enter is ignored. A visit still open when the log
    /// ends is closed at the timestamp of the final well-formed event; this
    /// approximates "visible until the log ends" since no live clock exists
    /// when a stored log is processed.
    pub fn aggregate(events: &[Event]) -> BTreeMap<String, PostDwell> {
        let mut open: HashMap<&str, f64> = HashMap::new();
        let mut total: BTreeMap<&str, f64> = BTreeMap::new();
        let mut height: HashMap<&str, f64> = HashMap::new();

        for event in events {
            if !event.action.is_visibility() {
                continue;
            }
            if !event.ts_ms.is_finite() {
                log::debug!("skipping {} with non-finite timestamp", event.action.as_str());
                continue;
            }
            let Some(post_id) = event.post_key() else {
                log::debug!("skipping {} without post_id", event.action.as_str());
                continue;
            };

            total.entry(post_id).or_insert(0.0);
            if let Some(h) = event.post_h_px.filter(|h| h.is_finite()) {
                let max = height.entry(post_id).or_insert(h);
                if h > *max {
                    *max = h;
                }
            }

            if event.action.is_enter() {
                open.entry(post_id).or_insert(event.ts_ms);
            } else if let Some(t0) = open.remove(post_id) {
                *total.entry(post_id).or_insert(0.0) += (event.ts_ms - t0).max(0.0);
            }
        }

        if !open.is_empty() {
            let end = last_well_formed_ts(events);
            for (post_id, t0) in open {
                let add = end.map_or(0.0, |end| (end - t0).max(0.0));
                *total.entry(post_id).or_insert(0.0) += add;
            }
        }

        total
            .into_iter()
            .map(|(post_id, dwell_ms)| {
                let post_h_px_max = height.get(post_id).copied();
                (post_id.to_string(), PostDwell::new(dwell_ms, post_h_px_max))
            })
            .collect()
    }
}

impl PostDwell {
    fn new(dwell_ms: f64, post_h_px_max: Option<f64>) -> Self {
        let dwell_ms_per_px = post_h_px_max
            .filter(|h| *h > 0.0)
            .map(|h| dwell_ms / h);
        PostDwell {
            dwell_ms,
            dwell_s: ms_to_rounded_seconds(dwell_ms),
            post_h_px_max,
            dwell_ms_per_px,
        }
    }
}

/// Milliseconds to whole seconds, rounded to nearest
pub fn ms_to_rounded_seconds(ms: f64) -> f64 {
    (ms / 1000.0).round()
}

/// Timestamp of the last event that the aggregators accept
fn last_well_formed_ts(events: &[Event]) -> Option<f64> {
    events
        .iter()
        .rev()
        .find(|e| e.is_well_formed())
        .map(|e| e.ts_ms)
        .or_else(|| last_finite_ts(events))
}
