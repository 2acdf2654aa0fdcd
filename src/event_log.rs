//! Append-only session event log
//!
//! Every producer (the viewport tracker, interaction handlers) appends to one
//! session-scoped log. The log is the sole input of dwell aggregation and row
//! building, and is what gets flushed to persistence.

use crate::error::{ComputeError, EventValidationError};
use crate::types::{iso_from_ms, Event};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Ordered sequence of events for one participant session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<Event>,
}

/// Stored logs are read entry by entry: an entry that is not a usable event
/// is dropped and the rest of the log survives.
impl<'de> Deserialize<'de> for EventLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
        let mut events = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<Event>(entry) {
                Ok(event) => events.push(event),
                Err(e) => log::debug!("dropping event {}: {}", index, e),
            }
        }
        Ok(EventLog { events })
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap events that were already recorded, in emission order
    pub fn from_events(events: Vec<Event>) -> Self {
        EventLog { events }
    }

    /// Append an event, filling in `timestamp_iso` when it is missing
    pub fn append(&mut self, mut event: Event) {
        if event.timestamp_iso.is_none() {
            event.timestamp_iso = iso_from_ms(event.ts_ms);
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Timestamp of the last event with a finite timestamp
    pub fn last_ts(&self) -> Option<f64> {
        last_finite_ts(&self.events)
    }

    /// Parse a JSON array of events
    pub fn parse_array(json: &str) -> Result<Self, ComputeError> {
        let events: Vec<Event> = serde_json::from_str(json)?;
        Ok(EventLog::from_events(events))
    }

    /// Parse NDJSON (one event per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<Self, ComputeError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(EventLog::from_events(events))
    }

    /// Serialize as NDJSON, one event per line
    pub fn to_ndjson(&self) -> Result<String, ComputeError> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Report every event the aggregators would skip, plus ordering problems.
    ///
    /// Out-of-order timestamps are reported but the events are still used.
    pub fn validate(&self) -> Vec<EventIssue> {
        let mut issues = Vec::new();
        let mut previous: Option<f64> = None;

        for (index, event) in self.events.iter().enumerate() {
            if let Err(error) = event.check() {
                issues.push(EventIssue { index, error });
                continue;
            }
            if let Some(prev) = previous {
                if event.ts_ms < prev {
                    issues.push(EventIssue {
                        index,
                        error: EventValidationError::OutOfOrder {
                            ts_ms: event.ts_ms,
                            previous_ms: prev,
                        },
                    });
                }
            }
            previous = Some(event.ts_ms);
        }

        issues
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// A problem with one event of a log
#[derive(Debug, Clone, PartialEq)]
pub struct EventIssue {
    pub index: usize,
    pub error: EventValidationError,
}

pub(crate) fn last_finite_ts(events: &[Event]) -> Option<f64> {
    events
        .iter()
        .rev()
        .map(|e| e.ts_ms)
        .find(|ts| ts.is_finite())
}

/// Destination for emitted events
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for EventLog {
    fn emit(&mut self, event: Event) {
        self.append(event);
    }
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, event: Event) {
        (**self).emit(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for Rc<RefCell<T>> {
    fn emit(&mut self, event: Event) {
        self.borrow_mut().emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventAction;

    #[test]
    fn test_append_fills_iso_timestamp() {
        let mut log = EventLog::new();
        let mut event = Event::new(EventAction::FeedSubmit, 1000.0);
        event.timestamp_iso = None;
        log.append(event);

        assert_eq!(
            log.events()[0].timestamp_iso.as_deref(),
            Some("1970-01-01T00:00:01.000Z")
        );
    }

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"
{"action": "participant_id_entered", "ts_ms": 0}
{"action": "vp_enter", "post_id": "p1", "ts_ms": 100, "vis_frac": 0.82}

{"action": "feed_submit", "ts_ms": 900}
"#;
        let log = EventLog::parse_ndjson(ndjson).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.events()[1].vis_frac, Some(0.82));
        assert_eq!(log.last_ts(), Some(900.0));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let err = EventLog::parse_ndjson("{\"action\": \"share\", \"ts_ms\": 1}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array_and_ndjson_output() {
        let log = EventLog::parse_array(r#"[{"action": "scroll", "ts_ms": 5}]"#).unwrap();
        let ndjson = log.to_ndjson().unwrap();
        assert_eq!(ndjson.lines().count(), 1);
        assert!(ndjson.contains("\"scroll\""));
    }

    #[test]
    fn test_validate_collects_issues() {
        let log = EventLog::from_events(vec![
            Event::new(EventAction::ParticipantIdEntered, 100.0),
            Event::new(EventAction::Share, 150.0),
            Event::post(EventAction::VpEnter, "p1", f64::NAN),
            Event::post(EventAction::VpExit, "p1", 50.0),
        ]);

        let issues = log.validate();
        assert_eq!(issues.len(), 3);
        assert!(matches!(
            issues[0].error,
            EventValidationError::MissingPostId { .. }
        ));
        assert_eq!(issues[1].index, 2);
        assert!(matches!(
            issues[2].error,
            EventValidationError::OutOfOrder { previous_ms, .. } if previous_ms == 100.0
        ));
    }

    #[test]
    fn test_deserialize_drops_unusable_entries() {
        let json = r#"[
            {"action": "participant_id_entered", "ts_ms": 0},
            {"post_id": "a", "ts_ms": 5},
            null,
            {"action": "share", "post_id": "a", "ts_ms": "oops"},
            {"action": "react_pick", "post_id": 7, "type": "like", "ts_ms": "10"},
            {"action": "feed_submit", "ts_ms": 600}
        ]"#;

        let log: EventLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.len(), 4);
        assert!(log.events()[1].ts_ms.is_nan());
        assert_eq!(log.events()[2].post_key(), Some("7"));
        assert_eq!(log.events()[2].ts_ms, 10.0);
        assert_eq!(log.validate().len(), 1);

        let log: EventLog = serde_json::from_str("null").unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_last_ts_skips_non_finite_tail() {
        let log = EventLog::from_events(vec![
            Event::new(EventAction::Scroll, 10.0),
            Event::new(EventAction::Scroll, f64::NAN),
        ]);
        assert_eq!(log.last_ts(), Some(10.0));
    }

    #[test]
    fn test_shared_sink() {
        let shared = Rc::new(RefCell::new(EventLog::new()));
        let mut sink = Rc::clone(&shared);
        sink.emit(Event::new(EventAction::Scroll, 1.0));
        assert_eq!(shared.borrow().len(), 1);
    }
}
