//! Core types for the feedtrace pipeline
//!
//! This module defines the data that flows through every stage: the events a
//! participant session produces, the posts of the feed being replayed, and the
//! session that ties them together.

use crate::error::EventValidationError;
use crate::event_log::EventLog;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What happened. Serialized as the snake_case action name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    // Visibility
    VpEnter,
    VpExit,
    /// Legacy name for `vp_enter` found in older logs
    ViewStart,
    /// Legacy name for `vp_exit` found in older logs
    ViewEnd,

    // Interactions
    ReactPick,
    ReactClear,
    TextClamped,
    ExpandText,
    CommentSubmit,
    Share,
    ReportMisinformationClick,

    // Session lifecycle
    ParticipantIdEntered,
    FeedSubmit,
    Scroll,
    SessionStart,
    FeedLoaded,
    TabHidden,
    TabVisible,
    PageHide,

    /// Any action this crate does not interpret, kept verbatim
    #[serde(untagged)]
    Other(String),
}

impl EventAction {
    pub fn as_str(&self) -> &str {
        match self {
            EventAction::VpEnter => "vp_enter",
            EventAction::VpExit => "vp_exit",
            EventAction::ViewStart => "view_start",
            EventAction::ViewEnd => "view_end",
            EventAction::ReactPick => "react_pick",
            EventAction::ReactClear => "react_clear",
            EventAction::TextClamped => "text_clamped",
            EventAction::ExpandText => "expand_text",
            EventAction::CommentSubmit => "comment_submit",
            EventAction::Share => "share",
            EventAction::ReportMisinformationClick => "report_misinformation_click",
            EventAction::ParticipantIdEntered => "participant_id_entered",
            EventAction::FeedSubmit => "feed_submit",
            EventAction::Scroll => "scroll",
            EventAction::SessionStart => "session_start",
            EventAction::FeedLoaded => "feed_loaded",
            EventAction::TabHidden => "tab_hidden",
            EventAction::TabVisible => "tab_visible",
            EventAction::PageHide => "page_hide",
            EventAction::Other(name) => name.as_str(),
        }
    }

    /// Start of a visit (`vp_enter` or legacy `view_start`)
    pub fn is_enter(&self) -> bool {
        matches!(self, EventAction::VpEnter | EventAction::ViewStart)
    }

    /// End of a visit (`vp_exit` or legacy `view_end`)
    pub fn is_exit(&self) -> bool {
        matches!(self, EventAction::VpExit | EventAction::ViewEnd)
    }

    pub fn is_visibility(&self) -> bool {
        self.is_enter() || self.is_exit()
    }

    /// Pure scroll or session-lifecycle markers, which never count as an
    /// interaction for timing purposes.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventAction::ParticipantIdEntered
                | EventAction::FeedSubmit
                | EventAction::Scroll
                | EventAction::SessionStart
                | EventAction::FeedLoaded
                | EventAction::TabHidden
                | EventAction::TabVisible
                | EventAction::PageHide
        )
    }

    /// Actions that are meaningless without a post
    pub fn requires_post(&self) -> bool {
        matches!(
            self,
            EventAction::VpEnter
                | EventAction::VpExit
                | EventAction::ViewStart
                | EventAction::ViewEnd
                | EventAction::ReactPick
                | EventAction::ReactClear
                | EventAction::TextClamped
                | EventAction::ExpandText
                | EventAction::CommentSubmit
                | EventAction::Share
                | EventAction::ReportMisinformationClick
        )
    }
}

/// Geometry captured at a visibility crossing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VisibilitySample {
    /// Exact intersection fraction at the crossing (0-1)
    pub vis_frac: f64,
    /// Rendered post height in pixels
    pub post_h_px: Option<f64>,
    /// Viewport height in pixels
    pub viewport_h_px: Option<f64>,
    /// Document scroll offset in pixels
    pub scroll_y: Option<f64>,
}

/// A single entry of a session's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event action
    pub action: EventAction,
    /// Post the event concerns (absent for session-level events)
    #[serde(
        default,
        deserialize_with = "deserialize_post_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_id: Option<String>,
    /// Wall-clock milliseconds at emission. Numeric strings are accepted;
    /// missing, null or unparseable values load as NaN.
    #[serde(default = "missing_ts", deserialize_with = "deserialize_ts")]
    pub ts_ms: f64,
    /// ISO-8601 rendering of `ts_ms`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_iso: Option<String>,

    // Visibility payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vis_frac: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_h_px: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_h_px: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<f64>,

    // Interaction payload
    /// Reaction type for `react_pick` / `react_clear`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub reaction_type: Option<String>,
    /// Comment text for `comment_submit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Comment length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Any other action-specific keys
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn missing_ts() -> f64 {
    f64::NAN
}

fn deserialize_ts<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let ts = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(ts.unwrap_or(f64::NAN))
}

/// Post ids stored as numbers become strings; other shapes are dropped
fn deserialize_post_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl Event {
    /// Create a session-level event stamped at `ts_ms`
    pub fn new(action: EventAction, ts_ms: f64) -> Self {
        Event {
            action,
            post_id: None,
            ts_ms,
            timestamp_iso: iso_from_ms(ts_ms),
            vis_frac: None,
            post_h_px: None,
            viewport_h_px: None,
            scroll_y: None,
            reaction_type: None,
            text: None,
            length: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Create an event about a post
    pub fn post(action: EventAction, post_id: impl Into<String>, ts_ms: f64) -> Self {
        Event::new(action, ts_ms).for_post(post_id)
    }

    /// Create a visibility event carrying the crossing geometry
    pub fn visibility(
        action: EventAction,
        post_id: impl Into<String>,
        ts_ms: f64,
        sample: VisibilitySample,
    ) -> Self {
        let mut event = Event::post(action, post_id, ts_ms);
        event.vis_frac = Some(sample.vis_frac);
        event.post_h_px = sample.post_h_px;
        event.viewport_h_px = sample.viewport_h_px;
        event.scroll_y = sample.scroll_y;
        event
    }

    pub fn for_post(mut self, post_id: impl Into<String>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn with_reaction(mut self, reaction_type: impl Into<String>) -> Self {
        self.reaction_type = Some(reaction_type.into());
        self
    }

    /// Attach comment text; `length` is its character count
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.length = Some(text.chars().count() as u64);
        self.text = Some(text);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Non-empty post id, if any
    pub fn post_key(&self) -> Option<&str> {
        self.post_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Check the event is usable by the aggregators
    pub fn check(&self) -> Result<(), EventValidationError> {
        if !self.ts_ms.is_finite() {
            return Err(EventValidationError::NonFiniteTimestamp {
                action: self.action.as_str().to_string(),
            });
        }
        if self.action.requires_post() && self.post_key().is_none() {
            return Err(EventValidationError::MissingPostId {
                action: self.action.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.check().is_ok()
    }

    /// ISO timestamp, derived from `ts_ms` when the event carries none
    pub fn iso(&self) -> Option<String> {
        self.timestamp_iso
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| iso_from_ms(self.ts_ms))
    }
}

/// Render epoch milliseconds as RFC 3339 with millisecond precision
pub fn iso_from_ms(ts_ms: f64) -> Option<String> {
    if !ts_ms.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(ts_ms.round() as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A post of the replayed feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Stable post identifier
    pub id: String,
    /// Whether the post renders an image
    #[serde(default, alias = "hasImage")]
    pub has_image: bool,
}

impl Post {
    pub fn new(id: impl Into<String>) -> Self {
        Post {
            id: id.into(),
            has_image: false,
        }
    }

    pub fn with_image(mut self) -> Self {
        self.has_image = true;
        self
    }
}

/// One participant's run through a feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    #[serde(default = "new_session_id")]
    pub session_id: String,
    /// Identifier the participant entered
    #[serde(default)]
    pub participant_id: String,
    /// Feed shown to the participant
    #[serde(default)]
    pub feed_id: String,
    /// Checksum of the feed snapshot
    #[serde(default)]
    pub feed_checksum: String,
    /// Posts in display order
    #[serde(default)]
    pub posts: Vec<Post>,
    /// Ordered event log
    #[serde(default)]
    pub events: EventLog,
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

impl Session {
    /// Open a session when the participant enters their identifier
    pub fn start(
        participant_id: impl Into<String>,
        feed_id: impl Into<String>,
        feed_checksum: impl Into<String>,
        posts: Vec<Post>,
        ts_ms: f64,
    ) -> Self {
        let participant_id = participant_id.into();
        let mut events = EventLog::new();
        events.append(
            Event::new(EventAction::ParticipantIdEntered, ts_ms)
                .with_extra("participant_id", serde_json::Value::from(participant_id.clone())),
        );

        Session {
            session_id: new_session_id(),
            participant_id,
            feed_id: feed_id.into(),
            feed_checksum: feed_checksum.into(),
            posts,
            events,
        }
    }

    /// Append an event to the session log
    pub fn record(&mut self, event: Event) {
        self.events.append(event);
    }

    /// Close the session with a `feed_submit` event
    pub fn submit(&mut self, ts_ms: f64) {
        self.events.append(Event::new(EventAction::FeedSubmit, ts_ms));
    }

    /// Whether the participant submitted the feed
    pub fn is_closed(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.action == EventAction::FeedSubmit)
    }
}
