//! Analytics rows
//!
//! Flattens one session's event log into a single persistence-ready record:
//! global timing fields plus one fixed field group per post of the feed.
//!
//! Per-post fields are keyed `${post_id}_${field}` in the flat record. Stored
//! records are read back through the same schema (`AnalyticsRow::from_record`)
//! so that rows written against different feed snapshots can be aggregated.

use crate::dwell::DwellAggregator;
use crate::types::{iso_from_ms, Event, EventAction, Session};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Global (non per-post) keys of a flat record
pub const GLOBAL_FIELDS: [&str; 9] = [
    "session_id",
    "participant_id",
    "feed_id",
    "feed_checksum",
    "entered_at_iso",
    "submitted_at_iso",
    "last_interaction_at_iso",
    "ms_enter_to_submit",
    "ms_enter_to_last_interaction",
];

/// Per-post field suffixes written for every post
pub const POST_FIELDS: [&str; 9] = [
    "reacted",
    "reaction_type",
    "expandable",
    "expanded",
    "commented",
    "comment_texts",
    "shared",
    "reported_misinfo",
    "dwell_s",
];

/// Extra per-post suffix accepted on stored rows
const LEGACY_DWELL_MS: &str = "dwell_ms";

/// Interaction fields of one post within a row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostGroup {
    pub post_id: String,
    pub reacted: bool,
    /// Current reaction, empty when none
    pub reaction_type: String,
    /// Text was measured as overflowing
    pub expandable: bool,
    /// Viewer expanded the text
    pub expanded: bool,
    pub commented: bool,
    /// Most recent comment text
    pub comment_texts: String,
    pub shared: bool,
    pub reported_misinfo: bool,
    /// Dwell in whole seconds
    pub dwell_s: Option<f64>,
    /// Dwell in milliseconds, only found on stored rows that recorded it
    pub dwell_ms: Option<f64>,
}

impl PostGroup {
    pub fn new(post_id: impl Into<String>) -> Self {
        PostGroup {
            post_id: post_id.into(),
            ..Default::default()
        }
    }

    /// Dwell in seconds from whichever dwell field is present
    pub fn dwell_seconds(&self) -> Option<f64> {
        self.dwell_s
            .or_else(|| self.dwell_ms.map(|ms| ms / 1000.0))
    }
}

/// One flattened record per participant session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsRow {
    pub session_id: String,
    pub participant_id: String,
    pub feed_id: String,
    pub feed_checksum: String,
    pub entered_at_iso: Option<String>,
    pub submitted_at_iso: Option<String>,
    pub last_interaction_at_iso: Option<String>,
    pub ms_enter_to_submit: Option<f64>,
    pub ms_enter_to_last_interaction: Option<f64>,
    /// One group per post
    pub posts: Vec<PostGroup>,
    /// Keys of a stored record that belong to no known field
    pub unrecognized: BTreeMap<String, Value>,
}

impl AnalyticsRow {
    /// Whether the session reached submission.
    ///
    /// Either a submit timestamp or a finite submit latency counts.
    pub fn is_completed(&self) -> bool {
        self.submitted_at_iso
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
            || self.ms_enter_to_submit.is_some_and(f64::is_finite)
    }

    pub fn post(&self, post_id: &str) -> Option<&PostGroup> {
        self.posts.iter().find(|p| p.post_id == post_id)
    }

    /// Flatten into a `${post_id}_${field}` keyed record
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("session_id".into(), Value::from(self.session_id.clone()));
        record.insert("participant_id".into(), Value::from(self.participant_id.clone()));
        record.insert("feed_id".into(), Value::from(self.feed_id.clone()));
        record.insert("feed_checksum".into(), Value::from(self.feed_checksum.clone()));
        record.insert("entered_at_iso".into(), text_value(&self.entered_at_iso));
        record.insert("submitted_at_iso".into(), text_value(&self.submitted_at_iso));
        record.insert(
            "last_interaction_at_iso".into(),
            text_value(&self.last_interaction_at_iso),
        );
        record.insert(
            "ms_enter_to_submit".into(),
            self.ms_enter_to_submit.map_or(Value::Null, number_value),
        );
        record.insert(
            "ms_enter_to_last_interaction".into(),
            self.ms_enter_to_last_interaction
                .map_or(Value::Null, number_value),
        );

        for post in &self.posts {
            let key = |field: &str| format!("{}_{}", post.post_id, field);
            record.insert(key("reacted"), flag_value(post.reacted));
            record.insert(key("reaction_type"), Value::from(post.reaction_type.clone()));
            record.insert(key("expandable"), flag_value(post.expandable));
            record.insert(key("expanded"), flag_value(post.expanded));
            record.insert(key("commented"), flag_value(post.commented));
            record.insert(key("comment_texts"), Value::from(post.comment_texts.clone()));
            record.insert(key("shared"), flag_value(post.shared));
            record.insert(key("reported_misinfo"), flag_value(post.reported_misinfo));
            record.insert(
                key("dwell_s"),
                post.dwell_s.map_or(Value::from(""), number_value),
            );
            if let Some(ms) = post.dwell_ms {
                record.insert(key(LEGACY_DWELL_MS), number_value(ms));
            }
        }

        for (key, value) in &self.unrecognized {
            record.entry(key.clone()).or_insert_with(|| value.clone());
        }

        record
    }

    /// Read a stored flat record.
    ///
    /// Tolerant of missing and extra keys: absent fields keep their defaults
    /// and keys that match neither a global field nor `<post>_<field>` land in
    /// `unrecognized`. Flags accept booleans, numbers and "1"/"true" strings.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let mut row = AnalyticsRow::default();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (key, value) in record {
            match key.as_str() {
                "session_id" => row.session_id = value_text(value),
                "participant_id" => row.participant_id = value_text(value),
                "feed_id" => row.feed_id = value_text(value),
                "feed_checksum" => row.feed_checksum = value_text(value),
                "entered_at_iso" => row.entered_at_iso = value_opt_text(value),
                "submitted_at_iso" => row.submitted_at_iso = value_opt_text(value),
                "last_interaction_at_iso" => row.last_interaction_at_iso = value_opt_text(value),
                "ms_enter_to_submit" => row.ms_enter_to_submit = value_number(value),
                "ms_enter_to_last_interaction" => {
                    row.ms_enter_to_last_interaction = value_number(value)
                }
                _ => match split_post_key(key) {
                    Some((post_id, field)) => {
                        let slot = *index.entry(post_id.to_string()).or_insert_with(|| {
                            row.posts.push(PostGroup::new(post_id));
                            row.posts.len() - 1
                        });
                        apply_post_field(&mut row.posts[slot], field, value);
                    }
                    None => {
                        row.unrecognized.insert(key.clone(), value.clone());
                    }
                },
            }
        }

        row
    }
}

impl Serialize for AnalyticsRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnalyticsRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = Map::deserialize(deserializer)?;
        Ok(AnalyticsRow::from_record(&record))
    }
}

/// Split `<post>_<field>` on the longest known field suffix
fn split_post_key(key: &str) -> Option<(&str, &'static str)> {
    let mut fields: Vec<&'static str> = POST_FIELDS.to_vec();
    fields.push(LEGACY_DWELL_MS);
    fields.sort_by_key(|f| std::cmp::Reverse(f.len()));

    fields.into_iter().find_map(|field| {
        let post_id = key.strip_suffix(field)?.strip_suffix('_')?;
        if post_id.is_empty() {
            None
        } else {
            Some((post_id, field))
        }
    })
}

fn apply_post_field(post: &mut PostGroup, field: &str, value: &Value) {
    match field {
        "reacted" => post.reacted = value_flag(value),
        "reaction_type" => post.reaction_type = value_text(value),
        "expandable" => post.expandable = value_flag(value),
        "expanded" => post.expanded = value_flag(value),
        "commented" => post.commented = value_flag(value),
        "comment_texts" => post.comment_texts = value_text(value),
        "shared" => post.shared = value_flag(value),
        "reported_misinfo" => post.reported_misinfo = value_flag(value),
        "dwell_s" => post.dwell_s = value_number(value),
        LEGACY_DWELL_MS => post.dwell_ms = value_number(value),
        _ => {}
    }
}

fn flag_value(flag: bool) -> Value {
    Value::from(u8::from(flag))
}

fn text_value(text: &Option<String>) -> Value {
    Value::from(text.clone().unwrap_or_default())
}

/// Whole numbers are written as integers
fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn value_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true")
                || s.eq_ignore_ascii_case("yes")
                || s.parse::<f64>().is_ok_and(|n| n != 0.0)
        }
        _ => false,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_opt_text(value: &Value) -> Option<String> {
    Some(value_text(value)).filter(|s| !s.trim().is_empty())
}

fn value_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Interaction state of one post while scanning a log
#[derive(Debug, Clone, Default)]
struct Interactions {
    reaction: String,
    expandable: bool,
    expanded: bool,
    commented: bool,
    comment_text: String,
    shared: bool,
    reported: bool,
}

impl Interactions {
    fn apply(&mut self, event: &Event) {
        match event.action {
            EventAction::ReactPick => match event.reaction_type.as_deref() {
                Some(kind) if !kind.is_empty() => self.reaction = kind.to_string(),
                _ => log::debug!("react_pick without a type ignored"),
            },
            // Only clears when untyped or aimed at the current reaction, so a
            // stale clear for another type never erases a newer pick.
            EventAction::ReactClear => match event.reaction_type.as_deref() {
                None | Some("") => self.reaction.clear(),
                Some(kind) if kind == self.reaction => self.reaction.clear(),
                Some(_) => {}
            },
            EventAction::TextClamped => self.expandable = true,
            EventAction::ExpandText => self.expanded = true,
            EventAction::CommentSubmit => {
                self.commented = true;
                if let Some(text) = &event.text {
                    self.comment_text = text.clone();
                }
            }
            EventAction::Share => self.shared = true,
            EventAction::ReportMisinformationClick => self.reported = true,
            _ => {}
        }
    }
}

/// Session-level timing derived from a log
#[derive(Debug, Clone, Default, PartialEq)]
struct SessionTiming {
    entered_at: Option<(f64, Option<String>)>,
    submitted_at: Option<(f64, Option<String>)>,
    last_interaction_at: Option<(f64, Option<String>)>,
}

impl SessionTiming {
    fn from_events(events: &[Event]) -> Self {
        let stamp = |e: &Event| (e.ts_ms, e.iso());
        let usable = || events.iter().filter(|e| e.is_well_formed());

        let entered_at = usable()
            .find(|e| e.action == EventAction::ParticipantIdEntered)
            .map(stamp);
        let submitted_at = usable()
            .find(|e| e.action == EventAction::FeedSubmit)
            .map(stamp);
        let last_interaction_at = entered_at.as_ref().and_then(|(entry, _)| {
            usable()
                .filter(|e| !e.action.is_visibility() && !e.action.is_lifecycle())
                .filter(|e| e.ts_ms >= *entry)
                .last()
                .map(stamp)
        });

        SessionTiming {
            entered_at,
            submitted_at,
            last_interaction_at,
        }
    }

    fn offset_from_entry(&self, at: &Option<(f64, Option<String>)>) -> Option<f64> {
        match (&self.entered_at, at) {
            (Some((entry, _)), Some((ts, _))) => Some((ts - entry).round()),
            _ => None,
        }
    }
}

/// Builds analytics rows from sessions
pub struct RowBuilder;

impl RowBuilder {
    /// Build the row of a session.
    ///
    /// Every post of `session.posts` gets a full field group, interacted with
    /// or not, so rows of the same feed always share one shape.
    pub fn build(session: &Session) -> AnalyticsRow {
        let events = session.events.events();
        let timing = SessionTiming::from_events(events);
        let dwell = DwellAggregator::aggregate(events);

        let mut interactions: HashMap<&str, Interactions> = HashMap::new();
        let mut skipped = 0usize;
        for event in events {
            if !event.is_well_formed() {
                skipped += 1;
                continue;
            }
            if let Some(post_id) = event.post_key() {
                interactions.entry(post_id).or_default().apply(event);
            }
        }
        if skipped > 0 {
            log::debug!(
                "session {}: skipped {} malformed events",
                session.session_id,
                skipped
            );
        }

        let mut seen = HashSet::new();
        let posts = session
            .posts
            .iter()
            .filter(|post| seen.insert(post.id.as_str()))
            .map(|post| {
                let state = interactions
                    .get(post.id.as_str())
                    .cloned()
                    .unwrap_or_default();
                PostGroup {
                    post_id: post.id.clone(),
                    reacted: !state.reaction.is_empty(),
                    reaction_type: state.reaction,
                    expandable: state.expandable,
                    expanded: state.expanded,
                    commented: state.commented,
                    comment_texts: state.comment_text,
                    shared: state.shared,
                    reported_misinfo: state.reported,
                    dwell_s: Some(dwell.get(&post.id).map_or(0.0, |d| d.dwell_s)),
                    dwell_ms: None,
                }
            })
            .collect();

        AnalyticsRow {
            session_id: session.session_id.clone(),
            participant_id: session.participant_id.clone(),
            feed_id: session.feed_id.clone(),
            feed_checksum: session.feed_checksum.clone(),
            entered_at_iso: timing
                .entered_at
                .as_ref()
                .and_then(|(ts, iso)| iso.clone().or_else(|| iso_from_ms(*ts))),
            submitted_at_iso: timing
                .submitted_at
                .as_ref()
                .and_then(|(ts, iso)| iso.clone().or_else(|| iso_from_ms(*ts))),
            last_interaction_at_iso: timing
                .last_interaction_at
                .as_ref()
                .and_then(|(ts, iso)| iso.clone().or_else(|| iso_from_ms(*ts))),
            ms_enter_to_submit: timing.offset_from_entry(&timing.submitted_at),
            ms_enter_to_last_interaction: timing.offset_from_entry(&timing.last_interaction_at),
            posts,
            unrecognized: BTreeMap::new(),
        }
    }
}
