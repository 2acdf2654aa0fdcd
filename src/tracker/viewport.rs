//! Viewport tracker
//!
//! Applies per-post threshold policy on top of a `VisibilityObserver` and
//! emits timestamped `vp_enter` / `vp_exit` events into a caller-supplied sink.

use crate::event_log::EventSink;
use crate::tracker::clock::Clock;
use crate::tracker::observer::{
    IntersectionEntry, IntersectionPrimitive, TrackedElement, VisibilityObserver,
};
use crate::tracker::options::TrackerOptions;
use crate::types::{Event, EventAction, VisibilitySample};
use serde_json::Value;
use std::collections::BTreeMap;

/// Document-level signals the host forwards to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    /// The tab or document became hidden
    TabHidden,
    /// The tab or document became visible again
    TabVisible,
    /// The page is being torn down
    PageHide,
}

type ImagePredicate<E> = Box<dyn Fn(&E) -> bool>;

/// Tracks which posts are visible and emits visibility events.
///
/// One tracker per tracking session. The tracker is its own disposer:
/// `dispose` (or dropping the tracker) disconnects the primitive and flushes
/// every entered post as an exit.
pub struct ViewportTracker<E, P, S, C>
where
    E: TrackedElement,
    P: IntersectionPrimitive<E>,
    S: EventSink,
    C: Clock,
{
    observer: Option<VisibilityObserver<E, P>>,
    options: TrackerOptions,
    image_predicate: Option<ImagePredicate<E>>,
    /// Entered posts with the geometry of their last crossing
    entered: BTreeMap<String, VisibilitySample>,
    sink: S,
    clock: C,
    disposed: bool,
}

impl<E, P, S, C> ViewportTracker<E, P, S, C>
where
    E: TrackedElement,
    P: IntersectionPrimitive<E>,
    S: EventSink,
    C: Clock,
{
    /// Start tracking `elements`.
    ///
    /// `create` builds the host primitive for the given threshold list and
    /// returns `None` when the environment has no intersection observation;
    /// tracking is then disabled and no visibility events are ever emitted.
    pub fn start<F, I>(
        create: F,
        elements: I,
        options: TrackerOptions,
        sink: S,
        clock: C,
    ) -> Self
    where
        F: FnOnce(&[f64]) -> Option<P>,
        I: IntoIterator<Item = E>,
    {
        let observer = VisibilityObserver::connect(create);
        if observer.is_none() {
            log::warn!("viewport intersection observation unavailable; dwell tracking disabled");
        }

        let mut tracker = ViewportTracker {
            observer,
            options,
            image_predicate: None,
            entered: BTreeMap::new(),
            sink,
            clock,
            disposed: false,
        };
        tracker.observe_new(elements);
        tracker
    }

    /// Override how the tracker decides a post gets the image threshold.
    ///
    /// By default `TrackedElement::has_image` decides.
    pub fn with_image_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + 'static,
    {
        self.image_predicate = Some(Box::new(predicate));
        self
    }

    /// Add newly rendered elements. Already tracked posts keep their state.
    ///
    /// Returns how many elements started being observed.
    pub fn observe_new<I>(&mut self, elements: I) -> usize
    where
        I: IntoIterator<Item = E>,
    {
        if self.disposed {
            return 0;
        }
        let Some(observer) = self.observer.as_mut() else {
            return 0;
        };

        let mut added = 0;
        for element in elements {
            if observer.observe(element) {
                added += 1;
            }
        }
        added
    }

    /// Stop observing an element that left the DOM.
    ///
    /// If its post is entered it stays entered, and is flushed as an exit on
    /// the next hide or teardown.
    pub fn unobserve(&mut self, element: &E) {
        if let (Some(observer), Some(post_id)) = (self.observer.as_mut(), element.post_id()) {
            observer.unobserve(&post_id);
        }
    }

    /// Handle one intersection callback batch from the host
    pub fn on_intersections<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = IntersectionEntry<E>>,
    {
        if self.disposed {
            return;
        }
        let readings = match self.observer.as_ref() {
            Some(observer) => observer.readings(entries),
            None => return,
        };
        if readings.is_empty() {
            return;
        }

        let now = self.clock.now_ms();
        for reading in readings {
            let threshold = self.threshold_for(&reading.target);
            let sample = VisibilitySample {
                vis_frac: reading.fraction,
                post_h_px: reading.target.height_px(),
                viewport_h_px: reading.viewport_h_px,
                scroll_y: reading.scroll_y,
            };
            let was_entered = self.entered.contains_key(&reading.post_id);

            if reading.fraction >= threshold && !was_entered {
                log::trace!(
                    "post {} entered at {:.2} (threshold {:.2})",
                    reading.post_id,
                    reading.fraction,
                    threshold
                );
                self.entered.insert(reading.post_id.clone(), sample);
                self.sink.emit(Event::visibility(
                    EventAction::VpEnter,
                    reading.post_id,
                    now,
                    sample,
                ));
            } else if reading.fraction < threshold && was_entered {
                log::trace!(
                    "post {} exited at {:.2} (threshold {:.2})",
                    reading.post_id,
                    reading.fraction,
                    threshold
                );
                self.entered.remove(&reading.post_id);
                self.sink.emit(Event::visibility(
                    EventAction::VpExit,
                    reading.post_id,
                    now,
                    sample,
                ));
            }
        }
    }

    /// Handle a document-level visibility or teardown signal
    pub fn on_document_event(&mut self, event: DocumentEvent) {
        if self.disposed {
            return;
        }
        match event {
            DocumentEvent::TabHidden => self.flush_entered("hidden"),
            // The primitive re-reports visible posts on its own.
            DocumentEvent::TabVisible => {}
            DocumentEvent::PageHide => self.shutdown("teardown"),
        }
    }

    /// Stop tracking: disconnect the primitive and emit exits for every
    /// entered post. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.shutdown("dispose");
    }

    fn shutdown(&mut self, reason: &str) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(observer) = self.observer.as_mut() {
            observer.disconnect();
        }
        self.flush_entered(reason);
    }

    fn flush_entered(&mut self, reason: &str) {
        if self.entered.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let entered = std::mem::take(&mut self.entered);
        log::debug!("flushing {} entered posts ({})", entered.len(), reason);

        for (post_id, last) in entered {
            let sample = VisibilitySample {
                vis_frac: 0.0,
                ..last
            };
            self.sink.emit(
                Event::visibility(EventAction::VpExit, post_id, now, sample)
                    .with_extra("reason", Value::from(reason)),
            );
        }
    }

    fn threshold_for(&self, element: &E) -> f64 {
        let has_image = match &self.image_predicate {
            Some(predicate) => predicate(element),
            None => element.has_image(),
        };
        self.options.threshold_for(has_image)
    }

    /// Whether an intersection primitive is available
    pub fn is_enabled(&self) -> bool {
        self.observer.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Posts currently marked entered, in id order
    pub fn entered_posts(&self) -> Vec<&str> {
        self.entered.keys().map(String::as_str).collect()
    }

    pub fn observed_count(&self) -> usize {
        self.observer
            .as_ref()
            .map_or(0, VisibilityObserver::observed_count)
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<E, P, S, C> Drop for ViewportTracker<E, P, S, C>
where
    E: TrackedElement,
    P: IntersectionPrimitive<E>,
    S: EventSink,
    C: Clock,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use crate::tracker::clock::ManualClock;
    use crate::tracker::observer::PostElement;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        observed: Vec<String>,
        disconnects: u32,
    }

    struct FakePrimitive(Rc<RefCell<Calls>>);

    impl IntersectionPrimitive<PostElement> for FakePrimitive {
        fn observe(&mut self, target: &PostElement) {
            self.0.borrow_mut().observed.push(target.post_id.clone());
        }

        fn unobserve(&mut self, _target: &PostElement) {}

        fn disconnect(&mut self) {
            self.0.borrow_mut().disconnects += 1;
        }
    }

    type Tracker = ViewportTracker<PostElement, FakePrimitive, Rc<RefCell<EventLog>>, ManualClock>;

    struct Harness {
        tracker: Tracker,
        log: Rc<RefCell<EventLog>>,
        clock: ManualClock,
        calls: Rc<RefCell<Calls>>,
    }

    fn harness(elements: Vec<PostElement>) -> Harness {
        let log = Rc::new(RefCell::new(EventLog::new()));
        let clock = ManualClock::new(1_000.0);
        let calls = Rc::new(RefCell::new(Calls::default()));
        let primitive_calls = Rc::clone(&calls);

        let tracker = ViewportTracker::start(
            move |_: &[f64]| Some(FakePrimitive(primitive_calls)),
            elements,
            TrackerOptions::default(),
            Rc::clone(&log),
            clock.clone(),
        );

        Harness {
            tracker,
            log,
            clock,
            calls,
        }
    }

    fn entry(id: &str, ratio: f64) -> IntersectionEntry<PostElement> {
        IntersectionEntry::new(PostElement::new(id).with_height(400.0), ratio)
            .with_viewport(800.0, 120.0)
    }

    fn actions(log: &Rc<RefCell<EventLog>>) -> Vec<(String, String)> {
        log.borrow()
            .iter()
            .map(|e| {
                (
                    e.action.as_str().to_string(),
                    e.post_id.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_enter_and_exit_at_threshold() {
        let mut h = harness(vec![PostElement::new("p1")]);

        h.tracker.on_intersections(vec![entry("p1", 0.5)]);
        assert!(h.log.borrow().is_empty());

        h.tracker.on_intersections(vec![entry("p1", 0.8)]);
        h.clock.advance(300.0);
        h.tracker.on_intersections(vec![entry("p1", 0.95)]);
        h.tracker.on_intersections(vec![entry("p1", 0.79)]);

        assert_eq!(
            actions(&h.log),
            vec![
                ("vp_enter".to_string(), "p1".to_string()),
                ("vp_exit".to_string(), "p1".to_string()),
            ]
        );

        let log = h.log.borrow();
        let enter = &log.events()[0];
        assert_eq!(enter.ts_ms, 1_000.0);
        assert_eq!(enter.vis_frac, Some(0.8));
        assert_eq!(enter.post_h_px, Some(400.0));
        assert_eq!(enter.viewport_h_px, Some(800.0));
        assert_eq!(enter.scroll_y, Some(120.0));
        assert_eq!(log.events()[1].ts_ms, 1_300.0);
    }

    #[test]
    fn test_image_posts_use_lower_threshold() {
        let mut h = harness(vec![
            PostElement::new("text"),
            PostElement::new("photo").with_image(),
        ]);

        h.tracker.on_intersections(vec![
            IntersectionEntry::new(PostElement::new("text"), 0.65),
            IntersectionEntry::new(PostElement::new("photo").with_image(), 0.65),
        ]);

        assert_eq!(h.tracker.entered_posts(), vec!["photo"]);
    }

    #[test]
    fn test_image_predicate_override() {
        let log = Rc::new(RefCell::new(EventLog::new()));
        let mut tracker: Tracker = ViewportTracker::start(
            |_: &[f64]| Some(FakePrimitive(Rc::new(RefCell::new(Calls::default())))),
            vec![PostElement::new("p1"), PostElement::new("img-2")],
            TrackerOptions::default(),
            Rc::clone(&log),
            ManualClock::new(0.0),
        )
        .with_image_predicate(|el: &PostElement| el.post_id.starts_with("img-"));

        tracker.on_intersections(vec![entry("p1", 0.7), entry("img-2", 0.7)]);
        assert_eq!(tracker.entered_posts(), vec!["img-2"]);
    }

    #[test]
    fn test_never_reaching_threshold_never_emits() {
        let mut h = harness(vec![PostElement::new("p1")]);
        for ratio in [0.1, 0.4, 0.79, 0.3, 0.0] {
            h.tracker.on_intersections(vec![entry("p1", ratio)]);
        }
        assert!(h.log.borrow().is_empty());
    }

    #[test]
    fn test_unobserved_posts_are_ignored() {
        let mut h = harness(vec![PostElement::new("p1")]);
        h.tracker.on_intersections(vec![entry("p2", 1.0)]);
        assert!(h.log.borrow().is_empty());
    }

    #[test]
    fn test_observe_new_keeps_existing_state() {
        let mut h = harness(vec![PostElement::new("p1")]);
        h.tracker.on_intersections(vec![entry("p1", 1.0)]);

        let added = h
            .tracker
            .observe_new(vec![PostElement::new("p1"), PostElement::new("p2")]);
        assert_eq!(added, 1);
        assert_eq!(h.tracker.observed_count(), 2);
        assert_eq!(h.calls.borrow().observed, vec!["p1", "p2"]);

        h.tracker.on_intersections(vec![entry("p1", 1.0), entry("p2", 0.9)]);
        assert_eq!(
            actions(&h.log),
            vec![
                ("vp_enter".to_string(), "p1".to_string()),
                ("vp_enter".to_string(), "p2".to_string()),
            ]
        );
    }

    #[test]
    fn test_tab_hidden_flushes_without_disposing() {
        let mut h = harness(vec![PostElement::new("p1"), PostElement::new("p2")]);
        h.tracker.on_intersections(vec![entry("p1", 1.0), entry("p2", 1.0)]);
        h.clock.advance(500.0);

        h.tracker.on_document_event(DocumentEvent::TabHidden);
        assert!(h.tracker.entered_posts().is_empty());
        assert!(!h.tracker.is_disposed());

        {
            let log = h.log.borrow();
            let exits: Vec<_> = log.iter().filter(|e| e.action == EventAction::VpExit).collect();
            assert_eq!(exits.len(), 2);
            assert_eq!(exits[0].ts_ms, 1_500.0);
            assert_eq!(exits[0].extra["reason"], "hidden");
            assert_eq!(exits[0].post_h_px, Some(400.0));
        }

        h.tracker.on_document_event(DocumentEvent::TabVisible);
        h.tracker.on_intersections(vec![entry("p1", 1.0)]);
        assert_eq!(h.tracker.entered_posts(), vec!["p1"]);
    }

    #[test]
    fn test_page_hide_disposes() {
        let mut h = harness(vec![PostElement::new("p1")]);
        h.tracker.on_intersections(vec![entry("p1", 1.0)]);

        h.tracker.on_document_event(DocumentEvent::PageHide);
        assert!(h.tracker.is_disposed());
        assert_eq!(h.calls.borrow().disconnects, 1);
        assert_eq!(h.log.borrow().events()[1].extra["reason"], "teardown");

        // Listeners are detached: later signals do nothing.
        h.tracker.on_intersections(vec![entry("p1", 1.0)]);
        h.tracker.on_document_event(DocumentEvent::TabHidden);
        assert_eq!(h.log.borrow().len(), 2);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut h = harness(vec![PostElement::new("p1")]);
        h.tracker.on_intersections(vec![entry("p1", 1.0)]);

        h.tracker.dispose();
        h.tracker.dispose();

        assert_eq!(h.calls.borrow().disconnects, 1);
        assert_eq!(
            actions(&h.log),
            vec![
                ("vp_enter".to_string(), "p1".to_string()),
                ("vp_exit".to_string(), "p1".to_string()),
            ]
        );
    }

    #[test]
    fn test_removed_element_still_exits_on_teardown() {
        let mut h = harness(vec![PostElement::new("p1")]);
        h.tracker.on_intersections(vec![entry("p1", 1.0)]);
        h.tracker.unobserve(&PostElement::new("p1"));
        assert_eq!(h.tracker.observed_count(), 0);

        let log = Rc::clone(&h.log);
        drop(h);

        let log = log.borrow();
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[1].action, EventAction::VpExit);
    }

    #[test]
    fn test_missing_primitive_disables_tracking() {
        let mut log = EventLog::new();
        {
            let mut tracker: ViewportTracker<PostElement, FakePrimitive, &mut EventLog, ManualClock> =
                ViewportTracker::start(
                    |_: &[f64]| None,
                    vec![PostElement::new("p1")],
                    TrackerOptions::default(),
                    &mut log,
                    ManualClock::new(0.0),
                );

            assert!(!tracker.is_enabled());
            assert_eq!(tracker.observe_new(vec![PostElement::new("p2")]), 0);
            tracker.on_intersections(vec![entry("p1", 1.0)]);
            tracker.on_document_event(DocumentEvent::PageHide);
            tracker.dispose();
        }
        assert!(log.is_empty());
    }

    #[test]
    fn test_trackers_do_not_share_state() {
        let mut a = harness(vec![PostElement::new("p1")]);
        let b = harness(vec![PostElement::new("p1")]);

        a.tracker.on_intersections(vec![entry("p1", 1.0)]);
        assert_eq!(a.tracker.entered_posts(), vec!["p1"]);
        assert!(b.tracker.entered_posts().is_empty());
    }
}
