//! Visibility observer
//!
//! Wraps the host's viewport-intersection primitive and turns its raw entries
//! into clean per-post visibility readings.

use crate::types::Post;
use std::collections::HashMap;

/// Number of steps the 0-1 fraction range is split into
pub const THRESHOLD_STEPS: usize = 100;

/// A rendered element that may carry a post
pub trait TrackedElement: Clone {
    /// Post rendered by this element, if any
    fn post_id(&self) -> Option<String>;

    /// Hint that the element contains an image
    fn has_image(&self) -> bool {
        false
    }

    /// Rendered height in pixels
    fn height_px(&self) -> Option<f64> {
        None
    }
}

/// Plain description of a rendered post card
#[derive(Debug, Clone, PartialEq)]
pub struct PostElement {
    pub post_id: String,
    pub has_image: bool,
    pub height_px: Option<f64>,
}

impl PostElement {
    pub fn new(post_id: impl Into<String>) -> Self {
        PostElement {
            post_id: post_id.into(),
            has_image: false,
            height_px: None,
        }
    }

    pub fn with_image(mut self) -> Self {
        self.has_image = true;
        self
    }

    pub fn with_height(mut self, height_px: f64) -> Self {
        self.height_px = Some(height_px);
        self
    }
}

impl From<&Post> for PostElement {
    fn from(post: &Post) -> Self {
        PostElement {
            post_id: post.id.clone(),
            has_image: post.has_image,
            height_px: None,
        }
    }
}

impl TrackedElement for PostElement {
    fn post_id(&self) -> Option<String> {
        Some(self.post_id.clone()).filter(|id| !id.is_empty())
    }

    fn has_image(&self) -> bool {
        self.has_image
    }

    fn height_px(&self) -> Option<f64> {
        self.height_px
    }
}

/// One entry of an intersection callback batch, as delivered by the host
#[derive(Debug, Clone)]
pub struct IntersectionEntry<E> {
    pub target: E,
    /// Visible fraction of the target (0-1)
    pub intersection_ratio: f64,
    pub viewport_h_px: Option<f64>,
    pub scroll_y: Option<f64>,
}

impl<E> IntersectionEntry<E> {
    pub fn new(target: E, intersection_ratio: f64) -> Self {
        IntersectionEntry {
            target,
            intersection_ratio,
            viewport_h_px: None,
            scroll_y: None,
        }
    }

    pub fn with_viewport(mut self, viewport_h_px: f64, scroll_y: f64) -> Self {
        self.viewport_h_px = Some(viewport_h_px);
        self.scroll_y = Some(scroll_y);
        self
    }
}

/// Host-side viewport-intersection capability.
///
/// The host delivers callback batches to `ViewportTracker::on_intersections`.
pub trait IntersectionPrimitive<E> {
    fn observe(&mut self, target: &E);
    fn unobserve(&mut self, target: &E);
    fn disconnect(&mut self);
}

/// Visibility of one observed post within a callback batch
#[derive(Debug, Clone)]
pub struct VisibilityReading<E> {
    pub post_id: String,
    pub target: E,
    /// Visible fraction clamped to 0-1
    pub fraction: f64,
    pub viewport_h_px: Option<f64>,
    pub scroll_y: Option<f64>,
}

/// Threshold list covering 0-1 in `THRESHOLD_STEPS` steps
pub fn fine_thresholds() -> Vec<f64> {
    (0..=THRESHOLD_STEPS)
        .map(|i| i as f64 / THRESHOLD_STEPS as f64)
        .collect()
}

/// Observer over one primitive, keyed by post id
pub struct VisibilityObserver<E, P> {
    primitive: Option<P>,
    observed: HashMap<String, E>,
}

impl<E, P> VisibilityObserver<E, P>
where
    E: TrackedElement,
    P: IntersectionPrimitive<E>,
{
    /// Create the underlying primitive with the fine threshold list.
    ///
    /// `create` returns `None` when the host cannot observe intersections.
    pub fn connect<F>(create: F) -> Option<Self>
    where
        F: FnOnce(&[f64]) -> Option<P>,
    {
        let primitive = create(&fine_thresholds())?;
        Some(VisibilityObserver {
            primitive: Some(primitive),
            observed: HashMap::new(),
        })
    }

    /// Start observing an element. Returns false when the element has no
    /// post, its post is already observed, or the observer is disconnected.
    pub fn observe(&mut self, element: E) -> bool {
        let Some(primitive) = self.primitive.as_mut() else {
            return false;
        };
        let Some(post_id) = element.post_id() else {
            log::debug!("skipping element without a post id");
            return false;
        };
        if self.observed.contains_key(&post_id) {
            return false;
        }
        primitive.observe(&element);
        self.observed.insert(post_id, element);
        true
    }

    /// Stop observing a post's element
    pub fn unobserve(&mut self, post_id: &str) -> Option<E> {
        let element = self.observed.remove(post_id)?;
        if let Some(primitive) = self.primitive.as_mut() {
            primitive.unobserve(&element);
        }
        Some(element)
    }

    /// Disconnect the primitive. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut primitive) = self.primitive.take() {
            primitive.disconnect();
        }
        self.observed.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.primitive.is_some()
    }

    pub fn is_observing(&self, post_id: &str) -> bool {
        self.observed.contains_key(post_id)
    }

    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }

    /// Resolve a callback batch into readings for observed posts.
    ///
    /// Entries for unobserved posts or with a non-finite ratio are dropped.
    pub fn readings<I>(&self, entries: I) -> Vec<VisibilityReading<E>>
    where
        I: IntoIterator<Item = IntersectionEntry<E>>,
    {
        if !self.is_connected() {
            return Vec::new();
        }

        entries
            .into_iter()
            .filter_map(|entry| {
                let post_id = entry.target.post_id()?;
                if !self.observed.contains_key(&post_id) || !entry.intersection_ratio.is_finite()
                {
                    return None;
                }
                Some(VisibilityReading {
                    post_id,
                    target: entry.target,
                    fraction: entry.intersection_ratio.clamp(0.0, 1.0),
                    viewport_h_px: entry.viewport_h_px,
                    scroll_y: entry.scroll_y,
                })
            })
            .collect()
    }
}
