//! Viewport tracking
//!
//! This module decides, per rendered post, when the post is meaningfully
//! visible and turns those decisions into `vp_enter` / `vp_exit` events.
//!
//! The host environment's intersection primitive sits behind
//! `IntersectionPrimitive`, so the threshold state machine runs (and is
//! tested) without a real DOM.

pub mod clock;
pub mod observer;
pub mod options;
pub mod viewport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use observer::{
    fine_thresholds, IntersectionEntry, IntersectionPrimitive, PostElement, TrackedElement,
    VisibilityObserver, VisibilityReading,
};
pub use options::TrackerOptions;
pub use viewport::{DocumentEvent, ViewportTracker};
