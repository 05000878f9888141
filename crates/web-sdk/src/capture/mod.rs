//! Interaction capturers feeding the [`Tracker`](crate::collector::Tracker).
//!
//! - [`scroll`]: scroll-depth milestones
//! - [`click`]: delegated click observer driven by marker attributes
//! - [`visibility`]: visible time-on-page accumulator

pub mod click;
pub mod scroll;
pub mod visibility;

pub use click::{ClickObserver, ClickObserverConfig, ClickOutcome, Element, InteractionTarget};
pub use scroll::ScrollMilestones;
pub use visibility::{TimeOnPage, TimeOnPageConfig};
