//! Client-side telemetry collection: session identity, batching, delivery
//! and the interaction capturers that feed them.
//!
//! # Modules
//!
//! - [`events`]: action names and page lifecycle transitions
//! - [`session`]: rolling session ids and visitor hashes
//! - [`collector`]: the [`Tracker`] queue and batcher
//! - [`transport`]: request and beacon delivery strategies
//! - [`capture`]: scroll, click and time-on-page capturers

pub mod capture;
pub mod collector;
pub mod events;
pub mod session;
pub mod transport;

pub use capture::{
    ClickObserver, ClickObserverConfig, ClickOutcome, Element, InteractionTarget,
    ScrollMilestones, TimeOnPage, TimeOnPageConfig,
};
pub use collector::{page_path_from_url, DoNotTrack, Tracker, TrackerConfig};
pub use events::PageLifecycle;
pub use session::{
    visitor_hash, FileSessionStore, MemorySessionStore, SessionConfig, SessionManager,
    SessionStore, UnavailableSessionStore,
};
pub use transport::{
    BeaconTransport, CaptureTransport, DeliveryMode, HttpTransport, Transport, TransportStrategy,
};
