//! Throttled configuration reload pipeline.
//!
//! # Data Flow
//! ```text
//! Provider ──▶ watcher.rs (defaults, skip empty, skip unchanged)
//!          ──▶ mailbox.rs (single slot per provider, latest wins)
//!          ──▶ throttle.rs (publish, then sleep)
//!          ──▶ merge.rs (name@provider namespace)
//!          ──▶ listeners (route table rebuild + swap)
//! ```

pub mod mailbox;
pub mod merge;
pub mod throttle;
pub mod watcher;

pub use mailbox::Mailbox;
pub use merge::{merge, MergedConfiguration};
pub use watcher::{ConfigurationWatcher, PreloadOutcome};
