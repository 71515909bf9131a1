//! rusty-board/crates/rb-cache/src/lib.rs
//!
//! Read-side projection of the content store, the rebuild gate guarding it,
//! and the write-through service tying both together.

pub mod backend;
pub mod blocker;
pub mod forum;
pub mod keys;
pub mod projection;
pub mod rebuild;
pub mod redact;

pub use backend::MemoryCache;
pub use blocker::Blocker;
pub use forum::Forum;
pub use keys::{CacheKey, Counter};
pub use projection::CacheProjection;
pub use rebuild::{rebuild, RebuildReport};
pub use redact::redact_for_viewer;
