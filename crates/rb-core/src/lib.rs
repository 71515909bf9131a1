//! rusty-board/crates/rb-core/src/lib.rs
//!
//! The central domain model, retention rules and port definitions for Rusty-Board.

pub mod error;
pub mod markup;
pub mod models;
pub mod retention;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;

/// Names of the store-level atomic counters.
pub mod counters {
    pub const GLOBAL_POSTS: &str = "global:postcount";
    pub const USERS: &str = "global:usercount";
    pub const NEWS_SEQ: &str = "news:seq";
}
