//! # rb-content
//!
//! The authoritative content store: boards, threads and posts under the
//! retention policy, plus in-process backends for the storage ports.

mod locks;
pub mod memory;
pub mod store;

pub use memory::{MemoryBlobStore, MemoryRecordStore};
pub use store::{ContentStore, PostRemoval, ThreadCreated};
