//! Task state and lifecycle.

pub mod engine;
pub mod store;

pub use engine::{TaskLifecycleEngine, SKILL_METADATA_KEY};
pub use store::TaskStore;
