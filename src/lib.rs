//! taskrelay: an agent-task execution engine.
//!
//! Clients submit tasks carrying a message; pluggable skill handlers
//! process them; the protocol layer fans results out over polling,
//! streaming subscriptions, and webhook push.
//!
//! - [`task`]: the lifecycle state machine and the in-memory store
//! - [`skills`]: the capability trait, registry, and built-in handlers
//! - [`events`]: streaming fan-out and webhook delivery
//! - [`dispatch`]: the JSON-RPC method surface
//! - [`protocol`]: wire types shared by all of the above

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod skills;
pub mod task;

pub use config::{EngineConfig, RoutingPolicy};
pub use dispatch::{Dispatcher, JsonRpcRequest, JsonRpcResponse};
pub use errors::{EngineError, EngineResult};
pub use events::{FanOut, PushNotifier, TaskEvent, TaskEventReceiver};
pub use skills::{SkillHandler, SkillRegistry};
pub use task::{TaskLifecycleEngine, TaskStore};
