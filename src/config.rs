//! Engine configuration.

use std::time::Duration;

/// How the engine resolves a skill for a task on continuation turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Re-derive the skill from message keywords on every turn; a task may
    /// switch skill mid-flight.
    ReRoute,
    /// Pin the skill resolved on first processing by recording it in the
    /// task metadata.
    PinAtCreation,
}

/// Configuration for engine behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub routing: RoutingPolicy,
    /// Per-attempt timeout for webhook push delivery.
    pub push_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::ReRoute,
            push_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }
}
