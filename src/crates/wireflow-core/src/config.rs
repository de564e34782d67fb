//! Engine-level configuration knobs

use serde::{Deserialize, Serialize};

/// Runtime knobs for [`DAGEngine`](crate::engine::DAGEngine).
///
/// Everything here has a sensible default; hosts override individual
/// fields with struct-update syntax:
///
/// ```rust
/// use wireflow_core::config::EngineConfig;
///
/// let config = EngineConfig {
///     default_script_timeout_ms: 10_000,
///     ..EngineConfig::default()
/// };
/// assert_eq!(config.event_buffer_size, 256);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Bounded capacity of each event-bus subscriber queue. A subscriber
    /// that falls behind exerts backpressure on the producer rather than
    /// losing events.
    pub event_buffer_size: usize,

    /// Deadline for scripted transforms that do not configure their own
    /// `timeout`.
    pub default_script_timeout_ms: u64,

    /// Safety valve on rejection-feedback cycles for agent nodes that do
    /// not configure a `rejectionHandler`. Prevents an approve/reject pair
    /// from looping unbounded.
    pub max_feedback_cycles: u32,

    /// Working directory applied when neither the workflow nor the run
    /// specifies one.
    pub default_working_directory: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            default_script_timeout_ms: 30_000,
            max_feedback_cycles: 20,
            default_working_directory: None,
        }
    }
}
