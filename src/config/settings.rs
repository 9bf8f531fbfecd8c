//! Setting sections of the pool configuration
//!
//! # Main Types
//!
//! - [`SchedulerSettings`] - Priorities, dispatch floor and wake channel size
//! - [`MessageSettings`] - Texts of the synthetic error chunks the pool emits
//! - [`LoggingSettings`] - Log filter and optional log directory for binaries
//!
//! # Dispatch Floor
//!
//! When `dispatch_floor` is set, jobs whose priority is at or below the floor
//! stay queued without being dispatched. They start once a caller raises
//! their priority above the floor. This is how blame requests for files that
//! are not on screen yet wait without occupying the engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default priority for plain requests
pub const DEFAULT_PRIORITY: i64 = 100;

/// Default priority for streaming requests
pub const DEFAULT_STREAM_PRIORITY: i64 = 1;

/// Default capacity of the worker wake channel
pub const DEFAULT_WAKE_CAPACITY: usize = 256;

/// Scheduling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Priority used by `Pool::submit` when the caller passes none
    pub default_priority: i64,

    /// Priority used for streaming methods when the caller passes none
    pub stream_priority: i64,

    /// Jobs with priority at or below this value are parked
    pub dispatch_floor: Option<i64>,

    /// Capacity of the wake channel between façade and worker
    pub wake_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            stream_priority: DEFAULT_STREAM_PRIORITY,
            dispatch_floor: None,
            wake_capacity: DEFAULT_WAKE_CAPACITY,
        }
    }
}

impl SchedulerSettings {
    /// Whether a job with this priority may be dispatched
    pub fn is_dispatchable(&self, priority: i64) -> bool {
        self.dispatch_floor.map_or(true, |floor| priority > floor)
    }
}

/// Messages carried by synthetic error chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    /// Sent to a job cancelled before dispatch
    pub cancelled: String,

    /// Sent to every bound job when the pool is disposed
    pub disposed: String,

    /// Prefix for the error sent to every bound job on a fatal engine fault
    pub faulted: String,

    /// Sent when an engine call ends without a terminal chunk
    pub incomplete: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            cancelled: "Job cancelled".to_string(),
            disposed: "Pool closed".to_string(),
            faulted: "Engine faulted".to_string(),
            incomplete: "engine stream ended without a terminal chunk".to_string(),
        }
    }
}

/// Logging settings, consumed by binaries that install a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Directory for daily-rolling log files; stderr only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info,explorer_pool=debug".to_string(),
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_floor() {
        let mut settings = SchedulerSettings::default();
        assert!(settings.is_dispatchable(0));
        assert!(settings.is_dispatchable(-5));

        settings.dispatch_floor = Some(0);
        assert!(!settings.is_dispatchable(0));
        assert!(!settings.is_dispatchable(-1));
        assert!(settings.is_dispatchable(1));
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let settings: SchedulerSettings = toml::from_str("dispatch_floor = 0").unwrap();
        assert_eq!(settings.dispatch_floor, Some(0));
        assert_eq!(settings.default_priority, DEFAULT_PRIORITY);
        assert_eq!(settings.wake_capacity, DEFAULT_WAKE_CAPACITY);
    }
}
