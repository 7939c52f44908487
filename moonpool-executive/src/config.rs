//! # Executive Configuration
//!
//! Settings are resolved once by the caller and handed to
//! [`create_executive`](crate::create_executive); nothing is looked up
//! lazily or globally.
//!
//! | Field | Default | Effect |
//! |-------|---------|--------|
//! | `kind` | `Full` | Which executive implementation the factory builds |
//! | `causality_checking` | `true` | Full: reject past requests. Fast: log and admit them |
//! | `report_leaked_detachables` | `true` | Log detachable events still suspended when a run finishes |
//! | `detachable_stack_size` | `None` | Stack size for detachable contexts (platform default if unset) |
//! | `start_time` | `0` | Time origin the clock is set to on construction and reset |
//!
//! ```rust
//! use moonpool_executive::{ExecutiveConfiguration, ExecutiveKind};
//!
//! let config = ExecutiveConfiguration::fast().with_causality_checking(false);
//! assert_eq!(config.kind, ExecutiveKind::Fast);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executive::ExecutiveKind;

/// Configuration for building an executive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveConfiguration {
    /// Executive implementation to build.
    pub kind: ExecutiveKind,
    /// Whether requests earlier than the current time are treated as errors.
    ///
    /// The full executive rejects them when enabled and drops them (returning
    /// [`EventKey::IGNORED`](crate::EventKey::IGNORED)) when disabled. The fast
    /// executive logs and admits them when enabled and clamps them to the
    /// current time when disabled.
    pub causality_checking: bool,
    /// Log every detachable event still suspended when a run finishes.
    pub report_leaked_detachables: bool,
    /// Stack size in bytes for detachable event contexts.
    pub detachable_stack_size: Option<usize>,
    /// Time origin of the simulated clock.
    pub start_time: Duration,
}

impl Default for ExecutiveConfiguration {
    fn default() -> Self {
        Self {
            kind: ExecutiveKind::Full,
            causality_checking: true,
            report_leaked_detachables: true,
            detachable_stack_size: None,
            start_time: Duration::ZERO,
        }
    }
}

impl ExecutiveConfiguration {
    /// Default configuration for the full-featured executive.
    pub fn full() -> Self {
        Self::default()
    }

    /// Default configuration for the fast executive.
    pub fn fast() -> Self {
        Self {
            kind: ExecutiveKind::Fast,
            ..Self::default()
        }
    }

    /// Sets the causality policy.
    pub fn with_causality_checking(mut self, enabled: bool) -> Self {
        self.causality_checking = enabled;
        self
    }

    /// Sets whether leaked detachable events are logged.
    pub fn with_leak_reporting(mut self, enabled: bool) -> Self {
        self.report_leaked_detachables = enabled;
        self
    }

    /// Sets the stack size of detachable event contexts.
    pub fn with_detachable_stack_size(mut self, bytes: usize) -> Self {
        self.detachable_stack_size = Some(bytes);
        self
    }

    /// Sets the clock origin.
    pub fn with_start_time(mut self, start_time: Duration) -> Self {
        self.start_time = start_time;
        self
    }
}
