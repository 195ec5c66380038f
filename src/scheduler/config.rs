//! Scheduler configuration.

/// Default stack size of a cothread (1 MiB).
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Default number of cothreads a scheduler may allocate.
pub const DEFAULT_MAX_COTHREADS: usize = 16;

/// Configuration for a [`Scheduler`](super::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Name used in logs, metrics and cothread thread names.
    ///
    /// `None` derives a name from the scheduler id.
    pub name: Option<String>,

    /// Full chain sweeps performed per `iterate` call.
    ///
    /// - 1: one sweep (default)
    /// - N: up to N sweeps, stopping early on `Done` or `Interrupted`
    /// - -1: sweep until `Done`, `Interrupted` or an error
    pub iterations: i64,

    /// Maximum number of cothreads alive at once.
    ///
    /// Wiring a chain that would exceed it fails with
    /// [`Error::CothreadsExhausted`](crate::Error::CothreadsExhausted).
    pub max_cothreads: usize,

    /// Stack size of each cothread. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: None,
            iterations: 1,
            max_cothreads: DEFAULT_MAX_COTHREADS,
            stack_size: Some(DEFAULT_STACK_SIZE),
        }
    }
}

impl SchedulerConfig {
    /// Create a config that drains the graph in a single `iterate` call.
    pub fn run_to_completion() -> Self {
        Self {
            iterations: -1,
            ..Default::default()
        }
    }

    /// Create a config for large graphs.
    pub fn large() -> Self {
        Self {
            max_cothreads: 256,
            stack_size: Some(256 * 1024),
            ..Default::default()
        }
    }

    /// Set the scheduler name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the number of sweeps per `iterate` call.
    pub fn with_iterations(mut self, iterations: i64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the cothread limit.
    pub fn with_max_cothreads(mut self, max_cothreads: usize) -> Self {
        self.max_cothreads = max_cothreads;
        self
    }

    /// Set the cothread stack size.
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.iterations, 1);
        assert_eq!(config.max_cothreads, 16);
        assert_eq!(config.stack_size, Some(DEFAULT_STACK_SIZE));
        assert!(config.name.is_none());
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(SchedulerConfig::run_to_completion().iterations, -1);
        assert_eq!(SchedulerConfig::large().max_cothreads, 256);
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::default()
            .with_name("audio")
            .with_iterations(4)
            .with_max_cothreads(2)
            .with_stack_size(64 * 1024);
        assert_eq!(config.name.as_deref(), Some("audio"));
        assert_eq!(config.iterations, 4);
        assert_eq!(config.max_cothreads, 2);
        assert_eq!(config.stack_size, Some(64 * 1024));
    }
}
