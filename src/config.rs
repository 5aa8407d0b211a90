//! Configuration for tracker behavior.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for an operation tracker.
///
/// # Example
///
/// ```rust
/// use op_tracker::TrackerConfig;
/// use std::time::Duration;
///
/// let config = TrackerConfig::default()
///     .with_stack_traces(true)
///     .with_driver_module("memdb")
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Whether to capture a stack trace for every recorded operation.
    /// Default: `false` (capturing and symbolizing a backtrace is slow)
    pub capture_stack_traces: bool,

    /// Whether to attach filter and update documents to tracing spans.
    /// Default: `false` (documents may contain sensitive data)
    ///
    /// Records in the tracker's logs always contain the documents.
    pub log_documents: bool,

    /// Threshold for logging slow operations at WARN level.
    /// Default: 500ms
    pub slow_query_threshold: Duration,

    /// Module paths of the driver, e.g. `mongodb` or `my_app::db`. Frames
    /// whose function lives under one of these paths are left out of stack
    /// traces. Generic arguments naming driver types do not count.
    pub driver_modules: Vec<String>,

    /// Source directories of the driver. Frames whose file lies below one of
    /// these are left out of stack traces.
    pub driver_paths: Vec<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capture_stack_traces: false,
            log_documents: false,
            slow_query_threshold: Duration::from_millis(500),
            driver_modules: Vec::new(),
            driver_paths: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable stack trace capture.
    pub fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.capture_stack_traces = enabled;
        self
    }

    /// Enable or disable document logging in spans.
    ///
    /// **Security Warning**: filters and update documents often contain user
    /// input. Only enable in development or controlled environments.
    pub fn with_document_logging(mut self, enabled: bool) -> Self {
        self.log_documents = enabled;
        self
    }

    /// Set the threshold for slow operation warnings.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Hide frames of the given driver module from stack traces. The path is
    /// matched from the crate root.
    pub fn with_driver_module(mut self, module: impl Into<String>) -> Self {
        self.driver_modules.push(module.into());
        self
    }

    /// Hide frames from source files below the given directory.
    pub fn with_driver_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.driver_paths.push(path.into());
        self
    }

    /// Create a development-friendly configuration: stack traces and
    /// documents are recorded.
    ///
    /// **Warning**: Do not use in production, stack capture is expensive.
    pub fn development() -> Self {
        Self {
            capture_stack_traces: true,
            log_documents: true,
            slow_query_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Create a production-safe configuration with minimal overhead.
    pub fn production() -> Self {
        Self {
            capture_stack_traces: false,
            log_documents: false,
            slow_query_threshold: Duration::from_secs(1),
            ..Self::default()
        }
    }
}
