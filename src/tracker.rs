//! The operation tracker and its scope guard.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::hook::{HookPoint, HookTarget};
use crate::record::{InsertRecord, QueryRecord, RemoveRecord, UpdateRecord};
use crate::recorder::Recorder;

/// Records the operations a driver performs while installed on its hook point.
///
/// A tracker owns four logs: `queries`, `inserts`, `updates` and `removes`.
/// They grow while the tracker is installed and are only emptied by
/// [`reset`](Self::reset).
///
/// # Example
///
/// ```rust,ignore
/// use op_tracker::{Tracker, TrackerConfig};
///
/// let tracker = Tracker::new(TrackerConfig::default().with_stack_traces(true));
/// {
///     let _scope = tracker.scope(&client)?;
///     client.collection("people").find_one(doc! { "email": "jane@example.org" })?;
/// }
/// assert_eq!(tracker.queries().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Tracker {
    recorder: Arc<Recorder>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker {
    /// Create a tracker with the given configuration. It starts uninstalled.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            recorder: Arc::new(Recorder::new(config)),
        }
    }

    /// Create a tracker with default configuration and stack traces toggled.
    pub fn with_stack_traces(enabled: bool) -> Self {
        Self::new(TrackerConfig::default().with_stack_traces(enabled))
    }

    pub fn config(&self) -> &TrackerConfig {
        self.recorder.config()
    }

    /// Start recording the target's operations.
    ///
    /// Installing twice is a no-op. Fails with
    /// [`TrackerError::Conflict`](crate::TrackerError::Conflict) when a
    /// different tracker is installed on the target.
    pub fn install<H: HookTarget + ?Sized>(&self, target: &H) -> Result<()> {
        let hooks = target.hook_point();
        match hooks.install(&self.recorder) {
            Ok(true) => {
                tracing::debug!(api_version = hooks.api_version(), "Operation tracker installed");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Operation tracker could not be installed");
                Err(e)
            }
        }
    }

    /// Stop recording. Leaves the target alone unless this tracker is the one
    /// installed there. Returns whether the tracker was removed.
    pub fn uninstall<H: HookTarget + ?Sized>(&self, target: &H) -> bool {
        let removed = target.hook_point().uninstall(&self.recorder);
        if removed {
            tracing::debug!(operations = self.operation_count(), "Operation tracker uninstalled");
        }
        removed
    }

    /// Whether this tracker is installed on the target.
    pub fn is_installed<H: HookTarget + ?Sized>(&self, target: &H) -> bool {
        target.hook_point().is_installed(&self.recorder)
    }

    /// Install on the target for as long as the returned guard lives.
    ///
    /// The guard uninstalls on drop, whether the scope ends normally, through
    /// an early return, or by unwinding.
    pub fn scope<'a, H: HookTarget + ?Sized>(&'a self, target: &'a H) -> Result<TrackerScope<'a>> {
        self.install(target)?;
        Ok(TrackerScope {
            tracker: self,
            hooks: target.hook_point(),
        })
    }

    /// Clear all four logs.
    pub fn reset(&self) {
        self.recorder.log.lock().clear();
        tracing::debug!("Operation tracker reset");
    }

    pub fn queries(&self) -> Vec<QueryRecord> {
        self.recorder.log.lock().queries.clone()
    }

    pub fn inserts(&self) -> Vec<InsertRecord> {
        self.recorder.log.lock().inserts.clone()
    }

    pub fn updates(&self) -> Vec<UpdateRecord> {
        self.recorder.log.lock().updates.clone()
    }

    pub fn removes(&self) -> Vec<RemoveRecord> {
        self.recorder.log.lock().removes.clone()
    }

    /// Number of records across all logs.
    pub fn operation_count(&self) -> usize {
        self.recorder.log.lock().len()
    }

    /// Time spent in recorded operations.
    pub fn total_time(&self) -> Duration {
        self.recorder.log.lock().total_time()
    }
}

/// Keeps a tracker installed until dropped.
#[derive(Debug)]
#[must_use = "the tracker is uninstalled as soon as the scope is dropped"]
pub struct TrackerScope<'a> {
    tracker: &'a Tracker,
    hooks: &'a HookPoint,
}

impl TrackerScope<'_> {
    pub fn tracker(&self) -> &Tracker {
        self.tracker
    }
}

impl Deref for TrackerScope<'_> {
    type Target = Tracker;

    fn deref(&self) -> &Tracker {
        self.tracker
    }
}

impl Drop for TrackerScope<'_> {
    fn drop(&mut self) {
        self.tracker.uninstall(self.hooks);
    }
}
