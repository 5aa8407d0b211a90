//! Errors raised while installing a tracker.

/// Failure to attach a tracker to a hook point.
///
/// Errors of the instrumented driver calls never show up here; they are
/// returned to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// Another tracker is installed on the hook point.
    #[error("hook point is already occupied by another tracker")]
    Conflict,

    /// The driver's hook point speaks a different hook API.
    #[error("incompatible hook point: expected API version {expected}, found {found}")]
    Incompatible { expected: u32, found: u32 },
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
