use thiserror::Error;

/// Failure taxonomy for the session guard.
///
/// Every variant except `NotResumable` and `Storage` degrades inside the
/// guard to "preserve the prior deadline" and is only logged; none should
/// terminate the hosting flow.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The stored integrity tag does not match the stored start time, or
    /// the stored start time diverges from the copy held in memory.
    #[error("integrity check failed for session '{session_key}'")]
    TamperDetected { session_key: String },

    /// The stored start time is in the future or implausibly old.
    #[error("implausible stored start time for session '{session_key}': {reason}")]
    InvalidTimestamp { session_key: String, reason: String },

    /// `tick()` was called with no persisted state and no prior `start()`.
    #[error("no persisted state for session '{session_key}' and start() was never called")]
    MissingSession { session_key: String },

    /// Validation failed on a fresh load with no in-memory fallback. The
    /// activity cannot be safely resumed; the caller must re-initialize it
    /// through the server-authoritative path.
    #[error("session '{session_key}' cannot be resumed; a fresh server-side start is required")]
    NotResumable {
        session_key: String,
        #[source]
        source: Box<GuardError>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
