/// Session timer guard for timed contest activities
///
/// This module provides functionality to:
/// - Keep one countdown deadline per (user, activity) pair
/// - Persist the deadline across process restarts
/// - Detect naive tampering with the stored start time and restore the
///   original deadline instead of resetting the clock
/// - Fire a single expiry callback when time runs out

pub mod clock;
pub mod error;
pub mod integrity;
pub mod runner;
pub mod session;
pub mod store;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GuardError;
pub use runner::GuardRunner;
pub use session::{StoredSession, TimerSession};
pub use store::{FileStore, MemoryStore, SessionStore};
pub use timer::{GuardConfig, SessionGuard, complete_session};
