use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::guard::clock::Clock;
use crate::guard::error::GuardError;
use crate::guard::integrity;
use crate::guard::session::{StoredSession, TimerSession};
use crate::guard::store::{ACTIVE_SESSION_KEY, SessionStore, start_time_key, tag_key};

/// Validation bounds for restored sessions.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Oldest a stored session may be before it is rejected as bogus.
    pub max_session_age_hours: u64,

    /// Forward skew tolerated before a stored start time counts as being
    /// in the future.
    pub clock_skew_leeway_secs: i64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_session_age_hours: 24,
            clock_skew_leeway_secs: 5,
        }
    }
}

type ExpireCallback = Box<dyn FnOnce() + Send>;

/// Countdown guard for one timed activity.
///
/// Produces a monotonically decreasing "seconds remaining" value that
/// survives restarts, re-validating persisted state on every tick. All
/// anomalies degrade to best-effort preservation of the original deadline;
/// the guard never fabricates extra time.
pub struct SessionGuard {
    session_key: String,
    duration_secs: u64,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: GuardConfig,
    /// Last-known-good session, used to repair tampered storage.
    session: Option<TimerSession>,
    on_expire: Option<ExpireCallback>,
    expired: bool,
}

impl SessionGuard {
    pub fn new(
        session_key: impl Into<String>,
        duration_secs: u64,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: GuardConfig,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            duration_secs,
            store,
            clock,
            config,
            session: None,
            on_expire: None,
            expired: false,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Whether the one-shot expiry callback has already fired.
    pub fn has_expired(&self) -> bool {
        self.expired
    }

    /// Create the session, or adopt a previously persisted one.
    ///
    /// Idempotent across restarts: a second `start()` for the same key
    /// never resets `start_time`.
    pub fn start(&mut self) -> Result<TimerSession, GuardError> {
        if let Some(session) = self.reconcile()? {
            debug!(session_key = %self.session_key, "resuming persisted timer session");
            self.adopt_active_pointer()?;
            return Ok(session);
        }

        let session = TimerSession::begin(
            self.session_key.clone(),
            self.clock.now(),
            self.duration_secs,
        );
        self.persist(&session)?;
        self.adopt_active_pointer()?;

        info!(
            session_key = %self.session_key,
            duration_secs = self.duration_secs,
            "started timer session"
        );

        self.session = Some(session.clone());
        Ok(session)
    }

    /// Load and validate persisted state. `Ok(None)` when nothing is
    /// persisted and no in-memory copy exists.
    pub fn restore(&mut self) -> Result<Option<TimerSession>, GuardError> {
        self.reconcile()
    }

    /// Seconds remaining, clamped to zero after expiry.
    ///
    /// Re-validates persisted state on every call so tampering introduced
    /// between ticks is caught. Once the countdown reaches zero the
    /// registered expiry callback fires exactly once; later calls keep
    /// returning `Ok(0)`.
    pub fn tick(&mut self) -> Result<u64, GuardError> {
        let Some(session) = self.reconcile()? else {
            return Err(GuardError::MissingSession {
                session_key: self.session_key.clone(),
            });
        };

        let remaining = session.remaining_secs(self.clock.now());

        if remaining == 0 && !self.expired {
            self.expired = true;
            info!(session_key = %self.session_key, "timer session expired");
            if let Some(callback) = self.on_expire.take() {
                callback();
            }
        }

        Ok(remaining)
    }

    /// Register the callback fired exactly once when `tick()` first yields
    /// zero.
    pub fn on_expire<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_expire = Some(Box::new(callback));
    }

    /// Drop in-memory state and the pending callback. Persisted state is
    /// NOT cleared; that happens only on `complete()`.
    pub fn dispose(&mut self) {
        self.session = None;
        self.on_expire = None;
        debug!(session_key = %self.session_key, "guard disposed, persisted state retained");
    }

    /// Remove all persisted state for this session. Called when the timed
    /// activity finishes normally or is abandoned.
    pub fn complete(&mut self) -> Result<(), GuardError> {
        complete_session(self.store.as_ref(), &self.session_key)?;
        self.session = None;
        self.on_expire = None;
        Ok(())
    }

    /// Load the stored pair, validate it, and reconcile it against the
    /// in-memory last-known-good copy.
    fn reconcile(&mut self) -> Result<Option<TimerSession>, GuardError> {
        let start_raw = self.store.get(&start_time_key(&self.session_key))?;
        let tag_raw = self.store.get(&tag_key(&self.session_key))?;

        let verdict = match (start_raw, tag_raw) {
            (None, None) => {
                let Some(session) = self.session.clone() else {
                    return Ok(None);
                };
                // Storage vanished mid-activity. Clearing it must not grant
                // a fresh clock, so the original deadline is written back.
                warn!(
                    session_key = %self.session_key,
                    "persisted state disappeared; restoring prior deadline"
                );
                self.persist(&session)?;
                return Ok(Some(session));
            }
            (Some(start_raw), Some(tag)) => StoredSession::parse(&start_raw, &tag)
                .map_err(|_| GuardError::InvalidTimestamp {
                    session_key: self.session_key.clone(),
                    reason: format!("unparseable start time '{start_raw}'"),
                })
                .and_then(|stored| {
                    self.validate(&stored)?;
                    Ok(stored)
                }),
            // Half a pair is a mangled record.
            _ => Err(GuardError::TamperDetected {
                session_key: self.session_key.clone(),
            }),
        };

        match verdict {
            Ok(stored) => {
                let session = TimerSession {
                    session_key: self.session_key.clone(),
                    start_time: stored.start_time,
                    duration_secs: self.duration_secs,
                    integrity_tag: stored.integrity_tag,
                };
                self.session = Some(session.clone());
                Ok(Some(session))
            }
            Err(cause) => self.preserve_prior_deadline(cause),
        }
    }

    fn validate(&self, stored: &StoredSession) -> Result<(), GuardError> {
        if !integrity::verify_tag(&self.session_key, stored.start_time, &stored.integrity_tag) {
            return Err(GuardError::TamperDetected {
                session_key: self.session_key.clone(),
            });
        }

        // A forged-but-consistent pair still loses to the copy we hold.
        if let Some(session) = &self.session {
            if session.start_time != stored.start_time {
                return Err(GuardError::TamperDetected {
                    session_key: self.session_key.clone(),
                });
            }
        }

        let now = self.clock.now();

        if stored.start_time > now + Duration::seconds(self.config.clock_skew_leeway_secs) {
            return Err(GuardError::InvalidTimestamp {
                session_key: self.session_key.clone(),
                reason: "start time is in the future".to_string(),
            });
        }

        let max_age = Duration::hours(self.config.max_session_age_hours as i64);
        if now - stored.start_time > max_age {
            return Err(GuardError::InvalidTimestamp {
                session_key: self.session_key.clone(),
                reason: format!(
                    "start time exceeds the {}h sanity bound",
                    self.config.max_session_age_hours
                ),
            });
        }

        Ok(())
    }

    /// Validation failed. With a last-known-good copy in memory the guard
    /// repairs storage and keeps the original deadline; without one the
    /// activity cannot be safely resumed.
    fn preserve_prior_deadline(
        &mut self,
        cause: GuardError,
    ) -> Result<Option<TimerSession>, GuardError> {
        match self.session.clone() {
            Some(session) => {
                warn!(
                    session_key = %self.session_key,
                    %cause,
                    "stored session failed validation; restoring prior deadline"
                );
                self.persist(&session)?;
                Ok(Some(session))
            }
            None => Err(GuardError::NotResumable {
                session_key: self.session_key.clone(),
                source: Box::new(cause),
            }),
        }
    }

    fn persist(&self, session: &TimerSession) -> Result<(), GuardError> {
        self.store.set(
            &start_time_key(&self.session_key),
            &session.start_time.to_rfc3339(),
        )?;
        self.store
            .set(&tag_key(&self.session_key), &session.integrity_tag)?;
        Ok(())
    }

    /// Point the active-session marker at this key, clearing state left by
    /// a different activity.
    fn adopt_active_pointer(&self) -> Result<(), GuardError> {
        if let Some(previous) = self.store.get(ACTIVE_SESSION_KEY)? {
            if previous != self.session_key {
                debug!(
                    stale = %previous,
                    "clearing state left by a different activity"
                );
                self.store.remove(&start_time_key(&previous))?;
                self.store.remove(&tag_key(&previous))?;
            }
        }
        self.store.set(ACTIVE_SESSION_KEY, &self.session_key)?;
        Ok(())
    }
}

/// Remove all persisted state for `session_key`, clearing the active
/// pointer when it names that key. Usable without a live guard.
pub fn complete_session(store: &dyn SessionStore, session_key: &str) -> Result<(), GuardError> {
    store.remove(&start_time_key(session_key))?;
    store.remove(&tag_key(session_key))?;

    if let Some(active) = store.get(ACTIVE_SESSION_KEY)? {
        if active == session_key {
            store.remove(ACTIVE_SESSION_KEY)?;
        }
    }

    info!(session_key, "timer session completed and cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::clock::ManualClock;
    use crate::guard::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        ))
    }

    fn make_guard(
        key: &str,
        duration_secs: u64,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> SessionGuard {
        SessionGuard::new(key, duration_secs, store, clock, GuardConfig::default())
    }

    #[test]
    fn test_tick_right_after_start_is_full_duration() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store, clock);

        guard.start().unwrap();
        assert_eq!(guard.tick().unwrap(), 600);
    }

    #[test]
    fn test_start_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());

        let first = guard.start().unwrap();
        clock.advance_secs(30);
        let second = guard.start().unwrap();
        assert_eq!(first.start_time, second.start_time);

        // Same storage, new process: still the same start time.
        let mut reloaded = make_guard("user1_round42", 600, store, clock);
        let third = reloaded.start().unwrap();
        assert_eq!(first.start_time, third.start_time);
    }

    #[test]
    fn test_restore_after_reload_reflects_elapsed_time() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();

        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());
        guard.start().unwrap();
        drop(guard);

        clock.advance_secs(30);

        let mut reloaded = make_guard("user1_round42", 600, store, clock);
        let session = reloaded.restore().unwrap().expect("session should persist");
        assert_eq!(session.duration_secs, 600);
        assert_eq!(reloaded.tick().unwrap(), 570);
    }

    #[test]
    fn test_restore_without_state_is_none() {
        let store = Arc::new(MemoryStore::new());
        let mut guard = make_guard("user1_round42", 600, store, test_clock());
        assert!(guard.restore().unwrap().is_none());
    }

    #[test]
    fn test_tick_without_session_is_missing_session() {
        let store = Arc::new(MemoryStore::new());
        let mut guard = make_guard("user1_round42", 600, store, test_clock());
        assert!(matches!(
            guard.tick(),
            Err(GuardError::MissingSession { .. })
        ));
    }

    #[test]
    fn test_tampered_start_time_restores_prior_deadline() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());

        let original = guard.start().unwrap();
        clock.advance_secs(100);

        // Move the stored start forward to fake a later beginning (more
        // time left) without fixing the tag.
        let forged = (original.start_time + Duration::seconds(90)).to_rfc3339();
        store.set(&start_time_key("user1_round42"), &forged).unwrap();

        assert_eq!(guard.tick().unwrap(), 500);

        // Storage was repaired back to the original pair.
        assert_eq!(
            store.get(&start_time_key("user1_round42")).unwrap(),
            Some(original.start_time.to_rfc3339())
        );
        assert_eq!(
            store.get(&tag_key("user1_round42")).unwrap(),
            Some(original.integrity_tag)
        );
    }

    #[test]
    fn test_forged_consistent_pair_loses_to_memory() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());

        let original = guard.start().unwrap();
        clock.advance_secs(100);

        // An attacker who read the client code can recompute a valid tag
        // for a shifted start time. The in-memory copy still wins.
        let forged_time = original.start_time + Duration::seconds(90);
        let forged_tag = integrity::compute_tag("user1_round42", forged_time);
        store
            .set(&start_time_key("user1_round42"), &forged_time.to_rfc3339())
            .unwrap();
        store.set(&tag_key("user1_round42"), &forged_tag).unwrap();

        assert_eq!(guard.tick().unwrap(), 500);
    }

    #[test]
    fn test_cleared_storage_mid_activity_keeps_deadline() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());

        guard.start().unwrap();
        clock.advance_secs(60);

        store.remove(&start_time_key("user1_round42")).unwrap();
        store.remove(&tag_key("user1_round42")).unwrap();

        assert_eq!(guard.tick().unwrap(), 540);
        assert!(
            store
                .get(&start_time_key("user1_round42"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_fresh_load_with_tampered_state_is_not_resumable() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();

        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());
        let original = guard.start().unwrap();
        drop(guard);

        let forged = (original.start_time + Duration::seconds(90)).to_rfc3339();
        store.set(&start_time_key("user1_round42"), &forged).unwrap();

        // Fresh process, no in-memory fallback: resumption must be refused.
        let mut reloaded = make_guard("user1_round42", 600, store, clock);
        let err = reloaded.restore().unwrap_err();
        match err {
            GuardError::NotResumable { source, .. } => {
                assert!(matches!(*source, GuardError::TamperDetected { .. }));
            }
            other => panic!("expected NotResumable, got {other:?}"),
        }
    }

    #[test]
    fn test_future_start_time_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();

        // A consistent pair dated an hour ahead of the clock.
        let future = clock.now() + Duration::hours(1);
        let forged = TimerSession::begin("user1_round42", future, 600);
        store
            .set(&start_time_key("user1_round42"), &future.to_rfc3339())
            .unwrap();
        store
            .set(&tag_key("user1_round42"), &forged.integrity_tag)
            .unwrap();

        let mut guard = make_guard("user1_round42", 600, store, clock);
        let err = guard.restore().unwrap_err();
        match err {
            GuardError::NotResumable { source, .. } => {
                assert!(matches!(*source, GuardError::InvalidTimestamp { .. }));
            }
            other => panic!("expected NotResumable, got {other:?}"),
        }
    }

    #[test]
    fn test_implausibly_old_start_time_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();

        let stale = clock.now() - Duration::hours(48);
        let forged = TimerSession::begin("user1_round42", stale, 600);
        store
            .set(&start_time_key("user1_round42"), &stale.to_rfc3339())
            .unwrap();
        store
            .set(&tag_key("user1_round42"), &forged.integrity_tag)
            .unwrap();

        let mut guard = make_guard("user1_round42", 600, store, clock);
        assert!(matches!(
            guard.restore(),
            Err(GuardError::NotResumable { .. })
        ));
    }

    #[test]
    fn test_expiry_callback_fires_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 2, store, clock.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        guard.on_expire(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        guard.start().unwrap();
        assert_eq!(guard.tick().unwrap(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        clock.advance_secs(3);
        assert_eq!(guard.tick().unwrap(), 0);
        assert_eq!(guard.tick().unwrap(), 0);
        assert_eq!(guard.tick().unwrap(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(guard.has_expired());
    }

    #[test]
    fn test_expiry_after_reload_cycle() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();

        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());
        guard.start().unwrap();
        drop(guard);

        clock.advance_secs(601);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut reloaded = make_guard("user1_round42", 600, store, clock);
        reloaded.on_expire(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reloaded.restore().unwrap();
        assert_eq!(reloaded.tick().unwrap(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_complete_clears_persisted_state() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());

        guard.start().unwrap();
        guard.complete().unwrap();

        assert_eq!(store.get(ACTIVE_SESSION_KEY).unwrap(), None);

        let mut reloaded = make_guard("user1_round42", 600, store, clock);
        assert!(reloaded.restore().unwrap().is_none());
    }

    #[test]
    fn test_dispose_keeps_persisted_state() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 600, store.clone(), clock.clone());

        guard.start().unwrap();
        guard.dispose();

        let mut reloaded = make_guard("user1_round42", 600, store, clock);
        assert!(reloaded.restore().unwrap().is_some());
    }

    #[test]
    fn test_new_activity_cleans_up_stale_session() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();

        let mut round1 = make_guard("user1_round1", 600, store.clone(), clock.clone());
        round1.start().unwrap();

        let mut round2 = make_guard("user1_round2", 300, store.clone(), clock.clone());
        round2.start().unwrap();

        assert_eq!(
            store.get(ACTIVE_SESSION_KEY).unwrap(),
            Some("user1_round2".to_string())
        );
        assert_eq!(store.get(&start_time_key("user1_round1")).unwrap(), None);
        assert_eq!(store.get(&tag_key("user1_round1")).unwrap(), None);
    }

    #[test]
    fn test_dispose_drops_pending_callback() {
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let mut guard = make_guard("user1_round42", 2, store, clock.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        guard.on_expire(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        guard.start().unwrap();
        guard.dispose();

        clock.advance_secs(5);
        // tick after dispose re-adopts the persisted session but the
        // callback is gone.
        assert_eq!(guard.tick().unwrap(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
