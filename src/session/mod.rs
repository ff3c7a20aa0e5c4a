// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session Manager for the download-client backend
//!
//! Owns the single authenticated session (the qBittorrent `SID` cookie)
//! shared by the placement loop and every request handler.
//!
//! ## Rules
//!
//! - **Reuse**: a session that carries a credential is handed out without any
//!   network call.
//! - **Cooldown**: a login is attempted at most once per cooldown window,
//!   whether the previous attempt succeeded or failed. Callers arriving inside
//!   the window get the current (possibly unauthenticated) session back.
//! - **Never fatal**: login failures are logged and swallowed. Callers must
//!   still handle authorization failures from the backend themselves.
//!
//! ## Concurrency
//!
//! The credential and the last-attempt timestamp live behind one async mutex
//! and the check-login-store sequence runs under it, so two callers can never
//! both decide to log in, and a slow login can never overwrite a newer one.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default minimum spacing between login attempts: 60 seconds.
pub const DEFAULT_LOGIN_COOLDOWN_SECS: u64 = 60;

/// Performs the actual login against the backend.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Log in and return the session credential on success.
    async fn login(&self) -> anyhow::Result<String>;
}

/// Opaque authenticated context handed to callers.
///
/// Cheap to clone. A clone is a snapshot: it does not observe later
/// invalidation or re-login.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    sid: Option<String>,
}

impl Session {
    /// A session carrying the given credential.
    pub fn authenticated(sid: impl Into<String>) -> Self {
        Self { sid: Some(sid.into()) }
    }

    /// A session without a credential.
    pub fn anonymous() -> Self {
        Self { sid: None }
    }

    /// The `SID` cookie value, if any.
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Whether this session carries a non-empty credential.
    pub fn is_authenticated(&self) -> bool {
        self.sid.as_deref().is_some_and(|sid| !sid.is_empty())
    }

    /// Value for a `Cookie` request header.
    pub fn cookie_header(&self) -> Option<String> {
        self.sid().map(|sid| format!("SID={}", sid))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum time between two login attempts.
    pub login_cooldown: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_cooldown: Duration::from_secs(DEFAULT_LOGIN_COOLDOWN_SECS),
        }
    }
}

impl SessionConfig {
    pub fn with_cooldown(login_cooldown: Duration) -> Self {
        Self { login_cooldown }
    }
}

/// State guarded by the manager's mutex.
#[derive(Debug, Default)]
struct SessionState {
    session: Session,
    /// When the last login attempt started, regardless of outcome.
    last_attempt: Option<Instant>,
}

impl SessionState {
    fn cooldown_elapsed(&self, cooldown: Duration) -> bool {
        match self.last_attempt {
            Some(at) => at.elapsed() >= cooldown,
            None => true,
        }
    }
}

/// Guards the shared backend session.
pub struct SessionManager {
    state: Mutex<SessionState>,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, config: SessionConfig) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            authenticator,
            config,
        }
    }

    /// Return a session believed to be usable.
    ///
    /// Never fails: when no credential is held and the cooldown forbids a new
    /// login, or the login itself fails, the current unauthenticated session is
    /// returned and the backend will reject the call.
    pub async fn acquire(&self) -> Session {
        let mut state = self.state.lock().await;

        if state.session.is_authenticated() {
            return state.session.clone();
        }

        if !state.cooldown_elapsed(self.config.login_cooldown) {
            tracing::debug!("skipping login, cooldown window has not elapsed");
            return state.session.clone();
        }

        // Recorded before the attempt so failures are rate-limited too
        state.last_attempt = Some(Instant::now());

        tracing::info!("logging in to download client");
        match self.authenticator.login().await {
            Ok(sid) if !sid.is_empty() => {
                state.session = Session::authenticated(sid);
                tracing::info!("login successful");
            }
            Ok(_) => {
                tracing::warn!("login returned no session credential");
            }
            Err(e) => {
                tracing::warn!(error = %e, "login failed");
            }
        }

        state.session.clone()
    }

    /// Drop the stored credential unconditionally so the next `acquire`
    /// re-evaluates.
    ///
    /// Request paths that saw a rejection use [`invalidate_stale`] instead,
    /// which cannot discard a credential another caller just obtained.
    ///
    /// [`invalidate_stale`]: SessionManager::invalidate_stale
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if state.session.is_authenticated() {
            tracing::info!("session invalidated");
        }
        state.session = Session::anonymous();
    }

    /// Drop the stored credential only if it is still `stale`.
    ///
    /// Used after the backend rejected `stale`: if another caller has logged in
    /// since, its fresh credential is kept.
    pub async fn invalidate_stale(&self, stale: &Session) {
        let mut state = self.state.lock().await;
        if state.session == *stale {
            if state.session.is_authenticated() {
                tracing::info!("session rejected by backend, invalidated");
            }
            state.session = Session::anonymous();
        } else {
            tracing::debug!("session already replaced, keeping the newer credential");
        }
    }

    /// Whether a credential is currently held. Does not contact the backend.
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.session.is_authenticated()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts logins; hands out `sid-<n>` or fails while `failing` is set.
    #[derive(Default)]
    struct CountingAuth {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Authenticator for CountingAuth {
        async fn login(&self) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            Ok(format!("sid-{}", n))
        }
    }

    fn manager(auth: Arc<CountingAuth>) -> SessionManager {
        SessionManager::new(auth, SessionConfig::with_cooldown(Duration::from_secs(60)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_logs_in() {
        let auth = Arc::new(CountingAuth::default());
        let sessions = manager(auth.clone());

        let session = sessions.acquire().await;
        assert!(session.is_authenticated());
        assert_eq!(session.sid(), Some("sid-1"));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_session_reused_without_network() {
        let auth = Arc::new(CountingAuth::default());
        let sessions = manager(auth.clone());

        sessions.acquire().await;
        tokio::time::advance(Duration::from_secs(600)).await;
        let session = sessions.acquire().await;

        assert_eq!(session.sid(), Some("sid-1"));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_starts_cooldown() {
        let auth = Arc::new(CountingAuth::default());
        auth.failing.store(true, Ordering::SeqCst);
        let sessions = manager(auth.clone());

        let session = sessions.acquire().await;
        assert!(!session.is_authenticated());

        // Inside the window: no new attempt
        tokio::time::advance(Duration::from_secs(30)).await;
        let session = sessions.acquire().await;
        assert!(!session.is_authenticated());
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

        // Window elapsed: one more attempt, which now succeeds
        auth.failing.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        let session = sessions.acquire().await;
        assert!(session.is_authenticated());
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_login_also_starts_cooldown() {
        let auth = Arc::new(CountingAuth::default());
        let sessions = manager(auth.clone());

        sessions.acquire().await;
        sessions.invalidate().await;

        // Re-login right after a successful one is suppressed
        tokio::time::advance(Duration::from_secs(10)).await;
        let session = sessions.acquire().await;
        assert!(!session.is_authenticated());
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        let session = sessions.acquire().await;
        assert_eq!(session.sid(), Some("sid-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_logs_in_once() {
        let auth = Arc::new(CountingAuth {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let sessions = Arc::new(manager(auth.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sessions = sessions.clone();
            handles.push(tokio::spawn(async move { sessions.acquire().await }));
        }

        for handle in handles {
            let session = handle.await.unwrap();
            assert_eq!(session.sid(), Some("sid-1"));
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_stale_keeps_newer_credential() {
        let auth = Arc::new(CountingAuth::default());
        let sessions = manager(auth.clone());

        let first = sessions.acquire().await;
        sessions.invalidate_stale(&first).await;
        assert!(!sessions.is_authenticated().await);

        tokio::time::advance(Duration::from_secs(61)).await;
        let second = sessions.acquire().await;
        assert_eq!(second.sid(), Some("sid-2"));

        // A late rejection of the first credential must not clear the second
        sessions.invalidate_stale(&first).await;
        assert!(sessions.is_authenticated().await);
    }

    #[test]
    fn test_session_debug_hides_credential() {
        let session = Session::authenticated("super-secret-sid");
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("super-secret-sid"));
        assert_eq!(session.cookie_header().as_deref(), Some("SID=super-secret-sid"));
        assert!(Session::anonymous().cookie_header().is_none());
    }
}
