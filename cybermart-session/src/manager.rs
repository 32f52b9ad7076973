//! Session manager
//!
//! Sole owner of the session state and sole writer of the persisted token.
//!
//! Every mutation runs inside the state channel's write lock, and the token is
//! written to storage before the in-memory session changes, so a request issued
//! right after `login` already carries the new token.
//!
//! Profile fetches (startup hydration and `load_user`) are fenced by an epoch that
//! every login, register and logout advances. A fetch that resolves after the epoch
//! moved is discarded. Overlapping logins are not fenced against each other: the
//! last response to resolve wins.

use cybermart_api::AuthApi;
use cybermart_core::{
    log_operation_error, log_operation_start, log_operation_success, AuthResponse, ErrorContext,
    KeyValueStore, LoginRequest, RegisterRequest, StoreError, StoreResult, User,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::authorization::AuthorizationView;
use crate::session::{Session, SessionState};

/// How a profile fetch against the persisted token ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// The token was accepted and the user loaded
    Restored,
    /// Nothing was persisted; no request was made
    NoToken,
    /// The token was rejected (or unreadable) and the session was reset
    Invalidated,
    /// A login, register or logout happened meanwhile; the result was dropped
    Superseded,
    /// Startup hydration already ran in this process
    AlreadyRan,
}

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn KeyValueStore>,
    token_key: String,
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    hydration_started: AtomicBool,
}

impl SessionManager {
    /// Create a manager with an empty session and `loading` set
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn KeyValueStore>,
        token_key: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            api,
            store,
            token_key: token_key.into(),
            state,
            epoch: AtomicU64::new(0),
            hydration_started: AtomicBool::new(false),
        }
    }

    /// Observe every session change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Session {
        self.state.borrow().session.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().session.user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Freshly derived from the current session
    pub fn authorization(&self) -> AuthorizationView {
        self.state.borrow().authorization()
    }

    /// Wait until startup hydration has resolved
    pub async fn ready(&self) -> SessionState {
        let mut receiver = self.subscribe();
        let state = match receiver.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    /// Log in with credentials; on failure the session is left unchanged
    pub async fn login(&self, email: &str, password: &str) -> StoreResult<User> {
        log_operation_start!("login");
        debug!(email = %email, "Sending login request");

        let credentials = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let response = match self.api.login(&credentials).await {
            Ok(response) => response,
            Err(e) => {
                log_operation_error!("login", e);
                return Err(e);
            }
        };

        self.establish(response, "login")
    }

    /// Register an account and log into it; same contract as `login`
    pub async fn register(&self, user: &RegisterRequest) -> StoreResult<User> {
        log_operation_start!("register");
        debug!(email = %user.email, "Sending register request");

        let response = match self.api.register(user).await {
            Ok(response) => response,
            Err(e) => {
                log_operation_error!("register", e);
                return Err(e);
            }
        };

        self.establish(response, "register")
    }

    /// Forget the persisted token and empty the session
    pub fn logout(&self) {
        self.state.send_modify(|state| {
            self.clear_locked(state, "logout");
        });
        info!("Logged out");
    }

    /// Restore the session from a persisted token; runs at most once per manager.
    ///
    /// Clears `loading` once resolved, whatever the outcome. A rejected token resets
    /// the session instead of returning an error.
    pub async fn hydrate(&self) -> HydrationOutcome {
        if self.hydration_started.swap(true, Ordering::SeqCst) {
            debug!("Session hydration already ran");
            return HydrationOutcome::AlreadyRan;
        }

        log_operation_start!("hydrate");
        let outcome = self.load_user().await;

        self.state.send_modify(|state| state.loading = false);
        log_operation_success!("hydrate", outcome = ?outcome);
        outcome
    }

    /// Fetch the profile with the persisted token and replace the current user.
    ///
    /// Failure is treated as an invalid session and performs the logout reset.
    pub async fn load_user(&self) -> HydrationOutcome {
        let epoch = self.epoch.load(Ordering::SeqCst);

        let token = match self.store.get(&self.token_key) {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No persisted token, skipping profile fetch");
                return HydrationOutcome::NoToken;
            }
            Err(e) => {
                e.log();
                return self.invalidate(epoch, "persisted token unreadable");
            }
        };

        match self.api.profile().await {
            Ok(user) => {
                let applied = self.state.send_if_modified(|state| {
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        return false;
                    }
                    state.session = Session {
                        user: Some(user),
                        token: Some(token),
                    };
                    true
                });

                if applied {
                    info!("Session restored from persisted token");
                    HydrationOutcome::Restored
                } else {
                    debug!("Profile result superseded by a newer session change");
                    HydrationOutcome::Superseded
                }
            }
            Err(e) => {
                let invalid = StoreError::InvalidSession {
                    message: format!("profile fetch failed: {}", e),
                    context: ErrorContext::new("session_manager")
                        .with_operation("load_user")
                        .with_metadata("status", &e.status().map(|s| s.to_string()).unwrap_or_default()),
                };
                invalid.log();
                self.invalidate(epoch, "profile fetch failed")
            }
        }
    }

    /// Persist the issued token, then publish the new session
    fn establish(&self, response: AuthResponse, operation: &str) -> StoreResult<User> {
        let AuthResponse { token, user } = response;
        let mut persisted = Ok(());

        self.state.send_if_modified(|state| {
            if let Err(e) = self.store.put(&self.token_key, &token) {
                persisted = Err(e);
                return false;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            state.session = Session {
                user: Some(user.clone()),
                token: Some(token),
            };
            true
        });

        match persisted {
            Ok(()) => {
                log_operation_success!(operation, user_id = %user.id, role = %user.role);
                Ok(user)
            }
            Err(e) => {
                log_operation_error!(operation, e);
                Err(e)
            }
        }
    }

    /// Logout reset on behalf of a failed profile fetch, unless superseded
    fn invalidate(&self, epoch: u64, reason: &str) -> HydrationOutcome {
        let applied = self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            self.clear_locked(state, "invalidate");
            true
        });

        if applied {
            warn!(reason, "Persisted session invalid, session reset");
            HydrationOutcome::Invalidated
        } else {
            debug!(reason, "Stale profile failure ignored");
            HydrationOutcome::Superseded
        }
    }

    // Caller holds the state lock.
    fn clear_locked(&self, state: &mut SessionState, operation: &str) {
        if let Err(e) = self.store.remove(&self.token_key) {
            error!(operation, error = %e, "Failed to remove persisted token");
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        state.session = Session::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cybermart_core::{MemoryStore, Role};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const KEY: &str = "token";

    fn user(id: &str, role: &str) -> User {
        User {
            id: id.to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: format!("{}@x.com", id),
            role: Role::from(role.to_string()),
            extra: Default::default(),
        }
    }

    fn rejected(status: u16) -> StoreError {
        StoreError::Server {
            status,
            message: "rejected".to_string(),
            context: ErrorContext::new("mock_api"),
        }
    }

    #[derive(Clone)]
    enum Reply<T> {
        Ok(T),
        Reject(u16),
    }

    impl<T: Clone> Reply<T> {
        fn result(&self) -> StoreResult<T> {
            match self {
                Reply::Ok(value) => Ok(value.clone()),
                Reply::Reject(status) => Err(rejected(*status)),
            }
        }
    }

    /// Scripted auth API; records the token persisted when each call arrived
    struct MockAuthApi {
        store: Arc<MemoryStore>,
        auth: Mutex<Reply<AuthResponse>>,
        profile: Mutex<Reply<User>>,
        profile_calls: AtomicUsize,
        tokens_seen: Mutex<Vec<Option<String>>>,
        profile_entered: Notify,
        profile_gate: Option<Notify>,
    }

    impl MockAuthApi {
        fn new(store: Arc<MemoryStore>) -> Self {
            Self {
                store,
                auth: Mutex::new(Reply::Reject(401)),
                profile: Mutex::new(Reply::Reject(401)),
                profile_calls: AtomicUsize::new(0),
                tokens_seen: Mutex::new(Vec::new()),
                profile_entered: Notify::new(),
                profile_gate: None,
            }
        }

        fn gated(mut self) -> Self {
            self.profile_gate = Some(Notify::new());
            self
        }

        fn auth_replies(self, reply: Reply<AuthResponse>) -> Self {
            *self.auth.lock().unwrap() = reply;
            self
        }

        fn profile_replies(self, reply: Reply<User>) -> Self {
            *self.profile.lock().unwrap() = reply;
            self
        }

        fn record_token(&self) {
            let token = self.store.get(KEY).unwrap();
            self.tokens_seen.lock().unwrap().push(token);
        }
    }

    #[async_trait]
    impl AuthApi for MockAuthApi {
        async fn login(&self, _credentials: &LoginRequest) -> StoreResult<AuthResponse> {
            self.record_token();
            let reply = self.auth.lock().unwrap().clone();
            reply.result()
        }

        async fn register(&self, _user: &RegisterRequest) -> StoreResult<AuthResponse> {
            self.record_token();
            let reply = self.auth.lock().unwrap().clone();
            reply.result()
        }

        async fn profile(&self) -> StoreResult<User> {
            self.record_token();
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            self.profile_entered.notify_one();
            if let Some(gate) = &self.profile_gate {
                gate.notified().await;
            }
            let reply = self.profile.lock().unwrap().clone();
            reply.result()
        }
    }

    fn manager(api: Arc<MockAuthApi>, store: Arc<MemoryStore>) -> SessionManager {
        SessionManager::new(api, store, KEY)
    }

    fn auth(token: &str, id: &str, role: &str) -> Reply<AuthResponse> {
        Reply::Ok(AuthResponse {
            token: token.to_string(),
            user: user(id, role),
        })
    }

    #[tokio::test]
    async fn test_login_member_persists_token() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()).auth_replies(auth("T1", "a", "member")));
        let manager = manager(api, store.clone());

        let user = manager.login("a@x.com", "secret").await.unwrap();

        assert_eq!(user.role, Role::Member);
        assert_eq!(store.get(KEY).unwrap(), Some("T1".to_string()));
        let session = manager.session();
        assert_eq!(session.token.as_deref(), Some("T1"));
        assert_eq!(session.user.as_ref().map(|u| u.id.as_str()), Some("a"));
        assert!(manager.authorization().is_authenticated);
        assert!(!manager.authorization().is_admin);
    }

    #[tokio::test]
    async fn test_login_admin_sets_admin_flag() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()).auth_replies(auth("T2", "root", "admin")));
        let manager = manager(api, store.clone());

        manager.login("root@x.com", "secret").await.unwrap();

        assert!(manager.authorization().is_admin);
        assert_eq!(store.get(KEY).unwrap(), Some("T2".to_string()));
    }

    #[tokio::test]
    async fn test_failed_login_leaves_session_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()).auth_replies(auth("T1", "a", "member")));
        let manager = manager(api.clone(), store.clone());
        manager.login("a@x.com", "secret").await.unwrap();
        let before = manager.session();

        *api.auth.lock().unwrap() = Reply::Reject(401);
        let error = manager.login("a@x.com", "wrong").await.unwrap_err();

        assert_eq!(error.status(), Some(401));
        assert_eq!(manager.session(), before);
        assert_eq!(store.get(KEY).unwrap(), Some("T1".to_string()));
    }

    #[tokio::test]
    async fn test_register_behaves_like_login() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()).auth_replies(auth("R1", "new", "member")));
        let manager = manager(api, store.clone());

        let request = RegisterRequest {
            first_name: "New".to_string(),
            last_name: "User".to_string(),
            email: "new@x.com".to_string(),
            password: "pw".to_string(),
        };
        let user = manager.register(&request).await.unwrap();

        assert_eq!(user.id, "new");
        assert_eq!(store.get(KEY).unwrap(), Some("R1".to_string()));
        assert!(manager.authorization().is_authenticated);
    }

    #[tokio::test]
    async fn test_failed_register_propagates() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()).auth_replies(Reply::Reject(409)));
        let manager = manager(api, store.clone());

        let request = RegisterRequest {
            first_name: "Dup".to_string(),
            last_name: "User".to_string(),
            email: "dup@x.com".to_string(),
            password: "pw".to_string(),
        };
        let error = manager.register(&request).await.unwrap_err();

        assert_eq!(error.status(), Some(409));
        assert!(manager.session().is_empty());
        assert_eq!(store.get(KEY).unwrap(), None);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_info_logs_omit_credentials() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(
            MockAuthApi::new(store.clone()).auth_replies(auth("tok-SECRET", "a", "member")),
        );
        let manager = manager(api, store);
        manager.login("ann@x.com", "hunter2").await.unwrap();
        let request = RegisterRequest {
            first_name: "New".to_string(),
            last_name: "User".to_string(),
            email: "neo@x.com".to_string(),
            password: "pw-secret".to_string(),
        };
        manager.register(&request).await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("login"));
        assert!(output.contains("register"));
        for secret in ["ann@x.com", "neo@x.com", "hunter2", "pw-secret", "tok-SECRET"] {
            assert!(!output.contains(secret), "{:?} leaked into: {}", secret, output);
        }
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()).auth_replies(auth("T1", "a", "admin")));
        let manager = manager(api, store.clone());
        manager.login("a@x.com", "secret").await.unwrap();

        manager.logout();

        assert_eq!(store.get(KEY).unwrap(), None);
        assert!(manager.session().is_empty());
        assert_eq!(manager.authorization(), AuthorizationView::default());

        // Logging out twice is harmless
        manager.logout();
        assert!(manager.session().is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_without_token_skips_fetch() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(store.clone()));
        let manager = manager(api.clone(), store);
        let receiver = manager.subscribe();
        assert!(receiver.borrow().loading);

        let outcome = manager.hydrate().await;

        assert_eq!(outcome, HydrationOutcome::NoToken);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 0);
        assert!(!receiver.borrow().loading);
        assert!(manager.session().is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_restores_user() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "SAVED").unwrap();
        let api = Arc::new(MockAuthApi::new(store.clone()).profile_replies(Reply::Ok(user("a", "admin"))));
        let manager = manager(api.clone(), store.clone());

        assert!(manager.is_loading());
        let outcome = manager.hydrate().await;

        assert_eq!(outcome, HydrationOutcome::Restored);
        assert!(!manager.is_loading());
        assert_eq!(manager.session().token.as_deref(), Some("SAVED"));
        assert!(manager.authorization().is_admin);
        assert_eq!(api.tokens_seen.lock().unwrap().as_slice(), &[Some("SAVED".to_string())]);
    }

    #[tokio::test]
    async fn test_hydrate_with_rejected_token_resets() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "STALE").unwrap();
        let api = Arc::new(MockAuthApi::new(store.clone()).profile_replies(Reply::Reject(401)));
        let manager = manager(api, store.clone());

        let outcome = manager.hydrate().await;

        assert_eq!(outcome, HydrationOutcome::Invalidated);
        assert_eq!(store.get(KEY).unwrap(), None);
        assert!(manager.session().is_empty());
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_hydrate_runs_once() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "SAVED").unwrap();
        let api = Arc::new(MockAuthApi::new(store.clone()).profile_replies(Reply::Ok(user("a", "member"))));
        let manager = manager(api.clone(), store);

        assert_eq!(manager.hydrate().await, HydrationOutcome::Restored);
        assert_eq!(manager.hydrate().await, HydrationOutcome::AlreadyRan);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_waits_for_hydration() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "SAVED").unwrap();
        let api = Arc::new(
            MockAuthApi::new(store.clone())
                .gated()
                .profile_replies(Reply::Ok(user("a", "member"))),
        );
        let manager = manager(api.clone(), store);

        let release = async {
            api.profile_entered.notified().await;
            assert!(manager.is_loading());
            api.profile_gate.as_ref().unwrap().notify_one();
        };
        let (state, outcome, ()) = tokio::join!(manager.ready(), manager.hydrate(), release);

        assert_eq!(outcome, HydrationOutcome::Restored);
        assert!(!state.loading);
        assert_eq!(state.session.user.map(|u| u.id), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_loading_transitions_are_published() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "STALE").unwrap();
        let api = Arc::new(MockAuthApi::new(store.clone()).profile_replies(Reply::Reject(500)));
        let manager = manager(api, store);
        let mut receiver = manager.subscribe();

        assert!(receiver.borrow_and_update().loading);
        manager.hydrate().await;

        assert!(receiver.has_changed().unwrap());
        let state = receiver.borrow_and_update().clone();
        assert!(!state.loading);
        assert!(state.session.is_empty());
        assert!(!manager.ready().await.loading);
    }

    #[tokio::test]
    async fn test_stale_hydration_failure_does_not_clobber_login() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "OLD").unwrap();
        let api = Arc::new(
            MockAuthApi::new(store.clone())
                .gated()
                .auth_replies(auth("T2", "root", "admin"))
                .profile_replies(Reply::Reject(401)),
        );
        let manager = manager(api.clone(), store.clone());

        let (outcome, login) = tokio::join!(manager.hydrate(), async {
            api.profile_entered.notified().await;
            let login = manager.login("root@x.com", "secret").await;
            if let Some(gate) = &api.profile_gate {
                gate.notify_one();
            }
            login
        });

        assert!(login.is_ok());
        assert_eq!(outcome, HydrationOutcome::Superseded);
        assert_eq!(store.get(KEY).unwrap(), Some("T2".to_string()));
        assert!(manager.authorization().is_admin);
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_stale_hydration_success_does_not_resurrect_after_logout() {
        let store = Arc::new(MemoryStore::new());
        store.put(KEY, "SAVED").unwrap();
        let api = Arc::new(
            MockAuthApi::new(store.clone())
                .gated()
                .profile_replies(Reply::Ok(user("a", "member"))),
        );
        let manager = manager(api.clone(), store.clone());

        let (outcome, ()) = tokio::join!(manager.hydrate(), async {
            api.profile_entered.notified().await;
            manager.logout();
            if let Some(gate) = &api.profile_gate {
                gate.notify_one();
            }
        });

        assert_eq!(outcome, HydrationOutcome::Superseded);
        assert!(manager.session().is_empty());
        assert_eq!(store.get(KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_user_refreshes_profile() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(
            MockAuthApi::new(store.clone())
                .auth_replies(auth("T1", "a", "member"))
                .profile_replies(Reply::Ok(user("a", "admin"))),
        );
        let manager = manager(api, store);
        manager.login("a@x.com", "secret").await.unwrap();
        assert!(!manager.authorization().is_admin);

        assert_eq!(manager.load_user().await, HydrationOutcome::Restored);
        assert!(manager.authorization().is_admin);
        assert_eq!(manager.session().token.as_deref(), Some("T1"));
    }

    /// Store whose writes always fail
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Ok(None)
        }

        fn put(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Err(cybermart_core::storage_error!("read-only", "test_store"))
        }

        fn remove(&self, _key: &str) -> StoreResult<()> {
            Err(cybermart_core::storage_error!("read-only", "test_store"))
        }
    }

    #[tokio::test]
    async fn test_unpersistable_token_fails_login() {
        let mock_store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockAuthApi::new(mock_store).auth_replies(auth("T1", "a", "member")));
        let manager = SessionManager::new(api, Arc::new(ReadOnlyStore), KEY);

        let error = manager.login("a@x.com", "secret").await.unwrap_err();
        assert!(matches!(error, StoreError::Storage { .. }));
        assert!(manager.session().is_empty());

        // Logout has no failure mode even when removal fails
        manager.logout();
        assert!(manager.session().is_empty());
    }
}
