//! Credential provider: cached access token, silent refresh, interactive login.

pub mod oauth;
pub mod pkce;
pub mod storage;
pub mod tokens;

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{DiagnosticsReport, DiagnosticsSink};
use crate::inflight::InFlight;

pub use oauth::OAuthClient;
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use tokens::{AccessToken, StoredTokens, UserIdentity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("sign-in failed: {0}")]
    LoginFailed(String),
    #[error("sign-in timed out")]
    LoginTimedOut,
    #[error("sign-in callback state did not match the request")]
    StateMismatch,
    #[error("sign-in was abandoned before it finished")]
    Abandoned,
    #[error("token endpoint error (status {status:?}): {message}")]
    TokenEndpoint { status: Option<u16>, message: String },
    #[error("token storage error: {0}")]
    Storage(String),
    #[error("invalid auth configuration: {0}")]
    Configuration(String),
}

/// Source of access tokens for backend calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` means "not signed in". Only an interactive call can fail,
    /// and only when the login flow itself fails.
    async fn get_access_token(&self, interactive: bool) -> Result<Option<AccessToken>, AuthError>;
}

/// The identity provider endpoints the manager drives.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// Full interactive login; resolves once the user finished in the browser.
    async fn authorize(&self) -> Result<StoredTokens, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<StoredTokens, AuthError>;
    async fn user_info(&self, token: &AccessToken) -> Result<UserIdentity, AuthError>;
}

pub struct AuthManager {
    server: Arc<dyn AuthorizationServer>,
    store: Arc<dyn TokenStore>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    identity: Mutex<Option<UserIdentity>>,
    login: InFlight<Result<AccessToken, AuthError>>,
    refresh: InFlight<Option<AccessToken>>,
}

impl AuthManager {
    pub fn new(server: Arc<dyn AuthorizationServer>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            server,
            store,
            diagnostics: None,
            identity: Mutex::new(None),
            login: InFlight::new(),
            refresh: InFlight::new(),
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read-only: never refreshes or clears the stored tokens. An expired
    /// token still counts while a refresh token is stored.
    pub async fn is_signed_in(&self) -> bool {
        match self.store.load().await {
            Ok(Some(tokens)) => !tokens.is_expired() || tokens.refresh_token.is_some(),
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read stored tokens: {}", e);
                false
            }
        }
    }

    /// Interactive login. Concurrent callers share one browser flow.
    pub async fn login(&self) -> Result<AccessToken, AuthError> {
        self.login
            .run(|| self.run_login())
            .await
            .unwrap_or(Err(AuthError::Abandoned))
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.set_identity(None);
        self.store.clear().await?;
        info!("Signed out");
        Ok(())
    }

    async fn run_login(&self) -> Result<AccessToken, AuthError> {
        info!("Starting interactive sign-in");
        let tokens = self.server.authorize().await?;
        self.store.save(&tokens).await?;

        let token = tokens.access_token();
        self.after_acquire(&token).await;
        info!("Sign-in complete");
        Ok(token)
    }

    async fn stored_token(&self) -> Option<AccessToken> {
        let tokens = match self.store.load().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read stored tokens: {}", e);
                return None;
            }
        };

        if !tokens.is_expired() {
            return Some(tokens.access_token());
        }

        let Some(refresh_token) = tokens.refresh_token else {
            debug!("Access token expired and no refresh token is stored");
            self.forget().await;
            return None;
        };

        self.refresh
            .run(|| self.refresh_with(refresh_token))
            .await
            .flatten()
    }

    async fn refresh_with(&self, refresh_token: String) -> Option<AccessToken> {
        debug!("Access token expired, refreshing");
        match self.server.refresh(&refresh_token).await {
            Ok(tokens) => {
                if let Err(e) = self.store.save(&tokens).await {
                    warn!("Could not persist refreshed tokens: {}", e);
                }
                let token = tokens.access_token();
                self.after_acquire(&token).await;
                Some(token)
            }
            Err(e) => {
                warn!("Token refresh failed, clearing stored credentials: {}", e);
                self.forget().await;
                None
            }
        }
    }

    async fn forget(&self) {
        self.set_identity(None);
        if let Err(e) = self.store.clear().await {
            warn!("Could not clear stored tokens: {}", e);
        }
    }

    /// Profile fetch and diagnostics. Failures are logged and dropped.
    async fn after_acquire(&self, token: &AccessToken) {
        match self.server.user_info(token).await {
            Ok(identity) => {
                debug!("Signed in as {}", identity.id);
                self.set_identity(Some(identity));
            }
            Err(e) => debug!("Profile fetch failed: {}", e),
        }

        if let Some(sink) = &self.diagnostics {
            let report = DiagnosticsReport::current(self.identity().map(|i| i.id));
            if let Err(e) = sink.report(token, &report).await {
                debug!("Diagnostics report failed: {}", e);
            }
        }
    }

    fn set_identity(&self, identity: Option<UserIdentity>) {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = identity;
    }
}

#[async_trait]
impl CredentialProvider for AuthManager {
    async fn get_access_token(&self, interactive: bool) -> Result<Option<AccessToken>, AuthError> {
        if let Some(token) = self.stored_token().await {
            return Ok(Some(token));
        }
        if !interactive {
            return Ok(None);
        }
        self.login().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeServer {
        authorize_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        fail_authorize: bool,
        fail_refresh: bool,
        fail_profile: bool,
    }

    fn tokens(access: &str, expires_in_minutes: i64, refresh: Option<&str>) -> StoredTokens {
        StoredTokens {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(Utc::now() + Duration::minutes(expires_in_minutes)),
            token_type: "Bearer".to_string(),
        }
    }

    #[async_trait]
    impl AuthorizationServer for FakeServer {
        async fn authorize(&self) -> Result<StoredTokens, AuthError> {
            self.authorize_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_authorize {
                return Err(AuthError::LoginFailed("access_denied".to_string()));
            }
            Ok(tokens("from-login", 60, Some("refresh-1")))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<StoredTokens, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_refresh {
                return Err(AuthError::TokenEndpoint {
                    status: Some(400),
                    message: "invalid_grant".to_string(),
                });
            }
            Ok(tokens("from-refresh", 60, Some("refresh-2")))
        }

        async fn user_info(&self, _token: &AccessToken) -> Result<UserIdentity, AuthError> {
            if self.fail_profile {
                return Err(AuthError::TokenEndpoint {
                    status: Some(500),
                    message: "down".to_string(),
                });
            }
            Ok(UserIdentity {
                id: "user-1".to_string(),
                email: None,
                name: None,
            })
        }
    }

    #[derive(Default)]
    struct CountingSink {
        reports: AtomicUsize,
    }

    #[async_trait]
    impl DiagnosticsSink for CountingSink {
        async fn report(
            &self,
            _token: &AccessToken,
            _report: &DiagnosticsReport,
        ) -> Result<(), BackendError> {
            self.reports.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Transport("offline".to_string()))
        }
    }

    fn manager(server: FakeServer, store: MemoryTokenStore) -> (Arc<FakeServer>, Arc<MemoryTokenStore>, AuthManager) {
        let server = Arc::new(server);
        let store = Arc::new(store);
        let manager = AuthManager::new(server.clone(), store.clone());
        (server, store, manager)
    }

    #[tokio::test]
    async fn test_valid_cached_token_is_returned() {
        let (server, _, manager) = manager(
            FakeServer::default(),
            MemoryTokenStore::with_tokens(tokens("cached", 60, None)),
        );

        let token = manager.get_access_token(false).await.unwrap();
        assert_eq!(token, Some(AccessToken::new("cached")));
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_interactive_without_tokens_is_none() {
        let (server, _, manager) = manager(FakeServer::default(), MemoryTokenStore::default());

        assert_eq!(manager.get_access_token(false).await.unwrap(), None);
        assert_eq!(server.authorize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let (server, store, manager) = manager(
            FakeServer::default(),
            MemoryTokenStore::with_tokens(tokens("old", -5, Some("refresh-1"))),
        );

        let token = manager.get_access_token(false).await.unwrap();
        assert_eq!(token, Some(AccessToken::new("from-refresh")));
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);

        let stored = store.load().await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(manager.identity().map(|i| i.id).as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_credentials() {
        let (_, store, manager) = manager(
            FakeServer {
                fail_refresh: true,
                ..FakeServer::default()
            },
            MemoryTokenStore::with_tokens(tokens("old", -5, Some("refresh-1"))),
        );

        assert_eq!(manager.get_access_token(false).await.unwrap(), None);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signed_in_check_leaves_tokens_alone() {
        let (server, store, manager) = manager(
            FakeServer {
                fail_refresh: true,
                ..FakeServer::default()
            },
            MemoryTokenStore::with_tokens(tokens("old", -5, Some("refresh-1"))),
        );

        assert!(manager.is_signed_in().await);
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(store.load().await.unwrap().is_some());

        store.save(&tokens("old", -5, None)).await.unwrap();
        assert!(!manager.is_signed_in().await);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse() {
        let (server, _, manager) = manager(
            FakeServer::default(),
            MemoryTokenStore::with_tokens(tokens("old", -5, Some("refresh-1"))),
        );

        let (a, b) = tokio::join!(
            manager.get_access_token(false),
            manager.get_access_token(false)
        );
        assert_eq!(a.unwrap(), Some(AccessToken::new("from-refresh")));
        assert_eq!(b.unwrap(), Some(AccessToken::new("from-refresh")));
        assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_interactive_calls_share_one_login() {
        let (server, store, manager) = manager(FakeServer::default(), MemoryTokenStore::default());

        let (a, b, c) = tokio::join!(
            manager.get_access_token(true),
            manager.get_access_token(true),
            manager.login()
        );

        assert_eq!(a.unwrap(), Some(AccessToken::new("from-login")));
        assert_eq!(b.unwrap(), Some(AccessToken::new("from-login")));
        assert_eq!(c.unwrap(), AccessToken::new("from-login"));
        assert_eq!(server.authorize_calls.load(Ordering::SeqCst), 1);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_login_is_reported_to_every_waiter() {
        let (server, _, manager) = manager(
            FakeServer {
                fail_authorize: true,
                ..FakeServer::default()
            },
            MemoryTokenStore::default(),
        );

        let (a, b) = tokio::join!(manager.get_access_token(true), manager.get_access_token(true));
        assert!(matches!(a, Err(AuthError::LoginFailed(_))));
        assert!(matches!(b, Err(AuthError::LoginFailed(_))));
        assert_eq!(server.authorize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_side_effect_failures_do_not_block_login() {
        let sink = Arc::new(CountingSink::default());
        let server = Arc::new(FakeServer {
            fail_profile: true,
            ..FakeServer::default()
        });
        let manager = AuthManager::new(server, Arc::new(MemoryTokenStore::default()))
            .with_diagnostics(sink.clone());

        let token = manager.login().await.unwrap();
        assert_eq!(token, AccessToken::new("from-login"));
        assert!(manager.identity().is_none());
        assert_eq!(sink.reports.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (_, store, manager) = manager(FakeServer::default(), MemoryTokenStore::default());
        manager.login().await.unwrap();
        assert!(manager.identity().is_some());

        manager.logout().await.unwrap();
        assert!(manager.identity().is_none());
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(manager.get_access_token(false).await.unwrap(), None);
    }
}
