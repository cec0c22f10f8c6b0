//! Authorization-code-with-PKCE login against the identity provider.
//!
//! The browser is sent to the authorize endpoint and redirected back to a
//! receiver bound on the loopback interface, which hands us the code.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{random_state, PkceChallenge, PkceVerifier};
use super::tokens::{AccessToken, StoredTokens, UserIdentity};
use super::{AuthError, AuthorizationServer};
use crate::config::AuthConfig;

const CALLBACK_PATH: &str = "/callback";

const SUCCESS_PAGE: &str = "<html><body><h3>Signed in.</h3><p>You can close this window and return to Notetaker.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Sign-in failed.</h3><p>Return to Notetaker and try again.</p></body></html>";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

pub struct OAuthClient {
    client: reqwest::Client,
    config: AuthConfig,
}

impl OAuthClient {
    pub fn new(config: AuthConfig, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build identity provider HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn authorization_url(
        &self,
        state: &str,
        challenge: &PkceChallenge,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| AuthError::Configuration(format!("authorize_url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri())
                .append_pair("scope", &self.config.scopes.join(" "))
                .append_pair("state", state)
                .append_pair("code_challenge", challenge.as_str())
                .append_pair("code_challenge_method", PkceChallenge::METHOD);
            if let Some(audience) = &self.config.audience {
                query.append_pair("audience", audience);
            }
        }

        Ok(url)
    }

    async fn run_login(&self) -> Result<StoredTokens, AuthError> {
        if self.config.client_id.is_empty() {
            return Err(AuthError::Configuration(
                "auth.client_id is not set".to_string(),
            ));
        }

        let verifier = PkceVerifier::generate();
        let state = random_state();
        let url = self.authorization_url(&state, &verifier.challenge())?;

        // Bind before the browser opens so the redirect cannot beat us.
        let listener = TcpListener::bind(("127.0.0.1", self.config.callback_port))
            .await
            .map_err(|e| {
                AuthError::LoginFailed(format!(
                    "cannot listen on port {}: {e}",
                    self.config.callback_port
                ))
            })?;

        info!("Opening browser for sign-in");
        if let Err(e) = open::that(url.as_str()) {
            warn!("Failed to open browser ({}); visit this URL to sign in: {}", e, url);
        }

        let code = tokio::time::timeout(
            self.config.login_timeout(),
            wait_for_code(listener, &state),
        )
        .await
        .map_err(|_| AuthError::LoginTimedOut)??;

        self.exchange_code(&code, &verifier).await
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
    ) -> Result<StoredTokens, AuthError> {
        let redirect_uri = self.config.redirect_uri();
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("code_verifier", verifier.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ];
        self.token_request(&form, None).await
    }

    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<StoredTokens, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&form, Some(refresh_token)).await
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
        previous_refresh: Option<&str>,
    ) -> Result<StoredTokens, AuthError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|err| match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                })
                .unwrap_or(body);
            return Err(AuthError::TokenEndpoint {
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::TokenEndpoint {
                status: Some(status.as_u16()),
                message: format!("unreadable token response: {e}"),
            })?;

        Ok(StoredTokens {
            access_token: parsed.access_token,
            // Providers that do not rotate refresh tokens omit them on refresh.
            refresh_token: parsed
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: StoredTokens::expires_in(Utc::now(), parsed.expires_in),
            token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
        })
    }
}

#[async_trait]
impl AuthorizationServer for OAuthClient {
    async fn authorize(&self) -> Result<StoredTokens, AuthError> {
        self.run_login().await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredTokens, AuthError> {
        self.refresh_tokens(refresh_token).await
    }

    async fn user_info(&self, token: &AccessToken) -> Result<UserIdentity, AuthError> {
        let Some(url) = &self.config.userinfo_url else {
            return Err(AuthError::Configuration(
                "auth.userinfo_url is not set".to_string(),
            ));
        };

        let response = self
            .client
            .get(url)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint {
                status: Some(status.as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json::<UserIdentity>()
            .await
            .map_err(|e| AuthError::TokenEndpoint {
                status: Some(status.as_u16()),
                message: format!("unreadable profile: {e}"),
            })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Hands the first callback's outcome to the waiting login.
struct CallbackReceiver {
    expected_state: String,
    outcome: Mutex<Option<oneshot::Sender<Result<String, AuthError>>>>,
}

/// Serves the redirect target until one callback arrives.
async fn wait_for_code(listener: TcpListener, expected_state: &str) -> Result<String, AuthError> {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let receiver = Arc::new(CallbackReceiver {
        expected_state: expected_state.to_string(),
        outcome: Mutex::new(Some(outcome_tx)),
    });
    let app = Router::new()
        .route(CALLBACK_PATH, get(callback))
        .with_state(receiver);

    // Dropping the sender (login finished or timed out) stops the receiver.
    let (_stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("Callback receiver failed: {}", e);
        }
        debug!("Callback receiver stopped");
    });

    outcome_rx
        .await
        .map_err(|_| AuthError::LoginFailed("callback receiver stopped".to_string()))?
}

async fn callback(
    State(receiver): State<Arc<CallbackReceiver>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = parse_callback(&params, &receiver.expected_state);
    let reply = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        Err(_) => (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE)),
    };

    let sender = receiver
        .outcome
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match sender {
        Some(sender) => {
            let _ = sender.send(outcome);
        }
        None => debug!("Ignoring repeated sign-in callback"),
    }
    reply
}

pub fn parse_callback(params: &CallbackParams, expected_state: &str) -> Result<String, AuthError> {
    if let Some(error) = &params.error {
        let message = match &params.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        return Err(AuthError::LoginFailed(message));
    }

    if params.state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }

    match &params.code {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => Err(AuthError::LoginFailed(
            "callback carried no authorization code".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server_url: &str) -> AuthConfig {
        AuthConfig {
            authorize_url: format!("{server_url}/authorize"),
            token_url: format!("{server_url}/oauth/token"),
            userinfo_url: Some(format!("{server_url}/userinfo")),
            client_id: "desktop-client".to_string(),
            audience: Some("https://api.example.com".to_string()),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_authorization_url_carries_pkce_and_state() {
        let client = OAuthClient::new(config("https://id.example.com"), Duration::from_secs(5)).unwrap();
        let verifier = PkceVerifier::from_string("verifier".to_string());
        let url = client
            .authorization_url("state-123", &verifier.challenge())
            .unwrap();

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/authorize");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "desktop-client");
        assert_eq!(pairs["state"], "state-123");
        assert_eq!(pairs["code_challenge"], verifier.challenge().as_str());
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:53682/callback");
        assert_eq!(pairs["audience"], "https://api.example.com");
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..CallbackParams::default()
        }
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            parse_callback(&params(Some("abc"), Some("s1")), "s1"),
            Ok("abc".to_string())
        );
        assert_eq!(
            parse_callback(&params(Some("abc"), Some("other")), "s1"),
            Err(AuthError::StateMismatch)
        );
        let denied = CallbackParams {
            error: Some("access_denied".to_string()),
            ..params(None, Some("s1"))
        };
        assert!(matches!(
            parse_callback(&denied, "s1"),
            Err(AuthError::LoginFailed(msg)) if msg == "access_denied"
        ));
        assert!(matches!(
            parse_callback(&params(None, Some("s1")), "s1"),
            Err(AuthError::LoginFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiting = tokio::spawn(async move { wait_for_code(listener, "s1").await });

        // Browsers open speculative connections that never send a request.
        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();

        let favicon = reqwest::get(format!("http://{addr}/favicon.ico")).await.unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        let response = reqwest::get(format!("http://{addr}/callback?state=s1&code=c1"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let code = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, Ok("c1".to_string()));
    }

    #[tokio::test]
    async fn test_callback_with_wrong_state_fails_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiting = tokio::spawn(async move { wait_for_code(listener, "s1").await });

        let response = reqwest::get(format!("http://{addr}/callback?state=forged&code=c1"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(waiting.await.unwrap(), Err(AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-access","expires_in":3600}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(config(&server.url()), Duration::from_secs(5)).unwrap();
        let tokens = client.refresh_tokens("old-refresh").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("old-refresh"));
        assert!(!tokens.is_expired());
    }

    #[tokio::test]
    async fn test_token_endpoint_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"expired"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(config(&server.url()), Duration::from_secs(5)).unwrap();
        let err = client.refresh_tokens("stale").await.unwrap_err();

        assert_eq!(
            err,
            AuthError::TokenEndpoint {
                status: Some(400),
                message: "invalid_grant: expired".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_user_info() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"sub":"u-1","email":"dev@example.com"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(config(&server.url()), Duration::from_secs(5)).unwrap();
        let identity = client.user_info(&AccessToken::new("tok")).await.unwrap();

        assert_eq!(identity.id, "u-1");
        assert_eq!(identity.name, None);
    }
}
