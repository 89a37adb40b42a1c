//! Authenticated session lifecycle: interactive login, persistence, and
//! single-flight token refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evo_core::auth::{
    EVO_SCOPES, TokenResponse, generate_code_challenge, generate_code_verifier, jwt_expiry,
    token_fingerprint,
};
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use crate::config::RuntimeSettings;
use crate::credentials::{CredentialStore, StoreError, StoredCredentials};
use crate::platform::Instance;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("no usable credentials; sign in is required")]
    LoginRequired,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("token refresh was rejected: {0}")]
    RefreshRejected(String),
    #[error("access token has expired and cannot be refreshed")]
    TokenExpired,
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("credential store failure: {0}")]
    Store(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Store(err.to_string())
    }
}

/// Authenticated identity plus the selected platform instance.
#[derive(Clone, PartialEq, Serialize)]
pub struct Session {
    #[serde(skip)]
    pub access_token: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub instance: Option<Instance>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &token_fingerprint(&self.access_token))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("instance", &self.instance)
            .finish()
    }
}

impl Session {
    pub fn from_tokens(tokens: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = tokens
            .expires_in
            .map(|secs| now + chrono::Duration::seconds(secs))
            .or_else(|| jwt_expiry(&tokens.access_token));
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
            instance: None,
        }
    }

    /// True when the token is expired or will be within `margin`.
    /// Tokens without a known expiry are treated as valid.
    pub fn expires_within(&self, margin: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now + margin >= exp)
    }

    fn to_stored(&self, client_id: &str) -> StoredCredentials {
        StoredCredentials {
            client_id: client_id.to_string(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
            instance: self.instance.clone(),
        }
    }

    fn from_stored(creds: StoredCredentials) -> Self {
        Self {
            access_token: creds.access_token,
            refresh_token: creds.refresh_token,
            expires_at: creds.expires_at,
            instance: creds.instance,
        }
    }
}

/// Source of new tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Interactive sign-in.
    async fn login(&self) -> Result<TokenResponse, AuthError>;
    /// Exchange a refresh token for new tokens.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

/// Owns the one mutable session of the process.
///
/// All reads and updates go through one async mutex, so concurrent callers
/// that find the token near expiry trigger exactly one refresh; the others
/// wait on the lock and then observe the refreshed session.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn CredentialStore>,
    client_id: String,
    margin: chrono::Duration,
    interactive: bool,
    state: Mutex<Option<Session>>,
    refreshes: AtomicU64,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
        client_id: impl Into<String>,
        margin: chrono::Duration,
    ) -> Self {
        Self {
            provider,
            store,
            client_id: client_id.into(),
            margin,
            interactive: true,
            state: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Session seeded from an explicit token. Never logs in or refreshes.
    pub fn with_token(
        token: String,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
        client_id: impl Into<String>,
    ) -> Self {
        let session = Session {
            expires_at: jwt_expiry(&token),
            access_token: token,
            refresh_token: None,
            instance: None,
        };
        Self {
            provider,
            store,
            client_id: client_id.into(),
            margin: chrono::Duration::zero(),
            interactive: false,
            state: Mutex::new(Some(session)),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn store_location(&self) -> String {
        self.store.describe()
    }

    /// Number of refresh exchanges performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Return a valid session, loading, refreshing or logging in as needed.
    pub async fn acquire(&self) -> Result<Session, AuthError> {
        let mut guard = self.state.lock().await;
        if guard.is_none() && self.interactive {
            *guard = self.load_stored()?;
        }

        let mut carried_instance = None;
        if let Some(session) = guard.as_ref() {
            if !session.expires_within(self.margin, Utc::now()) {
                return Ok(session.clone());
            }
            if !self.interactive {
                return Err(AuthError::TokenExpired);
            }
            if let Some(refresh_token) = session.refresh_token.clone() {
                return self.refresh_locked(&mut guard, &refresh_token).await;
            }
            tracing::info!("cached access token expired without a refresh token; discarding");
            carried_instance = session.instance.clone();
            *guard = None;
            self.store.clear()?;
        }

        if !self.interactive {
            return Err(AuthError::LoginRequired);
        }
        tracing::info!("starting interactive sign-in");
        let tokens = self.provider.login().await?;
        let mut session = Session::from_tokens(tokens, Utc::now());
        session.instance = carried_instance;
        self.store.save(&session.to_stored(&self.client_id))?;
        tracing::info!(token = %token_fingerprint(&session.access_token), expires_at = ?session.expires_at, "signed in");
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Return `session` if still valid, otherwise the refreshed session.
    ///
    /// A caller holding a stale copy after another caller already refreshed
    /// receives the new session without a second exchange.
    pub async fn ensure_valid(&self, session: &Session) -> Result<Session, AuthError> {
        let mut guard = self.state.lock().await;
        if guard.is_none() && self.interactive {
            *guard = self.load_stored()?;
        }
        // Nothing in memory or in the store means the caller's copy outlived
        // a logout.
        let Some(current) = guard.as_ref() else {
            return Err(AuthError::LoginRequired);
        };
        let now = Utc::now();
        if current.access_token != session.access_token
            && !current.expires_within(self.margin, now)
        {
            return Ok(current.clone());
        }
        if !session.expires_within(self.margin, now) {
            return Ok(session.clone());
        }
        if !self.interactive {
            return Err(AuthError::TokenExpired);
        }
        let refresh_token = current
            .refresh_token
            .clone()
            .or_else(|| session.refresh_token.clone())
            .ok_or(AuthError::TokenExpired)?;
        self.refresh_locked(&mut guard, &refresh_token).await
    }

    /// Record the instance subsequent calls operate on; persisted with the session.
    pub async fn select_instance(&self, instance: Instance) -> Result<Session, AuthError> {
        let mut guard = self.state.lock().await;
        let session = guard.as_mut().ok_or(AuthError::LoginRequired)?;
        session.instance = Some(instance);
        let updated = session.clone();
        if self.interactive {
            self.store.save(&updated.to_stored(&self.client_id))?;
        }
        Ok(updated)
    }

    pub async fn current(&self) -> Option<Session> {
        let mut guard = self.state.lock().await;
        if guard.is_none() && self.interactive {
            *guard = self.load_stored().ok().flatten();
        }
        guard.clone()
    }

    /// Forget the session in memory and in the store.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let mut guard = self.state.lock().await;
        *guard = None;
        self.store.clear()?;
        Ok(())
    }

    fn load_stored(&self) -> Result<Option<Session>, AuthError> {
        let Some(creds) = self.store.load()? else {
            return Ok(None);
        };
        if creds.client_id != self.client_id {
            tracing::info!("stored credentials belong to a different client id; ignoring");
            return Ok(None);
        }
        Ok(Some(Session::from_stored(creds)))
    }

    async fn refresh_locked(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<Session>>,
        refresh_token: &str,
    ) -> Result<Session, AuthError> {
        let instance = guard.as_ref().and_then(|s| s.instance.clone());
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.provider.refresh(refresh_token).await {
            Ok(tokens) => {
                let mut session = Session::from_tokens(tokens, Utc::now());
                if session.refresh_token.is_none() {
                    session.refresh_token = Some(refresh_token.to_string());
                }
                session.instance = instance;
                self.store.save(&session.to_stored(&self.client_id))?;
                tracing::info!(expires_at = ?session.expires_at, "access token refreshed");
                **guard = Some(session.clone());
                Ok(session)
            }
            Err(AuthError::RefreshRejected(msg)) => {
                tracing::warn!(reason = %msg, "token refresh rejected; clearing session");
                **guard = None;
                if let Err(store_err) = self.store.clear() {
                    tracing::warn!(error = %store_err, "failed to clear credential store");
                }
                Err(AuthError::RefreshRejected(msg))
            }
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed; keeping cached credentials");
                Err(err)
            }
        }
    }
}

/// Authorization-code + PKCE flow against the platform identity provider.
pub struct OAuthIdentityProvider {
    http: reqwest::Client,
    client_id: String,
    redirect_url: Url,
    authorize_endpoint: String,
    token_endpoint: String,
}

impl OAuthIdentityProvider {
    pub fn new(http: reqwest::Client, settings: &RuntimeSettings) -> Self {
        Self {
            http,
            client_id: settings.client_id.clone(),
            redirect_url: settings.redirect_url.clone(),
            authorize_endpoint: settings.authorize_endpoint(),
            token_endpoint: settings.token_endpoint(),
        }
    }

    fn authorize_url(&self, challenge: &str, state: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.authorize_endpoint)
            .map_err(|e| AuthError::LoginFailed(format!("invalid authorize endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", &EVO_SCOPES.join(" "))
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state);
        Ok(url)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, TokenFailure> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| TokenFailure::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{status}: {body}");
            // Only a 4xx answer says anything about the grant itself.
            return Err(
                if status.is_server_error()
                    || status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                {
                    TokenFailure::Transport(message)
                } else {
                    TokenFailure::Rejected(message)
                },
            );
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| TokenFailure::Transport(format!("undecodable token response: {e}")))
    }
}

/// Why a token endpoint call produced no tokens.
#[derive(Debug, Clone, PartialEq)]
enum TokenFailure {
    /// The identity provider could not be reached or answered with a server error.
    Transport(String),
    /// The identity provider refused the grant.
    Rejected(String),
}

impl TokenFailure {
    fn into_login_error(self) -> AuthError {
        match self {
            TokenFailure::Transport(msg) => AuthError::Transport(msg),
            TokenFailure::Rejected(msg) => AuthError::LoginFailed(msg),
        }
    }

    fn into_refresh_error(self) -> AuthError {
        match self {
            TokenFailure::Transport(msg) => AuthError::Transport(msg),
            TokenFailure::Rejected(msg) => AuthError::RefreshRejected(msg),
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentityProvider {
    async fn login(&self) -> Result<TokenResponse, AuthError> {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        let state = generate_code_verifier();

        let host = self.redirect_url.host_str().unwrap_or("localhost").to_string();
        let port = self.redirect_url.port_or_known_default().unwrap_or(80);
        let listener = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| AuthError::LoginFailed(format!("cannot listen on {host}:{port}: {e}")))?;

        let authorize_url = self.authorize_url(&code_challenge, &state)?;
        tracing::warn!(url = %authorize_url, "opening browser for sign-in; visit the URL manually if it does not open");
        if let Err(err) = open::that(authorize_url.as_str()) {
            tracing::warn!(error = %err, "failed to open browser");
        }

        let (code, received_state) = tokio::select! {
            result = wait_for_callback(listener, self.redirect_url.path()) => result?,
            _ = tokio::time::sleep(LOGIN_TIMEOUT) => {
                return Err(AuthError::LoginFailed("sign-in timed out after 5 minutes".into()));
            }
        };

        if received_state.as_deref() != Some(state.as_str()) {
            return Err(AuthError::LoginFailed("OAuth state mismatch".into()));
        }

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("code_verifier", &code_verifier),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", &self.client_id),
        ])
        .await
        .map_err(TokenFailure::into_login_error)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
        ])
        .await
        .map_err(TokenFailure::into_refresh_error)
    }
}

async fn wait_for_callback(
    listener: tokio::net::TcpListener,
    expected_path: &str,
) -> Result<(String, Option<String>), AuthError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|e| AuthError::LoginFailed(format!("callback listener failed: {e}")))?;
        let mut buf = vec![0u8; 8192];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| AuthError::LoginFailed(format!("callback read failed: {e}")))?;
        let request = String::from_utf8_lossy(&buf[..n]);

        // GET /signin-oidc?code=...&state=... HTTP/1.1
        let path = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("");
        let Ok(url) = Url::parse(&format!("http://localhost{path}")) else {
            continue;
        };
        if url.path() != expected_path {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
            continue;
        }

        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.to_string())
        };
        if let Some(error) = param("error") {
            let description = param("error_description").unwrap_or_default();
            return Err(AuthError::LoginFailed(format!("{error} {description}").trim().to_string()));
        }
        let code = param("code")
            .ok_or_else(|| AuthError::LoginFailed("no 'code' parameter in callback".into()))?;
        let state = param("state");

        let response = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
            <html><body><h1>Signed in to Evo</h1><p>You can close this tab.</p></body></html>";
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
        return Ok((code, state));
    }
}
