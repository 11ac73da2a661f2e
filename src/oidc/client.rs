//! The session state machine.
//!
//! ```text
//! Anonymous ──challenge──▶ ChallengeIssued ──callback──▶ CallbackReceived
//!     ▲                                                        │
//!     │                                                 exchange + userinfo
//!     └──────────── sign-out ◀──── Authenticated ◀─────────────┘
//! ```
//!
//! Each transition takes the request's [`RequestContext`] by `&mut`, reads
//! and writes the session through the configured [`SessionStore`], and
//! queues cookie changes on the context for the adapter to emit.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use super::audit::{self, AuthEvent};
use super::context::RequestContext;
use super::options::{ClientOptions, ConfigError, ValidatedOptions};
use super::provider::{Claims, IdentityProvider, OidcProvider, TokenSet};
use crate::cookie::{CookieError, SecureCookie};
use crate::permission::{Caller, PermissionAuditor};
use crate::route::RouteIdentity;
use crate::session::{Session, SessionStore};

/// Failures surfaced by the transitions, each mapped to an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Callback state absent or not the one issued to this session
    #[error("state did not match")]
    StateMismatch,

    /// The provider reported an error on the callback
    #[error("identity provider error: {0}")]
    Provider(String),

    /// A custody cookie failed its integrity check
    #[error("cookie '{0}' failed integrity check")]
    CookieTampered(String),

    /// The authorization code or refresh token could not be exchanged
    #[error("Failed to exchange token: {0}")]
    TokenExchange(String),

    /// Claims could not be fetched
    #[error("Failed to get userinfo: {0}")]
    UserInfo(String),

    /// Session or permission storage failed
    #[error("store unavailable: {0}")]
    Store(String),

    /// A store or provider call ran out of time
    #[error("upstream timed out: {0}")]
    Timeout(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::StateMismatch | Self::Provider(_) | Self::CookieTampered(_) => 400,
            Self::TokenExchange(_) | Self::UserInfo(_) | Self::Internal(_) => 500,
            Self::Store(_) => 502,
            Self::Timeout(_) => 504,
        }
    }

    /// Classify a failed provider call: timeouts keep their own status.
    fn from_provider(stage: fn(String) -> Self, e: &crate::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            stage(e.to_string())
        }
    }
}

impl From<crate::Error> for AuthError {
    fn from(e: crate::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        match &e {
            crate::Error::Store(_) | crate::Error::Decode { .. } | crate::Error::NotFound(_) => {
                Self::Store(e.to_string())
            }
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<CookieError> for AuthError {
    fn from(e: CookieError) -> Self {
        match e {
            CookieError::Tampered(name) => Self::CookieTampered(name),
            e => Self::Internal(e.to_string()),
        }
    }
}

/// Identity held by an authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Subject identifier
    pub id: String,
    /// Display name
    pub username: String,
    /// Email address
    pub email: String,
    /// Role bitmask
    pub roles: i64,
    /// Account level
    pub level: i64,
    /// Account status
    pub status: i64,
}

/// Outcome of [`OidcClient::handle_authentication`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run the handler; `None` for an admitted anonymous caller
    Proceed(Option<Principal>),
    /// Send the caller to the provider (302)
    Redirect(String),
    /// Signed in but not permitted; redirect to the access-denied URL (302)
    Denied(String),
}

/// Query parameters of the sign-in callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code
    pub code: Option<String>,
    /// State echoed by the provider
    pub state: Option<String>,
    /// Provider error code
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// Browser-session authentication and route authorization.
pub struct OidcClient {
    options: ValidatedOptions,
    provider: Arc<dyn IdentityProvider>,
}

impl OidcClient {
    /// Validate `options` and discover the provider.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Config`] for invalid options; a network error when
    /// discovery fails.
    pub async fn discover(options: ClientOptions) -> crate::Result<Self> {
        let options = options.validate()?;
        let provider = OidcProvider::discover(&options).await?;
        Ok(Self {
            options,
            provider: Arc::new(provider),
        })
    }

    /// Validate `options` and use an already-built provider.
    pub fn with_provider(
        options: ClientOptions,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            options: options.validate()?,
            provider,
        })
    }

    /// Validated options
    #[must_use]
    pub fn options(&self) -> &ValidatedOptions {
        &self.options
    }

    /// Path the sign-in callback is served on
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.options.callback_path
    }

    /// Path the sign-out endpoint is served on
    #[must_use]
    pub fn sign_out_path(&self) -> &str {
        &self.options.sign_out_path
    }

    fn codec(&self) -> &dyn SecureCookie {
        self.options.secure_cookie.as_ref()
    }

    fn auditor(&self) -> &PermissionAuditor {
        &self.options.permission_auditor
    }

    fn sessions(&self) -> &dyn SessionStore {
        self.options.session_store.as_ref()
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Authenticate and authorize a request for `route`.
    pub async fn handle_authentication(
        &self,
        ctx: &mut RequestContext,
        route: &RouteIdentity,
    ) -> Result<Decision, AuthError> {
        self.load_session(ctx).await?;

        if let Some(principal) = ctx.session.as_ref().and_then(|s| self.principal(s)) {
            self.read_token_cookies(ctx).await?;

            let caller = Caller::Authenticated {
                roles: principal.roles,
            };
            if self.auditor().check_route(route, &caller).await? {
                // saving slides the session expiry
                self.persist_session(ctx).await?;
                return Ok(Decision::Proceed(Some(principal)));
            }

            audit::emit(&AuthEvent::denied(&principal.id, route, principal.roles));
            return Ok(Decision::Denied(self.options.access_denied_url.clone()));
        }

        if self.auditor().check_route(route, &Caller::Anonymous).await? {
            return Ok(Decision::Proceed(None));
        }

        let state = generate_state();
        let authorization_url = self.provider.authorization_url(&state)?;

        let fields = &self.options.session_fields;
        let return_url = ctx.request_uri().map(ToString::to_string);
        let session = ctx.session.get_or_insert_with(Session::new);
        session.set(&fields.state, state);
        match return_url {
            Some(url) => session.set(&fields.return_url, url),
            None => {
                session.remove(&fields.return_url);
            }
        }
        // a challenge-only session lives until the callback at most
        let ttl = self.options.pending_session_ttl;
        self.persist_session_for(ctx, Some(ttl)).await?;

        audit::emit(&AuthEvent::challenge(route));
        Ok(Decision::Redirect(authorization_url.to_string()))
    }

    /// Complete the authorization-code flow. Returns the redirect target.
    pub async fn handle_sign_in_callback(
        &self,
        ctx: &mut RequestContext,
        query: &CallbackQuery,
    ) -> Result<String, AuthError> {
        if let Some(error) = query.error.as_deref() {
            let reason = match query.error_description.as_deref() {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            audit::emit(&AuthEvent::provider_error(reason.clone()));
            return Err(AuthError::Provider(reason));
        }

        self.load_session(ctx).await?;

        let fields = &self.options.session_fields;
        let expected = ctx.session.as_ref().and_then(|s| s.get(&fields.state));
        let matched = match (query.state.as_deref(), expected) {
            (Some(received), Some(expected)) if !received.is_empty() => {
                bool::from(received.as_bytes().ct_eq(expected.as_bytes()))
            }
            _ => false,
        };
        if !matched {
            let reason = if expected.is_none() {
                "no pending state in session"
            } else {
                "state parameter missing or different"
            };
            audit::emit(&AuthEvent::state_mismatch(reason));
            return Err(AuthError::StateMismatch);
        }

        let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
            audit::emit(&AuthEvent::provider_error("callback carried no code"));
            return Err(AuthError::Provider(
                "callback carried no authorization code".to_string(),
            ));
        };

        let tokens = self.provider.exchange_code(code).await.map_err(|e| {
            audit::emit(&AuthEvent::provider_error(e.to_string()));
            AuthError::from_provider(AuthError::TokenExchange, &e)
        })?;
        let claims = self
            .provider
            .user_info(&tokens.access_token)
            .await
            .map_err(|e| {
                audit::emit(&AuthEvent::provider_error(e.to_string()));
                AuthError::from_provider(AuthError::UserInfo, &e)
            })?;

        // the pre-login session is replaced so its ID cannot be fixed by a third party
        let previous = ctx.session.take();
        let return_url = previous
            .as_ref()
            .and_then(|s| s.get(&fields.return_url))
            .map(ToString::to_string);
        if let Some(previous) = previous {
            self.sessions().destroy(previous.id()).await?;
        }

        let mut session = Session::new();
        self.fill_identity(&mut session, &claims);
        ctx.session = Some(session);
        self.persist_session(ctx).await?;
        self.save_token(ctx, &tokens)?;

        audit::emit(&AuthEvent::login(&claims.sub, claims.role));
        Ok(return_url.unwrap_or_else(|| "/".to_string()))
    }

    /// End the session and clear every custody cookie. Returns the redirect target.
    pub async fn handle_sign_out(&self, ctx: &mut RequestContext) -> Result<String, AuthError> {
        match self.load_session(ctx).await {
            Ok(()) | Err(AuthError::CookieTampered(_)) => {}
            Err(e) => return Err(e),
        }

        let mut subject = None;
        if let Some(session) = ctx.session.take() {
            subject = session.get(&self.options.session_fields.id).map(ToString::to_string);
            self.sessions().destroy(session.id()).await?;
        }
        self.clear_cookies(ctx);

        audit::emit(&AuthEvent::sign_out(subject.as_deref()));
        Ok("/".to_string())
    }

    /// Current tokens, refreshing through the provider when only the
    /// refresh token is still held.
    pub async fn get_token(&self, ctx: &mut RequestContext) -> Result<Option<TokenSet>, AuthError> {
        let (access, refresh) = self.read_token_cookies(ctx).await?;

        if let Some(access_token) = access {
            return Ok(Some(TokenSet {
                refresh_token: refresh,
                ..TokenSet::bearer(access_token)
            }));
        }

        let Some(refresh_token) = refresh else {
            return Ok(None);
        };

        let mut tokens = self.provider.refresh(&refresh_token).await.map_err(|e| {
            audit::emit(&AuthEvent::provider_error(e.to_string()));
            AuthError::from_provider(AuthError::TokenExchange, &e)
        })?;
        self.save_token(ctx, &tokens)?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token);
        }

        let subject = ctx
            .session
            .as_ref()
            .and_then(|s| s.get(&self.options.session_fields.id));
        audit::emit(&AuthEvent::token_refreshed(subject));
        Ok(Some(tokens))
    }

    /// Seal `tokens` into the access and refresh cookies.
    ///
    /// The refresh cookie is written only when a refresh token is present.
    pub fn save_token(&self, ctx: &mut RequestContext, tokens: &TokenSet) -> Result<(), AuthError> {
        let names = &self.options.cookie_names;
        let base = &self.options.cookie_options;

        let access = base.with_max_age(tokens.expires_in.map(Duration::from_secs));
        ctx.cookies
            .set(self.codec(), &names.access_token, &tokens.access_token, &access)?;

        if let Some(refresh_token) = tokens.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            let refresh = base.with_max_age(Some(self.options.refresh_token_max_age));
            ctx.cookies
                .set(self.codec(), &names.refresh_token, refresh_token, &refresh)?;
        }
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Resolve the session cookie into `ctx.session` once per request.
    async fn load_session(&self, ctx: &mut RequestContext) -> Result<(), AuthError> {
        if ctx.session_loaded {
            return Ok(());
        }
        ctx.session_loaded = true;

        let name = &self.options.cookie_names.session;
        let id = match ctx.cookies.get(self.codec(), name) {
            Ok(id) => id,
            Err(CookieError::Tampered(_)) => return Err(self.reject_tampered(ctx, name).await),
            Err(e) => return Err(e.into()),
        };

        if let Some(id) = id {
            ctx.session = self.sessions().load(&id).await?;
            if ctx.session.is_none() {
                debug!("Session cookie refers to an expired session");
            }
        }
        Ok(())
    }

    /// Decrypt both token cookies, rejecting the request if either is forged.
    async fn read_token_cookies(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(Option<String>, Option<String>), AuthError> {
        let names = &self.options.cookie_names;
        let mut values = [None, None];
        for (slot, name) in values.iter_mut().zip([&names.access_token, &names.refresh_token]) {
            match ctx.cookies.get(self.codec(), name) {
                Ok(value) => *slot = value,
                Err(CookieError::Tampered(_)) => return Err(self.reject_tampered(ctx, name).await),
                Err(e) => return Err(e.into()),
            }
        }
        let [access, refresh] = values;
        Ok((access, refresh))
    }

    /// Destroy the session and all custody cookies after a forged cookie.
    async fn reject_tampered(&self, ctx: &mut RequestContext, cookie: &str) -> AuthError {
        audit::emit(&AuthEvent::cookie_tampered(cookie));
        if let Some(session) = ctx.session.take() {
            if let Err(e) = self.sessions().destroy(session.id()).await {
                tracing::warn!(error = %e, "Failed to destroy session after cookie tampering");
            }
        }
        self.clear_cookies(ctx);
        AuthError::CookieTampered(cookie.to_string())
    }

    fn clear_cookies(&self, ctx: &mut RequestContext) {
        let names = &self.options.cookie_names;
        let options = &self.options.cookie_options;
        for name in [&names.access_token, &names.refresh_token, &names.session] {
            ctx.cookies.remove(name, options);
        }
    }

    /// Save `ctx.session` and make sure the session cookie points at it.
    async fn persist_session(&self, ctx: &mut RequestContext) -> Result<(), AuthError> {
        self.persist_session_for(ctx, None).await
    }

    /// [`Self::persist_session`] with an explicit lifetime; `None` uses the
    /// store's sliding TTL.
    async fn persist_session_for(
        &self,
        ctx: &mut RequestContext,
        ttl: Option<Duration>,
    ) -> Result<(), AuthError> {
        let Some(session) = ctx.session.as_ref() else {
            return Ok(());
        };
        match ttl {
            Some(ttl) => self.sessions().save_with_ttl(session, ttl).await?,
            None => self.sessions().save(session).await?,
        }

        let name = &self.options.cookie_names.session;
        let current = ctx.cookies.get(self.codec(), name).ok().flatten();
        if current.as_deref() != Some(session.id()) {
            let options = self.options.cookie_options.with_max_age(None);
            ctx.cookies.set(self.codec(), name, session.id(), &options)?;
        }
        Ok(())
    }

    fn principal(&self, session: &Session) -> Option<Principal> {
        let fields = &self.options.session_fields;
        let id = session.get(&fields.id).filter(|id| !id.is_empty())?;
        Some(Principal {
            id: id.to_string(),
            username: session.get(&fields.username).unwrap_or_default().to_string(),
            email: session.get(&fields.email).unwrap_or_default().to_string(),
            roles: session.get_i64(&fields.roles).unwrap_or(0),
            level: session.get_i64(&fields.level).unwrap_or(0),
            status: session.get_i64(&fields.status).unwrap_or(0),
        })
    }

    fn fill_identity(&self, session: &mut Session, claims: &Claims) {
        let fields = &self.options.session_fields;
        session.set(&fields.id, claims.sub.clone());
        session.set(&fields.username, claims.name.clone().unwrap_or_default());
        session.set(&fields.email, claims.email.clone().unwrap_or_default());
        session.set(&fields.roles, claims.role.to_string());
        session.set(&fields.level, claims.level.to_string());
        session.set(&fields.status, claims.status.to_string());
    }
}

/// 256-bit random handshake state, base64url encoded
fn generate_state() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
