//! Client construction options and their validation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::cookie::{CookieOptions, SecureCookie};
use crate::permission::PermissionAuditor;
use crate::session::SessionStore;

/// Callback path used when the callback URL has none
pub const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";

/// Refresh token cookie lifetime (14 days)
pub const DEFAULT_REFRESH_TOKEN_MAX_AGE: Duration = Duration::from_secs(336 * 3600);

/// Default lifetime of a session holding only a pending sign-in
pub const DEFAULT_PENDING_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// Options rejected at construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required option was not supplied
    #[error("OIDC client option '{0}' is required")]
    Missing(&'static str),

    /// An option was supplied but cannot be used
    #[error("OIDC client option '{field}' is invalid: {reason}")]
    Invalid {
        /// Option name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Names of the three custody cookies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    /// Access token cookie
    pub access_token: String,
    /// Refresh token cookie
    pub refresh_token: String,
    /// Session ID cookie
    pub session: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            access_token: ".ACT".to_string(),
            refresh_token: ".RFT".to_string(),
            session: ".USS".to_string(),
        }
    }
}

/// Session field names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFields {
    /// Subject identifier
    pub id: String,
    /// Display name
    pub username: String,
    /// Email address
    pub email: String,
    /// Role bitmask
    pub roles: String,
    /// Account level
    pub level: String,
    /// Account status
    pub status: String,
    /// Pending handshake state
    pub state: String,
    /// Where to send the caller after sign-in
    pub return_url: String,
}

impl Default for SessionFields {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            username: "Username".to_string(),
            email: "Email".to_string(),
            roles: "Roles".to_string(),
            level: "Level".to_string(),
            status: "Status".to_string(),
            state: "State".to_string(),
            return_url: "ReturnUrl".to_string(),
        }
    }
}

/// Everything needed to build an [`OidcClient`](super::OidcClient).
///
/// Empty names fall back to their defaults during [`validate`](Self::validate).
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Issuer URL used for discovery
    pub provider_url: String,
    /// Absolute sign-in callback URL registered with the provider
    pub sign_in_callback_url: String,
    /// Scopes requested in addition to `openid`
    pub scopes: Vec<String>,
    /// Redirect target for authenticated callers lacking permission
    pub access_denied_url: String,
    /// Path of the sign-out endpoint
    pub sign_out_path: String,
    /// Custody cookie names
    pub cookie_names: CookieNames,
    /// Session field names
    pub session_fields: SessionFields,
    /// Attributes of issued cookies
    pub cookie_options: CookieOptions,
    /// Refresh token cookie lifetime
    pub refresh_token_max_age: Option<Duration>,
    /// Provider call timeout
    pub provider_timeout: Option<Duration>,
    /// Lifetime of a session created by a sign-in challenge
    pub pending_session_ttl: Option<Duration>,
    /// Cookie sealing
    pub secure_cookie: Option<Arc<dyn SecureCookie>>,
    /// Authorization decisions
    pub permission_auditor: Option<Arc<PermissionAuditor>>,
    /// Session persistence
    pub session_store: Option<Arc<dyn SessionStore>>,
}

impl ClientOptions {
    /// Options populated from the `oidc` and `cookies` configuration sections.
    ///
    /// Collaborators (`secure_cookie`, `permission_auditor`, `session_store`)
    /// are left unset for the caller to supply.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.oidc.client_id.clone(),
            client_secret: config.oidc.client_secret.clone(),
            provider_url: config.oidc.provider_url.clone(),
            sign_in_callback_url: config.oidc.sign_in_callback_url.clone(),
            scopes: config.oidc.scopes.clone(),
            access_denied_url: config.oidc.access_denied_url.clone(),
            sign_out_path: config.oidc.sign_out_path.clone(),
            cookie_names: CookieNames {
                access_token: config.cookies.access_token.clone(),
                refresh_token: config.cookies.refresh_token.clone(),
                session: config.cookies.session.clone(),
            },
            session_fields: SessionFields::default(),
            cookie_options: CookieOptions {
                secure: config.cookies.secure,
                ..CookieOptions::default()
            },
            refresh_token_max_age: Some(config.cookies.refresh_token_max_age),
            provider_timeout: Some(config.oidc.timeout),
            pending_session_ttl: Some(config.sessions.pending_ttl),
            secure_cookie: None,
            permission_auditor: None,
            session_store: None,
        }
    }

    /// Check required options and fill in defaults.
    ///
    /// # Errors
    ///
    /// The first missing or unusable option, in the order: client ID, client
    /// secret, provider URL, sign-in callback URL, scopes, secure cookie,
    /// permission auditor, session store.
    pub fn validate(self) -> Result<ValidatedOptions, ConfigError> {
        require(&self.client_id, "client_id")?;
        require(&self.client_secret, "client_secret")?;
        require(&self.provider_url, "provider_url")?;
        Url::parse(&self.provider_url).map_err(|e| ConfigError::Invalid {
            field: "provider_url",
            reason: e.to_string(),
        })?;
        require(&self.sign_in_callback_url, "sign_in_callback_url")?;
        let sign_in_callback_url =
            Url::parse(&self.sign_in_callback_url).map_err(|e| ConfigError::Invalid {
                field: "sign_in_callback_url",
                reason: e.to_string(),
            })?;
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::Missing("scopes"));
        }
        let secure_cookie = self.secure_cookie.ok_or(ConfigError::Missing("secure_cookie"))?;
        let permission_auditor = self
            .permission_auditor
            .ok_or(ConfigError::Missing("permission_auditor"))?;
        let session_store = self.session_store.ok_or(ConfigError::Missing("session_store"))?;

        let mut scopes = vec!["openid".to_string()];
        for scope in self.scopes.iter().map(|s| s.trim()) {
            if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }

        let callback_path = match sign_in_callback_url.path() {
            "" | "/" => DEFAULT_CALLBACK_PATH.to_string(),
            path => path.to_string(),
        };

        Ok(ValidatedOptions {
            client_id: self.client_id,
            client_secret: self.client_secret,
            provider_url: self.provider_url,
            sign_in_callback_url,
            callback_path,
            scopes,
            access_denied_url: or_default(self.access_denied_url, "/"),
            sign_out_path: or_default(self.sign_out_path, "/signout"),
            cookie_names: fill_cookie_names(self.cookie_names),
            session_fields: fill_session_fields(self.session_fields),
            cookie_options: self.cookie_options,
            refresh_token_max_age: self
                .refresh_token_max_age
                .unwrap_or(DEFAULT_REFRESH_TOKEN_MAX_AGE),
            provider_timeout: self.provider_timeout.unwrap_or(Duration::from_secs(10)),
            pending_session_ttl: self
                .pending_session_ttl
                .unwrap_or(DEFAULT_PENDING_SESSION_TTL),
            secure_cookie,
            permission_auditor,
            session_store,
        })
    }
}

/// Options after validation; every field is usable as-is.
#[derive(Clone)]
pub struct ValidatedOptions {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Issuer URL
    pub provider_url: String,
    /// Sign-in callback URL
    pub sign_in_callback_url: Url,
    /// Path component of the callback URL served by the adapter
    pub callback_path: String,
    /// Requested scopes, `openid` first
    pub scopes: Vec<String>,
    /// Access-denied redirect target
    pub access_denied_url: String,
    /// Sign-out endpoint path
    pub sign_out_path: String,
    /// Custody cookie names
    pub cookie_names: CookieNames,
    /// Session field names
    pub session_fields: SessionFields,
    /// Cookie attributes
    pub cookie_options: CookieOptions,
    /// Refresh token cookie lifetime
    pub refresh_token_max_age: Duration,
    /// Provider call timeout
    pub provider_timeout: Duration,
    /// Lifetime of a session created by a sign-in challenge
    pub pending_session_ttl: Duration,
    /// Cookie sealing
    pub secure_cookie: Arc<dyn SecureCookie>,
    /// Authorization decisions
    pub permission_auditor: Arc<PermissionAuditor>,
    /// Session persistence
    pub session_store: Arc<dyn SessionStore>,
}

fn require(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(())
    }
}

fn or_default(value: String, default: &str) -> String {
    if value.is_empty() { default.to_string() } else { value }
}

fn fill_cookie_names(names: CookieNames) -> CookieNames {
    let defaults = CookieNames::default();
    CookieNames {
        access_token: or_default(names.access_token, &defaults.access_token),
        refresh_token: or_default(names.refresh_token, &defaults.refresh_token),
        session: or_default(names.session, &defaults.session),
    }
}

fn fill_session_fields(fields: SessionFields) -> SessionFields {
    let d = SessionFields::default();
    SessionFields {
        id: or_default(fields.id, &d.id),
        username: or_default(fields.username, &d.username),
        email: or_default(fields.email, &d.email),
        roles: or_default(fields.roles, &d.roles),
        level: or_default(fields.level, &d.level),
        status: or_default(fields.status, &d.status),
        state: or_default(fields.state, &d.state),
        return_url: or_default(fields.return_url, &d.return_url),
    }
}
