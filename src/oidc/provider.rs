//! Identity provider client
//!
//! Discovery (`/.well-known/openid-configuration`), the authorization-code
//! and refresh-token grants, and the user-info endpoint. Every call carries
//! the configured request timeout; a timed-out call surfaces as
//! [`Error::Http`] with `is_timeout()` set.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};
use url::Url;

use super::options::ValidatedOptions;
use crate::{Error, Result};

/// Tokens issued by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,
    /// Refresh token, when the provider issued one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// ID token (not verified here)
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenSet {
    /// Token set carrying only an access token
    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: Some("Bearer".to_string()),
            expires_in: None,
            id_token: None,
        }
    }
}

/// Identity claims from the user-info endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Subject identifier
    pub sub: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Role bitmask
    #[serde(default, deserialize_with = "lenient_i64")]
    pub role: i64,
    /// Account level
    #[serde(default, deserialize_with = "lenient_i64")]
    pub level: i64,
    /// Account status
    #[serde(default, deserialize_with = "lenient_i64")]
    pub status: i64,
}

/// Accept a JSON number, a numeric string, or null (as 0).
fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
        Null(()),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) if s.trim().is_empty() => Ok(0),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        NumberOrString::Null(()) => Ok(0),
    }
}

/// Operations the session state machine needs from the provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Authorization endpoint URL for a new challenge carrying `state`
    fn authorization_url(&self, state: &str) -> Result<Url>;

    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<TokenSet>;

    /// Obtain fresh tokens with a refresh token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet>;

    /// Fetch identity claims for an access token
    async fn user_info(&self, access_token: &str) -> Result<Claims>;
}

/// OpenID Provider Metadata (subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer URL
    pub issuer: String,
    /// Authorization endpoint URL
    pub authorization_endpoint: String,
    /// Token endpoint URL
    pub token_endpoint: String,
    /// User-info endpoint URL
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// End-session endpoint URL
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    /// Supported scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

/// Deserialize scopes that may be either a space-separated string or an array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl ProviderMetadata {
    /// Fetch the discovery document for `issuer_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unreachable, answers with a
    /// non-success status, or returns an unusable document.
    pub async fn discover(client: &Client, issuer_url: &str) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        debug!(url = %url, "Discovering OpenID provider metadata");

        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "OpenID discovery failed: HTTP {}",
                response.status()
            )));
        }

        let metadata: Self = response.json().await?;
        if metadata.authorization_endpoint.trim().is_empty()
            || metadata.token_endpoint.trim().is_empty()
        {
            return Err(Error::Internal(
                "OpenID discovery document is missing mandatory endpoints".to_string(),
            ));
        }

        debug!(issuer = %metadata.issuer, "Discovered OpenID provider");
        Ok(metadata)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

impl From<TokenResponse> for TokenSet {
    fn from(r: TokenResponse) -> Self {
        Self {
            access_token: r.access_token,
            refresh_token: r.refresh_token.filter(|t| !t.is_empty()),
            token_type: r.token_type,
            expires_in: r.expires_in,
            id_token: r.id_token,
        }
    }
}

/// Provider reached over HTTP
pub struct OidcProvider {
    http: Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OidcProvider {
    /// Discover the provider described by `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or discovery fails.
    pub async fn discover(options: &ValidatedOptions) -> Result<Self> {
        let http = Client::builder().timeout(options.provider_timeout).build()?;
        let metadata = ProviderMetadata::discover(&http, &options.provider_url).await?;
        info!(
            issuer = %metadata.issuer,
            userinfo = metadata.userinfo_endpoint.is_some(),
            "Identity provider ready"
        );
        Ok(Self::with_metadata(http, metadata, options))
    }

    /// Build from already-known metadata.
    #[must_use]
    pub fn with_metadata(http: Client, metadata: ProviderMetadata, options: &ValidatedOptions) -> Self {
        Self {
            http,
            metadata,
            client_id: options.client_id.clone(),
            client_secret: options.client_secret.clone(),
            redirect_uri: options.sign_in_callback_url.to_string(),
            scopes: options.scopes.clone(),
        }
    }

    /// Discovered metadata
    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn token_request(&self, params: &HashMap<&str, &str>, what: &str) -> Result<TokenSet> {
        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!("{what} failed: HTTP {status} - {body}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.into())
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn authorization_url(&self, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| Error::Internal(format!("Invalid authorization endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", self.redirect_uri.as_str());
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());
        self.token_request(&params, "Token exchange").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());
        self.token_request(&params, "Token refresh").await
    }

    async fn user_info(&self, access_token: &str) -> Result<Claims> {
        let endpoint = self
            .metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("provider does not advertise a userinfo endpoint".to_string()))?;

        let response = self.http.get(endpoint).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "User info request failed: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|source| Error::Decode {
            key: "userinfo".to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_accept_numbers_and_numeric_strings() {
        let claims: Claims = serde_json::from_str(
            r#"{"sub":"u1","name":"Alice","email":"a@example.com","role":"6","level":3,"status":null}"#,
        )
        .unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, 6);
        assert_eq!(claims.level, 3);
        assert_eq!(claims.status, 0);
    }

    #[test]
    fn claims_reject_non_numeric_role() {
        let result: std::result::Result<Claims, _> =
            serde_json::from_str(r#"{"sub":"u1","role":"admin"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn claims_require_subject() {
        let result: std::result::Result<Claims, _> = serde_json::from_str(r#"{"role":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn metadata_accepts_space_separated_scopes() {
        let metadata: ProviderMetadata = serde_json::from_str(
            r#"{
                "issuer": "https://login.example.com",
                "authorization_endpoint": "https://login.example.com/authorize",
                "token_endpoint": "https://login.example.com/token",
                "scopes_supported": "openid profile email"
            }"#,
        )
        .unwrap();
        assert_eq!(metadata.scopes_supported, vec!["openid", "profile", "email"]);
        assert!(metadata.userinfo_endpoint.is_none());
    }

    #[test]
    fn empty_refresh_token_is_treated_as_absent() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":""}"#).unwrap();
        let tokens = TokenSet::from(response);
        assert_eq!(tokens.refresh_token, None);
    }
}
