//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::permission::DefaultPolicy;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Project name, used to namespace the route table
    pub project: String,
    /// Key-value store connection
    pub store: StoreConfig,
    /// Identity provider client settings
    pub oidc: OidcConfig,
    /// Secure cookie settings
    pub cookies: CookieConfig,
    /// Permission auditor settings
    pub auditor: AuditorConfig,
    /// Session store settings
    pub sessions: SessionConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

/// Key-value store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `host:port` addresses. One address without `cluster_enabled` selects a
    /// single-node connection; anything else selects cluster mode.
    pub addrs: Vec<String>,
    /// Optional password (supports `env:VAR_NAME`)
    pub password: Option<String>,
    /// Logical database (single-node only)
    pub db: i64,
    /// Force cluster mode even with one seed address
    pub cluster_enabled: bool,
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Key prefix for all collections
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addrs: vec!["127.0.0.1:6379".to_string()],
            password: None,
            db: 0,
            cluster_enabled: false,
            timeout: Duration::from_secs(3),
            key_prefix: "ecp".to_string(),
        }
    }
}

/// Identity provider client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Issuer URL used for discovery
    pub provider_url: String,
    /// Absolute URL of this service's sign-in callback
    pub sign_in_callback_url: String,
    /// Where authenticated callers without the required role are sent
    pub access_denied_url: String,
    /// Scopes requested in addition to `openid`
    pub scopes: Vec<String>,
    /// Sign-out path served by this service
    pub sign_out_path: String,
    /// Timeout for provider calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            provider_url: String::new(),
            sign_in_callback_url: String::new(),
            access_denied_url: "/".to_string(),
            scopes: vec!["profile".to_string(), "email".to_string()],
            sign_out_path: "/signout".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Secure cookie settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Base64 encoded 32-byte key (supports `env:VAR_NAME`)
    pub key: String,
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Access token cookie name
    pub access_token: String,
    /// Refresh token cookie name
    pub refresh_token: String,
    /// Session id cookie name
    pub session: String,
    /// Refresh token cookie lifetime
    #[serde(with = "humantime_serde")]
    pub refresh_token_max_age: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            secure: true,
            access_token: ".ACT".to_string(),
            refresh_token: ".RFT".to_string(),
            session: ".USS".to_string(),
            refresh_token_max_age: Duration::from_secs(336 * 3600),
        }
    }
}

impl CookieConfig {
    /// Resolve the cookie key (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_key(&self) -> String {
        resolve_env_ref(&self.key)
    }
}

/// Permission auditor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// Maximum age of the cached route/permission snapshot
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Decision for a request whose route is not registered
    pub unknown_route: DefaultPolicy,
    /// Decision for a registered route that no permission references
    pub unprotected_route: DefaultPolicy,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            unknown_route: DefaultPolicy::Deny,
            unprotected_route: DefaultPolicy::Deny,
        }
    }
}

/// Session store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle lifetime of a server-side session
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Lifetime of a session that only holds a pending sign-in
    #[serde(with = "humantime_serde")]
    pub pending_ttl: Duration,
    /// How often expired sessions are reaped
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            pending_ttl: Duration::from_secs(10 * 60),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (ROUTE_GUARD_ prefix)
        figment = figment.merge(Env::prefixed("ROUTE_GUARD_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Collection key holding route records
    #[must_use]
    pub fn routes_key(&self) -> String {
        format!("{}:ROUTES:{}", self.store.key_prefix, self.project)
    }

    /// Collection key holding permission records
    #[must_use]
    pub fn permissions_key(&self) -> String {
        format!("{}:PERMISSIONS", self.store.key_prefix)
    }

    /// Collection key holding the URL table
    #[must_use]
    pub fn urls_key(&self) -> String {
        format!("{}:URIS", self.store.key_prefix)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` / `${VAR:-default}` and `env:VAR` in secret-bearing values
    fn expand_env_vars(&mut self) {
        let re = env_pattern();

        self.oidc.client_id = Self::expand_string(&re, &self.oidc.client_id);
        self.oidc.client_secret =
            resolve_env_ref(&Self::expand_string(&re, &self.oidc.client_secret));
        self.oidc.provider_url = Self::expand_string(&re, &self.oidc.provider_url);
        self.oidc.sign_in_callback_url = Self::expand_string(&re, &self.oidc.sign_in_callback_url);
        self.cookies.key = Self::expand_string(&re, &self.cookies.key);
        if let Some(password) = self.store.password.take() {
            self.store.password = Some(resolve_env_ref(&Self::expand_string(&re, &password)));
        }
        for addr in &mut self.store.addrs {
            *addr = Self::expand_string(&re, addr);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Pattern: `${VAR}` or `${VAR:-default}`
#[allow(clippy::missing_panics_doc)]
fn env_pattern() -> Regex {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("static regex")
}

/// `env:NAME` reads `NAME` from the environment; anything else is literal.
fn resolve_env_ref(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "336h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, 60).map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 3600).map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }

    /// `value * unit` seconds, rejecting overflow
    fn scaled(value: &str, unit: u64) -> Result<Duration, String> {
        let n = value.parse::<u64>().map_err(|e| e.to_string())?;
        n.checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{value}' is too large"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.cookies.access_token, ".ACT");
        assert_eq!(config.cookies.refresh_token, ".RFT");
        assert_eq!(config.cookies.session, ".USS");
        assert_eq!(config.cookies.refresh_token_max_age, Duration::from_secs(336 * 3600));
        assert_eq!(config.oidc.access_denied_url, "/");
        assert_eq!(config.auditor.unknown_route, DefaultPolicy::Deny);
        assert_eq!(config.auditor.unprotected_route, DefaultPolicy::Deny);
        assert_eq!(config.sessions.pending_ttl, Duration::from_secs(600));
    }

    #[test]
    fn collection_keys_are_namespaced() {
        let config = Config {
            project: "shop".to_string(),
            ..Default::default()
        };
        assert_eq!(config.routes_key(), "ecp:ROUTES:shop");
        assert_eq!(config.permissions_key(), "ecp:PERMISSIONS");
        assert_eq!(config.urls_key(), "ecp:URIS");
    }

    #[test]
    fn yaml_sections_deserialize() {
        let yaml = r#"
project: shop
store:
  addrs: ["10.0.0.1:7000", "10.0.0.2:7000"]
  cluster_enabled: true
  timeout: 500ms
oidc:
  client_id: shop-web
  client_secret: s3cret
  provider_url: https://login.example.com
  sign_in_callback_url: https://shop.example.com/signin-oidc
  scopes: [profile]
auditor:
  refresh_interval: 5m
  unprotected_route: authenticated
cookies:
  refresh_token_max_age: 336h
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store.addrs.len(), 2);
        assert!(config.store.cluster_enabled);
        assert_eq!(config.store.timeout, Duration::from_millis(500));
        assert_eq!(config.oidc.client_id, "shop-web");
        assert_eq!(config.auditor.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.auditor.unprotected_route, DefaultPolicy::Authenticated);
        assert_eq!(config.cookies.refresh_token_max_age, Duration::from_secs(336 * 3600));
        // untouched sections keep defaults
        assert_eq!(config.cookies.session, ".USS");
    }

    #[test]
    fn oversized_durations_are_rejected() {
        // GIVEN: hour and minute counts whose seconds overflow u64
        let hours = format!("sessions:\n  ttl: {}h\n", u64::MAX / 3600 + 1);
        let minutes = format!("sessions:\n  pending_ttl: {}m\n", u64::MAX);

        // WHEN/THEN: parsing fails instead of wrapping
        for yaml in [hours, minutes] {
            let err = serde_yaml::from_str::<Config>(&yaml).unwrap_err();
            assert!(err.to_string().contains("too large"), "{err}");
        }

        // AND: the largest representable value still parses
        let yaml = format!("sessions:\n  ttl: {}h\n", u64::MAX / 3600);
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.sessions.ttl, Duration::from_secs(u64::MAX / 3600 * 3600));
    }

    #[test]
    fn load_rejects_oversized_duration_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route-guard.yaml");
        std::fs::write(&path, format!("auditor:\n  refresh_interval: {}h\n", u64::MAX)).unwrap();

        let result = Config::load(Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/route-guard.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route-guard.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "project: billing").unwrap();
        writeln!(f, "server:\n  port: 9090").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.project, "billing");
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn expand_string_uses_default_when_unset() {
        let re = env_pattern();
        let out = Config::expand_string(&re, "${ROUTE_GUARD_TEST_UNSET_VAR:-fallback}");
        assert_eq!(out, "fallback");
    }

    #[test]
    fn env_ref_falls_back_to_literal_when_unset() {
        assert_eq!(resolve_env_ref("plain"), "plain");
        assert_eq!(
            resolve_env_ref("env:ROUTE_GUARD_TEST_SURELY_UNSET"),
            "env:ROUTE_GUARD_TEST_SURELY_UNSET"
        );
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }
}
