//! Audit logging for session lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with structured fields so the
//! trail is queryable by any log aggregator. Token values and session IDs are
//! never part of an event.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `auth.challenge` | An anonymous caller is sent to the provider |
//! | `auth.login` | A callback completed and the session holds an identity |
//! | `auth.denied` | A signed-in caller lacks permission for a route |
//! | `auth.state_mismatch` | A callback's state did not match the session |
//! | `auth.provider_error` | The provider reported an error or a call to it failed |
//! | `auth.cookie_tampered` | A custody cookie failed its integrity check |
//! | `auth.token_refreshed` | An access token was renewed with the refresh token |
//! | `auth.sign_out` | A session was ended |

use serde::Serialize;

use crate::route::RouteIdentity;

/// Structured audit event emitted for every session transition.
#[derive(Debug, Serialize)]
pub struct AuthEvent {
    /// Event type string (e.g., `"auth.login"`).
    pub event: &'static str,
    /// Subject of the signed-in caller, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Route being accessed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Role bitmask involved in a decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<i64>,
    /// Human-readable reason for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            subject: None,
            route: None,
            roles: None,
            reason: None,
        }
    }

    /// Construct an `auth.challenge` event.
    #[must_use]
    pub fn challenge(route: &RouteIdentity) -> Self {
        Self {
            route: Some(route.to_string()),
            ..Self::new("auth.challenge")
        }
    }

    /// Construct an `auth.login` event.
    #[must_use]
    pub fn login(subject: &str, roles: i64) -> Self {
        Self {
            subject: Some(subject.to_string()),
            roles: Some(roles),
            ..Self::new("auth.login")
        }
    }

    /// Construct an `auth.denied` event.
    #[must_use]
    pub fn denied(subject: &str, route: &RouteIdentity, roles: i64) -> Self {
        Self {
            subject: Some(subject.to_string()),
            route: Some(route.to_string()),
            roles: Some(roles),
            ..Self::new("auth.denied")
        }
    }

    /// Construct an `auth.state_mismatch` event.
    #[must_use]
    pub fn state_mismatch(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("auth.state_mismatch")
        }
    }

    /// Construct an `auth.provider_error` event.
    #[must_use]
    pub fn provider_error(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new("auth.provider_error")
        }
    }

    /// Construct an `auth.cookie_tampered` event.
    #[must_use]
    pub fn cookie_tampered(cookie: &str) -> Self {
        Self {
            reason: Some(format!("cookie '{cookie}' failed integrity check")),
            ..Self::new("auth.cookie_tampered")
        }
    }

    /// Construct an `auth.token_refreshed` event.
    #[must_use]
    pub fn token_refreshed(subject: Option<&str>) -> Self {
        Self {
            subject: subject.map(ToString::to_string),
            ..Self::new("auth.token_refreshed")
        }
    }

    /// Construct an `auth.sign_out` event.
    #[must_use]
    pub fn sign_out(subject: Option<&str>) -> Self {
        Self {
            subject: subject.map(ToString::to_string),
            ..Self::new("auth.sign_out")
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO route_guard::oidc::audit event="auth.login" audit={"event":"auth.login","subject":...}
/// ```
pub(crate) fn emit(event: &AuthEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(event = event.event, audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
