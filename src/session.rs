//! Server-side sessions
//!
//! A session is a flat map of named string fields keyed by an opaque ID
//! carried in the session cookie. The [`SessionStore`] trait abstracts over
//! storage; [`InMemorySessionStore`] keeps sessions in a `DashMap` with a
//! sliding TTL and a background reaper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use rand::RngExt;
use tracing::debug;

use crate::Result;
use crate::cache::{Clock, SystemClock};

/// One caller's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    values: HashMap<String, String>,
}

impl Session {
    /// Empty session with a fresh random ID
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(generate_session_id())
    }

    /// Empty session under an existing ID
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: HashMap::new(),
        }
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Field value
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Field parsed as an integer
    #[must_use]
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(|v| v.parse().ok())
    }

    /// Set a field
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.values.insert(field.to_string(), value.into());
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.values.remove(field)
    }

    /// Whether no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// 256-bit random session ID, base64url encoded
#[must_use]
pub fn generate_session_id() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Session persistence
///
/// Implementations must be `Send + Sync`; one store serves every request.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Load a live session. Expired or unknown IDs yield `None`.
    async fn load(&self, id: &str) -> Result<Option<Session>>;

    /// Persist a session, extending its lifetime to the store's TTL.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Persist a session that expires `ttl` from now.
    async fn save_with_ttl(&self, session: &Session, ttl: Duration) -> Result<()>;

    /// Delete a session. Unknown IDs are ignored.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Remove every expired session, returning how many were dropped.
    async fn reap_expired(&self) -> usize;
}

struct StoredSession {
    values: HashMap<String, String>,
    expires_at: Instant,
}

/// Sessions held in process memory
pub struct InMemorySessionStore {
    sessions: DashMap<String, StoredSession>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    /// Store whose sessions live `ttl` past their last save
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Store measuring expiry with `clock`
    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Number of sessions held, expired ones included until reaped
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let now = self.clock.now();
        let Some(entry) = self.sessions.get(id) else {
            return Ok(None);
        };
        if entry.expires_at <= now {
            drop(entry);
            self.sessions.remove(id);
            debug!("Lazy-evicted expired session");
            return Ok(None);
        }
        Ok(Some(Session {
            id: id.to_string(),
            values: entry.values.clone(),
        }))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.save_with_ttl(session, self.ttl).await
    }

    async fn save_with_ttl(&self, session: &Session, ttl: Duration) -> Result<()> {
        self.sessions.insert(
            session.id.clone(),
            StoredSession {
                values: session.values.clone(),
                expires_at: self.clock.now() + ttl,
            },
        );
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }
}

/// Spawn a background task that reaps expired sessions every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    })
}
