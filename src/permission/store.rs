//! Durable route and permission registry over a [`KvStore`].
//!
//! Each entity kind lives in one hash: routes under
//! `<prefix>:ROUTES:<project>`, permissions under `<prefix>:PERMISSIONS`,
//! one field per entity ID holding its JSON encoding. Writes are upserts and
//! the last writer wins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use super::{Permission, Route};
use crate::config::Config;
use crate::kv::KvStore;
use crate::{Error, Result};

/// CRUD over routes and permissions.
#[derive(Clone)]
pub struct PermissionStore {
    kv: Arc<dyn KvStore>,
    routes_key: String,
    permissions_key: String,
}

impl PermissionStore {
    /// Create a store over explicit collection keys.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        routes_key: impl Into<String>,
        permissions_key: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            routes_key: routes_key.into(),
            permissions_key: permissions_key.into(),
        }
    }

    /// Create a store using the collection keys derived from `config`.
    #[must_use]
    pub fn from_config(kv: Arc<dyn KvStore>, config: &Config) -> Self {
        Self::new(kv, config.routes_key(), config.permissions_key())
    }

    /// Collection key holding routes
    #[must_use]
    pub fn routes_key(&self) -> &str {
        &self.routes_key
    }

    /// Collection key holding permissions
    #[must_use]
    pub fn permissions_key(&self) -> &str {
        &self.permissions_key
    }

    // ── Routes ──────────────────────────────────────────────────────────

    /// Insert a route, replacing any route with the same ID.
    pub async fn create_route(&self, route: &Route) -> Result<()> {
        self.put(&self.routes_key, &route.id, route).await
    }

    /// Replace a route. Same semantics as [`create_route`](Self::create_route).
    pub async fn update_route(&self, route: &Route) -> Result<()> {
        self.put(&self.routes_key, &route.id, route).await
    }

    /// Fetch one route.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent, [`Error::Decode`] when the stored
    /// value is not a route.
    pub async fn get_route(&self, id: &str) -> Result<Route> {
        self.get(&self.routes_key, "route", id).await
    }

    /// Delete a route. Deleting an absent route succeeds.
    pub async fn remove_route(&self, id: &str) -> Result<()> {
        self.kv.hdel(&self.routes_key, id).await
    }

    /// Every decodable route keyed by ID.
    pub async fn get_routes(&self) -> Result<HashMap<String, Route>> {
        self.get_all(&self.routes_key).await
    }

    // ── Permissions ─────────────────────────────────────────────────────

    /// Insert a permission, replacing any permission with the same ID.
    pub async fn create_permission(&self, permission: &Permission) -> Result<()> {
        self.put(&self.permissions_key, &permission.id, permission).await
    }

    /// Replace a permission.
    pub async fn update_permission(&self, permission: &Permission) -> Result<()> {
        self.put(&self.permissions_key, &permission.id, permission).await
    }

    /// Fetch one permission.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when absent, [`Error::Decode`] when corrupt.
    pub async fn get_permission(&self, id: &str) -> Result<Permission> {
        self.get(&self.permissions_key, "permission", id).await
    }

    /// Delete a permission. Deleting an absent permission succeeds.
    pub async fn remove_permission(&self, id: &str) -> Result<()> {
        self.kv.hdel(&self.permissions_key, id).await
    }

    /// Every decodable permission keyed by ID.
    pub async fn get_permissions(&self) -> Result<HashMap<String, Permission>> {
        self.get_all(&self.permissions_key).await
    }

    async fn put<T: Serialize>(&self, key: &str, id: &str, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.kv.hset(key, id, &json).await?;
        debug!(collection = %key, id = %id, "Stored record");
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str, kind: &str, id: &str) -> Result<T> {
        let raw = self
            .kv
            .hget(key, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{kind} '{id}'")))?;
        serde_json::from_str(&raw).map_err(|source| Error::Decode {
            key: format!("{key}/{id}"),
            source,
        })
    }

    async fn get_all<T: DeserializeOwned>(&self, key: &str) -> Result<HashMap<String, T>> {
        let raw = self.kv.hgetall(key).await?;
        let mut records = HashMap::with_capacity(raw.len());
        for (id, value) in raw {
            match serde_json::from_str(&value) {
                Ok(record) => {
                    records.insert(id, record);
                }
                Err(e) => {
                    error!(collection = %key, id = %id, error = %e, "Skipping undecodable record");
                }
            }
        }
        Ok(records)
    }
}
