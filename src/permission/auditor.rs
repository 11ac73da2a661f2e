//! Authorization decisions over a cached registry snapshot.
//!
//! The auditor never consults the store per request. It keeps one immutable
//! [`Snapshot`] in a [`TtlCache`]; once the snapshot is older than the
//! refresh interval the next caller rebuilds it and swaps the new `Arc` in.
//! Concurrent readers keep using whichever snapshot they already hold.
//!
//! # Decision
//!
//! 1. Find routes whose triple equals the request's (exact, case-sensitive).
//!    None: apply the `unknown_route` policy.
//! 2. Find permissions referencing any of those route IDs.
//!    None: apply the `unprotected_route` policy.
//! 3. Allow if any permission grants the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Caller, DefaultPolicy, Permission, PermissionStore, Route};
use crate::Result;
use crate::cache::{Clock, SystemClock, TtlCache};
use crate::config::AuditorConfig;
use crate::route::RouteIdentity;

const SNAPSHOT_KEY: &str = "snapshot";

/// Immutable view of the registry used for decisions.
#[derive(Debug, Default)]
pub struct Snapshot {
    route_ids: HashMap<RouteIdentity, Vec<String>>,
    grants: HashMap<String, Vec<Permission>>,
}

impl Snapshot {
    /// Index routes by triple and permissions by the routes they cover.
    #[must_use]
    pub fn build(
        routes: impl IntoIterator<Item = Route>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        let mut route_ids: HashMap<RouteIdentity, Vec<String>> = HashMap::new();
        for route in routes {
            route_ids
                .entry(RouteIdentity::new(route.area, route.controller, route.action))
                .or_default()
                .push(route.id);
        }

        let mut grants: HashMap<String, Vec<Permission>> = HashMap::new();
        for permission in permissions {
            for route_id in &permission.route_ids {
                grants
                    .entry(route_id.clone())
                    .or_default()
                    .push(permission.clone());
            }
        }

        Self { route_ids, grants }
    }

    /// Decide whether `caller` may invoke `route`.
    #[must_use]
    pub fn decide(
        &self,
        route: &RouteIdentity,
        caller: &Caller,
        unknown_route: DefaultPolicy,
        unprotected_route: DefaultPolicy,
    ) -> bool {
        let Some(ids) = self.route_ids.get(route) else {
            return unknown_route.admits(caller);
        };

        let mut covering = ids
            .iter()
            .filter_map(|id| self.grants.get(id))
            .flatten()
            .peekable();

        if covering.peek().is_none() {
            return unprotected_route.admits(caller);
        }

        covering.any(|permission| permission.grants(caller))
    }

    /// Number of distinct route triples
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.route_ids.len()
    }
}

/// Route-level authorization over the permission registry.
pub struct PermissionAuditor {
    store: PermissionStore,
    cache: TtlCache<Arc<Snapshot>>,
    unknown_route: DefaultPolicy,
    unprotected_route: DefaultPolicy,
}

impl PermissionAuditor {
    /// Create an auditor refreshing on the system clock.
    #[must_use]
    pub fn new(store: PermissionStore, config: &AuditorConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create an auditor whose snapshot age is measured by `clock`.
    #[must_use]
    pub fn with_clock(store: PermissionStore, config: &AuditorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: TtlCache::with_clock(config.refresh_interval, clock),
            unknown_route: config.unknown_route,
            unprotected_route: config.unprotected_route,
        }
    }

    /// Snapshot refresh interval
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.cache.ttl()
    }

    /// Decide for a resolved route and caller.
    ///
    /// # Errors
    ///
    /// Surfaces store errors raised while refreshing the snapshot.
    pub async fn check_route(&self, route: &RouteIdentity, caller: &Caller) -> Result<bool> {
        let snapshot = self.snapshot().await?;
        let allowed = snapshot.decide(route, caller, self.unknown_route, self.unprotected_route);
        debug!(route = %route, roles = caller.roles(), allowed, "Route checked");
        Ok(allowed)
    }

    /// Decide for a raw triple. `roles == 0` means an anonymous caller.
    pub async fn check(&self, area: &str, controller: &str, action: &str, roles: i64) -> Result<bool> {
        let caller = if roles == 0 {
            Caller::Anonymous
        } else {
            Caller::Authenticated { roles }
        };
        self.check_route(&RouteIdentity::new(area, controller, action), &caller)
            .await
    }

    /// Current snapshot, rebuilt from the store when stale.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.cache.get(SNAPSHOT_KEY) {
            return Ok(snapshot);
        }

        let routes = self.store.get_routes().await.inspect_err(|e| {
            warn!(error = %e, "Failed to load routes for permission snapshot");
        })?;
        let permissions = self.store.get_permissions().await.inspect_err(|e| {
            warn!(error = %e, "Failed to load permissions for permission snapshot");
        })?;

        let snapshot = Arc::new(Snapshot::build(routes.into_values(), permissions.into_values()));
        debug!(
            routes = snapshot.route_count(),
            "Permission snapshot refreshed"
        );
        self.cache.set(SNAPSHOT_KEY, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next check reloads it.
    pub fn invalidate(&self) {
        self.cache.invalidate(SNAPSHOT_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::kv::MemoryKvStore;
    use crate::permission::Access;
    use proptest::prelude::*;

    fn route(id: &str, action: &str) -> Route {
        Route {
            id: id.to_string(),
            area: "Shop".to_string(),
            controller: "Orders".to_string(),
            action: action.to_string(),
        }
    }

    fn permission(id: &str, route_ids: &[&str], roles: i64, access: Access) -> Permission {
        Permission {
            id: id.to_string(),
            route_ids: route_ids.iter().map(ToString::to_string).collect(),
            roles,
            access,
        }
    }

    fn list() -> RouteIdentity {
        RouteIdentity::new("Shop", "Orders", "List")
    }

    async fn auditor_with(
        routes: &[Route],
        permissions: &[Permission],
        config: &AuditorConfig,
    ) -> (PermissionAuditor, PermissionStore, Arc<ManualClock>) {
        let store = PermissionStore::new(Arc::new(MemoryKvStore::new()), "ecp:ROUTES:t", "ecp:PERMISSIONS");
        for r in routes {
            store.create_route(r).await.unwrap();
        }
        for p in permissions {
            store.create_permission(p).await.unwrap();
        }
        let clock = Arc::new(ManualClock::new());
        let auditor = PermissionAuditor::with_clock(store.clone(), config, clock.clone());
        (auditor, store, clock)
    }

    #[tokio::test]
    async fn role_bits_must_intersect() {
        // GIVEN: List requires role bit 0b0010
        let (auditor, _, _) = auditor_with(
            &[route("r1", "List")],
            &[permission("p1", &["r1"], 0b0010, Access::Roles)],
            &AuditorConfig::default(),
        )
        .await;

        // WHEN/THEN: overlapping roles pass, disjoint roles fail
        assert!(auditor.check("Shop", "Orders", "List", 0b0011).await.unwrap());
        assert!(!auditor.check("Shop", "Orders", "List", 0b0100).await.unwrap());
        assert!(!auditor.check("Shop", "Orders", "List", 0).await.unwrap());
    }

    #[tokio::test]
    async fn any_covering_permission_allows() {
        let (auditor, _, _) = auditor_with(
            &[route("r1", "List")],
            &[
                permission("p1", &["r1"], 0b0001, Access::Roles),
                permission("p2", &["r1"], 0b1000, Access::Roles),
            ],
            &AuditorConfig::default(),
        )
        .await;

        assert!(auditor.check("Shop", "Orders", "List", 0b1000).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_route_follows_policy() {
        // GIVEN: an empty registry and the default (deny) policy
        let (auditor, _, _) = auditor_with(&[], &[], &AuditorConfig::default()).await;

        // THEN: denied even with every role bit
        assert!(!auditor.check_route(&list(), &Caller::Authenticated { roles: -1 }).await.unwrap());

        // GIVEN: allow policy
        let config = AuditorConfig {
            unknown_route: DefaultPolicy::Allow,
            ..AuditorConfig::default()
        };
        let (auditor, _, _) = auditor_with(&[], &[], &config).await;
        assert!(auditor.check_route(&list(), &Caller::Anonymous).await.unwrap());
    }

    #[tokio::test]
    async fn unprotected_route_follows_policy() {
        // GIVEN: a route no permission references, policy "authenticated"
        let config = AuditorConfig {
            unprotected_route: DefaultPolicy::Authenticated,
            ..AuditorConfig::default()
        };
        let (auditor, _, _) = auditor_with(
            &[route("r1", "List")],
            &[permission("p1", &["dangling"], 1, Access::Roles)],
            &config,
        )
        .await;

        // THEN: anonymous denied, any signed-in caller admitted
        assert!(!auditor.check_route(&list(), &Caller::Anonymous).await.unwrap());
        assert!(auditor.check_route(&list(), &Caller::Authenticated { roles: 0 }).await.unwrap());
    }

    #[tokio::test]
    async fn anonymous_sentinel_admits_everyone() {
        let (auditor, _, _) = auditor_with(
            &[route("r1", "List")],
            &[permission("p1", &["r1"], 0, Access::Anonymous)],
            &AuditorConfig::default(),
        )
        .await;

        assert!(auditor.check_route(&list(), &Caller::Anonymous).await.unwrap());
    }

    #[tokio::test]
    async fn matching_is_case_sensitive() {
        let (auditor, _, _) = auditor_with(
            &[route("r1", "List")],
            &[permission("p1", &["r1"], 0, Access::Anonymous)],
            &AuditorConfig::default(),
        )
        .await;

        assert!(!auditor.check("shop", "orders", "list", 0).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_is_reused_until_refresh_interval() {
        // GIVEN: a cached snapshot where List is denied
        let (auditor, store, clock) = auditor_with(
            &[route("r1", "List")],
            &[permission("p1", &["r1"], 0b0001, Access::Roles)],
            &AuditorConfig::default(),
        )
        .await;
        assert!(!auditor.check("Shop", "Orders", "List", 0b0010).await.unwrap());

        // WHEN: the store changes but the interval has not elapsed
        store
            .update_permission(&permission("p1", &["r1"], 0b0010, Access::Roles))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(29));

        // THEN: the old decision stands
        assert!(!auditor.check("Shop", "Orders", "List", 0b0010).await.unwrap());

        // WHEN: the interval passes
        clock.advance(Duration::from_secs(1));

        // THEN: the change is visible
        assert!(auditor.check("Shop", "Orders", "List", 0b0010).await.unwrap());
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let (auditor, store, _) = auditor_with(&[route("r1", "List")], &[], &AuditorConfig::default()).await;
        assert!(!auditor.check("Shop", "Orders", "List", 1).await.unwrap());

        store
            .create_permission(&permission("p1", &["r1"], 1, Access::Roles))
            .await
            .unwrap();
        auditor.invalidate();

        assert!(auditor.check("Shop", "Orders", "List", 1).await.unwrap());
    }

    #[test]
    fn decision_is_pure_for_a_fixed_snapshot() {
        let snapshot = Snapshot::build(
            vec![route("r1", "List")],
            vec![permission("p1", &["r1"], 0b0110, Access::Roles)],
        );
        let caller = Caller::Authenticated { roles: 0b0100 };
        let first = snapshot.decide(&list(), &caller, DefaultPolicy::Deny, DefaultPolicy::Deny);
        for _ in 0..10 {
            assert_eq!(
                snapshot.decide(&list(), &caller, DefaultPolicy::Deny, DefaultPolicy::Deny),
                first
            );
        }
    }

    proptest! {
        #[test]
        fn role_decision_is_bitwise_and(required in any::<i64>(), held in any::<i64>()) {
            let snapshot = Snapshot::build(
                vec![route("r1", "List")],
                vec![permission("p1", &["r1"], required, Access::Roles)],
            );
            let caller = if held == 0 {
                Caller::Anonymous
            } else {
                Caller::Authenticated { roles: held }
            };
            let allowed = snapshot.decide(&list(), &caller, DefaultPolicy::Deny, DefaultPolicy::Deny);
            prop_assert_eq!(allowed, required & held != 0);
        }
    }
}
