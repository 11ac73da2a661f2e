//! Route and permission registry plus the authorization decision over it.
//!
//! # Model
//!
//! A [`Route`] names one handler by its `(Area, Controller, Action)` triple.
//! A [`Permission`] grants access to a set of routes, either to callers
//! holding any of its role bits or to everyone matching its [`Access`] kind.
//!
//! Records are stored as JSON with PascalCase field names so they stay
//! readable by other services sharing the same collections.

mod auditor;
mod store;

use serde::{Deserialize, Serialize};

pub use self::auditor::{PermissionAuditor, Snapshot};
pub use self::store::PermissionStore;

/// A registered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Unique route identifier
    #[serde(rename = "ID")]
    pub id: String,
    /// Area segment
    #[serde(rename = "Area")]
    pub area: String,
    /// Controller segment
    #[serde(rename = "Controller")]
    pub controller: String,
    /// Action segment
    #[serde(rename = "Action")]
    pub action: String,
}

/// Who a permission admits, beyond plain role bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// Callers whose roles intersect the permission's role mask
    #[default]
    Roles,
    /// Any authenticated caller
    Authenticated,
    /// Every caller, signed in or not
    Anonymous,
}

/// A grant over one or more routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Unique permission identifier
    #[serde(rename = "ID")]
    pub id: String,
    /// Routes this permission covers. Unknown IDs are ignored.
    #[serde(rename = "RouteIDs", default)]
    pub route_ids: Vec<String>,
    /// Required role bitmask
    #[serde(rename = "Roles", default)]
    pub roles: i64,
    /// Access kind
    #[serde(rename = "Access", default)]
    pub access: Access,
}

impl Permission {
    /// Whether this permission admits `caller`.
    #[must_use]
    pub fn grants(&self, caller: &Caller) -> bool {
        match self.access {
            Access::Anonymous => true,
            Access::Authenticated => caller.is_authenticated(),
            Access::Roles => caller.roles() & self.roles != 0,
        }
    }
}

/// The party making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// No session identity
    Anonymous,
    /// Signed-in caller with a role bitmask
    Authenticated {
        /// Role bits from the identity provider
        roles: i64,
    },
}

impl Caller {
    /// Role bits held (`0` for anonymous callers)
    #[must_use]
    pub fn roles(&self) -> i64 {
        match self {
            Self::Anonymous => 0,
            Self::Authenticated { roles } => *roles,
        }
    }

    /// Whether the caller has signed in
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Decision applied when no permission data covers a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    /// Refuse the request
    #[default]
    Deny,
    /// Admit every caller
    Allow,
    /// Admit signed-in callers only
    Authenticated,
}

impl DefaultPolicy {
    /// Apply the policy to `caller`.
    #[must_use]
    pub fn admits(self, caller: &Caller) -> bool {
        match self {
            Self::Deny => false,
            Self::Allow => true,
            Self::Authenticated => caller.is_authenticated(),
        }
    }
}
