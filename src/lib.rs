//! route-guard
//!
//! Route-level role authorization and OpenID Connect browser sessions for
//! axum services.
//!
//! # Features
//!
//! - **Permission store**: routes and role-bitmask permissions in Redis
//!   hashes (single node or cluster), with an in-memory backend for tests
//! - **Permission auditor**: decisions over a cached, periodically refreshed
//!   snapshot with configurable defaults for unknown and unprotected routes
//! - **OIDC sessions**: authorization-code flow, sealed token cookies,
//!   server-side sessions, transparent refresh
//! - **axum integration**: per-route middleware, callback and sign-out
//!   endpoints, graceful shutdown
//!
//! # Example
//!
//! ```no_run
//! use route_guard::{config::Config, http::{Action, Server}};
//!
//! async fn list_orders() -> &'static str {
//!     "orders"
//! }
//!
//! # async fn run() -> route_guard::Result<()> {
//! let config = Config::load(None)?;
//! let actions = vec![Action::new("GET/orders", "Shop.Orders.List", list_orders)?];
//! Server::new(config, actions).await?.run().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod cookie;
pub mod error;
pub mod http;
pub mod kv;
pub mod oidc;
pub mod permission;
pub mod route;
pub mod session;
pub mod url_provider;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to initialise tracing: {e}")))
}
