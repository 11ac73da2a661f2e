//! Server wiring and lifecycle

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use super::router::{Action, build_router};
use crate::config::Config;
use crate::cookie::AesGcmSecureCookie;
use crate::kv;
use crate::oidc::{ClientOptions, OidcClient};
use crate::permission::{PermissionAuditor, PermissionStore};
use crate::session::{InMemorySessionStore, SessionStore, spawn_reaper};
use crate::{Error, Result};

/// Serves registered actions behind OIDC authentication.
pub struct Server {
    config: Config,
    router: Router,
    sessions: Arc<dyn SessionStore>,
    auditor: Arc<PermissionAuditor>,
}

impl Server {
    /// Connect the store, discover the provider and build the router.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable, the cookie key is missing or
    /// malformed, client options are incomplete, discovery fails, or an
    /// action cannot be registered.
    pub async fn new(config: Config, actions: Vec<Action>) -> Result<Self> {
        let secure_cookie = secure_cookie(&config)?;

        let store = kv::connect(&config.store).await?;
        let permissions = PermissionStore::from_config(store, &config);
        let auditor = Arc::new(PermissionAuditor::new(permissions, &config.auditor));

        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(config.sessions.ttl));

        let options = ClientOptions {
            secure_cookie: Some(Arc::new(secure_cookie)),
            permission_auditor: Some(auditor),
            session_store: Some(sessions),
            ..ClientOptions::from_config(&config)
        };
        let client = Arc::new(OidcClient::discover(options).await?);
        Self::with_client(config, client, actions)
    }

    /// Serve `actions` through an already-built client. Sessions and the
    /// auditor are taken from the client's options.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when an action cannot be registered.
    pub fn with_client(config: Config, client: Arc<OidcClient>, actions: Vec<Action>) -> Result<Self> {
        let sessions = Arc::clone(&client.options().session_store);
        let auditor = Arc::clone(&client.options().permission_auditor);
        let router = build_router(client, actions)?;

        Ok(Self {
            config,
            router,
            sessions,
            auditor,
        })
    }

    /// Bind and serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid server address: {e}")))?;
        let listener = TcpListener::bind(addr).await?;
        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight
    /// requests and stop the session reaper.
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, _) = broadcast::channel(1);
        let reaper = spawn_reaper(
            Arc::clone(&self.sessions),
            self.config.sessions.reap_interval,
            shutdown_tx.subscribe(),
        );

        let app = self
            .router
            .layer(TimeoutLayer::new(self.config.server.request_timeout));

        info!(
            version = env!("CARGO_PKG_VERSION"),
            addr = %listener.local_addr()?,
            project = %self.config.project,
            "Listening"
        );
        info!(
            refresh_interval = ?self.auditor.refresh_interval(),
            session_ttl = ?self.config.sessions.ttl,
            pending_session_ttl = ?self.config.sessions.pending_ttl,
            "Authorization ready"
        );

        let notify = shutdown_tx.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = notify.send(());
            })
            .await;
        // the reaper must stop even when serving failed
        let _ = shutdown_tx.send(());

        if let Err(e) = reaper.await {
            warn!(error = %e, "Session reaper did not stop cleanly");
        }
        served?;
        info!("Server stopped");
        Ok(())
    }
}

/// Cookie codec keyed from `cookies.key`.
fn secure_cookie(config: &Config) -> Result<AesGcmSecureCookie> {
    let key = config.cookies.resolve_key();
    if key.is_empty() {
        return Err(Error::Config(
            "cookies.key is not set (generate one with `route-guard keygen`)".to_string(),
        ));
    }
    AesGcmSecureCookie::from_base64(&key).map_err(|e| Error::Config(e.to_string()))
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
