//! Authentication middleware

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{found, request_context, with_cookies};
use crate::oidc::{Decision, OidcClient};
use crate::route::RouteIdentity;

/// Middleware state: the client plus the route the wrapped handler serves.
#[derive(Clone)]
pub struct RouteGuard {
    client: Arc<OidcClient>,
    route: Arc<RouteIdentity>,
}

impl RouteGuard {
    /// Guard `route` with `client`
    #[must_use]
    pub fn new(client: Arc<OidcClient>, route: RouteIdentity) -> Self {
        Self {
            client,
            route: Arc::new(route),
        }
    }

    /// Guarded route
    #[must_use]
    pub fn route(&self) -> &RouteIdentity {
        &self.route
    }
}

/// Run the authentication transition before the handler.
///
/// Admitted requests reach the handler with the [`Principal`](crate::oidc::Principal)
/// (if any) in the request extensions. Everything else is answered here.
pub async fn authenticate(
    State(guard): State<RouteGuard>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let target = request.uri().path_and_query().map(|pq| pq.as_str().to_string());
    let mut ctx = request_context(request.headers(), target.as_deref());

    match guard.client.handle_authentication(&mut ctx, &guard.route).await {
        Ok(Decision::Proceed(principal)) => {
            debug!(route = %guard.route, authenticated = principal.is_some(), "Request admitted");
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            let response = next.run(request).await;
            with_cookies(response, &mut ctx)
        }
        Ok(Decision::Redirect(location) | Decision::Denied(location)) => {
            with_cookies(found(&location), &mut ctx)
        }
        Err(e) => with_cookies(e.into_response(), &mut ctx),
    }
}
