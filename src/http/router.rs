//! Action registration and router construction

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    handler::Handler,
    http::{HeaderMap, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter, get, on},
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info};

use super::middleware::{RouteGuard, authenticate};
use super::{found, request_context, with_cookies};
use crate::oidc::{CallbackQuery, OidcClient};
use crate::route::RouteIdentity;
use crate::{Error, Result};

/// A handler bound to a method, a path and a route identity.
pub struct Action {
    method: Method,
    path: String,
    route: RouteIdentity,
    handler: MethodRouter,
}

impl Action {
    /// Register `handler` under `key` (`"GET/orders"`) and `handler_name`
    /// (`"Shop.Orders.List"`).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a malformed key, an unsupported method (only
    /// GET, POST, PUT and DELETE are served), or a handler name that is not
    /// a three-segment route identity.
    pub fn new<H, T>(key: &str, handler_name: &str, handler: H) -> Result<Self>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let (method, path) = parse_action_key(key)?;
        let route = RouteIdentity::parse(handler_name).map_err(|e| Error::Config(e.to_string()))?;
        let filter = method_filter(&method)?;
        Ok(Self {
            method,
            path,
            route,
            handler: on(filter, handler),
        })
    }

    /// HTTP method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Route identity checked by the auditor
    #[must_use]
    pub fn route(&self) -> &RouteIdentity {
        &self.route
    }
}

/// Split `"METHOD/path"` at the first `/`.
fn parse_action_key(key: &str) -> Result<(Method, String)> {
    let index = key
        .find('/')
        .ok_or_else(|| Error::Config(format!("action key '{key}' must look like METHOD/path")))?;
    let (method, path) = key.split_at(index);
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::Config(format!("action key '{key}' has an invalid method")))?;
    Ok((method, path.to_string()))
}

fn method_filter(method: &Method) -> Result<MethodFilter> {
    match *method {
        Method::GET => Ok(MethodFilter::GET),
        Method::POST => Ok(MethodFilter::POST),
        Method::PUT => Ok(MethodFilter::PUT),
        Method::DELETE => Ok(MethodFilter::DELETE),
        ref other => Err(Error::Config(format!("method {other} is not supported"))),
    }
}

/// Router serving `actions` behind the authentication middleware, plus the
/// sign-in callback and sign-out endpoints.
///
/// # Errors
///
/// [`Error::Config`] when two actions claim the same method and path, or an
/// action collides with the callback or sign-out path.
pub fn build_router(client: Arc<OidcClient>, actions: Vec<Action>) -> Result<Router> {
    let callback_path = client.callback_path().to_string();
    let sign_out_path = client.sign_out_path().to_string();

    let mut router = Router::new()
        .route(&callback_path, get(sign_in_callback))
        .route(&sign_out_path, get(sign_out).post(sign_out))
        .with_state(Arc::clone(&client));

    let mut seen: HashSet<(Method, String)> = HashSet::new();
    for action in actions {
        if action.path == callback_path || action.path == sign_out_path {
            return Err(Error::Config(format!(
                "action {} {} collides with a built-in endpoint",
                action.method, action.path
            )));
        }
        if !seen.insert((action.method.clone(), action.path.clone())) {
            return Err(Error::Config(format!(
                "action {} {} is registered twice",
                action.method, action.path
            )));
        }

        debug!(method = %action.method, path = %action.path, route = %action.route, "Registering action");
        let guard = RouteGuard::new(Arc::clone(&client), action.route);
        let handler = action
            .handler
            .route_layer(middleware::from_fn_with_state(guard, authenticate));
        router = router.route(&action.path, handler);
    }

    info!(
        actions = seen.len(),
        callback = %callback_path,
        sign_out = %sign_out_path,
        "Router built"
    );

    Ok(router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http()))
}

/// Sign-in callback: complete the code exchange and redirect.
async fn sign_in_callback(
    State(client): State<Arc<OidcClient>>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let mut ctx = request_context(&headers, None);
    match client.handle_sign_in_callback(&mut ctx, &query).await {
        Ok(location) => with_cookies(found(&location), &mut ctx),
        Err(e) => with_cookies(e.into_response(), &mut ctx),
    }
}

/// Sign-out: end the session and redirect home.
async fn sign_out(State(client): State<Arc<OidcClient>>, headers: HeaderMap) -> Response {
    let mut ctx = request_context(&headers, None);
    match client.handle_sign_out(&mut ctx).await {
        Ok(location) => with_cookies(found(&location), &mut ctx),
        Err(e) => with_cookies(e.into_response(), &mut ctx),
    }
}
