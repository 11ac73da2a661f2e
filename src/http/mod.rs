//! axum integration
//!
//! | Piece | Role |
//! |-------|------|
//! | [`authenticate`] | Per-route middleware running the authentication transition |
//! | [`Action`] | A handler registered under `"METHOD/path"` and `"Area.Controller.Action"` |
//! | [`build_router`] | Actions plus the sign-in callback and sign-out endpoints |
//! | [`Server`] | Wires store, auditor, sessions and provider from configuration and serves |

mod middleware;
mod router;
mod server;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

pub use self::middleware::{RouteGuard, authenticate};
pub use self::router::{Action, build_router};
pub use self::server::Server;

use crate::oidc::{AuthError, RequestContext};

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Authentication failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Authentication rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// Build a request context from the incoming headers and request target.
pub(crate) fn request_context(headers: &HeaderMap, target: Option<&str>) -> RequestContext {
    let cookie_header = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    let ctx = RequestContext::new((!cookie_header.is_empty()).then_some(cookie_header.as_str()));
    match target {
        Some(target) => ctx.with_request_uri(target),
        None => ctx,
    }
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            error!("Redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Append the context's queued `Set-Cookie` headers to `response`.
pub(crate) fn with_cookies(mut response: Response, ctx: &mut RequestContext) -> Response {
    for cookie in ctx.take_set_cookies() {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(_) => warn!(cookie = %cookie.name, "Dropping cookie with invalid header value"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_statuses() {
        assert_eq!(
            AuthError::StateMismatch.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::CookieTampered(".ACT".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::Timeout("slow".to_string()).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AuthError::Store("down".to_string()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn found_sets_location() {
        let response = found("/orders");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/orders");
    }

    #[test]
    fn multiple_cookie_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        let ctx = request_context(&headers, Some("/x"));
        assert_eq!(ctx.cookies().get_plain("a"), Some("1"));
        assert_eq!(ctx.cookies().get_plain("b"), Some("2"));
        assert_eq!(ctx.request_uri(), Some("/x"));
    }
}
