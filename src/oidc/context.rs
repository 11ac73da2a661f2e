//! Request-scoped state threaded through the session transitions.

use crate::cookie::{CookieJar, SetCookie};
use crate::session::Session;

/// One request's cookies, session and outgoing `Set-Cookie` headers.
///
/// The HTTP adapter builds a context from the incoming request, hands it by
/// `&mut` to the [`OidcClient`](super::OidcClient) transitions, and copies
/// the queued cookies onto the response.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub(crate) cookies: CookieJar,
    pub(crate) session: Option<Session>,
    pub(crate) session_loaded: bool,
    request_uri: Option<String>,
}

impl RequestContext {
    /// Context for a request carrying `cookie_header`
    #[must_use]
    pub fn new(cookie_header: Option<&str>) -> Self {
        Self::from_jar(CookieJar::from_header(cookie_header))
    }

    /// Context over an existing jar
    #[must_use]
    pub fn from_jar(cookies: CookieJar) -> Self {
        Self {
            cookies,
            session: None,
            session_loaded: false,
            request_uri: None,
        }
    }

    /// Remember the original request target for the post-login redirect.
    ///
    /// Only origin-relative targets (`/path?query`) are kept. Browsers read
    /// `/\host` as `//host`, so backslashes and control characters are
    /// rejected anywhere in the target.
    #[must_use]
    pub fn with_request_uri(mut self, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        if is_local_target(&uri) {
            self.request_uri = Some(uri);
        }
        self
    }

    /// Original request target, if recorded
    #[must_use]
    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    /// Cookie jar
    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Session as last loaded or written by a transition
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// `Set-Cookie` headers queued by the transitions
    #[must_use]
    pub fn set_cookies(&self) -> &[SetCookie] {
        self.cookies.outgoing()
    }

    /// Take the queued `Set-Cookie` headers
    pub fn take_set_cookies(&mut self) -> Vec<SetCookie> {
        self.cookies.drain_outgoing()
    }
}

fn is_local_target(uri: &str) -> bool {
    uri.starts_with('/')
        && !uri.starts_with("//")
        && !uri.chars().any(|c| c == '\\' || c.is_ascii_control())
}
