//! End-to-end authentication tests
//!
//! Drives the axum router through the full browser flow:
//! - Anonymous challenge and provider redirect
//! - Sign-in callback, session rotation and token cookies
//! - Authorized, denied and anonymous routes
//! - Sign-out

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Extension, Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
};
use pretty_assertions::assert_eq;
use tower::ServiceExt;
use url::Url;

use route_guard::config::AuditorConfig;
use route_guard::cookie::AesGcmSecureCookie;
use route_guard::http::{Action, build_router};
use route_guard::kv::MemoryKvStore;
use route_guard::oidc::{
    ClientOptions, Claims, IdentityProvider, OidcClient, Principal, TokenSet,
};
use route_guard::permission::{Access, Permission, PermissionAuditor, PermissionStore, Route};
use route_guard::session::InMemorySessionStore;

// ── Fixtures ────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeProvider {
    exchanges: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorization_url(&self, state: &str) -> route_guard::Result<Url> {
        let mut url = Url::parse("https://login.example.com/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("client_id", "web")
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> route_guard::Result<TokenSet> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(TokenSet {
            refresh_token: Some(format!("refresh-{code}")),
            expires_in: Some(3600),
            ..TokenSet::bearer(format!("access-{code}"))
        })
    }

    async fn refresh(&self, refresh_token: &str) -> route_guard::Result<TokenSet> {
        Ok(TokenSet::bearer(format!("renewed-{refresh_token}")))
    }

    async fn user_info(&self, _access_token: &str) -> route_guard::Result<Claims> {
        Ok(Claims {
            sub: "u1".to_string(),
            name: Some("Alice".to_string()),
            email: Some("alice@example.com".to_string()),
            role: 0b0010,
            level: 3,
            status: 1,
        })
    }
}

fn route(id: &str, identity: &str) -> Route {
    let mut parts = identity.split('.');
    Route {
        id: id.to_string(),
        area: parts.next().unwrap().to_string(),
        controller: parts.next().unwrap().to_string(),
        action: parts.next().unwrap().to_string(),
    }
}

fn permission(id: &str, route_id: &str, roles: i64, access: Access) -> Permission {
    Permission {
        id: id.to_string(),
        route_ids: vec![route_id.to_string()],
        roles,
        access,
    }
}

async fn list_orders(Extension(principal): Extension<Principal>) -> String {
    format!("orders for {}", principal.id)
}

async fn home() -> &'static str {
    "home"
}

async fn admin() -> &'static str {
    "admin"
}

struct App {
    router: Router,
    provider: Arc<FakeProvider>,
    sessions: Arc<InMemorySessionStore>,
}

async fn app() -> App {
    let store = PermissionStore::new(
        Arc::new(MemoryKvStore::new()),
        "ecp:ROUTES:shop",
        "ecp:PERMISSIONS",
    );
    store.create_route(&route("r1", "Shop.Orders.List")).await.unwrap();
    store.create_route(&route("r2", "Shop.Home.Index")).await.unwrap();
    store.create_route(&route("r3", "Admin.Users.List")).await.unwrap();
    store
        .create_permission(&permission("p1", "r1", 0b0010, Access::Roles))
        .await
        .unwrap();
    store
        .create_permission(&permission("p2", "r2", 0, Access::Anonymous))
        .await
        .unwrap();
    store
        .create_permission(&permission("p3", "r3", 0b0100, Access::Roles))
        .await
        .unwrap();

    let provider = Arc::new(FakeProvider::default());
    let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(3600)));
    let options = ClientOptions {
        client_id: "web".to_string(),
        client_secret: "secret".to_string(),
        provider_url: "https://login.example.com".to_string(),
        sign_in_callback_url: "https://shop.example.com/signin-oidc".to_string(),
        scopes: vec!["profile".to_string(), "email".to_string()],
        access_denied_url: "/denied".to_string(),
        secure_cookie: Some(Arc::new(AesGcmSecureCookie::new(&[7u8; 32]))),
        permission_auditor: Some(Arc::new(PermissionAuditor::new(
            store,
            &AuditorConfig::default(),
        ))),
        session_store: Some(sessions.clone()),
        ..ClientOptions::default()
    };
    let client = Arc::new(OidcClient::with_provider(options, provider.clone()).unwrap());

    let actions = vec![
        Action::new("GET/orders", "Shop.Orders.List", list_orders).unwrap(),
        Action::new("GET/", "Shop.Home.Index", home).unwrap(),
        Action::new("GET/admin/users", "Admin.Users.List", admin).unwrap(),
    ];
    App {
        router: build_router(client, actions).unwrap(),
        provider,
        sessions,
    }
}

/// Browser-side cookie jar fed from `Set-Cookie` headers.
#[derive(Default)]
struct Browser {
    cookies: HashMap<String, String>,
}

impl Browser {
    fn absorb(&mut self, response: &Response<Body>) {
        for value in response.headers().get_all(header::SET_COOKIE) {
            let value = value.to_str().unwrap();
            let pair = value.split(';').next().unwrap();
            let (name, cookie) = pair.split_once('=').unwrap();
            if value.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), cookie.to_string());
            }
        }
    }

    fn request(&self, uri: &str) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if !self.cookies.is_empty() {
            let header = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, header);
        }
        builder.body(Body::empty()).unwrap()
    }
}

fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

fn state_of(authorize_url: &str) -> String {
    Url::parse(authorize_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

fn callback_uri(code: &str, state: &str) -> String {
    let query = serde_urlencoded::to_string([("code", code), ("state", state)]).unwrap();
    format!("/signin-oidc?{query}")
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Run the challenge and callback; returns the signed-in browser.
async fn sign_in(app: &App) -> Browser {
    let mut browser = Browser::default();

    let challenge = app
        .router
        .clone()
        .oneshot(browser.request("/orders"))
        .await
        .unwrap();
    browser.absorb(&challenge);
    let state = state_of(&location(&challenge));

    let callback = app
        .router
        .clone()
        .oneshot(browser.request(&callback_uri("c1", &state)))
        .await
        .unwrap();
    assert_eq!(callback.status(), StatusCode::FOUND);
    browser.absorb(&callback);
    browser
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn anonymous_request_is_challenged() {
    // GIVEN: a protected route and no cookies
    let app = app().await;
    let browser = Browser::default();

    // WHEN: requesting it
    let response = app.router.clone().oneshot(browser.request("/orders")).await.unwrap();

    // THEN: redirect to the provider with a state, and a session cookie
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with("https://login.example.com/authorize"));
    assert!(!state_of(&target).is_empty());

    let mut browser = Browser::default();
    browser.absorb(&response);
    assert!(browser.cookies.contains_key(".USS"));
    assert_eq!(app.sessions.len(), 1);
}

#[tokio::test]
async fn full_sign_in_reaches_the_handler() {
    // GIVEN: a signed-in browser
    let app = app().await;
    let browser = sign_in(&app).await;

    // THEN: tokens and session are held in cookies
    assert!(browser.cookies.contains_key(".ACT"));
    assert!(browser.cookies.contains_key(".RFT"));
    assert!(browser.cookies.contains_key(".USS"));
    assert_eq!(app.provider.exchanges.load(Ordering::SeqCst), 1);

    // WHEN: the original route is requested again
    let response = app.router.clone().oneshot(browser.request("/orders")).await.unwrap();

    // THEN: the handler sees the principal
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "orders for u1");
}

#[tokio::test]
async fn callback_redirects_to_the_original_target() {
    let app = app().await;
    let mut browser = Browser::default();

    let challenge = app
        .router
        .clone()
        .oneshot(browser.request("/orders?page=2"))
        .await
        .unwrap();
    browser.absorb(&challenge);
    let state = state_of(&location(&challenge));

    let callback = app
        .router
        .clone()
        .oneshot(browser.request(&callback_uri("c1", &state)))
        .await
        .unwrap();

    assert_eq!(callback.status(), StatusCode::FOUND);
    assert_eq!(location(&callback), "/orders?page=2");
}

#[tokio::test]
async fn session_id_changes_on_sign_in() {
    // GIVEN: the pre-login session cookie
    let app = app().await;
    let mut browser = Browser::default();
    let challenge = app.router.clone().oneshot(browser.request("/orders")).await.unwrap();
    browser.absorb(&challenge);
    let before = browser.cookies[".USS"].clone();

    // WHEN: the callback completes
    let state = state_of(&location(&challenge));
    let callback = app
        .router
        .clone()
        .oneshot(browser.request(&callback_uri("c1", &state)))
        .await
        .unwrap();
    browser.absorb(&callback);

    // THEN: a new session replaced the old one
    assert_ne!(browser.cookies[".USS"], before);
    assert_eq!(app.sessions.len(), 1);
}

#[tokio::test]
async fn mismatched_state_is_rejected_without_exchange() {
    // GIVEN: a challenge in progress
    let app = app().await;
    let mut browser = Browser::default();
    let challenge = app.router.clone().oneshot(browser.request("/orders")).await.unwrap();
    browser.absorb(&challenge);

    // WHEN: the callback carries a different state
    let response = app
        .router
        .clone()
        .oneshot(browser.request(&callback_uri("c1", "forged")))
        .await
        .unwrap();

    // THEN: 400, no code exchange, no cookies issued
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_text(response).await, "state did not match");
    assert_eq!(app.provider.exchanges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn callback_without_session_is_rejected() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(Browser::default().request(&callback_uri("c1", "anything")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.provider.exchanges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn signed_in_caller_without_role_is_denied() {
    // GIVEN: a caller holding 0b0010
    let app = app().await;
    let browser = sign_in(&app).await;

    // WHEN: requesting a route requiring 0b0100
    let response = app
        .router
        .clone()
        .oneshot(browser.request("/admin/users"))
        .await
        .unwrap();

    // THEN: redirect to the access-denied URL, not the provider
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/denied");
}

#[tokio::test]
async fn anonymous_route_needs_no_session() {
    let app = app().await;

    let response = app
        .router
        .clone()
        .oneshot(Browser::default().request("/"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_text(response).await, "home");
    assert!(app.sessions.is_empty());
}

#[tokio::test]
async fn sign_out_clears_cookies_and_session() {
    // GIVEN: a signed-in browser
    let app = app().await;
    let mut browser = sign_in(&app).await;
    assert_eq!(app.sessions.len(), 1);

    // WHEN: signing out
    let response = app.router.clone().oneshot(browser.request("/signout")).await.unwrap();

    // THEN: redirect home, all three cookies removed, session destroyed
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");
    let removed: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .filter(|v| v.contains("Max-Age=0"))
        .collect();
    for name in [".ACT", ".RFT", ".USS"] {
        assert!(
            removed.iter().any(|v| v.starts_with(&format!("{name}="))),
            "{name} not removed"
        );
    }
    browser.absorb(&response);
    assert!(browser.cookies.is_empty());
    assert!(app.sessions.is_empty());

    // AND: the protected route challenges again
    let response = app.router.clone().oneshot(browser.request("/orders")).await.unwrap();
    assert!(location(&response).starts_with("https://login.example.com/authorize"));
}

#[tokio::test]
async fn tampered_session_cookie_is_rejected() {
    let app = app().await;
    let mut browser = sign_in(&app).await;
    browser
        .cookies
        .insert(".USS".to_string(), "bm90LWEtc2VhbGVkLXZhbHVlLWF0LWFsbC0xMjM0NTY".to_string());

    let response = app.router.clone().oneshot(browser.request("/orders")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    browser.absorb(&response);
    assert!(browser.cookies.is_empty());
}

#[tokio::test]
async fn unregistered_method_is_not_routed() {
    let app = app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/orders")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn duplicate_actions_fail_router_construction() {
    let app = app().await;

    let options = ClientOptions {
        client_id: "web".to_string(),
        client_secret: "secret".to_string(),
        provider_url: "https://login.example.com".to_string(),
        sign_in_callback_url: "https://shop.example.com/signin-oidc".to_string(),
        scopes: vec!["profile".to_string()],
        secure_cookie: Some(Arc::new(AesGcmSecureCookie::new(&[7u8; 32]))),
        permission_auditor: Some(Arc::new(PermissionAuditor::new(
            PermissionStore::new(Arc::new(MemoryKvStore::new()), "r", "p"),
            &AuditorConfig::default(),
        ))),
        session_store: Some(app.sessions.clone()),
        ..ClientOptions::default()
    };
    let client = Arc::new(OidcClient::with_provider(options, app.provider.clone()).unwrap());

    let duplicate = vec![
        Action::new("GET/orders", "Shop.Orders.List", home).unwrap(),
        Action::new("GET/orders", "Shop.Orders.Other", home).unwrap(),
    ];
    assert!(build_router(client.clone(), duplicate).is_err());

    let collision = vec![Action::new("GET/signout", "Shop.Auth.Out", home).unwrap()];
    assert!(build_router(client, collision).is_err());
}
