//! OpenID Connect browser sessions
//!
//! Authorization-code flow against an OIDC provider, with tokens kept in
//! sealed cookies and identity kept in a server-side session. The
//! [`OidcClient`] transitions decide, per request, whether the caller may
//! reach a route, must sign in first, or is denied.

mod audit;
mod client;
mod context;
mod options;
mod provider;

pub use self::audit::AuthEvent;
pub use self::client::{AuthError, CallbackQuery, Decision, OidcClient, Principal};
pub use self::context::RequestContext;
pub use self::options::{
    ClientOptions, ConfigError, CookieNames, DEFAULT_CALLBACK_PATH, DEFAULT_PENDING_SESSION_TTL,
    SessionFields, ValidatedOptions,
};
pub use self::provider::{Claims, IdentityProvider, OidcProvider, ProviderMetadata, TokenSet};
