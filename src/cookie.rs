//! Secure cookie custody
//!
//! Token values never leave the server in the clear. [`SecureCookie`]
//! implementations turn a plaintext value into an opaque, authenticated
//! cookie value and back; [`CookieJar`] holds the cookies a request arrived
//! with and the `Set-Cookie` headers its response will carry.
//!
//! # Format
//!
//! [`AesGcmSecureCookie`] emits `base64url(nonce || ciphertext || tag)` with
//! a fresh 96-bit nonce per value. The cookie name is bound as associated
//! data, so a value lifted from one cookie does not decrypt under another.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngExt;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Cookie custody failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CookieError {
    /// The value failed authentication or is malformed
    #[error("cookie '{0}' failed integrity check")]
    Tampered(String),

    /// The value could not be sealed
    #[error("cookie '{0}' could not be encrypted")]
    Encrypt(String),

    /// The configured key is unusable
    #[error("invalid cookie key: {0}")]
    InvalidKey(String),
}

/// Seals and opens cookie values.
pub trait SecureCookie: Send + Sync + 'static {
    /// Produce the wire value for cookie `name` carrying `value`.
    fn encode(&self, name: &str, value: &str) -> Result<String, CookieError>;

    /// Recover the plaintext of cookie `name` from its wire value.
    ///
    /// # Errors
    ///
    /// [`CookieError::Tampered`] if the value was modified, truncated, or
    /// issued for a different cookie name.
    fn decode(&self, name: &str, raw: &str) -> Result<String, CookieError>;
}

/// AES-256-GCM sealed cookies
pub struct AesGcmSecureCookie {
    cipher: Aes256Gcm,
}

impl AesGcmSecureCookie {
    /// Build from raw key bytes.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Build from a base64 (standard or url-safe) encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// [`CookieError::InvalidKey`] if the key is not valid base64 or not
    /// exactly 32 bytes long.
    pub fn from_base64(encoded: &str) -> Result<Self, CookieError> {
        let encoded = encoded.trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|e| CookieError::InvalidKey(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CookieError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self::new(&key))
    }

    /// Generate a fresh key, base64url encoded.
    #[must_use]
    pub fn generate_key() -> String {
        let key: [u8; 32] = rand::rng().random();
        URL_SAFE_NO_PAD.encode(key)
    }
}

impl fmt::Debug for AesGcmSecureCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmSecureCookie").finish_non_exhaustive()
    }
}

impl SecureCookie for AesGcmSecureCookie {
    fn encode(&self, name: &str, value: &str) -> Result<String, CookieError> {
        let nonce: [u8; NONCE_LEN] = rand::rng().random();
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Encrypt(name.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn decode(&self, name: &str, raw: &str) -> Result<String, CookieError> {
        let tampered = || CookieError::Tampered(name.to_string());

        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| tampered())?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(tampered());
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| tampered())?;

        String::from_utf8(plaintext).map_err(|_| tampered())
    }
}

/// `SameSite` attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SameSite {
    /// Sent on top-level navigations (required for the provider redirect back)
    #[default]
    Lax,
    /// Same-site requests only
    Strict,
    /// Always sent; requires `Secure`
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        })
    }
}

/// Attributes applied to an outgoing cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// `Path` attribute
    pub path: String,
    /// `HttpOnly` attribute
    pub http_only: bool,
    /// `Secure` attribute
    pub secure: bool,
    /// `SameSite` attribute
    pub same_site: SameSite,
    /// `Max-Age`; `None` makes a browser-session cookie
    pub max_age: Option<Duration>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
            max_age: None,
        }
    }
}

impl CookieOptions {
    /// Same attributes with a different lifetime
    #[must_use]
    pub fn with_max_age(&self, max_age: Option<Duration>) -> Self {
        Self {
            max_age,
            ..self.clone()
        }
    }
}

/// One `Set-Cookie` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    /// Cookie name
    pub name: String,
    /// Wire value (empty for removals)
    pub value: String,
    /// Attributes
    pub options: CookieOptions,
    removal: bool,
}

impl SetCookie {
    /// Whether this header deletes the cookie
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.removal
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.options.path)?;
        if self.removal {
            f.write_str("; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT")?;
        } else if let Some(max_age) = self.options.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        if self.options.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.options.secure {
            f.write_str("; Secure")?;
        }
        write!(f, "; SameSite={}", self.options.same_site)
    }
}

/// Parse a `Cookie` request header into name/value pairs.
///
/// The first occurrence of a name wins, matching browser ordering (most
/// specific path first).
#[must_use]
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
    cookies
}

/// Request-scoped cookie state
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    incoming: HashMap<String, String>,
    outgoing: Vec<SetCookie>,
}

impl CookieJar {
    /// Jar holding the cookies a request arrived with
    #[must_use]
    pub fn from_request_cookies(incoming: HashMap<String, String>) -> Self {
        Self {
            incoming,
            outgoing: Vec::new(),
        }
    }

    /// Jar built from a raw `Cookie` header
    #[must_use]
    pub fn from_header(header: Option<&str>) -> Self {
        Self::from_request_cookies(header.map(parse_cookie_header).unwrap_or_default())
    }

    /// Seal `value` and queue it as cookie `name`.
    pub fn set(
        &mut self,
        codec: &dyn SecureCookie,
        name: &str,
        value: &str,
        options: &CookieOptions,
    ) -> Result<(), CookieError> {
        let sealed = codec.encode(name, value)?;
        self.set_plain(name, &sealed, options);
        Ok(())
    }

    /// Queue cookie `name` with a value that needs no sealing.
    pub fn set_plain(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.outgoing.retain(|c| c.name != name);
        self.outgoing.push(SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            options: options.clone(),
            removal: false,
        });
    }

    /// Plaintext of cookie `name`, honouring anything queued in this request.
    ///
    /// Absent cookies are `Ok(None)`; tampered values are an error.
    pub fn get(&self, codec: &dyn SecureCookie, name: &str) -> Result<Option<String>, CookieError> {
        match self.get_plain(name) {
            Some(raw) => codec.decode(name, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Raw wire value of cookie `name`.
    #[must_use]
    pub fn get_plain(&self, name: &str) -> Option<&str> {
        if let Some(queued) = self.outgoing.iter().rev().find(|c| c.name == name) {
            return (!queued.removal).then_some(queued.value.as_str());
        }
        self.incoming
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Queue an expiring `Set-Cookie` for `name`.
    pub fn remove(&mut self, name: &str, options: &CookieOptions) {
        self.outgoing.retain(|c| c.name != name);
        self.outgoing.push(SetCookie {
            name: name.to_string(),
            value: String::new(),
            options: options.with_max_age(None),
            removal: true,
        });
    }

    /// Headers to attach to the response
    #[must_use]
    pub fn outgoing(&self) -> &[SetCookie] {
        &self.outgoing
    }

    /// Take the queued headers, leaving the jar's outgoing list empty
    pub fn drain_outgoing(&mut self) -> Vec<SetCookie> {
        std::mem::take(&mut self.outgoing)
    }
}
