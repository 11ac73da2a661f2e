//! Key-value store capability
//!
//! The permission registry and URL table live in hash-shaped collections
//! (one store key per entity kind, one hash field per entity ID). Everything
//! above this module talks to [`KvStore`]; which backend sits underneath is
//! decided once, at construction, by [`connect`].
//!
//! | Backend | When |
//! |---------|------|
//! | [`RedisKvStore`] over a multiplexed connection | one address, cluster disabled |
//! | [`RedisKvStore`] over a cluster connection | several addresses or cluster enabled |
//! | [`MemoryKvStore`] | tests and embedding without Redis |

mod memory;
mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use self::memory::MemoryKvStore;
pub use self::redis_store::RedisKvStore;

use crate::config::StoreConfig;
use crate::{Error, Result};

/// Hash-field store with cursor-based key scanning.
///
/// Implementations must be `Send + Sync`: one handle is shared by every
/// request task.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read one field of a hash. `Ok(None)` when the key or field is absent.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Write one field of a hash, replacing any previous value.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Delete one field of a hash. Deleting an absent field is not an error.
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    /// Read every field of a hash.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// One page of keys matching a glob `pattern`, starting at `cursor`.
    ///
    /// Returns the next cursor; `0` means the iteration is complete.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
}

/// Connect to the backend described by `config`.
///
/// # Errors
///
/// Returns [`Error::Config`] when no address is configured and a store error
/// when the initial connection fails.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.addrs.as_slice() {
        [] => Err(Error::Config("store.addrs cannot be empty".to_string())),
        [addr] if !config.cluster_enabled => {
            info!(addr = %addr, db = config.db, "Connecting to single-node store");
            let store = RedisKvStore::single(addr, config).await?;
            Ok(Arc::new(store))
        }
        addrs => {
            info!(nodes = addrs.len(), "Connecting to clustered store");
            let store = RedisKvStore::cluster(addrs, config).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Fetch one page of keys matching `pattern`.
///
/// Returns the continuation cursor alongside the page.
pub async fn get_paged_keys(
    store: &dyn KvStore,
    cursor: u64,
    pattern: &str,
    page_size: usize,
) -> Result<(u64, Vec<String>)> {
    store.scan(cursor, pattern, page_size).await
}

/// Walk the whole keyspace matching `pattern` and return the keys sorted.
pub async fn get_all_keys(store: &dyn KvStore, pattern: &str, page_size: usize) -> Result<Vec<String>> {
    if page_size == 0 {
        return Err(Error::Config("page size must be at least 1".to_string()));
    }
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let (next, page) = get_paged_keys(store, cursor, pattern, page_size).await?;
        keys.extend(page);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

/// One element of a parsed glob pattern.
#[derive(Debug, Clone, PartialEq)]
enum GlobToken {
    /// `*`
    Any,
    /// `?`
    One,
    Literal(char),
    /// `[...]`, ranges inclusive; `[^...]` negates
    Class { negated: bool, ranges: Vec<(char, char)> },
}

fn parse_glob(pattern: &str) -> Vec<GlobToken> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => tokens.push(GlobToken::Any),
            '?' => tokens.push(GlobToken::One),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                tokens.push(GlobToken::Literal(chars[i]));
            }
            '[' => match parse_class(&chars[i + 1..]) {
                Some((token, consumed)) => {
                    tokens.push(token);
                    i += consumed;
                }
                // unterminated class matches a literal '['
                None => tokens.push(GlobToken::Literal('[')),
            },
            c => tokens.push(GlobToken::Literal(c)),
        }
        i += 1;
    }
    tokens
}

/// Parse the body of a class after `[`. Returns the token and the number of
/// characters consumed including the closing `]`.
fn parse_class(chars: &[char]) -> Option<(GlobToken, usize)> {
    let mut i = 0;
    let negated = chars.first() == Some(&'^');
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    loop {
        let mut c = *chars.get(i)?;
        if c == ']' {
            return Some((GlobToken::Class { negated, ranges }, i + 1));
        }
        if c == '\\' {
            i += 1;
            c = *chars.get(i)?;
        }
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|end| *end != ']') {
            let mut end = chars[i + 2];
            i += 2;
            if end == '\\' {
                i += 1;
                end = *chars.get(i)?;
            }
            ranges.push(if c <= end { (c, end) } else { (end, c) });
        } else {
            ranges.push((c, c));
        }
        i += 1;
    }
}

impl GlobToken {
    fn matches(&self, c: char) -> bool {
        match self {
            Self::Any | Self::One => true,
            Self::Literal(l) => *l == c,
            Self::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated
            }
        }
    }
}

/// Match `text` against a Redis-style glob: `*`, `?`, `[abc]`, `[a-z]`,
/// `[^a]` and `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p = parse_glob(pattern);
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] != GlobToken::Any && p[pi].matches(t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == GlobToken::Any {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|token| *token == GlobToken::Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_prefix_star() {
        assert!(glob_match("ecp:ROUTES:*", "ecp:ROUTES:shop"));
        assert!(!glob_match("ecp:ROUTES:*", "ecp:PERMISSIONS"));
    }

    #[test]
    fn glob_matches_question_mark_and_literals() {
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("abc", "abcd"));
    }

    #[test]
    fn glob_matches_character_classes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-b]llo", "hbllo"));
        assert!(!glob_match("h[a-b]llo", "hcllo"));
        assert!(glob_match("ecp:ROUTES:[sa]*", "ecp:ROUTES:shop"));
        assert!(!glob_match("ecp:ROUTES:[sa]*", "ecp:ROUTES:billing"));
    }

    #[test]
    fn glob_escapes_and_unterminated_classes_are_literal() {
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("a\\[b", "a[b"));
        assert!(glob_match("[\\]]x", "]x"));
        assert!(glob_match("a[b", "a[b"));
        assert!(glob_match("[z-a]", "m"));
        assert!(glob_match("[a-]", "-"));
    }

    #[tokio::test]
    async fn get_all_keys_rejects_zero_page_size() {
        let store = MemoryKvStore::new();
        store.hset("ecp:ROUTES:shop", "f", "v").await.unwrap();

        let result = get_all_keys(&store, "*", 0).await;

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn connect_rejects_empty_addrs() {
        // GIVEN: a store config without addresses
        let config = StoreConfig {
            addrs: Vec::new(),
            ..StoreConfig::default()
        };

        // WHEN: connecting
        let result = connect(&config).await;

        // THEN: configuration error, no network attempted
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn get_all_keys_walks_every_page_sorted() {
        // GIVEN: more keys than a single page holds
        let store = MemoryKvStore::new();
        for name in ["c", "a", "b", "d", "e"] {
            store.hset(&format!("ecp:ROUTES:{name}"), "f", "v").await.unwrap();
        }
        store.hset("other", "f", "v").await.unwrap();

        // WHEN: listing with a page size of two
        let keys = get_all_keys(&store, "ecp:ROUTES:*", 2).await.unwrap();

        // THEN: every matching key, sorted, nothing else
        assert_eq!(
            keys,
            vec![
                "ecp:ROUTES:a",
                "ecp:ROUTES:b",
                "ecp:ROUTES:c",
                "ecp:ROUTES:d",
                "ecp:ROUTES:e",
            ]
        );
    }
}
