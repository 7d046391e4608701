//! Coordination-store layout for transactions, locks and id blocks.
//!
//! ```text
//! <root>/<app>/txids/tx0000000042                 created_at
//! <root>/<app>/txids/tx0000000042/lockpath        <lock path>
//! <root>/<app>/txids/tx0000000042/ukey0000000000  <quoted key>/<txid>
//! <root>/<app>/txids/blacklist/42                 blacklisted_at
//! <root>/<app>/txids/validlist/<quoted key>       <txid>
//! <root>/<app>/locks/<quoted root key>            <transaction path>
//! <root>/<app>/ids/<quoted key>/id0000000007
//! <root>/<app>/gclock                             (ephemeral)
//! <root>/<app>/gclasttime                         last_gc_at
//! ```
//!
//! The layout and value encodings are shared with existing deployments and
//! must not change.

use crate::TxId;
use chrono::{DateTime, Utc};
use coordstore::path;
use url::form_urlencoded;

pub const TX_DIR: &str = "txids";
pub const LOCK_DIR: &str = "locks";
pub const ID_DIR: &str = "ids";
pub const TX_PREFIX: &str = "tx";
pub const ID_PREFIX: &str = "id";
pub const UPDATED_KEY_PREFIX: &str = "ukey";
pub const LOCKPATH_NODE: &str = "lockpath";
pub const BLACKLIST_DIR: &str = "blacklist";
pub const VALIDLIST_DIR: &str = "validlist";
pub const GC_LOCK_NODE: &str = "gclock";
pub const GC_TIME_NODE: &str = "gclasttime";

/// Id-block key used when the caller does not name one
pub const GLOBAL_ID_KEY: &str = "__global__";

/// Derives every store path from an application id and a transaction,
/// lock or id key. Holds no state besides the namespace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScheme {
    root: String,
}

impl PathScheme {
    pub fn new<S: Into<String>>(root: S) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn apps_root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn app_root(&self, app: &str) -> String {
        path::join(&self.root, app)
    }

    #[must_use]
    pub fn tx_root(&self, app: &str) -> String {
        path::join(&self.app_root(app), TX_DIR)
    }

    /// Prefix handed to a sequential create to allocate a transaction
    #[must_use]
    pub fn tx_sequence_prefix(&self, app: &str) -> String {
        path::join(&self.tx_root(app), TX_PREFIX)
    }

    #[must_use]
    pub fn tx_path(&self, app: &str, txid: TxId) -> String {
        format!("{}{txid:010}", self.tx_sequence_prefix(app))
    }

    #[must_use]
    pub fn lockpath_path(&self, app: &str, txid: TxId) -> String {
        path::join(&self.tx_path(app, txid), LOCKPATH_NODE)
    }

    #[must_use]
    pub fn updated_key_prefix(&self, app: &str, txid: TxId) -> String {
        path::join(&self.tx_path(app, txid), UPDATED_KEY_PREFIX)
    }

    #[must_use]
    pub fn blacklist_root(&self, app: &str) -> String {
        path::join(&self.tx_root(app), BLACKLIST_DIR)
    }

    #[must_use]
    pub fn blacklist_path(&self, app: &str, txid: TxId) -> String {
        path::join(&self.blacklist_root(app), &txid.to_string())
    }

    #[must_use]
    pub fn validlist_root(&self, app: &str) -> String {
        path::join(&self.tx_root(app), VALIDLIST_DIR)
    }

    #[must_use]
    pub fn validlist_path(&self, app: &str, entity_key: &str) -> String {
        path::join(&self.validlist_root(app), &quote_key(entity_key))
    }

    #[must_use]
    pub fn lock_root(&self, app: &str) -> String {
        path::join(&self.app_root(app), LOCK_DIR)
    }

    #[must_use]
    pub fn lock_path(&self, app: &str, root_key: &str) -> String {
        path::join(&self.lock_root(app), &quote_key(root_key))
    }

    #[must_use]
    pub fn id_root(&self, app: &str, key: &str) -> String {
        path::join(&path::join(&self.app_root(app), ID_DIR), &quote_key(key))
    }

    #[must_use]
    pub fn id_sequence_prefix(&self, app: &str, key: &str) -> String {
        path::join(&self.id_root(app, key), ID_PREFIX)
    }

    #[must_use]
    pub fn gc_lock_path(&self, app: &str) -> String {
        path::join(&self.app_root(app), GC_LOCK_NODE)
    }

    #[must_use]
    pub fn gc_time_path(&self, app: &str) -> String {
        path::join(&self.app_root(app), GC_TIME_NODE)
    }

    /// Inverse of `blacklist_root`: which application a watched path belongs to
    #[must_use]
    pub fn app_for_blacklist_root(&self, blacklist_root: &str) -> Option<String> {
        let rest = blacklist_root.strip_prefix(&self.root)?.strip_prefix('/')?;
        let (app, tail) = rest.split_once('/')?;
        (tail == format!("{TX_DIR}/{BLACKLIST_DIR}")).then(|| app.to_string())
    }
}

/// Parse a transaction node name (`tx0000000042`) into its id
#[must_use]
pub fn parse_tx_name(name: &str) -> Option<TxId> {
    parse_sequence(name, TX_PREFIX)
}

/// Parse the store-assigned suffix of a sequential node name
#[must_use]
pub fn parse_sequence(name: &str, prefix: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Quote a key for use as a single path component (form-urlencoded, space as `+`)
#[must_use]
pub fn quote_key(key: &str) -> String {
    form_urlencoded::byte_serialize(key.as_bytes()).collect()
}

#[must_use]
pub fn unquote_key(quoted: &str) -> String {
    // A quoted key never holds a raw '&' or '=', so it parses as one bare name
    form_urlencoded::parse(quoted.as_bytes())
        .next()
        .map(|(name, _)| name.into_owned())
        .unwrap_or_default()
}

/// Value of an updated-key node: which entity the transaction touched, and
/// the transaction whose version of it was valid before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedKey {
    pub entity_key: String,
    pub target_txid: TxId,
}

impl UpdatedKey {
    /// `<quoted key>/<txid>`
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}/{}", quote_key(&self.entity_key), self.target_txid)
    }

    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        let (quoted, txid) = raw.rsplit_once('/')?;
        Some(Self {
            entity_key: unquote_key(quoted),
            target_txid: txid.trim().parse().ok()?,
        })
    }
}

/// Decimal seconds since the epoch, microsecond precision
#[must_use]
pub fn encode_timestamp(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

/// Accepts any decimal seconds value, including ones written without a fraction
#[must_use]
pub fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some((whole, fraction)) = raw.split_once('.') {
        if !whole.is_empty()
            && whole.bytes().all(|b| b.is_ascii_digit())
            && fraction.bytes().all(|b| b.is_ascii_digit())
        {
            let seconds: i64 = whole.parse().ok()?;
            let micros: String = fraction.chars().chain("000000".chars()).take(6).collect();
            let micros: i64 = micros.parse().ok()?;
            return DateTime::from_timestamp_micros(seconds.checked_mul(1_000_000)? + micros);
        }
    }
    // Exponent forms and bare integers
    let seconds: f64 = raw.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}

#[must_use]
pub fn encode_txid(txid: TxId) -> String {
    txid.to_string()
}

#[must_use]
pub fn decode_txid(raw: &str) -> Option<TxId> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> PathScheme {
        PathScheme::new("/appscale/apps")
    }

    #[test]
    fn test_transaction_paths() {
        let p = scheme();
        assert_eq!(p.tx_root("guestbook"), "/appscale/apps/guestbook/txids");
        assert_eq!(
            p.tx_path("guestbook", 42),
            "/appscale/apps/guestbook/txids/tx0000000042"
        );
        assert_eq!(
            p.lockpath_path("guestbook", 42),
            "/appscale/apps/guestbook/txids/tx0000000042/lockpath"
        );
        assert_eq!(
            p.updated_key_prefix("guestbook", 1),
            "/appscale/apps/guestbook/txids/tx0000000001/ukey"
        );
        assert_eq!(
            p.blacklist_path("guestbook", 7),
            "/appscale/apps/guestbook/txids/blacklist/7"
        );
    }

    #[test]
    fn test_keyed_paths_are_quoted() {
        let p = scheme();
        assert_eq!(
            p.lock_path("a", "customer#42"),
            "/appscale/apps/a/locks/customer%2342"
        );
        assert_eq!(
            p.validlist_path("a", "k/with space"),
            "/appscale/apps/a/txids/validlist/k%2Fwith+space"
        );
        assert_eq!(
            p.id_sequence_prefix("a", GLOBAL_ID_KEY),
            "/appscale/apps/a/ids/__global__/id"
        );
        assert_eq!(p.gc_lock_path("a"), "/appscale/apps/a/gclock");
        assert_eq!(p.gc_time_path("a"), "/appscale/apps/a/gclasttime");
    }

    #[test]
    fn test_app_for_blacklist_root() {
        let p = scheme();
        let root = p.blacklist_root("guestbook");
        assert_eq!(p.app_for_blacklist_root(&root), Some("guestbook".to_string()));
        assert_eq!(p.app_for_blacklist_root(&p.tx_root("guestbook")), None);
        assert_eq!(p.app_for_blacklist_root("/elsewhere/x/txids/blacklist"), None);
    }

    #[test]
    fn test_parse_tx_name() {
        assert_eq!(parse_tx_name("tx0000000042"), Some(42));
        assert_eq!(parse_tx_name("tx0000000000"), Some(0));
        assert_eq!(parse_tx_name("blacklist"), None);
        assert_eq!(parse_tx_name("validlist"), None);
        assert_eq!(parse_tx_name("tx"), None);
        assert_eq!(parse_tx_name("tx-1"), None);
    }

    #[test]
    fn test_quote_unquote() {
        for key in ["customer#42", "a/b c", "plain", "ünï&cödé=1", ""] {
            assert_eq!(unquote_key(&quote_key(key)), key);
        }
        assert!(!quote_key("a/b").contains('/'));
    }

    #[test]
    fn test_updated_key_encoding() {
        let uk = UpdatedKey {
            entity_key: "order/7".to_string(),
            target_txid: 12,
        };
        assert_eq!(uk.encode(), "order%2F7/12");
        assert_eq!(UpdatedKey::decode("order%2F7/12"), Some(uk));
        assert_eq!(UpdatedKey::decode("no-separator"), None);
        assert_eq!(UpdatedKey::decode("k/notanumber"), None);
    }

    #[test]
    fn test_timestamp_encoding() {
        let at = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(encode_timestamp(at), "1700000000.123456");
        assert_eq!(decode_timestamp("1700000000.123456"), Some(at));
        assert_eq!(
            decode_timestamp("1700000000"),
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(decode_timestamp("soon"), None);
    }
}
