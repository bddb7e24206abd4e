//! Target & directory resolution (spec §4.3).
//!
//! Turns a free-form string (`"#ops"`, `"@alice"`, a raw channel id, ...)
//! into a concrete [`ChannelDirectoryEntry`], consulting a TTL-bounded
//! directory cache before falling back to a live channel-plugin lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::ResolutionError;

pub const DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    User,
    Channel,
    Group,
}

/// A resolvable entry as reported by a channel plugin's directory lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDirectoryEntry {
    pub id: String,
    pub name: Option<String>,
    pub handle: Option<String>,
    pub kind: TargetKind,
    /// Used to break ties when multiple entries match under the `best`
    /// ambiguity policy; higher ranks win.
    pub rank: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityPolicy {
    Error,
    Best,
    First,
}

impl Default for AmbiguityPolicy {
    fn default() -> Self {
        AmbiguityPolicy::Error
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    channel: String,
    account: String,
    kind: Option<String>,
    source_tag: String,
    plugin_signature: String,
}

struct CacheEntry {
    entries: Vec<ChannelDirectoryEntry>,
    fetched_at: Instant,
}

/// Looks up the live directory for an account. Implemented by the
/// channel plugin runtime; kept as a trait here so resolution logic is
/// testable without a real plugin registry.
#[async_trait::async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn list_directory(
        &self,
        channel: &str,
        account: &str,
    ) -> anyhow::Result<Vec<ChannelDirectoryEntry>>;

    /// Live (uncached) listing, consulted once when the cached listing
    /// comes back empty (spec §4.3 step 3). Plugins that don't offer a
    /// separate live path can leave this at its default, which simply
    /// repeats the cached listing's (still empty) result.
    async fn list_directory_live(
        &self,
        channel: &str,
        account: &str,
    ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
        self.list_directory(channel, account).await
    }
}

#[derive(Default)]
pub struct DirectoryCache {
    inner: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch from cache if fresh, otherwise perform the plugin's cached
    /// listing and, if that comes back empty, fall back exactly once to
    /// its live listing (spec §4.3 step 3). There is no negative
    /// caching: an empty result (from either call) is never written to
    /// the cache, so a transient plugin error never poisons future
    /// lookups and the next call always re-checks the plugin.
    async fn get_or_fetch(
        &self,
        lookup: &dyn DirectoryLookup,
        key: &CacheKey,
    ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
        {
            let cache = self.inner.read().await;
            if let Some(entry) = cache.get(key) {
                if entry.fetched_at.elapsed() < DIRECTORY_CACHE_TTL {
                    return Ok(entry.entries.clone());
                }
            }
        }

        let mut entries = lookup.list_directory(&key.channel, &key.account).await?;
        if entries.is_empty() {
            entries = lookup
                .list_directory_live(&key.channel, &key.account)
                .await?;
        }

        if entries.is_empty() {
            return Ok(entries);
        }

        let mut cache = self.inner.write().await;
        cache.insert(
            key.clone(),
            CacheEntry {
                entries: entries.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(entries)
    }
}

pub struct ResolveRequest<'a> {
    pub channel: &'a str,
    pub account: &'a str,
    pub input: &'a str,
    pub preferred_kind: Option<TargetKind>,
    pub source_tag: &'a str,
    pub plugin_signature: &'a str,
    pub resolve_ambiguous: AmbiguityPolicy,
}

/// Strip `@`/`#`/`channel:`/`user:` decoration and trim whitespace,
/// applying Slack's `#x` -> `channel:x` / `@x` -> `user:x` convention
/// when `channel == "slack"`. Comparisons fold case; the returned string
/// preserves the caller's original casing.
pub fn normalize(channel: &str, input: &str) -> String {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("channel:")
        .or_else(|| trimmed.strip_prefix("user:"))
        .unwrap_or(trimmed);

    if channel.eq_ignore_ascii_case("slack") {
        if let Some(rest) = trimmed.strip_prefix('#') {
            return rest.to_string();
        }
        if let Some(rest) = trimmed.strip_prefix('@') {
            return rest.to_string();
        }
    }

    stripped
        .trim_start_matches('@')
        .trim_start_matches('#')
        .to_string()
}

/// A value "looks like" an opaque target id (not a human-readable
/// handle) when it contains no whitespace and is either all-digits, a
/// `+`-prefixed phone number, a `conversation:`/`user:`-scoped id, a
/// thread reference, or otherwise contains a typical id separator
/// (`:`/`-`/`_`) alongside a digit.
fn looks_like_target_id(value: &str) -> bool {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return false;
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if let Some(digits) = value.strip_prefix('+') {
        if digits.len() >= 6 && digits.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    if value.starts_with("conversation:") || value.starts_with("user:") {
        return true;
    }
    if value.contains("thread") {
        return true;
    }
    value.chars().any(|c| c.is_ascii_digit())
        && value.chars().any(|c| matches!(c, ':' | '-' | '_'))
}

fn matches_entry(entry: &ChannelDirectoryEntry, needle: &str) -> bool {
    let needle = needle.to_ascii_lowercase();
    let fold = |s: &Option<String>| {
        s.as_ref()
            .map(|v| v.to_ascii_lowercase())
            .filter(|v| v == &needle || v.contains(&needle))
            .is_some()
    };
    entry.id.to_ascii_lowercase() == needle || fold(&entry.name) || fold(&entry.handle)
}

pub struct Resolver {
    cache: DirectoryCache,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            cache: DirectoryCache::new(),
        }
    }

    pub async fn resolve(
        &self,
        lookup: &dyn DirectoryLookup,
        req: ResolveRequest<'_>,
    ) -> Result<ChannelDirectoryEntry, ResolutionError> {
        let normalized = normalize(req.channel, req.input);

        if looks_like_target_id(&normalized) {
            return Ok(ChannelDirectoryEntry {
                id: normalized,
                name: None,
                handle: None,
                kind: req.preferred_kind.unwrap_or(TargetKind::User),
                rank: 0,
            });
        }

        let key = CacheKey {
            channel: req.channel.to_string(),
            account: req.account.to_string(),
            kind: req.preferred_kind.as_ref().map(|k| format!("{k:?}")),
            source_tag: req.source_tag.to_string(),
            plugin_signature: req.plugin_signature.to_string(),
        };

        let entries = self
            .cache
            .get_or_fetch(lookup, &key)
            .await
            .map_err(|e| ResolutionError::Unknown {
                query: req.input.to_string(),
                hint: e.to_string(),
            })?;

        let mut matches: Vec<&ChannelDirectoryEntry> = entries
            .iter()
            .filter(|e| matches_entry(e, &normalized))
            .collect();

        match matches.len() {
            0 => Err(ResolutionError::Unknown {
                query: req.input.to_string(),
                hint: "no matching directory entry".to_string(),
            }),
            1 => Ok(matches.remove(0).clone()),
            _ => match req.resolve_ambiguous {
                AmbiguityPolicy::Error => Err(ResolutionError::Ambiguous {
                    query: req.input.to_string(),
                    candidates: matches.iter().map(|e| e.id.clone()).collect(),
                }),
                AmbiguityPolicy::First => Ok(matches[0].clone()),
                AmbiguityPolicy::Best => {
                    matches.sort_by(|a, b| b.rank.cmp(&a.rank));
                    Ok(matches[0].clone())
                }
            },
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Default display formatting for a resolved entry: `#name` for
/// group/channel kinds, `@handle` for user kind, raw id otherwise.
pub fn format_display(entry: &ChannelDirectoryEntry) -> String {
    match entry.kind {
        TargetKind::Channel | TargetKind::Group => entry
            .name
            .as_ref()
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| entry.id.clone()),
        TargetKind::User => entry
            .handle
            .as_ref()
            .map(|h| format!("@{h}"))
            .unwrap_or_else(|| entry.id.clone()),
    }
}

pub type SharedResolver = Arc<Resolver>;

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLookup(Vec<ChannelDirectoryEntry>);

    #[async_trait::async_trait]
    impl DirectoryLookup for FixedLookup {
        async fn list_directory(
            &self,
            _channel: &str,
            _account: &str,
        ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
            Ok(self.0.clone())
        }
    }

    fn entry(id: &str, name: &str, rank: i32) -> ChannelDirectoryEntry {
        ChannelDirectoryEntry {
            id: id.to_string(),
            name: Some(name.to_string()),
            handle: Some(name.to_string()),
            kind: TargetKind::Channel,
            rank,
        }
    }

    #[test]
    fn normalize_strips_decoration() {
        assert_eq!(normalize("discord", "#ops"), "ops");
        assert_eq!(normalize("discord", "@alice"), "alice");
        assert_eq!(normalize("discord", "channel:ops"), "ops");
        assert_eq!(normalize("discord", "  ops  "), "ops");
    }

    #[test]
    fn normalize_slack_specific() {
        assert_eq!(normalize("slack", "#ops"), "ops");
        assert_eq!(normalize("slack", "@alice"), "alice");
    }

    #[test]
    fn target_id_fast_path_skips_directory() {
        assert!(looks_like_target_id("123456789"));
        assert!(looks_like_target_id("U012-ABC"));
        assert!(looks_like_target_id("+15551234567"));
        assert!(looks_like_target_id("conversation:abc123"));
        assert!(looks_like_target_id("thread-99"));
        assert!(!looks_like_target_id("+123"));
        assert!(!looks_like_target_id("ops"));
        assert!(!looks_like_target_id("has space"));
    }

    #[tokio::test]
    async fn resolves_unique_match_by_name() {
        let lookup = FixedLookup(vec![entry("C1", "ops", 0), entry("C2", "eng", 0)]);
        let resolver = Resolver::new();
        let result = resolver
            .resolve(
                &lookup,
                ResolveRequest {
                    channel: "discord",
                    account: "acct1",
                    input: "#ops",
                    preferred_kind: None,
                    source_tag: "default",
                    plugin_signature: "v1",
                    resolve_ambiguous: AmbiguityPolicy::Error,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.id, "C1");
    }

    #[tokio::test]
    async fn ambiguous_match_errors_by_default() {
        let lookup = FixedLookup(vec![entry("C1", "ops-a", 0), entry("C2", "ops-b", 0)]);
        let resolver = Resolver::new();
        let err = resolver
            .resolve(
                &lookup,
                ResolveRequest {
                    channel: "discord",
                    account: "acct1",
                    input: "ops",
                    preferred_kind: None,
                    source_tag: "default",
                    plugin_signature: "v1",
                    resolve_ambiguous: AmbiguityPolicy::Error,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Ambiguous { .. }));
    }

    #[tokio::test]
    async fn ambiguous_match_best_picks_highest_rank() {
        let lookup = FixedLookup(vec![entry("C1", "ops-a", 1), entry("C2", "ops-b", 5)]);
        let resolver = Resolver::new();
        let result = resolver
            .resolve(
                &lookup,
                ResolveRequest {
                    channel: "discord",
                    account: "acct1",
                    input: "ops",
                    preferred_kind: None,
                    source_tag: "default",
                    plugin_signature: "v1",
                    resolve_ambiguous: AmbiguityPolicy::Best,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.id, "C2");
    }

    struct EmptyThenLiveLookup(Vec<ChannelDirectoryEntry>);

    #[async_trait::async_trait]
    impl DirectoryLookup for EmptyThenLiveLookup {
        async fn list_directory(
            &self,
            _channel: &str,
            _account: &str,
        ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
            Ok(vec![])
        }

        async fn list_directory_live(
            &self,
            _channel: &str,
            _account: &str,
        ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn empty_cached_listing_falls_back_to_live_once() {
        let lookup = EmptyThenLiveLookup(vec![entry("C1", "ops", 0)]);
        let resolver = Resolver::new();
        let result = resolver
            .resolve(
                &lookup,
                ResolveRequest {
                    channel: "discord",
                    account: "acct1",
                    input: "ops",
                    preferred_kind: None,
                    source_tag: "default",
                    plugin_signature: "v1",
                    resolve_ambiguous: AmbiguityPolicy::Error,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.id, "C1");
    }

    struct PanicLookup;

    #[async_trait::async_trait]
    impl DirectoryLookup for PanicLookup {
        async fn list_directory(
            &self,
            _channel: &str,
            _account: &str,
        ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
            panic!("directory should not be consulted for an opaque target id");
        }

        async fn list_directory_live(
            &self,
            _channel: &str,
            _account: &str,
        ) -> anyhow::Result<Vec<ChannelDirectoryEntry>> {
            panic!("directory should not be consulted for an opaque target id");
        }
    }

    #[tokio::test]
    async fn phone_number_resolves_without_directory() {
        let resolver = Resolver::new();
        let result = resolver
            .resolve(
                &PanicLookup,
                ResolveRequest {
                    channel: "signal",
                    account: "acct1",
                    input: "+15551234567",
                    preferred_kind: None,
                    source_tag: "default",
                    plugin_signature: "v1",
                    resolve_ambiguous: AmbiguityPolicy::Error,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.id, "+15551234567");
    }

    #[test]
    fn display_formatting_by_kind() {
        let channel = entry("C1", "ops", 0);
        assert_eq!(format_display(&channel), "#ops");
        let user = ChannelDirectoryEntry {
            id: "U1".into(),
            name: None,
            handle: Some("alice".into()),
            kind: TargetKind::User,
            rank: 0,
        };
        assert_eq!(format_display(&user), "@alice");
    }
}
