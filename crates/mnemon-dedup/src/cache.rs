use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemon_types::IngestSource;
use parking_lot::Mutex;
use tracing::debug;

const SHARD_COUNT: usize = 16;

/// Cache configuration, env-driven at startup
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub cleanup_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(300_000),
            max_entries: 50_000,
            cleanup_interval: Duration::from_millis(60_000),
        }
    }
}

/// Identity of one observation of a logical event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub session_id: String,
    pub content_hash: u64,
    pub source: IngestSource,
}

/// State tracked per (session, content-hash)
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub first_seen: DateTime<Utc>,
    pub sources: Vec<IngestSource>,
    pub highest_priority: u8,
    pub last_refreshed: DateTime<Utc>,
}

/// Single-flight filter across the three racing event sources.
///
/// An event passes at most once per source priority, and only when the
/// arriving source outranks everything recorded so far, so a richer
/// payload supersedes a poorer one exactly once.
///
/// The map is sharded by session so concurrent pipeline workers never
/// contend on a global lock. In-process only: a restart re-admits a
/// bounded window of recent events, which the aggregator's durable
/// per-session hash set absorbs.
pub struct DedupCache {
    shards: Vec<Mutex<HashMap<(String, u64), DedupEntry>>>,
    config: DedupConfig,
}

impl DedupCache {
    pub fn new(config: DedupConfig) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards, config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    fn shard(&self, session_id: &str) -> &Mutex<HashMap<(String, u64), DedupEntry>> {
        let idx = crate::hash::fnv1a64(session_id.as_bytes()) as usize % SHARD_COUNT;
        &self.shards[idx]
    }

    /// Should this observation be emitted downstream?
    ///
    /// True iff the source's priority exceeds the highest priority
    /// recorded for the (session, content-hash) pair. Every call
    /// refreshes the entry's TTL.
    pub fn should_ingest(&self, key: &DedupKey) -> bool {
        self.should_ingest_at(key, Utc::now())
    }

    pub fn should_ingest_at(&self, key: &DedupKey, now: DateTime<Utc>) -> bool {
        let priority = key.source.priority();
        let mut shard = self.shard(&key.session_id).lock();

        let map_key = (key.session_id.clone(), key.content_hash);
        let admit = match shard.get_mut(&map_key) {
            Some(entry) => {
                entry.last_refreshed = now;
                if priority > entry.highest_priority {
                    entry.highest_priority = priority;
                    if !entry.sources.contains(&key.source) {
                        entry.sources.push(key.source);
                    }
                    true
                } else {
                    false
                }
            }
            None => {
                shard.insert(
                    map_key,
                    DedupEntry {
                        first_seen: now,
                        sources: vec![key.source],
                        highest_priority: priority,
                        last_refreshed: now,
                    },
                );
                true
            }
        };

        if shard.len() > self.shard_capacity() {
            evict_oldest(&mut shard);
        }

        admit
    }

    /// Observation only; no TTL refresh, no mutation.
    pub fn is_duplicate(&self, session_id: &str, content_hash: u64) -> bool {
        let shard = self.shard(session_id).lock();
        shard.contains_key(&(session_id.to_string(), content_hash))
    }

    /// Idempotent insertion used after a successful downstream ack, to
    /// sync with the aggregator's durable dedup.
    pub fn mark_seen(&self, session_id: &str, content_hash: u64, source: IngestSource) {
        self.mark_seen_at(session_id, content_hash, source, Utc::now());
    }

    pub fn mark_seen_at(
        &self,
        session_id: &str,
        content_hash: u64,
        source: IngestSource,
        now: DateTime<Utc>,
    ) {
        let mut shard = self.shard(session_id).lock();
        let entry = shard
            .entry((session_id.to_string(), content_hash))
            .or_insert_with(|| DedupEntry {
                first_seen: now,
                sources: Vec::new(),
                highest_priority: 0,
                last_refreshed: now,
            });
        entry.last_refreshed = now;
        entry.highest_priority = entry.highest_priority.max(source.priority());
        if !entry.sources.contains(&source) {
            entry.sources.push(source);
        }
    }

    /// Current entry for inspection (tests, diagnostics)
    pub fn entry(&self, session_id: &str, content_hash: u64) -> Option<DedupEntry> {
        let shard = self.shard(session_id).lock();
        shard.get(&(session_id.to_string(), content_hash)).cloned()
    }

    /// Drop entries past their TTL. Called periodically by the runtime.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.config.ttl).unwrap_or(chrono::Duration::zero());
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, entry| entry.last_refreshed + ttl > now);
            removed += before - shard.len();
        }
        if removed > 0 {
            debug!(removed, "dedup cache cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_capacity(&self) -> usize {
        (self.config.max_entries / SHARD_COUNT).max(1)
    }
}

/// Evict the 10% oldest entries (by last refresh) from a shard.
fn evict_oldest(shard: &mut HashMap<(String, u64), DedupEntry>) {
    let evict_count = (shard.len() / 10).max(1);

    let mut by_age: Vec<((String, u64), DateTime<Utc>)> = shard
        .iter()
        .map(|(k, v)| (k.clone(), v.last_refreshed))
        .collect();
    by_age.sort_by_key(|(_, refreshed)| *refreshed);

    for (key, _) in by_age.into_iter().take(evict_count) {
        shard.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn key(session: &str, hash: u64, source: IngestSource) -> DedupKey {
        DedupKey {
            session_id: session.to_string(),
            content_hash: hash,
            source,
        }
    }

    #[test]
    fn test_first_observation_admits() {
        let cache = DedupCache::new(DedupConfig::default());
        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::FileWatcher)));
    }

    #[test]
    fn test_same_source_admits_once() {
        let cache = DedupCache::new(DedupConfig::default());
        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::Hook)));
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::Hook)));
    }

    #[test]
    fn test_priority_escalation_readmits_once() {
        let cache = DedupCache::new(DedupConfig::default());

        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::FileWatcher)));
        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::Hook)));
        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::StreamJson)));

        // Every repeat at any priority is now rejected
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::StreamJson)));
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::Hook)));
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::FileWatcher)));

        let entry = cache.entry("s-1", 42).unwrap();
        assert_eq!(entry.highest_priority, 3);
        assert_eq!(entry.sources.len(), 3);
    }

    #[test]
    fn test_lower_priority_never_readmits() {
        let cache = DedupCache::new(DedupConfig::default());
        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::StreamJson)));
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::Hook)));
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::FileWatcher)));

        let entry = cache.entry("s-1", 42).unwrap();
        assert_eq!(entry.highest_priority, 3);
        assert_eq!(entry.sources, vec![IngestSource::StreamJson]);
    }

    #[test]
    fn test_monotonicity_over_interleavings() {
        // Any interleaving of the three sources emits one copy per
        // distinct priority, and highest_priority ends at the max seen.
        use IngestSource::*;
        let orders = [
            [FileWatcher, Hook, StreamJson],
            [StreamJson, Hook, FileWatcher],
            [Hook, FileWatcher, StreamJson],
            [Hook, StreamJson, FileWatcher],
        ];

        for order in orders {
            let cache = DedupCache::new(DedupConfig::default());
            let mut emitted: Vec<IngestSource> = Vec::new();
            for source in order {
                if cache.should_ingest(&key("s-1", 7, source)) {
                    emitted.push(source);
                }
            }
            // Emitted priorities are strictly increasing
            let priorities: Vec<u8> = emitted.iter().map(|s| s.priority()).collect();
            assert!(priorities.windows(2).all(|w| w[0] < w[1]), "{:?}", order);
            assert_eq!(cache.entry("s-1", 7).unwrap().highest_priority, 3);
        }
    }

    #[test]
    fn test_is_duplicate_does_not_mutate() {
        let cache = DedupCache::new(DedupConfig::default());
        assert!(!cache.is_duplicate("s-1", 42));
        cache.should_ingest(&key("s-1", 42, IngestSource::Hook));
        assert!(cache.is_duplicate("s-1", 42));
        // Observation must not block a later higher-priority ingest
        assert!(cache.should_ingest(&key("s-1", 42, IngestSource::StreamJson)));
    }

    #[test]
    fn test_mark_seen_is_idempotent() {
        let cache = DedupCache::new(DedupConfig::default());
        cache.mark_seen("s-1", 42, IngestSource::Hook);
        cache.mark_seen("s-1", 42, IngestSource::Hook);
        let entry = cache.entry("s-1", 42).unwrap();
        assert_eq!(entry.sources, vec![IngestSource::Hook]);
        assert_eq!(entry.highest_priority, 2);
        // mark_seen suppresses same-or-lower-priority ingests
        assert!(!cache.should_ingest(&key("s-1", 42, IngestSource::Hook)));
    }

    #[test]
    fn test_ttl_cleanup() {
        let config = DedupConfig {
            ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let cache = DedupCache::new(config);
        let t0 = Utc::now();

        cache.should_ingest_at(&key("s-1", 1, IngestSource::Hook), t0);
        cache.should_ingest_at(&key("s-1", 2, IngestSource::Hook), t0 + ChronoDuration::seconds(50));

        let removed = cache.cleanup_at(t0 + ChronoDuration::seconds(70));
        assert_eq!(removed, 1);
        assert!(!cache.is_duplicate("s-1", 1));
        assert!(cache.is_duplicate("s-1", 2));
    }

    #[test]
    fn test_refresh_extends_ttl() {
        let config = DedupConfig {
            ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let cache = DedupCache::new(config);
        let t0 = Utc::now();

        cache.should_ingest_at(&key("s-1", 1, IngestSource::Hook), t0);
        // Duplicate call at t+50 refreshes the entry
        cache.should_ingest_at(&key("s-1", 1, IngestSource::Hook), t0 + ChronoDuration::seconds(50));

        assert_eq!(cache.cleanup_at(t0 + ChronoDuration::seconds(70)), 0);
        assert!(cache.is_duplicate("s-1", 1));
    }

    #[test]
    fn test_capacity_eviction() {
        let config = DedupConfig {
            max_entries: SHARD_COUNT * 10,
            ..Default::default()
        };
        let cache = DedupCache::new(config);

        // Same session pins every entry to one shard (capacity 10)
        for i in 0..200u64 {
            cache.should_ingest(&key("s-1", i, IngestSource::Hook));
        }
        assert!(cache.len() <= 11);
    }
}
