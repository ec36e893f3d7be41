//! Session cipher cache.
//!
//! Maps session ids to the cipher pair negotiated for them. An entry is
//! usable while it has been used within the inactivity limit and is younger
//! than the validity limit. Expired entries are dropped lazily on lookup and
//! by [`CipherCache::purge_expired`].

use bidi_protocol::{Ciphers, NULL_UUID};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CachedCiphers {
    ciphers: Ciphers,
    created_at: Instant,
    last_used_at: Instant,
}

pub struct CipherCache {
    entries: Mutex<HashMap<String, CachedCiphers>>,
    inactivity_limit: Duration,
    validity_limit: Duration,
}

impl CipherCache {
    pub fn new(inactivity_limit: Duration, validity_limit: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inactivity_limit,
            validity_limit,
        }
    }

    /// Returns the ciphers of a live session and marks it used.
    pub fn lookup(&self, session_id: &str) -> Option<Ciphers> {
        self.lookup_at(session_id, Instant::now())
    }

    pub(crate) fn lookup_at(&self, session_id: &str, now: Instant) -> Option<Ciphers> {
        if session_id == NULL_UUID {
            return None;
        }

        let mut entries = self.entries.lock();
        let entry = entries.get_mut(session_id)?;

        if self.is_expired(entry, now) {
            entries.remove(session_id);
            return None;
        }

        entry.last_used_at = now;
        Some(entry.ciphers.clone())
    }

    /// Inserts or replaces a session. The creation time of an existing
    /// entry is kept.
    pub fn store(&self, ciphers: Ciphers) {
        self.store_at(ciphers, Instant::now());
    }

    pub(crate) fn store_at(&self, ciphers: Ciphers, now: Instant) {
        if ciphers.session_id == NULL_UUID {
            return;
        }

        let mut entries = self.entries.lock();
        let created_at = entries
            .get(&ciphers.session_id)
            .map(|e| e.created_at)
            .unwrap_or(now);
        entries.insert(
            ciphers.session_id.clone(),
            CachedCiphers {
                ciphers,
                created_at,
                last_used_at: now,
            },
        );
    }

    /// Marks a session used without handing out its ciphers.
    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(session_id) {
            entry.last_used_at = Instant::now();
        }
    }

    /// Drops every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !self.is_expired(e, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CachedCiphers, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_used_at) > self.inactivity_limit
            || now.saturating_duration_since(entry.created_at) > self.validity_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidi_protocol::crypto::AES_KEY_LEN;
    use bidi_protocol::SessionCipher;

    const INACTIVITY: Duration = Duration::from_secs(120);
    const VALIDITY: Duration = Duration::from_secs(1800);

    fn ciphers(session_id: &str) -> Ciphers {
        let key = [9u8; AES_KEY_LEN];
        Ciphers {
            session_id: session_id.to_string(),
            encrypt: SessionCipher::with_random_iv(key),
            decrypt: SessionCipher::with_random_iv(key),
        }
    }

    fn cache() -> CipherCache {
        CipherCache::new(INACTIVITY, VALIDITY)
    }

    #[test]
    fn test_store_and_lookup() {
        let cache = cache();
        cache.store(ciphers("s1"));
        assert_eq!(cache.lookup("s1").unwrap().session_id, "s1");
        assert!(cache.lookup("s2").is_none());
    }

    #[test]
    fn test_null_session_never_cached() {
        let cache = cache();
        cache.store(ciphers(NULL_UUID));
        assert!(cache.is_empty());
        assert!(cache.lookup(NULL_UUID).is_none());
    }

    #[test]
    fn test_inactivity_expiry() {
        let cache = cache();
        let t0 = Instant::now();
        cache.store_at(ciphers("s1"), t0);

        assert!(cache
            .lookup_at("s1", t0 + INACTIVITY - Duration::from_secs(1))
            .is_some());
        // Last use moved forward by the lookup above
        let later = t0 + INACTIVITY * 2 - Duration::from_secs(2);
        assert!(cache.lookup_at("s1", later).is_some());

        assert!(cache
            .lookup_at("s1", later + INACTIVITY + Duration::from_secs(1))
            .is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_validity_expiry_despite_recent_use() {
        let cache = cache();
        let t0 = Instant::now();
        cache.store_at(ciphers("s1"), t0);

        // Keep the session busy every minute
        let mut t = t0;
        while t < t0 + VALIDITY - Duration::from_secs(60) {
            t += Duration::from_secs(60);
            assert!(cache.lookup_at("s1", t).is_some());
        }

        assert!(cache
            .lookup_at("s1", t0 + VALIDITY + Duration::from_secs(1))
            .is_none());
    }

    #[test]
    fn test_store_keeps_creation_time() {
        let cache = cache();
        let t0 = Instant::now();
        cache.store_at(ciphers("s1"), t0);
        cache.store_at(ciphers("s1"), t0 + VALIDITY - Duration::from_secs(10));

        assert!(cache
            .lookup_at("s1", t0 + VALIDITY + Duration::from_secs(1))
            .is_none());
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache();
        let t0 = Instant::now();
        cache.store_at(ciphers("old"), t0);
        cache.store_at(ciphers("new"), t0 + INACTIVITY);

        assert_eq!(cache.purge_expired_at(t0 + INACTIVITY + Duration::from_secs(1)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup_at("new", t0 + INACTIVITY + Duration::from_secs(2)).is_some());
    }
}
