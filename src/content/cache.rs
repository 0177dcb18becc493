use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::content_map::ContentMap;

struct CachedMap {
    map: Arc<ContentMap>,
    stored_at: Instant,
}

/// Content maps keyed by (route, level), each valid for a fixed TTL.
pub struct ContentMapCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, u8), CachedMap>>,
}

impl ContentMapCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Live entry for the key; expired entries are evicted on access.
    pub fn get(&self, route: &str, level: u8) -> Option<Arc<ContentMap>> {
        let mut entries = self.lock();
        let key = (route.to_string(), level);
        match entries.get(&key) {
            Some(cached) if cached.stored_at.elapsed() < self.ttl => Some(Arc::clone(&cached.map)),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, route: &str, level: u8, map: ContentMap) -> Arc<ContentMap> {
        let map = Arc::new(map);
        self.lock().insert(
            (route.to_string(), level),
            CachedMap {
                map: Arc::clone(&map),
                stored_at: Instant::now(),
            },
        );
        map
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, u8), CachedMap>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
