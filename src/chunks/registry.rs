use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::behavior::BehaviorService;
use crate::config::RegistryConfig;
use crate::dom::{Document, ElementHandle, ElementSnapshot};
use crate::transform::TransformType;

use super::chunk::{chunk_id, content_hash, word_count, ContentChunk};
use super::storage::{SessionStore, StoredTransform};
use super::visibility::{ObserverOptions, VisibilityEntry};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const TRANSFORM_KEY_SEGMENT: &str = "transform:";
const INTRO_KEY: &str = "intro-dismissed";

#[derive(Default)]
struct RegistryState {
    route: String,
    chunks: HashMap<String, ContentChunk>,
    /// Registration order, used for deterministic listings
    order: Vec<String>,
    by_element: HashMap<ElementHandle, String>,
}

impl RegistryState {
    fn ordered(&self) -> impl Iterator<Item = &ContentChunk> {
        self.order.iter().filter_map(|id| self.chunks.get(id))
    }
}

/// Index of transformable regions under the content root.
///
/// The registry is the only writer of chunk state: visibility, content and
/// transform counts change through its methods, which also keep the session
/// store in step with the live document.
#[derive(Clone)]
pub struct ChunkRegistry {
    config: RegistryConfig,
    document: Arc<dyn Document>,
    store: Arc<dyn SessionStore>,
    behavior: Option<BehaviorService>,
    state: Arc<Mutex<RegistryState>>,
    version_tx: Arc<watch::Sender<u64>>,
    debounce: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChunkRegistry {
    pub fn new(
        config: RegistryConfig,
        document: Arc<dyn Document>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            config,
            document,
            store,
            behavior: None,
            state: Arc::new(Mutex::new(RegistryState::default())),
            version_tx: Arc::new(version_tx),
            debounce: Arc::new(Mutex::new(None)),
        }
    }

    /// Include the current mode and level in update log lines.
    pub fn with_behavior(mut self, behavior: BehaviorService) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn observer_options(&self) -> ObserverOptions {
        ObserverOptions {
            root_margin_px: self.config.visibility_margin_px,
            threshold: self.config.visibility_threshold,
        }
    }

    /// Bumped once per state update (discovery, visibility batch, content change).
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    pub fn route(&self) -> String {
        self.lock().route.clone()
    }

    /// Scan the content root, register new chunks and drop chunks whose
    /// element left the document. Returns the number of new chunks.
    pub fn discover(&self) -> usize {
        let route = self.document.route();
        let snapshots = self
            .document
            .query(&self.config.content_root, &self.config.candidate_tags);

        let mut state = self.lock();
        if state.route != route {
            // Navigation replaced the page; nothing from the old route survives.
            state.chunks.clear();
            state.order.clear();
            state.by_element.clear();
            state.route = route.clone();
        }

        let present: HashSet<ElementHandle> = snapshots.iter().map(|s| s.handle).collect();
        let stale: Vec<ElementHandle> = state
            .by_element
            .keys()
            .filter(|handle| !present.contains(*handle) || !self.document.is_connected(**handle))
            .copied()
            .collect();
        for handle in stale {
            if let Some(id) = state.by_element.remove(&handle) {
                state.chunks.remove(&id);
                state.order.retain(|existing| existing != &id);
                log_debug!("chunk {} left the document", id);
            }
        }

        let mut added = 0;
        for snapshot in snapshots {
            if state.by_element.contains_key(&snapshot.handle) {
                continue;
            }
            if self.is_excluded(&snapshot) {
                continue;
            }

            let hash = content_hash(&snapshot.text);
            let mut id = chunk_id(&snapshot.tag, &hash);
            let mut suffix = 2;
            while state.chunks.contains_key(&id) {
                id = format!("{}-{}", chunk_id(&snapshot.tag, &hash), suffix);
                suffix += 1;
            }

            let mut chunk = ContentChunk::new(id.clone(), hash, snapshot.handle, &snapshot.tag, &snapshot.text);
            self.restore_from_store(&route, &mut chunk);

            state.by_element.insert(snapshot.handle, id.clone());
            state.order.push(id.clone());
            state.chunks.insert(id, chunk);
            added += 1;
        }

        let total = state.chunks.len();
        drop(state);
        if added > 0 {
            log_info!("discovered {} new chunks on {} ({} total)", added, route, total);
        }
        self.bump_version();
        added
    }

    /// Re-run discovery once the document has been quiet for the debounce
    /// window. Each notification restarts the timer.
    pub fn notify_structure_changed(&self) {
        let registry = self.clone();
        let delay = Duration::from_millis(self.config.structure_debounce_ms);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.discover();
        });

        if let Some(previous) = lock(&self.debounce).replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any pending debounced discovery.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.debounce).take() {
            handle.abort();
        }
    }

    /// Apply one observer callback's worth of visibility changes as a single
    /// update.
    pub fn apply_visibility(&self, entries: &[VisibilityEntry]) -> usize {
        let threshold = self.config.visibility_threshold;
        let mut changed = 0;
        {
            let mut state = self.lock();
            for entry in entries {
                let Some(id) = state.by_element.get(&entry.element).cloned() else {
                    continue;
                };
                if let Some(chunk) = state.chunks.get_mut(&id) {
                    let visible = entry.is_visible(threshold);
                    if chunk.is_visible != visible {
                        chunk.is_visible = visible;
                        changed += 1;
                    }
                }
            }
        }
        if changed > 0 {
            self.bump_version();
        }
        changed
    }

    /// Visible chunks that meet the minimum word count, in document order.
    pub fn get_transformable_chunks(&self) -> Vec<ContentChunk> {
        let min_words = self.config.min_word_count;
        self.lock()
            .ordered()
            .filter(|chunk| chunk.is_visible && chunk.word_count >= min_words)
            .cloned()
            .collect()
    }

    pub fn get_chunk(&self, id: &str) -> Option<ContentChunk> {
        self.lock().chunks.get(id).cloned()
    }

    pub fn chunks(&self) -> Vec<ContentChunk> {
        self.lock().ordered().cloned().collect()
    }

    /// Whether the chunk's element is still in the document.
    pub fn is_attached(&self, chunk: &ContentChunk) -> bool {
        self.document.is_connected(chunk.element)
    }

    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a transformation: updates the chunk, makes sure the live
    /// element shows `content`, and writes through to the session store.
    /// Returns `None` if the chunk is unknown or its element is detached.
    pub fn update_chunk_content(
        &self,
        id: &str,
        content: &str,
        transform_type: TransformType,
        level: Option<u8>,
    ) -> Option<ContentChunk> {
        let (updated, route) = {
            let mut state = self.lock();
            let route = state.route.clone();
            let chunk = state.chunks.get_mut(id)?;

            if !self.document.is_connected(chunk.element) {
                log_debug!("chunk {} detached before update; skipping", id);
                return None;
            }
            if self.document.text(chunk.element).as_deref() != Some(content) {
                self.document.set_text(chunk.element, content);
            }

            chunk.current_content = content.to_string();
            chunk.transform_count += 1;
            chunk.last_transform_type = Some(transform_type);
            chunk.last_rewrite_level = match transform_type {
                TransformType::Rewrite => level,
                TransformType::Expand => chunk.last_rewrite_level,
            };
            (chunk.clone(), route)
        };

        let stored = StoredTransform {
            content: updated.current_content.clone(),
            transform_count: updated.transform_count,
            last_transform_type: updated.last_transform_type,
            last_rewrite_level: updated.last_rewrite_level,
        };
        match serde_json::to_string(&stored) {
            Ok(json) => self.store.set(&self.transform_key(&route, &updated.content_hash), &json),
            Err(err) => log_warn!("failed to serialize stored transform for {}: {err}", id),
        }

        match &self.behavior {
            Some(behavior) => {
                let state = behavior.get_state();
                log_info!(
                    "chunk {} -> {} #{} (mode={} level={})",
                    id,
                    transform_type.as_str(),
                    updated.transform_count,
                    state.mode.as_str(),
                    state.rewrite_level
                );
            }
            None => log_info!("chunk {} -> {} #{}", id, transform_type.as_str(), updated.transform_count),
        }

        self.bump_version();
        Some(updated)
    }

    /// Restore every element to its base content, zero the counters and
    /// clear persisted transforms.
    pub fn reset_all_content(&self) -> usize {
        let mut restored = 0;
        {
            let mut state = self.lock();
            for chunk in state.chunks.values_mut() {
                if self.document.is_connected(chunk.element)
                    && self.document.set_text(chunk.element, &chunk.base_content)
                {
                    restored += 1;
                }
                chunk.current_content = chunk.base_content.clone();
                chunk.transform_count = 0;
                chunk.last_transform_type = None;
                chunk.last_rewrite_level = None;
            }
        }

        let prefix = format!("{}{}", self.config.storage_prefix, TRANSFORM_KEY_SEGMENT);
        for key in self.store.keys() {
            if key.starts_with(&prefix) {
                self.store.remove(&key);
            }
        }

        log_info!("reset {} chunks to base content", restored);
        self.bump_version();
        restored
    }

    pub fn intro_dismissed(&self) -> bool {
        self.store.get(&self.intro_key()).as_deref() == Some("true")
    }

    pub fn dismiss_intro(&self) {
        self.store.set(&self.intro_key(), "true");
    }

    fn is_excluded(&self, snapshot: &ElementSnapshot) -> bool {
        let denied_tag = |tag: &String| {
            self.config
                .denylist_tags
                .iter()
                .any(|denied| denied.eq_ignore_ascii_case(tag))
        };

        if denied_tag(&snapshot.tag) || snapshot.ancestor_tags.iter().any(denied_tag) {
            return true;
        }
        let marker = &self.config.denylist_attribute;
        if snapshot.attributes.contains_key(marker)
            || snapshot.ancestor_attributes.iter().any(|name| name == marker)
        {
            return true;
        }
        word_count(&snapshot.text) < self.config.min_word_count
    }

    fn restore_from_store(&self, route: &str, chunk: &mut ContentChunk) {
        let key = self.transform_key(route, &chunk.content_hash);
        let Some(raw) = self.store.get(&key) else {
            return;
        };
        let stored: StoredTransform = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                log_warn!("discarding unreadable stored transform {}: {err}", key);
                self.store.remove(&key);
                return;
            }
        };

        if !self.document.set_text(chunk.element, &stored.content) {
            return;
        }
        chunk.current_content = stored.content;
        chunk.transform_count = stored.transform_count;
        chunk.last_transform_type = stored.last_transform_type;
        chunk.last_rewrite_level = stored.last_rewrite_level;
        log_debug!("restored chunk {} from session store", chunk.id);
    }

    fn transform_key(&self, route: &str, hash: &str) -> String {
        format!(
            "{}{}{}:{}",
            self.config.storage_prefix, TRANSFORM_KEY_SEGMENT, route, hash
        )
    }

    fn intro_key(&self) -> String {
        format!("{}{}", self.config.storage_prefix, INTRO_KEY)
    }

    fn bump_version(&self) {
        self.version_tx.send_modify(|version| *version += 1);
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
