use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process cache keyed by `"{guidebook_id}:{kind}:{sha256(input)}"`.
///
/// Entries live until the guidebook's prefix is invalidated; there is no
/// size bound or eviction.
pub struct ContentCache<V: Clone> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V: Clone> Default for ContentCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ContentCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(guidebook_id: &str, kind: &str, input: &str) -> String {
        let digest = Sha256::digest(input.as_bytes());
        format!("{}:{}:{}", guidebook_id, kind, hex::encode(digest))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, V>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: V) {
        self.lock().insert(key, value);
    }

    /// 刪除該 guidebook 的所有項目，回傳刪除數量
    pub fn invalidate(&self, guidebook_id: &str) -> usize {
        let prefix = format!("{}:", guidebook_id);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 已渲染的 HTML 與 PDF
#[derive(Default)]
pub struct RenderCaches {
    pub html: ContentCache<String>,
    pub pdf: ContentCache<Arc<Vec<u8>>>,
}

impl RenderCaches {
    pub fn invalidate(&self, guidebook_id: &str) {
        let removed = self.html.invalidate(guidebook_id) + self.pdf.invalidate(guidebook_id);
        if removed > 0 {
            tracing::debug!("🧹 Dropped {} cached renders for {}", removed, guidebook_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_and_content_addressed() {
        let a = ContentCache::<String>::key("gb-1", "web", "input");
        let b = ContentCache::<String>::key("gb-1", "web", "input");
        let c = ContentCache::<String>::key("gb-1", "web", "other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("gb-1:web:"));
        assert_eq!(a.len(), "gb-1:web:".len() + 64);
    }

    #[test]
    fn test_invalidate_only_touches_prefix() {
        let cache = ContentCache::new();
        cache.insert(ContentCache::<String>::key("gb-1", "web", "x"), "one".to_string());
        cache.insert(ContentCache::<String>::key("gb-1", "pdf", "x"), "two".to_string());
        cache.insert(ContentCache::<String>::key("gb-10", "web", "x"), "three".to_string());

        assert_eq!(cache.invalidate("gb-1"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&ContentCache::<String>::key("gb-10", "web", "x")).as_deref(),
            Some("three")
        );
    }

    #[test]
    fn test_render_caches_invalidate_both() {
        let caches = RenderCaches::default();
        caches.html.insert("gb-1:web:a".into(), "<html>".into());
        caches.pdf.insert("gb-1:pdf:a".into(), Arc::new(vec![1, 2]));

        caches.invalidate("gb-1");
        assert!(caches.html.is_empty());
        assert!(caches.pdf.is_empty());
    }
}
