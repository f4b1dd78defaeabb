use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::{CoreError, CoreResult};
use crate::event::{CoreEvent, SubscriptionService};
use crate::packager::FileDescription;

/// The bytes of a stored object.
pub type ObjectData = Vec<u8>;

/// Everything known about a stored object besides its bytes.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub object_id: String,
    pub media_type: Option<String>,
    pub original_url: Option<String>,
    pub fetched_url: Option<String>,
    pub acquisition_id: Option<String>,
    pub obj_ingest_base_url: Option<String>,
    pub obj_distribution_base_url: Option<String>,
    pub entity_tag: Option<String>,
    pub cache_expires: Option<SystemTime>,
    pub received_time: SystemTime,
    pub created: SystemTime,
    pub modified: SystemTime,
    pub keep_after_send: bool,
    /// Persistent transmitter descriptor, carried across refetches of the
    /// same object id.
    pub file_description: Option<FileDescription>,
}

impl Metadata {
    pub fn new(object_id: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            object_id: object_id.into(),
            media_type: None,
            original_url: None,
            fetched_url: None,
            acquisition_id: None,
            obj_ingest_base_url: None,
            obj_distribution_base_url: None,
            entity_tag: None,
            cache_expires: None,
            received_time: now,
            created: now,
            modified: now,
            keep_after_send: false,
            file_description: None,
        }
    }
}

struct Object {
    data: ObjectData,
    metadata: Metadata,
}

struct Inner {
    objects: HashMap<String, Object>,
}

/// Thread-safe map from object id to (bytes, [`Metadata`]), emitting
/// `ObjectAdded`/`ObjectDeleted` events on its own bus.
pub struct ObjectStore {
    inner: Mutex<Inner>,
    bus: SubscriptionService,
}

impl ObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                objects: HashMap::new(),
            }),
            bus: SubscriptionService::new(),
        })
    }

    pub fn bus(&self) -> &SubscriptionService {
        &self.bus
    }

    /// Insert or replace an object, then emit `ObjectAdded` asynchronously
    /// once the mutation is committed.
    pub fn add(&self, object_id: &str, data: ObjectData, metadata: Metadata) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .objects
                .insert(object_id.to_string(), Object { data, metadata });
        }
        self.bus.send_asynchronous(CoreEvent::ObjectAdded {
            object_id: object_id.to_string(),
        });
    }

    pub fn get_data(&self, object_id: &str) -> CoreResult<ObjectData> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(object_id)
            .map(|o| o.data.clone())
            .ok_or_else(|| CoreError::NotFound(object_id.to_string()))
    }

    pub fn get_metadata(&self, object_id: &str) -> CoreResult<Metadata> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(object_id)
            .map(|o| o.metadata.clone())
            .ok_or_else(|| CoreError::NotFound(object_id.to_string()))
    }

    /// Remove an object, emitting `ObjectDeleted`; errors if missing.
    pub fn delete(&self, object_id: &str) -> CoreResult<()> {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            inner.objects.remove(object_id)
        };
        if removed.is_none() {
            return Err(CoreError::NotFound(object_id.to_string()));
        }
        self.bus.send_asynchronous(CoreEvent::ObjectDeleted {
            object_id: object_id.to_string(),
        });
        Ok(())
    }

    /// Silent removal, no event, boolean result.
    pub fn remove(&self, object_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.remove(object_id).is_some()
    }

    pub fn remove_many(&self, object_ids: &[String]) {
        let mut inner = self.inner.lock().unwrap();
        for id in object_ids {
            inner.objects.remove(id);
        }
    }

    pub fn is_stale(&self, object_id: &str) -> CoreResult<bool> {
        let inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get(object_id)
            .ok_or_else(|| CoreError::NotFound(object_id.to_string()))?;
        Ok(is_stale(&object.metadata))
    }

    pub fn get_stale(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .filter(|(_, o)| is_stale(&o.metadata))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn find_metadata_by_url(&self, url: &str) -> Option<Metadata> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .values()
            .find(|o| {
                o.metadata.original_url.as_deref() == Some(url)
                    || o.metadata.fetched_url.as_deref() == Some(url)
            })
            .map(|o| o.metadata.clone())
    }

    /// Refresh cache expiry / modified time in place without replacing bytes
    /// or emitting an event — the behavior a 304 Not Modified response needs
    /// (spec'd boundary: "preserves prior bytes and ETag; refreshes only
    /// cache expiry and modified time").
    pub fn refresh_cache(
        &self,
        object_id: &str,
        cache_expires: Option<SystemTime>,
        modified: SystemTime,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get_mut(object_id)
            .ok_or_else(|| CoreError::NotFound(object_id.to_string()))?;
        object.metadata.cache_expires = cache_expires;
        object.metadata.modified = modified;
        Ok(())
    }

    /// Attach (or update) the transmitter's persistent file description for
    /// an object, so future repackaging reuses it.
    pub fn set_file_description(&self, object_id: &str, file_description: FileDescription) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let object = inner
            .objects
            .get_mut(object_id)
            .ok_or_else(|| CoreError::NotFound(object_id.to_string()))?;
        object.metadata.file_description = Some(file_description);
        Ok(())
    }
}

fn is_stale(metadata: &Metadata) -> bool {
    match metadata.cache_expires {
        Some(expires) => expires < SystemTime::now(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = ObjectStore::new();
        store.add("a", b"hello".to_vec(), Metadata::new("a"));
        assert_eq!(store.get_data("a").unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = ObjectStore::new();
        assert!(matches!(store.get_data("missing"), Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = ObjectStore::new();
        assert!(matches!(store.delete("missing"), Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn stale_detection() {
        let store = ObjectStore::new();
        let mut meta = Metadata::new("a");
        meta.cache_expires = Some(SystemTime::now() - Duration::from_secs(10));
        store.add("a", b"x".to_vec(), meta);
        assert!(store.is_stale("a").unwrap());
        assert_eq!(store.get_stale(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn not_stale_without_expiry() {
        let store = ObjectStore::new();
        store.add("a", b"x".to_vec(), Metadata::new("a"));
        assert!(!store.is_stale("a").unwrap());
    }

    #[tokio::test]
    async fn find_by_original_or_fetched_url() {
        let store = ObjectStore::new();
        let mut meta = Metadata::new("a");
        meta.original_url = Some("http://origin/a".into());
        meta.fetched_url = Some("http://cdn/a".into());
        store.add("a", b"x".to_vec(), meta);
        assert!(store.find_metadata_by_url("http://origin/a").is_some());
        assert!(store.find_metadata_by_url("http://cdn/a").is_some());
        assert!(store.find_metadata_by_url("http://nope").is_none());
    }

    #[tokio::test]
    async fn refresh_cache_preserves_bytes() {
        let store = ObjectStore::new();
        let mut meta = Metadata::new("a");
        meta.entity_tag = Some("v1".into());
        store.add("a", b"hello".to_vec(), meta);
        let new_expiry = SystemTime::now() + Duration::from_secs(60);
        store.refresh_cache("a", Some(new_expiry), SystemTime::now()).unwrap();
        assert_eq!(store.get_data("a").unwrap(), b"hello".to_vec());
        assert_eq!(store.get_metadata("a").unwrap().entity_tag, Some("v1".into()));
    }
}
