use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::StatusCode;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{sort_by_policy, IngestItem};
use crate::headers::HeaderBag;
use crate::store::{Metadata, ObjectStore};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const EMPTY_QUEUE_POLL: Duration = Duration::from_millis(500);

struct Inner {
    queue: Vec<IngestItem>,
}

/// Worker over a prioritised fetch queue: HTTP GET with conditional
/// refetch, a per-item deadline, and a 10s default network timeout.
pub struct PullObjectIngester {
    store: Arc<ObjectStore>,
    inner: Mutex<Inner>,
    notify: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PullObjectIngester {
    pub fn start(
        store: Arc<ObjectStore>,
        client: reqwest::Client,
        default_object_max_age: Duration,
    ) -> Arc<Self> {
        let ingester = Arc::new(Self {
            store: store.clone(),
            inner: Mutex::new(Inner { queue: Vec::new() }),
            notify: Notify::new(),
            handle: Mutex::new(None),
        });

        let worker = ingester.clone();
        let handle = tokio::spawn(async move {
            loop {
                let item = {
                    let mut inner = worker.inner.lock().unwrap();
                    if inner.queue.is_empty() {
                        None
                    } else {
                        Some(inner.queue.remove(0))
                    }
                };
                let Some(item) = item else {
                    let _ = tokio::time::timeout(EMPTY_QUEUE_POLL, worker.notify.notified()).await;
                    continue;
                };
                do_ingest(&store, &client, item, default_object_max_age).await;
            }
        });
        *ingester.handle.lock().unwrap() = Some(handle);
        ingester
    }

    /// Queue a brand-new or refetch `IngestItem`; update in place if the
    /// object id is already queued, otherwise append; the queue is always
    /// re-sorted by policy afterwards.
    pub fn fetch_item(&self, item: IngestItem) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.queue.iter_mut().find(|i| i.object_id == item.object_id) {
            *existing = item;
        } else {
            inner.queue.push(item);
        }
        sort_by_policy(&mut inner.queue);
        drop(inner);
        self.notify.notify_one();
    }

    /// Re-queue an already-stored object for refetch by a given deadline,
    /// or just update its deadline if it is already queued.
    pub fn fetch(&self, object_id: &str, deadline: SystemTime) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(existing) = inner.queue.iter_mut().find(|i| i.object_id == object_id) {
                existing.deadline = Some(deadline);
                sort_by_policy(&mut inner.queue);
                drop(inner);
                self.notify.notify_one();
                return;
            }
        }
        if let Ok(meta) = self.store.get_metadata(object_id) {
            let url = meta.fetched_url.or(meta.original_url).unwrap_or_default();
            let item = IngestItem::new(object_id, url, meta.acquisition_id.unwrap_or_default())
                .with_deadline(deadline);
            self.fetch_item(item);
        }
    }
}

impl Drop for PullObjectIngester {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn do_ingest(
    store: &ObjectStore,
    client: &reqwest::Client,
    item: IngestItem,
    default_object_max_age: Duration,
) {
    if let Some(deadline) = item.deadline {
        if SystemTime::now() > deadline {
            debug!(object_id = %item.object_id, "deadline elapsed before fetch, skipping network call");
            return;
        }
    }

    let existing = store.get_metadata(&item.object_id).ok();
    let remaining = item
        .deadline
        .and_then(|d| d.duration_since(SystemTime::now()).ok());
    let timeout = remaining.map_or(DEFAULT_TIMEOUT, |r| r.min(DEFAULT_TIMEOUT));

    let mut request = client.get(&item.url).timeout(timeout);
    if let Some(meta) = &existing {
        if let Some(etag) = &meta.entity_tag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        request = request.header(IF_MODIFIED_SINCE, http_date(meta.modified));
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) if e.is_timeout() => {
            warn!(object_id = %item.object_id, "pull fetch timed out");
            return;
        }
        Err(e) => {
            warn!(object_id = %item.object_id, error = %e, "pull fetch failed");
            return;
        }
    };

    let response_headers = header_bag(response.headers());

    if response.status() == StatusCode::NOT_MODIFIED {
        let cache_expires = cache_expires_from_headers(&response_headers, default_object_max_age);
        if let Err(e) = store.refresh_cache(&item.object_id, cache_expires, SystemTime::now()) {
            warn!(object_id = %item.object_id, error = %e, "304 refresh of unknown object");
        }
        return;
    }

    if !response.status().is_success() {
        warn!(object_id = %item.object_id, status = %response.status(), "pull fetch returned non-success status");
        return;
    }

    let content_type = response_headers.get("content-type").map(str::to_string);
    let etag = response_headers.get("etag").map(str::to_string);
    let cache_expires = cache_expires_from_headers(&response_headers, default_object_max_age);
    let fetched_url = response.url().to_string();

    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!(object_id = %item.object_id, error = %e, "failed reading pull response body");
            return;
        }
    };

    let mut metadata = Metadata::new(item.object_id.clone());
    metadata.media_type = content_type;
    metadata.original_url = Some(item.url.clone());
    metadata.fetched_url = Some(fetched_url);
    metadata.acquisition_id = Some(item.acquisition_id.clone());
    metadata.obj_ingest_base_url = item.obj_ingest_base_url.clone();
    metadata.obj_distribution_base_url = item.obj_distribution_base_url.clone();
    metadata.entity_tag = etag;
    metadata.cache_expires = cache_expires;
    if let Some(existing) = &existing {
        metadata.file_description = existing.file_description.clone();
    }

    store.add(&item.object_id, body.to_vec(), metadata);
}

fn http_date(time: SystemTime) -> String {
    let dt: DateTime<Utc> = time.into();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Convert a `reqwest` response header map into the engine's case-insensitive
/// [`HeaderBag`], so downstream field reads don't depend on transport-crate
/// header types.
fn header_bag(headers: &reqwest::header::HeaderMap) -> HeaderBag {
    let mut bag = HeaderBag::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            bag.insert(name.as_str(), v.to_string());
        }
    }
    bag
}

fn cache_expires_from_headers(headers: &HeaderBag, default_max_age: Duration) -> Option<SystemTime> {
    let max_age = headers
        .get("cache-control")
        .and_then(parse_max_age)
        .map(Duration::from_secs)
        .unwrap_or(default_max_age);
    Some(SystemTime::now() + max_age)
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        directive
            .strip_prefix("max-age=")
            .and_then(|v| v.parse::<u64>().ok())
    })
}
