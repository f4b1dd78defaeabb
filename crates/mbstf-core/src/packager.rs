use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::event::{CoreEvent, SubscriptionService};
use crate::store::ObjectStore;

/// Default FDT namespace advertised for every session, matching the
/// upstream FLUTE transmitter's fixed namespace.
pub const FDT_NS_DRAFT_2005: &str = "urn:ietf:params:xml:ns:fdt:draft-ietf-rmt-flute-fdt-2005";

/// Per-object transmitter descriptor, persisted on the object's `Metadata`
/// across refetches so the same content-location/TOI bookkeeping can be
/// reused rather than rebuilt from scratch.
#[derive(Debug, Clone)]
pub struct FileDescription {
    pub content_location: String,
    pub content_type: Option<String>,
    pub expires: SystemTime,
    pub etag: Option<String>,
}

/// Queue entry for the packager: an object id plus an optional deadline.
/// Ordered (has-deadline first, then deadline ascending) — identical policy
/// to [`crate::ingest::IngestItem`].
#[derive(Debug, Clone)]
pub struct PackageItem {
    pub object_id: String,
    pub deadline: Option<SystemTime>,
}

impl PackageItem {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(object_id: impl Into<String>, deadline: SystemTime) -> Self {
        Self {
            object_id: object_id.into(),
            deadline: Some(deadline),
        }
    }
}

/// Remove the queue entry for `object_id`, wherever it currently sits.
/// `add` can insert and re-sort a new, earlier-deadline item between the
/// worker peeking the head and finishing work on it, so the entry just
/// packaged is no longer guaranteed to be at index 0 by completion time.
fn remove_item(inner: &Mutex<Inner>, object_id: &str) {
    let mut inner = inner.lock().unwrap();
    if let Some(pos) = inner.queue.iter().position(|i| i.object_id == object_id) {
        inner.queue.remove(pos);
    }
}

fn sort_by_policy(items: &mut Vec<PackageItem>) {
    items.sort_by(|a, b| match (a.deadline, b.deadline) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// The external collaborator the packager feeds: accepts file descriptions
/// and reports a TOI for each. The concrete FLUTE congestion-controlled
/// wire format is out of scope; [`UdpTransmitter`] is a simplified
/// single-packet-per-MTU UDP sender that completes synchronously within
/// `send`, which keeps the "exactly one object in flight" invariant trivially
/// true rather than requiring a deferred completion callback.
pub trait Transmitter: Send {
    fn send(&mut self, data: &[u8], file: &FileDescription) -> Result<u64, CoreError>;
}

/// Configuration for constructing the concrete downstream transmitter.
#[derive(Debug, Clone)]
pub struct TransmitterConfig {
    pub dest_ip_addr: Ipv4Addr,
    pub port: u16,
    pub rate_limit_bps: f64,
    pub mtu: usize,
    pub tunnel: Option<SocketAddrV4>,
}

/// A simplified FLUTE-like transmitter: sends `data` as one or more MTU-sized
/// UDP datagrams to the configured multicast destination (or tunnel
/// endpoint), and assigns a monotonically increasing TOI per object. Real
/// FEC/congestion control is explicitly out of scope.
pub struct UdpTransmitter {
    socket: UdpSocket,
    dest: SocketAddrV4,
    mtu: usize,
    next_toi: AtomicU64,
}

impl UdpTransmitter {
    pub fn new(config: &TransmitterConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        if config.dest_ip_addr.is_multicast() {
            socket.set_multicast_ttl_v4(8)?;
        }
        let dest = config
            .tunnel
            .unwrap_or(SocketAddrV4::new(config.dest_ip_addr, config.port));
        Ok(Self {
            socket,
            dest,
            mtu: config.mtu.max(1),
            next_toi: AtomicU64::new(1),
        })
    }
}

impl Transmitter for UdpTransmitter {
    fn send(&mut self, data: &[u8], file: &FileDescription) -> Result<u64, CoreError> {
        let toi = self.next_toi.fetch_add(1, Ordering::SeqCst);
        for chunk in data.chunks(self.mtu) {
            self.socket
                .send_to(chunk, self.dest)
                .map_err(|e| CoreError::Internal(format!("flute send failed: {e}")))?;
        }
        debug!(
            toi,
            location = %file.content_location,
            bytes = data.len(),
            "packaged object sent"
        );
        Ok(toi)
    }
}

struct Inner {
    queue: Vec<PackageItem>,
}

/// Single-threaded worker over a prioritised [`PackageItem`] queue, feeding
/// one outstanding object at a time to the [`Transmitter`].
pub struct ObjectListPackager {
    inner: Mutex<Inner>,
    notify: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ObjectListPackager {
    pub fn start(
        store: Arc<ObjectStore>,
        bus: SubscriptionService,
        mut transmitter: Box<dyn Transmitter>,
        default_object_max_age: Duration,
    ) -> Arc<Self> {
        let packager = Arc::new(Self {
            inner: Mutex::new(Inner { queue: Vec::new() }),
            notify: Notify::new(),
            handle: Mutex::new(None),
        });

        let worker_packager = packager.clone();
        let handle = tokio::spawn(async move {
            loop {
                let item = {
                    let inner = worker_packager.inner.lock().unwrap();
                    inner.queue.first().cloned()
                };
                let Some(item) = item else {
                    worker_packager.notify.notified().await;
                    continue;
                };

                match package_one(&store, &item, transmitter.as_mut(), default_object_max_age) {
                    Ok(()) => {
                        remove_item(&worker_packager.inner, &item.object_id);
                        bus.send_asynchronous(CoreEvent::ObjectSendCompleted {
                            object_id: item.object_id.clone(),
                        });
                    }
                    Err(e) => {
                        warn!(object_id = %item.object_id, error = %e, "packaging failed, dropping item");
                        remove_item(&worker_packager.inner, &item.object_id);
                    }
                }
            }
        });
        *packager.handle.lock().unwrap() = Some(handle);
        packager
    }

    /// Enqueue an item, callable from any thread; restores deadline ordering.
    pub fn add(&self, item: PackageItem) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push(item);
        sort_by_policy(&mut inner.queue);
        drop(inner);
        self.notify.notify_one();
    }
}

impl Drop for ObjectListPackager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn package_one(
    store: &ObjectStore,
    item: &PackageItem,
    transmitter: &mut dyn Transmitter,
    default_object_max_age: Duration,
) -> Result<(), CoreError> {
    let data = store.get_data(&item.object_id)?;
    let metadata = store.get_metadata(&item.object_id)?;

    let content_location = advertised_location(&metadata);
    let expires = metadata
        .cache_expires
        .unwrap_or_else(|| SystemTime::now() + default_object_max_age);

    // Recompute the FileDescription's mutable fields; it is written back
    // onto the object's Metadata below so a later refetch of the same
    // object id sees it persisted, matching the original's reuse-or-create
    // behavior without needing a second, aliased owner of the same value.
    let file_description = FileDescription {
        content_location,
        content_type: metadata.media_type.clone(),
        expires,
        etag: metadata.entity_tag.clone(),
    };

    transmitter.send(&data, &file_description)?;
    store.set_file_description(&item.object_id, file_description)?;
    Ok(())
}

/// If the object was fetched from the ingest base URL, advertise it under
/// the distribution base URL instead; otherwise advertise the fetched URL
/// as-is.
fn advertised_location(metadata: &crate::store::Metadata) -> String {
    if let (Some(ingest_base), Some(dist_base), Some(fetched)) = (
        metadata.obj_ingest_base_url.as_deref(),
        metadata.obj_distribution_base_url.as_deref(),
        metadata.fetched_url.as_deref(),
    ) {
        if let Some(suffix) = fetched.strip_prefix(ingest_base) {
            return format!("{}{}", dist_base.trim_end_matches('/'), suffix);
        }
    }
    metadata
        .fetched_url
        .clone()
        .unwrap_or_else(|| metadata.object_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_item_removes_by_object_id_not_position() {
        let inner = Mutex::new(Inner {
            queue: vec![PackageItem::new("a"), PackageItem::new("b")],
        });
        // Simulate `add` having pushed a new head between peek and completion:
        // the item actually packaged ("a") now sits behind "b" in the queue.
        {
            let mut locked = inner.lock().unwrap();
            locked.queue.swap(0, 1);
        }
        remove_item(&inner, "a");
        let remaining: Vec<_> = inner.lock().unwrap().queue.iter().map(|i| i.object_id.clone()).collect();
        assert_eq!(remaining, vec!["b".to_string()]);
    }

    #[test]
    fn deadline_items_sort_before_deadline_less_items() {
        let mut items = vec![
            PackageItem::new("no-deadline"),
            PackageItem::with_deadline("later", SystemTime::now() + Duration::from_secs(10)),
            PackageItem::with_deadline("sooner", SystemTime::now() + Duration::from_secs(1)),
        ];
        sort_by_policy(&mut items);
        assert_eq!(items[0].object_id, "sooner");
        assert_eq!(items[1].object_id, "later");
        assert_eq!(items[2].object_id, "no-deadline");
    }

    #[test]
    fn advertised_location_substitutes_distribution_base() {
        let mut meta = crate::store::Metadata::new("a");
        meta.obj_ingest_base_url = Some("http://ingest/".into());
        meta.obj_distribution_base_url = Some("http://dist/".into());
        meta.fetched_url = Some("http://ingest/clip.mp4".into());
        assert_eq!(advertised_location(&meta), "http://dist/clip.mp4");
    }

    #[test]
    fn advertised_location_falls_back_to_fetched_url() {
        let mut meta = crate::store::Metadata::new("a");
        meta.fetched_url = Some("http://origin/a".into());
        assert_eq!(advertised_location(&meta), "http://origin/a");
    }
}
