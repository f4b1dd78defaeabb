use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Convert an axum request header map into the engine's case-insensitive
/// [`HeaderBag`], so `PushRequestHandle` subscribers don't depend on axum's
/// header types.
fn header_bag_from_axum(headers: &HeaderMap) -> HeaderBag {
    let mut bag = HeaderBag::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            bag.insert(name.as_str(), v.to_string());
        }
    }
    bag
}

fn bind_ephemeral() -> std::io::Result<std::net::TcpListener> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", 0))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

use crate::event::{CoreEvent, SubscriptionService};
use crate::headers::HeaderBag;
use crate::store::{Metadata, ObjectStore};

/// Uploads larger than this are rejected outright; the body is never
/// inserted into the store.
pub const MAX_PUSH_BODY_BYTES: usize = 65_536;

/// A handle to one in-flight push request, given to `ObjectPushStart`
/// subscribers so they can reject the request before its body is read.
#[derive(Debug)]
pub struct PushRequestHandle {
    url_path: String,
    headers: HeaderBag,
    error: Mutex<Option<(StatusCode, String)>>,
}

impl PushRequestHandle {
    fn new(url_path: String, headers: HeaderBag) -> Self {
        Self {
            url_path,
            headers,
            error: Mutex::new(None),
        }
    }

    pub fn url_path(&self) -> &str {
        &self.url_path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// The full set of request headers the upload arrived with.
    pub fn headers(&self) -> &HeaderBag {
        &self.headers
    }

    /// Called by a subscriber to reject the request with a specific status.
    /// Combined with `EventEnvelope::set_prevent_default`, this causes the
    /// upload server to return `status`/`reason` instead of accepting it.
    pub fn set_error(&self, status: u16, reason: impl Into<String>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
        *self.error.lock().unwrap() = Some((status, reason.into()));
    }

    fn take_error(&self) -> (StatusCode, String) {
        self.error
            .lock()
            .unwrap()
            .clone()
            .unwrap_or((StatusCode::BAD_REQUEST, "Bad Request".to_string()))
    }
}

#[derive(Clone)]
struct PushState {
    store: Arc<ObjectStore>,
    bus: SubscriptionService,
    prefix: String,
    default_object_max_age: Duration,
}

/// Embeds an HTTP upload server bound to an ephemeral port on all
/// interfaces. `start` binds before returning, so `ingest_server_prefix` is
/// known as soon as the ingester is constructed — the async equivalent of
/// the original's "blocks until bound" contract.
pub struct PushObjectIngester {
    prefix: String,
    local_addr: SocketAddr,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PushObjectIngester {
    /// Binds synchronously (so `ingest_server_prefix` is known as soon as
    /// this returns — the equivalent of the original's blocking-until-bound
    /// contract) and spawns the serving task on the caller's Tokio runtime.
    /// Must be called from within a Tokio runtime context.
    pub fn start(
        store: Arc<ObjectStore>,
        bus: SubscriptionService,
        ingest_base_url_override: Option<String>,
        default_object_max_age: Duration,
    ) -> std::io::Result<Arc<Self>> {
        let std_listener = bind_ephemeral()?;
        let local_addr = std_listener.local_addr()?;
        let listener = TcpListener::from_std(std_listener)?;
        let prefix = ingest_base_url_override.unwrap_or_else(|| format!("http://{local_addr}/"));

        let state = PushState {
            store,
            bus,
            prefix: prefix.clone(),
            default_object_max_age,
        };
        let app = Router::new().fallback(any(push_handler)).with_state(state);

        info!(%local_addr, %prefix, "push ingest server bound");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "push ingest server exited");
            }
        });

        Ok(Arc::new(Self {
            prefix,
            local_addr,
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// `http://<host>:<port>/`, the prefix to write back into the session's
    /// `objDistributionData.objIngestBaseUrl`.
    pub fn ingest_server_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PushObjectIngester {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn push_handler(
    State(state): State<PushState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if method != Method::PUT && method != Method::POST && method.as_str() != "PUSH" {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let url_path = uri.path().to_string();
    let header_bag = header_bag_from_axum(&headers);
    let content_type = header_bag.get("content-type").map(str::to_string);

    let request = Arc::new(PushRequestHandle::new(url_path.clone(), header_bag));
    let accepted = state.bus.send_synchronous(CoreEvent::ObjectPushStart {
        request: request.clone(),
    });
    if !accepted {
        let (status, reason) = request.take_error();
        return (status, reason).into_response();
    }

    let bytes = match axum::body::to_bytes(body, MAX_PUSH_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "payload exceeds push limit").into_response(),
    };

    let object_id = {
        let trimmed = url_path.trim_start_matches('/');
        if trimmed.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            trimmed.to_string()
        }
    };
    let fetched_url = format!("{}{}", state.prefix.trim_end_matches('/'), url_path);

    let mut metadata = Metadata::new(object_id.clone());
    metadata.media_type = content_type;
    metadata.original_url = Some(fetched_url.clone());
    metadata.fetched_url = Some(fetched_url);
    metadata.acquisition_id = Some(url_path.trim_start_matches('/').to_string());
    metadata.obj_ingest_base_url = Some(state.prefix.clone());
    metadata.cache_expires = Some(SystemTime::now() + state.default_object_max_age);

    state.store.add(&object_id, bytes.to_vec(), metadata);

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Subscriber;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn start_binds_ephemeral_port_and_reports_prefix() {
        let store = ObjectStore::new();
        let bus = SubscriptionService::new();
        let ingester = PushObjectIngester::start(store, bus, None, StdDuration::from_secs(600)).unwrap();
        assert_ne!(ingester.local_addr().port(), 0);
        assert!(ingester.ingest_server_prefix().starts_with("http://"));
    }

    struct RejectAll;
    impl Subscriber for RejectAll {
        fn process_event(&self, envelope: &crate::event::EventEnvelope, _bus: &SubscriptionService) {
            if let CoreEvent::ObjectPushStart { request } = envelope.event() {
                request.set_error(400, "Bad Request");
            }
            envelope.set_prevent_default();
        }
    }

    #[tokio::test]
    async fn rejecting_subscriber_prevents_object_add() {
        let store = ObjectStore::new();
        let bus = SubscriptionService::new();
        bus.subscribe(Arc::new(RejectAll));
        let ingester =
            PushObjectIngester::start(store.clone(), bus, None, StdDuration::from_secs(600)).unwrap();

        let client = reqwest::Client::new();
        let url = format!("{}clip.bin", ingester.ingest_server_prefix());
        let resp = client.put(url).body(vec![1, 2, 3]).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    struct HeaderBagChecker(Arc<Mutex<Option<String>>>);
    impl Subscriber for HeaderBagChecker {
        fn process_event(&self, envelope: &crate::event::EventEnvelope, _bus: &SubscriptionService) {
            if let CoreEvent::ObjectPushStart { request } = envelope.event() {
                *self.0.lock().unwrap() = request.headers().get("x-upload-tag").map(str::to_string);
            }
        }
    }

    #[tokio::test]
    async fn push_request_headers_are_visible_as_a_header_bag() {
        let store = ObjectStore::new();
        let bus = SubscriptionService::new();
        let seen = Arc::new(Mutex::new(None));
        bus.subscribe(Arc::new(HeaderBagChecker(seen.clone())));
        let ingester =
            PushObjectIngester::start(store, bus, None, StdDuration::from_secs(600)).unwrap();

        let client = reqwest::Client::new();
        let url = format!("{}clip.bin", ingester.ingest_server_prefix());
        client
            .put(url)
            .header("X-Upload-Tag", "abc")
            .body(vec![1, 2, 3])
            .send()
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some("abc"));
    }
}
