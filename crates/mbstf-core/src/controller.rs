use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mbstf_protocol::{DistSession, ObjAcquisitionMethod, ObjDistributionOperatingMode};
use tracing::{error, info, warn};

use crate::bitrate::BitRate;
use crate::error::CoreError;
use crate::event::{CoreEvent, EventEnvelope, Subscriber, SubscriptionService};
use crate::ingest::pull::PullObjectIngester;
use crate::ingest::push::PushObjectIngester;
use crate::ingest::IngestItem;
use crate::manifest::ManifestHandlerFactory;
use crate::packager::{ObjectListPackager, PackageItem, TransmitterConfig, UdpTransmitter};
use crate::store::ObjectStore;

const DEFAULT_MTU: usize = 1500;

/// Everything a controller constructor needs to decide whether it applies
/// to a session and, if so, to wire itself up. `session` is shared with the
/// registry so a controller can write back values it derives at
/// construction time (e.g. the ingest server prefix a `PushObjectIngester`
/// bound to).
#[derive(Clone)]
pub struct ControllerBuildContext {
    pub store: Arc<ObjectStore>,
    pub http_client: reqwest::Client,
    pub session: Arc<Mutex<DistSession>>,
    pub default_object_max_age: Duration,
    pub manifest_handlers: Arc<ManifestHandlerFactory>,
}

/// A running session controller. Holding one alive keeps its owned
/// ingesters/packager alive; dropping it aborts their worker tasks (each of
/// those types aborts its own `JoinHandle` in `Drop`).
pub trait Controller: Send + Sync {
    fn kind(&self) -> &'static str;
}

/// `Ok(None)` means "not applicable to this session, try the next
/// constructor"; `Err` is fatal and aborts the whole factory call. This
/// replaces the original's non-`runtime_error`-vs-`runtime_error` exception
/// split with a typed result.
pub type ControllerConstructorFn =
    fn(&ControllerBuildContext) -> Result<Option<Box<dyn Controller>>, CoreError>;

/// Priority-ordered list of controller constructors, tried highest priority
/// first.
pub struct ControllerFactory {
    entries: Vec<(i32, ControllerConstructorFn)>,
}

impl ControllerFactory {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_default_controllers() -> Self {
        let mut factory = Self::new();
        factory.register(200, make_object_streaming_controller);
        factory.register(100, make_object_manifest_controller);
        factory.register(0, make_object_list_controller);
        factory
    }

    pub fn register(&mut self, priority: i32, ctor: ControllerConstructorFn) {
        self.entries.push((priority, ctor));
        self.entries.sort_by_key(|(p, _)| std::cmp::Reverse(*p));
    }

    pub fn make_controller(
        &self,
        ctx: &ControllerBuildContext,
    ) -> Result<Option<Box<dyn Controller>>, CoreError> {
        for (_, ctor) in &self.entries {
            if let Some(controller) = ctor(ctx)? {
                return Ok(Some(controller));
            }
        }
        Ok(None)
    }
}

impl Default for ControllerFactory {
    fn default() -> Self {
        Self::with_default_controllers()
    }
}

fn acquisition_method(session: &DistSession) -> Option<ObjAcquisitionMethod> {
    session.obj_distribution_data.obj_acquisition_method
}

fn operating_mode(session: &DistSession) -> Option<ObjDistributionOperatingMode> {
    session.obj_distribution_data.obj_distribution_operating_mode
}

fn dest_ipv4(session: &DistSession) -> Option<Ipv4Addr> {
    session
        .up_traffic_flow_info
        .as_ref()
        .and_then(|u| u.dest_ip_addr.ipv4_addr.as_deref())
        .and_then(|s| s.parse().ok())
}

fn port_number(session: &DistSession) -> u16 {
    session.up_traffic_flow_info.as_ref().map_or(0, |u| u.port_number)
}

fn rate_limit_bps(session: &DistSession) -> Result<f64, CoreError> {
    match &session.mbr {
        Some(mbr) => BitRate::parse(mbr).map(BitRate::bits_per_second),
        None => Ok(0.0),
    }
}

fn build_transmitter_config(session: &DistSession) -> Result<TransmitterConfig, CoreError> {
    let dest_ip_addr = dest_ipv4(session).unwrap_or(Ipv4Addr::UNSPECIFIED);
    Ok(TransmitterConfig {
        dest_ip_addr,
        port: port_number(session),
        rate_limit_bps: rate_limit_bps(session)?,
        mtu: DEFAULT_MTU,
        tunnel: None,
    })
}

fn trim_slashes(path: &str) -> &str {
    path.trim_matches('/')
}

/// Joins `base` (an ingest base URL) with a pull acquisition id, matching
/// the original's "reject absolute URLs when a base is set, otherwise
/// prefix-join" rule.
fn join_ingest_url(base: Option<&str>, acquisition_id: &str) -> Option<String> {
    match base {
        None => Some(acquisition_id.to_string()),
        Some(base) => {
            if acquisition_id.starts_with("http:")
                || acquisition_id.starts_with("https:")
                || acquisition_id.starts_with("//")
            {
                warn!(
                    acquisition_id,
                    "ignoring absolute pull URL when objIngestBaseUrl is set"
                );
                None
            } else {
                let mut joined = base.trim_end_matches('/').to_string();
                joined.push('/');
                joined.push_str(trim_slashes(acquisition_id));
                Some(joined)
            }
        }
    }
}

/// Subscriber that feeds every `ObjectAdded` event straight into an
/// [`ObjectListPackager`]'s queue.
struct PackageOnAdd {
    packager: Arc<ObjectListPackager>,
}

impl Subscriber for PackageOnAdd {
    fn process_event(&self, envelope: &EventEnvelope, _bus: &SubscriptionService) {
        if let CoreEvent::ObjectAdded { object_id } = envelope.event() {
            self.packager.add(PackageItem::new(object_id.clone()));
        }
    }
}

/// Handles `ObjDistributionOperatingMode::Collection`: ingests an
/// unstructured list of objects (by pull or push) and packages every one
/// that arrives.
pub struct ObjectListController {
    _pull_ingester: Option<Arc<PullObjectIngester>>,
    _push_ingester: Option<Arc<PushObjectIngester>>,
    _packager: Arc<ObjectListPackager>,
    _subscriber: Arc<dyn Subscriber>,
}

impl Controller for ObjectListController {
    fn kind(&self) -> &'static str {
        "ObjectListController"
    }
}

fn make_object_list_controller(
    ctx: &ControllerBuildContext,
) -> Result<Option<Box<dyn Controller>>, CoreError> {
    let session = ctx.session.lock().unwrap().clone();
    if operating_mode(&session) != Some(ObjDistributionOperatingMode::Collection) {
        return Ok(None);
    }

    let transmitter_config = build_transmitter_config(&session)?;
    let transmitter = UdpTransmitter::new(&transmitter_config)
        .map_err(|e| CoreError::SessionConfigError(format!("failed to bind transmitter: {e}")))?;
    let packager = ObjectListPackager::start(
        ctx.store.clone(),
        ctx.store.bus().clone(),
        Box::new(transmitter),
        ctx.default_object_max_age,
    );

    let subscriber: Arc<dyn Subscriber> = Arc::new(PackageOnAdd {
        packager: packager.clone(),
    });
    ctx.store.bus().subscribe_names(&["ObjectAdded"], subscriber.clone());

    let (pull_ingester, push_ingester) = match acquisition_method(&session) {
        Some(ObjAcquisitionMethod::Pull) => {
            let ingester = PullObjectIngester::start(
                ctx.store.clone(),
                ctx.http_client.clone(),
                ctx.default_object_max_age,
            );
            let ingest_base = session.obj_distribution_data.obj_ingest_base_url.as_deref();
            let dist_base = session.obj_distribution_data.obj_distribution_base_url.clone();
            for acquisition_id in &session.obj_distribution_data.obj_acquisition_ids_pull {
                let Some(url) = join_ingest_url(ingest_base, acquisition_id) else {
                    continue;
                };
                let mut item = IngestItem::new(uuid::Uuid::new_v4().to_string(), url, acquisition_id.clone());
                item.obj_ingest_base_url = ingest_base.map(str::to_string);
                item.obj_distribution_base_url = dist_base.clone();
                ingester.fetch_item(item);
            }
            (Some(ingester), None)
        }
        Some(ObjAcquisitionMethod::Push) => {
            let ingester = PushObjectIngester::start(
                ctx.store.clone(),
                ctx.store.bus().clone(),
                None,
                ctx.default_object_max_age,
            )
            .map_err(|e| CoreError::SessionConfigError(format!("failed to start push ingester: {e}")))?;
            ctx.session.lock().unwrap().obj_distribution_data.obj_ingest_base_url =
                Some(ingester.ingest_server_prefix().to_string());
            (None, Some(ingester))
        }
        None => {
            return Err(CoreError::SessionConfigError(
                "objAcquisitionMethod is required".to_string(),
            ))
        }
    };

    info!(dist_session_id = %session.dist_session_id, "ObjectListController constructed");
    Ok(Some(Box::new(ObjectListController {
        _pull_ingester: pull_ingester,
        _push_ingester: push_ingester,
        _packager: packager,
        _subscriber: subscriber,
    })))
}

/// Validates a STREAMING session's acquisition parameters: exactly one pull
/// URL, or a push id defaulted to `"manifest"` when acquiring by push.
fn validate_streaming_acquisition(session: &mut DistSession) -> Result<(), CoreError> {
    match acquisition_method(session) {
        Some(ObjAcquisitionMethod::Pull) => {
            if session.obj_distribution_data.obj_acquisition_ids_pull.len() != 1 {
                return Err(CoreError::SessionConfigError(
                    "objAcquisitionIdsPull must contain exactly one item for STREAMING mode".to_string(),
                ));
            }
        }
        Some(ObjAcquisitionMethod::Push) => {
            if session.obj_distribution_data.entry_point_path.is_none() {
                session.obj_distribution_data.entry_point_path = Some("manifest".to_string());
            }
        }
        None => {
            return Err(CoreError::SessionConfigError(
                "objAcquisitionMethod is required".to_string(),
            ))
        }
    }
    Ok(())
}

/// Subscriber that rejects a push upload whose URL path doesn't match the
/// manifest's expected push id.
struct ValidatePushUrl {
    expected_path: String,
}

impl Subscriber for ValidatePushUrl {
    fn process_event(&self, envelope: &EventEnvelope, _bus: &SubscriptionService) {
        if let CoreEvent::ObjectPushStart { request } = envelope.event() {
            let expected = self.expected_path.trim_start_matches('/');
            let actual = request.url_path().trim_start_matches('/');
            if expected != actual {
                request.set_error(400, "Bad Request");
                envelope.set_prevent_default();
            }
        }
    }
}

/// Subscriber that reparses the manifest object on every `ObjectAdded` for
/// its object id, scheduling whatever ingest items the handler derives.
struct ManifestUpdateOnAdd {
    manifest_object_id: String,
    store: Arc<ObjectStore>,
    pull_ingester: Arc<PullObjectIngester>,
    handler: Arc<dyn crate::manifest::ManifestHandler>,
}

impl Subscriber for ManifestUpdateOnAdd {
    fn process_event(&self, envelope: &EventEnvelope, _bus: &SubscriptionService) {
        let CoreEvent::ObjectAdded { object_id } = envelope.event() else {
            return;
        };
        if *object_id != self.manifest_object_id {
            return;
        }
        let (data, metadata) = match (
            self.store.get_data(object_id),
            self.store.get_metadata(object_id),
        ) {
            (Ok(d), Ok(m)) => (d, m),
            _ => return,
        };
        match self.handler.update(&data, &metadata) {
            Ok(changed) => {
                if changed {
                    let (_, items) = self.handler.next_ingest_items();
                    for item in items {
                        self.pull_ingester.fetch_item(item);
                    }
                }
            }
            Err(e) => error!(object_id, error = %e, "manifest update failed"),
        }
    }
}

/// Handles `ObjDistributionOperatingMode::Streaming`: ingests the manifest
/// object itself, then schedules the segments it describes.
pub struct ObjectManifestController {
    _pull_ingester: Option<Arc<PullObjectIngester>>,
    _push_ingester: Option<Arc<PushObjectIngester>>,
    _packager: Arc<ObjectListPackager>,
    _subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Controller for ObjectManifestController {
    fn kind(&self) -> &'static str {
        "ObjectManifestController"
    }
}

fn make_object_manifest_controller(
    ctx: &ControllerBuildContext,
) -> Result<Option<Box<dyn Controller>>, CoreError> {
    let mut session = ctx.session.lock().unwrap().clone();
    if operating_mode(&session) != Some(ObjDistributionOperatingMode::Streaming) {
        return Ok(None);
    }
    validate_streaming_acquisition(&mut session)?;
    *ctx.session.lock().unwrap() = session.clone();

    let transmitter_config = build_transmitter_config(&session)?;
    let transmitter = UdpTransmitter::new(&transmitter_config)
        .map_err(|e| CoreError::SessionConfigError(format!("failed to bind transmitter: {e}")))?;
    let packager = ObjectListPackager::start(
        ctx.store.clone(),
        ctx.store.bus().clone(),
        Box::new(transmitter),
        ctx.default_object_max_age,
    );

    let mut subscribers: Vec<Arc<dyn Subscriber>> = Vec::new();
    let package_subscriber: Arc<dyn Subscriber> = Arc::new(PackageOnAdd {
        packager: packager.clone(),
    });
    ctx.store.bus().subscribe_names(&["ObjectAdded"], package_subscriber.clone());
    subscribers.push(package_subscriber);

    const MANIFEST_MEDIA_TYPE: &str = "application/dash+xml";
    let handler: Arc<dyn crate::manifest::ManifestHandler> = ctx
        .manifest_handlers
        .make_handler(MANIFEST_MEDIA_TYPE)
        .ok_or_else(|| {
            CoreError::SessionConfigError(format!("no manifest handler for {MANIFEST_MEDIA_TYPE}"))
        })?
        .into();

    let pull_ingester = PullObjectIngester::start(
        ctx.store.clone(),
        ctx.http_client.clone(),
        ctx.default_object_max_age,
    );

    let (manifest_object_id, push_ingester) = match acquisition_method(&session) {
        Some(ObjAcquisitionMethod::Pull) => {
            let acquisition_id = session.obj_distribution_data.obj_acquisition_ids_pull[0].clone();
            let ingest_base = session.obj_distribution_data.obj_ingest_base_url.as_deref();
            let dist_base = session.obj_distribution_data.obj_distribution_base_url.clone();
            let url = join_ingest_url(ingest_base, &acquisition_id).ok_or_else(|| {
                CoreError::SessionConfigError("invalid objAcquisitionIdsPull entry".to_string())
            })?;
            let manifest_object_id = uuid::Uuid::new_v4().to_string();
            let mut item = IngestItem::new(manifest_object_id.clone(), url, acquisition_id);
            item.obj_ingest_base_url = ingest_base.map(str::to_string);
            item.obj_distribution_base_url = dist_base;
            pull_ingester.fetch_item(item);
            (manifest_object_id, None)
        }
        Some(ObjAcquisitionMethod::Push) => {
            let push_ingester = PushObjectIngester::start(
                ctx.store.clone(),
                ctx.store.bus().clone(),
                None,
                ctx.default_object_max_age,
            )
            .map_err(|e| CoreError::SessionConfigError(format!("failed to start push ingester: {e}")))?;
            ctx.session.lock().unwrap().obj_distribution_data.obj_ingest_base_url =
                Some(push_ingester.ingest_server_prefix().to_string());
            let expected_path = session
                .obj_distribution_data
                .entry_point_path
                .clone()
                .unwrap_or_else(|| "manifest".to_string());
            let validate_subscriber: Arc<dyn Subscriber> = Arc::new(ValidatePushUrl {
                expected_path: expected_path.clone(),
            });
            ctx.store.bus().subscribe_names(&["ObjectPushStart"], validate_subscriber.clone());
            subscribers.push(validate_subscriber);
            (expected_path, Some(push_ingester))
        }
        None => unreachable!("validated above"),
    };

    let manifest_subscriber: Arc<dyn Subscriber> = Arc::new(ManifestUpdateOnAdd {
        manifest_object_id,
        store: ctx.store.clone(),
        pull_ingester: pull_ingester.clone(),
        handler,
    });
    ctx.store.bus().subscribe_names(&["ObjectAdded"], manifest_subscriber.clone());
    subscribers.push(manifest_subscriber);

    info!(dist_session_id = %session.dist_session_id, "ObjectManifestController constructed");
    Ok(Some(Box::new(ObjectManifestController {
        _pull_ingester: Some(pull_ingester),
        _push_ingester: push_ingester,
        _packager: packager,
        _subscribers: subscribers,
    })))
}

/// The original's `ObjectStreamingController` subclasses the manifest
/// controller and adds no additional behavior beyond initiating ingestion
/// of the manifest object itself, which [`make_object_manifest_controller`]
/// already does directly. Registering it at a higher priority than the
/// plain manifest constructor would only matter if some sessions should
/// skip manifest scheduling while still being STREAMING; spec.md names no
/// such case, so this constructor recognises the same sessions and simply
/// delegates.
fn make_object_streaming_controller(
    ctx: &ControllerBuildContext,
) -> Result<Option<Box<dyn Controller>>, CoreError> {
    let session = ctx.session.lock().unwrap().clone();
    if operating_mode(&session) != Some(ObjDistributionOperatingMode::Streaming) {
        return Ok(None);
    }
    make_object_manifest_controller(ctx)
}
