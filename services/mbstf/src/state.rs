use std::sync::Arc;
use std::time::Duration;

use mbstf_core::{ControllerFactory, ManifestHandlerFactory, ObjectStore, SessionRegistry};

use crate::config::Config;

/// Value rendered into the `Server` response header on every `nmbstf-distsession`
/// reply: `<serverName>/<apiRelease> (info.title=<iface>; info.version=<iface-ver>) <appName>/<appVersion>`.
pub const SERVER_NAME: &str = "mbstf";
pub const API_RELEASE: &str = "v1";
pub const INTERFACE_NAME: &str = "nmbstf-distsession";
pub const INTERFACE_VERSION: &str = "1.0.0";
pub const APP_NAME: &str = "mbstf";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn server_header_value() -> String {
    format!(
        "{SERVER_NAME}/{API_RELEASE} (info.title={INTERFACE_NAME}; info.version={INTERFACE_VERSION}) {APP_NAME}/{APP_VERSION}"
    )
}

/// Everything a request handler needs: the session registry (which itself
/// owns the object store, controller factory and manifest handler factory),
/// plus the cache-control durations the HTTP surface renders into response
/// headers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = ObjectStore::new();
        // 500ms connect deadline for object acquisition (pull fetches and
        // conditional refetches); HTTP/2 is negotiated automatically over
        // TLS via ALPN, which is as far as "preferred" goes for origins
        // reached over plain HTTP/1.1.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(500))
            .build()
            .expect("reqwest client builds with a connect timeout");
        let controller_factory = Arc::new(ControllerFactory::with_default_controllers());
        let manifest_handlers = Arc::new(ManifestHandlerFactory::with_default_handlers());

        let sessions = SessionRegistry::new(
            store,
            http_client,
            controller_factory,
            manifest_handlers,
            config.cache_control.object_max_age,
        );

        Self {
            sessions,
            config: Arc::new(config),
        }
    }
}
