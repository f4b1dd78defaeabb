use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use mbstf_protocol::{CreateReqData, DistSession};
use tracing::info;
use uuid::Uuid;

use crate::controller::{Controller, ControllerBuildContext, ControllerFactory};
use crate::error::{CoreError, CoreResult};
use crate::manifest::ManifestHandlerFactory;
use crate::store::ObjectStore;

/// One live distribution session: the (mutable, controller-writable) wire
/// representation plus the controller keeping its ingesters/packager
/// alive. The entity tag is computed once, over the exact bytes the client
/// sent to create the session — not a re-serialization of it — so it
/// changes only when the client actually submits a new body.
pub struct DistributionSession {
    pub id: Uuid,
    session: Arc<Mutex<DistSession>>,
    pub etag: String,
    pub created_at: SystemTime,
    _controller: Mutex<Option<Box<dyn Controller>>>,
}

impl DistributionSession {
    /// A clone of the current wire representation, safe to serialize for a
    /// GET response.
    pub fn snapshot(&self) -> DistSession {
        self.session.lock().unwrap().clone()
    }
}

/// In-memory registry of live sessions, keyed by id. Construction wires a
/// new session's controller via the registry's [`ControllerFactory`];
/// destruction (via `delete`) drops the controller, which tears down its
/// ingesters and packager.
pub struct SessionRegistry {
    store: Arc<ObjectStore>,
    http_client: reqwest::Client,
    controller_factory: Arc<ControllerFactory>,
    manifest_handlers: Arc<ManifestHandlerFactory>,
    default_object_max_age: Duration,
    sessions: Mutex<HashMap<Uuid, Arc<DistributionSession>>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<ObjectStore>,
        http_client: reqwest::Client,
        controller_factory: Arc<ControllerFactory>,
        manifest_handlers: Arc<ManifestHandlerFactory>,
        default_object_max_age: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            http_client,
            controller_factory,
            manifest_handlers,
            default_object_max_age,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Validate and build a new session from `request`, hashing `raw_body`
    /// (the exact bytes received, before any re-serialization) for its
    /// entity tag.
    pub fn create(&self, raw_body: &[u8], request: CreateReqData) -> CoreResult<Arc<DistributionSession>> {
        let id = Uuid::new_v4();
        let session = Arc::new(Mutex::new(DistSession::new(id, request)));

        let ctx = ControllerBuildContext {
            store: self.store.clone(),
            http_client: self.http_client.clone(),
            session: session.clone(),
            default_object_max_age: self.default_object_max_age,
            manifest_handlers: self.manifest_handlers.clone(),
        };
        let controller = self
            .controller_factory
            .make_controller(&ctx)?
            .ok_or_else(|| {
                CoreError::SessionConfigError(
                    "no controller matched this session's distribution mode/acquisition method".to_string(),
                )
            })?;

        let etag = crate::hash::sha256_hex(raw_body);
        let dist_session = Arc::new(DistributionSession {
            id,
            session,
            etag,
            created_at: SystemTime::now(),
            _controller: Mutex::new(Some(controller)),
        });
        self.sessions.lock().unwrap().insert(id, dist_session.clone());
        info!(dist_session_id = %id, "distribution session created");
        Ok(dist_session)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<DistributionSession>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Remove and drop the session's controller, tearing down its ingesters
    /// and packager. Returns `false` if the id was not present.
    pub fn delete(&self, id: Uuid) -> bool {
        let removed = self.sessions.lock().unwrap().remove(&id);
        if removed.is_some() {
            info!(dist_session_id = %id, "distribution session deleted");
        }
        removed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbstf_protocol::{ObjAcquisitionMethod, ObjDistributionData, ObjDistributionOperatingMode};

    fn collection_pull_request() -> CreateReqData {
        CreateReqData {
            obj_distribution_data: ObjDistributionData {
                obj_distribution_operating_mode: Some(ObjDistributionOperatingMode::Collection),
                obj_acquisition_method: Some(ObjAcquisitionMethod::Pull),
                obj_acquisition_ids_pull: vec!["http://origin/a.mp4".to_string()],
                ..Default::default()
            },
            up_traffic_flow_info: None,
            mbr: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_then_delete_round_trips() {
        let registry = SessionRegistry::new(
            ObjectStore::new(),
            reqwest::Client::new(),
            Arc::new(ControllerFactory::with_default_controllers()),
            Arc::new(ManifestHandlerFactory::with_default_handlers()),
            Duration::from_secs(600),
        );

        let body = b"{\"objDistributionData\":{}}";
        let session = registry.create(body, collection_pull_request()).unwrap();
        let id = session.id;

        assert!(registry.get(id).is_some());
        assert_eq!(session.etag, crate::hash::sha256_hex(body));
        assert!(registry.delete(id));
        assert!(registry.get(id).is_none());
        assert!(!registry.delete(id));
    }

    #[tokio::test]
    async fn create_rejects_session_with_no_acquisition_method() {
        let registry = SessionRegistry::new(
            ObjectStore::new(),
            reqwest::Client::new(),
            Arc::new(ControllerFactory::with_default_controllers()),
            Arc::new(ManifestHandlerFactory::with_default_handlers()),
            Duration::from_secs(600),
        );
        let request = CreateReqData {
            obj_distribution_data: ObjDistributionData {
                obj_distribution_operating_mode: Some(ObjDistributionOperatingMode::Collection),
                ..Default::default()
            },
            up_traffic_flow_info: None,
            mbr: None,
        };
        assert!(registry.create(b"{}", request).is_err());
    }
}
