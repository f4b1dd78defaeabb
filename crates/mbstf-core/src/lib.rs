//! The MBSTF engine: event bus, object store, ingesters, packager,
//! manifest handling, and the session controllers that wire them together
//! for a single distribution session.

pub mod bitrate;
pub mod controller;
pub mod error;
pub mod event;
pub mod hash;
pub mod headers;
pub mod ingest;
pub mod manifest;
pub mod packager;
pub mod session;
pub mod store;

pub use bitrate::BitRate;
pub use controller::{Controller, ControllerBuildContext, ControllerFactory};
pub use error::{CoreError, CoreResult};
pub use event::{CoreEvent, EventEnvelope, Subscriber, SubscriptionService};
pub use headers::HeaderBag;
pub use ingest::pull::PullObjectIngester;
pub use ingest::push::{PushObjectIngester, PushRequestHandle};
pub use ingest::IngestItem;
pub use manifest::{DashManifestHandler, ManifestHandler, ManifestHandlerFactory};
pub use packager::{FileDescription, ObjectListPackager, PackageItem, Transmitter, TransmitterConfig, UdpTransmitter};
pub use session::{DistributionSession, SessionRegistry};
pub use store::{Metadata, ObjectData, ObjectStore};
