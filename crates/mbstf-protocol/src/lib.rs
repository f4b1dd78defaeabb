//! Wire types for the `nmbstf-distsession` HTTP API: request/response
//! bodies and the RFC 9457 problem details used for errors. No behavior
//! lives here — just serde shapes shared between the service and the core
//! engine.

mod dist_session;
mod problem;

pub use dist_session::{
    CreateReqData, CreateRspData, DistSession, IpAddr, ObjAcquisitionMethod, ObjDistributionData,
    ObjDistributionOperatingMode, UpTrafficFlowInfo,
};
pub use problem::{InvalidParam, ProblemDetails};
