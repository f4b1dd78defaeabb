use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An IPv4 or IPv6 address, carried as the wire format represents it: at
/// least one of the two fields present, never both absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpAddr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_addr: Option<String>,
}

impl IpAddr {
    pub fn v4(addr: impl Into<String>) -> Self {
        Self {
            ipv4_addr: Some(addr.into()),
            ipv6_addr: None,
        }
    }
}

/// Upstream user-plane traffic flow descriptor: the multicast/unicast
/// destination the packaged objects are sent to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpTrafficFlowInfo {
    pub dest_ip_addr: IpAddr,
    pub port_number: u16,
}

/// How objects reach the MBSTF: it fetches them (`Pull`) or a producer
/// uploads them (`Push`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjAcquisitionMethod {
    Pull,
    Push,
}

/// Whether the session distributes a flat object list or a
/// manifest-driven stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjDistributionOperatingMode {
    Collection,
    Streaming,
}

/// The `objDistributionData` block: operating mode, acquisition method,
/// and whichever mode/method-specific fields apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjDistributionData {
    pub obj_distribution_operating_mode: Option<ObjDistributionOperatingMode>,
    pub obj_acquisition_method: Option<ObjAcquisitionMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obj_acquisition_ids_pull: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_ingest_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_distribution_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point_path: Option<String>,
}

/// Body of `POST .../obj-dist-sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateReqData {
    pub obj_distribution_data: ObjDistributionData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_traffic_flow_info: Option<UpTrafficFlowInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbr: Option<String>,
}

/// A distribution session as returned to and stored for a client: the
/// request body plus the server-assigned id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistSession {
    #[serde(with = "uuid::serde::simple")]
    pub dist_session_id: Uuid,
    pub obj_distribution_data: ObjDistributionData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_traffic_flow_info: Option<UpTrafficFlowInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbr: Option<String>,
}

impl DistSession {
    pub fn new(id: Uuid, request: CreateReqData) -> Self {
        Self {
            dist_session_id: id,
            obj_distribution_data: request.obj_distribution_data,
            up_traffic_flow_info: request.up_traffic_flow_info,
            mbr: request.mbr,
        }
    }
}

/// Body returned from a successful create or get — identical shape to the
/// stored session.
pub type CreateRspData = DistSession;
