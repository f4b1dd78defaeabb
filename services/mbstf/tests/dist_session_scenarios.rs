//! End-to-end scenarios against the `nmbstf-distsession` HTTP surface,
//! covering the object-list pull/push happy paths and the push size cap.
//! FLUTE delivery is verified at the UDP-datagram level (`UdpTransmitter`
//! is a single-packet-per-MTU sender), not by decoding a real FDT.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use mbstf_service::config::load_config_from_str;
use mbstf_service::{build_router, AppState};
use serde_json::json;
use tokio::net::TcpListener;

async fn spawn_origin() -> String {
    let app = Router::new().route(
        "/a",
        get(|| async {
            (
                StatusCode::OK,
                [
                    ("content-type", "text/plain"),
                    ("etag", "\"v1\""),
                    ("cache-control", "max-age=30"),
                ],
                "hello",
            )
                .into_response()
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/a")
}

async fn spawn_service() -> (Router, String) {
    let config = load_config_from_str("mbstf: {}\n").unwrap();
    let state = AppState::new(config);
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_router = router.clone();
    tokio::spawn(async move {
        axum::serve(listener, serve_router).await.unwrap();
    });
    (router, format!("http://{addr}"))
}

fn bind_udp_sink() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(15))).unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

async fn recv_datagram(socket: UdpSocket) -> Vec<u8> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 65536];
        let (n, _) = socket.recv_from(&mut buf).expect("expected a FLUTE datagram");
        buf[..n].to_vec()
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn s1_object_list_pull_happy_path() {
    let origin_url = spawn_origin().await;
    let (_, base_url) = spawn_service().await;
    let (sink, sink_addr) = bind_udp_sink();

    let client = reqwest::Client::new();
    let body = json!({
        "objDistributionData": {
            "objDistributionOperatingMode": "COLLECTION",
            "objAcquisitionMethod": "PULL",
            "objAcquisitionIdsPull": [origin_url],
        },
        "upTrafficFlowInfo": {
            "destIpAddr": { "ipv4Addr": sink_addr.ip().to_string() },
            "portNumber": sink_addr.port(),
        },
        "mbr": "1000000",
    });

    let response = client
        .post(format!("{base_url}/nmbstf-distsession/v1/dist-sessions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert!(response.headers().contains_key(reqwest::header::ETAG));

    let received = recv_datagram(sink).await;
    assert_eq!(received, b"hello");
}

#[tokio::test]
async fn s2_object_list_push_happy_path() {
    let (_, base_url) = spawn_service().await;
    let (sink, sink_addr) = bind_udp_sink();

    let client = reqwest::Client::new();
    let body = json!({
        "objDistributionData": {
            "objDistributionOperatingMode": "COLLECTION",
            "objAcquisitionMethod": "PUSH",
        },
        "upTrafficFlowInfo": {
            "destIpAddr": { "ipv4Addr": sink_addr.ip().to_string() },
            "portNumber": sink_addr.port(),
        },
    });

    let response = client
        .post(format!("{base_url}/nmbstf-distsession/v1/dist-sessions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let created: mbstf_protocol::DistSession = response.json().await.unwrap();
    let ingest_base = created
        .obj_distribution_data
        .obj_ingest_base_url
        .expect("push session advertises an ingest base url");
    assert!(ingest_base.starts_with("http://"));

    let push_response = client
        .put(format!("{}clip.bin", ingest_base))
        .header("content-type", "video/mp4")
        .body(vec![0u8; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(push_response.status(), reqwest::StatusCode::OK);

    let received = recv_datagram(sink).await;
    assert_eq!(received.len(), 1024);
}

#[tokio::test]
async fn s4_wrong_content_type_on_create_is_rejected() {
    let (_, base_url) = spawn_service().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/nmbstf-distsession/v1/dist-sessions"))
        .header("content-type", "text/plain")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn s6_push_size_cap_rejects_oversized_upload() {
    let (_, base_url) = spawn_service().await;
    let (sink, sink_addr) = bind_udp_sink();
    drop(sink);

    let client = reqwest::Client::new();
    let body = json!({
        "objDistributionData": {
            "objDistributionOperatingMode": "COLLECTION",
            "objAcquisitionMethod": "PUSH",
        },
        "upTrafficFlowInfo": {
            "destIpAddr": { "ipv4Addr": sink_addr.ip().to_string() },
            "portNumber": sink_addr.port(),
        },
    });
    let response = client
        .post(format!("{base_url}/nmbstf-distsession/v1/dist-sessions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let created: mbstf_protocol::DistSession = response.json().await.unwrap();
    let ingest_base = created.obj_distribution_data.obj_ingest_base_url.unwrap();

    let oversized = vec![0u8; 70_000];
    let push_response = client
        .put(format!("{}clip.bin", ingest_base))
        .body(oversized)
        .send()
        .await
        .unwrap();
    assert!(!push_response.status().is_success());
}
