use std::time::SystemTime;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use mbstf_core::CoreError;
use mbstf_protocol::{CreateReqData, InvalidParam};
use uuid::Uuid;

use crate::http::response::{
    bad_request, internal_error, method_not_allowed, not_found, unsupported_media_type, HttpResult,
};
use crate::state::{server_header_value, AppState};

fn http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn map_create_error(err: CoreError) -> Response {
    match err {
        CoreError::SessionConfigError(detail) | CoreError::BadRequest(detail) => bad_request("Bad Request", detail),
        other => internal_error(other.to_string()),
    }
}

pub async fn create_dist_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult<Response> {
    if !content_type_is_json(&headers) {
        return Err(unsupported_media_type("Content-Type must be application/json"));
    }

    let request: CreateReqData = serde_json::from_slice(&body)
        .map_err(|e| bad_request("Bad Request", format!("invalid request body: {e}")))?;

    let session = state
        .sessions
        .create(&body, request)
        .map_err(map_create_error)?;

    let snapshot = session.snapshot();
    let location = format!("/nmbstf-distsession/v1/dist-sessions/{}", session.id);
    let mut response = (StatusCode::CREATED, Json(snapshot)).into_response();
    set_common_headers(&mut response, &state, &session.etag, session.created_at);
    response
        .headers_mut()
        .insert(header::LOCATION, location.parse().unwrap());
    Ok(response)
}

pub async fn get_dist_session(State(state): State<AppState>, Path(id): Path<String>) -> HttpResult<Response> {
    let session_id = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(session_id)
        .ok_or_else(|| session_not_found(&id))?;

    let snapshot = session.snapshot();
    let mut response = (StatusCode::OK, Json(snapshot)).into_response();
    set_common_headers(&mut response, &state, &session.etag, session.created_at);
    Ok(response)
}

pub async fn delete_dist_session(State(state): State<AppState>, Path(id): Path<String>) -> HttpResult<Response> {
    let session_id = parse_session_id(&id)?;
    if state.sessions.delete(session_id) {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(session_not_found(&id))
    }
}

pub async fn dist_sessions_method_not_allowed() -> HttpResult<Response> {
    Err(method_not_allowed("method not allowed on this resource"))
}

pub async fn unmatched_resource() -> HttpResult<Response> {
    Err(bad_request(
        "Bad Request",
        "unknown resource path or API version; expected /nmbstf-distsession/v1/dist-sessions",
    ))
}

fn parse_session_id(raw: &str) -> HttpResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| session_not_found(raw))
}

fn session_not_found(id: &str) -> Response {
    not_found(
        format!("no distribution session with id '{id}'"),
        vec![InvalidParam::new("sessionId", "no distribution session with this id")],
    )
}

fn set_common_headers(response: &mut Response, state: &AppState, etag: &str, created_at: SystemTime) {
    let headers = response.headers_mut();
    headers.insert(header::ETAG, format!("\"{etag}\"").parse().unwrap());
    headers.insert(header::LAST_MODIFIED, http_date(created_at).parse().unwrap());
    headers.insert(
        header::CACHE_CONTROL,
        format!("max-age={}", state.config.cache_control.dist_max_age.as_secs())
            .parse()
            .unwrap(),
    );
    headers.insert(header::SERVER, server_header_value().parse().unwrap());
}
