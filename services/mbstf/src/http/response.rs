use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mbstf_protocol::{InvalidParam, ProblemDetails};

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

pub(crate) fn problem_response(status: StatusCode, problem: ProblemDetails) -> HttpResponse {
    let mut response = (status, Json(problem)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE.parse().unwrap());
    response
}

pub fn bad_request(title: &str, detail: impl Into<String>) -> HttpResponse {
    problem_response(
        StatusCode::BAD_REQUEST,
        ProblemDetails::new(StatusCode::BAD_REQUEST.as_u16(), title).with_detail(detail),
    )
}

pub fn bad_request_with_params(title: &str, detail: impl Into<String>, invalid_params: Vec<InvalidParam>) -> HttpResponse {
    problem_response(
        StatusCode::BAD_REQUEST,
        ProblemDetails::new(StatusCode::BAD_REQUEST.as_u16(), title)
            .with_detail(detail)
            .with_invalid_params(invalid_params),
    )
}

pub fn unsupported_media_type(detail: impl Into<String>) -> HttpResponse {
    problem_response(
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ProblemDetails::new(StatusCode::UNSUPPORTED_MEDIA_TYPE.as_u16(), "Unsupported Media Type").with_detail(detail),
    )
}

pub fn not_found(detail: impl Into<String>, invalid_params: Vec<InvalidParam>) -> HttpResponse {
    problem_response(
        StatusCode::NOT_FOUND,
        ProblemDetails::new(StatusCode::NOT_FOUND.as_u16(), "Not Found")
            .with_detail(detail)
            .with_invalid_params(invalid_params),
    )
}

pub fn method_not_allowed(detail: impl Into<String>) -> HttpResponse {
    problem_response(
        StatusCode::METHOD_NOT_ALLOWED,
        ProblemDetails::new(StatusCode::METHOD_NOT_ALLOWED.as_u16(), "Method Not Allowed").with_detail(detail),
    )
}

pub fn internal_error(detail: impl Into<String>) -> HttpResponse {
    problem_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ProblemDetails::new(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), "Internal Server Error").with_detail(detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_sets_problem_json_contract() {
        let response = not_found(
            "no such session",
            vec![InvalidParam::new("sessionId", "no such session")],
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ProblemDetails = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.status, 404);
        assert_eq!(parsed.invalid_params[0].param, "sessionId");
    }

    #[tokio::test]
    async fn bad_request_sets_title_and_status() {
        let response = bad_request("Bad Request", "missing body");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ProblemDetails = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.title, "Bad Request");
        assert_eq!(parsed.detail.as_deref(), Some("missing body"));
    }
}
