use bytes::Bytes;
use poem::http::{header, StatusCode};
use poem::web::Json;
use poem::{IntoResponse, Response};
use serde::Serialize;

/// A standard JSON response with the content type set to application/json
pub fn json_response(status: StatusCode, data: impl Serialize + Send) -> Response {
    Json(data).with_status(status).into_response()
}

pub fn image_response(content_type: &str, data: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(data)
}

pub fn empty_response(status: StatusCode) -> Response {
    Response::builder().status(status).finish()
}
