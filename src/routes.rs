use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use poem::http::{header, StatusCode};
use poem::web::{Data, Path, Query};
use poem::{handler, Body, Request, Response};
use tokio::io::AsyncReadExt;

use crate::context::{UploadFailed, UploadInfo};
use crate::controller::ImageController;
use crate::pipelines::PipelineController;
use crate::placeholder::PlaceholderParams;
use crate::response::{empty_response, image_response, json_response};
use crate::storage::StoreError;
use crate::validation::{self, Access, ImageKind, Rejection};

fn rejection_response(rejection: Rejection) -> Response {
    match rejection {
        Rejection::Forbidden => empty_response(StatusCode::FORBIDDEN),
        Rejection::NotFound => empty_response(StatusCode::NOT_FOUND),
    }
}

/// Only `image/*` bodies are accepted for uploads.
fn is_image_upload(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .map_or(false, |mime| mime.type_() == mime::IMAGE)
}

fn declared_length(req: &Request) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Reads at most `limit` bytes of the body, `None` if it is any longer.
async fn read_limited(body: Body, limit: usize) -> std::io::Result<Option<Bytes>> {
    let mut data = Vec::new();
    body.into_async_read()
        .take(limit as u64 + 1)
        .read_to_end(&mut data)
        .await?;

    if data.len() > limit {
        return Ok(None);
    }

    Ok(Some(Bytes::from(data)))
}

#[handler]
pub async fn upload_image(
    req: &Request,
    Path(name): Path<String>,
    Data(controller): Data<&Arc<ImageController>>,
    body: Body,
) -> Response {
    if let Err(rejection) = validation::validate(&name, Access::Write) {
        return rejection_response(rejection);
    }

    if !is_image_upload(req) {
        return empty_response(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    let limit = controller.cfg().max_upload_size;
    if declared_length(req).map_or(false, |len| len > limit) {
        return empty_response(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let data = match read_limited(body, limit).await {
        Ok(Some(data)) => data,
        Ok(None) => return empty_response(StatusCode::PAYLOAD_TOO_LARGE),
        Err(e) => {
            warn!("Failed to read upload body for {:?}: {}", name, e);
            return empty_response(StatusCode::BAD_REQUEST);
        },
    };

    match controller.upload(&name, data).await {
        Ok(size) => json_response(StatusCode::OK, UploadInfo::ok(size)),
        Err(e @ StoreError::DuplicateName(_)) => {
            json_response(StatusCode::CONFLICT, UploadFailed::new(e.code()))
        },
        Err(StoreError::InvalidName(_)) => empty_response(StatusCode::FORBIDDEN),
        Err(e) => {
            error!("Failed to store image {:?}: {}", name, e);
            json_response(StatusCode::INTERNAL_SERVER_ERROR, UploadFailed::new(e.code()))
        },
    }
}

#[handler]
pub async fn head_image(
    Path(name): Path<String>,
    Data(controller): Data<&Arc<ImageController>>,
) -> Response {
    if let Err(rejection) = validation::validate(&name, Access::Read) {
        return rejection_response(rejection);
    }

    match controller.exists(&name).await {
        Ok(true) => empty_response(StatusCode::OK),
        Ok(false) => empty_response(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to check image {:?}: {}", name, e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        },
    }
}

#[handler]
pub async fn get_image(
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Data(controller): Data<&Arc<ImageController>>,
) -> Response {
    if let Err(rejection) = validation::validate(&name, Access::Read) {
        return rejection_response(rejection);
    }

    match controller.fetch(&name, &query).await {
        Ok(Some(img)) => image_response(&img.content_type, img.data),
        Ok(None) => empty_response(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to serve image {:?}: {}", name, e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        },
    }
}

#[handler]
pub async fn delete_image(
    Path(name): Path<String>,
    Data(controller): Data<&Arc<ImageController>>,
) -> Response {
    if let Err(rejection) = validation::validate(&name, Access::Read) {
        return rejection_response(rejection);
    }

    match controller.delete(&name).await {
        Ok(()) => empty_response(StatusCode::OK),
        Err(e) => {
            error!("Failed to delete image {:?}: {}", name, e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        },
    }
}

#[handler]
pub async fn stats(Data(controller): Data<&Arc<ImageController>>) -> Response {
    match controller.stats().await {
        Ok(Some(report)) => json_response(StatusCode::OK, report),
        Ok(None) => empty_response(StatusCode::NOT_IMPLEMENTED),
        Err(e) => {
            error!("Failed to gather stats: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        },
    }
}

async fn thumbnail(
    format: ImageKind,
    query: &HashMap<String, String>,
    controller: &ImageController,
) -> Response {
    let params = PlaceholderParams::from_query(format, query, controller.cfg().max_dimension);
    let content_type = format!("image/{}", format.as_ref());

    match PipelineController.on_placeholder(params).await {
        Ok(result) => image_response(&content_type, result.data),
        Err(e) => {
            error!("Failed to render placeholder: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        },
    }
}

#[handler]
pub async fn thumbnail_jpeg(
    Query(query): Query<HashMap<String, String>>,
    Data(controller): Data<&Arc<ImageController>>,
) -> Response {
    thumbnail(ImageKind::Jpeg, &query, controller).await
}

#[handler]
pub async fn thumbnail_png(
    Query(query): Query<HashMap<String, String>>,
    Data(controller): Data<&Arc<ImageController>>,
) -> Response {
    thumbnail(ImageKind::Png, &query, controller).await
}
