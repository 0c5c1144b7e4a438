//! HTTP handlers for versioned documents.
//! Uploads arrive as multipart forms; downloads stream the stored payload
//! straight from the gateway.

use crate::{
    errors::{AppError, VersioningError},
    models::{
        document::{Author, DocumentVersion, UploadOutcome},
        metadata::MetadataFields,
        object::ObjectStat,
    },
    routes::AppState,
    services::{
        metadata_codec,
        versioned_store::{DocumentContent, Download},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Multipart, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::json;

/// Header the upstream auth proxy sets to the caller's email.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

impl<S: Send + Sync> FromRequestParts<S> for Author {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_EMAIL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Author::new)
            .ok_or_else(|| {
                AppError::new(
                    StatusCode::UNAUTHORIZED,
                    format!("missing `{USER_EMAIL_HEADER}` header"),
                )
            })
    }
}

/// Parsed multipart upload form.
#[derive(Debug, Default)]
struct UploadForm {
    file_name: Option<String>,
    body: Option<Bytes>,
    content_type: Option<String>,
    fields: MetadataFields,
    tags: Vec<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.file_name = field.file_name().map(str::to_string);
                form.content_type = field.content_type().map(str::to_string);
                form.body = Some(field.bytes().await.map_err(|e| {
                    AppError::bad_request(format!("could not read uploaded file: {e}"))
                })?);
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| AppError::bad_request(format!("could not read `{name}`: {e}")))?;
            let text = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            match name.as_str() {
                "category" => form.fields.lifecycle_category = text,
                "reviewedBy" => form.fields.reviewed_by = text,
                "testedBy" => form.fields.tested_by = text,
                "dateReviewed" => form.fields.date_reviewed = parse_date(&name, text)?,
                "dateTested" => form.fields.date_tested = parse_date(&name, text)?,
                "tags" => form.tags.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                ),
                other => tracing::debug!("ignoring unknown form field `{}`", other),
            }
        }
        Ok(form)
    }

    fn content(&mut self) -> Result<DocumentContent, AppError> {
        let body = self
            .body
            .take()
            .ok_or_else(|| AppError::bad_request("missing `file` field"))?;
        Ok(DocumentContent::new(body, self.content_type.take()))
    }
}

fn parse_date(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    value
        .map(|v| {
            metadata_codec::parse_timestamp(&v).ok_or_else(|| {
                AppError::bad_request(format!("`{field}` must be an RFC 3339 timestamp, got `{v}`"))
            })
        })
        .transpose()
}

/// `POST /files`: first version of a new document, named after the uploaded file.
pub async fn upload_new(
    State(state): State<AppState>,
    author: Author,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadOutcome>), AppError> {
    let mut form = UploadForm::read(multipart).await?;
    let file_name = form
        .file_name
        .take()
        .ok_or_else(|| AppError::bad_request("uploaded file has no file name"))?;
    let content = form.content()?;
    state.catalog.ensure_known(&form.tags).await?;

    let category = form.fields.lifecycle_category.take();
    let outcome = state
        .store
        .upload_new(
            &file_name,
            content,
            category.as_deref(),
            form.fields,
            &form.tags,
            &author,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `POST /files/{base_file_name}/versions`
pub async fn create_version(
    State(state): State<AppState>,
    Path(base_file_name): Path<String>,
    author: Author,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadOutcome>), AppError> {
    let mut form = UploadForm::read(multipart).await?;
    let content = form.content()?;
    state.catalog.ensure_known(&form.tags).await?;

    let outcome = state
        .store
        .create_version(&base_file_name, content, form.fields, &form.tags, &author)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `GET /files/{base_file_name}/versions`
pub async fn list_versions(
    State(state): State<AppState>,
    Path(base_file_name): Path<String>,
) -> Result<Json<Vec<DocumentVersion>>, AppError> {
    Ok(Json(state.store.list_versions(&base_file_name).await?))
}

/// `DELETE /files/{base_file_name}/versions`
///
/// A partial failure answers 500 with the per-object failures in the body.
pub async fn delete_all_versions(
    State(state): State<AppState>,
    Path(base_file_name): Path<String>,
) -> Result<Response, AppError> {
    match state.store.delete_all_versions(&base_file_name).await {
        Ok(deleted) => Ok(Json(json!({ "deleted": deleted })).into_response()),
        Err(err @ VersioningError::PartialBulkFailure { .. }) => Ok(partial_failure_response(err)),
        Err(err) => Err(err.into()),
    }
}

/// `GET /files/{base_file_name}/latest`
pub async fn download_latest(
    State(state): State<AppState>,
    Path(base_file_name): Path<String>,
) -> Result<Response, AppError> {
    Ok(stream_response(state.store.download_latest(&base_file_name).await?))
}

/// `GET /objects/{file_name}`
pub async fn download(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    Ok(stream_response(state.store.download(&file_name).await?))
}

/// `DELETE /objects/{file_name}`
pub async fn delete_version(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_version(&file_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn partial_failure_response(err: VersioningError) -> Response {
    let message = err.to_string();
    let VersioningError::PartialBulkFailure {
        succeeded, failures, ..
    } = err
    else {
        return AppError::from(err).into_response();
    };
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let body = Json(json!({
        "error": message,
        "status": status.as_u16(),
        "deleted": succeeded,
        "failures": failures,
    }));
    (status, body).into_response()
}

fn stream_response(download: Download) -> Response {
    let Download { bucket, body } = download;
    let mut response = Response::new(Body::from_stream(body.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_object_headers(headers, &body.stat);
    if let Ok(value) = HeaderValue::from_str(bucket.label()) {
        headers.insert(HeaderName::from_static("x-docvault-bucket"), value);
    }
    response
}

fn set_object_headers(headers: &mut HeaderMap, stat: &ObjectStat) {
    let content_type = stat
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stat.size));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", stat.etag)) {
        headers.insert(header::ETAG, value);
    }
    let last_modified = stat
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let disposition = format!("attachment; filename=\"{}\"", stat.key.replace('"', ""));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    for (name, value) in &stat.headers {
        let name = HeaderName::try_from(format!("x-amz-meta-{name}"));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}
