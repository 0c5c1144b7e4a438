//! Tag endpoints: per-object tags and the predefined tag catalog.

use crate::{
    errors::AppError,
    models::{object::TagSet, tag::PredefinedTag},
    routes::AppState,
    services::tag_cascade::CascadeReport,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct SetTagsReq {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTagReq {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteTagResp {
    pub tag: PredefinedTag,
    pub cascade: CascadeReport,
}

/// `GET /objects/{file_name}/tags`
pub async fn get_object_tags(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Json<TagSet>, AppError> {
    Ok(Json(state.store.get_tags(&file_name).await?))
}

/// `PUT /objects/{file_name}/tags`: replace the object's tags. Every name
/// must be in the catalog.
pub async fn set_object_tags(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Json(req): Json<SetTagsReq>,
) -> Result<Json<TagSet>, AppError> {
    state.catalog.ensure_known(&req.tags).await?;
    Ok(Json(state.store.set_tags(&file_name, &req.tags).await?))
}

/// `DELETE /objects/{file_name}/tags`
pub async fn delete_object_tags(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_tags(&file_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /tags`
pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<PredefinedTag>>, AppError> {
    Ok(Json(state.catalog.list().await?))
}

/// `POST /tags`
pub async fn create_tag(
    State(state): State<AppState>,
    Json(req): Json<CreateTagReq>,
) -> Result<(StatusCode, Json<PredefinedTag>), AppError> {
    let tag = state.catalog.create(&req.name).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// `DELETE /tags/{id}`: strips the tag from every object, then drops the
/// catalog entry.
///
/// The entry is gone either way. If the sweep could not update some objects
/// the answer is a 500 listing them.
pub async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let (tag, cascade) = state.catalog.delete(id, &state.cascade).await?;
    match cascade.clone().into_result() {
        Ok(cascade) => Ok(Json(DeleteTagResp { tag, cascade }).into_response()),
        Err(err) => {
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            let body = Json(json!({
                "error": err.to_string(),
                "status": status.as_u16(),
                "tag": tag,
                "cascade": cascade,
            }));
            Ok((status, body).into_response())
        }
    }
}
