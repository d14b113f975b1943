use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::{caller, optional_caller, AppState};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct LikeRequest {
    pub video_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn validate(body: &LikeRequest) -> ServiceResult<i64> {
    if body.video_id <= 0 {
        return Err(ServiceError::InvalidInput(format!(
            "video_id must be positive, got {}",
            body.video_id
        )));
    }
    Ok(body.video_id)
}

pub async fn add_like(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<LikeRequest>,
) -> ServiceResult<HttpResponse> {
    let username = caller(&req)?;
    let video_id = validate(&body)?;
    let result = state.coordinator.add_like(&username, video_id).await?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn remove_like(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<LikeRequest>,
) -> ServiceResult<HttpResponse> {
    let username = caller(&req)?;
    let video_id = validate(&body)?;
    let result = state.coordinator.remove_like(&username, video_id).await?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn toggle_like(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<LikeRequest>,
) -> ServiceResult<HttpResponse> {
    let username = caller(&req)?;
    let video_id = validate(&body)?;
    let result = state.coordinator.toggle_like(&username, video_id).await?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn like_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> ServiceResult<HttpResponse> {
    let username = optional_caller(&req);
    let status = state
        .queries
        .like_status(username.as_deref(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(status))
}

pub async fn top_videos(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> ServiceResult<HttpResponse> {
    let videos = state.queries.top_videos(query.limit).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "videos": videos })))
}

pub async fn liked_videos(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> ServiceResult<HttpResponse> {
    let username = caller(&req)?;
    let video_ids = state.queries.liked_videos(&username, query.limit).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "video_ids": video_ids })))
}
