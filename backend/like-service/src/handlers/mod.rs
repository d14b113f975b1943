//! HTTP surface
//!
//! Caller identity comes from the `X-Username` header set by the upstream
//! auth gateway; this service does not authenticate on its own.

pub mod likes;
pub mod ops;

use actix_web::{web, HttpRequest};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::services::{LikeCoordinator, LikeQueries, Reconciler};

pub const USERNAME_HEADER: &str = "X-Username";

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<LikeCoordinator>,
    pub queries: Arc<LikeQueries>,
    pub reconciler: Arc<Reconciler>,
    /// Flipped by the Redis health check
    pub ready: Arc<AtomicBool>,
}

/// Caller username from the gateway header, if present and non-empty.
pub fn optional_caller(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(USERNAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn caller(req: &HttpRequest) -> Result<String, ServiceError> {
    optional_caller(req)
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", USERNAME_HEADER)))
}

/// Register all routes. Admin routes only when `admin_enabled`.
pub fn configure(cfg: &mut web::ServiceConfig, admin_enabled: bool) {
    cfg.route("/health", web::get().to(ops::health))
        .route("/ready", web::get().to(ops::ready))
        .route("/metrics", web::get().to(ops::metrics))
        .service(
            web::scope("/api")
                .route("/video/like", web::post().to(likes::add_like))
                .route("/video/like", web::delete().to(likes::remove_like))
                .route("/video/toggle-like", web::post().to(likes::toggle_like))
                .route("/video/{video_id}/likes", web::get().to(likes::like_status))
                .route("/videos/top", web::get().to(likes::top_videos))
                .route("/user/liked-videos", web::get().to(likes::liked_videos)),
        );

    if admin_enabled {
        cfg.route(
            "/admin/reconcile/{video_id}",
            web::post().to(ops::reconcile_video),
        );
    }
}
