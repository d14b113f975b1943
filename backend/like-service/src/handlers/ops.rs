use actix_web::{web, HttpResponse, Responder};
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::Ordering;

use super::AppState;
use crate::error::ServiceResult;

pub async fn health() -> impl Responder {
    "OK"
}

pub async fn ready(state: web::Data<AppState>) -> impl Responder {
    if state.ready.load(Ordering::SeqCst) {
        HttpResponse::Ok().body("READY")
    } else {
        HttpResponse::ServiceUnavailable().body("NOT READY")
    }
}

pub async fn metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(format!("error: {}", e)),
    }
}

pub async fn reconcile_video(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> ServiceResult<HttpResponse> {
    let report = state.reconciler.reconcile_video(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::services::{LikeCoordinator, LikeQueries, Reconciler};
    use crate::testing::{FakeCache, FakeDirectory, InMemoryLikeStore};
    use actix_web::{http::StatusCode, test, App};
    use relay_queue::InMemoryRelay;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn state(cache: Arc<FakeCache>, store: Arc<InMemoryLikeStore>, ready: bool) -> AppState {
        let directory = Arc::new(FakeDirectory::default());
        AppState {
            coordinator: Arc::new(LikeCoordinator::new(
                cache.clone(),
                directory.clone(),
                directory.clone(),
                Arc::new(InMemoryRelay::new()),
            )),
            queries: Arc::new(LikeQueries::new(cache.clone(), directory, store.clone())),
            reconciler: Arc::new(Reconciler::new(cache, store, 100)),
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    #[actix_web::test]
    async fn test_ready_follows_flag() {
        let store = Arc::new(InMemoryLikeStore::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(Arc::new(FakeCache::default()), store, false)))
                .configure(|cfg| configure(cfg, true)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_admin_reconcile() {
        let cache = Arc::new(FakeCache::default());
        cache.insert_member(42, 1);
        let store = Arc::new(InMemoryLikeStore::default().with_video(42));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(cache, store.clone(), true)))
                .configure(|cfg| configure(cfg, true)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/admin/reconcile/42")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["cache_score_after"], 1);
        assert_eq!(body["rows_inserted"], 1);
        assert_eq!(store.count_of(42), Some(1));
    }

    #[actix_web::test]
    async fn test_admin_routes_can_be_disabled() {
        let store = Arc::new(InMemoryLikeStore::default().with_video(42));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(Arc::new(FakeCache::default()), store, true)))
                .configure(|cfg| configure(cfg, false)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/admin/reconcile/42")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
