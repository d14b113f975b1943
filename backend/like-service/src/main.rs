use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use like_service::cache::{LikeCache, RedisLikeCache};
use like_service::config::Config;
use like_service::handlers::{self, AppState};
use like_service::repository::{LikeStore, PgDirectory, PgLikeStore};
use like_service::services::{LikeCoordinator, LikeQueries, Reconciler};
use like_service::workers::{self, reconcile_worker, redis_health, PersistenceWorker};
use redis_utils::RedisPool;
use relay_queue::{RedisStreamConsumer, RedisStreamPublisher};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("🔧 Starting like-service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "✅ Configuration loaded: env={}, http_port={}, role={:?}, workers={}",
        config.app.env, config.app.http_port, config.app.role, config.workers.count
    );

    config.database.log_config();
    let pg_pool = db_pool::create_pool(config.database.clone())
        .await
        .context("Failed to connect to database")?;
    info!("✅ Database pool created and verified");

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("✅ Database migrations completed");

    let redis = RedisPool::connect(&config.redis.url).await?;
    info!("✅ Redis connection established");

    let cache: Arc<dyn LikeCache> = Arc::new(RedisLikeCache::new(redis.manager()));
    let store: Arc<dyn LikeStore> = Arc::new(PgLikeStore::new(pg_pool.clone()));
    let directory = Arc::new(PgDirectory::new(pg_pool.clone()));
    let stream_config = config.relay.stream_config();
    let publisher = Arc::new(RedisStreamPublisher::new(
        redis.manager(),
        stream_config.stream.clone(),
    ));

    let coordinator = Arc::new(LikeCoordinator::new(
        cache.clone(),
        directory.clone(),
        directory.clone(),
        publisher,
    ));
    let queries = Arc::new(LikeQueries::new(cache.clone(), directory, store.clone()));
    let reconciler = Arc::new(Reconciler::new(
        cache.clone(),
        store.clone(),
        config.reconcile.batch_size,
    ));
    let ready = Arc::new(AtomicBool::new(true));

    // Keep the shared Redis connection warm and drive /ready
    let health_cache = cache.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        redis_health::start_redis_health_check(
            health_cache,
            redis_health::RedisHealthConfig::default(),
            health_ready,
        )
        .await;
    });
    info!("✅ Redis health check background job started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut join_set = JoinSet::new();

    if config.app.role.runs_api() {
        let state = AppState {
            coordinator,
            queries,
            reconciler: reconciler.clone(),
            ready,
        };
        let admin_enabled = config.app.admin_enabled;
        let http_addr = format!("{}:{}", config.app.host, config.app.http_port);

        let http_server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(|cfg| handlers::configure(cfg, admin_enabled))
        })
        .bind(&http_addr)
        .context("Failed to bind HTTP server")?
        .run();

        join_set.spawn(async move {
            http_server
                .await
                .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
        });
        info!("✅ HTTP server started on http://{}", http_addr);
    }

    if config.app.role.runs_workers() {
        for worker_id in 0..config.workers.count {
            let conn = redis.dedicated_connection().await?;
            let name = workers::consumer_name(&config.relay.consumer_prefix, worker_id);
            let consumer = RedisStreamConsumer::new(conn, stream_config.clone(), name)
                .await
                .context("Failed to create relay consumer")?;

            let worker = PersistenceWorker::new(worker_id, consumer, store.clone());
            join_set.spawn(worker.run(shutdown_rx.clone()));
        }
        info!(
            "✅ {} persistence workers started (stream={}, group={})",
            config.workers.count, stream_config.stream, stream_config.group
        );
    }

    match config.reconcile.interval {
        Some(interval) => {
            join_set.spawn(reconcile_worker::run(
                reconciler,
                interval,
                shutdown_rx.clone(),
            ));
            info!("✅ Reconciliation sweep every {}s", interval.as_secs());
        }
        None => info!("Reconciliation sweep disabled: RECONCILE_INTERVAL_SECS not set"),
    }

    // The HTTP server stops itself on SIGTERM/SIGINT; background loops watch this.
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!("🎉 like-service is running");

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {
                info!("Task completed successfully");
            }
            Ok(Err(e)) => {
                error!("Task failed: {:#}", e);
                return Err(e);
            }
            Err(e) => {
                error!("Task panicked: {:#}", e);
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    pg_pool.close().await;
    info!("🛑 like-service shut down");
    Ok(())
}
