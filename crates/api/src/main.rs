use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plinth_api::config::ServerConfig;
use plinth_api::router::build_app_router;
use plinth_api::state::AppState;
use plinth_runtime::cache::ProcessCache;
use plinth_runtime::engine::EngineServices;
use plinth_runtime::pipe::PipeRegistry;
use plinth_runtime::pool::WorkerPool;
use plinth_runtime::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "plinth_api=debug,plinth_runtime=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(bind = %config.bind, pool_size = config.pool_size, "Loaded server configuration");

    // --- Database ---
    let db = plinth_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    plinth_db::health_check(&db)
        .await
        .expect("Database health check failed");

    plinth_db::run_migrations(&db)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Script runtime ---
    let cache = Arc::new(ProcessCache::new());
    let pipes = Arc::new(PipeRegistry::new());
    let services = EngineServices {
        db: db.clone(),
        cache: Arc::clone(&cache),
        pipes,
        rt: tokio::runtime::Handle::current(),
    };
    let workers = WorkerPool::new(config.pool_size, services);
    let scheduler = Arc::new(Scheduler::new(
        workers.clone(),
        Arc::clone(&cache),
        db.clone(),
        config.run_timeout(),
    ));
    tracing::info!(workers = workers.size(), "Worker pool started");

    // --- Routes and crontabs ---
    // A registry we cannot route from is unusable; give up early.
    let routes = cache
        .rebuild_routes(&db)
        .await
        .expect("Failed to rebuild the route table");
    tracing::info!(routes, "Route table rebuilt");

    match scheduler.start_crontabs(None).await {
        Ok(crontabs) => tracing::info!(crontabs, "Crontabs registered"),
        Err(err) => tracing::error!(error = %err, "Failed to register crontabs"),
    }
    // Daemons stay parked until asked for; their registry is
    // process-lifetime state, not persisted.

    // --- App state / router ---
    let state = AppState {
        db,
        config: Arc::new(config.clone()),
        workers,
        cache,
        scheduler: Arc::clone(&scheduler),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .expect("Failed to bind to address");
    tracing::info!(addr = %config.bind, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    scheduler.shutdown();
    tracing::info!("Graceful shutdown complete");
}

/// Resolves when the process receives SIGINT (Ctrl-C) or, on Unix,
/// SIGTERM, so both an interactive stop and a process manager trigger
/// the same graceful shutdown path.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
