mod auth;
mod leaderboard;
mod shared;

use auth::TokenConfig;
use leaderboard::cache::InMemoryRankingCache;
use leaderboard::entry_repository::{InMemoryEntryRepository, PostgresEntryRepository};
use leaderboard::repository::{
    InMemoryLeaderboardRepository, LeaderboardRepository, PostgresLeaderboardRepository,
};
use leaderboard::rollover::{start_rollover_task, RolloverConfig};
use leaderboard::snapshot_repository::{InMemorySnapshotRepository, PostgresSnapshotRepository};
use leaderboard::LeaderboardService;
use shared::AppState;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rankboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rankboard leaderboard server");

    let cache = Arc::new(InMemoryRankingCache::new());

    // In-memory stores by default; PostgreSQL when DATABASE_URL is set.
    let (leaderboard_repository, service): (Arc<dyn LeaderboardRepository>, Arc<LeaderboardService>) =
        match std::env::var("DATABASE_URL") {
            Ok(database_url) => {
                let pool = sqlx::PgPool::connect(&database_url)
                    .await
                    .expect("Failed to connect to database");
                let leaderboard_repository: Arc<dyn LeaderboardRepository> =
                    Arc::new(PostgresLeaderboardRepository::new(pool.clone()));
                let service = Arc::new(LeaderboardService::new(
                    leaderboard_repository.clone(),
                    Arc::new(PostgresEntryRepository::new(pool.clone())),
                    Arc::new(PostgresSnapshotRepository::new(pool)),
                    cache,
                ));
                (leaderboard_repository, service)
            }
            Err(_) => {
                let leaderboard_repository: Arc<dyn LeaderboardRepository> =
                    Arc::new(InMemoryLeaderboardRepository::new());
                let service = Arc::new(LeaderboardService::new(
                    leaderboard_repository.clone(),
                    Arc::new(InMemoryEntryRepository::new()),
                    Arc::new(InMemorySnapshotRepository::new()),
                    cache,
                ));
                (leaderboard_repository, service)
            }
        };

    let app_state = AppState::new(service.clone(), TokenConfig::new());

    // Periodic reset sweep + daily snapshots
    tokio::spawn(start_rollover_task(
        leaderboard_repository,
        service,
        RolloverConfig::default(),
    ));

    let app = leaderboard::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // run our app with hyper, listening globally on port 3000
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    info!("Server running on http://localhost:3000");
    axum::serve(listener, app).await.unwrap();
}
