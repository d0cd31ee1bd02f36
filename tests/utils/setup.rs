use std::sync::Arc;

use axum::Router;
use rankboard::leaderboard::cache::InMemoryRankingCache;
use rankboard::leaderboard::entry_repository::InMemoryEntryRepository;
use rankboard::leaderboard::repository::{InMemoryLeaderboardRepository, LeaderboardRepository};
use rankboard::leaderboard::snapshot_repository::InMemorySnapshotRepository;
use rankboard::{app_router, AppState, LeaderboardService, TokenConfig};

/// Everything a workflow test needs: the routed app plus direct handles to
/// the service and leaderboard store for assertions and schedule tests.
pub struct TestSetup {
    pub app: Router,
    pub state: AppState,
    pub leaderboard_repository: Arc<dyn LeaderboardRepository>,
    pub service: Arc<LeaderboardService>,
}

impl TestSetup {
    pub fn admin_token(&self) -> String {
        self.state
            .token_config
            .create_token(
                "admin-1".to_string(),
                "root".to_string(),
                vec!["admin".to_string()],
            )
            .expect("token creation should succeed")
    }

    pub fn player_token(&self, user_id: &str, username: &str) -> String {
        self.state
            .token_config
            .create_token(
                user_id.to_string(),
                username.to_string(),
                vec!["player".to_string()],
            )
            .expect("token creation should succeed")
    }
}

pub struct TestSetupBuilder;

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds an app over fresh in-memory stores.
    pub fn build(self) -> TestSetup {
        let leaderboard_repository: Arc<dyn LeaderboardRepository> =
            Arc::new(InMemoryLeaderboardRepository::new());
        let service = Arc::new(LeaderboardService::new(
            leaderboard_repository.clone(),
            Arc::new(InMemoryEntryRepository::new()),
            Arc::new(InMemorySnapshotRepository::new()),
            Arc::new(InMemoryRankingCache::new()),
        ));
        let state = AppState::new(service.clone(), TokenConfig::new());
        let app = app_router(state.clone());

        TestSetup {
            app,
            state,
            leaderboard_repository,
            service,
        }
    }
}

impl Default for TestSetupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
