use std::sync::Arc;
use std::time::Duration;
use chrono::{Timelike, Utc};
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use super::repository::LeaderboardRepository;
use super::service::LeaderboardService;
use crate::shared::AppError;

/// Configuration for the rollover task
#[derive(Debug, Clone)]
pub struct RolloverConfig {
    /// How often to run the reset sweep
    pub sweep_interval: Duration,
    /// UTC hour at which the daily snapshot pass runs
    pub snapshot_hour_utc: u32,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60 * 60), // hourly
            snapshot_hour_utc: 0,                         // midnight UTC
        }
    }
}

/// Starts the background task that resets elapsed leaderboards and takes
/// the scheduled daily snapshots.
#[instrument(skip(leaderboards, service))]
pub async fn start_rollover_task(
    leaderboards: Arc<dyn LeaderboardRepository>,
    service: Arc<LeaderboardService>,
    config: RolloverConfig,
) {
    info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        snapshot_hour_utc = config.snapshot_hour_utc,
        "Starting leaderboard rollover background task"
    );

    let mut sweep_interval = interval(config.sweep_interval);

    loop {
        sweep_interval.tick().await;

        match run_reset_sweep(&leaderboards, &service).await {
            Ok(reset_count) => {
                info!(reset_count = reset_count, "Reset sweep completed");
            }
            Err(e) => {
                error!(error = %e, "Reset sweep failed");
            }
        }

        // Daily snapshots run once per day, gated on the configured hour.
        if Utc::now().hour() == config.snapshot_hour_utc {
            match run_daily_snapshots(&leaderboards, &service).await {
                Ok(snapshot_count) => {
                    info!(snapshot_count = snapshot_count, "Daily snapshot pass completed");
                }
                Err(e) => {
                    error!(error = %e, "Daily snapshot pass failed");
                }
            }
        }
    }
}

/// Resets every active leaderboard whose reset boundary has elapsed. A
/// failure on one leaderboard is logged and does not abort the sweep.
#[instrument(skip(leaderboards, service))]
pub async fn run_reset_sweep(
    leaderboards: &Arc<dyn LeaderboardRepository>,
    service: &Arc<LeaderboardService>,
) -> Result<usize, AppError> {
    let due = leaderboards.find_due_for_reset(Utc::now()).await?;

    if due.is_empty() {
        info!("No leaderboards due for reset");
        return Ok(0);
    }

    info!(count = due.len(), "Found leaderboards due for reset");

    let mut reset_count = 0;

    for leaderboard in due {
        match service.reset_leaderboard(&leaderboard.id).await {
            Ok(()) => {
                reset_count += 1;
                info!(leaderboard_id = %leaderboard.id, "Reset leaderboard on schedule");
            }
            Err(e) => {
                warn!(
                    leaderboard_id = %leaderboard.id,
                    error = %e,
                    "Failed to reset leaderboard"
                );
            }
        }
    }

    Ok(reset_count)
}

/// Takes a daily snapshot of every active, non-archived leaderboard,
/// independent of any reset. Per-leaderboard failures are isolated.
#[instrument(skip(leaderboards, service))]
pub async fn run_daily_snapshots(
    leaderboards: &Arc<dyn LeaderboardRepository>,
    service: &Arc<LeaderboardService>,
) -> Result<usize, AppError> {
    let active = leaderboards.find_active_unarchived().await?;

    let mut snapshot_count = 0;

    for leaderboard in active {
        match service.record_daily_snapshot(&leaderboard.id).await {
            Ok(_) => {
                snapshot_count += 1;
            }
            Err(e) => {
                warn!(
                    leaderboard_id = %leaderboard.id,
                    error = %e,
                    "Failed to snapshot leaderboard"
                );
            }
        }
    }

    Ok(snapshot_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::cache::InMemoryRankingCache;
    use crate::leaderboard::entry_repository::InMemoryEntryRepository;
    use crate::leaderboard::models::{Leaderboard, SnapshotType};
    use crate::leaderboard::repository::InMemoryLeaderboardRepository;
    use crate::leaderboard::snapshot_repository::InMemorySnapshotRepository;
    use crate::leaderboard::types::{CreateLeaderboardRequest, SubmitScoreRequest};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn service_with_repo() -> (Arc<dyn LeaderboardRepository>, Arc<LeaderboardService>) {
        let repo: Arc<InMemoryLeaderboardRepository> =
            Arc::new(InMemoryLeaderboardRepository::new());
        let service = Arc::new(LeaderboardService::new(
            repo.clone(),
            Arc::new(InMemoryEntryRepository::new()),
            Arc::new(InMemorySnapshotRepository::new()),
            Arc::new(InMemoryRankingCache::new()),
        ));
        (repo, service)
    }

    async fn create_daily_board(service: &Arc<LeaderboardService>, name: &str) -> Leaderboard {
        let request: CreateLeaderboardRequest = serde_json::from_value(json!({
            "name": name,
            "reset_period": "daily",
        }))
        .unwrap();
        service.create_leaderboard(request).await.unwrap()
    }

    async fn submit(service: &Arc<LeaderboardService>, board: &str, user: &str, score: f64) {
        let request = SubmitScoreRequest {
            score,
            completion_time: None,
            metadata: json!({ "gameSession": "test" }),
        };
        service
            .submit_score(board, user, user, request)
            .await
            .unwrap();
    }

    /// Marks a board as already past its reset boundary.
    async fn make_due(repo: &Arc<dyn LeaderboardRepository>, board: &Leaderboard) {
        let mut due = board.clone();
        due.next_reset_date = Some(Utc::now() - ChronoDuration::hours(1));
        repo.save(&due).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_resets_only_elapsed_leaderboards() {
        let (repo, service) = service_with_repo();

        let due_board = create_daily_board(&service, "due").await;
        submit(&service, &due_board.id, "alice", 100.0).await;
        make_due(&repo, &due_board).await;

        let fresh_board = create_daily_board(&service, "fresh").await;
        submit(&service, &fresh_board.id, "bob", 50.0).await;

        let reset_count = run_reset_sweep(&repo, &service).await.unwrap();
        assert_eq!(reset_count, 1);

        // The due board was snapshotted and cleared.
        let snapshots = service
            .get_leaderboard_history(&due_board.id, Some(SnapshotType::Manual))
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(service.get_statistics(&due_board.id).await.unwrap().total_entries, 0);

        // The fresh board was left alone.
        assert_eq!(
            service.get_statistics(&fresh_board.id).await.unwrap().total_entries,
            1
        );

        let after = service.get_leaderboard(&due_board.id).await.unwrap();
        assert!(after.next_reset_date.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn sweep_with_nothing_due_is_a_no_op() {
        let (repo, service) = service_with_repo();
        create_daily_board(&service, "fresh").await;

        let reset_count = run_reset_sweep(&repo, &service).await.unwrap();
        assert_eq!(reset_count, 0);
    }

    #[tokio::test]
    async fn sweep_isolates_per_leaderboard_failures() {
        let (repo, service) = service_with_repo();

        let healthy = create_daily_board(&service, "healthy").await;
        submit(&service, &healthy.id, "alice", 100.0).await;
        make_due(&repo, &healthy).await;

        // A record the sweep will find but the service cannot reset: due in
        // the sweep listing, missing from the store by the time the reset
        // runs.
        let phantom_list: Arc<dyn LeaderboardRepository> =
            Arc::new(InMemoryLeaderboardRepository::new());
        let mut phantom = healthy.clone();
        phantom.id = "phantom".to_string();
        phantom.next_reset_date = Some(Utc::now() - ChronoDuration::hours(1));
        phantom_list.save(&phantom).await.unwrap();
        let healthy_listed = service.get_leaderboard(&healthy.id).await.unwrap();
        phantom_list.save(&healthy_listed).await.unwrap();

        let reset_count = run_reset_sweep(&phantom_list, &service).await.unwrap();

        // The phantom failed, the healthy board still reset.
        assert_eq!(reset_count, 1);
        assert_eq!(
            service.get_statistics(&healthy.id).await.unwrap().total_entries,
            0
        );
    }

    #[tokio::test]
    async fn daily_pass_snapshots_active_boards_only() {
        let (repo, service) = service_with_repo();

        let active = create_daily_board(&service, "active").await;
        submit(&service, &active.id, "alice", 100.0).await;

        let archived = create_daily_board(&service, "archived").await;
        service.delete_leaderboard(&archived.id).await.unwrap();

        let snapshot_count = run_daily_snapshots(&repo, &service).await.unwrap();
        assert_eq!(snapshot_count, 1);

        let snapshots = service
            .get_leaderboard_history(&active.id, Some(SnapshotType::Daily))
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].data.len(), 1);

        // Snapshots do not clear entries.
        assert_eq!(
            service.get_statistics(&active.id).await.unwrap().total_entries,
            1
        );
    }

    #[tokio::test]
    async fn daily_pass_records_user_history() {
        let (repo, service) = service_with_repo();
        let board = create_daily_board(&service, "tracked").await;
        submit(&service, &board.id, "alice", 90.0).await;

        run_daily_snapshots(&repo, &service).await.unwrap();

        let history = service.get_user_history(&board.id, "alice").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].percentile, 100.0);
    }
}
