use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::cache::RankingCache;
use super::entry_repository::EntryRepository;
use super::models::{
    Leaderboard, LeaderboardEntry, LeaderboardHistory, LeaderboardSnapshot, ScoringModel,
    SnapshotEntry, SnapshotType, SortDirection,
};
use super::repository::LeaderboardRepository;
use super::snapshot_repository::SnapshotRepository;
use super::types::{
    AroundUserResponse, CreateLeaderboardRequest, LeaderboardStatistics, ListLeaderboardsQuery,
    Paginated, RankingsQuery, SubmitScoreRequest, UpdateLeaderboardRequest, UserPosition,
    UserRanking,
};
use crate::shared::AppError;

/// How long cached ranking views live before a read recomputes them.
const CACHE_TTL: StdDuration = StdDuration::from_secs(300);

/// Scores above this are flagged as implausible by the anti-cheat check.
const SCORE_PLAUSIBILITY_CEILING: f64 = 1_000_000_000.0;

/// Maximum tolerated distance between client and server clocks, in ms.
const MAX_CLIENT_CLOCK_SKEW_MS: i64 = 300_000;

/// Service composing score submission, ranking queries, resets, snapshots
/// and statistics over the leaderboard stores.
///
/// Writes to one leaderboard (submission, recalculation, reset) serialize
/// on a lazily-created per-leaderboard mutex so two writers can never
/// compute ranks from a stale entry set; different leaderboards proceed
/// independently.
pub struct LeaderboardService {
    leaderboards: Arc<dyn LeaderboardRepository>,
    entries: Arc<dyn EntryRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    cache: Arc<dyn RankingCache>,
    board_mutexes: Arc<RwLock<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LeaderboardService {
    pub fn new(
        leaderboards: Arc<dyn LeaderboardRepository>,
        entries: Arc<dyn EntryRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        cache: Arc<dyn RankingCache>,
    ) -> Self {
        Self {
            leaderboards,
            entries,
            snapshots,
            cache,
            board_mutexes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a new leaderboard, stamping its first reset boundary from
    /// the configured period.
    #[instrument(skip(self, request))]
    pub async fn create_leaderboard(
        &self,
        request: CreateLeaderboardRequest,
    ) -> Result<Leaderboard, AppError> {
        let now = Utc::now();
        let leaderboard = Leaderboard {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            scoring_model: request.scoring_model,
            reset_period: request.reset_period,
            category: request.category,
            is_active: true,
            is_public: request.is_public,
            is_archived: false,
            metadata: request.metadata,
            max_entries: request.max_entries,
            entry_limit_per_user: request.entry_limit_per_user,
            minimum_score_threshold: request.minimum_score_threshold,
            last_reset_date: None,
            next_reset_date: request.reset_period.next_boundary(now),
            created_at: now,
            updated_at: now,
        };

        self.leaderboards.create(&leaderboard).await?;

        info!(
            leaderboard_id = %leaderboard.id,
            name = %leaderboard.name,
            scoring_model = %leaderboard.scoring_model,
            "Leaderboard created"
        );

        Ok(leaderboard)
    }

    /// Active, non-archived leaderboards, newest first.
    #[instrument(skip(self))]
    pub async fn list_leaderboards(
        &self,
        query: ListLeaderboardsQuery,
    ) -> Result<Paginated<Leaderboard>, AppError> {
        let (data, total) = self
            .leaderboards
            .find_active(query.page, query.limit, query.category.as_deref())
            .await?;

        Ok(Paginated {
            data,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_leaderboard(&self, id: &str) -> Result<Leaderboard, AppError> {
        self.leaderboards
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Leaderboard with ID \"{}\" not found", id)))
    }

    /// Partial update. A changed reset period recomputes the next reset
    /// boundary from now.
    #[instrument(skip(self, request))]
    pub async fn update_leaderboard(
        &self,
        id: &str,
        request: UpdateLeaderboardRequest,
    ) -> Result<Leaderboard, AppError> {
        let mut leaderboard = self.get_leaderboard(id).await?;

        if let Some(reset_period) = request.reset_period {
            if reset_period != leaderboard.reset_period {
                leaderboard.next_reset_date = reset_period.next_boundary(Utc::now());
            }
            leaderboard.reset_period = reset_period;
        }

        if let Some(name) = request.name {
            leaderboard.name = name;
        }
        if let Some(description) = request.description {
            leaderboard.description = Some(description);
        }
        if let Some(scoring_model) = request.scoring_model {
            leaderboard.scoring_model = scoring_model;
        }
        if let Some(category) = request.category {
            leaderboard.category = Some(category);
        }
        if let Some(is_active) = request.is_active {
            leaderboard.is_active = is_active;
        }
        if let Some(is_public) = request.is_public {
            leaderboard.is_public = is_public;
        }
        if let Some(max_entries) = request.max_entries {
            leaderboard.max_entries = max_entries;
        }
        if let Some(entry_limit) = request.entry_limit_per_user {
            leaderboard.entry_limit_per_user = entry_limit;
        }
        if let Some(threshold) = request.minimum_score_threshold {
            leaderboard.minimum_score_threshold = threshold;
        }
        if let Some(metadata) = request.metadata {
            leaderboard.metadata = metadata;
        }
        leaderboard.updated_at = Utc::now();

        self.leaderboards.save(&leaderboard).await?;
        self.invalidate_views(id).await;

        Ok(leaderboard)
    }

    /// Soft delete: archives the leaderboard and deactivates it without
    /// destroying its rows.
    #[instrument(skip(self))]
    pub async fn delete_leaderboard(&self, id: &str) -> Result<(), AppError> {
        let mut leaderboard = self.get_leaderboard(id).await?;

        leaderboard.is_archived = true;
        leaderboard.is_active = false;
        leaderboard.updated_at = Utc::now();

        self.leaderboards.save(&leaderboard).await?;
        self.invalidate_views(id).await;

        info!(leaderboard_id = %id, "Leaderboard archived");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn hard_delete_leaderboard(&self, id: &str) -> Result<(), AppError> {
        let affected = self.leaderboards.delete(id).await?;
        if affected == 0 {
            return Err(AppError::NotFound(format!(
                "Leaderboard with ID \"{}\" not found",
                id
            )));
        }

        self.entries.delete_by_leaderboard(id).await?;
        self.invalidate_views(id).await;
        self.clear_board_lock(id).await;

        info!(leaderboard_id = %id, "Leaderboard permanently deleted");
        Ok(())
    }

    /// Submits a score: policy checks, advisory anti-cheat, atomic
    /// write + full re-rank, cache invalidation. Returns the saved entry
    /// with its fresh rank; a failed anti-cheat check only flags it.
    #[instrument(skip(self, request), fields(score = request.score))]
    pub async fn submit_score(
        &self,
        leaderboard_id: &str,
        user_id: &str,
        username: &str,
        request: SubmitScoreRequest,
    ) -> Result<LeaderboardEntry, AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;

        if !leaderboard.is_active {
            return Err(AppError::PolicyViolation(
                "Cannot submit score to an inactive leaderboard".to_string(),
            ));
        }
        if request.score < 0.0 {
            return Err(AppError::PolicyViolation(
                "Score must be non-negative".to_string(),
            ));
        }
        if request.score < leaderboard.minimum_score_threshold {
            return Err(AppError::PolicyViolation(format!(
                "Score is below the minimum threshold of {}",
                leaderboard.minimum_score_threshold
            )));
        }

        let direction = leaderboard.scoring_model.direction();
        let lock = self.board_lock(leaderboard_id).await;
        let _guard = lock.lock().await;

        let existing = self.entries.find_by_user(leaderboard_id, user_id).await?;

        let entry = match existing {
            Some(mut current) => {
                // Uniqueness caps a user at one stored entry, so an existing
                // entry means the limit is reached whenever it is 1. Under a
                // larger limit further submissions fold into the same entry
                // without the improvement gate.
                if leaderboard.entry_limit_per_user <= 1
                    && !direction.improves(request.score, current.score)
                {
                    let reason = match direction {
                        SortDirection::Descending => {
                            "New score is not higher than your existing score"
                        }
                        SortDirection::Ascending => {
                            "New score is not lower than your existing score"
                        }
                    };
                    debug!(
                        leaderboard_id = %leaderboard_id,
                        user_id = %user_id,
                        existing_score = current.score,
                        "Rejecting non-improving submission"
                    );
                    return Err(AppError::PolicyViolation(reason.to_string()));
                }

                current.score = request.score;
                current.completion_time = request.completion_time;
                current.metadata = merge_metadata(current.metadata, &request.metadata);
                current.username = username.to_string();
                current.is_verified =
                    verify_score(request.score, &current.metadata, leaderboard.scoring_model);
                current.verified_at = current.is_verified.then(Utc::now);
                current.updated_at = Utc::now();
                current
            }
            None => {
                let mut entry = LeaderboardEntry::new(
                    leaderboard_id.to_string(),
                    user_id.to_string(),
                    username.to_string(),
                    request.score,
                );
                entry.completion_time = request.completion_time;
                entry.metadata = request.metadata.clone();
                entry.is_verified =
                    verify_score(request.score, &entry.metadata, leaderboard.scoring_model);
                entry.verified_at = entry.is_verified.then(Utc::now);
                entry
            }
        };

        let saved = self.entries.save_and_rerank(&entry, direction).await?;
        self.invalidate_views(leaderboard_id).await;

        info!(
            leaderboard_id = %leaderboard_id,
            user_id = %user_id,
            rank = saved.rank,
            is_verified = saved.is_verified,
            "Score submitted"
        );

        Ok(saved)
    }

    /// Paginated rankings, optionally restricted to a time frame, served
    /// through the view cache.
    #[instrument(skip(self))]
    pub async fn get_rankings(
        &self,
        leaderboard_id: &str,
        query: RankingsQuery,
    ) -> Result<Paginated<LeaderboardEntry>, AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;

        let frame_label = query
            .time_frame
            .map(|t| t.to_string())
            .unwrap_or_else(|| "all_time".to_string());
        let cache_key = format!(
            "leaderboard:{}:rankings:{}:{}:{}",
            leaderboard_id, query.page, query.limit, frame_label
        );

        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(page) = serde_json::from_str::<Paginated<LeaderboardEntry>>(&cached) {
                return Ok(page);
            }
        }

        let from_date = query.time_frame.and_then(|t| t.start(Utc::now()));
        let (data, total) = self
            .entries
            .find_page(
                leaderboard_id,
                leaderboard.scoring_model.direction(),
                query.page,
                query.limit,
                from_date,
            )
            .await?;

        let result = Paginated {
            data,
            total,
            page: query.page,
            limit: query.limit,
        };

        if let Ok(serialized) = serde_json::to_string(&result) {
            self.cache.set(&cache_key, serialized, CACHE_TTL).await;
        }

        Ok(result)
    }

    /// Top `limit` entries in scoring-direction order, cached.
    #[instrument(skip(self))]
    pub async fn get_top_rankings(
        &self,
        leaderboard_id: &str,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;

        let cache_key = format!("leaderboard:{}:top:{}", leaderboard_id, limit);
        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(entries) = serde_json::from_str::<Vec<LeaderboardEntry>>(&cached) {
                return Ok(entries);
            }
        }

        let entries = self
            .entries
            .find_top(leaderboard_id, leaderboard.scoring_model.direction(), limit)
            .await?;

        if let Ok(serialized) = serde_json::to_string(&entries) {
            self.cache.set(&cache_key, serialized, CACHE_TTL).await;
        }

        Ok(entries)
    }

    /// The window of entries whose rank falls within `range` of the user's
    /// rank. A user without an entry gets the absent-position sentinel and
    /// the top of the board as a fallback.
    #[instrument(skip(self))]
    pub async fn get_rankings_around_user(
        &self,
        leaderboard_id: &str,
        user_id: &str,
        range: u32,
    ) -> Result<AroundUserResponse, AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;
        let direction = leaderboard.scoring_model.direction();

        let user_entry = self.entries.find_by_user(leaderboard_id, user_id).await?;

        let entry = match user_entry {
            Some(entry) => entry,
            None => {
                return Ok(AroundUserResponse {
                    user_entry: None,
                    rankings: self.get_top_rankings(leaderboard_id, range * 2).await?,
                    user_position: UserPosition::absent(),
                });
            }
        };

        let total = self.entries.count(leaderboard_id).await?;
        let user_rank = entry.rank.max(1) as u32;
        let start_rank = user_rank.saturating_sub(range).max(1);
        let count = user_rank + range - start_rank + 1;

        let rankings = self
            .entries
            .find_rank_window(leaderboard_id, direction, start_rank, count)
            .await?;

        Ok(AroundUserResponse {
            user_position: UserPosition {
                rank: entry.rank,
                percentile: entry.percentile,
                total,
            },
            user_entry: Some(entry),
            rankings,
        })
    }

    /// A user's standing on one leaderboard; {0, 0, 0} when they have no
    /// entry.
    #[instrument(skip(self))]
    pub async fn get_user_position(
        &self,
        leaderboard_id: &str,
        user_id: &str,
    ) -> Result<UserPosition, AppError> {
        self.get_leaderboard(leaderboard_id).await?;

        match self.entries.find_by_user(leaderboard_id, user_id).await? {
            Some(entry) => {
                let total = self.entries.count(leaderboard_id).await?;
                Ok(UserPosition {
                    rank: entry.rank,
                    percentile: entry.percentile,
                    total,
                })
            }
            None => Ok(UserPosition::absent()),
        }
    }

    /// A user's entries across every active leaderboard.
    #[instrument(skip(self))]
    pub async fn get_user_rankings(&self, user_id: &str) -> Result<Vec<UserRanking>, AppError> {
        let entries = self.entries.find_by_user_across(user_id).await?;

        let mut rankings = Vec::new();
        for entry in entries {
            let leaderboard = self.leaderboards.find_by_id(&entry.leaderboard_id).await?;
            if let Some(leaderboard) = leaderboard {
                if leaderboard.is_active {
                    rankings.push(UserRanking {
                        leaderboard_id: leaderboard.id,
                        leaderboard_name: leaderboard.name,
                        entry,
                    });
                }
            }
        }

        Ok(rankings)
    }

    /// Forces a full ranking pass and busts the cached views.
    #[instrument(skip(self))]
    pub async fn recalculate_leaderboard(&self, leaderboard_id: &str) -> Result<(), AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;

        let lock = self.board_lock(leaderboard_id).await;
        let _guard = lock.lock().await;

        self.entries
            .update_rankings(leaderboard_id, leaderboard.scoring_model.direction())
            .await?;
        self.invalidate_views(leaderboard_id).await;

        info!(leaderboard_id = %leaderboard_id, "Rankings recalculated");
        Ok(())
    }

    /// Resets a leaderboard: snapshots current standings, clears entries
    /// and advances the reset dates. Used by the manual endpoint and the
    /// rollover sweep.
    #[instrument(skip(self))]
    pub async fn reset_leaderboard(&self, leaderboard_id: &str) -> Result<(), AppError> {
        let mut leaderboard = self.get_leaderboard(leaderboard_id).await?;

        let lock = self.board_lock(leaderboard_id).await;
        {
            let _guard = lock.lock().await;

            self.snapshot_standings(&leaderboard, SnapshotType::Manual)
                .await?;
            let cleared = self.entries.delete_by_leaderboard(leaderboard_id).await?;

            let now = Utc::now();
            leaderboard.last_reset_date = Some(now);
            leaderboard.next_reset_date = leaderboard.reset_period.next_boundary(now);
            leaderboard.updated_at = now;
            self.leaderboards.save(&leaderboard).await?;

            info!(
                leaderboard_id = %leaderboard_id,
                entries_cleared = cleared,
                next_reset = ?leaderboard.next_reset_date,
                "Leaderboard reset"
            );
        }

        self.invalidate_views(leaderboard_id).await;
        self.clear_board_lock(leaderboard_id).await;
        Ok(())
    }

    /// Captures the current standings as an immutable snapshot.
    #[instrument(skip(self))]
    pub async fn create_snapshot(
        &self,
        leaderboard_id: &str,
        snapshot_type: SnapshotType,
    ) -> Result<LeaderboardSnapshot, AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;
        self.snapshot_standings(&leaderboard, snapshot_type).await
    }

    /// Daily snapshot plus per-user history rows, for the scheduled pass.
    #[instrument(skip(self))]
    pub async fn record_daily_snapshot(
        &self,
        leaderboard_id: &str,
    ) -> Result<LeaderboardSnapshot, AppError> {
        let leaderboard = self.get_leaderboard(leaderboard_id).await?;

        let entries = self.entries.find_all_ranked(leaderboard_id).await?;
        let snapshot = LeaderboardSnapshot::new(
            leaderboard.id.clone(),
            entries.iter().map(snapshot_entry).collect(),
            SnapshotType::Daily,
        );
        self.snapshots.create(&snapshot).await?;

        let today = Utc::now().date_naive();
        let history: Vec<LeaderboardHistory> = entries
            .iter()
            .map(|e| LeaderboardHistory::from_entry(e, today))
            .collect();
        if !history.is_empty() {
            self.snapshots.record_history(&history).await?;
        }

        Ok(snapshot)
    }

    /// Latest snapshots for a leaderboard, newest first (at most 10).
    #[instrument(skip(self))]
    pub async fn get_leaderboard_history(
        &self,
        leaderboard_id: &str,
        snapshot_type: Option<SnapshotType>,
    ) -> Result<Vec<LeaderboardSnapshot>, AppError> {
        self.get_leaderboard(leaderboard_id).await?;
        self.snapshots
            .find_recent(leaderboard_id, snapshot_type, 10)
            .await
    }

    /// A user's per-day trend rows on one leaderboard.
    #[instrument(skip(self))]
    pub async fn get_user_history(
        &self,
        leaderboard_id: &str,
        user_id: &str,
    ) -> Result<Vec<LeaderboardHistory>, AppError> {
        self.get_leaderboard(leaderboard_id).await?;
        self.snapshots
            .find_user_history(leaderboard_id, user_id, 30)
            .await
    }

    /// Aggregate score statistics plus the 24-hour activity count.
    #[instrument(skip(self))]
    pub async fn get_statistics(
        &self,
        leaderboard_id: &str,
    ) -> Result<LeaderboardStatistics, AppError> {
        self.get_leaderboard(leaderboard_id).await?;

        let aggregates = self.entries.statistics(leaderboard_id).await?;
        let recent = self
            .entries
            .count_since(leaderboard_id, Utc::now() - Duration::hours(24))
            .await?;

        Ok(LeaderboardStatistics {
            total_entries: aggregates.total,
            average_score: aggregates.average,
            highest_score: aggregates.highest,
            lowest_score: aggregates.lowest,
            recent_activity_count: recent,
        })
    }

    async fn snapshot_standings(
        &self,
        leaderboard: &Leaderboard,
        snapshot_type: SnapshotType,
    ) -> Result<LeaderboardSnapshot, AppError> {
        let entries = self.entries.find_all_ranked(&leaderboard.id).await?;
        let snapshot = LeaderboardSnapshot::new(
            leaderboard.id.clone(),
            entries.iter().map(snapshot_entry).collect(),
            snapshot_type,
        );
        self.snapshots.create(&snapshot).await?;
        Ok(snapshot)
    }

    async fn invalidate_views(&self, leaderboard_id: &str) {
        self.cache
            .invalidate_prefix(&format!("leaderboard:{}:", leaderboard_id))
            .await;
    }

    async fn board_lock(&self, leaderboard_id: &str) -> Arc<AsyncMutex<()>> {
        {
            let guard = self.board_mutexes.read().await;
            if let Some(lock) = guard.get(leaderboard_id) {
                return lock.clone();
            }
        }

        let mut guard = self.board_mutexes.write().await;
        guard
            .entry(leaderboard_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn clear_board_lock(&self, leaderboard_id: &str) {
        let mut guard = self.board_mutexes.write().await;
        guard.remove(leaderboard_id);
    }
}

fn snapshot_entry(entry: &LeaderboardEntry) -> SnapshotEntry {
    SnapshotEntry {
        user_id: entry.user_id.clone(),
        username: entry.username.clone(),
        score: entry.score,
        rank: entry.rank,
        percentile: entry.percentile,
    }
}

/// Shallow merge; keys from `incoming` win. Non-object payloads replace
/// the stored value wholesale.
fn merge_metadata(existing: Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut base), Value::Object(update)) => {
            for (key, value) in update {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (_, incoming) => incoming.clone(),
    }
}

/// Advisory anti-cheat heuristic. A failed check flags the entry
/// unverified; it never blocks the submission.
fn verify_score(score: f64, metadata: &Value, scoring_model: ScoringModel) -> bool {
    if score > SCORE_PLAUSIBILITY_CEILING {
        return false;
    }

    let client_timestamp = metadata.get("clientTimestamp");
    if client_timestamp.is_none() && metadata.get("gameSession").is_none() {
        return false;
    }

    if let Some(client_ms) = client_timestamp.and_then(timestamp_millis) {
        let server_ms = Utc::now().timestamp_millis();
        if (server_ms - client_ms).abs() > MAX_CLIENT_CLOCK_SKEW_MS {
            return false;
        }
    }

    if scoring_model == ScoringModel::FastestCompletion
        && metadata.get("startTime").is_none()
        && metadata.get("endTime").is_none()
    {
        return false;
    }

    true
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.timestamp_millis()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::cache::InMemoryRankingCache;
    use crate::leaderboard::entry_repository::InMemoryEntryRepository;
    use crate::leaderboard::models::ResetPeriod;
    use crate::leaderboard::repository::InMemoryLeaderboardRepository;
    use crate::leaderboard::snapshot_repository::InMemorySnapshotRepository;
    use serde_json::json;
    use std::collections::HashSet;

    /// Test helper functions for creating test data
    mod helpers {
        use super::*;

        pub fn service() -> LeaderboardService {
            LeaderboardService::new(
                Arc::new(InMemoryLeaderboardRepository::new()),
                Arc::new(InMemoryEntryRepository::new()),
                Arc::new(InMemorySnapshotRepository::new()),
                Arc::new(InMemoryRankingCache::new()),
            )
        }

        pub fn create_request(name: &str) -> CreateLeaderboardRequest {
            serde_json::from_value(json!({ "name": name })).unwrap()
        }

        pub fn submission(score: f64) -> SubmitScoreRequest {
            SubmitScoreRequest {
                score,
                completion_time: None,
                metadata: json!({
                    "clientTimestamp": Utc::now().timestamp_millis(),
                    "gameSession": "session-1"
                }),
            }
        }

        pub async fn create_board(service: &LeaderboardService, name: &str) -> Leaderboard {
            service
                .create_leaderboard(create_request(name))
                .await
                .unwrap()
        }
    }

    use helpers::*;

    #[tokio::test]
    async fn submit_creates_verified_entry_at_rank_one() {
        let service = service();
        let board = create_board(&service, "arena").await;

        let entry = service
            .submit_score(&board.id, "alice", "alice", submission(100.0))
            .await
            .unwrap();

        assert_eq!(entry.rank, 1);
        assert_eq!(entry.percentile, 100.0);
        assert!(entry.is_verified);
        assert!(entry.verified_at.is_some());
    }

    #[tokio::test]
    async fn submit_to_unknown_leaderboard_is_not_found() {
        let service = service();
        let result = service
            .submit_score("missing", "alice", "alice", submission(100.0))
            .await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn submit_to_inactive_leaderboard_is_rejected() {
        let service = service();
        let board = create_board(&service, "arena").await;
        service.delete_leaderboard(&board.id).await.unwrap();

        let result = service
            .submit_score(&board.id, "alice", "alice", submission(100.0))
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::PolicyViolation(_)));
        assert!(err.to_string().contains("inactive"));
    }

    #[tokio::test]
    async fn submit_below_threshold_is_rejected() {
        let service = service();
        let request = CreateLeaderboardRequest {
            minimum_score_threshold: 50.0,
            ..create_request("gated")
        };
        let board = service.create_leaderboard(request).await.unwrap();

        let err = service
            .submit_score(&board.id, "alice", "alice", submission(40.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("threshold"));

        let entry = service
            .submit_score(&board.id, "alice", "alice", submission(60.0))
            .await
            .unwrap();
        assert_eq!(entry.score, 60.0);
    }

    #[tokio::test]
    async fn repeated_submissions_keep_one_entry_per_user() {
        let service = service();
        let board = create_board(&service, "arena").await;

        service
            .submit_score(&board.id, "alice", "alice", submission(100.0))
            .await
            .unwrap();
        service
            .submit_score(&board.id, "alice", "alice", submission(150.0))
            .await
            .unwrap();

        let stats = service.get_statistics(&board.id).await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.highest_score, 150.0);
    }

    #[tokio::test]
    async fn improvement_policy_requires_strictly_better_scores() {
        let service = service();
        let board = create_board(&service, "arena").await;

        service
            .submit_score(&board.id, "alice", "alice", submission(100.0))
            .await
            .unwrap();

        let err = service
            .submit_score(&board.id, "alice", "alice", submission(90.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not higher"));

        let err = service
            .submit_score(&board.id, "alice", "alice", submission(100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PolicyViolation(_)));

        let entry = service
            .submit_score(&board.id, "alice", "alice", submission(150.0))
            .await
            .unwrap();
        assert_eq!(entry.score, 150.0);
    }

    #[tokio::test]
    async fn ascending_boards_require_strictly_lower_scores() {
        let service = service();
        let request = CreateLeaderboardRequest {
            scoring_model: ScoringModel::FastestCompletion,
            ..create_request("speedrun")
        };
        let board = service.create_leaderboard(request).await.unwrap();

        let mut fast = submission(120.0);
        fast.metadata["startTime"] = json!(0);
        fast.metadata["endTime"] = json!(120_000);
        service
            .submit_score(&board.id, "alice", "alice", fast.clone())
            .await
            .unwrap();

        fast.score = 130.0;
        let err = service
            .submit_score(&board.id, "alice", "alice", fast.clone())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not lower"));

        fast.score = 90.0;
        let entry = service
            .submit_score(&board.id, "alice", "alice", fast)
            .await
            .unwrap();
        assert_eq!(entry.score, 90.0);
        assert_eq!(entry.rank, 1);
    }

    #[tokio::test]
    async fn metadata_merges_shallowly_with_new_keys_winning() {
        let service = service();
        let board = create_board(&service, "arena").await;

        let mut first = submission(100.0);
        first.metadata["device"] = json!("phone");
        first.metadata["region"] = json!("eu");
        service
            .submit_score(&board.id, "alice", "alice", first)
            .await
            .unwrap();

        let mut second = submission(150.0);
        second.metadata["device"] = json!("desktop");
        let entry = service
            .submit_score(&board.id, "alice", "alice", second)
            .await
            .unwrap();

        assert_eq!(entry.metadata["device"], json!("desktop"));
        assert_eq!(entry.metadata["region"], json!("eu"));
    }

    #[tokio::test]
    async fn unverified_submissions_are_still_ranked() {
        let service = service();
        let board = create_board(&service, "arena").await;

        // No anti-cheat metadata at all.
        let bare = SubmitScoreRequest {
            score: 100.0,
            completion_time: None,
            metadata: json!({}),
        };
        let entry = service
            .submit_score(&board.id, "alice", "alice", bare)
            .await
            .unwrap();

        assert!(!entry.is_verified);
        assert!(entry.verified_at.is_none());
        assert_eq!(entry.rank, 1);
    }

    #[tokio::test]
    async fn implausible_scores_are_flagged() {
        let service = service();
        let board = create_board(&service, "arena").await;

        let entry = service
            .submit_score(&board.id, "alice", "alice", submission(2_000_000_000.0))
            .await
            .unwrap();
        assert!(!entry.is_verified);
    }

    #[tokio::test]
    async fn skewed_client_clock_is_flagged() {
        let service = service();
        let board = create_board(&service, "arena").await;

        let request = SubmitScoreRequest {
            score: 100.0,
            completion_time: None,
            metadata: json!({
                "clientTimestamp": Utc::now().timestamp_millis() - 600_000,
                "gameSession": "session-1"
            }),
        };
        let entry = service
            .submit_score(&board.id, "alice", "alice", request)
            .await
            .unwrap();
        assert!(!entry.is_verified);
    }

    #[tokio::test]
    async fn ranks_stay_contiguous_across_users() {
        let service = service();
        let board = create_board(&service, "arena").await;

        for (user, score) in [("a", 30.0), ("b", 10.0), ("c", 20.0), ("d", 40.0)] {
            service
                .submit_score(&board.id, user, user, submission(score))
                .await
                .unwrap();
        }

        let top = service.get_top_rankings(&board.id, 10).await.unwrap();
        let ranks: HashSet<i32> = top.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, (1..=4).collect::<HashSet<i32>>());
        assert_eq!(top[0].user_id, "d");
    }

    #[tokio::test]
    async fn around_user_returns_exact_rank_window() {
        let service = service();
        let board = create_board(&service, "arena").await;

        for i in 0..21 {
            let user = format!("user-{:02}", i);
            service
                .submit_score(&board.id, &user, &user, submission((100 - i) as f64))
                .await
                .unwrap();
        }

        // user-09 scored 91, ninth best of 21 -> rank 10.
        let response = service
            .get_rankings_around_user(&board.id, "user-09", 5)
            .await
            .unwrap();

        assert_eq!(response.user_position.rank, 10);
        assert_eq!(response.user_position.total, 21);
        assert_eq!(response.rankings.len(), 11);
        assert_eq!(response.rankings.first().unwrap().rank, 5);
        assert_eq!(response.rankings.last().unwrap().rank, 15);
    }

    #[tokio::test]
    async fn around_user_clamps_at_the_top_of_the_board() {
        let service = service();
        let board = create_board(&service, "arena").await;

        for i in 0..10 {
            let user = format!("user-{}", i);
            service
                .submit_score(&board.id, &user, &user, submission((50 - i) as f64))
                .await
                .unwrap();
        }

        let response = service
            .get_rankings_around_user(&board.id, "user-1", 5)
            .await
            .unwrap();

        assert_eq!(response.user_position.rank, 2);
        assert_eq!(response.rankings.first().unwrap().rank, 1);
        assert_eq!(response.rankings.last().unwrap().rank, 7);
    }

    #[tokio::test]
    async fn around_user_without_entry_falls_back_to_top() {
        let service = service();
        let board = create_board(&service, "arena").await;

        for (user, score) in [("a", 10.0), ("b", 20.0)] {
            service
                .submit_score(&board.id, user, user, submission(score))
                .await
                .unwrap();
        }

        let response = service
            .get_rankings_around_user(&board.id, "stranger", 5)
            .await
            .unwrap();

        assert!(response.user_entry.is_none());
        assert_eq!(response.user_position, UserPosition::absent());
        assert!(!response.rankings.is_empty());
    }

    #[tokio::test]
    async fn user_position_sentinel_for_missing_entry() {
        let service = service();
        let board = create_board(&service, "arena").await;

        let position = service
            .get_user_position(&board.id, "nobody")
            .await
            .unwrap();
        assert_eq!(position, UserPosition::absent());
    }

    #[tokio::test]
    async fn reset_snapshots_clears_and_advances_dates() {
        let service = service();
        let request = CreateLeaderboardRequest {
            reset_period: ResetPeriod::Daily,
            ..create_request("daily-arena")
        };
        let board = service.create_leaderboard(request).await.unwrap();

        service
            .submit_score(&board.id, "a", "a", submission(100.0))
            .await
            .unwrap();
        service
            .submit_score(&board.id, "b", "b", submission(80.0))
            .await
            .unwrap();

        service.reset_leaderboard(&board.id).await.unwrap();

        let snapshots = service
            .get_leaderboard_history(&board.id, None)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].snapshot_type, SnapshotType::Manual);
        assert_eq!(snapshots[0].data.len(), 2);
        assert_eq!(snapshots[0].data[0].rank, 1);
        assert_eq!(snapshots[0].data[0].user_id, "a");

        let stats = service.get_statistics(&board.id).await.unwrap();
        assert_eq!(stats.total_entries, 0);

        let after = service.get_leaderboard(&board.id).await.unwrap();
        assert!(after.last_reset_date.is_some());
        let next = after.next_reset_date.unwrap();
        assert!(next > Utc::now());
        assert_eq!(
            next,
            ResetPeriod::Daily.next_boundary(after.last_reset_date.unwrap()).unwrap()
        );
    }

    #[tokio::test]
    async fn recalculate_is_idempotent() {
        let service = service();
        let board = create_board(&service, "arena").await;

        for (user, score) in [("a", 30.0), ("b", 30.0), ("c", 10.0)] {
            service
                .submit_score(&board.id, user, user, submission(score))
                .await
                .unwrap();
        }

        service.recalculate_leaderboard(&board.id).await.unwrap();
        let first = service.get_top_rankings(&board.id, 10).await.unwrap();

        service.recalculate_leaderboard(&board.id).await.unwrap();
        let second = service.get_top_rankings(&board.id, 10).await.unwrap();

        let key = |entries: &[LeaderboardEntry]| -> Vec<(String, i32, f64)> {
            entries
                .iter()
                .map(|e| (e.user_id.clone(), e.rank, e.percentile))
                .collect()
        };
        assert_eq!(key(&first), key(&second));
    }

    #[tokio::test]
    async fn writes_invalidate_cached_views() {
        let service = service();
        let board = create_board(&service, "arena").await;

        service
            .submit_score(&board.id, "a", "a", submission(100.0))
            .await
            .unwrap();

        // Prime the cache.
        let before = service.get_top_rankings(&board.id, 10).await.unwrap();
        assert_eq!(before.len(), 1);

        service
            .submit_score(&board.id, "b", "b", submission(200.0))
            .await
            .unwrap();

        let after = service.get_top_rankings(&board.id, 10).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].user_id, "b");
    }

    #[tokio::test]
    async fn statistics_track_scores_and_activity() {
        let service = service();
        let board = create_board(&service, "arena").await;

        for (user, score) in [("a", 10.0), ("b", 20.0), ("c", 60.0)] {
            service
                .submit_score(&board.id, user, user, submission(score))
                .await
                .unwrap();
        }

        let stats = service.get_statistics(&board.id).await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.average_score, 30.0);
        assert_eq!(stats.highest_score, 60.0);
        assert_eq!(stats.lowest_score, 10.0);
        assert_eq!(stats.recent_activity_count, 3);
    }

    #[tokio::test]
    async fn update_with_new_reset_period_recomputes_boundary() {
        let service = service();
        let board = create_board(&service, "arena").await;
        assert!(board.next_reset_date.is_none());

        let updated = service
            .update_leaderboard(
                &board.id,
                UpdateLeaderboardRequest {
                    reset_period: Some(ResetPeriod::Weekly),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.reset_period, ResetPeriod::Weekly);
        assert!(updated.next_reset_date.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn hard_delete_removes_board_and_entries() {
        let service = service();
        let board = create_board(&service, "arena").await;
        service
            .submit_score(&board.id, "a", "a", submission(10.0))
            .await
            .unwrap();

        service.hard_delete_leaderboard(&board.id).await.unwrap();

        assert!(matches!(
            service.get_leaderboard(&board.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            service.hard_delete_leaderboard(&board.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn user_rankings_span_active_leaderboards() {
        let service = service();
        let arena = create_board(&service, "arena").await;
        let sprint = create_board(&service, "sprint").await;
        let retired = create_board(&service, "retired").await;

        for board in [&arena, &sprint, &retired] {
            service
                .submit_score(&board.id, "alice", "alice", submission(42.0))
                .await
                .unwrap();
        }
        service.delete_leaderboard(&retired.id).await.unwrap();

        let rankings = service.get_user_rankings("alice").await.unwrap();
        assert_eq!(rankings.len(), 2);
        let names: HashSet<String> =
            rankings.iter().map(|r| r.leaderboard_name.clone()).collect();
        assert!(names.contains("arena"));
        assert!(names.contains("sprint"));
    }

    #[tokio::test]
    async fn daily_snapshot_records_history_rows() {
        let service = service();
        let board = create_board(&service, "arena").await;
        service
            .submit_score(&board.id, "alice", "alice", submission(70.0))
            .await
            .unwrap();

        let snapshot = service.record_daily_snapshot(&board.id).await.unwrap();
        assert_eq!(snapshot.snapshot_type, SnapshotType::Daily);
        assert_eq!(snapshot.data.len(), 1);

        let history = service
            .get_user_history(&board.id, "alice")
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].rank, 1);
    }

    #[tokio::test]
    async fn concurrent_submissions_keep_ranks_consistent() {
        let service = Arc::new(service());
        let board = create_board(&service, "arena").await;

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let service = Arc::clone(&service);
                let board_id = board.id.clone();
                tokio::spawn(async move {
                    let user = format!("user-{}", i);
                    service
                        .submit_score(&board_id, &user, &user, submission(10.0 * i as f64))
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        for result in results {
            result.unwrap().unwrap();
        }

        let top = service.get_top_rankings(&board.id, 20).await.unwrap();
        assert_eq!(top.len(), 10);
        let ranks: HashSet<i32> = top.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, (1..=10).collect::<HashSet<i32>>());
    }

    mod verify_score_checks {
        use super::*;

        #[test]
        fn passes_with_session_only() {
            let metadata = json!({ "gameSession": "s" });
            assert!(verify_score(10.0, &metadata, ScoringModel::HighestScore));
        }

        #[test]
        fn fails_when_both_identifiers_missing() {
            let metadata = json!({ "other": 1 });
            assert!(!verify_score(10.0, &metadata, ScoringModel::HighestScore));
        }

        #[test]
        fn fastest_completion_needs_timing_metadata() {
            let metadata = json!({ "gameSession": "s" });
            assert!(!verify_score(10.0, &metadata, ScoringModel::FastestCompletion));

            let with_start = json!({ "gameSession": "s", "startTime": 0 });
            assert!(verify_score(10.0, &with_start, ScoringModel::FastestCompletion));
        }

        #[test]
        fn accepts_rfc3339_client_timestamps() {
            let metadata = json!({
                "clientTimestamp": Utc::now().to_rfc3339(),
                "gameSession": "s"
            });
            assert!(verify_score(10.0, &metadata, ScoringModel::HighestScore));
        }

        #[test]
        fn unparseable_timestamp_skips_the_skew_check() {
            let metadata = json!({ "clientTimestamp": "not-a-date", "gameSession": "s" });
            assert!(verify_score(10.0, &metadata, ScoringModel::HighestScore));
        }
    }
}
