use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::{LeaderboardEntry, SortDirection};
use super::ranking;
use crate::shared::AppError;

/// Aggregate score figures for one leaderboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreAggregates {
    pub total: u64,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
}

impl ScoreAggregates {
    pub fn empty() -> Self {
        Self {
            total: 0,
            average: 0.0,
            highest: 0.0,
            lowest: 0.0,
        }
    }
}

/// Trait for leaderboard entry operations.
///
/// `save_and_rerank` and `update_rankings` are the only paths that write
/// rank/percentile; both re-rank the leaderboard's full entry set with the
/// ordering defined in `ranking`.
#[async_trait]
pub trait EntryRepository: Send + Sync {
    async fn find_by_user(
        &self,
        leaderboard_id: &str,
        user_id: &str,
    ) -> Result<Option<LeaderboardEntry>, AppError>;

    /// Upserts the entry (unique per leaderboard/user) and recomputes ranks
    /// for the whole leaderboard atomically: both changes land together or
    /// not at all. Returns the saved entry with its fresh rank.
    async fn save_and_rerank(
        &self,
        entry: &LeaderboardEntry,
        direction: SortDirection,
    ) -> Result<LeaderboardEntry, AppError>;

    /// Full ranking pass without an entry write.
    async fn update_rankings(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
    ) -> Result<(), AppError>;

    async fn find_top(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError>;

    /// Entries occupying ranks [start_rank, start_rank + count) in
    /// scoring-direction order.
    async fn find_rank_window(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        start_rank: u32,
        count: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError>;

    /// Offset-paginated page in scoring-direction order, optionally
    /// restricted to entries created at or after `from_date`. Returns the
    /// page plus the total match count.
    async fn find_page(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        page: u32,
        limit: u32,
        from_date: Option<DateTime<Utc>>,
    ) -> Result<(Vec<LeaderboardEntry>, u64), AppError>;

    /// All entries of a leaderboard by stored rank ascending, for snapshots.
    async fn find_all_ranked(&self, leaderboard_id: &str)
        -> Result<Vec<LeaderboardEntry>, AppError>;

    /// A user's entries across every leaderboard.
    async fn find_by_user_across(&self, user_id: &str) -> Result<Vec<LeaderboardEntry>, AppError>;

    async fn count(&self, leaderboard_id: &str) -> Result<u64, AppError>;

    async fn count_since(
        &self,
        leaderboard_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    async fn statistics(&self, leaderboard_id: &str) -> Result<ScoreAggregates, AppError>;

    /// Removes every entry of a leaderboard. Returns the number removed.
    async fn delete_by_leaderboard(&self, leaderboard_id: &str) -> Result<u64, AppError>;
}

/// In-memory implementation of EntryRepository for development and testing.
/// Entries are kept per leaderboard; every mutation happens under one lock,
/// so the upsert + re-rank pair is atomic.
pub struct InMemoryEntryRepository {
    boards: Mutex<HashMap<String, Vec<LeaderboardEntry>>>,
}

impl Default for InMemoryEntryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEntryRepository {
    /// Creates a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            boards: Mutex::new(HashMap::new()),
        }
    }

    fn sorted_board(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
    ) -> Vec<LeaderboardEntry> {
        let boards = self.boards.lock().unwrap();
        let mut entries = boards.get(leaderboard_id).cloned().unwrap_or_default();
        ranking::sort_in_direction(&mut entries, direction);
        entries
    }
}

#[async_trait]
impl EntryRepository for InMemoryEntryRepository {
    #[instrument(skip(self))]
    async fn find_by_user(
        &self,
        leaderboard_id: &str,
        user_id: &str,
    ) -> Result<Option<LeaderboardEntry>, AppError> {
        let boards = self.boards.lock().unwrap();
        Ok(boards
            .get(leaderboard_id)
            .and_then(|entries| entries.iter().find(|e| e.user_id == user_id))
            .cloned())
    }

    #[instrument(skip(self, entry))]
    async fn save_and_rerank(
        &self,
        entry: &LeaderboardEntry,
        direction: SortDirection,
    ) -> Result<LeaderboardEntry, AppError> {
        debug!(
            leaderboard_id = %entry.leaderboard_id,
            user_id = %entry.user_id,
            score = entry.score,
            "Saving entry and re-ranking leaderboard in memory"
        );

        let mut boards = self.boards.lock().unwrap();
        let entries = boards.entry(entry.leaderboard_id.clone()).or_default();

        match entries.iter_mut().find(|e| e.user_id == entry.user_id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }

        ranking::assign_ranks(entries, direction);

        let saved = entries
            .iter()
            .find(|e| e.user_id == entry.user_id)
            .cloned()
            .ok_or(AppError::Internal)?;

        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn update_rankings(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
    ) -> Result<(), AppError> {
        let mut boards = self.boards.lock().unwrap();
        if let Some(entries) = boards.get_mut(leaderboard_id) {
            ranking::assign_ranks(entries, direction);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_top(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let entries = self.sorted_board(leaderboard_id, direction);
        Ok(entries.into_iter().take(limit as usize).collect())
    }

    #[instrument(skip(self))]
    async fn find_rank_window(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        start_rank: u32,
        count: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let entries = self.sorted_board(leaderboard_id, direction);
        Ok(entries
            .into_iter()
            .skip(start_rank.saturating_sub(1) as usize)
            .take(count as usize)
            .collect())
    }

    #[instrument(skip(self))]
    async fn find_page(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        page: u32,
        limit: u32,
        from_date: Option<DateTime<Utc>>,
    ) -> Result<(Vec<LeaderboardEntry>, u64), AppError> {
        let mut entries = self.sorted_board(leaderboard_id, direction);
        if let Some(from) = from_date {
            entries.retain(|e| e.created_at >= from);
        }

        let total = entries.len() as u64;
        let offset = (page.saturating_sub(1) * limit) as usize;
        let data = entries
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok((data, total))
    }

    #[instrument(skip(self))]
    async fn find_all_ranked(
        &self,
        leaderboard_id: &str,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let boards = self.boards.lock().unwrap();
        let mut entries = boards.get(leaderboard_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| e.rank);
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn find_by_user_across(&self, user_id: &str) -> Result<Vec<LeaderboardEntry>, AppError> {
        let boards = self.boards.lock().unwrap();
        Ok(boards
            .values()
            .flatten()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn count(&self, leaderboard_id: &str) -> Result<u64, AppError> {
        let boards = self.boards.lock().unwrap();
        Ok(boards.get(leaderboard_id).map_or(0, |e| e.len()) as u64)
    }

    #[instrument(skip(self))]
    async fn count_since(
        &self,
        leaderboard_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let boards = self.boards.lock().unwrap();
        Ok(boards
            .get(leaderboard_id)
            .map_or(0, |entries| {
                entries.iter().filter(|e| e.created_at >= since).count()
            }) as u64)
    }

    #[instrument(skip(self))]
    async fn statistics(&self, leaderboard_id: &str) -> Result<ScoreAggregates, AppError> {
        let boards = self.boards.lock().unwrap();
        let entries = match boards.get(leaderboard_id) {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Ok(ScoreAggregates::empty()),
        };

        let total = entries.len() as u64;
        let sum: f64 = entries.iter().map(|e| e.score).sum();
        let highest = entries.iter().map(|e| e.score).fold(f64::MIN, f64::max);
        let lowest = entries.iter().map(|e| e.score).fold(f64::MAX, f64::min);

        Ok(ScoreAggregates {
            total,
            average: sum / total as f64,
            highest,
            lowest,
        })
    }

    #[instrument(skip(self))]
    async fn delete_by_leaderboard(&self, leaderboard_id: &str) -> Result<u64, AppError> {
        let mut boards = self.boards.lock().unwrap();
        Ok(boards.remove(leaderboard_id).map_or(0, |e| e.len()) as u64)
    }
}

/// PostgreSQL implementation of the entry repository
pub struct PostgresEntryRepository {
    pool: PgPool,
}

impl PostgresEntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_entry_row(row: &PgRow) -> LeaderboardEntry {
    LeaderboardEntry {
        id: row.get("id"),
        leaderboard_id: row.get("leaderboard_id"),
        user_id: row.get("user_id"),
        username: row.get("username"),
        score: row.get("score"),
        rank: row.get("rank"),
        percentile: row.get("percentile"),
        metadata: row.get("metadata"),
        completion_time: row.get("completion_time"),
        is_verified: row.get("is_verified"),
        verified_at: row.get("verified_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const ENTRY_COLUMNS: &str = "id, leaderboard_id, user_id, username, score, rank, percentile, \
     metadata, completion_time, is_verified, verified_at, created_at, updated_at";

fn order_keyword(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Descending => "DESC",
        SortDirection::Ascending => "ASC",
    }
}

/// One statement that mirrors `ranking::assign_ranks`: same direction,
/// same created_at/id tie-break, same percentile formula and single-entry
/// special case.
fn rerank_sql(direction: SortDirection) -> String {
    format!(
        "WITH ranked AS ( \
             SELECT id, \
                    ROW_NUMBER() OVER (ORDER BY score {order}, created_at ASC, id ASC) AS new_rank, \
                    COUNT(*) OVER () AS total \
             FROM leaderboard_entries \
             WHERE leaderboard_id = $1 \
         ) \
         UPDATE leaderboard_entries AS entry \
         SET rank = ranked.new_rank::int, \
             percentile = CASE \
                 WHEN ranked.total <= 1 THEN 100 \
                 ELSE (ranked.total - ranked.new_rank)::double precision / ranked.total * 100 \
             END \
         FROM ranked \
         WHERE entry.id = ranked.id",
        order = order_keyword(direction)
    )
}

#[async_trait]
impl EntryRepository for PostgresEntryRepository {
    #[instrument(skip(self))]
    async fn find_by_user(
        &self,
        leaderboard_id: &str,
        user_id: &str,
    ) -> Result<Option<LeaderboardEntry>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM leaderboard_entries WHERE leaderboard_id = $1 AND user_id = $2",
            ENTRY_COLUMNS
        ))
        .bind(leaderboard_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch entry from database");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(row.as_ref().map(map_entry_row))
    }

    #[instrument(skip(self, entry))]
    async fn save_and_rerank(
        &self,
        entry: &LeaderboardEntry,
        direction: SortDirection,
    ) -> Result<LeaderboardEntry, AppError> {
        debug!(
            leaderboard_id = %entry.leaderboard_id,
            user_id = %entry.user_id,
            score = entry.score,
            "Saving entry and re-ranking leaderboard in database"
        );

        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to open entry transaction");
            AppError::DatabaseError(e.to_string())
        })?;

        sqlx::query(
            "INSERT INTO leaderboard_entries (id, leaderboard_id, user_id, username, score, rank, \
             percentile, metadata, completion_time, is_verified, verified_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (leaderboard_id, user_id) DO UPDATE SET \
                 username = EXCLUDED.username, \
                 score = EXCLUDED.score, \
                 metadata = EXCLUDED.metadata, \
                 completion_time = EXCLUDED.completion_time, \
                 is_verified = EXCLUDED.is_verified, \
                 verified_at = EXCLUDED.verified_at, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&entry.id)
        .bind(&entry.leaderboard_id)
        .bind(&entry.user_id)
        .bind(&entry.username)
        .bind(entry.score)
        .bind(entry.rank)
        .bind(entry.percentile)
        .bind(&entry.metadata)
        .bind(entry.completion_time)
        .bind(entry.is_verified)
        .bind(entry.verified_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %entry.leaderboard_id, "Failed to upsert entry");
            AppError::DatabaseError(e.to_string())
        })?;

        sqlx::query(&rerank_sql(direction))
            .bind(&entry.leaderboard_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                warn!(error = %e, leaderboard_id = %entry.leaderboard_id, "Failed to re-rank leaderboard");
                AppError::DatabaseError(e.to_string())
            })?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM leaderboard_entries WHERE leaderboard_id = $1 AND user_id = $2",
            ENTRY_COLUMNS
        ))
        .bind(&entry.leaderboard_id)
        .bind(&entry.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to read back saved entry");
            AppError::DatabaseError(e.to_string())
        })?;

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit entry transaction");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(map_entry_row(&row))
    }

    #[instrument(skip(self))]
    async fn update_rankings(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
    ) -> Result<(), AppError> {
        sqlx::query(&rerank_sql(direction))
            .bind(leaderboard_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to update rankings");
                AppError::DatabaseError(e.to_string())
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_top(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leaderboard_entries WHERE leaderboard_id = $1 \
             ORDER BY score {}, created_at ASC, id ASC LIMIT $2",
            ENTRY_COLUMNS,
            order_keyword(direction)
        ))
        .bind(leaderboard_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch top rankings");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(rows.iter().map(map_entry_row).collect())
    }

    #[instrument(skip(self))]
    async fn find_rank_window(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        start_rank: u32,
        count: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leaderboard_entries WHERE leaderboard_id = $1 \
             ORDER BY score {}, created_at ASC, id ASC OFFSET $2 LIMIT $3",
            ENTRY_COLUMNS,
            order_keyword(direction)
        ))
        .bind(leaderboard_id)
        .bind(start_rank.saturating_sub(1) as i64)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch rank window");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(rows.iter().map(map_entry_row).collect())
    }

    #[instrument(skip(self))]
    async fn find_page(
        &self,
        leaderboard_id: &str,
        direction: SortDirection,
        page: u32,
        limit: u32,
        from_date: Option<DateTime<Utc>>,
    ) -> Result<(Vec<LeaderboardEntry>, u64), AppError> {
        let offset = page.saturating_sub(1) as i64 * limit as i64;

        let (rows, total) = match from_date {
            Some(from) => {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM leaderboard_entries \
                     WHERE leaderboard_id = $1 AND created_at >= $2 \
                     ORDER BY score {}, created_at ASC, id ASC OFFSET $3 LIMIT $4",
                    ENTRY_COLUMNS,
                    order_keyword(direction)
                ))
                .bind(leaderboard_id)
                .bind(from)
                .bind(offset)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await;

                let total = sqlx::query(
                    "SELECT COUNT(*) AS total FROM leaderboard_entries \
                     WHERE leaderboard_id = $1 AND created_at >= $2",
                )
                .bind(leaderboard_id)
                .bind(from)
                .fetch_one(&self.pool)
                .await;

                (rows, total)
            }
            None => {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM leaderboard_entries WHERE leaderboard_id = $1 \
                     ORDER BY score {}, created_at ASC, id ASC OFFSET $2 LIMIT $3",
                    ENTRY_COLUMNS,
                    order_keyword(direction)
                ))
                .bind(leaderboard_id)
                .bind(offset)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await;

                let total = sqlx::query(
                    "SELECT COUNT(*) AS total FROM leaderboard_entries WHERE leaderboard_id = $1",
                )
                .bind(leaderboard_id)
                .fetch_one(&self.pool)
                .await;

                (rows, total)
            }
        };

        let rows = rows.map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch rankings page");
            AppError::DatabaseError(e.to_string())
        })?;
        let total: i64 = total
            .map_err(|e| {
                warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to count entries");
                AppError::DatabaseError(e.to_string())
            })?
            .get("total");

        Ok((rows.iter().map(map_entry_row).collect(), total as u64))
    }

    #[instrument(skip(self))]
    async fn find_all_ranked(
        &self,
        leaderboard_id: &str,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leaderboard_entries WHERE leaderboard_id = $1 ORDER BY rank ASC",
            ENTRY_COLUMNS
        ))
        .bind(leaderboard_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch ranked entries");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(rows.iter().map(map_entry_row).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_user_across(&self, user_id: &str) -> Result<Vec<LeaderboardEntry>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leaderboard_entries WHERE user_id = $1",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = %user_id, "Failed to fetch user entries");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(rows.iter().map(map_entry_row).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self, leaderboard_id: &str) -> Result<u64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM leaderboard_entries WHERE leaderboard_id = $1",
        )
        .bind(leaderboard_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to count entries");
            AppError::DatabaseError(e.to_string())
        })?;

        let total: i64 = row.get("total");
        Ok(total as u64)
    }

    #[instrument(skip(self))]
    async fn count_since(
        &self,
        leaderboard_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM leaderboard_entries \
             WHERE leaderboard_id = $1 AND created_at >= $2",
        )
        .bind(leaderboard_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to count recent entries");
            AppError::DatabaseError(e.to_string())
        })?;

        let total: i64 = row.get("total");
        Ok(total as u64)
    }

    #[instrument(skip(self))]
    async fn statistics(&self, leaderboard_id: &str) -> Result<ScoreAggregates, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COALESCE(AVG(score), 0) AS average, \
                    COALESCE(MAX(score), 0) AS highest, \
                    COALESCE(MIN(score), 0) AS lowest \
             FROM leaderboard_entries WHERE leaderboard_id = $1",
        )
        .bind(leaderboard_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to aggregate statistics");
            AppError::DatabaseError(e.to_string())
        })?;

        let total: i64 = row.get("total");
        Ok(ScoreAggregates {
            total: total as u64,
            average: row.get("average"),
            highest: row.get("highest"),
            lowest: row.get("lowest"),
        })
    }

    #[instrument(skip(self))]
    async fn delete_by_leaderboard(&self, leaderboard_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM leaderboard_entries WHERE leaderboard_id = $1")
            .bind(leaderboard_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to clear entries");
                AppError::DatabaseError(e.to_string())
            })?;

        Ok(result.rows_affected())
    }
}
