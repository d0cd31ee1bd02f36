use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::{LeaderboardHistory, LeaderboardSnapshot, SnapshotType};
use crate::shared::AppError;

/// Trait for snapshot and per-user history operations. Snapshots are
/// immutable once created.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn create(&self, snapshot: &LeaderboardSnapshot) -> Result<(), AppError>;

    /// Most recent snapshots first, optionally filtered by type.
    async fn find_recent(
        &self,
        leaderboard_id: &str,
        snapshot_type: Option<SnapshotType>,
        limit: u32,
    ) -> Result<Vec<LeaderboardSnapshot>, AppError>;

    /// Appends per-user per-day trend rows.
    async fn record_history(&self, rows: &[LeaderboardHistory]) -> Result<(), AppError>;

    /// A user's trend rows on one leaderboard, most recent first.
    async fn find_user_history(
        &self,
        leaderboard_id: &str,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<LeaderboardHistory>, AppError>;
}

/// In-memory implementation of SnapshotRepository for development and testing
pub struct InMemorySnapshotRepository {
    snapshots: Mutex<Vec<LeaderboardSnapshot>>,
    history: Mutex<Vec<LeaderboardHistory>>,
}

impl Default for InMemorySnapshotRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySnapshotRepository {
    /// Creates a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    #[instrument(skip(self, snapshot))]
    async fn create(&self, snapshot: &LeaderboardSnapshot) -> Result<(), AppError> {
        debug!(
            leaderboard_id = %snapshot.leaderboard_id,
            snapshot_type = %snapshot.snapshot_type,
            entries = snapshot.data.len(),
            "Recording snapshot in memory"
        );

        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.push(snapshot.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_recent(
        &self,
        leaderboard_id: &str,
        snapshot_type: Option<SnapshotType>,
        limit: u32,
    ) -> Result<Vec<LeaderboardSnapshot>, AppError> {
        let snapshots = self.snapshots.lock().unwrap();

        let mut matching: Vec<LeaderboardSnapshot> = snapshots
            .iter()
            .filter(|s| s.leaderboard_id == leaderboard_id)
            .filter(|s| match snapshot_type {
                Some(t) => s.snapshot_type == t,
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.snapshot_date.cmp(&a.snapshot_date));
        matching.truncate(limit as usize);

        Ok(matching)
    }

    #[instrument(skip(self, rows))]
    async fn record_history(&self, rows: &[LeaderboardHistory]) -> Result<(), AppError> {
        let mut history = self.history.lock().unwrap();
        history.extend_from_slice(rows);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_user_history(
        &self,
        leaderboard_id: &str,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<LeaderboardHistory>, AppError> {
        let history = self.history.lock().unwrap();

        let mut matching: Vec<LeaderboardHistory> = history
            .iter()
            .filter(|h| h.leaderboard_id == leaderboard_id && h.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.record_date.cmp(&a.record_date));
        matching.truncate(limit as usize);

        Ok(matching)
    }
}

/// PostgreSQL implementation of the snapshot repository
pub struct PostgresSnapshotRepository {
    pool: PgPool,
}

impl PostgresSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_snapshot_row(row: &PgRow) -> Result<LeaderboardSnapshot, AppError> {
    let snapshot_type: String = row.get("snapshot_type");
    let data: serde_json::Value = row.get("data");

    Ok(LeaderboardSnapshot {
        id: row.get("id"),
        leaderboard_id: row.get("leaderboard_id"),
        snapshot_date: row.get("snapshot_date"),
        data: serde_json::from_value(data)
            .map_err(|e| AppError::DatabaseError(format!("Malformed snapshot payload: {}", e)))?,
        snapshot_type: snapshot_type.parse().map_err(|_| {
            AppError::DatabaseError(format!("Unknown snapshot type: {}", snapshot_type))
        })?,
        created_at: row.get("created_at"),
    })
}

fn map_history_row(row: &PgRow) -> LeaderboardHistory {
    LeaderboardHistory {
        id: row.get("id"),
        leaderboard_id: row.get("leaderboard_id"),
        user_id: row.get("user_id"),
        score: row.get("score"),
        rank: row.get("rank"),
        percentile: row.get("percentile"),
        record_date: row.get("record_date"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl SnapshotRepository for PostgresSnapshotRepository {
    #[instrument(skip(self, snapshot))]
    async fn create(&self, snapshot: &LeaderboardSnapshot) -> Result<(), AppError> {
        debug!(
            leaderboard_id = %snapshot.leaderboard_id,
            snapshot_type = %snapshot.snapshot_type,
            entries = snapshot.data.len(),
            "Recording snapshot in database"
        );

        let data = serde_json::to_value(&snapshot.data)
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO leaderboard_snapshots (id, leaderboard_id, snapshot_date, data, \
             snapshot_type, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.leaderboard_id)
        .bind(snapshot.snapshot_date)
        .bind(data)
        .bind(snapshot.snapshot_type.to_string())
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %snapshot.leaderboard_id, "Failed to record snapshot");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_recent(
        &self,
        leaderboard_id: &str,
        snapshot_type: Option<SnapshotType>,
        limit: u32,
    ) -> Result<Vec<LeaderboardSnapshot>, AppError> {
        let rows = match snapshot_type {
            Some(t) => {
                sqlx::query(
                    "SELECT id, leaderboard_id, snapshot_date, data, snapshot_type, created_at \
                     FROM leaderboard_snapshots \
                     WHERE leaderboard_id = $1 AND snapshot_type = $2 \
                     ORDER BY snapshot_date DESC LIMIT $3",
                )
                .bind(leaderboard_id)
                .bind(t.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, leaderboard_id, snapshot_date, data, snapshot_type, created_at \
                     FROM leaderboard_snapshots WHERE leaderboard_id = $1 \
                     ORDER BY snapshot_date DESC LIMIT $2",
                )
                .bind(leaderboard_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch snapshots");
            AppError::DatabaseError(e.to_string())
        })?;

        rows.iter().map(map_snapshot_row).collect()
    }

    #[instrument(skip(self, rows))]
    async fn record_history(&self, rows: &[LeaderboardHistory]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Failed to open history transaction");
            AppError::DatabaseError(e.to_string())
        })?;

        for row in rows {
            sqlx::query(
                "INSERT INTO leaderboard_history (id, leaderboard_id, user_id, score, rank, \
                 percentile, record_date, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&row.id)
            .bind(&row.leaderboard_id)
            .bind(&row.user_id)
            .bind(row.score)
            .bind(row.rank)
            .bind(row.percentile)
            .bind(row.record_date)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                warn!(error = %e, leaderboard_id = %row.leaderboard_id, "Failed to record history row");
                AppError::DatabaseError(e.to_string())
            })?;
        }

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Failed to commit history transaction");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_user_history(
        &self,
        leaderboard_id: &str,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<LeaderboardHistory>, AppError> {
        let rows = sqlx::query(
            "SELECT id, leaderboard_id, user_id, score, rank, percentile, record_date, created_at \
             FROM leaderboard_history WHERE leaderboard_id = $1 AND user_id = $2 \
             ORDER BY record_date DESC LIMIT $3",
        )
        .bind(leaderboard_id)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard_id, "Failed to fetch user history");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(rows.iter().map(map_history_row).collect())
    }
}
