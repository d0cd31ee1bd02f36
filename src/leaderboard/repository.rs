use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::Leaderboard;
use crate::shared::AppError;

/// Trait for leaderboard record operations
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    async fn create(&self, leaderboard: &Leaderboard) -> Result<(), AppError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Leaderboard>, AppError>;

    /// Active, non-archived leaderboards, newest first, with an optional
    /// category filter. Returns the page plus the total match count.
    async fn find_active(
        &self,
        page: u32,
        limit: u32,
        category: Option<&str>,
    ) -> Result<(Vec<Leaderboard>, u64), AppError>;

    /// Persists the full record (upsert of all mutable fields).
    async fn save(&self, leaderboard: &Leaderboard) -> Result<(), AppError>;

    /// Hard delete. Returns the number of rows removed.
    async fn delete(&self, id: &str) -> Result<u64, AppError>;

    /// Active leaderboards whose reset period has elapsed at `now`.
    async fn find_due_for_reset(&self, now: DateTime<Utc>) -> Result<Vec<Leaderboard>, AppError>;

    /// Active, non-archived leaderboards, for the scheduled snapshot pass.
    async fn find_active_unarchived(&self) -> Result<Vec<Leaderboard>, AppError>;
}

/// In-memory implementation of LeaderboardRepository for development and testing
pub struct InMemoryLeaderboardRepository {
    leaderboards: Mutex<HashMap<String, Leaderboard>>,
}

impl Default for InMemoryLeaderboardRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLeaderboardRepository {
    /// Creates a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            leaderboards: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryLeaderboardRepository {
    #[instrument(skip(self, leaderboard))]
    async fn create(&self, leaderboard: &Leaderboard) -> Result<(), AppError> {
        debug!(leaderboard_id = %leaderboard.id, name = %leaderboard.name, "Creating leaderboard in memory");

        let mut leaderboards = self.leaderboards.lock().unwrap();
        if leaderboards.contains_key(&leaderboard.id) {
            warn!(leaderboard_id = %leaderboard.id, "Leaderboard already exists in memory");
            return Err(AppError::DatabaseError(
                "Leaderboard already exists".to_string(),
            ));
        }
        leaderboards.insert(leaderboard.id.clone(), leaderboard.clone());

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> Result<Option<Leaderboard>, AppError> {
        let leaderboards = self.leaderboards.lock().unwrap();
        Ok(leaderboards.get(id).cloned())
    }

    #[instrument(skip(self))]
    async fn find_active(
        &self,
        page: u32,
        limit: u32,
        category: Option<&str>,
    ) -> Result<(Vec<Leaderboard>, u64), AppError> {
        let leaderboards = self.leaderboards.lock().unwrap();

        let mut matching: Vec<Leaderboard> = leaderboards
            .values()
            .filter(|l| l.is_active && !l.is_archived)
            .filter(|l| match category {
                Some(cat) => l.category.as_deref() == Some(cat),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let offset = (page.saturating_sub(1) * limit) as usize;
        let data = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok((data, total))
    }

    #[instrument(skip(self, leaderboard))]
    async fn save(&self, leaderboard: &Leaderboard) -> Result<(), AppError> {
        let mut leaderboards = self.leaderboards.lock().unwrap();
        leaderboards.insert(leaderboard.id.clone(), leaderboard.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<u64, AppError> {
        let mut leaderboards = self.leaderboards.lock().unwrap();
        Ok(leaderboards.remove(id).map(|_| 1).unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn find_due_for_reset(&self, now: DateTime<Utc>) -> Result<Vec<Leaderboard>, AppError> {
        let leaderboards = self.leaderboards.lock().unwrap();
        Ok(leaderboards
            .values()
            .filter(|l| l.is_active && l.reset_period != super::models::ResetPeriod::Never)
            .filter(|l| matches!(l.next_reset_date, Some(due) if due <= now))
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn find_active_unarchived(&self) -> Result<Vec<Leaderboard>, AppError> {
        let leaderboards = self.leaderboards.lock().unwrap();
        Ok(leaderboards
            .values()
            .filter(|l| l.is_active && !l.is_archived)
            .cloned()
            .collect())
    }
}

/// PostgreSQL implementation of the leaderboard repository
pub struct PostgresLeaderboardRepository {
    pool: PgPool,
}

impl PostgresLeaderboardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_leaderboard_row(row: &PgRow) -> Result<Leaderboard, AppError> {
    let scoring_model: String = row.get("scoring_model");
    let reset_period: String = row.get("reset_period");

    Ok(Leaderboard {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        scoring_model: scoring_model.parse().map_err(|_| {
            AppError::DatabaseError(format!("Unknown scoring model: {}", scoring_model))
        })?,
        reset_period: reset_period.parse().map_err(|_| {
            AppError::DatabaseError(format!("Unknown reset period: {}", reset_period))
        })?,
        category: row.get("category"),
        is_active: row.get("is_active"),
        is_public: row.get("is_public"),
        is_archived: row.get("is_archived"),
        metadata: row.get("metadata"),
        max_entries: row.get("max_entries"),
        entry_limit_per_user: row.get("entry_limit_per_user"),
        minimum_score_threshold: row.get("minimum_score_threshold"),
        last_reset_date: row.get("last_reset_date"),
        next_reset_date: row.get("next_reset_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const LEADERBOARD_COLUMNS: &str = "id, name, description, scoring_model, reset_period, category, \
     is_active, is_public, is_archived, metadata, max_entries, entry_limit_per_user, \
     minimum_score_threshold, last_reset_date, next_reset_date, created_at, updated_at";

#[async_trait]
impl LeaderboardRepository for PostgresLeaderboardRepository {
    #[instrument(skip(self, leaderboard))]
    async fn create(&self, leaderboard: &Leaderboard) -> Result<(), AppError> {
        debug!(leaderboard_id = %leaderboard.id, name = %leaderboard.name, "Creating leaderboard in database");

        sqlx::query(
            "INSERT INTO leaderboards (id, name, description, scoring_model, reset_period, category, \
             is_active, is_public, is_archived, metadata, max_entries, entry_limit_per_user, \
             minimum_score_threshold, last_reset_date, next_reset_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(&leaderboard.id)
        .bind(&leaderboard.name)
        .bind(&leaderboard.description)
        .bind(leaderboard.scoring_model.to_string())
        .bind(leaderboard.reset_period.to_string())
        .bind(&leaderboard.category)
        .bind(leaderboard.is_active)
        .bind(leaderboard.is_public)
        .bind(leaderboard.is_archived)
        .bind(&leaderboard.metadata)
        .bind(leaderboard.max_entries)
        .bind(leaderboard.entry_limit_per_user)
        .bind(leaderboard.minimum_score_threshold)
        .bind(leaderboard.last_reset_date)
        .bind(leaderboard.next_reset_date)
        .bind(leaderboard.created_at)
        .bind(leaderboard.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create leaderboard in database");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> Result<Option<Leaderboard>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM leaderboards WHERE id = $1",
            LEADERBOARD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %id, "Failed to fetch leaderboard from database");
            AppError::DatabaseError(e.to_string())
        })?;

        row.as_ref().map(map_leaderboard_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_active(
        &self,
        page: u32,
        limit: u32,
        category: Option<&str>,
    ) -> Result<(Vec<Leaderboard>, u64), AppError> {
        let offset = page.saturating_sub(1) as i64 * limit as i64;

        let (rows, total) = match category {
            Some(cat) => {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM leaderboards \
                     WHERE is_active = TRUE AND is_archived = FALSE AND category = $1 \
                     ORDER BY created_at DESC OFFSET $2 LIMIT $3",
                    LEADERBOARD_COLUMNS
                ))
                .bind(cat)
                .bind(offset)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await;

                let total = sqlx::query(
                    "SELECT COUNT(*) AS total FROM leaderboards \
                     WHERE is_active = TRUE AND is_archived = FALSE AND category = $1",
                )
                .bind(cat)
                .fetch_one(&self.pool)
                .await;

                (rows, total)
            }
            None => {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM leaderboards \
                     WHERE is_active = TRUE AND is_archived = FALSE \
                     ORDER BY created_at DESC OFFSET $1 LIMIT $2",
                    LEADERBOARD_COLUMNS
                ))
                .bind(offset)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await;

                let total = sqlx::query(
                    "SELECT COUNT(*) AS total FROM leaderboards \
                     WHERE is_active = TRUE AND is_archived = FALSE",
                )
                .fetch_one(&self.pool)
                .await;

                (rows, total)
            }
        };

        let rows = rows.map_err(|e| {
            warn!(error = %e, "Failed to list leaderboards from database");
            AppError::DatabaseError(e.to_string())
        })?;
        let total: i64 = total
            .map_err(|e| {
                warn!(error = %e, "Failed to count leaderboards in database");
                AppError::DatabaseError(e.to_string())
            })?
            .get("total");

        let leaderboards = rows
            .iter()
            .map(map_leaderboard_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((leaderboards, total as u64))
    }

    #[instrument(skip(self, leaderboard))]
    async fn save(&self, leaderboard: &Leaderboard) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO leaderboards (id, name, description, scoring_model, reset_period, category, \
             is_active, is_public, is_archived, metadata, max_entries, entry_limit_per_user, \
             minimum_score_threshold, last_reset_date, next_reset_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 description = EXCLUDED.description, \
                 scoring_model = EXCLUDED.scoring_model, \
                 reset_period = EXCLUDED.reset_period, \
                 category = EXCLUDED.category, \
                 is_active = EXCLUDED.is_active, \
                 is_public = EXCLUDED.is_public, \
                 is_archived = EXCLUDED.is_archived, \
                 metadata = EXCLUDED.metadata, \
                 max_entries = EXCLUDED.max_entries, \
                 entry_limit_per_user = EXCLUDED.entry_limit_per_user, \
                 minimum_score_threshold = EXCLUDED.minimum_score_threshold, \
                 last_reset_date = EXCLUDED.last_reset_date, \
                 next_reset_date = EXCLUDED.next_reset_date, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&leaderboard.id)
        .bind(&leaderboard.name)
        .bind(&leaderboard.description)
        .bind(leaderboard.scoring_model.to_string())
        .bind(leaderboard.reset_period.to_string())
        .bind(&leaderboard.category)
        .bind(leaderboard.is_active)
        .bind(leaderboard.is_public)
        .bind(leaderboard.is_archived)
        .bind(&leaderboard.metadata)
        .bind(leaderboard.max_entries)
        .bind(leaderboard.entry_limit_per_user)
        .bind(leaderboard.minimum_score_threshold)
        .bind(leaderboard.last_reset_date)
        .bind(leaderboard.next_reset_date)
        .bind(leaderboard.created_at)
        .bind(leaderboard.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, leaderboard_id = %leaderboard.id, "Failed to save leaderboard in database");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM leaderboards WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, leaderboard_id = %id, "Failed to delete leaderboard from database");
                AppError::DatabaseError(e.to_string())
            })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_due_for_reset(&self, now: DateTime<Utc>) -> Result<Vec<Leaderboard>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leaderboards \
             WHERE is_active = TRUE AND reset_period <> 'never' \
             AND next_reset_date IS NOT NULL AND next_reset_date <= $1",
            LEADERBOARD_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to query leaderboards due for reset");
            AppError::DatabaseError(e.to_string())
        })?;

        rows.iter().map(map_leaderboard_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_active_unarchived(&self) -> Result<Vec<Leaderboard>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM leaderboards WHERE is_active = TRUE AND is_archived = FALSE",
            LEADERBOARD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to query active leaderboards");
            AppError::DatabaseError(e.to_string())
        })?;

        rows.iter().map(map_leaderboard_row).collect()
    }
}
