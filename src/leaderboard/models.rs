use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Sort direction implied by a scoring model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Higher scores rank first (highest_score, highest_accuracy)
    Descending,
    /// Lower scores rank first (fastest_completion, lowest_attempts)
    Ascending,
}

impl SortDirection {
    /// Whether `new` is a strict improvement over `existing` in this direction.
    pub fn improves(&self, new: f64, existing: f64) -> bool {
        match self {
            SortDirection::Descending => new > existing,
            SortDirection::Ascending => new < existing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScoringModel {
    HighestScore,
    FastestCompletion,
    LowestAttempts,
    HighestAccuracy,
}

impl ScoringModel {
    /// The ordering this model imposes on entries. Applied everywhere
    /// entries of a leaderboard are sorted.
    pub fn direction(&self) -> SortDirection {
        match self {
            ScoringModel::HighestScore | ScoringModel::HighestAccuracy => {
                SortDirection::Descending
            }
            ScoringModel::FastestCompletion | ScoringModel::LowestAttempts => {
                SortDirection::Ascending
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResetPeriod {
    Daily,
    Weekly,
    Monthly,
    Never,
}

impl ResetPeriod {
    /// Start of the next period boundary after `now`: midnight of the next
    /// day, Monday of next week, or the first of next month (all UTC).
    /// `Never` has no boundary.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        match self {
            ResetPeriod::Daily => today.succ_opt().map(midnight_utc),
            ResetPeriod::Weekly => {
                let in_a_week = today + chrono::Days::new(7);
                let monday =
                    in_a_week - chrono::Days::new(in_a_week.weekday().num_days_from_monday() as u64);
                Some(midnight_utc(monday))
            }
            ResetPeriod::Monthly => {
                let (year, month) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1).map(midnight_utc)
            }
            ResetPeriod::Never => None,
        }
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Daily,
    Weekly,
    Monthly,
    Manual,
}

/// A named ranked collection of per-user scores with a scoring direction
/// and reset policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub scoring_model: ScoringModel,
    pub reset_period: ResetPeriod,
    pub category: Option<String>,
    pub is_active: bool,
    pub is_public: bool,
    pub is_archived: bool,
    pub metadata: Value,
    /// Display-size hint; not enforced as a storage cap.
    pub max_entries: i32,
    pub entry_limit_per_user: i32,
    pub minimum_score_threshold: f64,
    pub last_reset_date: Option<DateTime<Utc>>,
    pub next_reset_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One user's current score record within a leaderboard. At most one entry
/// per (leaderboard, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub leaderboard_id: String,
    pub user_id: String,
    pub username: String,
    pub score: f64,
    /// 1-based position in scoring-direction order. Derived; written only
    /// by a full ranking pass.
    pub rank: i32,
    /// 0-100, derived alongside rank.
    pub percentile: f64,
    pub metadata: Value,
    /// Milliseconds, for time-based scoring.
    pub completion_time: Option<i64>,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    /// Creates an unranked entry with a generated ID. Rank and percentile
    /// stay 0 until the next ranking pass.
    pub fn new(leaderboard_id: String, user_id: String, username: String, score: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            leaderboard_id,
            user_id,
            username,
            score,
            rank: 0,
            percentile: 0.0,
            metadata: Value::Object(serde_json::Map::new()),
            completion_time: None,
            is_verified: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One ranked line inside a snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub user_id: String,
    pub username: String,
    pub score: f64,
    pub rank: i32,
    pub percentile: f64,
}

/// Immutable point-in-time capture of a leaderboard's full ranked standings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub id: String,
    pub leaderboard_id: String,
    pub snapshot_date: DateTime<Utc>,
    pub data: Vec<SnapshotEntry>,
    pub snapshot_type: SnapshotType,
    pub created_at: DateTime<Utc>,
}

impl LeaderboardSnapshot {
    pub fn new(
        leaderboard_id: String,
        data: Vec<SnapshotEntry>,
        snapshot_type: SnapshotType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            leaderboard_id,
            snapshot_date: now,
            data,
            snapshot_type,
            created_at: now,
        }
    }
}

/// Per-user per-day rank record, written alongside daily snapshots for
/// long-term trend tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardHistory {
    pub id: String,
    pub leaderboard_id: String,
    pub user_id: String,
    pub score: f64,
    pub rank: i32,
    pub percentile: f64,
    pub record_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl LeaderboardHistory {
    pub fn from_entry(entry: &LeaderboardEntry, record_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            leaderboard_id: entry.leaderboard_id.clone(),
            user_id: entry.user_id.clone(),
            score: entry.score,
            rank: entry.rank,
            percentile: entry.percentile,
            record_date,
            created_at: Utc::now(),
        }
    }
}
