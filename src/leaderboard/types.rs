use chrono::{DateTime, Datelike, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use super::models::{
    LeaderboardEntry, ResetPeriod, ScoringModel, SnapshotType,
};

/// Request payload for creating a new leaderboard
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLeaderboardRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_scoring_model")]
    pub scoring_model: ScoringModel,
    #[serde(default = "default_reset_period")]
    pub reset_period: ResetPeriod,
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: i32,
    #[serde(default = "default_entry_limit")]
    pub entry_limit_per_user: i32,
    #[serde(default)]
    pub minimum_score_threshold: f64,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

/// Partial update for a leaderboard; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLeaderboardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scoring_model: Option<ScoringModel>,
    pub reset_period: Option<ResetPeriod>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
    pub max_entries: Option<i32>,
    pub entry_limit_per_user: Option<i32>,
    pub minimum_score_threshold: Option<f64>,
    pub metadata: Option<Value>,
}

/// Request payload for submitting a score
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitScoreRequest {
    pub score: f64,
    pub completion_time: Option<i64>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

/// Window of entry creation times a rankings query is restricted to,
/// relative to server time at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TimeFrame {
    Today,
    ThisWeek,
    ThisMonth,
    AllTime,
}

impl TimeFrame {
    /// Inclusive lower bound on created_at for this frame, or None for
    /// all_time. Week starts Monday 00:00 UTC.
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        let midnight = |d: chrono::NaiveDate| d.and_time(NaiveTime::MIN).and_utc();
        match self {
            TimeFrame::Today => Some(midnight(today)),
            TimeFrame::ThisWeek => {
                let monday =
                    today - chrono::Days::new(today.weekday().num_days_from_monday() as u64);
                Some(midnight(monday))
            }
            TimeFrame::ThisMonth => {
                chrono::NaiveDate::from_ymd_opt(today.year(), today.month(), 1).map(midnight)
            }
            TimeFrame::AllTime => None,
        }
    }
}

/// Query parameters for paginated ranking views
#[derive(Debug, Clone, Deserialize)]
pub struct RankingsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub time_frame: Option<TimeFrame>,
}

impl Default for RankingsQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            time_frame: None,
        }
    }
}

/// Query parameters for listing leaderboards
#[derive(Debug, Clone, Deserialize)]
pub struct ListLeaderboardsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub category: Option<String>,
}

/// Query parameter for top-N rankings
#[derive(Debug, Clone, Deserialize)]
pub struct TopRankingsQuery {
    #[serde(default = "default_top_limit")]
    pub limit: u32,
}

/// Query parameter for around-user rankings
#[derive(Debug, Clone, Deserialize)]
pub struct AroundUserQuery {
    #[serde(default = "default_range")]
    pub range: u32,
}

/// Query parameter for snapshot history
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "type")]
    pub snapshot_type: Option<SnapshotType>,
}

/// Offset-paginated result page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// A user's standing within one leaderboard. The {0, 0, 0} value is the
/// no-entry sentinel, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserPosition {
    pub rank: i32,
    pub percentile: f64,
    pub total: u64,
}

impl UserPosition {
    pub fn absent() -> Self {
        Self {
            rank: 0,
            percentile: 0.0,
            total: 0,
        }
    }
}

/// Response for the around-user ranking window. When the user has no
/// entry, `rankings` falls back to the top of the board and
/// `user_position` is the absent sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AroundUserResponse {
    pub user_entry: Option<LeaderboardEntry>,
    pub rankings: Vec<LeaderboardEntry>,
    pub user_position: UserPosition,
}

/// One line of a user's cross-leaderboard ranking listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRanking {
    pub leaderboard_id: String,
    pub leaderboard_name: String,
    pub entry: LeaderboardEntry,
}

/// Aggregate statistics for a leaderboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardStatistics {
    pub total_entries: u64,
    pub average_score: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    /// Entries created within the last 24 hours.
    pub recent_activity_count: u64,
}

fn default_scoring_model() -> ScoringModel {
    ScoringModel::HighestScore
}

fn default_reset_period() -> ResetPeriod {
    ResetPeriod::Never
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> i32 {
    100
}

fn default_entry_limit() -> i32 {
    1
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

fn default_top_limit() -> u32 {
    10
}

fn default_range() -> u32 {
    5
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
