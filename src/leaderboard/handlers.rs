use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::models::{Leaderboard, LeaderboardEntry, LeaderboardHistory, LeaderboardSnapshot, SnapshotType};
use super::types::{
    AroundUserQuery, AroundUserResponse, CreateLeaderboardRequest, HistoryQuery,
    LeaderboardStatistics, ListLeaderboardsQuery, Paginated, RankingsQuery, SubmitScoreRequest,
    TopRankingsQuery, UpdateLeaderboardRequest, UserRanking,
};
use crate::auth::{AdminUser, AuthClaims};
use crate::shared::{AppError, AppState};

/// All leaderboard routes. Public reads carry no extractor-based auth;
/// score submission requires a valid bearer token and the mutating admin
/// operations require the admin role.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/leaderboards",
            get(list_leaderboards).post(create_leaderboard),
        )
        .route(
            "/leaderboards/:id",
            get(get_leaderboard)
                .patch(update_leaderboard)
                .delete(delete_leaderboard),
        )
        .route("/leaderboards/:id/hard", delete(hard_delete_leaderboard))
        .route("/leaderboards/:id/rankings", get(get_rankings))
        .route("/leaderboards/:id/rankings/top", get(get_top_rankings))
        .route(
            "/leaderboards/:id/rankings/around-me",
            get(get_rankings_around_me),
        )
        .route("/leaderboards/:id/scores", post(submit_score))
        .route(
            "/leaderboards/:id/recalculate",
            post(recalculate_leaderboard),
        )
        .route("/leaderboards/:id/reset", post(reset_leaderboard))
        .route("/leaderboards/:id/snapshot", post(create_snapshot))
        .route("/leaderboards/:id/history", get(get_history))
        .route(
            "/leaderboards/:id/users/:user_id/history",
            get(get_user_history),
        )
        .route("/leaderboards/:id/statistics", get(get_statistics))
        .route("/users/:user_id/rankings", get(get_user_rankings))
        .with_state(state)
}

/// POST /leaderboards (admin)
#[instrument(name = "create_leaderboard", skip(state, claims, request))]
pub async fn create_leaderboard(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Json(request): Json<CreateLeaderboardRequest>,
) -> Result<Json<Leaderboard>, AppError> {
    info!(admin = %claims.username, name = %request.name, "Creating leaderboard");

    let leaderboard = state.leaderboard_service.create_leaderboard(request).await?;
    Ok(Json(leaderboard))
}

/// GET /leaderboards
#[instrument(name = "list_leaderboards", skip(state, query))]
pub async fn list_leaderboards(
    State(state): State<AppState>,
    Query(query): Query<ListLeaderboardsQuery>,
) -> Result<Json<Paginated<Leaderboard>>, AppError> {
    let page = state.leaderboard_service.list_leaderboards(query).await?;
    Ok(Json(page))
}

/// GET /leaderboards/:id
#[instrument(name = "get_leaderboard", skip(state))]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Leaderboard>, AppError> {
    let leaderboard = state.leaderboard_service.get_leaderboard(&id).await?;
    Ok(Json(leaderboard))
}

/// PATCH /leaderboards/:id (admin)
#[instrument(name = "update_leaderboard", skip(state, claims, request))]
pub async fn update_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AdminUser(claims): AdminUser,
    Json(request): Json<UpdateLeaderboardRequest>,
) -> Result<Json<Leaderboard>, AppError> {
    info!(admin = %claims.username, leaderboard_id = %id, "Updating leaderboard");

    let leaderboard = state
        .leaderboard_service
        .update_leaderboard(&id, request)
        .await?;
    Ok(Json(leaderboard))
}

/// DELETE /leaderboards/:id (admin) - soft delete
#[instrument(name = "delete_leaderboard", skip(state, claims))]
pub async fn delete_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AdminUser(claims): AdminUser,
) -> Result<StatusCode, AppError> {
    info!(admin = %claims.username, leaderboard_id = %id, "Archiving leaderboard");

    state.leaderboard_service.delete_leaderboard(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /leaderboards/:id/hard (admin)
#[instrument(name = "hard_delete_leaderboard", skip(state, claims))]
pub async fn hard_delete_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AdminUser(claims): AdminUser,
) -> Result<StatusCode, AppError> {
    info!(admin = %claims.username, leaderboard_id = %id, "Hard-deleting leaderboard");

    state
        .leaderboard_service
        .hard_delete_leaderboard(&id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /leaderboards/:id/scores (authenticated)
#[instrument(name = "submit_score", skip(state, claims, request))]
pub async fn submit_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
    claims: AuthClaims,
    Json(request): Json<SubmitScoreRequest>,
) -> Result<Json<LeaderboardEntry>, AppError> {
    let entry = state
        .leaderboard_service
        .submit_score(&id, &claims.sub, &claims.username, request)
        .await?;
    Ok(Json(entry))
}

/// GET /leaderboards/:id/rankings
#[instrument(name = "get_rankings", skip(state, query))]
pub async fn get_rankings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RankingsQuery>,
) -> Result<Json<Paginated<LeaderboardEntry>>, AppError> {
    let page = state.leaderboard_service.get_rankings(&id, query).await?;
    Ok(Json(page))
}

/// GET /leaderboards/:id/rankings/top?limit=10
#[instrument(name = "get_top_rankings", skip(state))]
pub async fn get_top_rankings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TopRankingsQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let entries = state
        .leaderboard_service
        .get_top_rankings(&id, query.limit)
        .await?;
    Ok(Json(entries))
}

/// GET /leaderboards/:id/rankings/around-me?range=5 (authenticated)
#[instrument(name = "get_rankings_around_me", skip(state, claims))]
pub async fn get_rankings_around_me(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AroundUserQuery>,
    claims: AuthClaims,
) -> Result<Json<AroundUserResponse>, AppError> {
    let response = state
        .leaderboard_service
        .get_rankings_around_user(&id, &claims.sub, query.range)
        .await?;
    Ok(Json(response))
}

/// GET /users/:user_id/rankings (authenticated)
#[instrument(name = "get_user_rankings", skip(state, claims))]
pub async fn get_user_rankings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    claims: AuthClaims,
) -> Result<Json<Vec<UserRanking>>, AppError> {
    // Non-admins can only read their own rankings.
    let user_id = if user_id != claims.sub && !claims.is_admin() {
        claims.sub.clone()
    } else {
        user_id
    };

    let rankings = state.leaderboard_service.get_user_rankings(&user_id).await?;
    Ok(Json(rankings))
}

/// POST /leaderboards/:id/recalculate (admin)
#[instrument(name = "recalculate_leaderboard", skip(state, claims))]
pub async fn recalculate_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AdminUser(claims): AdminUser,
) -> Result<StatusCode, AppError> {
    info!(admin = %claims.username, leaderboard_id = %id, "Recalculating leaderboard");

    state
        .leaderboard_service
        .recalculate_leaderboard(&id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /leaderboards/:id/reset (admin)
#[instrument(name = "reset_leaderboard", skip(state, claims))]
pub async fn reset_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AdminUser(claims): AdminUser,
) -> Result<StatusCode, AppError> {
    info!(admin = %claims.username, leaderboard_id = %id, "Resetting leaderboard");

    state.leaderboard_service.reset_leaderboard(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /leaderboards/:id/snapshot (admin)
#[instrument(name = "create_snapshot", skip(state, claims))]
pub async fn create_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AdminUser(claims): AdminUser,
) -> Result<Json<LeaderboardSnapshot>, AppError> {
    info!(admin = %claims.username, leaderboard_id = %id, "Creating manual snapshot");

    let snapshot = state
        .leaderboard_service
        .create_snapshot(&id, SnapshotType::Manual)
        .await?;
    Ok(Json(snapshot))
}

/// GET /leaderboards/:id/history?type=daily
#[instrument(name = "get_history", skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LeaderboardSnapshot>>, AppError> {
    let snapshots = state
        .leaderboard_service
        .get_leaderboard_history(&id, query.snapshot_type)
        .await?;
    Ok(Json(snapshots))
}

/// GET /leaderboards/:id/users/:user_id/history
#[instrument(name = "get_user_history", skip(state))]
pub async fn get_user_history(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<Vec<LeaderboardHistory>>, AppError> {
    let history = state
        .leaderboard_service
        .get_user_history(&id, &user_id)
        .await?;
    Ok(Json(history))
}

/// GET /leaderboards/:id/statistics
#[instrument(name = "get_statistics", skip(state))]
pub async fn get_statistics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LeaderboardStatistics>, AppError> {
    let statistics = state.leaderboard_service.get_statistics(&id).await?;
    Ok(Json(statistics))
}
