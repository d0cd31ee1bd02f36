// Library crate for the rankboard leaderboard server
// This file exposes the public API for integration tests

pub mod auth;
pub mod leaderboard;
pub mod shared;

// Re-export commonly used types for easier access in tests
pub use auth::{AuthClaims, TokenConfig};
pub use leaderboard::{app_router, LeaderboardService};
pub use shared::{AppError, AppState};
