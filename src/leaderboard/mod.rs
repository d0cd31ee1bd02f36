// Public API - what other modules can use
pub use handlers::app_router;
pub use service::LeaderboardService;

// Internal modules
pub mod cache;
pub mod entry_repository;
mod handlers;
pub mod models;
pub mod ranking;
pub mod repository;
pub mod rollover;
pub mod service;
pub mod snapshot_repository;
pub mod types;
