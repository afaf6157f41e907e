pub mod cache;
pub mod chain;
pub mod decoder;
pub mod gamma_api;
pub mod leaderboard;
pub mod types;
pub mod watcher;
