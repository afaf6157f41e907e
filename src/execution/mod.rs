pub mod backend;
pub mod orchestrator;
pub mod outbox;
pub mod persistence;
pub mod simulator;
pub mod sizing;
pub mod types;
