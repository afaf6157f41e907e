pub mod signal;
pub mod tracked;
pub mod types;
