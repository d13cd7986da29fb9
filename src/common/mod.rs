//! Shared types, repository traits and configuration loading

pub mod config;
pub mod traits;
pub mod types;
