/// Database configuration and connection management
pub mod database;

/// Object storage settings from `fleetdesk.toml` or the environment
pub mod storage;
