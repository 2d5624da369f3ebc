//! # fibr server
//!
//! Runs the fibr consistency pipeline as a daemon: loads the configuration,
//! connects the Redis adapters when configured, replays the storage tree at
//! boot and keeps derived state in line until a shutdown signal arrives.

pub mod config;
pub mod startup;
