//! Inference router library — re-exports all modules for integration
//! testing.
//!
//! The binary (`main.rs`) and integration tests (`tests/`) both import
//! from this crate root.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod failover;
pub mod knowledge;
pub mod pipeline;
pub mod providers;
pub mod ratelimit;
pub mod reasoning;
pub mod similarity;
pub mod types;
