//! Repository statistics for GitHub: a persistent per-repository cache of
//! stars, issues and pull requests, synced incrementally, and the time
//! series reconstructed from it.

pub mod cache;
pub mod config;
pub mod error;
pub mod github;
pub mod logging;
pub mod output;
pub mod series;
