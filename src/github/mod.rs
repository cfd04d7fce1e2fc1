pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod remote;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use cached_client::{CachedGitHubClient, RepoStats, Sampling, StatsRequest};
pub use client::GitHubClient;
pub use remote::{RemoteError, RemoteSource};
pub use types::{Category, Cursor, InvalidRepoName, RawRecord, RepoName};
