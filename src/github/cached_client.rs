//! GitHub statistics with transparent caching.
//!
//! Wraps a [`RemoteSource`] in a [`CacheLayer`] and reconstructs the
//! requested series from the synced record store.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::{info, warn};

use crate::cache::{Cache, CacheKey, CacheLayer, CacheResult, CacheSource, CacheStorage, SyncMode};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::series::{Sample, SampleWindow, Timeline, TimelineOptions};

use super::client::GitHubClient;
use super::remote::RemoteSource;
use super::types::{Category, RepoName};

/// Where the samples of a series are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
  /// One point per distinct creation, closure or absence time
  Events,
  /// Regular points every `interval`, anchored on the first record
  Interval(Duration),
}

impl Default for Sampling {
  fn default() -> Self {
    Self::Interval(Duration::weeks(1))
  }
}

/// What to compute for one repository and category.
#[derive(Debug, Clone, Default)]
pub struct StatsRequest {
  pub sampling: Sampling,
  pub from: Option<DateTime<Utc>>,
  pub to: Option<DateTime<Utc>>,
  pub mode: SyncMode,
  /// Serve the last persisted cache when the remote fails transiently
  pub allow_stale: bool,
}

impl StatsRequest {
  fn in_range(&self, at: DateTime<Utc>) -> bool {
    self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
  }
}

/// Reconstructed series for one repository and category.
#[derive(Debug, Clone)]
pub struct RepoStats {
  pub repository: RepoName,
  pub category: Category,
  pub open_count: Vec<Sample<u64>>,
  /// Mean lifetime in days
  pub average_lifetime: Vec<Sample<f64>>,
  /// False when the series was built from a partially synced cache
  pub complete: bool,
  pub source: CacheSource,
  pub cached_at: Option<DateTime<Utc>>,
  pub record_count: usize,
}

/// GitHub client with transparent caching support.
pub struct CachedGitHubClient<R: RemoteSource = GitHubClient> {
  cache: CacheLayer<Box<dyn CacheStorage>, R>,
  ignore_closed_within: Duration,
}

impl CachedGitHubClient<GitHubClient> {
  /// Create a client backed by the configured cache backend.
  pub fn new(config: &Config) -> Result<Self> {
    let remote = GitHubClient::new(config)?;
    let storage = config.open_storage()?;
    let client = Self::with_parts(storage, remote)
      .with_stale_time(config.stale_time()?)
      .with_ignore_closed_within(config.ignore_closed_within()?);
    Ok(client)
  }
}

impl<R: RemoteSource> CachedGitHubClient<R> {
  pub fn with_parts(storage: Box<dyn CacheStorage>, remote: R) -> Self {
    Self {
      cache: CacheLayer::new(storage, remote),
      ignore_closed_within: Duration::seconds(60),
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.cache = self.cache.with_stale_time(stale_time);
    self
  }

  pub fn with_ignore_closed_within(mut self, within: Duration) -> Self {
    self.ignore_closed_within = within;
    self
  }

  /// Sync the cache for `repository` and `category`.
  ///
  /// With `allow_stale`, a transient failure falls back to the persisted
  /// cache instead of failing.
  pub async fn sync(
    &self,
    repository: &RepoName,
    category: Category,
    mode: SyncMode,
    allow_stale: bool,
  ) -> SyncResult<CacheResult<Cache>> {
    let key = CacheKey::new(repository.clone(), category);
    match self.cache.sync(&key, mode).await {
      Err(SyncError::SyncIncomplete { reason, cache, .. }) if allow_stale => {
        warn!(%key, %reason, "Remote unavailable, using persisted cache");
        let cached_at = cache.synced_at;
        Ok(CacheResult::offline(*cache, cached_at))
      }
      result => result,
    }
  }

  /// Sync, then reconstruct both series for `repository` and `category`.
  pub async fn compute(
    &self,
    repository: &RepoName,
    category: Category,
    request: &StatsRequest,
  ) -> SyncResult<RepoStats> {
    let result = self
      .sync(repository, category, request.mode, request.allow_stale)
      .await?;
    let cache = &result.data;

    let options = self.timeline_options(category);
    let timeline = Timeline::build(&cache.records, &options);

    let (open_count, average_lifetime) = match request.sampling {
      Sampling::Events => {
        let open_count: Vec<Sample<u64>> = timeline
          .open_count_changes()
          .filter(|sample| request.in_range(sample.at))
          .collect();
        let average_lifetime: Vec<Sample<f64>> = open_count
          .iter()
          .filter_map(|sample| {
            timeline
              .average_lifetime_at(sample.at)
              .map(|value| Sample { at: sample.at, value })
          })
          .collect();
        (open_count, average_lifetime)
      }
      Sampling::Interval(interval) => {
        let window = SampleWindow::every(interval).between(request.from, request.to);
        (
          timeline.open_count_series(&window).collect(),
          timeline.average_lifetime_series(&window).collect(),
        )
      }
    };

    info!(
      repository = %repository,
      %category,
      records = cache.records.len(),
      points = open_count.len(),
      source = ?result.source,
      "Reconstructed series"
    );

    Ok(RepoStats {
      repository: repository.clone(),
      category,
      open_count,
      average_lifetime,
      complete: cache.complete,
      source: result.source,
      cached_at: result.cached_at,
      record_count: cache.records.len(),
    })
  }

  fn timeline_options(&self, category: Category) -> TimelineOptions {
    let ignore_closed_within = match category {
      Category::Stars => None,
      Category::Issues | Category::Pulls => {
        Some(self.ignore_closed_within).filter(|d| *d > Duration::zero())
      }
    };
    TimelineOptions {
      ignore_closed_within,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FileStorage, NoopStorage};
  use crate::github::fake::FakeRemote;
  use crate::github::RawRecord;
  use chrono::TimeZone;

  fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, d, 0, 0, 0).unwrap()
  }

  fn issue(id: u64, created: u32, closed: Option<u32>) -> RawRecord {
    RawRecord {
      id,
      created_at: day(created),
      closed_at: closed.map(day),
      updated_at: Some(day(closed.unwrap_or(created))),
    }
  }

  fn repo() -> RepoName {
    RepoName::parse("owner/repo").unwrap()
  }

  fn daily() -> StatsRequest {
    StatsRequest {
      sampling: Sampling::Interval(Duration::days(1)),
      ..Default::default()
    }
  }

  fn history() -> Vec<RawRecord> {
    vec![issue(1, 1, Some(6)), issue(2, 3, None)]
  }

  #[tokio::test]
  async fn test_compute_daily_open_count() {
    let remote = FakeRemote::new(history());
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), remote);

    let mut request = daily();
    request.to = Some(day(7));
    let stats = client.compute(&repo(), Category::Issues, &request).await.unwrap();

    let values: Vec<u64> = stats.open_count.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![1, 1, 2, 2, 2, 1, 1]);
    assert_eq!(stats.source, CacheSource::Network);
    assert!(stats.complete);
    assert_eq!(stats.record_count, 2);
  }

  #[tokio::test]
  async fn test_compute_events() {
    let remote = FakeRemote::new(vec![issue(1, 1, Some(3)), issue(2, 2, None)]);
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), remote);

    let request = StatsRequest {
      sampling: Sampling::Events,
      ..Default::default()
    };
    let stats = client.compute(&repo(), Category::Issues, &request).await.unwrap();

    let points: Vec<(DateTime<Utc>, u64)> = stats.open_count.iter().map(|s| (s.at, s.value)).collect();
    assert_eq!(points, vec![(day(1), 1), (day(2), 2), (day(3), 1)]);

    let lifetimes: Vec<f64> = stats.average_lifetime.iter().map(|s| s.value).collect();
    assert_eq!(lifetimes, vec![0.0, 0.5, 1.5]);
  }

  #[tokio::test]
  async fn test_immediately_closed_issues_are_ignored() {
    let mut quick = issue(9, 2, None);
    quick.closed_at = Some(day(2) + Duration::seconds(10));
    let remote = FakeRemote::new(vec![issue(1, 1, None), quick]);
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), remote);

    let stats = client.compute(&repo(), Category::Issues, &daily()).await.unwrap();
    assert!(stats.open_count.iter().all(|s| s.value == 1));
    // still stored
    assert_eq!(stats.record_count, 2);
  }

  #[tokio::test]
  async fn test_stars_keep_quick_records() {
    let remote = FakeRemote::new(vec![RawRecord {
      id: 7,
      created_at: day(1),
      closed_at: None,
      updated_at: None,
    }]);
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), remote)
      .with_ignore_closed_within(Duration::days(365));

    let stats = client.compute(&repo(), Category::Stars, &daily()).await.unwrap();
    assert_eq!(stats.open_count.first().map(|s| s.value), Some(1));
  }

  #[tokio::test]
  async fn test_allow_stale_serves_persisted_cache() {
    let dir = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new(history());
    let client = CachedGitHubClient::with_parts(Box::new(FileStorage::new(dir.path())), remote)
      .with_stale_time(Duration::zero());

    client.compute(&repo(), Category::Issues, &daily()).await.unwrap();

    client.cache.remote().fail_after(0);
    let strict = client.compute(&repo(), Category::Issues, &daily()).await;
    assert!(matches!(strict, Err(SyncError::SyncIncomplete { .. })));

    let request = StatsRequest {
      allow_stale: true,
      ..daily()
    };
    let stats = client.compute(&repo(), Category::Issues, &request).await.unwrap();
    assert_eq!(stats.source, CacheSource::Offline);
    assert_eq!(stats.record_count, 2);
    assert!(stats.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_remote() {
    let dir = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new(history());
    let client = CachedGitHubClient::with_parts(Box::new(FileStorage::new(dir.path())), remote);

    client.compute(&repo(), Category::Issues, &daily()).await.unwrap();
    let stats = client.compute(&repo(), Category::Issues, &daily()).await.unwrap();

    assert_eq!(stats.source, CacheSource::CacheFresh);
    assert_eq!(client.cache.remote().fetch_count(), 1);
  }

  #[tokio::test]
  async fn test_permanent_failure_is_reported() {
    let remote = FakeRemote::new(history());
    remote.fail_permanently();
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), remote);

    let request = StatsRequest {
      allow_stale: true,
      ..daily()
    };
    let result = client.compute(&repo(), Category::Issues, &request).await;
    assert!(matches!(result, Err(SyncError::RemotePermanent { .. })));
  }

  #[tokio::test]
  async fn test_empty_repository() {
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), FakeRemote::default());
    let stats = client.compute(&repo(), Category::Stars, &daily()).await.unwrap();
    assert!(stats.open_count.is_empty());
    assert!(stats.average_lifetime.is_empty());
  }

  #[tokio::test]
  async fn test_events_respect_range() {
    let client = CachedGitHubClient::with_parts(Box::new(NoopStorage), FakeRemote::new(history()));
    let request = StatsRequest {
      sampling: Sampling::Events,
      from: Some(day(2)),
      to: Some(day(6)),
      ..Default::default()
    };
    let stats = client.compute(&repo(), Category::Issues, &request).await.unwrap();
    let times: Vec<DateTime<Utc>> = stats.open_count.iter().map(|s| s.at).collect();
    assert_eq!(times, vec![day(3), day(6)]);
  }
}
