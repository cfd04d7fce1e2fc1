use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use ghstats::cache::{CacheSource, SyncMode};
use ghstats::config::Config;
use ghstats::github::{CachedGitHubClient, Category, RepoName, Sampling, StatsRequest};
use ghstats::{logging, output};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Statistic {
  /// Number of open items (stars: current stargazers)
  Open,
  /// Mean lifetime in days, open items counted with their current age
  Lifetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SamplingArg {
  /// One point per change
  Events,
  Daily,
  Weekly,
}

#[derive(Parser, Debug)]
#[command(name = "ghstats")]
#[command(about = "Statistics over the history of a GitHub repository")]
#[command(version)]
struct Args {
  /// stars, issues or pulls
  category: Category,

  /// Repository as owner/repo
  repository: RepoName,

  /// Write CSV here instead of stdout
  #[arg(short, long)]
  output: Option<PathBuf>,

  #[arg(short, long, value_enum, default_value_t = Statistic::Open)]
  statistic: Statistic,

  /// Sample spacing (default: sampling.interval_days from the config)
  #[arg(long, value_enum)]
  sampling: Option<SamplingArg>,

  /// Sample every N days
  #[arg(long, value_parser = clap::value_parser!(u32).range(1..), conflicts_with = "sampling")]
  interval_days: Option<u32>,

  /// First sample (YYYY-MM-DD or RFC 3339)
  #[arg(long, value_parser = parse_instant)]
  from: Option<DateTime<Utc>>,

  /// Last sample (YYYY-MM-DD or RFC 3339)
  #[arg(long, value_parser = parse_instant)]
  to: Option<DateTime<Utc>>,

  /// List the full history instead of resuming from the cache cursor
  #[arg(long)]
  full: bool,

  /// Fall back to the cached data when GitHub is unavailable
  #[arg(long)]
  allow_stale: bool,

  #[arg(short, long)]
  verbose: bool,

  /// Path to config file (default: $XDG_CONFIG_HOME/ghstats/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,
}

fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, String> {
  if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
    return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
  }
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got {value:?}"))
}

impl Args {
  fn sampling(&self, config: &Config) -> Sampling {
    let days = match (self.interval_days, self.sampling) {
      (Some(days), _) => days,
      (None, Some(SamplingArg::Events)) => return Sampling::Events,
      (None, Some(SamplingArg::Daily)) => 1,
      (None, Some(SamplingArg::Weekly)) => 7,
      (None, None) => config.sampling.interval_days.max(1),
    };
    Sampling::Interval(Duration::days(days as i64))
  }

  fn request(&self, config: &Config) -> StatsRequest {
    StatsRequest {
      sampling: self.sampling(config),
      from: self.from,
      to: self.to,
      mode: if self.full { SyncMode::Full } else { SyncMode::Incremental },
      allow_stale: self.allow_stale,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(args.verbose, config.log_file.as_deref())?;

  if let (Some(from), Some(to)) = (args.from, args.to) {
    if from > to {
      return Err(eyre!("--from {} is after --to {}", from, to));
    }
  }

  let client = CachedGitHubClient::new(&config)?;
  let stats = match client
    .compute(&args.repository, args.category, &args.request(&config))
    .await
  {
    Ok(stats) => stats,
    Err(e) => {
      if e.is_retryable() && !args.allow_stale {
        eprintln!("Try again later, or pass --allow-stale to use the cached data");
      }
      return Err(e.into());
    }
  };

  if stats.source == CacheSource::Offline {
    let since = stats
      .cached_at
      .map(|at| output::format_timestamp(&at))
      .unwrap_or_else(|| "never".to_string());
    eprintln!("GitHub unavailable, using cached data (last synced {since})");
  }
  if !stats.complete {
    eprintln!(
      "Cache for {} {} is incomplete ({} records), statistics are partial",
      stats.repository,
      stats.category.label(),
      stats.record_count
    );
  }

  let output = args.output.as_deref();
  match args.statistic {
    Statistic::Open => output::write_series(&stats.open_count, output)?,
    Statistic::Lifetime => output::write_series(&stats.average_lifetime, output)?,
  };

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_parse_instant() {
    let midnight = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap();
    assert_eq!(parse_instant("2020-03-01").unwrap(), midnight);
    assert_eq!(
      parse_instant("2020-03-01T02:00:00+02:00").unwrap(),
      midnight
    );
    assert!(parse_instant("March 1st").is_err());
  }

  #[test]
  fn test_args() {
    let args = Args::try_parse_from(["ghstats", "prs", "owner/repo", "--sampling", "events"]).unwrap();
    assert_eq!(args.category, Category::Pulls);
    assert_eq!(args.repository.to_string(), "owner/repo");
    assert_eq!(args.sampling(&Config::default()), Sampling::Events);

    let args = Args::try_parse_from(["ghstats", "stars", "owner/repo"]).unwrap();
    assert_eq!(
      args.sampling(&Config::default()),
      Sampling::Interval(Duration::days(7))
    );
    assert_eq!(args.request(&Config::default()).mode, SyncMode::Incremental);
  }

  #[test]
  fn test_invalid_args() {
    assert!(Args::try_parse_from(["ghstats", "forks", "owner/repo"]).is_err());
    assert!(Args::try_parse_from(["ghstats", "stars", "owner"]).is_err());
    assert!(Args::try_parse_from(["ghstats", "stars", "o/r", "--interval-days", "0"]).is_err());
  }
}
