//! Domain types shared by the remote client and the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of statistic tracked for a repository.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  /// Stargazers; removal is never reported by the API
  #[value(alias = "star")]
  Stars,
  /// Issues, excluding pull requests
  #[value(alias = "issue")]
  Issues,
  /// Pull requests
  #[value(aliases = ["prs", "pr", "pull"])]
  Pulls,
}

impl Category {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Stars => "stars",
      Self::Issues => "issues",
      Self::Pulls => "pulls",
    }
  }

  /// Human readable plural used in log and report lines.
  pub fn label(self) -> &'static str {
    match self {
      Self::Stars => "stargazers",
      Self::Issues => "issues",
      Self::Pulls => "pull requests",
    }
  }

  /// Whether the remote reports when an item leaves the open state.
  pub fn reports_closures(self) -> bool {
    !matches!(self, Self::Stars)
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid repository name '{0}', expected <owner>/<repo>")]
pub struct InvalidRepoName(pub String);

/// Full repository name in the form `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoName {
  owner: String,
  name: String,
}

impl RepoName {
  pub fn parse(input: &str) -> Result<Self, InvalidRepoName> {
    let invalid = || InvalidRepoName(input.to_string());
    let (owner, name) = input.trim().split_once('/').ok_or_else(invalid)?;

    let valid_part = |part: &str| {
      !part.is_empty() && !part.contains('/') && !part.chars().any(char::is_whitespace)
    };
    if !valid_part(owner) || !valid_part(name) {
      return Err(invalid());
    }

    Ok(Self {
      owner: owner.to_string(),
      name: name.to_string(),
    })
  }

  pub fn owner(&self) -> &str {
    &self.owner
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl FromStr for RepoName {
  type Err = InvalidRepoName;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl fmt::Display for RepoName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

/// Resumption marker for incremental fetches.
///
/// Holds the newest position (creation time for stars, last update time for
/// issues and pulls) that was fully merged into the cache. Remote sources
/// return everything at or after the cursor, so the boundary record is
/// fetched again and merged idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(DateTime<Utc>);

impl Cursor {
  pub fn new(position: DateTime<Utc>) -> Self {
    Self(position)
  }

  pub fn position(&self) -> DateTime<Utc> {
    self.0
  }
}

/// A record as delivered by the remote, before it is merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
  /// Issue/PR number or stargazer account id
  pub id: u64,
  pub created_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  /// Last modification time, when the remote tracks one
  pub updated_at: Option<DateTime<Utc>>,
}

impl RawRecord {
  /// Position of this record on the cursor axis.
  pub fn cursor_position(&self) -> DateTime<Utc> {
    self.updated_at.unwrap_or(self.created_at)
  }
}
