//! Serde-deserializable types matching GitHub REST API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::remote::RemoteError;
use super::types::{Category, RawRecord};

/// Decode one list item, reporting failures as malformed records.
pub fn decode_item<T: DeserializeOwned>(value: Value) -> Result<T, RemoteError> {
  serde_json::from_value(value).map_err(|e| RemoteError::Malformed(e.to_string()))
}

// ============================================================================
// Stargazers endpoint (star+json media type)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: u64,
  #[serde(default)]
  pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiStargazer {
  pub starred_at: DateTime<Utc>,
  pub user: ApiUser,
}

// ============================================================================
// Issues endpoint - returns issues and pull requests together
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiIssue {
  pub number: u64,
  pub created_at: DateTime<Utc>,
  pub closed_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  /// Present only on pull requests
  #[serde(default)]
  pub pull_request: Option<Value>,
}

// ============================================================================
// Repository endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRepository {
  #[serde(default)]
  pub stargazers_count: u64,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl ApiStargazer {
  pub fn into_record(self) -> RawRecord {
    RawRecord {
      id: self.user.id,
      created_at: self.starred_at,
      closed_at: None,
      updated_at: None,
    }
  }
}

impl ApiIssue {
  pub fn category(&self) -> Category {
    if self.pull_request.is_some() {
      Category::Pulls
    } else {
      Category::Issues
    }
  }

  pub fn into_record(self) -> RawRecord {
    RawRecord {
      id: self.number,
      created_at: self.created_at,
      closed_at: self.closed_at,
      updated_at: self.updated_at,
    }
  }
}
