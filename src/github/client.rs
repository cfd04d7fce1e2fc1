use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::github::api_types::{decode_item, ApiIssue, ApiRepository, ApiStargazer};
use crate::github::remote::{RemoteError, RemoteSource};
use crate::github::types::{Category, Cursor, RawRecord, RepoName};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
/// Adds `starred_at` to stargazer listings
const STAR_MEDIA_TYPE: &str = "application/vnd.github.star+json";
const API_VERSION: &str = "2022-11-28";

/// One page of a paginated listing
struct Page {
  items: Vec<Value>,
  links: Links,
}

/// Pagination targets from a `Link` response header
#[derive(Debug, Default)]
struct Links {
  next: Option<Url>,
  last: Option<Url>,
}

impl Links {
  fn parse(headers: &HeaderMap) -> Self {
    headers
      .get(LINK)
      .and_then(|v| v.to_str().ok())
      .map(Self::parse_value)
      .unwrap_or_default()
  }

  fn parse_value(value: &str) -> Self {
    let mut links = Self::default();
    for part in value.split(',') {
      let mut segments = part.split(';');
      let Some(target) = segments.next() else {
        continue;
      };
      let target = target.trim().trim_start_matches('<').trim_end_matches('>');
      let Ok(url) = Url::parse(target) else {
        continue;
      };
      for param in segments {
        match param.trim() {
          r#"rel="next""# => links.next = Some(url.clone()),
          r#"rel="last""# => links.last = Some(url.clone()),
          _ => {}
        }
      }
    }
    links
  }
}

fn page_number(url: &Url) -> Option<u32> {
  url
    .query_pairs()
    .find(|(k, _)| k == "page")
    .and_then(|(_, v)| v.parse().ok())
}

/// Map an unsuccessful response to a transient or permanent failure.
fn classify_status(status: StatusCode, headers: &HeaderMap) -> RemoteError {
  let rate_limited = headers.contains_key(RETRY_AFTER)
    || headers
      .get("x-ratelimit-remaining")
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.trim() == "0");

  match status.as_u16() {
    401 => RemoteError::Permanent("unauthorized, check GHSTATS_TOKEN or GITHUB_TOKEN".to_string()),
    404 => RemoteError::Permanent("repository not found".to_string()),
    429 => RemoteError::Transient("rate limit exceeded".to_string()),
    403 if rate_limited => RemoteError::Transient("rate limit exceeded".to_string()),
    403 => RemoteError::Permanent("access forbidden".to_string()),
    _ if status.is_server_error() => RemoteError::Transient(format!("server error {}", status)),
    _ => RemoteError::Permanent(format!("unexpected response {}", status)),
  }
}

/// The first item of a stargazer page was starred before `cursor`.
fn starred_before(item: Option<&Value>, cursor: Cursor) -> bool {
  let Some(item) = item else {
    return true;
  };
  item
    .get("starred_at")
    .and_then(Value::as_str)
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .is_some_and(|t| t.with_timezone(&Utc) < cursor.position())
}

/// Walk state for reading stargazers newest page first
enum StarWalk {
  Start,
  /// Fetch `page`; `first` is page 1, already read and held back
  Backward { page: u32, first: Vec<Value> },
  /// Emit the held back page 1, then stop
  Flush(Vec<Value>),
  Done,
}

/// Next move of the backward stargazer walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StarStep {
  Fetch(u32),
  Flush,
  Done,
}

/// After page 1: jump to the last page, or stop when page 1 is all there is.
fn first_page_step(last: Option<u32>) -> StarStep {
  match last {
    Some(last) if last > 1 => StarStep::Fetch(last),
    _ => StarStep::Done,
  }
}

/// After `page` (> 1): stop once it starts before the cursor, otherwise
/// move one page back, ending with the held back page 1.
fn backward_step(page: u32, starts_before_cursor: bool) -> StarStep {
  if starts_before_cursor {
    StarStep::Done
  } else if page <= 2 {
    StarStep::Flush
  } else {
    StarStep::Fetch(page - 1)
  }
}

fn items_of(values: Vec<Value>) -> Vec<Result<Value, RemoteError>> {
  values.into_iter().map(Ok).collect()
}

/// GitHub REST API client
#[derive(Clone)]
pub struct GitHubClient {
  http: reqwest::Client,
  api_url: Url,
  per_page: u32,
}

impl GitHubClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));
    headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

    if let Some(token) = Config::get_api_token() {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid GitHub token: {}", e))?;
      value.set_sensitive(true);
      headers.insert(AUTHORIZATION, value);
    } else {
      debug!("No GitHub token set, using unauthenticated requests");
    }

    let user_agent = match &config.github.username {
      Some(user) => format!("ghstats/{} ({})", env!("CARGO_PKG_VERSION"), user),
      None => format!("ghstats/{}", env!("CARGO_PKG_VERSION")),
    };

    let http = reqwest::Client::builder()
      .user_agent(user_agent)
      .default_headers(headers)
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create GitHub client: {}", e))?;

    // Url::join drops the last path segment unless it ends with a slash
    let mut base = config.github.api_url.trim_end_matches('/').to_string();
    base.push('/');
    let api_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid GitHub API url {}: {}", base, e))?;

    Ok(Self {
      http,
      api_url,
      per_page: config.github.per_page.clamp(1, 100),
    })
  }

  fn repo_url(&self, repo: &RepoName, path: &str) -> Result<Url, RemoteError> {
    let relative = if path.is_empty() {
      format!("repos/{}/{}", repo.owner(), repo.name())
    } else {
      format!("repos/{}/{}/{}", repo.owner(), repo.name(), path)
    };
    self
      .api_url
      .join(&relative)
      .map_err(|e| RemoteError::Permanent(format!("invalid url for {}: {}", repo, e)))
  }

  fn stargazers_url(&self, repo: &RepoName, page: u32) -> Result<Url, RemoteError> {
    let mut url = self.repo_url(repo, "stargazers")?;
    url
      .query_pairs_mut()
      .append_pair("per_page", &self.per_page.to_string())
      .append_pair("page", &page.to_string());
    Ok(url)
  }

  fn issues_url(&self, repo: &RepoName, cursor: Option<Cursor>) -> Result<Url, RemoteError> {
    let mut url = self.repo_url(repo, "issues")?;
    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("state", "all")
        .append_pair("sort", "updated")
        .append_pair("direction", "asc")
        .append_pair("per_page", &self.per_page.to_string());
      if let Some(cursor) = cursor {
        let since = cursor.position().to_rfc3339_opts(SecondsFormat::Secs, true);
        query.append_pair("since", &since);
      }
    }
    Ok(url)
  }

  async fn get_page(&self, url: Url, accept: &'static str) -> Result<Page, RemoteError> {
    debug!(%url, "Fetching page");

    let response = self
      .http
      .get(url.clone())
      .header(ACCEPT, accept)
      .send()
      .await
      .map_err(|e| RemoteError::Transient(format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(classify_status(status, response.headers()));
    }

    let links = Links::parse(response.headers());
    let items: Vec<Value> = response
      .json()
      .await
      .map_err(|e| RemoteError::Transient(format!("failed to read {}: {}", url, e)))?;

    Ok(Page { items, links })
  }

  /// Follow `next` links from `first` to the end of the listing.
  fn pages_forward<'a>(
    &'a self,
    first: Result<Url, RemoteError>,
    accept: &'static str,
  ) -> impl Stream<Item = Result<Value, RemoteError>> + Send + 'a {
    stream::unfold(Some(first), move |next| async move {
      match next? {
        Err(e) => Some((vec![Err(e)], None)),
        Ok(url) => match self.get_page(url, accept).await {
          Ok(page) => Some((items_of(page.items), page.links.next.map(Ok))),
          Err(e) => Some((vec![Err(e)], None)),
        },
      }
    })
    .flat_map(stream::iter)
  }

  /// Stargazers from the last page backwards, stopping once a page starts
  /// before `cursor`. Stargazer listings are sorted oldest first.
  fn stargazers_since<'a>(
    &'a self,
    repo: &'a RepoName,
    cursor: Cursor,
  ) -> impl Stream<Item = Result<Value, RemoteError>> + Send + 'a {
    stream::unfold(StarWalk::Start, move |state| async move {
      match state {
        StarWalk::Done => None,
        StarWalk::Flush(first) => Some((items_of(first), StarWalk::Done)),
        StarWalk::Start => {
          let page = match self.stargazers_url(repo, 1) {
            Ok(url) => self.get_page(url, STAR_MEDIA_TYPE).await,
            Err(e) => Err(e),
          };
          match page {
            Err(e) => Some((vec![Err(e)], StarWalk::Done)),
            Ok(page) => match first_page_step(page.links.last.as_ref().and_then(page_number)) {
              StarStep::Fetch(last) => Some((
                Vec::new(),
                StarWalk::Backward {
                  page: last,
                  first: page.items,
                },
              )),
              StarStep::Flush | StarStep::Done => Some((items_of(page.items), StarWalk::Done)),
            },
          }
        }
        StarWalk::Backward { page, first } => {
          let fetched = match self.stargazers_url(repo, page) {
            Ok(url) => self.get_page(url, STAR_MEDIA_TYPE).await,
            Err(e) => Err(e),
          };
          match fetched {
            Err(e) => Some((vec![Err(e)], StarWalk::Done)),
            Ok(fetched) => {
              let before = starred_before(fetched.items.first(), cursor);
              let next = match backward_step(page, before) {
                StarStep::Fetch(previous) => StarWalk::Backward {
                  page: previous,
                  first,
                },
                StarStep::Flush => StarWalk::Flush(first),
                StarStep::Done => StarWalk::Done,
              };
              Some((items_of(fetched.items), next))
            }
          }
        }
      }
    })
    .flat_map(stream::iter)
  }

  async fn repository(&self, repo: &RepoName) -> Result<ApiRepository, RemoteError> {
    let url = self.repo_url(repo, "")?;
    debug!(%url, "Fetching repository");

    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| RemoteError::Transient(format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(classify_status(status, response.headers()));
    }

    response
      .json()
      .await
      .map_err(|e| RemoteError::Transient(format!("failed to read {}: {}", url, e)))
  }
}

impl RemoteSource for GitHubClient {
  fn fetch<'a>(
    &'a self,
    repo: &'a RepoName,
    category: Category,
    cursor: Option<Cursor>,
  ) -> BoxStream<'a, Result<RawRecord, RemoteError>> {
    match category {
      Category::Stars => {
        let values = match cursor {
          Some(cursor) => self.stargazers_since(repo, cursor).boxed(),
          None => self
            .pages_forward(self.stargazers_url(repo, 1), STAR_MEDIA_TYPE)
            .boxed(),
        };
        values
          .map(|item| item.and_then(decode_item::<ApiStargazer>).map(ApiStargazer::into_record))
          .boxed()
      }
      Category::Issues | Category::Pulls => self
        .pages_forward(self.issues_url(repo, cursor), JSON_MEDIA_TYPE)
        .filter_map(move |item| {
          let record = match item.and_then(decode_item::<ApiIssue>) {
            Ok(issue) if issue.category() == category => Some(Ok(issue.into_record())),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
          };
          future::ready(record)
        })
        .boxed(),
    }
  }

  fn total_count<'a>(
    &'a self,
    repo: &'a RepoName,
    category: Category,
  ) -> BoxFuture<'a, Result<Option<u64>, RemoteError>> {
    async move {
      match category {
        Category::Stars => Ok(Some(self.repository(repo).await?.stargazers_count)),
        // The issues endpoint counts pull requests too
        Category::Issues | Category::Pulls => Ok(None),
      }
    }
    .boxed()
  }
}
