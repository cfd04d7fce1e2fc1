//! In-memory remote source for tests.

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Mutex;

use super::remote::{RemoteError, RemoteSource};
use super::types::{Category, Cursor, RawRecord, RepoName};

#[derive(Default)]
struct FakeState {
  records: Vec<RawRecord>,
  malformed_after: Option<usize>,
  fail_after: Option<usize>,
  permanent: bool,
  total: Option<u64>,
  cursors: Vec<Option<Cursor>>,
}

/// Serves a fixed list of records, optionally failing part way through.
#[derive(Default)]
pub struct FakeRemote {
  state: Mutex<FakeState>,
}

impl FakeRemote {
  pub fn new(records: Vec<RawRecord>) -> Self {
    let remote = Self::default();
    remote.set_records(records);
    remote
  }

  pub fn set_records(&self, records: Vec<RawRecord>) {
    self.state.lock().unwrap().records = records;
  }

  pub fn push(&self, record: RawRecord) {
    self.state.lock().unwrap().records.push(record);
  }

  pub fn remove(&self, id: u64) {
    self.state.lock().unwrap().records.retain(|r| r.id != id);
  }

  /// Yield `n` records, then a transient failure.
  pub fn fail_after(&self, n: usize) {
    self.state.lock().unwrap().fail_after = Some(n);
  }

  /// Insert a malformed item after `n` records.
  pub fn malformed_after(&self, n: usize) {
    self.state.lock().unwrap().malformed_after = Some(n);
  }

  pub fn fail_permanently(&self) {
    self.state.lock().unwrap().permanent = true;
  }

  pub fn recover(&self) {
    let mut state = self.state.lock().unwrap();
    state.fail_after = None;
    state.permanent = false;
  }

  pub fn set_total(&self, total: Option<u64>) {
    self.state.lock().unwrap().total = total;
  }

  /// Cursors passed to each `fetch` call so far.
  pub fn cursors(&self) -> Vec<Option<Cursor>> {
    self.state.lock().unwrap().cursors.clone()
  }

  pub fn fetch_count(&self) -> usize {
    self.state.lock().unwrap().cursors.len()
  }
}

impl RemoteSource for FakeRemote {
  fn fetch<'a>(
    &'a self,
    _repo: &'a RepoName,
    _category: Category,
    cursor: Option<Cursor>,
  ) -> BoxStream<'a, Result<RawRecord, RemoteError>> {
    let mut state = self.state.lock().unwrap();
    state.cursors.push(cursor);

    if state.permanent {
      let error = RemoteError::Permanent("repository not found".to_string());
      return stream::iter(vec![Err(error)]).boxed();
    }

    let mut items: Vec<Result<RawRecord, RemoteError>> = state
      .records
      .iter()
      .filter(|r| cursor.map_or(true, |c| r.cursor_position() >= c.position()))
      .cloned()
      .map(Ok)
      .collect();

    if let Some(n) = state.malformed_after {
      let at = n.min(items.len());
      items.insert(at, Err(RemoteError::Malformed("missing created_at".to_string())));
    }
    if let Some(n) = state.fail_after {
      items.truncate(n);
      items.push(Err(RemoteError::Transient("rate limit exceeded".to_string())));
    }

    stream::iter(items).boxed()
  }

  fn total_count<'a>(
    &'a self,
    _repo: &'a RepoName,
    _category: Category,
  ) -> BoxFuture<'a, Result<Option<u64>, RemoteError>> {
    let total = self.state.lock().unwrap().total;
    future::ready(Ok(total)).boxed()
  }
}
