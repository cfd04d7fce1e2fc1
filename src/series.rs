//! Time series reconstructed from a record store.
//!
//! A [`Timeline`] sorts creation and end times once; each sample is then a
//! pair of binary searches plus prefix sums, so sampling a long history at
//! a fine interval stays cheap.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

use crate::cache::{Record, RecordStore};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// One point of a reconstructed series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample<V> {
  pub at: DateTime<Utc>,
  pub value: V,
}

/// Time axis to sample on.
///
/// Samples fall on `anchor + k * interval`, where the anchor is the first
/// record's creation time, restricted to `[from, to]`. Missing bounds
/// default to the first and last instants known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
  pub from: Option<DateTime<Utc>>,
  pub to: Option<DateTime<Utc>>,
  pub interval: Duration,
}

impl SampleWindow {
  pub fn every(interval: Duration) -> Self {
    Self {
      from: None,
      to: None,
      interval,
    }
  }

  pub fn daily() -> Self {
    Self::every(Duration::days(1))
  }

  pub fn weekly() -> Self {
    Self::every(Duration::weeks(1))
  }

  pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
    self.from = from;
    self.to = to;
    self
  }
}

impl Default for SampleWindow {
  fn default() -> Self {
    Self::weekly()
  }
}

/// Which records take part in reconstruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineOptions {
  /// Drop records closed within this long of their creation
  pub ignore_closed_within: Option<Duration>,
}

impl TimelineOptions {
  fn includes(&self, record: &Record) -> bool {
    match (self.ignore_closed_within, record.closed_at) {
      (Some(min), Some(closed)) => closed - record.created_at >= min,
      _ => true,
    }
  }
}

/// Sorted event times of a record store.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
  /// Creation times, ascending
  starts: Vec<i64>,
  /// `start_sums[i]` is the sum of the first `i` creation times
  start_sums: Vec<i128>,
  /// End times (closure or absence), ascending
  ends: Vec<i64>,
  end_sums: Vec<i128>,
  /// Latest instant known to the store
  last: i64,
}

fn prefix_sums(values: &[i64]) -> Vec<i128> {
  let mut sums = Vec::with_capacity(values.len() + 1);
  let mut total: i128 = 0;
  sums.push(total);
  for &v in values {
    total += v as i128;
    sums.push(total);
  }
  sums
}

fn to_datetime(millis: i64) -> DateTime<Utc> {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Timeline {
  pub fn build(store: &RecordStore, options: &TimelineOptions) -> Self {
    let mut starts = Vec::with_capacity(store.len());
    let mut ends = Vec::new();
    let mut last = i64::MIN;

    for record in store.all().filter(|r| options.includes(r)) {
      let start = record.created_at.timestamp_millis();
      starts.push(start);
      last = last.max(start).max(record.last_seen_at.timestamp_millis());
      if let Some(end) = record.ended_at() {
        let end = end.timestamp_millis();
        ends.push(end);
        last = last.max(end);
      }
    }

    // `all()` yields creation order already
    ends.sort_unstable();

    Self {
      start_sums: prefix_sums(&starts),
      end_sums: prefix_sums(&ends),
      starts,
      ends,
      last,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.starts.is_empty()
  }

  /// Latest creation, end or observation time.
  pub fn last(&self) -> Option<DateTime<Utc>> {
    (!self.is_empty()).then(|| to_datetime(self.last))
  }

  fn created_by(&self, t: i64) -> usize {
    self.starts.partition_point(|&s| s <= t)
  }

  fn ended_by(&self, t: i64) -> usize {
    self.ends.partition_point(|&e| e <= t)
  }

  /// Records created at or before `at` that had not ended by then.
  pub fn open_count_at(&self, at: DateTime<Utc>) -> u64 {
    let t = at.timestamp_millis();
    (self.created_by(t) - self.ended_by(t)) as u64
  }

  /// Mean lifetime in days of the records created at or before `at`.
  ///
  /// Records still open at `at` count with their age at that time. `None`
  /// when no record exists yet.
  pub fn average_lifetime_at(&self, at: DateTime<Utc>) -> Option<f64> {
    let t = at.timestamp_millis();
    let created = self.created_by(t);
    if created == 0 {
      return None;
    }
    let ended = self.ended_by(t);

    // Every ended record was created earlier, so it is among `created`
    let still_open = (created - ended) as i128;
    let total = self.end_sums[ended] + t as i128 * still_open - self.start_sums[created];
    Some(total as f64 / created as f64 / MILLIS_PER_DAY)
  }

  /// Sample instants for `window`, ascending.
  pub fn sample_times(&self, window: &SampleWindow) -> SampleTimes {
    let step = window.interval.num_milliseconds();
    let (Some(&anchor), true) = (self.starts.first(), step > 0) else {
      return SampleTimes::empty();
    };

    let from = window.from.map_or(anchor, |f| f.timestamp_millis());
    let to = window.to.map_or(self.last, |t| t.timestamp_millis());
    if from > to {
      return SampleTimes::empty();
    }

    let first = if from <= anchor {
      anchor - (anchor - from) / step * step
    } else {
      let steps = (from - anchor + step - 1) / step;
      anchor + steps * step
    };

    SampleTimes {
      next: first,
      to,
      step,
    }
  }

  /// Number of open records at each sample of `window`.
  pub fn open_count_series<'a>(
    &'a self,
    window: &SampleWindow,
  ) -> impl Iterator<Item = Sample<u64>> + 'a {
    self.sample_times(window).map(move |at| Sample {
      at,
      value: self.open_count_at(at),
    })
  }

  /// Mean lifetime in days at each sample of `window` that has records.
  pub fn average_lifetime_series<'a>(
    &'a self,
    window: &SampleWindow,
  ) -> impl Iterator<Item = Sample<f64>> + 'a {
    self
      .sample_times(window)
      .filter_map(move |at| self.average_lifetime_at(at).map(|value| Sample { at, value }))
  }

  /// Distinct instants at which the open count changes.
  pub fn change_times(&self) -> Vec<DateTime<Utc>> {
    let mut times: Vec<i64> = self.starts.iter().chain(self.ends.iter()).copied().collect();
    times.sort_unstable();
    times.dedup();
    times.into_iter().map(to_datetime).collect()
  }

  /// Open count after every change, one point per distinct event time.
  pub fn open_count_changes(&self) -> impl Iterator<Item = Sample<u64>> + '_ {
    self.change_times().into_iter().map(move |at| Sample {
      at,
      value: self.open_count_at(at),
    })
  }
}

/// Iterator over regularly spaced sample instants.
#[derive(Debug, Clone)]
pub struct SampleTimes {
  next: i64,
  to: i64,
  step: i64,
}

impl SampleTimes {
  fn empty() -> Self {
    Self {
      next: 1,
      to: 0,
      step: 1,
    }
  }
}

impl Iterator for SampleTimes {
  type Item = DateTime<Utc>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.next > self.to {
      return None;
    }
    let at = self.next;
    self.next = self.next.saturating_add(self.step);
    if at == self.next {
      // saturated, stop after this sample
      self.to = at - 1;
    }
    Some(to_datetime(at))
  }
}

/// Open count of `store` sampled on `window`.
pub fn open_count_series(store: &RecordStore, window: &SampleWindow) -> Vec<Sample<u64>> {
  Timeline::build(store, &TimelineOptions::default())
    .open_count_series(window)
    .collect()
}

/// Mean lifetime in days of `store` sampled on `window`.
pub fn average_lifetime_series(store: &RecordStore, window: &SampleWindow) -> Vec<Sample<f64>> {
  Timeline::build(store, &TimelineOptions::default())
    .average_lifetime_series(window)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
  }

  fn store(records: &[(u64, i64, Option<i64>)], seen: i64) -> RecordStore {
    let mut store = RecordStore::new();
    for &(id, created, closed) in records {
      store
        .upsert(Record {
          id,
          created_at: day(created),
          closed_at: closed.map(day),
          last_seen_at: day(seen),
          absent_since: None,
        })
        .unwrap();
    }
    store
  }

  fn window(from: i64, to: i64) -> SampleWindow {
    SampleWindow::daily().between(Some(day(from)), Some(day(to)))
  }

  #[test]
  fn test_open_count_end_to_end() {
    let store = store(&[(1, 0, Some(5)), (2, 2, None)], 6);
    let counts: Vec<u64> = open_count_series(&store, &window(0, 6))
      .into_iter()
      .map(|s| s.value)
      .collect();
    assert_eq!(counts, vec![1, 1, 2, 2, 2, 1, 1]);
  }

  #[test]
  fn test_average_lifetime_end_to_end() {
    let store = store(&[(1, 0, Some(5)), (2, 2, None)], 6);
    let series = average_lifetime_series(&store, &window(0, 6));
    let last = series.last().unwrap();
    assert_eq!(last.at, day(6));
    assert!((last.value - 4.5).abs() < 1e-9);
  }

  #[test]
  fn test_open_record_is_right_censored() {
    let store = store(&[(1, 0, None)], 10);
    let timeline = Timeline::build(&store, &TimelineOptions::default());
    assert_eq!(timeline.average_lifetime_at(day(10)), Some(10.0));
  }

  #[test]
  fn test_empty_store_has_no_samples() {
    let store = RecordStore::new();
    assert!(open_count_series(&store, &SampleWindow::weekly()).is_empty());
    assert!(average_lifetime_series(&store, &window(0, 10)).is_empty());
    assert!(Timeline::build(&store, &TimelineOptions::default())
      .open_count_changes()
      .next()
      .is_none());
  }

  #[test]
  fn test_lifetime_omits_samples_before_first_record() {
    let store = store(&[(1, 3, None)], 5);
    let series = average_lifetime_series(&store, &window(0, 5));
    assert_eq!(series.first().unwrap().at, day(3));
    assert_eq!(series.len(), 3);
  }

  #[test]
  fn test_samples_anchor_on_first_record() {
    let store = store(&[(1, 0, None), (2, 9, None)], 20);
    let times: Vec<_> = Timeline::build(&store, &TimelineOptions::default())
      .sample_times(&SampleWindow::weekly())
      .collect();
    assert_eq!(times, vec![day(0), day(7), day(14)]);

    // A later `from` keeps the weekly grid
    let times: Vec<_> = Timeline::build(&store, &TimelineOptions::default())
      .sample_times(&SampleWindow::weekly().between(Some(day(2)), None))
      .collect();
    assert_eq!(times, vec![day(7), day(14)]);
  }

  #[test]
  fn test_reconstruction_is_reproducible() {
    let store = store(&[(1, 0, Some(5)), (2, 2, None), (3, 4, Some(9))], 30);
    let a = average_lifetime_series(&store, &SampleWindow::weekly());
    let b = average_lifetime_series(&store, &SampleWindow::weekly());
    assert_eq!(a, b);
  }

  #[test]
  fn test_absent_record_excluded_after_absence() {
    let mut store = store(&[(1, 0, None), (2, 1, None), (3, 2, None)], 5);
    store.mark_absent_since(2, day(6));
    let counts: Vec<u64> = open_count_series(&store, &window(5, 7))
      .into_iter()
      .map(|s| s.value)
      .collect();
    assert_eq!(counts, vec![3, 2, 2]);
  }

  #[test]
  fn test_change_points() {
    let store = store(
      &[(1, 0, None), (2, 1, Some(3)), (3, 2, None), (4, 3, None), (5, 4, Some(6))],
      7,
    );
    let changes: Vec<(DateTime<Utc>, u64)> = Timeline::build(&store, &TimelineOptions::default())
      .open_count_changes()
      .map(|s| (s.at, s.value))
      .collect();
    assert_eq!(
      changes,
      vec![(day(0), 1), (day(1), 2), (day(2), 3), (day(3), 3), (day(4), 4), (day(6), 3)]
    );
  }

  #[test]
  fn test_immediately_closed_records_are_ignored() {
    let mut store = RecordStore::new();
    store
      .upsert(Record {
        id: 1,
        created_at: day(0),
        closed_at: Some(day(0) + Duration::seconds(59)),
        last_seen_at: day(1),
        absent_since: None,
      })
      .unwrap();
    let options = TimelineOptions {
      ignore_closed_within: Some(Duration::seconds(60)),
    };
    assert!(Timeline::build(&store, &options).is_empty());
    assert!(!Timeline::build(&store, &TimelineOptions::default()).is_empty());
  }
}
