//! CSV rendering of reconstructed series.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::series::Sample;

pub const NO_DATA_MESSAGE: &str = "No data points available";

/// `2000-01-01 00:00:00+00:00`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
  at.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

/// Values as they appear in the second column.
pub trait CsvValue {
  fn to_csv(&self) -> String;
}

impl CsvValue for u64 {
  fn to_csv(&self) -> String {
    self.to_string()
  }
}

impl CsvValue for f64 {
  fn to_csv(&self) -> String {
    format!("{:.2}", self)
  }
}

/// Render `samples` as `timestamp,value` lines.
pub fn to_csv<V: CsvValue>(samples: &[Sample<V>]) -> String {
  let mut csv_content = String::new();
  for sample in samples {
    csv_content.push_str(&format_timestamp(&sample.at));
    csv_content.push(',');
    csv_content.push_str(&sample.value.to_csv());
    csv_content.push('\n');
  }
  csv_content
}

/// Write `samples` to `path`, or to stdout without a path.
///
/// An empty series prints [`NO_DATA_MESSAGE`] and leaves `path` untouched.
/// Returns whether any samples were written.
pub fn write_series<V: CsvValue>(samples: &[Sample<V>], path: Option<&Path>) -> io::Result<bool> {
  let stdout = io::stdout();
  write_series_to(samples, path, &mut stdout.lock())
}

fn write_series_to<V: CsvValue>(
  samples: &[Sample<V>],
  path: Option<&Path>,
  console: &mut impl Write,
) -> io::Result<bool> {
  if samples.is_empty() {
    writeln!(console, "{}", NO_DATA_MESSAGE)?;
    return Ok(false);
  }

  let content = to_csv(samples);
  match path {
    Some(path) => {
      if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
      }
      fs::write(path, content)?;
    }
    None => console.write_all(content.as_bytes())?,
  }
  Ok(true)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, d, 0, 0, 0).unwrap()
  }

  #[test]
  fn test_timestamp_format() {
    assert_eq!(format_timestamp(&at(1)), "2000-01-01 00:00:00+00:00");
  }

  #[test]
  fn test_counts_csv() {
    let samples = vec![Sample { at: at(1), value: 1u64 }, Sample { at: at(2), value: 2u64 }];
    assert_eq!(
      to_csv(&samples),
      "2000-01-01 00:00:00+00:00,1\n2000-01-02 00:00:00+00:00,2\n"
    );
  }

  #[test]
  fn test_lifetime_csv() {
    let samples = vec![Sample { at: at(7), value: 4.5 }];
    assert_eq!(to_csv(&samples), "2000-01-07 00:00:00+00:00,4.50\n");
  }

  #[test]
  fn test_write_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("stars.csv");
    let mut console = Vec::new();
    let samples = vec![Sample { at: at(1), value: 1u64 }];

    assert!(write_series_to(&samples, Some(&path), &mut console).unwrap());
    assert!(console.is_empty());
    assert_eq!(fs::read_to_string(&path).unwrap(), "2000-01-01 00:00:00+00:00,1\n");
  }

  #[test]
  fn test_empty_series_writes_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stars.csv");
    let mut console = Vec::new();
    let samples: Vec<Sample<u64>> = Vec::new();

    assert!(!write_series_to(&samples, Some(&path), &mut console).unwrap());
    assert!(!path.exists());
    assert_eq!(String::from_utf8(console).unwrap(), "No data points available\n");
  }

  #[test]
  fn test_write_to_console() {
    let mut console = Vec::new();
    let samples = vec![Sample { at: at(3), value: 0u64 }];
    write_series_to(&samples, None, &mut console).unwrap();
    assert_eq!(String::from_utf8(console).unwrap(), "2000-01-03 00:00:00+00:00,0\n");
  }
}
