//! Core traits and types for the caching system.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached.
///
/// Implementors provide their numeric Redmine id and, when the entity tracks
/// modification time, the raw `updated_on` value sent by the server.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Redmine id of this entity.
  fn cache_id(&self) -> u64;

  /// Last modification timestamp as sent by the server.
  fn updated_at(&self) -> Option<&str>;
}

/// Outcome of one `sync_from_remote` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Pages fetched and merged.
  pub pages: usize,
  /// Records inserted or replaced.
  pub updated: usize,
  /// Another sync for the same cache was already running.
  pub skipped: bool,
}

impl SyncReport {
  pub fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Parse the timestamp formats Redmine has used over the years.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  // Redmine 1.x: "2012/05/06 12:00:00 +0200"
  if let Ok(dt) = DateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S %z") {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
    return Some(dt.and_utc());
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

/// True when `candidate` is strictly newer than `current`.
///
/// Unparseable values fall back to a plain string comparison, which is still
/// correct for ISO 8601 strings in the same zone.
pub fn is_newer(candidate: Option<&str>, current: Option<&str>) -> bool {
  match (candidate, current) {
    (None, _) => false,
    (Some(_), None) => true,
    (Some(candidate), Some(current)) => {
      match (parse_timestamp(candidate), parse_timestamp(current)) {
        (Some(c), Some(l)) => c > l,
        _ => candidate > current,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn newer_compares_parsed_instants() {
    assert!(is_newer(Some("2024-02-01"), Some("2024-01-01")));
    assert!(is_newer(
      Some("2024-01-01T10:00:01Z"),
      Some("2024-01-01T10:00:00Z")
    ));
    // Same instant in different zones is not newer.
    assert!(!is_newer(
      Some("2024-01-01T12:00:00+02:00"),
      Some("2024-01-01T10:00:00Z")
    ));
  }

  #[test]
  fn equal_or_older_is_not_newer() {
    assert!(!is_newer(Some("2024-01-01"), Some("2024-01-01")));
    assert!(!is_newer(Some("2023-12-31"), Some("2024-01-01")));
    assert!(!is_newer(None, Some("2024-01-01")));
  }

  #[test]
  fn missing_local_timestamp_is_always_older() {
    assert!(is_newer(Some("2024-01-01"), None));
  }

  #[test]
  fn legacy_slash_format_is_understood() {
    let parsed = parse_timestamp("2012/05/06 12:00:00 +0200").expect("parse");
    assert_eq!(parsed.to_rfc3339(), "2012-05-06T10:00:00+00:00");
  }
}
