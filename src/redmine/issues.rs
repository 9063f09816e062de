use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use crate::badge::Badge;
use crate::cache::{
  is_newer, lock, spawn_refresh, Cacheable, Collection, SharedStorage, SyncFlag, SyncReport,
};
use crate::error::{Error, Result};
use crate::event::{Notification, NotificationBus};
use crate::profile::ProfileStore;

use super::api_types::ApiIssue;
use super::client::{IssueQuery, RedmineClient};
use super::statuses::StatusCache;
use super::types::Issue;

pub const ISSUES_KEY: &str = "issues";
pub const LAST_UPDATED_KEY: &str = "lastUpdated";

/// Merge one page of remote issues into `collection`.
///
/// Unknown issues are appended unread. Known issues are replaced, and
/// forced unread, only when the remote `updated_on` is strictly newer;
/// otherwise the local record is left exactly as it was. Returns the number
/// of inserted or replaced records.
pub fn merge_page(collection: &mut Collection<Issue>, incoming: Vec<ApiIssue>) -> usize {
  let mut updated = 0;
  for remote in incoming {
    if let Some(local) = collection.get_by_id_mut(remote.id) {
      if is_newer(remote.updated_on.as_deref(), local.updated_at()) {
        *local = Issue::from(remote);
        updated += 1;
      }
      continue;
    }
    collection.push(Issue::from(remote));
    updated += 1;
  }
  updated
}

struct IssueState {
  issues: Collection<Issue>,
  unread: usize,
  last_updated: Option<DateTime<Utc>>,
}

impl IssueState {
  fn recount(&mut self) -> usize {
    self.unread = self.issues.items().iter().filter(|i| !i.read).count();
    self.unread
  }

  fn store(&self, storage: &SharedStorage) -> Result<()> {
    if !self.issues.is_loaded() {
      return Ok(());
    }
    self.issues.store(storage.as_ref())?;
    if let Some(at) = self.last_updated {
      storage.set_json(LAST_UPDATED_KEY, &at.to_rfc3339())?;
    }
    Ok(())
  }
}

/// Issues assigned to the current user, with read/unread tracking.
///
/// The unread counter always equals the number of cached issues with
/// `read == false` and is pushed to the badge after every change.
#[derive(Clone)]
pub struct IssueCache {
  state: Arc<Mutex<IssueState>>,
  storage: SharedStorage,
  client: RedmineClient,
  profile: ProfileStore,
  statuses: StatusCache,
  bus: NotificationBus,
  badge: Badge,
  page_size: u64,
  sync: SyncFlag,
}

impl IssueCache {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    storage: SharedStorage,
    client: RedmineClient,
    profile: ProfileStore,
    statuses: StatusCache,
    bus: NotificationBus,
    badge: Badge,
    page_size: u64,
  ) -> Self {
    Self {
      state: Arc::new(Mutex::new(IssueState {
        issues: Collection::new(ISSUES_KEY),
        unread: 0,
        last_updated: None,
      })),
      storage,
      client,
      profile,
      statuses,
      bus,
      badge,
      page_size: page_size.max(1),
      sync: SyncFlag::default(),
    }
  }

  pub fn page_size(&self) -> u64 {
    self.page_size
  }

  /// Hydrate from storage and push the resulting unread count to the badge.
  pub fn load_from_local_store(&self) -> Result<()> {
    let mut state = lock(&self.state);
    if state.issues.is_loaded() {
      return Ok(());
    }
    state.issues.load_from_local_store(self.storage.as_ref())?;
    state.last_updated = self
      .storage
      .get_json::<String>(LAST_UPDATED_KEY)
      .ok()
      .flatten()
      .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
      .map(|at| at.with_timezone(&Utc));
    let unread = state.recount();
    drop(state);
    self.badge.set_unread(unread);
    Ok(())
  }

  /// Cached issues right now. Starts a background sync when the cache is
  /// empty or `force_reload` is set; subscribe to `issuesUpdated` for the
  /// result.
  pub fn all(&self, force_reload: bool) -> Result<Vec<Issue>> {
    self.load_from_local_store()?;
    let issues = lock(&self.state).issues.items().to_vec();
    if issues.is_empty() || force_reload {
      let this = self.clone();
      let limit = self.page_size;
      spawn_refresh("issues", async move { this.sync_from_remote(0, limit).await });
    }
    Ok(issues)
  }

  pub fn cached(&self) -> Vec<Issue> {
    lock(&self.state).issues.items().to_vec()
  }

  /// Page through the issues assigned to the current user, newest first.
  ///
  /// The next page is requested only while the server reports more records
  /// AND every record of the current page was new or changed. A page with
  /// stale records means the cache has caught up, so the remaining pages
  /// are skipped even if the server has them. Pages merged before an error
  /// are kept.
  pub async fn sync_from_remote(&self, offset: u64, limit: u64) -> Result<SyncReport> {
    let Some(_guard) = self.sync.try_begin() else {
      tracing::debug!("issue sync already running");
      return Ok(SyncReport::skipped());
    };
    self.load_from_local_store()?;

    let user_id = self
      .profile
      .get()?
      .current_user_id
      .ok_or_else(|| Error::NotConfigured("current user is not resolved".into()))?;
    let limit = limit.max(1);
    let mut offset = offset;
    let mut report = SyncReport::default();

    loop {
      let query = IssueQuery {
        assigned_to_id: Some(user_id),
        project_id: None,
        offset,
        limit,
      };
      let page = match self.client.issues(&query).await {
        Ok(page) => page,
        Err(e) => {
          tracing::warn!(offset, pages = report.pages, error = %e, "issue sync aborted");
          return Err(e);
        }
      };
      report.pages += 1;

      if page.page.total_count == 0 {
        let unread = {
          let mut state = lock(&self.state);
          state.issues.mark_loaded();
          state.last_updated = Some(Utc::now());
          state.store(&self.storage)?;
          state.unread
        };
        self.badge.set_unread(unread);
        break;
      }

      let (updated, unread) = {
        let mut state = lock(&self.state);
        let updated = merge_page(&mut state.issues, page.issues);
        state.issues.mark_loaded();
        state.last_updated = Some(Utc::now());
        let unread = state.recount();
        state.store(&self.storage)?;
        (updated, unread)
      };
      report.updated += updated;
      tracing::info!(offset, updated, unread, total = page.page.total_count, "issue page merged");

      if !self.statuses.is_loaded() {
        if let Err(e) = self.statuses.sync_from_remote().await {
          tracing::warn!(error = %e, "could not load issue statuses");
        }
      }
      self.badge.set_unread(unread);
      self
        .bus
        .publish(Notification::IssuesUpdated { updated, unread });

      // Redmine silently caps `limit`, so step by the window it answered.
      let window = if page.page.limit > 0 { page.page.limit.min(limit) } else { limit };
      if !(page.page.has_more_after(offset, window) && updated as u64 >= window) {
        break;
      }
      offset += window;
    }

    Ok(report)
  }

  #[cfg(test)]
  pub fn hold_sync(&self) -> Option<crate::cache::SyncGuard> {
    self.sync.try_begin()
  }

  pub fn get_by_id(&self, id: u64) -> Option<Issue> {
    lock(&self.state).issues.get_by_id(id).cloned()
  }

  /// Fetch journals and changesets for an issue unless they were already
  /// loaded. `None` when the issue is not cached.
  pub async fn get_details(&self, id: u64, force_reload: bool) -> Result<Option<Issue>> {
    self.load_from_local_store()?;
    let details_loaded = match lock(&self.state).issues.get_by_id(id) {
      Some(issue) => issue.details_loaded,
      None => return Ok(None),
    };
    if details_loaded && !force_reload {
      return Ok(self.get_by_id(id));
    }

    let remote = self.client.issue(id).await?;
    let issue = {
      let mut state = lock(&self.state);
      let Some(local) = state.issues.get_by_id_mut(id) else {
        // Cleared while the request was in flight.
        return Ok(None);
      };
      local.absorb_details(remote);
      let issue = local.clone();
      state.store(&self.storage)?;
      issue
    };

    self.bus.publish(Notification::IssueDetails {
      id,
      issue: Box::new(issue.clone()),
    });
    Ok(Some(issue))
  }

  /// Returns false when the issue is not cached.
  pub fn mark_read(&self, id: u64) -> Result<bool> {
    self.set_read(Some(id), true)
  }

  pub fn mark_unread(&self, id: u64) -> Result<bool> {
    self.set_read(Some(id), false)
  }

  pub fn mark_all_read(&self) -> Result<()> {
    self.set_read(None, true).map(|_| ())
  }

  /// Set `read` on one issue, or on all of them for `None`, then persist
  /// and push the new count.
  fn set_read(&self, id: Option<u64>, read: bool) -> Result<bool> {
    self.load_from_local_store()?;
    let unread = {
      let mut state = lock(&self.state);
      match id {
        Some(id) => match state.issues.get_by_id_mut(id) {
          Some(issue) => issue.read = read,
          None => return Ok(false),
        },
        None => state
          .issues
          .items_mut()
          .iter_mut()
          .for_each(|issue| issue.read = read),
      }
      let unread = state.recount();
      state.store(&self.storage)?;
      unread
    };
    self.badge.set_unread(unread);
    Ok(true)
  }

  pub fn unread_count(&self) -> usize {
    lock(&self.state).unread
  }

  pub fn last_updated(&self) -> Option<DateTime<Utc>> {
    lock(&self.state).last_updated
  }

  pub fn store(&self) -> Result<()> {
    lock(&self.state).store(&self.storage)
  }

  pub fn clear(&self) -> Result<()> {
    {
      let mut state = lock(&self.state);
      state.issues.clear(self.storage.as_ref())?;
      state.last_updated = None;
      state.unread = 0;
      self.storage.remove(LAST_UPDATED_KEY)?;
    }
    self.badge.set_unread(0);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::badge::BadgeState;
  use crate::test_support::{issue_json, issues_page, Harness};
  use mockito::Matcher;

  fn api_issue(id: u64, updated_on: &str) -> ApiIssue {
    serde_json::from_str(&issue_json(id, updated_on)).expect("issue json")
  }

  fn loaded_collection() -> Collection<Issue> {
    let mut collection = Collection::new(ISSUES_KEY);
    collection.mark_loaded();
    collection
  }

  fn page_matcher(offset: u64) -> Matcher {
    Matcher::AllOf(vec![
      Matcher::UrlEncoded("assigned_to_id".into(), "1".into()),
      Matcher::UrlEncoded("sort".into(), "updated_on:desc".into()),
      Matcher::UrlEncoded("offset".into(), offset.to_string()),
      Matcher::UrlEncoded("limit".into(), "25".into()),
    ])
  }

  #[test]
  fn absent_issue_is_inserted_unread() {
    let mut collection = loaded_collection();
    let updated = merge_page(&mut collection, vec![api_issue(1, "2024-01-01")]);

    assert_eq!(updated, 1);
    assert!(!collection.get_by_id(1).expect("inserted").read);
  }

  #[test]
  fn newer_remote_replaces_and_resurfaces() {
    let mut collection = loaded_collection();
    collection.push(Issue {
      id: 7,
      subject: "old subject".into(),
      updated_on: Some("2024-01-01".into()),
      read: true,
      ..Issue::default()
    });

    let mut remote = api_issue(7, "2024-02-01");
    remote.subject = "new subject".into();
    let updated = merge_page(&mut collection, vec![remote]);

    let issue = collection.get_by_id(7).expect("issue");
    assert_eq!(updated, 1);
    assert_eq!(issue.subject, "new subject");
    assert_eq!(issue.updated_on.as_deref(), Some("2024-02-01"));
    assert!(!issue.read);
  }

  #[test]
  fn equal_or_older_remote_leaves_record_untouched() {
    let mut collection = loaded_collection();
    let local = Issue {
      id: 7,
      subject: "local".into(),
      updated_on: Some("2024-01-01T00:00:00Z".into()),
      read: true,
      details_loaded: true,
      ..Issue::default()
    };
    collection.push(local.clone());

    let mut same = api_issue(7, "2024-01-01T00:00:00Z");
    same.subject = "remote".into();
    let older = api_issue(7, "2023-06-01T00:00:00Z");
    let updated = merge_page(&mut collection, vec![same, older]);

    assert_eq!(updated, 0);
    assert_eq!(collection.get_by_id(7), Some(&local));
  }

  #[tokio::test]
  async fn thirty_issues_arrive_in_exactly_two_requests() {
    let mut h = Harness::new().await;
    h.mock_statuses().await;
    let first = h
      .server
      .mock("GET", "/issues.json")
      .match_query(page_matcher(0))
      .with_status(200)
      .with_body(issues_page(1..=25, 30, 0, 25))
      .expect(1)
      .create_async()
      .await;
    let second = h
      .server
      .mock("GET", "/issues.json")
      .match_query(page_matcher(25))
      .with_status(200)
      .with_body(issues_page(26..=30, 30, 25, 25))
      .expect(1)
      .create_async()
      .await;

    let report = h.engine.issues.sync_from_remote(0, 25).await.expect("sync");

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(report.pages, 2);
    assert_eq!(report.updated, 30);
    let issues = h.engine.issues.all(false).expect("all");
    assert_eq!(issues.len(), 30);
    assert!(issues.iter().all(|issue| !issue.read));
    assert_eq!(h.engine.issues.unread_count(), 30);
    assert_eq!(h.engine.badge.state(), BadgeState::Unread(30));
    assert!(h.engine.issues.last_updated().is_some());
  }

  #[tokio::test]
  async fn pages_follow_the_window_the_server_answers() {
    let mut h = Harness::new().await;
    h.mock_statuses().await;
    let window = |offset: u64| {
      Matcher::AllOf(vec![
        Matcher::UrlEncoded("offset".into(), offset.to_string()),
        Matcher::UrlEncoded("limit".into(), "150".into()),
      ])
    };
    let first = h
      .server
      .mock("GET", "/issues.json")
      .match_query(window(0))
      .with_status(200)
      .with_body(issues_page(1..=100, 120, 0, 100))
      .expect(1)
      .create_async()
      .await;
    let second = h
      .server
      .mock("GET", "/issues.json")
      .match_query(window(100))
      .with_status(200)
      .with_body(issues_page(101..=120, 120, 100, 100))
      .expect(1)
      .create_async()
      .await;

    let report = h.engine.issues.sync_from_remote(0, 150).await.expect("sync");

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(report.pages, 2);
    assert_eq!(report.updated, 120);
    assert_eq!(h.engine.issues.cached().len(), 120);
  }

  #[tokio::test]
  async fn stale_page_stops_pagination_early() {
    let mut h = Harness::new().await;
    h.mock_statuses().await;
    let body = issues_page(1..=25, 60, 0, 25);
    h.server
      .mock("GET", "/issues.json")
      .match_query(page_matcher(0))
      .with_status(200)
      .with_body(body.clone())
      .create_async()
      .await;
    let beyond = h
      .server
      .mock("GET", "/issues.json")
      .match_query(page_matcher(25))
      .with_status(200)
      .with_body(issues_page(26..=50, 60, 25, 25))
      .expect(0)
      .create_async()
      .await;

    // First run has a fully fresh first page and would continue, so seed
    // the cache with that page instead.
    {
      let mut state = lock(&h.engine.issues.state);
      state.issues.mark_loaded();
      let list: crate::redmine::api_types::ApiIssueList =
        serde_json::from_str(&body).expect("page");
      merge_page(&mut state.issues, list.issues);
    }

    let report = h.engine.issues.sync_from_remote(0, 25).await.expect("sync");

    beyond.assert_async().await;
    assert_eq!(report.pages, 1);
    assert_eq!(report.updated, 0);
  }

  #[tokio::test]
  async fn changed_issue_is_marked_unread_again() {
    let mut h = Harness::new().await;
    h.mock_statuses().await;
    {
      let mut state = lock(&h.engine.issues.state);
      state.issues.mark_loaded();
      state.issues.push(Issue {
        id: 7,
        updated_on: Some("2024-01-01".into()),
        read: true,
        ..Issue::default()
      });
      state.recount();
    }
    h.server
      .mock("GET", "/issues.json")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(format!(
        r#"{{"issues":[{}],"total_count":1,"offset":0,"limit":25}}"#,
        issue_json(7, "2024-02-01")
      ))
      .create_async()
      .await;

    h.engine.issues.sync_from_remote(0, 25).await.expect("sync");

    let issue = h.engine.issues.get_by_id(7).expect("issue 7");
    assert!(!issue.read);
    assert_eq!(issue.subject, "Issue 7");
    assert_eq!(h.engine.issues.unread_count(), 1);
  }

  #[tokio::test]
  async fn all_serves_cache_and_refreshes_in_background() {
    let mut h = Harness::new().await;
    h.mock_statuses().await;
    {
      let mut state = lock(&h.engine.issues.state);
      state.issues.mark_loaded();
      state.issues.push(Issue {
        id: 7,
        subject: "Old subject".into(),
        updated_on: Some("2024-01-01".into()),
        read: true,
        ..Issue::default()
      });
      state.recount();
    }
    let mock = h
      .server
      .mock("GET", "/issues.json")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(format!(
        r#"{{"issues":[{},{}],"total_count":2,"offset":0,"limit":25}}"#,
        issue_json(8, "2024-02-02"),
        issue_json(7, "2024-02-01")
      ))
      .expect(1)
      .create_async()
      .await;
    let mut events = h.engine.bus.subscribe();

    let cached = h.engine.issues.all(true).expect("issues");
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].subject, "Old subject");

    let (updated, unread) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
      loop {
        if let Notification::IssuesUpdated { updated, unread } =
          events.recv().await.expect("event")
        {
          return (updated, unread);
        }
      }
    })
    .await
    .expect("refresh finished");

    mock.assert_async().await;
    assert_eq!((updated, unread), (2, 2));
    assert_eq!(h.engine.issues.cached().len(), 2);
    assert_eq!(h.engine.issues.get_by_id(7).expect("issue 7").subject, "Issue 7");
  }

  #[tokio::test]
  async fn failed_second_page_keeps_first_page() {
    let mut h = Harness::new().await;
    h.mock_statuses().await;
    h.server
      .mock("GET", "/issues.json")
      .match_query(page_matcher(0))
      .with_status(200)
      .with_body(issues_page(1..=25, 40, 0, 25))
      .create_async()
      .await;
    h.server
      .mock("GET", "/issues.json")
      .match_query(page_matcher(25))
      .with_status(500)
      .create_async()
      .await;

    let err = h.engine.issues.sync_from_remote(0, 25).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(h.engine.issues.all(false).expect("all").len(), 25);
    let restarted = h.restart();
    assert_eq!(restarted.issues.all(false).expect("persisted").len(), 25);
  }

  #[tokio::test]
  async fn sync_requires_a_resolved_user() {
    let h = Harness::without_user().await;
    let err = h.engine.issues.sync_from_remote(0, 25).await.unwrap_err();
    assert!(matches!(err, Error::NotConfigured(_)));
  }

  #[tokio::test]
  async fn overlapping_sync_is_skipped() {
    let h = Harness::new().await;
    let _running = h.engine.issues.hold_sync().expect("claim");

    let report = h.engine.issues.sync_from_remote(0, 25).await.expect("sync");
    assert!(report.skipped);
  }

  #[tokio::test]
  async fn read_state_changes_keep_unread_count_consistent() {
    let h = Harness::new().await;
    {
      let mut state = lock(&h.engine.issues.state);
      state.issues.mark_loaded();
      for id in 1..=3 {
        state.issues.push(Issue {
          id,
          ..Issue::default()
        });
      }
      state.recount();
    }
    let issues = &h.engine.issues;
    let consistent = || {
      let expected = issues
        .all(false)
        .expect("all")
        .iter()
        .filter(|i| !i.read)
        .count();
      assert_eq!(issues.unread_count(), expected);
      assert_eq!(h.engine.badge.state(), BadgeState::Unread(expected));
    };

    assert!(issues.mark_read(1).expect("read"));
    consistent();
    // Marking twice must not drift the counter.
    assert!(issues.mark_read(1).expect("read again"));
    consistent();
    assert!(issues.mark_unread(1).expect("unread"));
    consistent();
    assert!(!issues.mark_read(99).expect("missing"));
    consistent();
    issues.mark_all_read().expect("all read");
    consistent();
    assert_eq!(issues.unread_count(), 0);
  }

  #[tokio::test]
  async fn details_are_fetched_once_and_keep_read_state() {
    let mut h = Harness::new().await;
    {
      let mut state = lock(&h.engine.issues.state);
      state.issues.mark_loaded();
      state.issues.push(Issue {
        id: 3,
        read: true,
        ..Issue::default()
      });
    }
    let detail = h
      .server
      .mock("GET", "/issues/3.json")
      .match_query(Matcher::UrlEncoded(
        "include".into(),
        "journals,changesets".into(),
      ))
      .with_status(200)
      .with_body(
        r#"{"issue":{"id":3,"subject":"Crash","updated_on":"2024-03-01T00:00:00Z",
          "journals":[{"id":1,"notes":"looking"}],"changesets":[{"revision":"abc"}]}}"#,
      )
      .expect(2)
      .create_async()
      .await;
    let mut events = h.engine.bus.subscribe();

    let issue = h
      .engine
      .issues
      .get_details(3, false)
      .await
      .expect("details")
      .expect("cached");
    assert!(issue.details_loaded);
    assert!(issue.read);
    assert_eq!(issue.journals.len(), 1);
    assert_eq!(events.recv().await.expect("event").action(), "issueDetails");

    // Already loaded: served from cache.
    h.engine.issues.get_details(3, false).await.expect("cached");
    // Forced: fetched again.
    h.engine.issues.get_details(3, true).await.expect("forced");
    detail.assert_async().await;

    assert_eq!(h.engine.issues.get_details(404, false).await.expect("missing"), None);
  }

  #[tokio::test]
  async fn clear_wipes_issues_and_resets_badge() {
    let h = Harness::new().await;
    {
      let mut state = lock(&h.engine.issues.state);
      state.issues.mark_loaded();
      state.issues.push(Issue {
        id: 1,
        ..Issue::default()
      });
    }
    h.engine.issues.store().expect("store");
    assert!(h.storage.get_raw(ISSUES_KEY).expect("get").is_some());

    h.engine.issues.clear().expect("clear");

    assert!(h.storage.get_raw(ISSUES_KEY).expect("get").is_none());
    assert_eq!(h.engine.issues.unread_count(), 0);
    assert_eq!(h.engine.badge.state(), BadgeState::Unread(0));
  }
}
