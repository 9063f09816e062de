use std::sync::{Arc, Mutex};

use crate::cache::{lock, spawn_refresh, Collection, SharedStorage, SyncFlag, SyncReport};
use crate::error::Result;
use crate::event::{Notification, NotificationBus};

use super::client::RedmineClient;
use super::types::IssueStatus;

pub const STATUSES_KEY: &str = "issueStatuses";
pub const STATUSES_LOADED_KEY: &str = "statusesLoaded";

/// Issue statuses. Fetched once and kept until cleared or reloaded.
#[derive(Clone)]
pub struct StatusCache {
  state: Arc<Mutex<Collection<IssueStatus>>>,
  storage: SharedStorage,
  client: RedmineClient,
  bus: NotificationBus,
  sync: SyncFlag,
}

impl StatusCache {
  pub fn new(storage: SharedStorage, client: RedmineClient, bus: NotificationBus) -> Self {
    Self {
      state: Arc::new(Mutex::new(
        Collection::new(STATUSES_KEY).with_fetched_flag(STATUSES_LOADED_KEY),
      )),
      storage,
      client,
      bus,
      sync: SyncFlag::default(),
    }
  }

  pub fn load_from_local_store(&self) -> Result<()> {
    lock(&self.state).load_from_local_store(self.storage.as_ref())?;
    Ok(())
  }

  /// Known statuses. Starts a background fetch when none were fetched yet
  /// or when `reload` is set.
  pub fn all(&self, reload: bool) -> Result<Vec<IssueStatus>> {
    self.load_from_local_store()?;
    let (statuses, fetched) = {
      let state = lock(&self.state);
      (state.items().to_vec(), state.is_fetched())
    };
    if reload || !fetched {
      let this = self.clone();
      spawn_refresh("statuses", async move { this.sync_from_remote().await });
    }
    Ok(statuses)
  }

  /// Whether statuses were fetched from Redmine at some point.
  pub fn is_loaded(&self) -> bool {
    lock(&self.state).is_fetched()
  }

  /// Fetch `issue_statuses.json` and replace the cached list. An empty
  /// answer is ignored so a misbehaving server cannot wipe known statuses.
  pub async fn sync_from_remote(&self) -> Result<SyncReport> {
    let Some(_guard) = self.sync.try_begin() else {
      return Ok(SyncReport::skipped());
    };
    self.load_from_local_store()?;

    let statuses = self.client.issue_statuses().await?;
    if statuses.is_empty() {
      tracing::debug!("server returned no issue statuses");
      return Ok(SyncReport {
        pages: 1,
        ..SyncReport::default()
      });
    }

    let updated = statuses.len();
    {
      let mut state = lock(&self.state);
      state.replace_all(statuses.clone());
      state.set_fetched(true);
      state.mark_loaded();
      state.store(self.storage.as_ref())?;
    }
    tracing::info!(count = updated, "issue statuses loaded");
    self
      .bus
      .publish(Notification::IssueStatusesUpdated { statuses });

    Ok(SyncReport {
      pages: 1,
      updated,
      skipped: false,
    })
  }

  pub fn get_by_id(&self, id: u64) -> Option<IssueStatus> {
    lock(&self.state).get_by_id(id).cloned()
  }

  /// Status name, or the id itself while statuses are unknown. Asks for a
  /// fetch when nothing was loaded yet.
  pub fn name_by_id(&self, id: u64) -> String {
    if !self.is_loaded() {
      if let Err(e) = self.all(false) {
        tracing::warn!(error = %e, "could not read cached statuses");
      }
    }
    self
      .get_by_id(id)
      .map(|status| status.name)
      .unwrap_or_else(|| id.to_string())
  }

  pub fn store(&self) -> Result<()> {
    lock(&self.state).store(self.storage.as_ref())?;
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    lock(&self.state).clear(self.storage.as_ref())?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::Harness;

  const STATUSES: &str =
    r#"{"issue_statuses":[{"id":1,"name":"New"},{"id":5,"name":"Closed","is_closed":true}]}"#;

  #[tokio::test]
  async fn sync_persists_statuses_and_loaded_flag() {
    let mut h = Harness::new().await;
    let mock = h
      .server
      .mock("GET", "/issue_statuses.json")
      .with_status(200)
      .with_body(STATUSES)
      .expect(1)
      .create_async()
      .await;
    let mut events = h.engine.bus.subscribe();

    let report = h.engine.statuses.sync_from_remote().await.expect("sync");

    mock.assert_async().await;
    assert_eq!(report.updated, 2);
    assert!(h.engine.statuses.is_loaded());
    assert_eq!(h.engine.statuses.name_by_id(5), "Closed");
    assert_eq!(
      h.storage.get_raw(STATUSES_LOADED_KEY).expect("flag").as_deref(),
      Some("true")
    );
    assert_eq!(events.recv().await.expect("event").action(), "issueStatusesUpdated");
  }

  #[tokio::test]
  async fn unknown_status_falls_back_to_id() {
    let mut h = Harness::new().await;
    h.server
      .mock("GET", "/issue_statuses.json")
      .with_status(200)
      .with_body(STATUSES)
      .create_async()
      .await;
    h.engine.statuses.sync_from_remote().await.expect("sync");

    assert_eq!(h.engine.statuses.name_by_id(42), "42");
  }

  #[tokio::test]
  async fn empty_answer_keeps_cache_unloaded() {
    let mut h = Harness::new().await;
    h.server
      .mock("GET", "/issue_statuses.json")
      .with_status(200)
      .with_body(r#"{"issue_statuses":[]}"#)
      .create_async()
      .await;

    let report = h.engine.statuses.sync_from_remote().await.expect("sync");

    assert_eq!(report.updated, 0);
    assert!(!h.engine.statuses.is_loaded());
  }

  #[tokio::test]
  async fn statuses_survive_a_restart() {
    let mut h = Harness::new().await;
    h.server
      .mock("GET", "/issue_statuses.json")
      .with_status(200)
      .with_body(STATUSES)
      .create_async()
      .await;
    h.engine.statuses.sync_from_remote().await.expect("sync");

    let restarted = h.restart();
    restarted.statuses.load_from_local_store().expect("load");
    assert!(restarted.statuses.is_loaded());
    assert_eq!(restarted.statuses.name_by_id(1), "New");
  }

  #[tokio::test]
  async fn all_serves_cache_and_refreshes_in_background() {
    let mut h = Harness::new().await;
    h.storage
      .set_json(
        STATUSES_KEY,
        &vec![IssueStatus {
          id: 1,
          name: "Fresh".into(),
          is_closed: false,
        }],
      )
      .expect("seed");
    h.storage.set_raw(STATUSES_LOADED_KEY, "true").expect("flag");
    let mock = h
      .server
      .mock("GET", "/issue_statuses.json")
      .with_status(200)
      .with_body(STATUSES)
      .expect(1)
      .create_async()
      .await;
    let mut events = h.engine.bus.subscribe();

    let cached = h.engine.statuses.all(true).expect("statuses");
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].name, "Fresh");

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
      .await
      .expect("refresh finished")
      .expect("event");
    match event {
      Notification::IssueStatusesUpdated { statuses } => assert_eq!(statuses.len(), 2),
      other => panic!("unexpected {:?}", other),
    }
    mock.assert_async().await;
    assert_eq!(h.engine.statuses.name_by_id(1), "New");
  }
}
