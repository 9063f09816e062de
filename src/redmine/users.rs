use std::sync::{Arc, Mutex};

use crate::cache::{lock, spawn_refresh, Collection, SharedStorage, SyncFlag, SyncReport};
use crate::error::Result;

use super::client::RedmineClient;
use super::types::User;

pub const USERS_KEY: &str = "users";
pub const USERS_LOADED_KEY: &str = "usersLoaded";

/// Redmine accounts. Listing users needs admin rights, so a 403 is cached
/// as an empty, loaded list.
#[derive(Clone)]
pub struct UserCache {
  state: Arc<Mutex<Collection<User>>>,
  storage: SharedStorage,
  client: RedmineClient,
  sync: SyncFlag,
}

impl UserCache {
  pub fn new(storage: SharedStorage, client: RedmineClient) -> Self {
    Self {
      state: Arc::new(Mutex::new(
        Collection::new(USERS_KEY).with_fetched_flag(USERS_LOADED_KEY),
      )),
      storage,
      client,
      sync: SyncFlag::default(),
    }
  }

  pub fn load_from_local_store(&self) -> Result<()> {
    lock(&self.state).load_from_local_store(self.storage.as_ref())?;
    Ok(())
  }

  /// Cached users. Starts a background fetch when the list was never
  /// fetched or when `force_reload` is set.
  pub fn all(&self, force_reload: bool) -> Result<Vec<User>> {
    self.load_from_local_store()?;
    let (users, fetched) = {
      let state = lock(&self.state);
      (state.items().to_vec(), state.is_fetched())
    };
    if force_reload || !fetched {
      let this = self.clone();
      spawn_refresh("users", async move { this.sync_from_remote().await });
    }
    Ok(users)
  }

  /// Users, fetched in the foreground unless already loaded. A concurrent
  /// call gets the cached list.
  pub async fn load(&self, reload: bool) -> Result<Vec<User>> {
    self.load_from_local_store()?;
    if reload || !self.is_loaded() {
      self.sync_from_remote().await?;
    }
    Ok(self.cached())
  }

  /// Fetch every page of `users.json` and replace the cached list.
  pub async fn sync_from_remote(&self) -> Result<SyncReport> {
    let Some(_guard) = self.sync.try_begin() else {
      return Ok(SyncReport::skipped());
    };
    self.load_from_local_store()?;

    let (users, pages) = match self.fetch_all().await {
      Ok(fetched) => fetched,
      Err(e) if e.is_forbidden() => {
        tracing::info!("user list not visible to this account");
        (Vec::new(), 1)
      }
      Err(e) => return Err(e),
    };
    let updated = users.len();
    tracing::debug!(count = updated, "users loaded");

    let mut state = lock(&self.state);
    state.replace_all(users);
    state.set_fetched(true);
    state.mark_loaded();
    state.store(self.storage.as_ref())?;
    Ok(SyncReport {
      pages,
      updated,
      skipped: false,
    })
  }

  async fn fetch_all(&self) -> Result<(Vec<User>, usize)> {
    let mut users = Vec::new();
    let mut pages = 0;
    let mut offset = 0;
    loop {
      let page = self.client.users(offset).await?;
      pages += 1;
      let received = page.users.len() as u64;
      users.extend(page.users);

      let limit = if page.page.limit > 0 { page.page.limit } else { received };
      if received == 0 || !page.page.has_more_after(page.page.offset, limit) {
        break;
      }
      offset = page.page.offset + limit;
    }
    Ok((users, pages))
  }

  pub fn is_loaded(&self) -> bool {
    lock(&self.state).is_fetched()
  }

  /// Users as currently cached, without asking Redmine.
  pub fn cached(&self) -> Vec<User> {
    lock(&self.state).items().to_vec()
  }

  pub fn get_by_id(&self, id: u64) -> Option<User> {
    lock(&self.state).get_by_id(id).cloned()
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
  use mockito::Matcher;

  #[tokio::test]
  async fn users_are_paged_and_cached() {
    let mut h = Harness::new().await;
    let first = h
      .server
      .mock("GET", "/users.json")
      .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
      .with_status(200)
      .with_body(
        r#"{"users":[{"id":1,"login":"ann","firstname":"Ann","lastname":"Lee"}],
          "total_count":2,"offset":0,"limit":1}"#,
      )
      .expect(1)
      .create_async()
      .await;
    let second = h
      .server
      .mock("GET", "/users.json")
      .match_query(Matcher::UrlEncoded("offset".into(), "1".into()))
      .with_status(200)
      .with_body(
        r#"{"users":[{"id":2,"login":"bob","firstname":"Bob","lastname":"Ray"}],
          "total_count":2,"offset":1,"limit":1}"#,
      )
      .expect(1)
      .create_async()
      .await;

    let users = h.engine.users.load(false).await.expect("users");
    assert_eq!(users.len(), 2);
    assert_eq!(
      h.engine.users.get_by_id(2).expect("bob").display_name(),
      "Bob Ray"
    );

    // Loaded: no further requests.
    h.engine.users.load(false).await.expect("cached");
    first.assert_async().await;
    second.assert_async().await;
  }

  #[tokio::test]
  async fn forbidden_list_is_loaded_and_empty() {
    let mut h = Harness::new().await;
    let mock = h
      .server
      .mock("GET", "/users.json")
      .match_query(Matcher::Any)
      .with_status(403)
      .expect(1)
      .create_async()
      .await;

    assert!(h.engine.users.load(false).await.expect("users").is_empty());
    assert!(h.engine.users.is_loaded());
    assert_eq!(
      h.storage.get_raw(USERS_LOADED_KEY).expect("flag").as_deref(),
      Some("true")
    );

    h.engine.users.load(false).await.expect("cached");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn all_serves_cache_and_refreshes_in_background() {
    let mut h = Harness::new().await;
    h.storage
      .set_json(
        USERS_KEY,
        &vec![User {
          id: 1,
          login: Some("ann".into()),
          firstname: "Ann".into(),
          lastname: "Lee".into(),
          ..User::default()
        }],
      )
      .expect("seed");
    h.storage.set_raw(USERS_LOADED_KEY, "true").expect("flag");
    let mock = h
      .server
      .mock("GET", "/users.json")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(
        r#"{"users":[{"id":1,"login":"ann","firstname":"Ann","lastname":"Lee"},
          {"id":2,"login":"bob","firstname":"Bob","lastname":"Ray"}],
          "total_count":2,"offset":0,"limit":25}"#,
      )
      .expect(1)
      .create_async()
      .await;

    // Loaded and not forced: served from the cache only.
    assert_eq!(h.engine.users.all(false).expect("cached").len(), 1);

    let stale = h.engine.users.all(true).expect("cached");
    assert_eq!(stale.len(), 1);

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
      while h.engine.users.cached().len() < 2 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
      }
    })
    .await
    .expect("background refresh");
    mock.assert_async().await;

    let restarted = h.restart();
    restarted.load_from_local_store().expect("hydrate");
    assert_eq!(restarted.users.cached().len(), 2);
  }

  #[tokio::test]
  async fn overlapping_sync_is_skipped() {
    let h = Harness::new().await;
    let _guard = h.engine.users.sync.try_begin().expect("claim");
    let report = h.engine.users.sync_from_remote().await.expect("sync");
    assert!(report.skipped);
    assert!(!h.engine.users.is_loaded());
  }

  #[tokio::test]
  async fn server_errors_are_not_cached() {
    let mut h = Harness::new().await;
    h.server
      .mock("GET", "/users.json")
      .match_query(Matcher::Any)
      .with_status(500)
      .create_async()
      .await;

    assert!(h.engine.users.load(false).await.is_err());
    assert!(!h.engine.users.is_loaded());
  }
}
