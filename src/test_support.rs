//! Shared fixtures for tests that talk to a mock Redmine.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::cache::{MemoryStorage, SharedStorage};
use crate::config::Config;
use crate::engine::Engine;
use crate::profile::Profile;

/// An engine over in-memory storage, pointed at a mockito server.
pub struct Harness {
  pub server: mockito::ServerGuard,
  pub engine: Engine,
  pub storage: SharedStorage,
}

impl Harness {
  /// Configured profile with current user 1 ("Me") and API key "secret".
  pub async fn new() -> Self {
    Self::with_profile(|profile| {
      profile.current_user_id = Some(1);
      profile.current_user_name = Some("Me".into());
    })
    .await
  }

  /// Configured host and key, current user not resolved yet.
  pub async fn without_user() -> Self {
    Self::with_profile(|_| {}).await
  }

  /// Profile pointing at a port nothing listens on.
  pub async fn unreachable() -> Self {
    Self::with_profile(|profile| {
      profile.host = "http://127.0.0.1:1/".into();
      profile.current_user_id = Some(1);
      profile.current_user_name = Some("Me".into());
    })
    .await
  }

  async fn with_profile(customize: impl FnOnce(&mut Profile)) -> Self {
    let server = mockito::Server::new_async().await;
    let storage: SharedStorage = Arc::new(MemoryStorage::new());
    let engine = Engine::new(&Config::default(), storage.clone()).expect("engine");

    let mut profile = Profile {
      host: server.url(),
      api_key: "secret".into(),
      ..Profile::default()
    };
    customize(&mut profile);
    // `set` forgets the user when the host changes, so persist in two steps.
    let user = profile.current_user_id.zip(profile.current_user_name.clone());
    engine.profile.set(profile).expect("profile");
    if let Some((id, name)) = user {
      engine.profile.set_current_user(id, name).expect("current user");
    }

    Self {
      server,
      engine,
      storage,
    }
  }

  /// A fresh engine over the same storage, as after a process restart.
  pub fn restart(&self) -> Engine {
    Engine::new(&Config::default(), self.storage.clone()).expect("engine")
  }

  /// Answer `issue_statuses.json` so issue syncs can complete.
  pub async fn mock_statuses(&mut self) {
    self
      .server
      .mock("GET", "/issue_statuses.json")
      .with_status(200)
      .with_body(r#"{"issue_statuses":[{"id":1,"name":"New"}]}"#)
      .create_async()
      .await;
  }
}

/// One issue as Redmine lists it.
pub fn issue_json(id: u64, updated_on: &str) -> String {
  format!(
    r#"{{"id":{id},"project":{{"id":1,"name":"Core"}},"status":{{"id":1,"name":"New"}},
      "subject":"Issue {id}","updated_on":"{updated_on}"}}"#
  )
}

/// A page of `issues.json` holding `ids`, all updated on the same day.
pub fn issues_page(ids: RangeInclusive<u64>, total: u64, offset: u64, limit: u64) -> String {
  let issues: Vec<String> = ids.map(|id| issue_json(id, "2024-01-01T00:00:00Z")).collect();
  format!(
    r#"{{"issues":[{}],"total_count":{},"offset":{},"limit":{}}}"#,
    issues.join(","),
    total,
    offset,
    limit
  )
}
