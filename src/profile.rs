//! Connection profile persisted next to the caches.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::cache::{lock, SharedStorage};

pub const PROFILE_KEY: &str = "profile";

/// Where and as whom to talk to Redmine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
  /// Base URL, always ending in `/` when set.
  pub host: String,
  pub api_key: String,
  pub use_http_auth: bool,
  pub http_user: String,
  pub http_pass: String,
  pub selected_project_id: Option<u64>,
  pub current_user_id: Option<u64>,
  pub current_user_name: Option<String>,
}

impl Profile {
  pub fn is_empty(&self) -> bool {
    self.host.is_empty() && self.api_key.is_empty()
  }

  pub fn has_current_user(&self) -> bool {
    self.current_user_id.is_some()
      && self
        .current_user_name
        .as_deref()
        .is_some_and(|name| !name.is_empty())
  }

  fn normalize(&mut self) {
    self.host = self.host.trim().to_string();
    if !self.host.is_empty() && !self.host.ends_with('/') {
      self.host.push('/');
    }
  }
}

/// Owner of the single [`Profile`], loaded lazily and persisted on every
/// mutation.
#[derive(Clone)]
pub struct ProfileStore {
  storage: SharedStorage,
  state: Arc<Mutex<Option<Profile>>>,
}

impl ProfileStore {
  pub fn new(storage: SharedStorage) -> Self {
    Self {
      storage,
      state: Arc::new(Mutex::new(None)),
    }
  }

  /// Read the persisted profile, or create and persist an empty one.
  pub fn load(&self) -> Result<()> {
    let mut state = lock(&self.state);
    if state.is_some() {
      return Ok(());
    }

    let profile = match self.storage.get_json::<Profile>(PROFILE_KEY) {
      Ok(Some(profile)) => profile,
      Ok(None) => {
        let profile = Profile::default();
        self.storage.set_json(PROFILE_KEY, &profile)?;
        profile
      }
      Err(e) => {
        tracing::warn!(error = %e, "stored profile is unreadable, starting empty");
        Profile::default()
      }
    };
    *state = Some(profile);
    Ok(())
  }

  pub fn get(&self) -> Result<Profile> {
    self.load()?;
    Ok(lock(&self.state).clone().unwrap_or_default())
  }

  /// Replace the profile. Pointing at a different server or key forgets the
  /// resolved current user.
  pub fn set(&self, mut profile: Profile) -> Result<Profile> {
    self.load()?;
    profile.normalize();

    let mut state = lock(&self.state);
    if let Some(previous) = state.as_ref() {
      if previous.host != profile.host || previous.api_key != profile.api_key {
        profile.current_user_id = None;
        profile.current_user_name = None;
      }
    }
    self.storage.set_json(PROFILE_KEY, &profile)?;
    *state = Some(profile.clone());
    Ok(profile)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.get()?.is_empty())
  }

  pub fn set_current_user(&self, id: u64, name: String) -> Result<()> {
    self.update(|profile| {
      profile.current_user_id = Some(id);
      profile.current_user_name = Some(name);
    })
  }

  pub fn set_selected_project(&self, id: Option<u64>) -> Result<()> {
    self.update(|profile| profile.selected_project_id = id)
  }

  /// Forget the profile entirely, in memory and on disk.
  pub fn clear(&self) -> Result<()> {
    let mut state = lock(&self.state);
    self.storage.remove(PROFILE_KEY)?;
    *state = None;
    Ok(())
  }

  fn update(&self, change: impl FnOnce(&mut Profile)) -> Result<()> {
    self.load()?;
    let mut state = lock(&self.state);
    let profile = state.get_or_insert_with(Profile::default);
    change(profile);
    profile.normalize();
    self.storage.set_json(PROFILE_KEY, profile)?;
    Ok(())
  }
}
