//! Wiring of every component, built once at startup.

use color_eyre::Result;

use crate::badge::Badge;
use crate::cache::SharedStorage;
use crate::config::Config;
use crate::event::NotificationBus;
use crate::profile::ProfileStore;
use crate::redmine::{IssueCache, NewsFeed, ProjectCache, RedmineClient, StatusCache, UserCache};

/// Owns one instance of each component. Components reference each other
/// through the clones handed out here, never through globals.
#[derive(Clone)]
pub struct Engine {
  pub profile: ProfileStore,
  pub client: RedmineClient,
  pub projects: ProjectCache,
  pub issues: IssueCache,
  pub statuses: StatusCache,
  pub users: UserCache,
  pub news: NewsFeed,
  pub bus: NotificationBus,
  pub badge: Badge,
}

impl Engine {
  pub fn new(config: &Config, storage: SharedStorage) -> Result<Self> {
    let bus = NotificationBus::default();
    let badge = Badge::default();
    let profile = ProfileStore::new(storage.clone());
    profile.load()?;

    let client = RedmineClient::new(&config.http, profile.clone(), bus.clone(), badge.clone())?;
    let statuses = StatusCache::new(storage.clone(), client.clone(), bus.clone());
    let issues = IssueCache::new(
      storage.clone(),
      client.clone(),
      profile.clone(),
      statuses.clone(),
      bus.clone(),
      badge.clone(),
      config.sync.issue_page_size,
    );
    let projects = ProjectCache::new(
      storage.clone(),
      client.clone(),
      profile.clone(),
      bus.clone(),
      config.sync.project_issue_page_size,
    );
    let users = UserCache::new(storage, client.clone());
    let news = NewsFeed::new(client.clone());

    Ok(Self {
      profile,
      client,
      projects,
      issues,
      statuses,
      users,
      news,
      bus,
      badge,
    })
  }

  /// Hydrate every cache from storage so the badge shows the persisted
  /// unread count right away.
  pub fn load_from_local_store(&self) -> Result<()> {
    self.projects.load_from_local_store()?;
    self.issues.load_from_local_store()?;
    self.statuses.load_from_local_store()?;
    self.users.load_from_local_store()?;
    Ok(())
  }

  /// Write every loaded cache back to storage.
  pub fn store_all(&self) -> Result<()> {
    self.projects.store()?;
    self.issues.store()?;
    self.statuses.store()?;
    self.users.store()?;
    Ok(())
  }

  /// Drop cached projects and, when a profile is configured, start
  /// fetching them again. Issues and read state are kept.
  pub fn clear_items(&self) -> Result<()> {
    self.projects.clear()?;
    if !self.profile.is_empty()? {
      self.projects.all(true)?;
    }
    Ok(())
  }

  /// Forget everything: every cache, the profile and the badge count.
  pub fn clear_all(&self) -> Result<()> {
    self.projects.clear()?;
    self.issues.clear()?;
    self.statuses.clear()?;
    self.users.clear()?;
    self.profile.clear()?;
    tracing::info!("all local data cleared");
    Ok(())
  }
}
