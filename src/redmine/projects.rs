use color_eyre::eyre::eyre;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::cache::{lock, spawn_refresh, Collection, SharedStorage, SyncFlag, SyncReport};
use crate::error::Result;
use crate::event::{Notification, NotificationBus};
use crate::profile::ProfileStore;

use super::client::{IssueQuery, RedmineClient};
use super::types::{Issue, NamedRef, Project};

pub const PROJECTS_KEY: &str = "projects";

/// Projects visible to the current user, with lazily loaded details,
/// members and per-project issue lists.
#[derive(Clone)]
pub struct ProjectCache {
  state: Arc<Mutex<Collection<Project>>>,
  storage: SharedStorage,
  client: RedmineClient,
  profile: ProfileStore,
  bus: NotificationBus,
  issue_page_size: u64,
  sync: SyncFlag,
}

impl ProjectCache {
  pub fn new(
    storage: SharedStorage,
    client: RedmineClient,
    profile: ProfileStore,
    bus: NotificationBus,
    issue_page_size: u64,
  ) -> Self {
    Self {
      state: Arc::new(Mutex::new(Collection::new(PROJECTS_KEY))),
      storage,
      client,
      profile,
      bus,
      issue_page_size: issue_page_size.max(1),
      sync: SyncFlag::default(),
    }
  }

  pub fn load_from_local_store(&self) -> Result<()> {
    lock(&self.state).load_from_local_store(self.storage.as_ref())?;
    Ok(())
  }

  /// Cached projects. Starts a background sync when empty or on `reload`.
  pub fn all(&self, reload: bool) -> Result<Vec<Project>> {
    self.load_from_local_store()?;
    let projects = lock(&self.state).items().to_vec();
    if projects.is_empty() || reload {
      let this = self.clone();
      spawn_refresh("projects", async move { this.sync_from_remote().await });
    }
    Ok(projects)
  }

  /// Cached projects, without refreshing.
  pub fn cached(&self) -> Vec<Project> {
    lock(&self.state).items().to_vec()
  }

  /// Page through `projects.json` using the window the server reports.
  /// Existing records are updated in place so fetched details, members and
  /// issue lists survive. Once every page arrived, projects the server no
  /// longer returns are dropped, and so is a selection pointing at one.
  pub async fn sync_from_remote(&self) -> Result<SyncReport> {
    let Some(_guard) = self.sync.try_begin() else {
      return Ok(SyncReport::skipped());
    };
    self.load_from_local_store()?;

    let mut report = SyncReport::default();
    let mut seen = HashSet::new();
    let mut offset = 0;
    loop {
      let page = self.client.projects(offset).await?;
      report.pages += 1;
      let received = page.projects.len() as u64;

      {
        let mut state = lock(&self.state);
        for remote in page.projects {
          seen.insert(remote.id);
          match state.get_by_id_mut(remote.id) {
            Some(local) => local.absorb(remote),
            None => state.push(Project::from(remote)),
          }
        }
        state.mark_loaded();
        state.store(self.storage.as_ref())?;
      }
      report.updated += received as usize;

      // Servers that omit paging fields answer everything in one page.
      let limit = if page.page.limit > 0 { page.page.limit } else { received };
      if received == 0 || !page.page.has_more_after(page.page.offset, limit) {
        break;
      }
      offset = page.page.offset + limit;
    }

    let (count, removed) = {
      let mut state = lock(&self.state);
      let removed = state.retain(|project| seen.contains(&project.id));
      if removed > 0 {
        state.store(self.storage.as_ref())?;
      }
      (state.len(), removed)
    };
    if let Some(selected) = self.profile.get()?.selected_project_id {
      if !seen.contains(&selected) {
        tracing::info!(project = selected, "selected project no longer visible");
        self.profile.set_selected_project(None)?;
      }
    }
    tracing::info!(count, removed, pages = report.pages, "projects loaded");
    self.bus.publish(Notification::ProjectsLoaded { count });
    Ok(report)
  }

  /// Project with details (trackers, categories) and members.
  ///
  /// Details are fetched when missing or on `reload`. A fully loaded project
  /// only has its members completed. `None` when the project is not
  /// cached or Redmine no longer shows it.
  pub async fn get(&self, id: u64, reload: bool) -> Result<Option<Project>> {
    self.load_from_local_store()?;
    let fully_loaded = match lock(&self.state).get_by_id(id) {
      Some(project) => project.fully_loaded,
      None => return Ok(None),
    };

    if !fully_loaded || reload {
      let remote = match self.client.project(id).await {
        Ok(remote) => remote,
        Err(e) if e.status() == Some(404) => return Ok(None),
        Err(e) => return Err(e),
      };
      let project = self.update(id, |project| {
        project.absorb(remote);
        project.fully_loaded = true;
      })?;
      self.publish_updated(project);
    }

    self.get_members(id, reload).await?;
    Ok(self.get_by_id(id))
  }

  /// Members of a cached project. A 403 means the account may not list
  /// memberships: an empty list is cached as loaded and only `reload`
  /// asks again. `None` when the project is not cached.
  pub async fn get_members(&self, id: u64, reload: bool) -> Result<Option<Vec<NamedRef>>> {
    self.load_from_local_store()?;
    match lock(&self.state).get_by_id(id) {
      None => return Ok(None),
      Some(project) if project.members_loaded && !reload => {
        return Ok(Some(project.members.clone()))
      }
      Some(_) => {}
    }

    let members = match self.fetch_members(id).await {
      Ok(members) => members,
      Err(e) if e.is_forbidden() => {
        tracing::info!(project = id, "memberships not visible to this account");
        Vec::new()
      }
      Err(e) => return Err(e),
    };

    let project = self.update(id, |project| {
      project.members = members;
      project.members_loaded = true;
    })?;
    let members = project.as_ref().map(|p| p.members.clone());
    self.publish_updated(project);
    Ok(members)
  }

  async fn fetch_members(&self, id: u64) -> Result<Vec<NamedRef>> {
    let mut members = Vec::new();
    let mut offset = 0;
    loop {
      let page = self.client.memberships(id, offset).await?;
      let received = page.memberships.len() as u64;
      members.extend(
        page
          .memberships
          .into_iter()
          .filter_map(|membership| membership.user.or(membership.group)),
      );

      let limit = if page.page.limit > 0 { page.page.limit } else { received };
      if received == 0 || !page.page.has_more_after(page.page.offset, limit) {
        break;
      }
      offset = page.page.offset + limit;
    }
    Ok(members)
  }

  /// All issues of a cached project, newest first. `None` when the project
  /// is not cached.
  pub async fn get_issues(&self, id: u64, reload: bool) -> Result<Option<Vec<Issue>>> {
    self.load_from_local_store()?;
    match lock(&self.state).get_by_id(id) {
      None => return Ok(None),
      Some(project) if project.issues_loaded && !reload => {
        return Ok(Some(project.issues.clone()))
      }
      Some(_) => {}
    }

    let mut issues = Vec::new();
    let mut offset = 0;
    loop {
      let query = IssueQuery {
        project_id: Some(id),
        offset,
        limit: self.issue_page_size,
        ..IssueQuery::default()
      };
      let page = self.client.issues(&query).await?;
      let received = page.issues.len();
      issues.extend(page.issues.into_iter().map(Issue::from));

      if received == 0 || !page.page.has_more_after(offset, self.issue_page_size) {
        break;
      }
      offset += self.issue_page_size;
    }
    tracing::debug!(project = id, count = issues.len(), "project issues loaded");

    let project = self.update(id, |project| {
      project.issues = issues;
      project.issues_loaded = true;
    })?;
    let issues = project.as_ref().map(|p| p.issues.clone());
    self.publish_updated(project);
    Ok(issues)
  }

  pub fn get_by_id(&self, id: u64) -> Option<Project> {
    lock(&self.state).get_by_id(id).cloned()
  }

  pub fn get_by_identifier(&self, identifier: &str) -> Option<Project> {
    lock(&self.state)
      .items()
      .iter()
      .find(|project| project.identifier == identifier)
      .cloned()
  }

  /// Remember `id` as the selected project. Unknown projects are rejected.
  pub fn select_project(&self, id: u64) -> color_eyre::Result<()> {
    self.load_from_local_store()?;
    if self.get_by_id(id).is_none() {
      return Err(eyre!("Unknown project: {}", id));
    }
    self.profile.set_selected_project(Some(id))
  }

  pub fn store(&self) -> Result<()> {
    lock(&self.state).store(self.storage.as_ref())?;
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    lock(&self.state).clear(self.storage.as_ref())?;
    Ok(())
  }

  /// Apply `change` to a cached project and persist. `None` when the
  /// project left the cache in the meantime.
  fn update(&self, id: u64, change: impl FnOnce(&mut Project)) -> Result<Option<Project>> {
    let mut state = lock(&self.state);
    let project = state.get_by_id_mut(id).map(|project| {
      change(project);
      project.clone()
    });
    state.mark_loaded();
    state.store(self.storage.as_ref())?;
    Ok(project)
  }

  fn publish_updated(&self, project: Option<Project>) {
    if let Some(project) = project {
      self.bus.publish(Notification::ProjectUpdated {
        project: Box::new(project),
      });
    }
  }
}
