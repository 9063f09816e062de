//! Serde-deserializable types matching Redmine API responses.
//!
//! Kept apart from the cached domain types: responses never carry local
//! state (`read`, `fully_loaded`, ...) and optional includes must be told
//! apart from empty lists when merging.

use serde::Deserialize;

use super::types::{Changeset, Issue, IssueStatus, Journal, NamedRef, NewsItem, Project, User};

// ============================================================================
// List envelope
// ============================================================================

/// Paging fields every list endpoint returns next to its entity array.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageMeta {
  #[serde(default)]
  pub total_count: u64,
  #[serde(default)]
  pub offset: u64,
  #[serde(default)]
  pub limit: u64,
}

impl PageMeta {
  /// Whether the server reports records past `offset + limit`.
  pub fn has_more_after(&self, offset: u64, limit: u64) -> bool {
    self.total_count > offset + limit
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiIssueList {
  #[serde(default)]
  pub issues: Vec<ApiIssue>,
  #[serde(flatten)]
  pub page: PageMeta,
}

#[derive(Debug, Deserialize)]
pub struct ApiProjectList {
  #[serde(default)]
  pub projects: Vec<ApiProject>,
  #[serde(flatten)]
  pub page: PageMeta,
}

#[derive(Debug, Deserialize)]
pub struct ApiMembershipList {
  #[serde(default)]
  pub memberships: Vec<ApiMembership>,
  #[serde(flatten)]
  pub page: PageMeta,
}

#[derive(Debug, Deserialize)]
pub struct ApiUserList {
  #[serde(default)]
  pub users: Vec<User>,
  #[serde(flatten)]
  pub page: PageMeta,
}

#[derive(Debug, Deserialize)]
pub struct ApiNewsList {
  #[serde(default)]
  pub news: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
pub struct ApiIssueStatusList {
  #[serde(default)]
  pub issue_statuses: Vec<IssueStatus>,
}

// ============================================================================
// Single-resource envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiIssueEnvelope {
  pub issue: ApiIssue,
}

#[derive(Debug, Deserialize)]
pub struct ApiProjectEnvelope {
  pub project: ApiProject,
}

#[derive(Debug, Deserialize)]
pub struct ApiUserEnvelope {
  pub user: User,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiIssue {
  pub id: u64,
  #[serde(default)]
  pub project: NamedRef,
  pub tracker: Option<NamedRef>,
  #[serde(default)]
  pub status: NamedRef,
  pub priority: Option<NamedRef>,
  pub author: Option<NamedRef>,
  pub assigned_to: Option<NamedRef>,
  #[serde(default)]
  pub subject: String,
  pub description: Option<String>,
  pub done_ratio: Option<u32>,
  pub created_on: Option<String>,
  pub updated_on: Option<String>,
  // Only sent with include=journals,changesets
  pub journals: Option<Vec<Journal>>,
  pub changesets: Option<Vec<Changeset>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiProject {
  pub id: u64,
  #[serde(default)]
  pub identifier: String,
  #[serde(default)]
  pub name: String,
  pub description: Option<String>,
  pub parent: Option<NamedRef>,
  pub status: Option<u32>,
  pub created_on: Option<String>,
  pub updated_on: Option<String>,
  // Only sent with include=trackers,issue_categories
  pub trackers: Option<Vec<NamedRef>>,
  pub issue_categories: Option<Vec<NamedRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMembership {
  pub user: Option<NamedRef>,
  pub group: Option<NamedRef>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiIssue> for Issue {
  /// A freshly received issue starts unread with no details.
  fn from(api: ApiIssue) -> Self {
    Issue {
      id: api.id,
      project: api.project,
      tracker: api.tracker,
      status: api.status,
      priority: api.priority,
      author: api.author,
      assigned_to: api.assigned_to,
      subject: api.subject,
      description: api.description,
      done_ratio: api.done_ratio,
      created_on: api.created_on,
      updated_on: api.updated_on,
      journals: api.journals.unwrap_or_default(),
      changesets: api.changesets.unwrap_or_default(),
      read: false,
      details_loaded: false,
    }
  }
}

impl Issue {
  /// Overlay a detail response onto this record. `read` is left alone.
  pub fn absorb_details(&mut self, api: ApiIssue) {
    let read = self.read;
    *self = Issue::from(api);
    self.read = read;
    self.details_loaded = true;
  }
}

impl From<ApiProject> for Project {
  fn from(api: ApiProject) -> Self {
    let mut project = Project {
      id: api.id,
      ..Project::default()
    };
    project.absorb(api);
    project
  }
}

impl Project {
  /// Overlay remote fields. Includes that were not requested keep their
  /// cached values, and local extensions (members, issues, flags) survive.
  pub fn absorb(&mut self, api: ApiProject) {
    self.identifier = api.identifier;
    self.name = api.name;
    self.description = api.description;
    self.parent = api.parent;
    self.status = api.status;
    self.created_on = api.created_on;
    self.updated_on = api.updated_on;
    if let Some(trackers) = api.trackers {
      self.trackers = trackers;
    }
    if let Some(categories) = api.issue_categories {
      self.issue_categories = categories;
    }
  }
}
