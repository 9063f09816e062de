use serde::{Deserialize, Serialize};

/// `{id, name}` reference Redmine uses for every cross-entity link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
  pub id: u64,
  #[serde(default)]
  pub name: String,
}

/// Cached issue, including local read state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
  pub id: u64,
  #[serde(default)]
  pub project: NamedRef,
  #[serde(default)]
  pub tracker: Option<NamedRef>,
  #[serde(default)]
  pub status: NamedRef,
  #[serde(default)]
  pub priority: Option<NamedRef>,
  #[serde(default)]
  pub author: Option<NamedRef>,
  #[serde(default)]
  pub assigned_to: Option<NamedRef>,
  #[serde(default)]
  pub subject: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub done_ratio: Option<u32>,
  #[serde(default)]
  pub created_on: Option<String>,
  #[serde(default)]
  pub updated_on: Option<String>,
  /// Only present once details were fetched.
  #[serde(default)]
  pub journals: Vec<Journal>,
  #[serde(default)]
  pub changesets: Vec<Changeset>,
  #[serde(default)]
  pub read: bool,
  #[serde(default)]
  pub details_loaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
  pub id: u64,
  #[serde(default)]
  pub user: Option<NamedRef>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub created_on: Option<String>,
  #[serde(default)]
  pub details: Vec<JournalDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalDetail {
  #[serde(default)]
  pub property: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub old_value: Option<String>,
  #[serde(default)]
  pub new_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
  #[serde(default)]
  pub revision: String,
  #[serde(default)]
  pub user: Option<NamedRef>,
  #[serde(default)]
  pub comments: Option<String>,
  #[serde(default)]
  pub committed_on: Option<String>,
}

/// Cached project with its lazily loaded extensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: u64,
  #[serde(default)]
  pub identifier: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub parent: Option<NamedRef>,
  #[serde(default)]
  pub status: Option<u32>,
  #[serde(default)]
  pub created_on: Option<String>,
  #[serde(default)]
  pub updated_on: Option<String>,
  #[serde(default)]
  pub trackers: Vec<NamedRef>,
  #[serde(default)]
  pub issue_categories: Vec<NamedRef>,
  #[serde(default)]
  pub members: Vec<NamedRef>,
  #[serde(default)]
  pub members_loaded: bool,
  #[serde(default)]
  pub fully_loaded: bool,
  #[serde(default)]
  pub issues: Vec<Issue>,
  #[serde(default)]
  pub issues_loaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStatus {
  pub id: u64,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub is_closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  #[serde(default)]
  pub login: Option<String>,
  #[serde(default)]
  pub firstname: String,
  #[serde(default)]
  pub lastname: String,
  #[serde(default)]
  pub mail: Option<String>,
  #[serde(default)]
  pub created_on: Option<String>,
}

impl User {
  pub fn display_name(&self) -> String {
    format!("{} {}", self.firstname, self.lastname)
      .trim()
      .to_string()
  }
}

/// News entries are handed straight to the caller, never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
  pub id: u64,
  #[serde(default)]
  pub project: Option<NamedRef>,
  #[serde(default)]
  pub author: Option<NamedRef>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub summary: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub created_on: Option<String>,
}
