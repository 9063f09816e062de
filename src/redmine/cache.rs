//! Caching implementations for Redmine types.

use crate::cache::Cacheable;

use super::types::{Issue, IssueStatus, Project, User};

impl Cacheable for Issue {
  fn cache_id(&self) -> u64 {
    self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_on.as_deref()
  }
}

impl Cacheable for Project {
  fn cache_id(&self) -> u64 {
    self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_on.as_deref()
  }
}

impl Cacheable for IssueStatus {
  fn cache_id(&self) -> u64 {
    self.id
  }

  fn updated_at(&self) -> Option<&str> {
    // Statuses don't have an updated_on field
    None
  }
}

impl Cacheable for User {
  fn cache_id(&self) -> u64 {
    self.id
  }

  fn updated_at(&self) -> Option<&str> {
    None
  }
}
