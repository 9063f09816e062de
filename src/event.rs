use serde::Serialize;
use tokio::sync::broadcast;

use crate::redmine::types::{Issue, IssueStatus, Project};

pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Change notifications broadcast to whatever UI is listening.
///
/// These are refresh hints, not the record of truth: listeners re-read the
/// relevant cache instead of trusting the payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Notification {
  ProjectsLoaded { count: usize },
  ProjectUpdated { project: Box<Project> },
  IssuesUpdated { updated: usize, unread: usize },
  IssueDetails { id: u64, issue: Box<Issue> },
  IssueStatusesUpdated { statuses: Vec<IssueStatus> },
  /// A request got no response at all.
  XhrError { url: String, message: String },
}

impl Notification {
  /// The `action` tag as it appears on the wire.
  pub fn action(&self) -> &'static str {
    match self {
      Notification::ProjectsLoaded { .. } => "projectsLoaded",
      Notification::ProjectUpdated { .. } => "projectUpdated",
      Notification::IssuesUpdated { .. } => "issuesUpdated",
      Notification::IssueDetails { .. } => "issueDetails",
      Notification::IssueStatusesUpdated { .. } => "issueStatusesUpdated",
      Notification::XhrError { .. } => "xhrError",
    }
  }
}

/// Fire-and-forget broadcast of [`Notification`]s.
///
/// Nothing is queued for absent listeners and slow listeners lose the oldest
/// events.
#[derive(Debug, Clone)]
pub struct NotificationBus {
  sender: broadcast::Sender<Notification>,
}

impl Default for NotificationBus {
  fn default() -> Self {
    Self::new(DEFAULT_BUS_CAPACITY)
  }
}

impl NotificationBus {
  pub fn new(capacity: usize) -> Self {
    let (sender, _rx) = broadcast::channel(capacity.max(1));
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.sender.subscribe()
  }

  pub fn publish(&self, notification: Notification) {
    let action = notification.action();
    match self.sender.send(notification) {
      Ok(listeners) => tracing::debug!(action, listeners, "notification sent"),
      Err(_) => tracing::trace!(action, "notification dropped, nobody listening"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn publish_without_listeners_is_harmless() {
    let bus = NotificationBus::default();
    bus.publish(Notification::ProjectsLoaded { count: 3 });
  }

  #[tokio::test]
  async fn every_subscriber_sees_the_event() {
    let bus = NotificationBus::default();
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.publish(Notification::IssuesUpdated {
      updated: 2,
      unread: 5,
    });

    for rx in [&mut first, &mut second] {
      match rx.recv().await.expect("event") {
        Notification::IssuesUpdated { updated, unread } => {
          assert_eq!((updated, unread), (2, 5));
        }
        other => panic!("unexpected {:?}", other),
      }
    }
  }

  #[test]
  fn serializes_with_action_tag() {
    let json = serde_json::to_value(Notification::XhrError {
      url: "http://redmine/issues.json".into(),
      message: "refused".into(),
    })
    .expect("serialize");

    assert_eq!(json["action"], "xhrError");
    assert_eq!(json["url"], "http://redmine/issues.json");
  }
}
