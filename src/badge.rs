//! Unread counter / error indicator pushed to the external badge.

use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeState {
  Unread(usize),
  Error,
}

impl fmt::Display for BadgeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BadgeState::Unread(0) => Ok(()),
      BadgeState::Unread(n) if *n > 99 => f.write_str("99+"),
      BadgeState::Unread(n) => write!(f, "{}", n),
      BadgeState::Error => f.write_str("Err"),
    }
  }
}

/// Latest badge value. Renderers subscribe and redraw on change.
#[derive(Debug, Clone)]
pub struct Badge {
  sender: watch::Sender<BadgeState>,
}

impl Default for Badge {
  fn default() -> Self {
    let (sender, _rx) = watch::channel(BadgeState::Unread(0));
    Self { sender }
  }
}

impl Badge {
  pub fn set_unread(&self, count: usize) {
    self.sender.send_replace(BadgeState::Unread(count));
  }

  pub fn set_error(&self) {
    self.sender.send_replace(BadgeState::Error);
  }

  pub fn state(&self) -> BadgeState {
    *self.sender.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<BadgeState> {
    self.sender.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn text_is_clamped_at_99() {
    assert_eq!(BadgeState::Unread(0).to_string(), "");
    assert_eq!(BadgeState::Unread(7).to_string(), "7");
    assert_eq!(BadgeState::Unread(99).to_string(), "99");
    assert_eq!(BadgeState::Unread(100).to_string(), "99+");
    assert_eq!(BadgeState::Error.to_string(), "Err");
  }

  #[tokio::test]
  async fn subscribers_observe_changes() {
    let badge = Badge::default();
    let mut rx = badge.subscribe();

    badge.set_unread(4);
    rx.changed().await.expect("changed");
    assert_eq!(*rx.borrow(), BadgeState::Unread(4));

    badge.set_error();
    assert_eq!(badge.state(), BadgeState::Error);
  }
}
