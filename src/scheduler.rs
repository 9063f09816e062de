//! Periodic issue sync with randomized exponential backoff.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::cache::SyncReport;
use crate::config::PollConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Idle,
  Syncing,
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  /// First run after startup.
  Install,
  /// The armed timer fired.
  Timer,
  /// Explicit refresh. The armed timer keeps its deadline.
  Manual,
}

impl Trigger {
  /// Whether the cycle re-arms the timer when it ends.
  pub fn schedule_request(self) -> bool {
    !matches!(self, Trigger::Manual)
  }
}

/// Delay before the next cycle:
/// `min(max(jitter * 2^failures, 1) * min_interval, max_interval)` where
/// `jitter` is drawn from `[0, 2)`.
pub fn backoff_delay(failures: u32, jitter: f64, min: Duration, max: Duration) -> Duration {
  let factor = (jitter * 2f64.powi(failures.min(32) as i32)).max(1.0);
  let secs = (min.as_secs_f64() * factor).min(max.as_secs_f64());
  Duration::from_secs_f64(secs)
}

type Jitter = Box<dyn FnMut() -> f64 + Send + Sync>;

/// Drives [`IssueCache::sync_from_remote`](crate::redmine::IssueCache::sync_from_remote)
/// on a timer. One cycle runs at a time; manual triggers arrive through a
/// channel.
pub struct PollScheduler {
  engine: Engine,
  min_interval: Duration,
  max_interval: Duration,
  failures: u32,
  state: SchedulerState,
  jitter: Jitter,
}

impl PollScheduler {
  pub fn new(engine: Engine, poll: &PollConfig) -> Self {
    Self {
      engine,
      min_interval: poll.min_interval(),
      max_interval: poll.max_interval(),
      failures: 0,
      state: SchedulerState::Idle,
      jitter: Box::new(|| rand::random_range(0.0..2.0)),
    }
  }

  /// Replace the random source, for deterministic delays.
  pub fn with_jitter(mut self, jitter: impl FnMut() -> f64 + Send + Sync + 'static) -> Self {
    self.jitter = Box::new(jitter);
    self
  }

  pub fn state(&self) -> SchedulerState {
    self.state
  }

  pub fn failures(&self) -> u32 {
    self.failures
  }

  pub fn next_delay(&mut self) -> Duration {
    let jitter = (self.jitter)();
    backoff_delay(self.failures, jitter, self.min_interval, self.max_interval)
  }

  /// Run one cycle and update the failure counter. Connectivity, API and
  /// parse failures count towards the backoff; a missing configuration
  /// does not.
  pub async fn run_cycle(&mut self, trigger: Trigger) -> Result<SyncReport> {
    self.state = SchedulerState::Syncing;
    tracing::debug!(?trigger, "sync cycle started");
    let outcome = self.sync_once().await;
    self.state = SchedulerState::Idle;

    match &outcome {
      Ok(report) => {
        self.failures = 0;
        // A previous failure may have left the badge showing an error.
        self.engine.badge.set_unread(self.engine.issues.unread_count());
        tracing::info!(
          ?trigger,
          pages = report.pages,
          updated = report.updated,
          skipped = report.skipped,
          "sync cycle finished"
        );
      }
      Err(e) if e.counts_as_failure() => {
        self.failures = self.failures.saturating_add(1);
        tracing::warn!(?trigger, failures = self.failures, error = %e, "sync cycle failed");
      }
      Err(e) => tracing::warn!(?trigger, error = %e, "sync cycle skipped"),
    }
    outcome
  }

  async fn sync_once(&self) -> Result<SyncReport> {
    let profile = self.engine.profile.get()?;
    if profile.host.is_empty() {
      self.engine.badge.set_error();
      return Err(Error::NotConfigured("Redmine host is empty".into()));
    }

    if !profile.has_current_user() {
      let user = self.engine.client.current_user().await?;
      let name = user.display_name();
      tracing::info!(id = user.id, name = %name, "resolved current user");
      self.engine.profile.set_current_user(user.id, name)?;
    }

    let issues = &self.engine.issues;
    issues.sync_from_remote(0, issues.page_size()).await
  }

  fn arm(&mut self) -> Instant {
    let delay = self.next_delay();
    tracing::debug!(delay_secs = delay.as_secs(), "next sync armed");
    Instant::now() + delay
  }

  /// Run the install cycle, then cycle whenever the timer fires or a
  /// trigger arrives. Returns once every trigger sender is dropped.
  pub async fn run(mut self, mut triggers: mpsc::Receiver<Trigger>) {
    // Errors are logged by run_cycle.
    let _ = self.run_cycle(Trigger::Install).await;
    let mut deadline = self.arm();

    loop {
      let trigger = tokio::select! {
        _ = sleep_until(deadline) => Trigger::Timer,
        received = triggers.recv() => match received {
          Some(trigger) => trigger,
          None => break,
        },
      };

      let _ = self.run_cycle(trigger).await;
      if trigger.schedule_request() {
        deadline = self.arm();
      }
    }
    tracing::debug!("poll scheduler stopped");
  }
}
