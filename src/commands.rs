//! Command-line front end over the engine.

use clap::{Args, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::Engine;
use crate::event::Notification;
use crate::profile::Profile;
use crate::redmine::types::Issue;
use crate::scheduler::{PollScheduler, Trigger};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Poll Redmine until interrupted; press Enter to refresh now
  #[command(visible_alias = "w")]
  Watch,
  /// Run one sync cycle and exit
  #[command(visible_alias = "s")]
  Sync,
  /// Show or change the connection profile
  Profile(ProfileArgs),
  /// List cached issues assigned to you
  #[command(visible_alias = "i")]
  Issues {
    /// Only unread issues
    #[arg(short, long)]
    unread: bool,
    /// Load journals and changesets of one issue
    #[arg(long, value_name = "ID")]
    details: Option<u64>,
  },
  /// Mark an issue as read
  Read { id: u64 },
  /// Mark an issue as unread
  Unread { id: u64 },
  /// Mark every cached issue as read
  ReadAll,
  /// List projects, or show one with its members and issues
  #[command(visible_alias = "p")]
  Projects {
    /// Fetch the project list again
    #[arg(long)]
    sync: bool,
    /// Show one project (id or identifier)
    #[arg(long, value_name = "PROJECT")]
    show: Option<String>,
    /// Remember a project as selected
    #[arg(long, value_name = "ID")]
    select: Option<u64>,
  },
  /// List Redmine users (needs admin rights on most servers)
  #[command(visible_alias = "u")]
  Users {
    /// Fetch the user list again
    #[arg(long)]
    sync: bool,
  },
  /// Print the latest news
  News,
  /// Forget cached projects, or with --all every cache and the profile
  Clear {
    #[arg(long)]
    all: bool,
  },
}

#[derive(Args, Debug, Default)]
pub struct ProfileArgs {
  /// Redmine base URL
  #[arg(long)]
  host: Option<String>,
  /// API key (falls back to REDMINE_SYNC_API_KEY / REDMINE_API_KEY)
  #[arg(long)]
  api_key: Option<String>,
  /// HTTP basic auth user; enables basic auth
  #[arg(long)]
  http_user: Option<String>,
  #[arg(long)]
  http_pass: Option<String>,
  /// Stop sending basic auth credentials
  #[arg(long, conflicts_with = "http_user")]
  no_http_auth: bool,
}

impl ProfileArgs {
  fn is_empty(&self) -> bool {
    self.host.is_none()
      && self.api_key.is_none()
      && self.http_user.is_none()
      && self.http_pass.is_none()
      && !self.no_http_auth
  }

  fn apply(self, mut profile: Profile) -> Profile {
    if let Some(host) = self.host {
      profile.host = host;
    }
    if let Some(key) = self.api_key.or_else(Config::api_key_from_env) {
      profile.api_key = key;
    }
    if let Some(user) = self.http_user {
      profile.http_user = user;
      profile.use_http_auth = true;
    }
    if let Some(pass) = self.http_pass {
      profile.http_pass = pass;
    }
    if self.no_http_auth {
      profile.use_http_auth = false;
    }
    profile
  }
}

pub async fn run(command: Command, engine: &Engine, config: &Config) -> Result<()> {
  match command {
    Command::Watch => watch(engine, config).await,
    Command::Sync => {
      engine.load_from_local_store()?;
      let mut scheduler = PollScheduler::new(engine.clone(), &config.poll);
      let report = scheduler.run_cycle(Trigger::Manual).await?;
      println!(
        "{} page(s), {} issue(s) updated, {} unread",
        report.pages,
        report.updated,
        engine.issues.unread_count()
      );
      Ok(())
    }
    Command::Profile(args) => profile(engine, args),
    Command::Issues { unread, details } => issues(engine, unread, details).await,
    Command::Read { id } => set_read(engine, id, true),
    Command::Unread { id } => set_read(engine, id, false),
    Command::ReadAll => {
      engine.issues.mark_all_read()?;
      println!("badge: '{}'", engine.badge.state());
      Ok(())
    }
    Command::Projects { sync, show, select } => projects(engine, sync, show, select).await,
    Command::Users { sync } => {
      let users = engine.users.load(sync).await?;
      if users.is_empty() {
        println!("No users visible to this account");
      }
      for user in users {
        let login = user.login.as_deref().unwrap_or("");
        println!("#{:<5} {:<16} {}", user.id, login, user.display_name());
      }
      Ok(())
    }
    Command::News => {
      for item in engine.news.load().await? {
        let project = item.project.map(|p| p.name).unwrap_or_default();
        let date = item.created_on.as_deref().unwrap_or("");
        println!("{:<20} {:<16} {}", date, project, item.title);
        if let Some(summary) = item.summary.filter(|s| !s.is_empty()) {
          println!("{:<37} {}", "", summary);
        }
      }
      Ok(())
    }
    Command::Clear { all } => {
      if all {
        engine.clear_all()?;
        println!("All local data removed");
      } else {
        engine.clear_items()?;
        println!("Project cache cleared");
      }
      Ok(())
    }
  }
}

async fn watch(engine: &Engine, config: &Config) -> Result<()> {
  if engine.profile.get()?.host.is_empty() {
    return Err(eyre!(
      "No Redmine host configured. Run `redmine-sync profile --host <url> --api-key <key>` first."
    ));
  }
  engine.load_from_local_store()?;
  // Lookup tables refresh in the background when never fetched.
  engine.statuses.all(false)?;
  engine.users.all(false)?;

  let (triggers, receiver) = mpsc::channel(8);
  let stdin_triggers = triggers.clone();
  tokio::spawn(async move {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(_)) = lines.next_line().await {
      if stdin_triggers.send(Trigger::Manual).await.is_err() {
        break;
      }
    }
  });

  let mut events = engine.bus.subscribe();
  tokio::spawn(async move {
    loop {
      match events.recv().await {
        Ok(Notification::IssuesUpdated { updated, unread }) if updated > 0 => {
          println!("{} issue(s) changed, {} unread", updated, unread)
        }
        Ok(Notification::XhrError { url, message }) => {
          eprintln!("Redmine unreachable ({}): {}", url, message)
        }
        Ok(_) => {}
        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::debug!(skipped, "watch output lagging")
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      }
    }
  });

  let scheduler = PollScheduler::new(engine.clone(), &config.poll);
  println!("Watching {} (Ctrl-C to stop)", engine.profile.get()?.host);
  tokio::select! {
    _ = scheduler.run(receiver) => {}
    result = tokio::signal::ctrl_c() => {
      result.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
      tracing::info!("interrupted");
    }
  }
  drop(triggers);
  engine.store_all()?;
  Ok(())
}

fn profile(engine: &Engine, args: ProfileArgs) -> Result<()> {
  let current = engine.profile.get()?;
  let profile = if args.is_empty() {
    current
  } else {
    engine.profile.set(args.apply(current))?
  };

  println!("host:          {}", profile.host);
  println!("api key:       {}", mask(&profile.api_key));
  if profile.use_http_auth {
    println!("http auth:     {}", profile.http_user);
  }
  match (profile.current_user_id, profile.current_user_name.as_deref()) {
    (Some(id), Some(name)) => println!("current user:  {} (#{})", name, id),
    _ => println!("current user:  (resolved on next sync)"),
  }
  if let Some(id) = profile.selected_project_id {
    println!("project:       #{}", id);
  }
  Ok(())
}

fn mask(secret: &str) -> String {
  let chars: Vec<char> = secret.chars().collect();
  match chars.len() {
    0 => "(none)".to_string(),
    n if n <= 4 => "*".repeat(n),
    n => format!("{}{}", "*".repeat(n - 4), chars[n - 4..].iter().collect::<String>()),
  }
}

async fn issues(engine: &Engine, unread_only: bool, details: Option<u64>) -> Result<()> {
  engine.issues.load_from_local_store()?;

  if let Some(id) = details {
    let issue = engine
      .issues
      .get_details(id, false)
      .await?
      .ok_or_else(|| eyre!("Issue #{} is not cached", id))?;
    print_issue(&issue);
    if let Some(description) = issue.description.as_deref().filter(|d| !d.is_empty()) {
      println!("\n{}\n", description);
    }
    for journal in &issue.journals {
      let who = journal.user.as_ref().map(|u| u.name.as_str()).unwrap_or("?");
      let when = journal.created_on.as_deref().unwrap_or("");
      if let Some(notes) = journal.notes.as_deref().filter(|n| !n.is_empty()) {
        println!("  {} {}: {}", when, who, notes);
      }
    }
    for changeset in &issue.changesets {
      println!(
        "  r{} {}",
        changeset.revision,
        changeset.comments.as_deref().unwrap_or("")
      );
    }
    return Ok(());
  }

  let mut listed = 0;
  for issue in engine.issues.cached() {
    if unread_only && issue.read {
      continue;
    }
    print_issue(&issue);
    listed += 1;
  }
  if listed == 0 {
    println!("No cached issues. Run `redmine-sync sync` first.");
  }
  Ok(())
}

fn print_issue(issue: &Issue) {
  let marker = if issue.read { ' ' } else { '*' };
  println!(
    "{} #{:<6} {:<12} {:<16} {}",
    marker, issue.id, issue.status.name, issue.project.name, issue.subject
  );
}

fn set_read(engine: &Engine, id: u64, read: bool) -> Result<()> {
  let found = if read {
    engine.issues.mark_read(id)?
  } else {
    engine.issues.mark_unread(id)?
  };
  if !found {
    return Err(eyre!("Issue #{} is not cached", id));
  }
  println!("badge: '{}'", engine.badge.state());
  Ok(())
}

async fn projects(
  engine: &Engine,
  sync: bool,
  show: Option<String>,
  select: Option<u64>,
) -> Result<()> {
  let projects = &engine.projects;
  projects.load_from_local_store()?;
  if sync || projects.cached().is_empty() {
    projects.sync_from_remote().await?;
  }

  if let Some(id) = select {
    projects.select_project(id)?;
    println!("Selected project #{}", id);
  }

  let Some(wanted) = show else {
    let selected = engine.profile.get()?.selected_project_id;
    for project in projects.cached() {
      let marker = if Some(project.id) == selected { '>' } else { ' ' };
      println!("{} #{:<5} {:<20} {}", marker, project.id, project.identifier, project.name);
    }
    return Ok(());
  };

  let id = match wanted.parse::<u64>() {
    Ok(id) => id,
    Err(_) => projects
      .get_by_identifier(&wanted)
      .map(|p| p.id)
      .ok_or_else(|| eyre!("Unknown project: {}", wanted))?,
  };
  let project = projects
    .get(id, false)
    .await?
    .ok_or_else(|| eyre!("Unknown project: {}", wanted))?;
  let issues = projects.get_issues(id, false).await?.unwrap_or_default();

  println!("{} ({})", project.name, project.identifier);
  if let Some(description) = project.description.as_deref().filter(|d| !d.is_empty()) {
    println!("{}", description);
  }
  let names = |refs: &[crate::redmine::types::NamedRef]| {
    refs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(", ")
  };
  println!("trackers:   {}", names(&project.trackers));
  println!("categories: {}", names(&project.issue_categories));
  println!("members:    {}", names(&project.members));
  println!("issues:     {}", issues.len());
  for issue in issues.iter().take(20) {
    println!(
      "  #{:<6} {:<12} {}",
      issue.id, issue.status.name, issue.subject
    );
  }
  Ok(())
}
