use reqwest::header::ACCEPT;
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::badge::Badge;
use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::event::{Notification, NotificationBus};
use crate::profile::{Profile, ProfileStore};
use crate::redmine::api_types::{
  ApiIssue, ApiIssueEnvelope, ApiIssueList, ApiIssueStatusList, ApiMembershipList, ApiNewsList,
  ApiProject, ApiProjectEnvelope, ApiProjectList, ApiUserEnvelope, ApiUserList,
};
use crate::redmine::types::{IssueStatus, NewsItem, User};

pub const API_KEY_HEADER: &str = "X-Redmine-API-Key";

/// Filters for `issues.json`. Results are always sorted newest first.
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
  pub assigned_to_id: Option<u64>,
  pub project_id: Option<u64>,
  pub offset: u64,
  pub limit: u64,
}

impl IssueQuery {
  fn params(&self) -> Vec<(&'static str, String)> {
    let mut params = vec![("sort", "updated_on:desc".to_string())];
    if let Some(user) = self.assigned_to_id {
      params.push(("assigned_to_id", user.to_string()));
    }
    if let Some(project) = self.project_id {
      params.push(("project_id", project.to_string()));
    }
    params.push(("limit", self.limit.to_string()));
    params.push(("offset", self.offset.to_string()));
    params
  }
}

/// Redmine REST client.
///
/// Credentials are read from the profile on every request, so settings
/// changes apply to the next call. A request that gets no response at all
/// publishes `xhrError` and flips the badge to its error state; retrying is
/// left to the poll scheduler.
#[derive(Clone)]
pub struct RedmineClient {
  http: HttpClient,
  profile: ProfileStore,
  bus: NotificationBus,
  badge: Badge,
}

impl RedmineClient {
  pub fn new(
    config: &HttpConfig,
    profile: ProfileStore,
    bus: NotificationBus,
    badge: Badge,
  ) -> color_eyre::Result<Self> {
    let http = HttpClient::builder()
      .timeout(config.timeout())
      .connect_timeout(config.connect_timeout())
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      profile,
      bus,
      badge,
    })
  }

  /// GET `path` relative to the profile host and decode the JSON body.
  pub async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
  where
    T: DeserializeOwned,
  {
    let profile = self.profile.get()?;
    let url = build_url(&profile, path, query)?;

    let mut request = self
      .http
      .get(url.clone())
      .header(API_KEY_HEADER, &profile.api_key)
      .header(ACCEPT, "application/json");
    if profile.use_http_auth {
      request = request.basic_auth(&profile.http_user, Some(&profile.http_pass));
    }

    tracing::debug!(url = %url, "GET");
    let response = match request.send().await {
      Ok(response) => response,
      Err(e) => return Err(self.connectivity_failure(&url, e)),
    };

    let status = response.status();
    if status != StatusCode::OK {
      let body = response.text().await.unwrap_or_default();
      tracing::warn!(url = %url, status = status.as_u16(), "Redmine request failed");
      return Err(Error::Api {
        status: status.as_u16(),
        body,
      });
    }

    let body = match response.text().await {
      Ok(body) => body,
      Err(e) => return Err(self.connectivity_failure(&url, e)),
    };
    serde_json::from_str(&body).map_err(|e| {
      tracing::warn!(url = %url, error = %e, "unexpected response body");
      Error::Parse(format!("{}: {}", path, e))
    })
  }

  fn connectivity_failure(&self, url: &Url, err: reqwest::Error) -> Error {
    tracing::warn!(url = %url, error = %err, "no response from Redmine");
    self.bus.publish(Notification::XhrError {
      url: url.to_string(),
      message: err.to_string(),
    });
    self.badge.set_error();
    Error::Connectivity(err.to_string())
  }

  pub async fn projects(&self, offset: u64) -> Result<ApiProjectList> {
    self
      .get("projects.json", &[("offset", offset.to_string())])
      .await
  }

  pub async fn project(&self, id: u64) -> Result<ApiProject> {
    let envelope: ApiProjectEnvelope = self
      .get(
        &format!("projects/{}.json", id),
        &[("include", "trackers,issue_categories".to_string())],
      )
      .await?;
    Ok(envelope.project)
  }

  pub async fn memberships(&self, project_id: u64, offset: u64) -> Result<ApiMembershipList> {
    self
      .get(
        &format!("projects/{}/memberships.json", project_id),
        &[("offset", offset.to_string())],
      )
      .await
  }

  pub async fn issues(&self, query: &IssueQuery) -> Result<ApiIssueList> {
    self.get("issues.json", &query.params()).await
  }

  pub async fn issue(&self, id: u64) -> Result<ApiIssue> {
    let envelope: ApiIssueEnvelope = self
      .get(
        &format!("issues/{}.json", id),
        &[("include", "journals,changesets".to_string())],
      )
      .await?;
    Ok(envelope.issue)
  }

  pub async fn issue_statuses(&self) -> Result<Vec<IssueStatus>> {
    let list: ApiIssueStatusList = self.get("issue_statuses.json", &[]).await?;
    Ok(list.issue_statuses)
  }

  pub async fn current_user(&self) -> Result<User> {
    let envelope: ApiUserEnvelope = self.get("users/current.json", &[]).await?;
    Ok(envelope.user)
  }

  pub async fn users(&self, offset: u64) -> Result<ApiUserList> {
    self
      .get("users.json", &[("offset", offset.to_string())])
      .await
  }

  pub async fn news(&self) -> Result<Vec<NewsItem>> {
    let list: ApiNewsList = self.get("news.json", &[]).await?;
    Ok(list.news)
  }
}

fn build_url(profile: &Profile, path: &str, query: &[(&str, String)]) -> Result<Url> {
  if profile.host.is_empty() {
    return Err(Error::NotConfigured("Redmine host is empty".into()));
  }
  let base = Url::parse(&profile.host)
    .map_err(|e| Error::NotConfigured(format!("invalid host '{}': {}", profile.host, e)))?;
  let mut url = base
    .join(path.trim_start_matches('/'))
    .map_err(|e| Error::NotConfigured(format!("invalid path '{}': {}", path, e)))?;
  if !query.is_empty() {
    url
      .query_pairs_mut()
      .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
  }
  Ok(url)
}
