use crate::error::Result;

use super::client::RedmineClient;
use super::types::NewsItem;

/// Latest news across visible projects. Nothing is cached.
#[derive(Clone)]
pub struct NewsFeed {
  client: RedmineClient,
}

impl NewsFeed {
  pub fn new(client: RedmineClient) -> Self {
    Self { client }
  }

  pub async fn load(&self) -> Result<Vec<NewsItem>> {
    let news = self.client.news().await?;
    tracing::debug!(count = news.len(), "news loaded");
    Ok(news)
  }
}

#[cfg(test)]
mod tests {
  use crate::test_support::Harness;

  #[tokio::test]
  async fn news_is_fetched_every_time() {
    let mut h = Harness::new().await;
    let mock = h
      .server
      .mock("GET", "/news.json")
      .with_status(200)
      .with_body(
        r#"{"news":[{"id":4,"title":"Release 2.0","project":{"id":1,"name":"Core"},
          "author":{"id":5,"name":"Ann"},"created_on":"2024-05-01T10:00:00Z"}],
          "total_count":1,"offset":0,"limit":25}"#,
      )
      .expect(2)
      .create_async()
      .await;

    let news = h.engine.news.load().await.expect("news");
    assert_eq!(news[0].title, "Release 2.0");
    assert_eq!(news[0].author.as_ref().map(|a| a.name.as_str()), Some("Ann"));

    h.engine.news.load().await.expect("again");
    mock.assert_async().await;
  }
}
