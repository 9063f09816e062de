//! Redmine REST client and the entity caches built on it.

pub mod api_types;
mod cache;
pub mod client;
pub mod issues;
pub mod news;
pub mod projects;
pub mod statuses;
pub mod types;
pub mod users;

pub use client::RedmineClient;
pub use issues::IssueCache;
pub use news::NewsFeed;
pub use projects::ProjectCache;
pub use statuses::StatusCache;
pub use users::UserCache;
