//! News API data provider.
//!
//! Tool handlers only talk to the provider through the [`NewsSource`] trait;
//! [`NewsApiClient`] is the production implementation backed by `reqwest`.
//! The crate does not interpret the provider's results (ranking,
//! categorisation); it forwards validated queries and returns the documents
//! unchanged.

mod client;
pub mod error;
pub mod types;

pub use client::NewsApiClient;
pub use error::{NewsApiError, NewsApiResult};
pub use types::{
    Article, ArticleSource, ArticlesResponse, Category, EverythingQuery, SortBy,
    TopHeadlinesQuery,
};

use async_trait::async_trait;

/// A source of news articles.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Searches every indexed article (`/everything`).
    async fn everything(&self, query: &EverythingQuery) -> NewsApiResult<ArticlesResponse>;

    /// Fetches current top headlines (`/top-headlines`).
    async fn top_headlines(&self, query: &TopHeadlinesQuery) -> NewsApiResult<ArticlesResponse>;
}
