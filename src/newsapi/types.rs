//! Request and response documents for the News API v2.
//!
//! Query structs deserialise from a tool's validated input (camelCase keys,
//! defaults already applied) and serialise as the upstream query string.

use serde::{Deserialize, Serialize};

/// Sort order for `/everything`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    /// Articles more closely related to `q` come first.
    Relevancy,
    /// Articles from popular sources and publishers come first.
    Popularity,
    /// Newest articles come first.
    PublishedAt,
}

impl SortBy {
    /// Every accepted wire value.
    pub const ALL: [&'static str; 3] = ["relevancy", "popularity", "publishedAt"];
}

/// Headline category for `/top-headlines`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Business news.
    Business,
    /// Entertainment news.
    Entertainment,
    /// General news.
    General,
    /// Health news.
    Health,
    /// Science news.
    Science,
    /// Sports news.
    Sports,
    /// Technology news.
    Technology,
}

impl Category {
    /// Every accepted wire value.
    pub const ALL: [&'static str; 7] = [
        "business",
        "entertainment",
        "general",
        "health",
        "science",
        "sports",
        "technology",
    ];
}

/// Parameters for `GET /everything`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EverythingQuery {
    /// Keywords or phrases to search for.
    pub q: String,
    /// Comma-separated source identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,
    /// Comma-separated domains to restrict the search to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<String>,
    /// Comma-separated domains to exclude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_domains: Option<String>,
    /// Oldest article date or date-time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Newest article date or date-time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// ISO 639-1 language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Result ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
    /// Results per page.
    pub page_size: u32,
    /// Page number, starting at 1.
    pub page: u64,
}

/// Parameters for `GET /top-headlines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopHeadlinesQuery {
    /// Keywords or phrases to search for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Comma-separated source identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,
    /// Headline category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// ISO 639-1 language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// ISO 3166-1 country code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Results per page.
    pub page_size: u32,
    /// Page number, starting at 1.
    pub page: u64,
}

/// The source an article was published by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleSource {
    /// Source identifier, if the provider knows one.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
}

/// A single article.
///
/// The provider leaves fields out or sends `null` for removed and partially
/// indexed articles, so everything here is optional and missing values
/// decode as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Article {
    /// Publishing source.
    pub source: ArticleSource,
    /// Byline.
    pub author: Option<String>,
    /// Headline.
    pub title: Option<String>,
    /// Short summary.
    pub description: Option<String>,
    /// Link to the full article.
    pub url: Option<String>,
    /// Link to the lead image.
    pub url_to_image: Option<String>,
    /// Publication time in UTC, as sent by the provider.
    pub published_at: Option<String>,
    /// Truncated body text.
    pub content: Option<String>,
}

/// Successful response of both endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesResponse {
    /// Always `ok` for a successful response.
    pub status: String,
    /// Total number of matching articles across all pages.
    pub total_results: u64,
    /// Articles on the requested page.
    pub articles: Vec<Article>,
}

/// Error document returned with a non-`ok` status.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
