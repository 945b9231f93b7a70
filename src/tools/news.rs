//! News API tools.
//!
//! - `search_articles` searches every indexed article (`/everything`)
//! - `get_top_headlines` fetches current headlines (`/top-headlines`)
//!
//! Both handlers forward the validated input to a [`NewsSource`] and return
//! the provider's response document unchanged.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{InputSchema, ParamSpec, ToolHandler, ToolRegistry, ValidatedInput};
use crate::error::{HandlerError, RegistryError};
use crate::newsapi::{Category, EverythingQuery, NewsSource, SortBy, TopHeadlinesQuery};

/// Name of the `/everything` tool.
pub const SEARCH_ARTICLES: &str = "search_articles";

/// Name of the `/top-headlines` tool.
pub const GET_TOP_HEADLINES: &str = "get_top_headlines";

/// Largest page the provider will return.
const MAX_PAGE_SIZE: f64 = 100.0;
/// Largest page number a JSON client can send exactly.
const MAX_PAGE: f64 = 9_007_199_254_740_991.0;

static TWO_LETTER_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}$").expect("valid regex literal"));

static DATE_OR_DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?)?$")
        .expect("valid regex literal")
});

const Q_DESC: &str = "Keywords or phrases to search for in the article title and body.";
const SOURCES_DESC: &str = "A comma-separated string of identifiers for the news sources or blogs you want headlines from.";
const LANGUAGE_DESC: &str = "The 2-letter ISO 639-1 code of the language you want to get headlines for. Possible options: ar, de, en, es, fr, he, it, nl, no, pt, ru, sv, ud, zh. Default: all languages returned.";
const PAGE_SIZE_DESC: &str =
    "The number of results to return per page (request). 100 is the default and the maximum.";
const PAGE_DESC: &str =
    "Use this to page through the results if the total results found is greater than the pageSize.";

fn page_size_param() -> ParamSpec {
    ParamSpec::integer(PAGE_SIZE_DESC)
        .minimum(1.0)
        .maximum(MAX_PAGE_SIZE)
        .default_value(100)
}

fn page_param() -> ParamSpec {
    ParamSpec::integer(PAGE_DESC)
        .minimum(1.0)
        .maximum(MAX_PAGE)
        .default_value(1)
}

/// Input schema of `search_articles`.
#[must_use]
pub fn search_articles_schema() -> InputSchema {
    InputSchema::new()
        .param("q", ParamSpec::string(Q_DESC).required().min_length(1))
        .param("sources", ParamSpec::string(SOURCES_DESC))
        .param(
            "domains",
            ParamSpec::string(
                "A comma-separated string of domains (e.g. bbc.co.uk, techcrunch.com) to search within.",
            ),
        )
        .param(
            "excludeDomains",
            ParamSpec::string(
                "A comma-separated string of domains (e.g. bbc.co.uk, techcrunch.com) to exclude from the search.",
            ),
        )
        .param(
            "from",
            ParamSpec::string(
                "A date and optional time for the oldest article allowed. Format: YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS (e.g. 2024-01-01 or 2024-01-01T10:00:00).",
            )
            .pattern(DATE_OR_DATE_TIME.clone()),
        )
        .param(
            "to",
            ParamSpec::string(
                "A date and optional time for the newest article allowed. Format: YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS.",
            )
            .pattern(DATE_OR_DATE_TIME.clone()),
        )
        .param(
            "language",
            ParamSpec::string(LANGUAGE_DESC).pattern(TWO_LETTER_CODE.clone()),
        )
        .param(
            "sortBy",
            ParamSpec::string(
                "The order to sort the articles in. Possible options: relevancy, popularity, publishedAt. Default: relevancy.",
            )
            .one_of(SortBy::ALL),
        )
        .param("pageSize", page_size_param())
        .param("page", page_param())
}

/// Input schema of `get_top_headlines`.
#[must_use]
pub fn top_headlines_schema() -> InputSchema {
    InputSchema::new()
        .param("q", ParamSpec::string(Q_DESC))
        .param("sources", ParamSpec::string(SOURCES_DESC))
        .param(
            "category",
            ParamSpec::string(
                "The category you want to get headlines for. Possible options: business, entertainment, general, health, science, sports, technology.",
            )
            .one_of(Category::ALL),
        )
        .param(
            "language",
            ParamSpec::string(LANGUAGE_DESC).pattern(TWO_LETTER_CODE.clone()),
        )
        .param(
            "country",
            ParamSpec::string(
                "The 2-letter ISO 3166-1 country code of the country you want to get headlines for. Default: all countries returned.",
            )
            .pattern(TWO_LETTER_CODE.clone()),
        )
        .param("pageSize", page_size_param())
        .param("page", page_param())
}

fn to_query<Q: DeserializeOwned>(input: ValidatedInput) -> Result<Q, HandlerError> {
    serde_json::from_value(Value::Object(input))
        .map_err(|e| HandlerError::Other(format!("invalid query: {e}")))
}

fn to_value<T: serde::Serialize>(response: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(response)
        .map_err(|e| HandlerError::Other(format!("failed to serialise response: {e}")))
}

/// Handler for `search_articles`.
struct SearchArticles {
    source: Arc<dyn NewsSource>,
}

#[async_trait]
impl ToolHandler for SearchArticles {
    async fn call(&self, input: ValidatedInput) -> Result<Value, HandlerError> {
        let query: EverythingQuery = to_query(input)?;
        tracing::debug!(q = %query.q, page = query.page, "Searching articles");

        let response = self
            .source
            .everything(&query)
            .await
            .map_err(|source| HandlerError::Provider {
                endpoint: "Everything",
                source,
            })?;
        to_value(&response)
    }
}

/// Handler for `get_top_headlines`.
struct TopHeadlines {
    source: Arc<dyn NewsSource>,
}

#[async_trait]
impl ToolHandler for TopHeadlines {
    async fn call(&self, input: ValidatedInput) -> Result<Value, HandlerError> {
        let query: TopHeadlinesQuery = to_query(input)?;
        tracing::debug!(
            category = ?query.category,
            country = ?query.country,
            page = query.page,
            "Fetching top headlines"
        );

        let response = self
            .source
            .top_headlines(&query)
            .await
            .map_err(|source| HandlerError::Provider {
                endpoint: "Top Headlines",
                source,
            })?;
        to_value(&response)
    }
}

/// Registers both News API tools against `source`.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateTool`] if either name is already taken.
pub fn register_news_tools(
    registry: &mut ToolRegistry,
    source: Arc<dyn NewsSource>,
) -> Result<(), RegistryError> {
    registry.register(
        SEARCH_ARTICLES,
        r#"Searches for news articles using the News API "Everything" endpoint."#,
        search_articles_schema(),
        SearchArticles {
            source: Arc::clone(&source),
        },
    )?;
    registry.register(
        GET_TOP_HEADLINES,
        r#"Fetches top news headlines using the News API "Top Headlines" endpoint."#,
        top_headlines_schema(),
        TopHeadlines { source },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::error::ValidationError;
    use crate::newsapi::{ArticlesResponse, NewsApiError, NewsApiResult};
    use crate::tools::{dispatch, ToolCallParams};

    #[derive(Default)]
    struct FakeSource {
        everything: Mutex<Vec<EverythingQuery>>,
        headlines: Mutex<Vec<TopHeadlinesQuery>>,
        fail: bool,
    }

    fn empty_response() -> ArticlesResponse {
        ArticlesResponse {
            status: "ok".to_string(),
            total_results: 0,
            articles: Vec::new(),
        }
    }

    #[async_trait]
    impl NewsSource for FakeSource {
        async fn everything(&self, query: &EverythingQuery) -> NewsApiResult<ArticlesResponse> {
            self.everything.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(NewsApiError::Api {
                    status: 429,
                    code: "rateLimited".to_string(),
                    message: "Too many requests".to_string(),
                });
            }
            Ok(empty_response())
        }

        async fn top_headlines(
            &self,
            query: &TopHeadlinesQuery,
        ) -> NewsApiResult<ArticlesResponse> {
            self.headlines.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(NewsApiError::MissingApiKey {
                    env_var: "NEWSAPI_KEY".to_string(),
                });
            }
            Ok(empty_response())
        }
    }

    fn setup(fail: bool) -> (ToolRegistry, Arc<FakeSource>) {
        let source = Arc::new(FakeSource {
            fail,
            ..FakeSource::default()
        });
        let mut registry = ToolRegistry::new();
        register_news_tools(&mut registry, source.clone()).unwrap();
        (registry, source)
    }

    fn call(name: &str, arguments: Value) -> ToolCallParams {
        serde_json::from_value(json!({"name": name, "arguments": arguments})).unwrap()
    }

    #[test]
    fn registers_both_tools_in_order() {
        let (registry, _) = setup(false);
        let names: Vec<&str> = registry.iter().map(crate::tools::Tool::name).collect();
        assert_eq!(names, [SEARCH_ARTICLES, GET_TOP_HEADLINES]);
    }

    #[test]
    fn registering_twice_is_fatal() {
        let (mut registry, source) = setup(false);
        let err = register_news_tools(&mut registry, source).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool(SEARCH_ARTICLES.to_string()));
    }

    #[tokio::test]
    async fn search_defaults_are_forwarded() {
        let (registry, source) = setup(false);
        let result = dispatch(&registry, call(SEARCH_ARTICLES, json!({"q": "bitcoin"})))
            .await
            .unwrap();
        assert!(!result.is_error);

        let queries = source.everything.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].q, "bitcoin");
        assert_eq!(queries[0].page_size, 100);
        assert_eq!(queries[0].page, 1);
        assert_eq!(queries[0].sort_by, None);
    }

    #[tokio::test]
    async fn search_without_q_never_reaches_provider() {
        let (registry, source) = setup(false);
        let err = dispatch(&registry, call(SEARCH_ARTICLES, json!({"pageSize": 10})))
            .await
            .unwrap_err();
        let ValidationError::InvalidArguments { issues, .. } = err else {
            panic!("expected InvalidArguments");
        };
        assert_eq!(issues[0].field, "q");
        assert!(source.everything.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_size_above_maximum_is_rejected() {
        let (registry, source) = setup(false);
        let err = dispatch(
            &registry,
            call(SEARCH_ARTICLES, json!({"q": "rust", "pageSize": 101})),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("pageSize"));
        assert!(source.everything.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_codes_and_dates_are_rejected() {
        let (registry, _) = setup(false);
        let err = dispatch(
            &registry,
            call(
                SEARCH_ARTICLES,
                json!({"q": "rust", "language": "english", "from": "yesterday", "sortBy": "newest"}),
            ),
        )
        .await
        .unwrap_err();
        let ValidationError::InvalidArguments { issues, .. } = err else {
            panic!("expected InvalidArguments");
        };
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, ["from", "language", "sortBy"]);
    }

    #[tokio::test]
    async fn headlines_accept_empty_arguments() {
        let (registry, source) = setup(false);
        let result = dispatch(&registry, call(GET_TOP_HEADLINES, json!({})))
            .await
            .unwrap();
        assert!(!result.is_error);

        let text: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
        assert_eq!(text, json!({"status": "ok", "totalResults": 0, "articles": []}));

        let queries = source.headlines.lock().unwrap();
        assert_eq!(queries[0].page_size, 100);
        assert_eq!(queries[0].category, None);
    }

    #[tokio::test]
    async fn headlines_forward_category_and_country() {
        let (registry, source) = setup(false);
        dispatch(
            &registry,
            call(
                GET_TOP_HEADLINES,
                json!({"category": "science", "country": "gb", "page": 2}),
            ),
        )
        .await
        .unwrap();

        let queries = source.headlines.lock().unwrap();
        assert_eq!(queries[0].category, Some(Category::Science));
        assert_eq!(queries[0].country.as_deref(), Some("gb"));
        assert_eq!(queries[0].page, 2);
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let (registry, _) = setup(false);
        let err = dispatch(&registry, call(GET_TOP_HEADLINES, json!({"category": "weather"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("category"));
    }

    #[tokio::test]
    async fn provider_failures_are_prefixed() {
        let (registry, _) = setup(true);

        let result = dispatch(&registry, call(SEARCH_ARTICLES, json!({"q": "rust"})))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("News API Everything tool failed: Too many requests (rateLimited)")
        );

        let result = dispatch(&registry, call(GET_TOP_HEADLINES, json!({})))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("News API Top Headlines tool failed: NEWSAPI_KEY environment variable is not set.")
        );
    }

    #[test]
    fn date_pattern_accepts_documented_formats() {
        for ok in ["2024-01-01", "2024-01-01T10:00", "2024-01-01T10:00:00", "2024-01-01T10:00:00Z"] {
            assert!(DATE_OR_DATE_TIME.is_match(ok), "{ok}");
        }
        for bad in ["2024/01/01", "01-01-2024", "2024-01-01 10:00"] {
            assert!(!DATE_OR_DATE_TIME.is_match(bad), "{bad}");
        }
    }
}
