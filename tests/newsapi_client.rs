//! News API client tests against a mock upstream.

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newsapi_mcp::config::NewsApiConfig;
use newsapi_mcp::newsapi::{
    Category, EverythingQuery, NewsApiClient, NewsApiError, NewsSource, SortBy, TopHeadlinesQuery,
};

fn client(server: &MockServer) -> NewsApiClient {
    let config = NewsApiConfig {
        base_url: server.uri(),
        ..NewsApiConfig::default()
    };
    NewsApiClient::new(&config, Some("test-key".to_string())).unwrap()
}

fn everything(q: &str) -> EverythingQuery {
    EverythingQuery {
        q: q.to_string(),
        sources: None,
        domains: None,
        exclude_domains: Some("example.com".to_string()),
        from: Some("2024-01-01".to_string()),
        to: None,
        language: Some("en".to_string()),
        sort_by: Some(SortBy::PublishedAt),
        page_size: 100,
        page: 1,
    }
}

#[tokio::test]
async fn everything_sends_key_and_camel_case_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .and(header("X-Api-Key", "test-key"))
        .and(query_param("q", "rust"))
        .and(query_param("excludeDomains", "example.com"))
        .and(query_param("from", "2024-01-01"))
        .and(query_param("sortBy", "publishedAt"))
        .and(query_param("pageSize", "100"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "totalResults": 1,
            "articles": [{
                "source": {"id": null, "name": "Example News"},
                "author": null,
                "title": "Rust 2024 released",
                "description": "A new edition.",
                "url": "https://example.com/rust",
                "urlToImage": null,
                "publishedAt": "2024-02-20T10:00:00Z",
                "content": null
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).everything(&everything("rust")).await.unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(
        response.articles[0].title.as_deref(),
        Some("Rust 2024 released")
    );
    assert_eq!(
        response.articles[0].source.name.as_deref(),
        Some("Example News")
    );
}

#[tokio::test]
async fn top_headlines_omits_unset_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .and(query_param("country", "us"))
        .and(query_param("category", "technology"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "totalResults": 0,
            "articles": []
        })))
        .mount(&server)
        .await;

    let query = TopHeadlinesQuery {
        q: None,
        sources: None,
        category: Some(Category::Technology),
        language: None,
        country: Some("us".to_string()),
        page_size: 20,
        page: 2,
    };
    let response = client(&server).top_headlines(&query).await.unwrap();
    assert!(response.articles.is_empty());

    let requests = server.received_requests().await.unwrap();
    let query_string = requests[0].url.query().unwrap_or_default().to_string();
    assert!(!query_string.contains("q="));
    assert!(!query_string.contains("sources="));
    assert!(query_string.contains("pageSize=20"));
    assert!(query_string.contains("page=2"));
}

#[tokio::test]
async fn error_document_becomes_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "error",
            "code": "apiKeyInvalid",
            "message": "Your API key is invalid or incorrect."
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .everything(&everything("rust"))
        .await
        .unwrap_err();
    match err {
        NewsApiError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 401);
            assert_eq!(code, "apiKeyInvalid");
            assert_eq!(message, "Your API key is invalid or incorrect.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_body_is_unexpected_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .everything(&everything("rust"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NewsApiError::UnexpectedResponse { status: 502, .. }
    ));
    assert!(!err.to_string().contains("test-key"));
}
