//! HTTP client tests against a local mock server
//!
//! Run with: cargo test --test http_client_test

mod fixtures;

use fixtures::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plus_scraper::models::work_item::WorkItem;
use plus_scraper::services::cookies::CookieJar;
use plus_scraper::services::discovery::{parse_sitemap, DiscoveryError, IndexSource, SitemapClient};
use plus_scraper::services::fetcher::{FetchError, ProductSource};
use plus_scraper::services::identity::{HttpProxyProvider, IdentityError, ProxyProvider};
use plus_scraper::services::plus_api::PlusApiClient;

const API_PATH: &str = "/screenservices/ProductDetails/DataActionGetProductDetailsAndAgeInfo";

async fn api_client(server: &MockServer, dir: &TempDir) -> PlusApiClient {
    let jar = CookieJar::load(Some("SSLB=1; plus_cookie_level=3"), dir.path().join("cookies.json")).await;
    PlusApiClient::new(
        format!("{}{}", server.uri(), API_PATH),
        "https://www.plus.nl",
        Some("test-token".to_string()),
        Duration::from_secs(5),
        jar,
    )
    .expect("Failed to build API client")
}

fn item(product: &ProductFixture) -> WorkItem {
    WorkItem::new(product.sku, product.locator())
}

#[tokio::test]
async fn test_product_fetch_sends_session_and_keeps_new_cookies() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let product = &PRODUCTS[0];

    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(header("x-csrftoken", "test-token"))
        .and(body_partial_json(json!({
            "screenData": { "variables": { "SKU": product.sku, "ProductName": format!("{}-{}", product.slug, product.sku) } }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "session=abc123; Path=/; HttpOnly")
                .set_body_json(product_payload(product.sku, product.name, product.price)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = api_client(&server, &dir).await;
    let payload = client.fetch(&item(product), None).await.expect("Fetch failed");
    assert_eq!(payload["data"]["SKU"], product.sku);

    // The session cookie is persisted and sent on the next request
    let saved: BTreeMap<String, String> =
        serde_json::from_slice(&std::fs::read(dir.path().join("cookies.json")).unwrap()).unwrap();
    assert_eq!(saved.get("session").map(String::as_str), Some("abc123"));

    client.fetch(&item(product), None).await.expect("Second fetch failed");

    let requests = server.received_requests().await.unwrap();
    let cookies: Vec<&str> = requests
        .iter()
        .map(|r| r.headers.get("cookie").unwrap().to_str().unwrap())
        .collect();
    assert_eq!(cookies[0], "SSLB=1; plus_cookie_level=3");
    assert_eq!(cookies[1], "SSLB=1; plus_cookie_level=3; session=abc123");
}

#[tokio::test]
async fn test_response_without_data_is_missing_data() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(error_payload()))
        .mount(&server)
        .await;

    let client = api_client(&server, &dir).await;
    let result = client.fetch(&item(&PRODUCTS[1]), None).await;

    assert!(matches!(result, Err(FetchError::MissingData(ref sku)) if sku == PRODUCTS[1].sku));
}

#[tokio::test]
async fn test_null_data_is_missing_data() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
        .mount(&server)
        .await;

    let client = api_client(&server, &dir).await;
    let result = client.fetch(&item(&PRODUCTS[1]), None).await;

    assert!(matches!(result, Err(FetchError::MissingData(_))));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = api_client(&server, &dir).await;
    let result = client.fetch(&item(&PRODUCTS[2]), None).await;

    assert!(matches!(result, Err(FetchError::Status(404))));
    // No cookies are written for failed requests
    assert!(!dir.path().join("cookies.json").exists());
}

#[tokio::test]
async fn test_invalid_json_is_decode_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = api_client(&server, &dir).await;
    let result = client.fetch(&item(&PRODUCTS[3]), None).await;

    assert!(matches!(result, Err(FetchError::Decode(_))));
}

#[tokio::test]
async fn test_sitemap_is_fetched_and_parsed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sitemap/product"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sitemap_xml(PRODUCTS)))
        .mount(&server)
        .await;

    let client = SitemapClient::new(format!("{}/sitemap/product", server.uri()), Duration::from_secs(5)).unwrap();
    let document = client.fetch_index().await.expect("Sitemap fetch failed");
    let items = parse_sitemap(&document);

    let identifiers: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["553975", "100231", "214408", "887120"]);
    assert_eq!(items[0].last_modified.as_deref(), Some("2025-04-24T01:00:15+00:00"));
}

#[tokio::test]
async fn test_sitemap_forbidden_is_denied() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = SitemapClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let result = client.fetch_index().await;

    assert!(matches!(result, Err(DiscoveryError::Denied(403))));
    assert!(!result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_sitemap_server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = SitemapClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let err = client.fetch_index().await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Status(502)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_proxy_candidates_that_fail_probing_are_dropped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/proxies.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# free list\n127.0.0.1:1\n127.0.0.1:1\n"))
        .mount(&server)
        .await;

    let provider = HttpProxyProvider::new(
        Vec::new(),
        Some(format!("{}/proxies.txt", server.uri())),
        server.uri(),
        Duration::from_secs(5),
    )
    .unwrap();

    let candidates = provider.candidates().await.expect("Proxy list fetch failed");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_proxy_source_error_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = HttpProxyProvider::new(
        Vec::new(),
        Some(format!("{}/proxies.txt", server.uri())),
        server.uri(),
        Duration::from_secs(5),
    )
    .unwrap();

    assert!(matches!(provider.candidates().await, Err(IdentityError::Status(500))));
}
