//! Integration tests for authentication and extraction against a mock
//! Cost Management endpoint.

use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use cost_manager::auth::CredentialManager;
use cost_manager::config::Settings;
use cost_manager::extract::{CostExtractor, CostQueryClient, DateRange, ExtractError};
use cost_manager::schema::ScopeDescriptor;

const SCOPE: &str = "subscriptions/abcd1234";
const QUERY_PATH: &str = "/subscriptions/abcd1234/providers/Microsoft.CostManagement/query";

fn test_settings(server: &MockServer) -> Settings {
    Settings::for_tests(
        &server.base_url(),
        &server.base_url(),
        vec![SCOPE.to_string()],
    )
}

async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/test-tenant/oauth2/token")
                .body_includes("grant_type=client_credentials")
                .body_includes("client_id=test-client");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "access_token": "tok-1",
                    "token_type": "Bearer",
                    "expires_in": 3599
                }));
        })
        .await
}

fn page_body(resource_ids: &[&str], next_link: Option<String>) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = resource_ids
        .iter()
        .map(|id| json!([150.0, 20260106, id]))
        .collect();
    let mut properties = json!({
        "columns": [
            { "name": "PreTaxCost", "type": "Number" },
            { "name": "UsageDate", "type": "Number" },
            { "name": "ResourceId", "type": "String" }
        ],
        "rows": rows
    });
    if let Some(link) = next_link {
        properties["nextLink"] = json!(link);
    }
    json!({ "properties": properties })
}

#[tokio::test]
async fn token_is_cached_across_requests() {
    let server = MockServer::start_async().await;
    let token_mock = mock_token(&server).await;
    let settings = test_settings(&server);

    let credentials =
        CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap();

    let first = credentials.authorization_header().await.unwrap();
    let second = credentials.authorization_header().await.unwrap();

    assert_eq!(first, "Bearer tok-1");
    assert_eq!(second, "Bearer tok-1");
    token_mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn expired_token_is_refreshed() {
    let server = MockServer::start_async().await;
    let token_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/test-tenant/oauth2/token");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "access_token": "tok-short",
                    "token_type": "Bearer",
                    "expires_in": 0
                }));
        })
        .await;
    let settings = test_settings(&server);

    let credentials =
        CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap();

    credentials.authorization_header().await.unwrap();
    credentials.authorization_header().await.unwrap();

    token_mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn expires_in_accepted_as_numeric_string() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/test-tenant/oauth2/token");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "access_token": "tok-v1",
                    "token_type": "Bearer",
                    "expires_in": "3599"
                }));
        })
        .await;
    let settings = test_settings(&server);

    let credentials =
        CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap();
    let header = credentials.authorization_header().await.unwrap();
    assert_eq!(header, "Bearer tok-v1");
}

#[tokio::test]
async fn pagination_collects_all_pages_in_order() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;

    let page1_ids: Vec<String> = (0..10).map(|i| format!("/vm/r{i}")).collect();
    let page2_ids: Vec<String> = (10..20).map(|i| format!("/vm/r{i}")).collect();
    let page3_ids: Vec<String> = (20..25).map(|i| format!("/vm/r{i}")).collect();

    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(QUERY_PATH)
                .query_param("api-version", "2025-03-01")
                .body_includes("\"granularity\":\"Daily\"");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(page_body(
                    &page1_ids.iter().map(String::as_str).collect::<Vec<_>>(),
                    Some(server.url("/page2")),
                ));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/page2");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(page_body(
                    &page2_ids.iter().map(String::as_str).collect::<Vec<_>>(),
                    Some(server.url("/page3")),
                ));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/page3");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(page_body(
                    &page3_ids.iter().map(String::as_str).collect::<Vec<_>>(),
                    None,
                ));
        })
        .await;

    let settings = test_settings(&server);
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();
    let extractor = CostExtractor::new(&settings, client);

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let extraction = extractor.extract_scope(&scope, &range).await.unwrap();

    assert_eq!(extraction.pages, 3);
    assert_eq!(extraction.records.len(), 25);
    let ids: Vec<&str> = extraction
        .records
        .iter()
        .map(|r| r.get("ResourceId").unwrap().as_text().unwrap())
        .collect();
    assert_eq!(ids[0], "/vm/r0");
    assert_eq!(ids[24], "/vm/r24");
    // Strictly the concatenation of the three pages.
    let expected: Vec<String> = (0..25).map(|i| format!("/vm/r{i}")).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    let query_mock = server
        .mock_async(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(400)
                .header("content-type", "application/json")
                .json_body(json!({ "error": { "code": "BadRequest" } }));
        })
        .await;

    let settings = test_settings(&server);
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let error = client.query(&scope, &range).await.unwrap_err();

    assert!(matches!(error, ExtractError::Http { status: 400, .. }));
    query_mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn server_errors_retry_until_exhausted() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    let query_mock = server
        .mock_async(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(503).body("upstream unavailable");
        })
        .await;

    let mut settings = test_settings(&server);
    settings.http.max_retries = 3;
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let error = client.query(&scope, &range).await.unwrap_err();

    assert!(matches!(error, ExtractError::RetriesExhausted(3)));
    query_mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn unauthorized_response_refreshes_token() {
    let server = MockServer::start_async().await;
    let token_mock = mock_token(&server).await;
    let query_mock = server
        .mock_async(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(401).body("token expired");
        })
        .await;

    let mut settings = test_settings(&server);
    settings.http.max_retries = 2;
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let error = client.query(&scope, &range).await.unwrap_err();

    assert!(matches!(error, ExtractError::RetriesExhausted(2)));
    query_mock.assert_hits_async(2).await;
    // One fetch per attempt: the 401 invalidates the cached token.
    token_mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn pagination_stops_at_the_time_budget() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(page_body(&["/vm/a"], Some(server.url("/slow-page"))));
        })
        .await;
    // The next page answers only after the budget has elapsed.
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow-page");
            then.status(200)
                .header("content-type", "application/json")
                .delay(Duration::from_millis(1500))
                .json_body(page_body(&["/vm/b"], None));
        })
        .await;

    let mut settings = test_settings(&server);
    settings.http.pagination_timeout_secs = 1;
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();
    let extractor = CostExtractor::new(&settings, client);

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let error = extractor.extract_scope(&scope, &range).await.unwrap_err();

    assert!(matches!(error, ExtractError::Timeout(_)));
}

#[tokio::test]
async fn rate_limited_requests_wait_for_retry_after() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    let query_mock = server
        .mock_async(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(429)
                .header("retry-after", "1")
                .body("throttled");
        })
        .await;

    let mut settings = test_settings(&server);
    settings.http.max_retries = 2;
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let started = std::time::Instant::now();
    let error = client.query(&scope, &range).await.unwrap_err();

    // The base delay is zero in test settings, so any wait between the
    // two attempts came from the Retry-After header.
    assert!(matches!(error, ExtractError::RetriesExhausted(2)));
    assert!(started.elapsed() >= Duration::from_secs(1));
    query_mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn rate_limited_request_succeeds_once_throttling_lifts() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;
    let mut limited = server
        .mock_async(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(429)
                .header("retry-after", "2")
                .body("throttled");
        })
        .await;

    let settings = test_settings(&server);
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();

    let scope = ScopeDescriptor::parse(SCOPE);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());

    // While the client waits out the Retry-After interval, the endpoint
    // recovers: the throttling mock is withdrawn and a healthy one takes
    // its place before the retry lands.
    let query = client.query(&scope, &range);
    let lift = async {
        while limited.hits_async().await < 1 {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        limited.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(QUERY_PATH);
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(page_body(&["/vm/a"], None));
            })
            .await;
    };
    let (response, _) = tokio::join!(query, lift);

    let response = response.unwrap();
    assert_eq!(response.properties.rows.len(), 1);
}

#[tokio::test]
async fn failing_scope_does_not_abort_others() {
    let server = MockServer::start_async().await;
    mock_token(&server).await;

    let scopes = vec![
        "subscriptions/aaaa1111".to_string(),
        "subscriptions/bbbb2222".to_string(),
        "subscriptions/cccc3333".to_string(),
    ];
    for sub in ["aaaa1111", "cccc3333"] {
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path(format!("/subscriptions/{sub}/providers/Microsoft.CostManagement/query"));
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(page_body(&["/vm/a"], None));
            })
            .await;
    }
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/subscriptions/bbbb2222/providers/Microsoft.CostManagement/query");
            then.status(403).body("authorization failed for scope");
        })
        .await;

    let settings = Settings::for_tests(&server.base_url(), &server.base_url(), scopes.clone());
    let credentials =
        Arc::new(CredentialManager::new(&settings.azure, Duration::from_secs(5)).unwrap());
    let client = CostQueryClient::new(&settings, credentials).unwrap();
    let extractor = CostExtractor::new(&settings, client);

    let parsed = ScopeDescriptor::parse_all(&scopes);
    let range = DateRange::single(chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    let (successes, failures) = extractor.extract(&parsed, &range).await;

    assert_eq!(successes.len(), 2);
    assert_eq!(successes[0].scope.name, "subscription-aaaa1111");
    assert_eq!(successes[1].scope.name, "subscription-cccc3333");

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].scope.name, "subscription-bbbb2222");
    assert!(matches!(
        failures[0].error,
        ExtractError::Http { status: 403, .. }
    ));
}
