//! Market client tests against a mock HTTP server

#![allow(clippy::unwrap_used)] // Tests can unwrap

use market_client::{MarketClient, MarketClientError};
use market_core::{AvailabilityError, AvailabilitySource};
use std::time::Duration;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> MarketClient {
    MarketClient::new(format!("{}/api/farmers-market/buy", server.uri())).unwrap()
}

#[tokio::test]
async fn returns_quantity_sold() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("ingredient", "tomato"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"quantitySold": 3})))
        .expect(1)
        .mount(&server)
        .await;

    let sold = client_for(&server).await.buy("tomato").await.unwrap();
    assert_eq!(sold, 3);
}

#[tokio::test]
async fn missing_or_null_quantity_is_zero() {
    let server = MockServer::start().await;
    Mock::given(query_param("ingredient", "onion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;
    Mock::given(query_param("ingredient", "rice"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"quantitySold": null})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_eq!(client.buy("onion").await.unwrap(), 0);
    assert_eq!(client.buy("rice").await.unwrap(), 0);
}

#[tokio::test]
async fn ingredient_names_are_url_encoded() {
    let server = MockServer::start().await;
    Mock::given(query_param("ingredient", "sweet potato & co"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"quantitySold": 1})))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client_for(&server).await.buy("sweet potato & co").await.unwrap(), 1);
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.buy("lemon").await.unwrap_err();
    assert!(
        matches!(&err, MarketClientError::Status { status: 503, body } if body == "maintenance"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn unparsable_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    Mock::given(query_param("ingredient", "negative"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"quantitySold": -2})),
        )
        .with_priority(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert!(matches!(
        client.buy("cheese").await,
        Err(MarketClientError::ResponseParseFailed(_))
    ));
    assert!(matches!(
        client.buy("negative").await,
        Err(MarketClientError::ResponseParseFailed(_))
    ));
}

#[tokio::test]
async fn slow_market_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"quantitySold": 1}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = MarketClient::with_timeout(server.uri(), Duration::from_millis(100)).unwrap();
    assert!(matches!(
        client.buy("meat").await,
        Err(MarketClientError::RequestFailed(_))
    ));
}

#[tokio::test]
async fn acts_as_availability_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source: &dyn AvailabilitySource = &client_for(&server).await;
    let err = source.acquire("egg").await.unwrap_err();
    assert_eq!(
        err,
        AvailabilityError::Status {
            status: 500,
            body: String::new()
        }
    );
}

#[tokio::test]
async fn unreachable_market_is_a_request_failure() {
    let client = MarketClient::new("http://127.0.0.1:9/buy").unwrap();
    let err: AvailabilityError = client.buy("salt").await.unwrap_err().into();
    assert!(matches!(err, AvailabilityError::RequestFailed(_)));
}
