use goal_sync::{CoinGeckoPriceSource, GoalSyncError, PriceSource};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_usd_price_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "solana"))
        .and(query_param("vs_currencies", "usd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "solana": { "usd": 142.57 }
        })))
        .mount(&server)
        .await;

    let source = CoinGeckoPriceSource::new(format!("{}/", server.uri())).unwrap();
    assert_eq!(source.usd_price("solana").await.unwrap(), 142.57);
}

#[tokio::test]
async fn test_missing_asset_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let source = CoinGeckoPriceSource::new(server.uri()).unwrap();
    assert!(matches!(
        source.usd_price("solana").await,
        Err(GoalSyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_rate_limit_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let source = CoinGeckoPriceSource::new(server.uri()).unwrap();
    assert!(matches!(
        source.usd_price("solana").await,
        Err(GoalSyncError::HttpError(_))
    ));
}
