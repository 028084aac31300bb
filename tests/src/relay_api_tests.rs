use crate::utils::*;
use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use identity_relayer::config::TierLimits;

#[tokio::test]
async fn test_relay_signed_action() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let body = relay_body(USER_KEY, "Create", 1);
    let (status, json) = send(&app.router, relay_request(&body, Some(USER_KEY))).await?;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["receipt"]["deduplicated"], false);
    assert!(json["receipt"]["transactionHash"].as_str().unwrap().starts_with("0x"));
    assert_eq!(app.data_chain.submission_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_request_id_is_echoed() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let request = Request::get("/health")
        .header("x-request-id", "trace-42")
        .body(Body::empty())?;
    let response = tower::ServiceExt::oneshot(app.router.clone(), request).await?;
    assert_eq!(response.headers()["x-request-id"], "trace-42");

    let response = tower::ServiceExt::oneshot(app.router.clone(), get("/health")).await?;
    let generated = response.headers()["x-request-id"].to_str()?;
    assert!(generated.starts_with("rel-"));
    Ok(())
}

#[tokio::test]
async fn test_missing_auth_headers_rejected() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let body = relay_body(USER_KEY, "Save", 1);
    let (status, json) = send(&app.router, relay_request(&body, None)).await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
    assert_eq!(app.data_chain.submission_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_subject_signed_by_someone_else_rejected() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let mut body = relay_body(OTHER_KEY, "Save", 1);
    body["senderAddress"] = sender_of(USER_KEY).into();
    let (status, _) = send(&app.router, relay_request(&body, Some(USER_KEY))).await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.data_chain.submission_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_requests_are_bad_requests() -> Result<()> {
    let app = TestAppBuilder::new().build()?;

    let (status, _) = send(
        &app.router,
        Request::post("/relay")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = relay_body(USER_KEY, "Save", 1);
    body["encodedABI"] = "0xdeadbeef".into();
    let (status, _) = send(&app.router, relay_request(&body, Some(USER_KEY))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.data_chain.submission_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_replayed_action_returns_original_hash() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let body = relay_body(USER_KEY, "Create", 9);

    let (_, first) = send(&app.router, relay_request(&body, Some(USER_KEY))).await?;
    let (status, second) = send(&app.router, relay_request(&body, Some(USER_KEY))).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["receipt"]["deduplicated"], true);
    assert_eq!(
        first["receipt"]["transactionHash"],
        second["receipt"]["transactionHash"]
    );
    assert_eq!(app.data_chain.submission_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_returns_429() -> Result<()> {
    let app = TestAppBuilder::new()
        .config(|c| {
            c.rate_limits.default = TierLimits {
                owner: 1,
                allowlist: 1,
                app: 1,
            }
        })
        .build()?;

    let (status, _) = send(
        &app.router,
        relay_request(&relay_body(USER_KEY, "Save", 1), Some(USER_KEY)),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &app.router,
        relay_request(&relay_body(USER_KEY, "Save", 2), Some(USER_KEY)),
    )
    .await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["tier"], "app");
    assert_eq!(json["limit"], 1);
    assert_eq!(app.data_chain.submission_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_contract_outside_allowlist_rejected() -> Result<()> {
    let app = TestAppBuilder::new()
        .config(|c| c.allowed_contracts = vec!["0x0000000000000000000000000000000000000001".into()])
        .build()?;
    let (status, _) = send(
        &app.router,
        relay_request(&relay_body(USER_KEY, "Save", 1), Some(USER_KEY)),
    )
    .await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.data_chain.submission_count(), 0);
    Ok(())
}
