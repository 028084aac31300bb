use crate::utils::*;
use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_listen_is_submitted_and_counted() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let (status, json) = send(
        &app.router,
        post_json(
            "/tracks/42/listen",
            &json!({ "userId": 7, "location": { "city": "Lisbon", "country": "PT" } }),
        ),
    )
    .await?;

    assert_eq!(status, StatusCode::OK, "{json}");
    let sent = app.listen_chain.as_ref().unwrap().sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(json["solTxSignature"], sent[0].signatures[0].to_string());
    let keys = sent[0].message.static_account_keys();
    assert!(keys.iter().any(|k| k.to_string() == LISTEN_PROGRAM_ID));

    let (status, json) = send(&app.router, get("/tracks/listen/solana/status")).await?;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["totalSubmissionCount"], 1);
    assert_eq!(json["totalSuccessCount"], 1);
    assert_eq!(json["recentInfo"]["recentSubmissionCount"], 1);
    Ok(())
}

#[tokio::test]
async fn test_status_threshold_above_ratio_fails() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    // An empty window counts as fully successful.
    let (status, json) = send(
        &app.router,
        get("/tracks/listen/solana/status?percent=0.5&cutoffMinutes=30"),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["recentInfo"]["recentSuccessPercent"], 1.0);

    let (status, _) = send(
        &app.router,
        get("/tracks/listen/solana/status?percent=1.5"),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_listen_without_signer_is_unavailable() -> Result<()> {
    let app = TestAppBuilder::new().without_listen().build()?;
    let (status, json) = send(
        &app.router,
        post_json("/tracks/1/listen", &json!({ "userId": "abc" })),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    Ok(())
}

#[tokio::test]
async fn test_listen_requires_user_id() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let (status, _) = send(&app.router, post_json("/tracks/1/listen", &json!({}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.listen_chain.as_ref().unwrap().sent.lock().unwrap().is_empty());
    Ok(())
}
