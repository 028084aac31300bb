use crate::utils::*;
use anyhow::Result;
use axum::http::StatusCode;

#[tokio::test]
async fn test_health_reports_wallets_and_features() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let (status, json) = send(&app.router, get("/health")).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["wallets"], 2);
    assert_eq!(json["pending_transfers"], 0);
    assert_eq!(json["listen_enabled"], true);
    Ok(())
}

#[tokio::test]
async fn test_metrics_exposition() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let response = tower::ServiceExt::oneshot(app.router.clone(), get("/metrics")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()?
        .starts_with("text/plain"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let text = String::from_utf8(body.to_vec())?;
    assert!(text.contains("relayer_relay_total"));
    assert!(text.contains("relayer_wallets 2"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_404() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let (status, _) = send(&app.router, get("/execute")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
