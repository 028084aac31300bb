use crate::utils::*;
use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn transfer_body(amount: u8) -> Value {
    json!({
        "senderAddress": sender_of(USER_KEY),
        "permit": {
            "contractAddress": "0x1111111111111111111111111111111111111111",
            "encodedABI": format!("0xd505accf{}", hex::encode([amount; 32])),
        },
        "transferTokens": {
            "contractAddress": "0x2222222222222222222222222222222222222222",
            "encodedABI": format!("0x0f5287b0{}", hex::encode([amount; 32])),
        }
    })
}

#[tokio::test]
async fn test_transfer_runs_to_completion() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let (status, json) = send(&app.router, post_json("/wormhole_relay", &transfer_body(1))).await?;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["phase"], "attest_and_redeem");
    assert!(json["transferTxHash"].is_string());
    assert_eq!(app.eth_chain.submission_count(), 2);
    assert_eq!(app.data_chain.submission_count(), 0);

    let id = json["id"].as_str().unwrap().to_string();
    let wormhole = app.state.wormhole.clone().unwrap();
    assert_eq!(wormhole.pending_count().await, 1);

    let cancel = CancellationToken::new();
    let worker = wormhole.spawn_worker(cancel.clone());
    assert!(worker.is_some());

    let router = app.router.clone();
    let uri = format!("/wormhole_relay/{id}");
    let done = eventually(Duration::from_secs(5), || {
        let router = router.clone();
        let uri = uri.clone();
        async move {
            let (_, record) = send(&router, get(&uri)).await.unwrap();
            record["phase"] == "complete"
        }
    })
    .await;
    assert!(done);

    let (_, record) = send(&app.router, get(&uri)).await?;
    assert!(record["completeTransferSignature"]
        .as_str()
        .unwrap()
        .starts_with("redeemed-"));
    assert!(!record["logs"].as_array().unwrap().is_empty());
    assert_eq!(wormhole.pending_count().await, 0);
    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn test_duplicate_in_flight_transfer_conflicts() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let body = transfer_body(2);
    let (status, _) = send(&app.router, post_json("/wormhole_relay", &body)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app.router, post_json("/wormhole_relay", &body)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(app.eth_chain.submission_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_transfer_is_not_found() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let (status, _) = send(&app.router, get("/wormhole_relay/feedface")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_malformed_transfer_rejected() -> Result<()> {
    let app = TestAppBuilder::new().build()?;
    let mut body = transfer_body(3);
    body["senderAddress"] = "not-an-address".into();
    let (status, _) = send(&app.router, post_json("/wormhole_relay", &body)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.eth_chain.submission_count(), 0);
    Ok(())
}
