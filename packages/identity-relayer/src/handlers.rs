//! HTTP request handlers.

use crate::error::Error;
use crate::listen::ListenRequest;
use crate::metrics::METRICS;
use crate::middleware::RequestId;
use crate::relay::{AuthHeaders, RelayRequest};
use crate::response::{HealthResponse, ListenResponse, RelayResponse, RpcHealth, WormholeResponse};
use crate::rpc::EvmChain;
use crate::state::AppState;
use crate::wormhole::{TransferState, WormholeRequest};
use axum::extract::{FromRequest, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

const MESSAGE_HEADER: &str = "encoded-data-message";
const SIGNATURE_HEADER: &str = "encoded-data-signature";

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending = match &state.wormhole {
        Some(wormhole) => wormhole.pending_count().await,
        None => 0,
    };
    let body = METRICS.render(state.relayer.wallets().len(), pending);
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

/// Health check with wallet, transfer and RPC status.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut rpc = Vec::with_capacity(state.rpc_clients.len());
    for client in &state.rpc_clients {
        let status = client.health_check().await.unwrap_or("unavailable");
        rpc.push(RpcHealth {
            chain_id: client.chain_id(),
            active_rpc: client.active_url().to_string(),
            failovers: client.failover_count(),
            status,
        });
    }

    let wallets = state.relayer.wallets().len();
    let status = if wallets == 0 || rpc.iter().any(|r| r.status == "unavailable") {
        "unavailable"
    } else if rpc.iter().any(|r| r.status == "degraded") {
        "degraded"
    } else {
        "ok"
    };

    let pending_transfers = match &state.wormhole {
        Some(wormhole) => wormhole.pending_count().await,
        None => 0,
    };

    Json(HealthResponse {
        status,
        uptime_secs: state.start_time.elapsed().as_secs(),
        requests: state.request_count.load(Ordering::Relaxed),
        wallets,
        eth_wallets: state.eth_wallets,
        pending_transfers,
        listen_enabled: state.listen.is_some(),
        rpc,
    })
}

fn request_id(request: &axum::extract::Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default()
}

fn auth_headers(headers: &HeaderMap) -> Option<AuthHeaders> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some(AuthHeaders {
        message: get(MESSAGE_HEADER)?,
        signature: get(SIGNATURE_HEADER)?,
    })
}

async fn json_body<T: serde::de::DeserializeOwned>(
    request: axum::extract::Request,
    state: &Arc<AppState>,
    req_id: &str,
) -> Result<T, Error> {
    match Json::<T>::from_request(request, state).await {
        Ok(Json(body)) => Ok(body),
        Err(e) => {
            warn!(req_id, error = %e, "Invalid JSON body");
            Err(Error::BadRequest(format!("Invalid JSON body: {e}")))
        }
    }
}

/// Relay a user-signed meta-transaction on the data chain.
pub async fn relay(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
) -> Result<Json<RelayResponse>, Error> {
    let start = std::time::Instant::now();
    METRICS.relay_total.fetch_add(1, Ordering::Relaxed);
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let req_id = request_id(&request);
    let auth = auth_headers(request.headers());
    let result = async {
        let body: RelayRequest = json_body(request, &state, &req_id).await?;
        info!(
            req_id = %req_id,
            contract = %body.contract_address,
            sender = %body.sender_address,
            registry_key = body.contract_registry_key.as_deref().unwrap_or(""),
            "Relaying meta-transaction"
        );
        state.relay.handle(&req_id, body, auth).await
    }
    .await;

    METRICS.record_relay_duration(start);
    match result {
        Ok(receipt) => {
            METRICS.relay_success.fetch_add(1, Ordering::Relaxed);
            Ok(Json(RelayResponse {
                success: true,
                receipt,
            }))
        }
        Err(e) => {
            METRICS.relay_error.fetch_add(1, Ordering::Relaxed);
            warn!(req_id = %req_id, error = %e, "Relay rejected");
            Err(e)
        }
    }
}

/// Run the first two phases of a wormhole transfer; the rest continues in
/// the background.
pub async fn wormhole_relay(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
) -> Result<Json<WormholeResponse>, Error> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let req_id = request_id(&request);
    let wormhole = state
        .wormhole
        .as_ref()
        .ok_or_else(|| Error::Config("wormhole transfers are not configured".into()))?;
    let body: WormholeRequest = json_body(request, &state, &req_id).await?;
    info!(req_id = %req_id, sender = %body.sender_address, "Wormhole transfer requested");

    let transfer = wormhole.start(body).await?;
    Ok(Json(WormholeResponse {
        success: true,
        id: transfer.id,
        transfer_tx_hash: transfer.transfer_tx_hash,
        phase: transfer.phase.as_str(),
    }))
}

pub async fn wormhole_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransferState>, Error> {
    let wormhole = state
        .wormhole
        .as_ref()
        .ok_or_else(|| Error::Config("wormhole transfers are not configured".into()))?;
    Ok(Json(wormhole.load(&id).await?))
}

/// Record a listen on the destination chain.
pub async fn track_listen(
    State(state): State<Arc<AppState>>,
    Path(track_id): Path<String>,
    request: axum::extract::Request,
) -> Result<Json<ListenResponse>, Error> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let req_id = request_id(&request);
    let listen = state
        .listen
        .as_ref()
        .ok_or_else(|| Error::Config("listen relaying is not configured".into()))?;
    let body: ListenRequest = json_body(request, &state, &req_id).await?;
    let signature = listen.submit(&req_id, &track_id, body).await?;
    Ok(Json(ListenResponse {
        success: true,
        sol_tx_signature: signature,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenStatusQuery {
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub cutoff_minutes: Option<i64>,
}

/// Listen success ratio. 400 when the recent ratio is below `percent`.
pub async fn listen_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListenStatusQuery>,
) -> Result<impl IntoResponse, Error> {
    let listen = state
        .listen
        .as_ref()
        .ok_or_else(|| Error::Config("listen relaying is not configured".into()))?;
    let threshold = query.percent.unwrap_or(0.9);
    let status = listen.status(query.cutoff_minutes.unwrap_or(60)).await?;
    let code = if status.recent_info.recent_success_percent < threshold {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((code, Json(status)))
}
