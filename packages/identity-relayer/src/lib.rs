//! # Identity Relayer
//!
//! Relays user-signed actions for a decentralized identity service. The
//! relayer pays gas from a pool of custodial wallets and never signs on a
//! user's behalf: every action carries the user's own EIP-712 signature.
//!
//! ## Quick Start
//! ```bash
//! cargo run --bin identity-relayer
//! ```
//!
//! ## Endpoints
//! - `GET /health` - Health check with wallet and RPC status
//! - `GET /metrics` - Prometheus metrics
//! - `POST /relay` - Relay a signed meta-transaction on the data chain
//! - `POST /wormhole_relay` - Start a cross-chain token transfer
//! - `GET /wormhole_relay/{id}` - Progress of a transfer
//! - `POST /tracks/{id}/listen` - Record a listen on the destination chain
//! - `GET /tracks/listen/solana/status` - Listen submission success ratio

pub mod action;
pub mod config;
pub mod discovery;
mod error;
mod handlers;
pub mod key_store;
pub mod listen;
pub mod lock;
pub mod metrics;
mod middleware;
pub mod rate_limit;
pub mod relay;
mod response;
mod router;
pub mod rpc;
mod state;
pub mod store;
#[cfg(test)]
mod testing;
pub mod wallet;
pub mod wormhole;

pub use config::Config;
pub use error::Error;
pub use router::create as create_router;
pub use state::AppState;
