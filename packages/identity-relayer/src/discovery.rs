//! Read-only user lookups against the discovery service.

use crate::rate_limit::UserDirectory;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UsersResponse {
    #[serde(default)]
    data: Vec<UserRecord>,
}

#[derive(Deserialize)]
struct UserRecord {
    #[serde(default)]
    wallet: Option<String>,
}

impl DiscoveryClient {
    pub fn new(base_url: &str) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| crate::Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl UserDirectory for DiscoveryClient {
    async fn wallet_of(&self, user_id: U256) -> Result<Option<Address>, crate::Error> {
        let url = format!("{}/users", self.base_url);
        let resp: UsersResponse = self
            .http
            .get(&url)
            .query(&[("id", user_id.to_string())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| crate::Error::Rpc(format!("discovery lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| crate::Error::Rpc(format!("discovery response: {e}")))?;

        Ok(resp
            .data
            .into_iter()
            .next()
            .and_then(|u| u.wallet)
            .and_then(|w| Address::from_str(&w).ok()))
    }
}
