use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::U256;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use crate::data::cache::MarketCache;
use crate::data::types::MarketInfo;

/// Resolves an outcome token to the market it belongs to.
#[async_trait]
pub trait MarketLookup: Send + Sync {
    async fn resolve(&self, token_id: U256) -> Result<MarketInfo>;
}

pub struct GammaApiClient {
    client: Client,
    base_url: String,
    cache: MarketCache,
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    #[serde(rename = "conditionId")]
    condition_id: String,
    /// JSON-encoded array, e.g. `"[\"Yes\", \"No\"]"`.
    #[serde(default)]
    outcomes: Option<String>,
    /// JSON-encoded array of decimal token ids, parallel to `outcomes`.
    #[serde(rename = "clobTokenIds", default)]
    clob_token_ids: Option<String>,
}

impl GammaApiClient {
    pub fn new(base_url: String, cache_ttl: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url,
            cache: MarketCache::new(cache_ttl),
        }
    }

    async fn fetch_market(&self, token_id: &str) -> Result<MarketInfo> {
        let url = format!("{}/markets", self.base_url);

        let markets: Vec<GammaMarket> = self.client
            .get(&url)
            .query(&[("clob_token_ids", token_id)])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to fetch market")?
            .error_for_status()
            .context("Gamma API returned an error status")?
            .json()
            .await
            .context("Failed to parse markets response")?;

        markets
            .iter()
            .find_map(|m| match_outcome(m, token_id))
            .with_context(|| format!("No market lists token {}", token_id))
    }
}

#[async_trait]
impl MarketLookup for GammaApiClient {
    async fn resolve(&self, token_id: U256) -> Result<MarketInfo> {
        let key = token_id.to_string();
        if let Some(market) = self.cache.get(&key) {
            debug!("Market cache hit for token {}", key);
            return Ok(market);
        }

        let market = self.fetch_market(&key).await?;
        self.cache.insert(key, market.clone());
        Ok(market)
    }
}

/// Picks the outcome label at the token's position in `clobTokenIds`.
fn match_outcome(market: &GammaMarket, token_id: &str) -> Option<MarketInfo> {
    let token_ids: Vec<String> = decode_list(market.clob_token_ids.as_deref()?)?;
    let index = token_ids.iter().position(|t| t == token_id)?;

    let outcome = market
        .outcomes
        .as_deref()
        .and_then(decode_list)
        .and_then(|outcomes: Vec<String>| outcomes.into_iter().nth(index))
        .unwrap_or_else(|| MarketInfo::UNKNOWN_OUTCOME.to_string());

    Some(MarketInfo {
        market_id: market.condition_id.clone(),
        outcome,
    })
}

fn decode_list(encoded: &str) -> Option<Vec<String>> {
    match serde_json::from_str(encoded) {
        Ok(list) => Some(list),
        Err(e) => {
            warn!("Malformed Gamma list field {:?}: {}", encoded, e);
            None
        }
    }
}
