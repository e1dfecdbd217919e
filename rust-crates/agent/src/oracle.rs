//! USD price feed with provider failover, caching and sanity bands.

use crate::{
    AgentError,
    Result,
    config::PriceSafety,
    money::{
        Network,
        Usd,
    },
};
use serde::Deserialize;
use std::{
    collections::HashMap,
    future::Future,
    sync::Mutex,
    time::Duration,
};
use tokio::time::Instant;
use url::Url;

pub const DEFAULT_PRIMARY_URL: &str = "https://api.coinbase.com";
pub const DEFAULT_SECONDARY_URL: &str = "https://api.coingecko.com";

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Cached prices younger than this may stand in for a rejected outlier.
const DEVIATION_FALLBACK_WINDOW: Duration = Duration::from_secs(6 * 60 * 60);

pub trait PriceProvider {
    fn name(&self) -> &str;

    fn fetch_usd(&self, network: Network) -> impl Future<Output = Result<f64>>;
}

#[derive(Clone, Copy, Debug)]
struct CachedPrice {
    price: f64,
    fetched_at: Instant,
}

pub struct PriceOracle<P, S> {
    primary: P,
    secondary: S,
    safety: PriceSafety,
    cache: Mutex<HashMap<Network, CachedPrice>>,
    fetch_timeout: Duration,
}

impl<P: PriceProvider, S: PriceProvider> PriceOracle<P, S> {
    pub fn new(primary: P, secondary: S, safety: PriceSafety) -> Self {
        Self {
            primary,
            secondary,
            safety,
            cache: Mutex::new(HashMap::new()),
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub async fn price_of(&self, network: Network) -> Result<f64> {
        let cached = self.cached(network);
        if let Some(entry) = cached {
            if entry.fetched_at.elapsed() < CACHE_TTL {
                return Ok(entry.price);
            }
        }

        match self.fetch_fresh(network).await {
            Ok(price) => self.vet(network, price, cached),
            Err(err) => match cached {
                Some(entry) => {
                    tracing::warn!(
                        %network,
                        price = entry.price,
                        age_secs = entry.fetched_at.elapsed().as_secs(),
                        error = %err,
                        "all price providers failed; using cached price"
                    );
                    Ok(entry.price)
                }
                None => Err(AgentError::PriceUnavailable {
                    network,
                    reason: err.to_string(),
                }),
            },
        }
    }

    pub async fn convert_usd_to_crypto(&self, usd: Usd, network: Network) -> Result<f64> {
        let price = self.price_of(network).await?;
        Ok(usd.dollars() / price)
    }

    pub async fn convert_crypto_to_usd(
        &self,
        amount: f64,
        network: Network,
    ) -> Result<f64> {
        let price = self.price_of(network).await?;
        Ok(amount * price)
    }

    fn cached(&self, network: Network) -> Option<CachedPrice> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&network).copied())
    }

    fn store(&self, network: Network, price: f64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                network,
                CachedPrice {
                    price,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    async fn fetch_fresh(&self, network: Network) -> Result<f64> {
        match self.fetch_from(&self.primary, network).await {
            Ok(price) => Ok(price),
            Err(primary_err) => {
                tracing::warn!(
                    %network,
                    provider = self.primary.name(),
                    error = %primary_err,
                    "primary price provider failed; trying secondary"
                );
                self.fetch_from(&self.secondary, network).await
            }
        }
    }

    async fn fetch_from<T: PriceProvider>(
        &self,
        provider: &T,
        network: Network,
    ) -> Result<f64> {
        let price = tokio::time::timeout(self.fetch_timeout, provider.fetch_usd(network))
            .await
            .map_err(|_| AgentError::PriceUnavailable {
                network,
                reason: format!("{} timed out", provider.name()),
            })??;
        if !price.is_finite() || price <= 0.0 {
            return Err(AgentError::PriceUnavailable {
                network,
                reason: format!("{} returned non-positive price {price}", provider.name()),
            });
        }
        Ok(price)
    }

    fn vet(
        &self,
        network: Network,
        price: f64,
        cached: Option<CachedPrice>,
    ) -> Result<f64> {
        if let Some(entry) = cached {
            let deviation = (price - entry.price).abs() / entry.price;
            let limit = self.safety.max_deviation_percentage / 100.0;
            if deviation > limit {
                if entry.fetched_at.elapsed() <= DEVIATION_FALLBACK_WINDOW {
                    tracing::warn!(
                        %network,
                        fetched = price,
                        cached = entry.price,
                        deviation_pct = deviation * 100.0,
                        "price deviation too large; keeping cached price"
                    );
                    return Ok(entry.price);
                }
                tracing::error!(
                    %network,
                    fetched = price,
                    cached = entry.price,
                    "price deviation too large and cached price is stale"
                );
                return Err(AgentError::PriceDeviationExceeded {
                    network,
                    cached: entry.price,
                    fetched: price,
                    deviation_pct: deviation * 100.0,
                    limit_pct: self.safety.max_deviation_percentage,
                });
            }
        }

        let (min, max) = self.safety.bounds(network);
        if price < min || price > max {
            tracing::error!(%network, price, min, max, "price outside hard bounds");
            return Err(AgentError::PriceOutOfBounds {
                network,
                price,
                min,
                max,
            });
        }

        self.store(network, price);
        Ok(price)
    }
}

/// Spot endpoint `GET /v2/prices/{TICKER}-USD/spot`.
#[derive(Clone)]
pub struct SpotPriceProvider {
    base_url: Url,
    http: reqwest::Client,
}

impl SpotPriceProvider {
    pub fn new(base_url: Url, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }
}

#[derive(Deserialize)]
struct SpotEnvelope {
    data: SpotData,
}

#[derive(Deserialize)]
struct SpotData {
    amount: String,
}

impl PriceProvider for SpotPriceProvider {
    fn name(&self) -> &str {
        "spot"
    }

    async fn fetch_usd(&self, network: Network) -> Result<f64> {
        let path = format!("v2/prices/{}-USD/spot", network.ticker());
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| unavailable(network, format!("bad spot url: {e}")))?;
        let envelope: SpotEnvelope = get_json(&self.http, url, network).await?;
        envelope
            .data
            .amount
            .parse::<f64>()
            .map_err(|e| unavailable(network, format!("spot amount unparsable: {e}")))
    }
}

/// Aggregator endpoint `GET /api/v3/simple/price?ids={id}&vs_currencies=usd`.
#[derive(Clone)]
pub struct AggregatorPriceProvider {
    base_url: Url,
    http: reqwest::Client,
}

impl AggregatorPriceProvider {
    pub fn new(base_url: Url, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }
}

#[derive(Deserialize)]
struct UsdQuote {
    usd: f64,
}

impl PriceProvider for AggregatorPriceProvider {
    fn name(&self) -> &str {
        "aggregator"
    }

    async fn fetch_usd(&self, network: Network) -> Result<f64> {
        let mut url = self
            .base_url
            .join("api/v3/simple/price")
            .map_err(|e| unavailable(network, format!("bad aggregator url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("ids", network.coingecko_id())
            .append_pair("vs_currencies", "usd");
        let quotes: HashMap<String, UsdQuote> = get_json(&self.http, url, network).await?;
        quotes
            .get(network.coingecko_id())
            .map(|quote| quote.usd)
            .ok_or_else(|| unavailable(network, "aggregator response missing quote".into()))
    }
}

fn unavailable(network: Network, reason: String) -> AgentError {
    AgentError::PriceUnavailable { network, reason }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: Url,
    network: Network,
) -> Result<T> {
    let res = http
        .get(url)
        .send()
        .await
        .map_err(|e| unavailable(network, format!("price request failed: {e}")))?;
    let status = res.status();
    if !status.is_success() {
        return Err(unavailable(network, format!("price provider responded {status}")));
    }
    res.json()
        .await
        .map_err(|e| unavailable(network, format!("invalid price payload: {e}")))
}
