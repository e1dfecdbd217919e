//! Per-network wallet capability used by the payment gate and payout monitor.

use crate::{
    Result,
    extract,
    money::Network,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    future::Future,
    time::Duration,
};

pub mod http;
pub mod simulated;

pub use http::HttpWallet;
pub use simulated::SimulatedWallet;

const SEND_ATTEMPTS: u32 = 3;
const SEND_BACKOFF: Duration = Duration::from_secs(1);

/// An incoming transaction to the wallet's own address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_id: String,
    /// Amount in whole coins.
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub confirmations: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WalletFailure {
    #[error("transient wallet failure: {0}")]
    Transient(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl WalletFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletFailure::Transient(_))
    }
}

pub trait Wallet {
    fn network(&self) -> Network;

    fn validate_address(&self, address: &str) -> bool {
        extract::is_valid_address(address, self.network())
    }

    /// Spendable balance in whole coins.
    fn balance(&self) -> impl Future<Output = Result<f64>>;

    /// Broadcast `amount` coins to `address`, returning the transaction id.
    fn send_payment(
        &self,
        address: &str,
        amount: f64,
    ) -> impl Future<Output = Result<String, WalletFailure>>;

    /// Incoming transactions, newest first.
    fn recent_receipts(&self, limit: usize) -> impl Future<Output = Result<Vec<Receipt>>>;
}

/// Retries transient send failures with linearly increasing backoff.
pub struct RetryingWallet<W> {
    inner: W,
    attempts: u32,
    backoff: Duration,
}

impl<W: Wallet> RetryingWallet<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            attempts: SEND_ATTEMPTS,
            backoff: SEND_BACKOFF,
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }
}

impl<W: Wallet> Wallet for RetryingWallet<W> {
    fn network(&self) -> Network {
        self.inner.network()
    }

    fn validate_address(&self, address: &str) -> bool {
        self.inner.validate_address(address)
    }

    async fn balance(&self) -> Result<f64> {
        self.inner.balance().await
    }

    async fn send_payment(
        &self,
        address: &str,
        amount: f64,
    ) -> Result<String, WalletFailure> {
        let mut attempt = 1;
        loop {
            match self.inner.send_payment(address, amount).await {
                Ok(tx_id) => return Ok(tx_id),
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    tracing::warn!(
                        network = %self.network(),
                        attempt,
                        error = %err,
                        "send failed; retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn recent_receipts(&self, limit: usize) -> Result<Vec<Receipt>> {
        self.inner.recent_receipts(limit).await
    }
}
