//! Admission pipeline wrapped around every outgoing transfer.

use crate::{
    AgentError,
    Result,
    config::Config,
    money::{
        Network,
        Usd,
    },
    oracle::{
        PriceOracle,
        PriceProvider,
    },
    wallet::{
        Receipt,
        Wallet,
    },
};
use ledger::{
    IdempotencyLedger,
    SendDecision,
};
use std::future::Future;

#[derive(Clone, Debug, PartialEq)]
pub struct GatePolicy {
    pub simulation: bool,
    pub live_transfers: bool,
    pub address_allowlist: Vec<String>,
    pub max_payment_per_tx: Usd,
    pub max_daily_usd: Usd,
}

impl GatePolicy {
    pub fn from_config(config: &Config) -> Self {
        let safety = &config.payment_safety;
        Self {
            simulation: config.simulation_mode,
            live_transfers: config.live_transfers,
            address_allowlist: safety.address_allowlist.clone(),
            max_payment_per_tx: safety.max_payment_per_tx,
            max_daily_usd: safety.max_daily_usd,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub tx_id: String,
    /// Live transfers were disabled; nothing left the wallet.
    pub dry_run: bool,
    pub simulated: bool,
    /// A previous attempt already broadcast this payment.
    pub duplicate: bool,
}

/// Money-facing operations the ticket pipeline relies on.
pub trait Treasury {
    fn network(&self) -> Network;

    fn send_payment(
        &mut self,
        to_address: &str,
        usd: Usd,
        network: Network,
        ticket_id: &str,
    ) -> impl Future<Output = Result<PaymentOutcome>>;

    fn balance(&self) -> impl Future<Output = Result<f64>>;

    /// USD per whole coin.
    fn price_of(&self, network: Network) -> impl Future<Output = Result<f64>>;

    fn recent_receipts(&self, limit: usize) -> impl Future<Output = Result<Vec<Receipt>>>;

    fn daily_spend(&self) -> Usd;

    fn daily_cap(&self) -> Usd;
}

pub struct PaymentGate<W, P, S> {
    policy: GatePolicy,
    wallet: W,
    oracle: PriceOracle<P, S>,
    ledger: IdempotencyLedger,
}

fn synthetic_tx_id(prefix: &str) -> String {
    format!("{prefix}_{}", hex::encode(rand::random::<[u8; 8]>()))
}

impl<W, P, S> PaymentGate<W, P, S>
where
    W: Wallet,
    P: PriceProvider,
    S: PriceProvider,
{
    pub fn new(
        policy: GatePolicy,
        wallet: W,
        oracle: PriceOracle<P, S>,
        ledger: IdempotencyLedger,
    ) -> Self {
        Self {
            policy,
            wallet,
            oracle,
            ledger,
        }
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn oracle(&self) -> &PriceOracle<P, S> {
        &self.oracle
    }

    pub async fn send_payment(
        &mut self,
        to_address: &str,
        usd: Usd,
        network: Network,
        ticket_id: &str,
    ) -> Result<PaymentOutcome> {
        if self.policy.simulation {
            let tx_id = synthetic_tx_id("sim_tx");
            tracing::info!(ticket_id, %usd, %tx_id, "simulation mode; payment not broadcast");
            return Ok(PaymentOutcome {
                tx_id,
                simulated: true,
                ..PaymentOutcome::default()
            });
        }
        if !self.policy.live_transfers {
            let tx_id = synthetic_tx_id("dryrun_tx");
            tracing::info!(
                ticket_id,
                %usd,
                to_address,
                %tx_id,
                "live transfers disabled; dry run"
            );
            return Ok(PaymentOutcome {
                tx_id,
                dry_run: true,
                ..PaymentOutcome::default()
            });
        }

        let payment_id = ledger::payment_id(ticket_id, to_address, usd.cents());
        if let SendDecision::Blocked {
            reason,
            existing_tx_id,
        } = self.ledger.can_send(&payment_id)
        {
            tracing::warn!(%payment_id, %reason, "duplicate payment suppressed");
            return match existing_tx_id {
                Some(tx_id) => Ok(PaymentOutcome {
                    tx_id,
                    duplicate: true,
                    ..PaymentOutcome::default()
                }),
                None => Err(AgentError::DuplicatePayment {
                    payment_id,
                    tx_id: None,
                }),
            };
        }

        if network != self.wallet.network() {
            return Err(AgentError::ConfigInvalid(format!(
                "no wallet configured for {network}"
            )));
        }
        if !self.wallet.validate_address(to_address) {
            tracing::warn!(%payment_id, to_address, "rejected: invalid address");
            return Err(AgentError::InvalidAddress {
                network,
                address: to_address.to_string(),
            });
        }
        if !self.policy.address_allowlist.is_empty()
            && !self
                .policy
                .address_allowlist
                .iter()
                .any(|allowed| allowed == to_address)
        {
            tracing::warn!(%payment_id, to_address, "rejected: address not allowlisted");
            return Err(AgentError::DisallowedAddress(to_address.to_string()));
        }
        if usd > self.policy.max_payment_per_tx {
            tracing::warn!(%payment_id, %usd, "rejected: per-transaction cap");
            return Err(AgentError::TxLimitExceeded {
                amount: usd,
                cap: self.policy.max_payment_per_tx,
            });
        }
        let spent = Usd::from_cents(self.ledger.daily_spend_cents());
        if spent + usd > self.policy.max_daily_usd {
            tracing::warn!(%payment_id, %usd, %spent, "rejected: daily cap");
            return Err(AgentError::DailyLimitExceeded {
                spent,
                amount: usd,
                cap: self.policy.max_daily_usd,
            });
        }

        let crypto = self
            .oracle
            .convert_usd_to_crypto(usd, network)
            .await
            .map_err(|err| match err {
                AgentError::PriceUnavailable { .. } => err,
                other => AgentError::PriceUnavailable {
                    network,
                    reason: other.to_string(),
                },
            })?;

        match self.wallet.balance().await {
            Ok(balance) if balance < crypto => {
                tracing::warn!(%payment_id, balance, required = crypto, "rejected: balance");
                return Err(AgentError::InsufficientBalance {
                    available: balance,
                    required: crypto,
                });
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    %payment_id,
                    error = %err,
                    "balance check failed; proceeding and letting the wallet decide"
                );
            }
        }

        let armed = self
            .ledger
            .record_intent(&payment_id, to_address, usd.cents(), ticket_id)
            .map_err(AgentError::persistence)?;
        if !armed {
            return Err(AgentError::DuplicatePayment {
                payment_id,
                tx_id: None,
            });
        }

        match self.wallet.send_payment(to_address, crypto).await {
            Ok(tx_id) => {
                tracing::info!(%payment_id, %network, %usd, crypto, %tx_id, "payment broadcast");
                if let Err(err) = self
                    .ledger
                    .record_broadcast(&payment_id, &tx_id)
                    .and_then(|_| self.ledger.record_confirmed(&payment_id))
                {
                    tracing::error!(
                        %payment_id,
                        %tx_id,
                        error = %format!("{err:#}"),
                        "payment sent but ledger update failed; operator review required"
                    );
                }
                Ok(PaymentOutcome {
                    tx_id,
                    ..PaymentOutcome::default()
                })
            }
            Err(failure) => {
                tracing::error!(%payment_id, error = %failure, "broadcast failed");
                if let Err(err) = self.ledger.record_failed(&payment_id, &failure.to_string()) {
                    tracing::error!(
                        %payment_id,
                        error = %format!("{err:#}"),
                        "could not record failed payment"
                    );
                }
                Err(AgentError::BroadcastFailed(failure.to_string()))
            }
        }
    }
}

impl<W, P, S> Treasury for PaymentGate<W, P, S>
where
    W: Wallet,
    P: PriceProvider,
    S: PriceProvider,
{
    fn network(&self) -> Network {
        self.wallet.network()
    }

    async fn send_payment(
        &mut self,
        to_address: &str,
        usd: Usd,
        network: Network,
        ticket_id: &str,
    ) -> Result<PaymentOutcome> {
        PaymentGate::send_payment(self, to_address, usd, network, ticket_id).await
    }

    async fn balance(&self) -> Result<f64> {
        self.wallet.balance().await
    }

    async fn price_of(&self, network: Network) -> Result<f64> {
        self.oracle.price_of(network).await
    }

    async fn recent_receipts(&self, limit: usize) -> Result<Vec<Receipt>> {
        self.wallet.recent_receipts(limit).await
    }

    fn daily_spend(&self) -> Usd {
        Usd::from_cents(self.ledger.daily_spend_cents())
    }

    fn daily_cap(&self) -> Usd {
        self.policy.max_daily_usd
    }
}

#[cfg(test)]
mod tests;
