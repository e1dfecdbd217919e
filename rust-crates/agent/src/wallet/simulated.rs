use super::{
    Receipt,
    Wallet,
    WalletFailure,
};
use crate::{
    AgentError,
    Result,
    money::Network,
};
use std::{
    collections::VecDeque,
    sync::Mutex,
};

#[derive(Debug, Default)]
struct SimulatedState {
    balance: f64,
    attempts: usize,
    sent: Vec<(String, f64, String)>,
    failures: VecDeque<WalletFailure>,
    balance_failures: VecDeque<String>,
    receipts: Vec<Receipt>,
}

/// In-memory wallet that never touches a chain.
#[derive(Debug)]
pub struct SimulatedWallet {
    network: Network,
    state: Mutex<SimulatedState>,
}

impl SimulatedWallet {
    pub fn new(network: Network, balance: f64) -> Self {
        Self {
            network,
            state: Mutex::new(SimulatedState {
                balance,
                ..SimulatedState::default()
            }),
        }
    }

    /// Queue a failure returned by the next send attempt.
    pub fn fail_next(&self, failure: WalletFailure) {
        self.with_state(|state| state.failures.push_back(failure));
    }

    /// Make the next balance query fail with an rpc error.
    pub fn fail_balance_next(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_state(|state| state.balance_failures.push_back(reason));
    }

    pub fn push_receipt(&self, receipt: Receipt) {
        self.with_state(|state| state.receipts.push(receipt));
    }

    /// `(address, amount, tx_id)` of every successful send.
    pub fn sent(&self) -> Vec<(String, f64, String)> {
        self.with_state(|state| state.sent.clone())
    }

    pub fn send_attempts(&self) -> usize {
        self.with_state(|state| state.attempts)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimulatedState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Wallet for SimulatedWallet {
    fn network(&self) -> Network {
        self.network
    }

    async fn balance(&self) -> Result<f64> {
        self.with_state(|state| match state.balance_failures.pop_front() {
            Some(reason) => Err(AgentError::RpcError(reason)),
            None => Ok(state.balance),
        })
    }

    async fn send_payment(
        &self,
        address: &str,
        amount: f64,
    ) -> Result<String, WalletFailure> {
        self.with_state(|state| {
            state.attempts += 1;
            if let Some(failure) = state.failures.pop_front() {
                return Err(failure);
            }
            if amount > state.balance {
                return Err(WalletFailure::InsufficientFunds(format!(
                    "balance {} below {amount}",
                    state.balance
                )));
            }
            state.balance -= amount;
            let tx_id = format!("sim_{}", hex::encode(rand::random::<[u8; 16]>()));
            state.sent.push((address.to_string(), amount, tx_id.clone()));
            Ok(tx_id)
        })
    }

    async fn recent_receipts(&self, limit: usize) -> Result<Vec<Receipt>> {
        let mut receipts = self.with_state(|state| state.receipts.clone());
        receipts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        receipts.truncate(limit);
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use chrono::{
        Duration,
        Utc,
    };

    #[tokio::test]
    async fn send_payment__debits_balance_and_refuses_overdraft() {
        // given
        let wallet = SimulatedWallet::new(Network::Sol, 1.0);

        // when
        wallet.send_payment("dest", 0.75).await.unwrap();
        let overdraft = wallet.send_payment("dest", 0.5).await;

        // then
        assert!((wallet.balance().await.unwrap() - 0.25).abs() < 1e-12);
        assert!(matches!(overdraft, Err(WalletFailure::InsufficientFunds(_))));
        assert_eq!(wallet.sent().len(), 1);
    }

    #[tokio::test]
    async fn recent_receipts__newest_first_and_limited() {
        // given
        let wallet = SimulatedWallet::new(Network::Ltc, 0.0);
        let now = Utc::now();
        for (i, age) in [30, 10, 20].into_iter().enumerate() {
            wallet.push_receipt(Receipt {
                tx_id: format!("rx{i}"),
                amount: 0.1,
                timestamp: now - Duration::minutes(age),
                confirmations: 1,
            });
        }

        // when
        let receipts = wallet.recent_receipts(2).await.unwrap();

        // then
        let ids: Vec<_> = receipts.iter().map(|r| r.tx_id.as_str()).collect();
        assert_eq!(ids, ["rx1", "rx2"]);
    }
}
