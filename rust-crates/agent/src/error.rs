use crate::{
    money::{
        Network,
        Usd,
    },
    ticket::TicketState,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("chat transport failed: {0}")]
    ChatTransport(String),

    #[error("{network} price unavailable: {reason}")]
    PriceUnavailable { network: Network, reason: String },

    #[error("{network} price {price} outside [{min}, {max}]")]
    PriceOutOfBounds {
        network: Network,
        price: f64,
        min: f64,
        max: f64,
    },

    #[error("{network} price moved {deviation_pct:.1}% from cached {cached} (limit {limit_pct}%)")]
    PriceDeviationExceeded {
        network: Network,
        cached: f64,
        fetched: f64,
        deviation_pct: f64,
        limit_pct: f64,
    },

    #[error("wallet rpc failed: {0}")]
    RpcError(String),

    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("address {0} is not on the allowlist")]
    DisallowedAddress(String),

    #[error("payment of ${amount} exceeds the ${cap} per-transaction cap")]
    TxLimitExceeded { amount: Usd, cap: Usd },

    #[error("payment of ${amount} would bring today's spend ${spent} over the ${cap} cap")]
    DailyLimitExceeded { spent: Usd, amount: Usd, cap: Usd },

    #[error("invalid {network} address: {address}")]
    InvalidAddress { network: Network, address: String },

    #[error("payment {payment_id} was already sent")]
    DuplicatePayment {
        payment_id: String,
        tx_id: Option<String>,
    },

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("refused transition {from} -> {to}: {reason}")]
    InvalidStateTransition {
        from: TicketState,
        to: TicketState,
        reason: &'static str,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl AgentError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        AgentError::PersistenceFailure(format!("{err:#}"))
    }

    /// Short text posted back into a ticket channel.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::InvalidAddress { network, .. } => {
                format!("That doesn't look like a valid {network} address.")
            }
            AgentError::InsufficientBalance { .. } => {
                "Payment failed: wallet balance is too low. The operator has been notified."
                    .to_string()
            }
            AgentError::PriceUnavailable { network, .. }
            | AgentError::PriceOutOfBounds { network, .. }
            | AgentError::PriceDeviationExceeded { network, .. } => {
                format!("Couldn't get a reliable {network} price right now, try again shortly.")
            }
            AgentError::DisallowedAddress(_) => {
                "That address isn't approved for payments.".to_string()
            }
            AgentError::TxLimitExceeded { cap, .. } => {
                format!("Payment refused: above the ${cap} per-bet limit.")
            }
            AgentError::DailyLimitExceeded { .. } => {
                "Payment refused: daily limit reached.".to_string()
            }
            _ => "Payment failed, please wait for the operator.".to_string(),
        }
    }
}
