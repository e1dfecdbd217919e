//! Per-channel wager lifecycle.

use crate::{
    AgentError,
    Result,
    game::{
        GameTracker,
        Scores,
        Side,
    },
    money::Usd,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub mod registry;

pub use registry::{
    PendingWager,
    RegistrySnapshot,
    TicketRegistry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    AwaitingTicket,
    AwaitingMiddleman,
    AwaitingPaymentAddress,
    PaymentSent,
    AwaitingGameStart,
    GameInProgress,
    AwaitingPayout,
    GameComplete,
    Cancelled,
}

impl TicketState {
    pub fn can_transition(self, to: TicketState) -> bool {
        use TicketState::*;
        matches!(
            (self, to),
            (AwaitingTicket, AwaitingMiddleman)
                | (AwaitingMiddleman, AwaitingPaymentAddress)
                | (AwaitingPaymentAddress, PaymentSent)
                | (PaymentSent, AwaitingGameStart)
                | (AwaitingGameStart, GameInProgress)
                | (GameInProgress, GameComplete)
                | (GameInProgress, AwaitingPayout)
                | (AwaitingPayout, GameComplete)
        ) || (to == Cancelled && !self.is_terminal())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketState::GameComplete | TicketState::Cancelled)
    }

    /// Our stake has left the wallet and the outcome is not settled.
    pub fn funds_at_risk(self) -> bool {
        matches!(
            self,
            TicketState::PaymentSent
                | TicketState::AwaitingGameStart
                | TicketState::GameInProgress
                | TicketState::AwaitingPayout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketState::AwaitingTicket => "AWAITING_TICKET",
            TicketState::AwaitingMiddleman => "AWAITING_MIDDLEMAN",
            TicketState::AwaitingPaymentAddress => "AWAITING_PAYMENT_ADDRESS",
            TicketState::PaymentSent => "PAYMENT_SENT",
            TicketState::AwaitingGameStart => "AWAITING_GAME_START",
            TicketState::GameInProgress => "GAME_IN_PROGRESS",
            TicketState::AwaitingPayout => "AWAITING_PAYOUT",
            TicketState::GameComplete => "GAME_COMPLETE",
            TicketState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two stakes of a wager; always set together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetTerms {
    pub opponent_bet: Usd,
    pub our_bet: Usd,
}

impl BetTerms {
    /// Our stake is the opponent's plus the house surcharge, to the cent.
    pub fn with_tax(opponent_bet: Usd, tax_percentage: f64) -> Self {
        Self {
            opponent_bet,
            our_bet: opponent_bet.with_surcharge(tax_percentage),
        }
    }

    pub fn pot(&self) -> Usd {
        self.opponent_bet + self.our_bet
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent_id: Option<String>,
    #[serde(flatten)]
    pub bet: Option<BetTerms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleman_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_tx_id: Option<String>,
    #[serde(default)]
    pub payment_locked: bool,
    #[serde(default)]
    pub game_scores: Scores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_state: Option<GameTracker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_tx_id: Option<String>,
    /// Coins received from the middleman.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_amount: Option<f64>,
    #[serde(default)]
    pub auto_detected: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from: TicketState,
    pub to: TicketState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub channel_id: String,
    pub state: TicketState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub data: TicketData,
}

impl Ticket {
    pub fn new(channel_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state: TicketState::AwaitingTicket,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            data: TicketData::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn pot(&self) -> Option<Usd> {
        self.data.bet.map(|bet| bet.pot())
    }

    /// Data the target state cannot exist without.
    fn missing_for(&self, to: TicketState) -> Option<&'static str> {
        let data = &self.data;
        match to {
            TicketState::AwaitingMiddleman if data.opponent_id.is_none() => {
                Some("opponent not identified")
            }
            TicketState::AwaitingMiddleman if data.bet.is_none() => Some("bet not agreed"),
            TicketState::AwaitingPaymentAddress if data.middleman_id.is_none() => {
                Some("middleman not identified")
            }
            TicketState::PaymentSent if data.payment_tx_id.is_none() => {
                Some("payment not broadcast")
            }
            TicketState::GameInProgress if data.tracker_state.is_none() => {
                Some("game not initialised")
            }
            TicketState::AwaitingPayout if data.winner != Some(Side::Bot) => {
                Some("game not won")
            }
            TicketState::GameComplete if data.winner.is_none() => Some("game has no winner"),
            _ => None,
        }
    }

    /// Move to `to`, appending history. Refused moves leave the ticket untouched.
    pub fn transition(
        &mut self,
        to: TicketState,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let from = self.state;
        let refusal = if from.can_transition(to) {
            self.missing_for(to)
        } else {
            Some("not a permitted transition")
        };
        if let Some(reason) = refusal {
            tracing::warn!(
                channel_id = %self.channel_id,
                %from,
                %to,
                reason,
                "refused ticket transition"
            );
            return Err(AgentError::InvalidStateTransition { from, to, reason });
        }
        self.history.push(HistoryEntry {
            from,
            to,
            at: now,
            data: note,
        });
        self.state = to;
        self.updated_at = now;
        tracing::info!(channel_id = %self.channel_id, %from, %to, "ticket transition");
        Ok(())
    }
}
