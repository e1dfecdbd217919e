//! Operator commands received by direct message.

use crate::{
    chat::{
        ChatEvent,
        Handling,
    },
    gate::Treasury,
    handler::Desk,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Balance,
    Address,
    Spend,
    Help,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        match word.to_ascii_lowercase().as_str() {
            "!balance" => Some(Command::Balance),
            "!address" => Some(Command::Address),
            "!spend" => Some(Command::Spend),
            "!help" => Some(Command::Help),
            _ => None,
        }
    }
}

const HELP: &str = "Commands: !balance, !address, !spend";

impl<T: Treasury> Desk<T> {
    /// Direct messages never reach the wager pipeline; owners get wallet
    /// commands, everyone else is ignored silently.
    pub async fn handle_direct(&self, event: &ChatEvent) -> Handling {
        if !event.is_direct() {
            return Handling::Ignored;
        }
        let is_owner = self.config.owner_ids.iter().any(|id| *id == event.author.id);
        let command = Command::parse(&event.content);
        let (true, Some(command)) = (is_owner, command) else {
            if command.is_some() {
                tracing::warn!(user_id = %event.author.id, "command from non-owner ignored");
            }
            return Handling::silent();
        };

        let channel_id = event.channel.id.as_str();
        let network = self.treasury.network();
        let text = match command {
            Command::Balance => match self.treasury.balance().await {
                Ok(balance) => match self.treasury.price_of(network).await {
                    Ok(price) => format!(
                        "Balance: {balance} {network} (~${:.2})",
                        balance * price
                    ),
                    Err(_) => format!("Balance: {balance} {network}"),
                },
                Err(err) => {
                    tracing::warn!(error = %err, "balance lookup failed");
                    format!("Couldn't read the wallet balance: {err}")
                }
            },
            Command::Address => match self.config.own_payout_address() {
                Some(address) => format!("Payout address ({network}): {address}"),
                None => format!("No {network} payout address configured."),
            },
            Command::Spend => format!(
                "Spent today: ${} of ${}",
                self.treasury.daily_spend(),
                self.treasury.daily_cap()
            ),
            Command::Help => HELP.to_string(),
        };
        Handling::reply(channel_id, text)
    }
}
