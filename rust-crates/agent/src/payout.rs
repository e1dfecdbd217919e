//! Matches incoming wallet receipts against won tickets awaiting their pot.

use crate::{
    Result,
    chat::OutboundMessage,
    gate::Treasury,
    handler::{
        Desk,
        attestation,
    },
    ticket::TicketState,
};
use chrono::{
    DateTime,
    Utc,
};
use std::collections::HashSet;

const RECEIPT_WINDOW: usize = 50;

impl<T: Treasury> Desk<T> {
    /// Close every AWAITING_PAYOUT ticket whose pot has arrived.
    pub async fn check_payouts(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundMessage>> {
        let waiting: Vec<_> = self
            .registry
            .tickets()
            .filter(|ticket| ticket.state == TicketState::AwaitingPayout)
            .cloned()
            .collect();
        if waiting.is_empty() {
            return Ok(Vec::new());
        }

        let network = self.treasury.network();
        let price = self.treasury.price_of(network).await?;
        let receipts = self.treasury.recent_receipts(RECEIPT_WINDOW).await?;
        let mut claimed: HashSet<String> = self
            .registry
            .tickets()
            .filter_map(|ticket| ticket.data.payout_tx_id.clone())
            .collect();
        let tolerance = 1.0 - self.config.payout_tolerance_percentage / 100.0;

        let mut replies = Vec::new();
        for ticket in waiting {
            let Some(pot) = ticket.pot() else {
                continue;
            };
            let expected = pot.dollars() / price;
            let waiting_since = ticket
                .history
                .iter()
                .rev()
                .find(|entry| entry.to == TicketState::AwaitingPayout)
                .map_or(ticket.updated_at, |entry| entry.at);
            let Some(receipt) = receipts.iter().find(|receipt| {
                !claimed.contains(&receipt.tx_id)
                    && receipt.timestamp >= waiting_since
                    && receipt.amount >= expected * tolerance
            }) else {
                tracing::debug!(
                    channel_id = %ticket.channel_id,
                    expected,
                    "payout not seen yet"
                );
                continue;
            };

            claimed.insert(receipt.tx_id.clone());
            let channel_id = ticket.channel_id.as_str();
            self.registry.edit(channel_id, |data| {
                data.payout_tx_id = Some(receipt.tx_id.clone());
                data.payout_amount = Some(receipt.amount);
            });
            if self
                .registry
                .transition(
                    channel_id,
                    TicketState::GameComplete,
                    Some(format!("payout {}", receipt.tx_id)),
                    now,
                )
                .is_err()
            {
                continue;
            }
            tracing::info!(
                channel_id,
                tx_id = %receipt.tx_id,
                amount = receipt.amount,
                expected,
                "payout received"
            );
            replies.push(OutboundMessage::new(
                channel_id,
                format!("Payout received ({} {network}). Thanks, GG!", receipt.amount),
            ));
            if let Some(vouch) = self
                .registry
                .get(channel_id)
                .and_then(|ticket| attestation(&self.config, ticket))
            {
                replies.push(vouch);
            }
        }
        Ok(replies)
    }
}
