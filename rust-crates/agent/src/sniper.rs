//! Answers wager offers posted in public channels.

use crate::{
    chat::{
        ChatEvent,
        Handling,
    },
    extract,
    handler::Desk,
    templates::render,
    ticket::{
        BetTerms,
        PendingWager,
    },
};
use chrono::{
    DateTime,
    Utc,
};

impl<T> Desk<T> {
    /// Counter-offer a public `XvY` wager and remember it until a ticket opens.
    pub fn snipe(&mut self, event: &ChatEvent, now: DateTime<Utc>) -> Handling {
        let author = &event.author;
        if event.is_direct() || author.bot || author.id == self.bot_id {
            return Handling::Ignored;
        }
        let Some(offer) = extract::extract_bet(&event.content) else {
            return Handling::Ignored;
        };
        if self.config.require_matching_bet && !offer.is_matched() {
            tracing::debug!(user_id = %author.id, raw = ?offer.raw, "uneven offer skipped");
            return Handling::Ignored;
        }
        if !self.config.betting_limits.contains(offer.opponent) {
            tracing::debug!(user_id = %author.id, amount = %offer.opponent, "offer outside limits");
            return Handling::Ignored;
        }
        if self.is_middleman(&author.id) {
            return Handling::Ignored;
        }
        if self.registry.is_on_cooldown(&author.id, now) {
            tracing::debug!(user_id = %author.id, "offer skipped during cooldown");
            return Handling::Ignored;
        }
        if let Some(ticket) = self.registry.active_ticket_for_user(&author.id) {
            tracing::debug!(
                user_id = %author.id,
                channel_id = %ticket.channel_id,
                "offer skipped; user already has a ticket"
            );
            return Handling::Ignored;
        }

        let terms = BetTerms::with_tax(offer.opponent, self.config.tax_percentage);
        self.registry.store_pending(PendingWager {
            user_id: author.id.clone(),
            username: author.name.clone(),
            opponent_bet: terms.opponent_bet,
            our_bet: terms.our_bet,
            source_channel_id: event.channel.id.clone(),
            timestamp: now,
            message_id: Some(event.id.clone()),
            bet_terms_raw: event.content.clone(),
        });
        self.registry.start_cooldown(&author.id, now);
        tracing::info!(
            user_id = %author.id,
            opponent_bet = %terms.opponent_bet,
            our_bet = %terms.our_bet,
            "wager offered"
        );

        Handling::reply(
            &event.channel.id,
            render(
                &self.config.response_templates.bet_offer,
                &[
                    ("user", &author.id),
                    ("calculated", &terms.our_bet.to_string()),
                    ("base", &terms.opponent_bet.to_string()),
                ],
            ),
        )
    }
}
