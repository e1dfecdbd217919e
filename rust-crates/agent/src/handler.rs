//! Ticket-channel conversation: detection, negotiation, payment and play.

use crate::{
    chat::{
        Author,
        ChatEvent,
        Handling,
        OutboundMessage,
    },
    config::Config,
    extract::{
        self,
        ROLL_MARKER,
    },
    game::{
        GameTracker,
        Side,
        roll_die,
    },
    gate::Treasury,
    templates::render,
    ticket::{
        BetTerms,
        Ticket,
        TicketRegistry,
        TicketState,
    },
};
use chrono::{
    DateTime,
    Duration,
    Utc,
};

const TICKET_NAME_MARKERS: [&str; 4] = ["ticket", "order", "wager", "bet"];
/// Upper bound on state steps a single message may drive.
const MAX_STEPS_PER_MESSAGE: usize = 3;

pub fn is_ticket_channel(name: &str) -> bool {
    let name = name.to_lowercase();
    TICKET_NAME_MARKERS
        .iter()
        .any(|marker| name.contains(marker))
}

/// Everything the message pipeline reads and mutates.
pub struct Desk<T> {
    pub config: Config,
    pub bot_id: String,
    pub registry: TicketRegistry,
    pub treasury: T,
}

impl<T> Desk<T> {
    pub fn new(config: Config, bot_id: impl Into<String>, treasury: T) -> Self {
        let registry = TicketRegistry::new(
            Duration::milliseconds(config.pending_wager_ttl_ms as i64),
            Duration::milliseconds(config.bet_cooldown_ms as i64),
        );
        Self {
            config,
            bot_id: bot_id.into(),
            registry,
            treasury,
        }
    }

    pub fn is_middleman(&self, user_id: &str) -> bool {
        self.config.middleman_ids.iter().any(|id| id == user_id)
    }

    pub fn is_dice_bot(&self, user_id: &str) -> bool {
        self.config.dice_bot_ids.iter().any(|id| id == user_id)
    }

    pub fn is_monitored(&self, channel_id: &str) -> bool {
        self.config.monitored_channels.is_empty()
            || self
                .config
                .monitored_channels
                .iter()
                .any(|id| id == channel_id)
    }

    /// A human who could be the other side of a wager.
    fn could_be_opponent(&self, author: &Author) -> bool {
        !author.bot && author.id != self.bot_id && !self.is_middleman(&author.id)
    }

    fn ticket(&self, channel_id: &str) -> Option<Ticket> {
        self.registry.get(channel_id).cloned()
    }

    fn transition(
        &mut self,
        channel_id: &str,
        to: TicketState,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        self.registry
            .transition(channel_id, to, Some(note.into()), now)
            .is_ok()
    }

    /// Transition after money or a game result is already settled. A refusal
    /// here leaves the ticket behind reality and needs an operator.
    fn settle(
        &mut self,
        channel_id: &str,
        to: TicketState,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let note = note.into();
        if let Err(err) = self
            .registry
            .transition(channel_id, to, Some(note.clone()), now)
        {
            tracing::error!(
                channel_id,
                %to,
                %note,
                error = %err,
                "settled ticket could not advance; operator review required"
            );
            return false;
        }
        true
    }
}

/// Public vouch for a ticket the bot won.
pub fn attestation(config: &Config, ticket: &Ticket) -> Option<OutboundMessage> {
    if ticket.data.winner != Some(Side::Bot) {
        return None;
    }
    let channel_id = config.channels.vouch_channel_id.as_ref()?;
    let pot = ticket.pot()?;
    let text = render(
        &config.response_templates.vouch_win,
        &[
            ("amount", &pot.to_string()),
            ("opponent", ticket.data.opponent_id.as_deref().unwrap_or("unknown")),
            ("middleman", ticket.data.middleman_id.as_deref().unwrap_or("unknown")),
        ],
    );
    Some(OutboundMessage::new(channel_id, text))
}

fn roll_announcement(value: u8) -> String {
    format!("{ROLL_MARKER} I rolled **{value}**")
}

impl<T: Treasury> Desk<T> {
    /// Lazily open a ticket for a ticket-looking channel and process the
    /// message that revealed it.
    pub async fn detect_ticket(
        &mut self,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        let channel_id = event.channel.id.as_str();
        if event.is_direct()
            || self.registry.get(channel_id).is_some()
            || !is_ticket_channel(&event.channel.name)
            || self
                .config
                .monitored_channels
                .iter()
                .any(|id| id == channel_id)
        {
            return Handling::Ignored;
        }

        self.registry.create_ticket(channel_id, None, now);
        self.registry.edit(channel_id, |data| data.auto_detected = true);
        let mut replies = Vec::new();

        if let Some(wager) = self.registry.correlate_pending(&event.channel.name, now) {
            let terms = BetTerms::with_tax(wager.opponent_bet, self.config.tax_percentage);
            self.registry.set_opponent(channel_id, &wager.user_id, now);
            self.registry
                .edit(channel_id, |data| data.bet = Some(terms));
            if self.transition(
                channel_id,
                TicketState::AwaitingMiddleman,
                "matched pending wager",
                now,
            ) {
                replies.push(OutboundMessage::new(
                    channel_id,
                    format!(
                        "<@{}> your ${} vs my ${}. Waiting for a middleman.",
                        wager.user_id, terms.opponent_bet, terms.our_bet
                    ),
                ));
            }
        }

        replies.extend(self.handle_ticket_message(event, now).await.into_messages());
        Handling::Handled(replies)
    }

    pub async fn handle_ticket_message(
        &mut self,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        let channel_id = event.channel.id.as_str();
        let Some(ticket) = self.registry.get(channel_id) else {
            return Handling::Ignored;
        };
        if ticket.is_terminal() {
            return Handling::Ignored;
        }
        if let Some(handling) = self.check_cancellation(event, now) {
            return handling;
        }

        let mut handled = false;
        let mut replies = Vec::new();
        for _ in 0..MAX_STEPS_PER_MESSAGE {
            let Some(before) = self.registry.get(channel_id).map(|t| t.state) else {
                break;
            };
            match self.step(event, now).await {
                Handling::Ignored => break,
                Handling::Handled(messages) => {
                    handled = true;
                    replies.extend(messages);
                }
            }
            let after = self.registry.get(channel_id).map(|t| t.state);
            let chains = matches!(
                after,
                Some(TicketState::AwaitingMiddleman | TicketState::AwaitingPaymentAddress)
            );
            if after == Some(before) || !chains {
                break;
            }
        }
        if handled {
            Handling::Handled(replies)
        } else {
            Handling::Ignored
        }
    }

    async fn step(&mut self, event: &ChatEvent, now: DateTime<Utc>) -> Handling {
        let Some(ticket) = self.ticket(&event.channel.id) else {
            return Handling::Ignored;
        };
        match ticket.state {
            TicketState::AwaitingTicket => self.on_awaiting_ticket(&ticket, event, now),
            TicketState::AwaitingMiddleman => self.on_awaiting_middleman(&ticket, event, now),
            TicketState::AwaitingPaymentAddress => {
                self.on_awaiting_address(&ticket, event, now).await
            }
            TicketState::PaymentSent => self.on_payment_sent(&ticket, event, now),
            TicketState::AwaitingGameStart => self.on_awaiting_game_start(&ticket, event, now),
            TicketState::GameInProgress => self.on_roll(&ticket, event, now),
            TicketState::AwaitingPayout
            | TicketState::GameComplete
            | TicketState::Cancelled => Handling::Ignored,
        }
    }

    fn check_cancellation(
        &mut self,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Option<Handling> {
        if !extract::is_cancellation(&event.content) {
            return None;
        }
        let ticket = self.ticket(&event.channel.id)?;
        let author = Some(event.author.id.as_str());
        if author != ticket.data.opponent_id.as_deref()
            && author != ticket.data.middleman_id.as_deref()
        {
            return None;
        }
        if ticket.state.funds_at_risk() {
            tracing::warn!(
                channel_id = %ticket.channel_id,
                state = %ticket.state,
                requested_by = %event.author.id,
                "cancellation requested with funds in flight; operator review required"
            );
            return Some(Handling::reply(
                &ticket.channel_id,
                "Funds are already in play, so I can't cancel this ticket. The operator will review it.",
            ));
        }
        let note = format!("cancelled by {}", event.author.id);
        self.transition(&ticket.channel_id, TicketState::Cancelled, note, now)
            .then(|| Handling::reply(&ticket.channel_id, "Ticket cancelled."))
    }

    fn on_awaiting_ticket(
        &mut self,
        ticket: &Ticket,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        let channel_id = ticket.channel_id.as_str();
        let mut latched = false;
        let opponent = match &ticket.data.opponent_id {
            Some(id) => id.clone(),
            None if self.could_be_opponent(&event.author) => {
                self.registry.set_opponent(channel_id, &event.author.id, now);
                latched = true;
                event.author.id.clone()
            }
            None => return Handling::Ignored,
        };
        if event.author.id != opponent {
            return Handling::Ignored;
        }

        let terms = match ticket.data.bet {
            Some(terms) => terms,
            None => {
                let Some(offer) = extract::extract_bet(&event.content) else {
                    return if latched {
                        Handling::silent()
                    } else {
                        Handling::Ignored
                    };
                };
                let limits = self.config.betting_limits;
                if !limits.contains(offer.opponent)
                    || (self.config.require_matching_bet && !offer.is_matched())
                {
                    return Handling::reply(
                        channel_id,
                        format!("I take even bets between ${} and ${}.", limits.min, limits.max),
                    );
                }
                let terms = BetTerms::with_tax(offer.opponent, self.config.tax_percentage);
                self.registry
                    .edit(channel_id, |data| data.bet = Some(terms));
                terms
            }
        };

        if !self.transition(channel_id, TicketState::AwaitingMiddleman, "opponent ready", now) {
            return Handling::silent();
        }
        Handling::reply(
            channel_id,
            format!(
                "<@{opponent}> your ${} vs my ${}. Waiting for a middleman.",
                terms.opponent_bet, terms.our_bet
            ),
        )
    }

    fn on_awaiting_middleman(
        &mut self,
        ticket: &Ticket,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        let author = event.author.id.as_str();
        if !self.is_middleman(author) || ticket.data.opponent_id.as_deref() == Some(author) {
            return Handling::Ignored;
        }
        let channel_id = ticket.channel_id.as_str();
        self.registry
            .edit(channel_id, |data| data.middleman_id = Some(author.to_string()));
        if !self.transition(
            channel_id,
            TicketState::AwaitingPaymentAddress,
            format!("middleman {author}"),
            now,
        ) {
            return Handling::silent();
        }
        let our_bet = ticket.data.bet.map(|bet| bet.our_bet).unwrap_or_default();
        Handling::reply(
            channel_id,
            format!(
                "<@{author}> thanks for holding. Post your {} address and I'll send my ${our_bet}.",
                self.config.crypto_network
            ),
        )
    }

    async fn on_awaiting_address(
        &mut self,
        ticket: &Ticket,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        if ticket.data.middleman_id.as_deref() != Some(event.author.id.as_str()) {
            return Handling::Ignored;
        }
        let channel_id = ticket.channel_id.as_str();
        let network = self.config.crypto_network;
        let Some(address) = extract::extract_address(&event.content, network) else {
            if extract::looks_like_address(&event.content) {
                let err = crate::AgentError::InvalidAddress {
                    network,
                    address: event.content.clone(),
                };
                return Handling::reply(channel_id, err.user_message());
            }
            return Handling::Ignored;
        };
        if self.config.own_payout_address() == Some(address.as_str()) {
            tracing::warn!(channel_id, %address, "refusing to pay our own payout address");
            return Handling::reply(
                channel_id,
                "That's my own payout address. Please post the middleman's deposit address.",
            );
        }
        if ticket.data.payment_locked {
            tracing::debug!(channel_id, "payment already in progress");
            return Handling::silent();
        }
        let Some(terms) = ticket.data.bet else {
            return Handling::Ignored;
        };

        self.registry
            .edit(channel_id, |data| data.payment_locked = true);
        let result = self
            .treasury
            .send_payment(&address, terms.our_bet, network, channel_id)
            .await;
        match result {
            Ok(outcome) => {
                self.registry.edit(channel_id, |data| {
                    data.payment_address = Some(address.clone());
                    data.payment_tx_id = Some(outcome.tx_id.clone());
                    data.payment_locked = false;
                });
                self.settle(
                    channel_id,
                    TicketState::PaymentSent,
                    format!("tx {}", outcome.tx_id),
                    now,
                );
                let mut text = render(
                    &self.config.response_templates.payment_sent,
                    &[
                        ("amount", &terms.our_bet.to_string()),
                        ("txid", &outcome.tx_id),
                    ],
                );
                if outcome.dry_run {
                    text.push_str(" (dry run)");
                }
                Handling::reply(channel_id, text)
            }
            Err(err) => {
                self.registry
                    .edit(channel_id, |data| data.payment_locked = false);
                tracing::error!(channel_id, error = %err, "payment failed");
                Handling::reply(channel_id, err.user_message())
            }
        }
    }

    fn on_payment_sent(
        &mut self,
        ticket: &Ticket,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        let author = event.author.id.as_str();
        if ticket.data.middleman_id.as_deref() != Some(author)
            || !extract::is_payment_confirmation(&event.content)
        {
            return Handling::Ignored;
        }
        if !self.transition(
            &ticket.channel_id,
            TicketState::AwaitingGameStart,
            "middleman confirmed",
            now,
        ) {
            return Handling::silent();
        }
        Handling::reply(
            &ticket.channel_id,
            format!("Thanks <@{author}>. Who rolls first?"),
        )
    }

    fn on_awaiting_game_start(
        &mut self,
        ticket: &Ticket,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        if ticket.data.middleman_id.as_deref() != Some(event.author.id.as_str()) {
            return Handling::Ignored;
        }
        let Some(first) = extract::extract_game_start(&event.content) else {
            return Handling::Ignored;
        };
        let bot_first = first == self.bot_id;
        let opponent = ticket.data.opponent_id.clone().unwrap_or_default();
        if !bot_first && first != opponent {
            return Handling::Ignored;
        }

        let settings = &self.config.game_settings;
        let mut tracker =
            GameTracker::new(settings.wins_to_complete, settings.bot_wins_ties, bot_first, now);
        let dice_command = settings.dice_command.clone();
        let channel_id = ticket.channel_id.as_str();
        let opening_roll = bot_first.then(|| tracker.declare_bot_roll(roll_die()));
        let scores = tracker.scores;
        self.registry.edit(channel_id, |data| {
            data.tracker_state = Some(tracker);
            data.game_scores = scores;
        });
        if !self.transition(channel_id, TicketState::GameInProgress, "game started", now) {
            return Handling::silent();
        }

        let wins = self.config.game_settings.wins_to_complete;
        let mut replies = Vec::new();
        match opening_roll {
            Some(value) => {
                replies.push(OutboundMessage::new(
                    channel_id,
                    format!("Game on, first to {wins}. I roll first."),
                ));
                replies.push(OutboundMessage::new(channel_id, roll_announcement(value)));
                replies.push(OutboundMessage::new(
                    channel_id,
                    format!("<@{opponent}> your roll, use {dice_command}."),
                ));
            }
            None => replies.push(OutboundMessage::new(
                channel_id,
                format!(
                    "Game on, first to {wins}. <@{opponent}> rolls first, use {dice_command}."
                ),
            )),
        }
        Handling::Handled(replies)
    }

    fn on_roll(
        &mut self,
        ticket: &Ticket,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Handling {
        let Some(mut tracker) = ticket.data.tracker_state.clone() else {
            return Handling::Ignored;
        };
        let opponent = ticket.data.opponent_id.clone().unwrap_or_default();
        let author = event.author.id.as_str();
        if author != opponent && !self.is_dice_bot(author) {
            return Handling::Ignored;
        }
        let Some(roll) = extract::extract_dice_result(&event.content, &event.mentions) else {
            return Handling::Ignored;
        };
        if roll
            .target_id
            .as_deref()
            .is_some_and(|target| target != opponent)
        {
            return Handling::Ignored;
        }

        let mut rolled_now = None;
        let Some(round) = tracker.record_opponent_roll(
            roll.value,
            || {
                let value = roll_die();
                rolled_now = Some(value);
                value
            },
            now,
        ) else {
            return Handling::Ignored;
        };

        let channel_id = ticket.channel_id.as_str();
        let mut replies = Vec::new();
        if let Some(value) = rolled_now {
            replies.push(OutboundMessage::new(channel_id, roll_announcement(value)));
        }
        let verdict = match round.winner {
            Some(Side::Bot) => "my point",
            Some(Side::Opponent) => "your point",
            None => "tie, no point",
        };
        replies.push(OutboundMessage::new(
            channel_id,
            format!(
                "Round {}: {} vs {}, {verdict}. Score {}-{}.",
                round.n,
                round.bot_roll,
                round.opponent_roll,
                round.scores_after.bot,
                round.scores_after.opponent
            ),
        ));

        if !tracker.is_complete() && tracker.awaits_bot_declaration() {
            let value = tracker.declare_bot_roll(roll_die());
            replies.push(OutboundMessage::new(channel_id, roll_announcement(value)));
        }

        let winner = tracker.winner;
        let scores = tracker.scores;
        self.registry.edit(channel_id, |data| {
            data.tracker_state = Some(tracker);
            data.game_scores = scores;
            data.winner = winner;
        });

        match winner {
            None => {}
            Some(Side::Bot) if self.config.game_settings.await_payout => {
                self.settle(channel_id, TicketState::AwaitingPayout, "bot won", now);
                let pot = ticket.pot().unwrap_or_default();
                let address = self.config.own_payout_address().unwrap_or("");
                replies.push(OutboundMessage::new(
                    channel_id,
                    format!(
                        "GG, I win {}-{}. Please send the ${pot} pot to {address}.",
                        scores.bot, scores.opponent
                    ),
                ));
            }
            Some(Side::Bot) => {
                self.settle(channel_id, TicketState::GameComplete, "bot won", now);
                replies.push(OutboundMessage::new(
                    channel_id,
                    format!("GG, I win {}-{}.", scores.bot, scores.opponent),
                ));
                if let Some(vouch) = self
                    .registry
                    .get(channel_id)
                    .and_then(|ticket| attestation(&self.config, ticket))
                {
                    replies.push(vouch);
                }
            }
            Some(Side::Opponent) => {
                self.settle(channel_id, TicketState::GameComplete, "opponent won", now);
                replies.push(OutboundMessage::new(
                    channel_id,
                    format!(
                        "GG <@{opponent}>, you win {}-{}.",
                        scores.opponent, scores.bot
                    ),
                ));
            }
        }
        Handling::Handled(replies)
    }
}
