use super::{
    Ticket,
    TicketData,
    TicketState,
};
use crate::{
    Result,
    money::Usd,
};
use chrono::{
    DateTime,
    Duration,
    TimeZone,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;

const TERMINAL_RETENTION_HOURS: i64 = 24;
const IDLE_RETENTION_HOURS: i64 = 12;
const CHANNEL_PREFIXES: [&str; 2] = ["ticket-", "order-"];

/// A public offer we countered, waiting for its ticket channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWager {
    pub user_id: String,
    pub username: String,
    pub opponent_bet: Usd,
    pub our_bet: Usd,
    pub source_channel_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub bet_terms_raw: String,
}

/// Plain copy of the registry written to disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub tickets: Vec<Ticket>,
    pub pending_wagers: Vec<(String, PendingWager)>,
    /// `(user id, epoch ms)` of the last snipe.
    pub cooldowns: Vec<(String, i64)>,
}

pub struct TicketRegistry {
    tickets: HashMap<String, Ticket>,
    by_user: HashMap<String, String>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    pending: HashMap<String, PendingWager>,
    pending_ttl: Duration,
    cooldown: Duration,
    dirty: bool,
}

impl TicketRegistry {
    pub fn new(pending_ttl: Duration, cooldown: Duration) -> Self {
        Self {
            tickets: HashMap::new(),
            by_user: HashMap::new(),
            cooldowns: HashMap::new(),
            pending: HashMap::new(),
            pending_ttl,
            cooldown,
            dirty: false,
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<&Ticket> {
        self.tickets.get(channel_id)
    }

    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn active_ticket_for_user(&self, user_id: &str) -> Option<&Ticket> {
        self.by_user
            .get(user_id)
            .and_then(|channel_id| self.tickets.get(channel_id))
    }

    /// Insert a ticket in AWAITING_TICKET; an existing ticket for the channel is
    /// returned unchanged.
    pub fn create_ticket(
        &mut self,
        channel_id: &str,
        opponent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> &Ticket {
        if self.tickets.contains_key(channel_id) {
            tracing::debug!(channel_id, "ticket already exists");
        } else {
            tracing::info!(channel_id, ?opponent_id, "ticket created");
            self.tickets
                .insert(channel_id.to_string(), Ticket::new(channel_id, now));
            self.dirty = true;
            if let Some(user_id) = opponent_id {
                self.set_opponent(channel_id, user_id, now);
            }
        }
        &self.tickets[channel_id]
    }

    /// Record `user_id` as the ticket's opponent, indexing and cooling them down.
    pub fn set_opponent(&mut self, channel_id: &str, user_id: &str, now: DateTime<Utc>) {
        let Some(ticket) = self.tickets.get_mut(channel_id) else {
            return;
        };
        ticket.data.opponent_id = Some(user_id.to_string());
        ticket.updated_at = now;
        self.by_user
            .insert(user_id.to_string(), channel_id.to_string());
        self.cooldowns.insert(user_id.to_string(), now);
        self.dirty = true;
    }

    /// Mutate ticket data outside of a state change.
    pub fn edit(&mut self, channel_id: &str, f: impl FnOnce(&mut TicketData)) -> bool {
        match self.tickets.get_mut(channel_id) {
            Some(ticket) => {
                f(&mut ticket.data);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn transition(
        &mut self,
        channel_id: &str,
        to: TicketState,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(ticket) = self.tickets.get_mut(channel_id) else {
            tracing::warn!(channel_id, %to, "transition for unknown ticket");
            return Ok(());
        };
        ticket.transition(to, note, now)?;
        self.dirty = true;
        if to.is_terminal() {
            if let Some(user_id) = ticket.data.opponent_id.clone() {
                self.release_user(&user_id, channel_id);
            }
        }
        Ok(())
    }

    fn release_user(&mut self, user_id: &str, channel_id: &str) {
        if self.by_user.get(user_id).map(String::as_str) == Some(channel_id) {
            self.by_user.remove(user_id);
        }
    }

    pub fn is_on_cooldown(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns
            .get(user_id)
            .is_some_and(|started| now - *started < self.cooldown)
    }

    pub fn start_cooldown(&mut self, user_id: &str, now: DateTime<Utc>) {
        self.cooldowns.insert(user_id.to_string(), now);
        self.dirty = true;
    }

    pub fn store_pending(&mut self, wager: PendingWager) {
        tracing::info!(
            user_id = %wager.user_id,
            opponent_bet = %wager.opponent_bet,
            our_bet = %wager.our_bet,
            "pending wager stored"
        );
        self.pending.insert(wager.user_id.clone(), wager);
        self.dirty = true;
    }

    fn is_expired(&self, wager: &PendingWager, now: DateTime<Utc>) -> bool {
        now - wager.timestamp >= self.pending_ttl
    }

    /// Consume the pending wager of `user_id`; an expired one is dropped.
    pub fn take_pending(
        &mut self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Option<PendingWager> {
        let wager = self.pending.remove(user_id)?;
        self.dirty = true;
        if self.is_expired(&wager, now) {
            tracing::debug!(user_id, "pending wager expired");
            return None;
        }
        Some(wager)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pick and consume the pending wager a new ticket channel belongs to.
    pub fn correlate_pending(
        &mut self,
        channel_name: &str,
        now: DateTime<Utc>,
    ) -> Option<PendingWager> {
        self.expire_pending(now);
        if self.pending.is_empty() {
            return None;
        }
        let name = channel_name.to_lowercase();
        let stripped = CHANNEL_PREFIXES
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
            .unwrap_or(&name);

        let by_id = self
            .pending
            .keys()
            .find(|user_id| name.contains(&user_id.to_lowercase()));
        let by_username = || {
            self.pending.values().find_map(|wager| {
                let username = wager.username.to_lowercase();
                (!username.is_empty() && stripped.contains(&username))
                    .then(|| wager.user_id.clone())
            })
        };
        let only = || {
            (self.pending.len() == 1)
                .then(|| self.pending.keys().next().cloned())
                .flatten()
        };
        let latest = || {
            self.pending
                .values()
                .max_by_key(|wager| wager.timestamp)
                .map(|wager| wager.user_id.clone())
        };
        let user_id = by_id
            .cloned()
            .or_else(by_username)
            .or_else(only)
            .or_else(latest)?;

        tracing::info!(channel_name, %user_id, "pending wager correlated with ticket");
        self.dirty = true;
        self.pending.remove(&user_id)
    }

    fn expire_pending(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.pending_ttl;
        let before = self.pending.len();
        self.pending.retain(|_, wager| now - wager.timestamp < ttl);
        let removed = before - self.pending.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Drop expired pending wagers and lapsed cooldowns.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cooldown = self.cooldown;
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, started| now - *started < cooldown);
        let removed = self.expire_pending(now) + (before - self.cooldowns.len());
        if removed > 0 {
            self.dirty = true;
            tracing::debug!(removed, "expired pending wagers and cooldowns");
        }
        removed
    }

    /// Archive old terminal tickets and abandon stale ones that hold no money.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let terminal_cutoff = now - Duration::hours(TERMINAL_RETENTION_HOURS);
        let idle_cutoff = now - Duration::hours(IDLE_RETENTION_HOURS);
        let doomed: Vec<String> = self
            .tickets
            .values()
            .filter(|ticket| {
                if ticket.state.funds_at_risk() {
                    if ticket.updated_at < idle_cutoff {
                        tracing::warn!(
                            channel_id = %ticket.channel_id,
                            state = %ticket.state,
                            "stale ticket holds funds; manual review required"
                        );
                    }
                    return false;
                }
                if ticket.is_terminal() {
                    ticket.updated_at < terminal_cutoff
                } else {
                    ticket.updated_at < idle_cutoff
                }
            })
            .map(|ticket| ticket.channel_id.clone())
            .collect();

        for channel_id in &doomed {
            if let Some(ticket) = self.tickets.remove(channel_id) {
                tracing::info!(%channel_id, state = %ticket.state, "ticket removed by cleanup");
                if let Some(user_id) = &ticket.data.opponent_id {
                    self.release_user(user_id, channel_id);
                }
            }
        }
        if !doomed.is_empty() {
            self.dirty = true;
        }
        doomed.len()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut tickets: Vec<Ticket> = self.tickets.values().cloned().collect();
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut pending_wagers: Vec<(String, PendingWager)> = self
            .pending
            .iter()
            .map(|(user_id, wager)| (user_id.clone(), wager.clone()))
            .collect();
        pending_wagers.sort_by(|a, b| a.0.cmp(&b.0));
        let mut cooldowns: Vec<(String, i64)> = self
            .cooldowns
            .iter()
            .map(|(user_id, started)| (user_id.clone(), started.timestamp_millis()))
            .collect();
        cooldowns.sort();
        RegistrySnapshot {
            tickets,
            pending_wagers,
            cooldowns,
        }
    }

    /// Replace the registry contents, rebuilding indices and releasing payment
    /// locks left by the previous process.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.tickets.clear();
        self.by_user.clear();
        for mut ticket in snapshot.tickets {
            if ticket.data.payment_locked {
                tracing::warn!(channel_id = %ticket.channel_id, "clearing stale payment lock");
                ticket.data.payment_locked = false;
            }
            if !ticket.is_terminal() {
                if let Some(user_id) = &ticket.data.opponent_id {
                    self.by_user
                        .insert(user_id.clone(), ticket.channel_id.clone());
                }
            }
            self.tickets.insert(ticket.channel_id.clone(), ticket);
        }
        self.pending = snapshot.pending_wagers.into_iter().collect();
        self.cooldowns = snapshot
            .cooldowns
            .into_iter()
            .filter_map(|(user_id, ms)| {
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .map(|started| (user_id, started))
            })
            .collect();
        self.dirty = false;
        tracing::info!(
            tickets = self.tickets.len(),
            pending = self.pending.len(),
            cooldowns = self.cooldowns.len(),
            "registry restored"
        );
    }

    /// Whether anything changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
