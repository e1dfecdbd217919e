//! Decides which stage of the pipeline sees each inbound chat event.

use crate::{
    chat::{
        ChatEvent,
        Handling,
        OutboundMessage,
    },
    gate::Treasury,
    handler::Desk,
};
use chrono::{
    DateTime,
    Utc,
};
use std::collections::{
    HashSet,
    VecDeque,
};

pub const DEDUP_CAPACITY: usize = 500;

/// Remembers the last `capacity` message ids.
#[derive(Debug)]
pub struct SeenMessages {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    /// `true` the first time `id` is seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

pub struct Router<T> {
    desk: Desk<T>,
    seen: SeenMessages,
}

impl<T: Treasury> Router<T> {
    pub fn new(desk: Desk<T>) -> Self {
        Self {
            desk,
            seen: SeenMessages::new(DEDUP_CAPACITY),
        }
    }

    pub fn desk(&self) -> &Desk<T> {
        &self.desk
    }

    pub fn desk_mut(&mut self) -> &mut Desk<T> {
        &mut self.desk
    }

    /// Route one event and return the replies to post.
    pub async fn route(
        &mut self,
        event: &ChatEvent,
        now: DateTime<Utc>,
    ) -> Vec<OutboundMessage> {
        if !self.seen.insert(&event.id) {
            tracing::debug!(message_id = %event.id, "duplicate delivery dropped");
            return Vec::new();
        }
        if event.author.id == self.desk.bot_id {
            return Vec::new();
        }
        if event.is_direct() {
            return self.desk.handle_direct(event).await.into_messages();
        }
        if event.author.bot && !self.desk.is_dice_bot(&event.author.id) {
            return Vec::new();
        }

        let channel_id = event.channel.id.as_str();
        if self.desk.registry.get(channel_id).is_some() {
            return self
                .desk
                .handle_ticket_message(event, now)
                .await
                .into_messages();
        }
        if let Handling::Handled(replies) = self.desk.detect_ticket(event, now).await {
            return replies;
        }
        if !self.desk.is_monitored(channel_id) {
            return Vec::new();
        }
        self.desk.snipe(event, now).into_messages()
    }
}
