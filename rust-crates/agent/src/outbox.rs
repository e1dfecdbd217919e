//! Per-channel send pacing.

use crate::chat::{
    ChatSink,
    OutboundMessage,
};
use std::{
    collections::HashMap,
    time::Duration,
};
use tokio::{
    task::JoinSet,
    time::Instant,
};

/// Hands out send slots at least `gap` apart per channel.
#[derive(Debug)]
pub struct ChannelPacer {
    gap: Duration,
    next_free: HashMap<String, Instant>,
}

impl ChannelPacer {
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            next_free: HashMap::new(),
        }
    }

    /// Claim the earliest slot on `channel_id` not before `now`.
    pub fn reserve(&mut self, channel_id: &str, now: Instant) -> Instant {
        let slot = self
            .next_free
            .get(channel_id)
            .map_or(now, |free| (*free).max(now));
        self.next_free
            .insert(channel_id.to_string(), slot + self.gap);
        slot
    }

    /// Forget channels whose gap has fully elapsed.
    pub fn prune(&mut self, now: Instant) {
        self.next_free.retain(|_, free| *free > now);
    }
}

/// Non-blocking delivery: each message takes its slot immediately and a task
/// sends it when the slot comes up.
pub struct Outbox<K> {
    sink: K,
    pacer: ChannelPacer,
    deliveries: JoinSet<()>,
}

impl<K: ChatSink> Outbox<K> {
    pub fn new(sink: K, gap: Duration) -> Self {
        Self {
            sink,
            pacer: ChannelPacer::new(gap),
            deliveries: JoinSet::new(),
        }
    }

    pub fn post(&mut self, message: OutboundMessage) {
        let now = Instant::now();
        self.pacer.prune(now);
        while self.deliveries.try_join_next().is_some() {}
        let slot = self.pacer.reserve(&message.channel_id, now);
        let sink = self.sink.clone();
        self.deliveries.spawn(async move {
            tokio::time::sleep_until(slot).await;
            let channel_id = message.channel_id.clone();
            if let Err(err) = sink.send(message).await {
                tracing::warn!(%channel_id, error = %err, "failed to deliver message");
            }
        });
    }

    pub fn post_all(&mut self, messages: impl IntoIterator<Item = OutboundMessage>) {
        for message in messages {
            self.post(message);
        }
    }

    /// Wait up to `timeout` for queued messages to go out. Returns how many
    /// were abandoned.
    pub async fn flush(&mut self, timeout: Duration) -> usize {
        let deliveries = &mut self.deliveries;
        let drained = tokio::time::timeout(timeout, async {
            while deliveries.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            return 0;
        }
        let abandoned = self.deliveries.len();
        self.deliveries.abort_all();
        abandoned
    }
}
