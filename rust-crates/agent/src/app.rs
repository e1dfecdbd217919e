//! The agent's event loop.

use crate::{
    chat::{
        ChatSink,
        EventSource,
    },
    gate::Treasury,
    outbox::Outbox,
    persistence::{
        PersistenceManager,
        StateSnapshot,
    },
    router::Router,
};
use chrono::Utc;
use std::{
    future::Future,
    time::Duration,
};
use tokio::time::MissedTickBehavior;

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// The chat relay closed its stream.
    Disconnected,
    Interrupted,
}

pub struct Agent<E, K, T> {
    events: E,
    outbox: Outbox<K>,
    router: Router<T>,
    persistence: PersistenceManager,
    payout_poll: Duration,
}


impl<E, K, T> Agent<E, K, T> {
    pub fn new(
        events: E,
        outbox: Outbox<K>,
        router: Router<T>,
        persistence: PersistenceManager,
        payout_poll: Duration,
    ) -> Self {
        Self {
            events,
            outbox,
            router,
            persistence,
            payout_poll,
        }
    }
}

impl<E: EventSource, K: ChatSink, T: Treasury> Agent<E, K, T> {
    /// Process events until the relay closes or `shutdown` resolves, then
    /// flush pending replies and state.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Exit {
        let mut payouts = interval(self.payout_poll);
        let mut cleanup = interval(CLEANUP_INTERVAL);
        let mut sweep = interval(PENDING_SWEEP_INTERVAL);
        let mut shutdown = std::pin::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                event = self.events.next_event() => {
                    match event {
                        Ok(Some(event)) => {
                            let replies = self.router.route(&event, Utc::now()).await;
                            self.outbox.post_all(replies);
                        }
                        Ok(None) => {
                            tracing::info!("chat relay closed");
                            break Exit::Disconnected;
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "chat transport failed");
                            break Exit::Disconnected;
                        }
                    }
                }
                _ = payouts.tick() => {
                    match self.router.desk_mut().check_payouts(Utc::now()).await {
                        Ok(replies) => self.outbox.post_all(replies),
                        Err(err) => tracing::warn!(error = %err, "payout check failed"),
                    }
                }
                _ = cleanup.tick() => {
                    let removed = self.router.desk_mut().registry.cleanup(Utc::now());
                    if removed > 0 {
                        tracing::info!(removed, "stale tickets removed");
                    }
                }
                _ = sweep.tick() => {
                    let registry = &mut self.router.desk_mut().registry;
                    let expired = registry.sweep_expired(Utc::now());
                    if expired > 0 {
                        tracing::debug!(expired, "pending wagers expired");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break Exit::Interrupted;
                }
            }
            self.save_if_dirty();
        };

        let abandoned = self.outbox.flush(SHUTDOWN_FLUSH_TIMEOUT).await;
        if abandoned > 0 {
            tracing::warn!(abandoned, "replies dropped at shutdown");
        }
        let last = StateSnapshot::new(self.router.desk().registry.snapshot());
        if let Err(err) = self.persistence.shutdown(last).await {
            tracing::error!(error = %err, "final state save failed");
        }
        exit
    }

    fn save_if_dirty(&mut self) {
        let registry = &mut self.router.desk_mut().registry;
        if registry.take_dirty() {
            self.persistence
                .request_save(StateSnapshot::new(registry.snapshot()));
        }
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
