//! The relay loop: seed the cursor, then poll, transform, deliver and
//! advance, strictly one message at a time in ascending id order.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cursor::Cursor;
use crate::models::{Message, MessageId};
use crate::sink::DeliveryOutcome;
use crate::transform::{to_payload, DeliveryPayload};

/// Where messages come from. Implementations absorb their own failures and
/// always resolve to a (possibly empty) batch.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// The single most recent message, if the channel has any
    async fn fetch_latest(&self) -> Option<Message>;

    /// Messages newer than `cursor`, oldest first
    async fn fetch_after(&self, cursor: Option<&MessageId>) -> Vec<Message>;
}

/// Where payloads go, one call per message
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, payload: &DeliveryPayload) -> DeliveryOutcome;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub relayed: u64,
    pub dropped: u64,
    /// Fetched messages at or below the cursor, ignored
    pub skipped: u64,
}

pub struct Relay<S, K> {
    source: S,
    sink: K,
    cursor: Cursor,
    poll_interval: Duration,
    stats: RelayStats,
}

impl<S: MessageSource, K: MessageSink> Relay<S, K> {
    pub fn new(source: S, sink: K, poll_interval: Duration) -> Self {
        Self {
            source,
            sink,
            cursor: Cursor::new(),
            poll_interval,
            stats: RelayStats::default(),
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Point the cursor at the newest existing message so only messages
    /// posted from now on are relayed.
    pub async fn seed(&mut self) {
        match self.source.fetch_latest().await {
            Some(latest) => {
                info!("Starting after message {}", latest.id);
                self.cursor.advance(latest.id);
            }
            None => info!("Source channel is empty, relaying from its first message"),
        }
    }

    /// One polling cycle. Returns how many messages were handed to the sink.
    pub async fn poll_once(&mut self) -> usize {
        let batch = self.source.fetch_after(self.cursor.current()).await;
        let mut handled = 0;

        for msg in batch {
            if !self.cursor.is_new(&msg.id) {
                self.stats.skipped += 1;
                debug!("Skipping already relayed message {}", msg.id);
                continue;
            }

            let payload = to_payload(&msg);
            match self.sink.deliver(&payload).await {
                DeliveryOutcome::Delivered => {
                    self.stats.relayed += 1;
                    match msg.timestamp {
                        Some(posted) => info!(
                            "Relayed message {} from {} ({}ms after posting)",
                            msg.id,
                            msg.author.username,
                            (Utc::now() - posted).num_milliseconds()
                        ),
                        None => info!("Relayed message {} from {}", msg.id, msg.author.username),
                    }
                }
                DeliveryOutcome::Rejected { status } => {
                    self.stats.dropped += 1;
                    warn!("Dropping message {}: webhook rejected it ({})", msg.id, status);
                }
                DeliveryOutcome::Unreachable => {
                    self.stats.dropped += 1;
                    warn!("Dropping message {}: webhook unreachable", msg.id);
                }
            }

            // Only after the delivery attempt
            self.cursor.advance(msg.id);
            handled += 1;
        }

        if handled > 0 {
            debug!(
                "Cycle done: cursor={:?} relayed={} dropped={} skipped={}",
                self.cursor.current().map(MessageId::as_str),
                self.stats.relayed,
                self.stats.dropped,
                self.stats.skipped
            );
        }
        handled
    }

    /// Seed, then poll forever. Stops only when the future is dropped.
    pub async fn run(&mut self) {
        self.seed().await;
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
