// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::error;
use vigil_core::{Error, Result};

use crate::notify::{Level, Sender, Target};

const DRAIN_RATE: Duration = Duration::from_secs(1);
const QUEUE_CAPACITY: usize = 500;
const SLACK_POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";

const PRIORITY_LOW: u8 = 1;
const PRIORITY_MEDIUM: u8 = 3;
const PRIORITY_HIGH: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedMessage {
    priority: u8,
    seq: u64,
    pub(crate) title: String,
    body: String,
    channel: String,
    color: &'static str,
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest priority first; FIFO within a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn level_attributes(level: Level) -> (&'static str, u8) {
    match level {
        Level::Info => ("#439FE0", PRIORITY_LOW),
        Level::Success => ("good", PRIORITY_LOW),
        Level::Warning => ("warning", PRIORITY_MEDIUM),
        Level::Error => ("danger", PRIORITY_HIGH),
    }
}

/// Chat-channel sink: messages land in a bounded priority queue and a single
/// drainer task posts at most one per second, so a burst of notifications
/// cannot flood the chat API.
pub struct SlackSender {
    http: reqwest::Client,
    token: String,
    queue: Mutex<BinaryHeap<QueuedMessage>>,
    seq: AtomicU64,
}

impl SlackSender {
    pub fn spawn(token: String, cancel: CancellationToken) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| Error::InvalidConfig(format!("unable to build chat client: {err}")))?;
        let sender = Arc::new(Self {
            http,
            token,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        });
        let drainer = Arc::clone(&sender);
        tokio::spawn(async move {
            drainer.drain(cancel).await;
        });
        Ok(sender)
    }

    async fn drain(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(DRAIN_RATE) => {
                    let Some(message) = self.pop() else { continue };
                    if let Err(err) = self.post(&message).await {
                        error!(%err, channel = %message.channel, "error notifying chat channel");
                    }
                }
            }
        }
    }

    fn pop(&self) -> Option<QueuedMessage> {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop()
    }

    fn enqueue(&self, message: QueuedMessage) -> Result<()> {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.len() >= QUEUE_CAPACITY {
            return Err(Error::Notify("chat queue is full".to_string()));
        }
        queue.push(message);
        Ok(())
    }

    async fn post(&self, message: &QueuedMessage) -> Result<()> {
        let payload = json!({
            "channel": message.channel,
            "attachments": [{
                "color": message.color,
                "pretext": message.title,
                "text": message.body,
            }],
        });
        let response = self
            .http
            .post(SLACK_POST_MESSAGE)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| Error::Transient(format!("chat request failed: {err}")))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| Error::Notify(format!("invalid chat response: {err}")))?;
        if body.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            return Err(Error::Notify(format!(
                "chat API rejected the message: {}",
                body.get("error").and_then(serde_json::Value::as_str).unwrap_or("unknown")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Sender for SlackSender {
    fn handles(&self, target: &Target) -> bool {
        matches!(target, Target::Channel(_))
    }

    async fn send(&self, level: Level, title: &str, body: &str, target: &Target) -> Result<()> {
        let Target::Channel(channel) = target else {
            return Ok(());
        };
        if channel.is_empty() || title.is_empty() {
            return Err(Error::Notify("chat channel and title are required".to_string()));
        }
        let (color, priority) = level_attributes(level);
        self.enqueue(QueuedMessage {
            priority,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            title: title.to_string(),
            body: body.to_string(),
            channel: channel.clone(),
            color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(title: &str, priority: u8, seq: u64) -> QueuedMessage {
        QueuedMessage {
            priority,
            seq,
            title: title.to_string(),
            body: String::new(),
            channel: "#ops".to_string(),
            color: "good",
        }
    }

    #[test]
    fn queue_drains_highest_priority_first() {
        let mut queue = BinaryHeap::new();
        queue.push(message("foo", PRIORITY_HIGH, 0));
        queue.push(message("foo2", 10, 1));
        queue.push(message("foo3", PRIORITY_LOW, 2));

        assert_eq!(queue.pop().expect("first").title, "foo2");
        assert_eq!(queue.pop().expect("second").title, "foo");
        assert_eq!(queue.pop().expect("third").title, "foo3");
    }

    #[test]
    fn queue_is_fifo_within_a_priority() {
        let mut queue = BinaryHeap::new();
        queue.push(message("second", PRIORITY_LOW, 1));
        queue.push(message("first", PRIORITY_LOW, 0));
        queue.push(message("third", PRIORITY_LOW, 2));

        assert_eq!(queue.pop().expect("first").title, "first");
        assert_eq!(queue.pop().expect("second").title, "second");
        assert_eq!(queue.pop().expect("third").title, "third");
    }

    #[test]
    fn levels_map_to_colors_and_priorities() {
        assert_eq!(level_attributes(Level::Info), ("#439FE0", PRIORITY_LOW));
        assert_eq!(level_attributes(Level::Success), ("good", PRIORITY_LOW));
        assert_eq!(level_attributes(Level::Warning), ("warning", PRIORITY_MEDIUM));
        assert_eq!(level_attributes(Level::Error), ("danger", PRIORITY_HIGH));
    }

    #[tokio::test]
    async fn rejects_missing_channel_or_title() {
        let sender = SlackSender::spawn("token".to_string(), CancellationToken::new())
            .expect("spawn");
        let err = sender
            .send(Level::Info, "", "", &Target::Channel("#ops".to_string()))
            .await
            .expect_err("empty title");
        assert!(err.to_string().contains("required"));
    }
}
