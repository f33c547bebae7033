// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use vigil_core::{Error, Result};

mod comment;
mod slack;

pub use comment::CommentSender;
pub use slack::SlackSender;

/// Severity of a notification; drives emoji, colors and queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

/// Where a notification should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Comment on a proposal by number.
    ProposalComment(u64),
    /// Post to a chat channel.
    Channel(String),
}

/// A notification sink. Each implementation declares which targets it
/// handles; delivery failures surface as `Error::Notify`.
#[async_trait]
pub trait Sender: Send + Sync {
    fn handles(&self, target: &Target) -> bool;
    async fn send(&self, level: Level, title: &str, body: &str, target: &Target) -> Result<()>;
}

/// Dispatches notifications to every sink that handles the target. An empty
/// destination is a no-op, so callers can pass through unset manifest
/// channels without checking.
#[derive(Clone)]
pub struct Notifier {
    senders: Vec<Arc<dyn Sender>>,
}

impl Notifier {
    #[must_use]
    pub fn new(senders: Vec<Arc<dyn Sender>>) -> Self {
        Self { senders }
    }

    pub async fn send(&self, level: Level, title: &str, body: &str, target: &Target) -> Result<()> {
        match target {
            Target::Channel(channel) if channel.is_empty() => return Ok(()),
            Target::ProposalComment(0) => return Ok(()),
            _ => {}
        }
        let mut errors = Vec::new();
        for sender in &self.senders {
            if !sender.handles(target) {
                continue;
            }
            if let Err(err) = sender.send(level, title, body, target).await {
                errors.push(err.to_string());
            }
        }
        Error::from_messages(errors)
    }
}
