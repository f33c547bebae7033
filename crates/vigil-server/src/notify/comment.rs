// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use vigil_core::{Error, Result};

use crate::forge::Forge;
use crate::notify::{Level, Sender, Target};

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Proposal-comment sink: renders a per-level emoji prefix and retries with
/// linear backoff before giving up.
pub struct CommentSender {
    forge: Arc<dyn Forge>,
    max_retries: usize,
    timeout: Duration,
}

impl CommentSender {
    #[must_use]
    pub fn new(forge: Arc<dyn Forge>, max_retries: usize, timeout: Duration) -> Self {
        Self {
            forge,
            max_retries: if max_retries == 0 {
                DEFAULT_MAX_RETRIES
            } else {
                max_retries
            },
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
        }
    }
}

fn render_comment(level: Level, title: &str, body: &str) -> String {
    let mut comment = match level {
        Level::Success => format!(":white_check_mark: {title}"),
        Level::Info => format!(":information_source: {title}"),
        Level::Warning => format!(":warning: **{title}**"),
        Level::Error => format!(":stop_sign: **{title}**"),
    };
    if !body.is_empty() {
        comment.push_str(&format!("\n```{body}```"));
    }
    comment
}

#[async_trait]
impl Sender for CommentSender {
    fn handles(&self, target: &Target) -> bool {
        matches!(target, Target::ProposalComment(_))
    }

    async fn send(&self, level: Level, title: &str, body: &str, target: &Target) -> Result<()> {
        let Target::ProposalComment(number) = target else {
            return Ok(());
        };
        let comment = render_comment(level, title, body);

        let mut errors = Vec::new();
        for attempt in 0..self.max_retries {
            let result =
                tokio::time::timeout(self.timeout, self.forge.comment(*number, &comment)).await;
            match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => errors.push(err.to_string()),
                Err(_) => errors.push("comment timed out".to_string()),
            }
            warn!(number, attempt, "proposal comment failed, backing off");
            tokio::time::sleep(BACKOFF_STEP * attempt as u32).await;
        }
        Err(Error::Notify(format!(
            "reached max retries {} with the following errors: {}",
            self.max_retries,
            errors.join("; ")
        )))
    }
}
