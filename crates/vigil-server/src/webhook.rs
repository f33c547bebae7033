use serde::Deserialize;

/// The subset of a forge pull-request webhook payload the reactor consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestEvent {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub pull_request: PullRequestInfo,
    #[serde(default)]
    pub sender: Account,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestInfo {
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub user: Account,
}

/// Account types are `Bot` or `User`; the webhook sender casing varies, so
/// comparisons are done lowercased.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub login: String,
    #[serde(default, rename = "type")]
    pub account_type: String,
}

impl Account {
    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.account_type.eq_ignore_ascii_case("bot")
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.account_type.eq_ignore_ascii_case("user")
    }
}
