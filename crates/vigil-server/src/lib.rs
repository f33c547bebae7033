#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod forge;
pub mod http;
pub mod index;
pub mod notify;
pub mod pollster;
pub mod provider;
pub mod vcs;
pub mod version;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::config::SystemConfig;
pub use crate::coordinator::Coordinator;
pub use crate::forge::{Forge, GithubForge, Proposal, ProposalFiles};
pub use crate::http::{build_router, AppState};
pub use crate::index::OwnershipIndex;
pub use crate::pollster::{Change, Pollster};
pub use crate::provider::{DatadogProvider, ModifiedRecord, Provider};
pub use crate::vcs::{GitWorkspace, Vcs};
pub use crate::version::Version;

pub const CRATE_NAME: &str = "vigil-server";

/// The single branch treated as authoritative. All writes reach it only via
/// accepted proposals.
pub const TRACKED_BRANCH: &str = "refs/heads/master";
pub const TRACKED_BASE: &str = "master";
