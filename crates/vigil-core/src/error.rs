use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the reconciliation core.
///
/// Policy per kind:
/// - `Transient` is logged; the caller retries on the next tick.
/// - `InvalidConfig` is fatal at startup.
/// - `InvalidManifest` aborts a reload; the previous index is retained.
/// - `InvalidJson` / `InvalidEnvelope` / `MissingId` skip the entry; the
///   batch continues.
/// - `InvalidTeam` skips the entry.
/// - `DirtyWorktree` and `Vcs` abort the current reconciliation and release
///   the working branch.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Transient(String),
    InvalidConfig(String),
    InvalidManifest { path: String, message: String },
    InvalidJson(serde_json::Error),
    InvalidEnvelope(String),
    MissingId(&'static str),
    InvalidTeam(String),
    DirtyWorktree,
    Vcs(String),
    Forge(String),
    Notify(String),
    InvalidWebhook(&'static str),
    Aggregate(Vec<String>),
}

impl Error {
    /// Collapse a list of per-entry error strings into a single error,
    /// or `Ok` when nothing failed.
    pub fn from_messages(messages: Vec<String>) -> Result<()> {
        if messages.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(messages))
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(message) => write!(f, "transient failure: {message}"),
            Self::InvalidConfig(message) => write!(f, "invalid configuration: {message}"),
            Self::InvalidManifest { path, message } => {
                write!(f, "invalid manifest {path}: {message}")
            }
            Self::InvalidJson(err) => write!(f, "invalid json: {err}"),
            Self::InvalidEnvelope(message) => write!(f, "invalid envelope: {message}"),
            Self::MissingId(kind) => write!(f, "{kind} payload has no id"),
            Self::InvalidTeam(context) => write!(f, "empty team: {context}"),
            Self::DirtyWorktree => write!(f, "dirty worktree"),
            Self::Vcs(message) => write!(f, "vcs failure: {message}"),
            Self::Forge(message) => write!(f, "forge failure: {message}"),
            Self::Notify(message) => write!(f, "notification failure: {message}"),
            Self::InvalidWebhook(message) => write!(f, "invalid webhook payload: {message}"),
            Self::Aggregate(messages) => write!(f, "{}", messages.join("; ")),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidJson(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidJson(value)
    }
}
