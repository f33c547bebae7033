use serde::Serialize;
use std::fmt;

pub const MAJOR: u32 = 0;
pub const MINOR: u32 = 1;
pub const PATCH_SET: u32 = 0;

/// Build metadata served by the version endpoint. The build sha and time are
/// injected at compile time; a binary built without them has no version.
#[derive(Debug, Clone, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch_set: u32,
    pub build_sha: String,
    pub build_time: String,
}

impl Version {
    #[must_use]
    pub fn new(build_sha: String, build_time: String) -> Option<Self> {
        if build_sha.is_empty() || build_time.is_empty() {
            return None;
        }
        Some(Self {
            major: MAJOR,
            minor: MINOR,
            patch_set: PATCH_SET,
            build_sha,
            build_time,
        })
    }

    /// Read the build metadata injected via `VIGIL_BUILD_SHA` and
    /// `VIGIL_BUILD_TIME` at compile time.
    #[must_use]
    pub fn from_build_env() -> Option<Self> {
        Self::new(
            option_env!("VIGIL_BUILD_SHA").unwrap_or_default().to_string(),
            option_env!("VIGIL_BUILD_TIME").unwrap_or_default().to_string(),
        )
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} - {} ; built on {}",
            self.major, self.minor, self.patch_set, self.build_sha, self.build_time
        )
    }
}
