use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_core::{to_canonical_bytes, Error, Result};

use crate::artifact::ArtifactKind;

/// The on-disk artifact file format: a typed envelope with exactly one
/// payload field populated, matching `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downtime: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenboard: Option<Value>,
}

/// A monitor together with the downtime attached to it, when one exists.
/// The downtime field is always written so the file shape is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorBundle {
    pub monitor: Value,
    #[serde(default)]
    pub downtime: Option<Value>,
}

impl ArtifactEnvelope {
    #[must_use]
    pub fn dashboard(payload: Value) -> Self {
        Self {
            kind: ArtifactKind::Dashboard,
            dashboard: Some(payload),
            monitor: None,
            downtime: None,
            screenboard: None,
        }
    }

    #[must_use]
    pub fn monitor(bundle: MonitorBundle) -> Self {
        Self {
            kind: ArtifactKind::Monitor,
            dashboard: None,
            monitor: Some(bundle),
            downtime: None,
            screenboard: None,
        }
    }

    #[must_use]
    pub fn downtime(payload: Value) -> Self {
        Self {
            kind: ArtifactKind::Downtime,
            dashboard: None,
            monitor: None,
            downtime: Some(payload),
            screenboard: None,
        }
    }

    #[must_use]
    pub fn screenboard(payload: Value) -> Self {
        Self {
            kind: ArtifactKind::Screenboard,
            dashboard: None,
            monitor: None,
            downtime: None,
            screenboard: Some(payload),
        }
    }

    /// Check that exactly one payload field is populated and that it matches
    /// the envelope type.
    pub fn validate(&self) -> Result<()> {
        let populated = [
            self.dashboard.is_some(),
            self.monitor.is_some(),
            self.downtime.is_some(),
            self.screenboard.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        if populated != 1 {
            return Err(Error::InvalidEnvelope(format!(
                "expected exactly one payload, found {populated}"
            )));
        }
        let matches = match self.kind {
            ArtifactKind::Dashboard => self.dashboard.is_some(),
            ArtifactKind::Monitor => self.monitor.is_some(),
            ArtifactKind::Screenboard => self.screenboard.is_some(),
            ArtifactKind::Downtime => self.downtime.is_some(),
        };
        if !matches {
            return Err(Error::InvalidEnvelope(format!(
                "payload does not match envelope type `{}`",
                self.kind
            )));
        }
        Ok(())
    }

    /// Parse and validate an envelope from stored bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serialize to the canonical on-disk byte form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        to_canonical_bytes(self)
    }
}
