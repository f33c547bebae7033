use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of artifact kinds hosted by the monitoring provider.
///
/// The string form appears in file names and envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Dashboard,
    Monitor,
    Screenboard,
    Downtime,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Dashboard,
        ArtifactKind::Monitor,
        ArtifactKind::Screenboard,
        ArtifactKind::Downtime,
    ];

    /// Kinds whose listing endpoint carries `modified` timestamps. The
    /// downtime listing does not, so the pollster cannot watch it.
    pub const POLLABLE: [ArtifactKind; 3] = [
        ArtifactKind::Dashboard,
        ArtifactKind::Monitor,
        ArtifactKind::Screenboard,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Monitor => "monitor",
            Self::Screenboard => "screenboard",
            Self::Downtime => "downtime",
        }
    }

    #[must_use]
    pub const fn descriptor(self) -> KindDescriptor {
        match self {
            Self::Dashboard => KindDescriptor {
                listing_endpoint: "dashboard",
                listing_key: Some("dashboards"),
                object_endpoint: "dash",
                strip_fields: &["dash.modified"],
            },
            Self::Monitor => KindDescriptor {
                listing_endpoint: "monitor",
                listing_key: None,
                object_endpoint: "monitor",
                strip_fields: &["modified", "overall_state", "overall_state_modified"],
            },
            Self::Screenboard => KindDescriptor {
                listing_endpoint: "screen",
                listing_key: Some("screenboards"),
                object_endpoint: "screen",
                strip_fields: &["modified"],
            },
            Self::Downtime => KindDescriptor {
                listing_endpoint: "downtime",
                listing_key: None,
                object_endpoint: "downtime",
                strip_fields: &[],
            },
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard" => Ok(Self::Dashboard),
            "monitor" => Ok(Self::Monitor),
            "screenboard" => Ok(Self::Screenboard),
            "downtime" => Ok(Self::Downtime),
            other => Err(format!("unknown artifact kind `{other}`")),
        }
    }
}

/// Per-kind provider descriptor: where the kind lives in the provider API
/// and which volatile fields are removed before hashing or writing.
#[derive(Debug, Clone, Copy)]
pub struct KindDescriptor {
    /// Listing endpoint relative to the API base.
    pub listing_endpoint: &'static str,
    /// Key wrapping the listing array, when the response is an object.
    pub listing_key: Option<&'static str>,
    /// Endpoint for single-object GET/PUT.
    pub object_endpoint: &'static str,
    /// Dotted paths stripped from fetched payloads.
    pub strip_fields: &'static [&'static str],
}

/// An opaque artifact identifier. The provider assigns numeric or
/// string-shaped ids depending on kind; both are carried as strings with
/// original formatting preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ArtifactId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for ArtifactId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = ArtifactId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer artifact id")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ArtifactId::new(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ArtifactId::new(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ArtifactId::new(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}
