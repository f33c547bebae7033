#![forbid(unsafe_code)]

pub mod artifact;
pub mod envelope;
pub mod manifest;

pub use crate::artifact::{ArtifactId, ArtifactKind, KindDescriptor};
pub use crate::envelope::{ArtifactEnvelope, MonitorBundle};
pub use crate::manifest::{artifact_file_path, Manifest, ManifestMeta};

pub const CRATE_NAME: &str = "vigil-model";
