use serde::{Deserialize, Serialize};
use vigil_core::{Error, Result};

use crate::artifact::{ArtifactId, ArtifactKind};

/// User-provided metadata from a manifest. `team` names the owning team and
/// may itself contain slashes; `project` is optional and becomes a path
/// segment; `slack` is an optional notification channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub slack: String,

    /// Relative path of the manifest inside the repository, stamped after
    /// load; never read from the document itself.
    #[serde(skip)]
    pub file_path: String,
}

/// A YAML document declaring which artifact ids a team owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub meta: ManifestMeta,

    #[serde(default)]
    pub dashboards: Vec<ArtifactId>,
    #[serde(default)]
    pub monitors: Vec<ArtifactId>,
    #[serde(default)]
    pub screenboards: Vec<ArtifactId>,
    #[serde(default)]
    pub downtimes: Vec<ArtifactId>,
}

impl Manifest {
    /// Parse a manifest and stamp its repository path.
    pub fn from_yaml(path: &str, body: &[u8]) -> Result<Self> {
        let mut manifest: Manifest =
            serde_yaml::from_slice(body).map_err(|err| Error::InvalidManifest {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        manifest.meta.file_path = path.to_string();
        Ok(manifest)
    }

    /// The declared ids, grouped per kind. Every kind is present; kinds the
    /// manifest does not mention map to an empty list.
    #[must_use]
    pub fn components(&self) -> Vec<(ArtifactKind, &[ArtifactId])> {
        vec![
            (ArtifactKind::Dashboard, self.dashboards.as_slice()),
            (ArtifactKind::Monitor, self.monitors.as_slice()),
            (ArtifactKind::Screenboard, self.screenboards.as_slice()),
            (ArtifactKind::Downtime, self.downtimes.as_slice()),
        ]
    }

    #[must_use]
    pub fn ids(&self, kind: ArtifactKind) -> &[ArtifactId] {
        match kind {
            ArtifactKind::Dashboard => &self.dashboards,
            ArtifactKind::Monitor => &self.monitors,
            ArtifactKind::Screenboard => &self.screenboards,
            ArtifactKind::Downtime => &self.downtimes,
        }
    }
}

/// Canonical repository path for an artifact file:
/// `<data_root>/<team>/<project>/<kind>-<id>.json`, with the project segment
/// omitted when empty. The team segment is an opaque path fragment and may
/// contain slashes.
#[must_use]
pub fn artifact_file_path(
    data_root: &str,
    kind: ArtifactKind,
    team: &str,
    project: &str,
    id: &ArtifactId,
) -> String {
    let root = data_root.trim_start_matches('/');
    if project.is_empty() {
        format!("{root}/{team}/{kind}-{id}.json")
    } else {
        format!("{root}/{team}/{project}/{kind}-{id}.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_with_project() {
        let path = artifact_file_path(
            "data",
            ArtifactKind::Dashboard,
            "foo/bar",
            "test",
            &ArtifactId::new("42"),
        );
        assert_eq!(path, "data/foo/bar/test/dashboard-42.json");
    }

    #[test]
    fn artifact_path_without_project() {
        let path = artifact_file_path(
            "data",
            ArtifactKind::Screenboard,
            "infra/sre",
            "",
            &ArtifactId::new("52"),
        );
        assert_eq!(path, "data/infra/sre/screenboard-52.json");

        let path = artifact_file_path(
            "data",
            ArtifactKind::Monitor,
            "hello/world",
            "",
            &ArtifactId::new("55"),
        );
        assert_eq!(path, "data/hello/world/monitor-55.json");
    }

    #[test]
    fn artifact_path_trims_leading_slash_on_root() {
        let path = artifact_file_path(
            "/data",
            ArtifactKind::Downtime,
            "team",
            "",
            &ArtifactId::new("9"),
        );
        assert_eq!(path, "data/team/downtime-9.json");
    }

    #[test]
    fn artifact_path_is_injective_across_tuples() {
        let tuples = [
            (ArtifactKind::Dashboard, "a", "b", "1"),
            (ArtifactKind::Dashboard, "a", "", "1"),
            (ArtifactKind::Monitor, "a", "b", "1"),
            (ArtifactKind::Dashboard, "a", "b", "2"),
            (ArtifactKind::Dashboard, "a/b", "", "1"),
        ];
        let mut seen = std::collections::HashSet::new();
        for (kind, team, project, id) in tuples {
            let path = artifact_file_path("data", kind, team, project, &ArtifactId::new(id));
            assert!(seen.insert(path));
        }
    }

    #[test]
    fn manifest_parses_numeric_and_string_ids() {
        let yaml = b"meta:\n  team: infra/sre\n  slack: '#alerts'\ndashboards:\n  - 42\n  - abc-def\nmonitors:\n  - 7\n";
        let manifest = Manifest::from_yaml("config/infra.yaml", yaml).expect("parse");
        assert_eq!(manifest.meta.team, "infra/sre");
        assert_eq!(manifest.meta.slack, "#alerts");
        assert_eq!(manifest.meta.file_path, "config/infra.yaml");
        assert_eq!(
            manifest.dashboards,
            vec![ArtifactId::new("42"), ArtifactId::new("abc-def")]
        );
        assert_eq!(manifest.monitors, vec![ArtifactId::new("7")]);
        assert!(manifest.screenboards.is_empty());
        assert!(manifest.downtimes.is_empty());
    }

    #[test]
    fn manifest_with_empty_team_is_accepted_by_the_loader() {
        let yaml = b"dashboards:\n  - 1\n";
        let manifest = Manifest::from_yaml("config/orphan.yml", yaml).expect("parse");
        assert!(manifest.meta.team.is_empty());
    }

    #[test]
    fn malformed_yaml_is_an_invalid_manifest() {
        let err = Manifest::from_yaml("config/bad.yaml", b"meta: [unclosed").expect_err("parse");
        assert!(matches!(err, Error::InvalidManifest { .. }));
    }

    #[test]
    fn components_cover_every_kind() {
        let manifest = Manifest::default();
        let kinds: Vec<ArtifactKind> = manifest.components().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, ArtifactKind::ALL.to_vec());
    }
}
