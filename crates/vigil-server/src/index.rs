use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};
use vigil_core::Result;
use vigil_model::{ArtifactId, ArtifactKind, Manifest};

use crate::vcs::Vcs;

/// An immutable view of the ownership declarations: one map per artifact
/// kind from id to the manifests claiming it, plus the flat manifest list.
#[derive(Default)]
pub struct IndexSnapshot {
    dashboards: HashMap<ArtifactId, Vec<Arc<Manifest>>>,
    monitors: HashMap<ArtifactId, Vec<Arc<Manifest>>>,
    screenboards: HashMap<ArtifactId, Vec<Arc<Manifest>>>,
    downtimes: HashMap<ArtifactId, Vec<Arc<Manifest>>>,
    manifests: Vec<Arc<Manifest>>,
}

impl IndexSnapshot {
    fn map(&self, kind: ArtifactKind) -> &HashMap<ArtifactId, Vec<Arc<Manifest>>> {
        match kind {
            ArtifactKind::Dashboard => &self.dashboards,
            ArtifactKind::Monitor => &self.monitors,
            ArtifactKind::Screenboard => &self.screenboards,
            ArtifactKind::Downtime => &self.downtimes,
        }
    }

    fn map_mut(&mut self, kind: ArtifactKind) -> &mut HashMap<ArtifactId, Vec<Arc<Manifest>>> {
        match kind {
            ArtifactKind::Dashboard => &mut self.dashboards,
            ArtifactKind::Monitor => &mut self.monitors,
            ArtifactKind::Screenboard => &mut self.screenboards,
            ArtifactKind::Downtime => &mut self.downtimes,
        }
    }

    fn insert(&mut self, manifest: Manifest) {
        let manifest = Arc::new(manifest);
        for (kind, ids) in manifest.components() {
            let ids: Vec<ArtifactId> = ids.to_vec();
            let map = self.map_mut(kind);
            for id in ids {
                map.entry(id).or_default().push(Arc::clone(&manifest));
            }
        }
        self.manifests.push(manifest);
    }
}

/// The reloadable mapping from `(kind, id)` to the manifests claiming that
/// artifact, built by crawling the working copy. Readers always see a
/// complete snapshot; a reload swaps the whole snapshot under a narrow lock
/// only after every manifest parsed.
pub struct OwnershipIndex {
    base_path: String,
    vcs: Arc<dyn Vcs>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    reload_lock: Mutex<()>,
}

impl OwnershipIndex {
    pub fn new(vcs: Arc<dyn Vcs>, base_path: &str) -> Self {
        Self {
            base_path: base_path.trim_start_matches('/').to_string(),
            vcs,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            reload_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Rebuild the index from the tracked branch. On any parse error the
    /// reload aborts and the existing snapshot stays in place.
    pub fn reload(&self) -> Result<()> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        info!(base_path = %self.base_path, "reloading ownership index");

        self.vcs.pull_tracked()?;
        let mut files = Vec::new();
        self.find_manifest_files(&self.base_path, &mut files)?;

        let mut fresh = IndexSnapshot::default();
        for path in files {
            let body = self.vcs.read_file(&path)?;
            let manifest = Manifest::from_yaml(&path, &body)?;
            debug!(path = %manifest.meta.file_path, team = %manifest.meta.team, "loaded manifest");
            fresh.insert(manifest);
        }

        let manifest_count = fresh.manifests.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Arc::new(fresh);
        info!(manifest_count, "ownership index reloaded");
        Ok(())
    }

    fn find_manifest_files(&self, path: &str, out: &mut Vec<String>) -> Result<()> {
        for entry in self.vcs.read_dir(path)? {
            let full = format!("{path}/{}", entry.name);
            if entry.is_dir {
                self.find_manifest_files(&full, out)?;
            } else if entry.name.ends_with(".yaml") || entry.name.ends_with(".yml") {
                out.push(full);
            }
        }
        Ok(())
    }

    fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Constant-time point lookup. An unknown id yields an empty list.
    #[must_use]
    pub fn manifests_for(&self, kind: ArtifactKind, id: &ArtifactId) -> Vec<Arc<Manifest>> {
        self.current().map(kind).get(id).cloned().unwrap_or_default()
    }

    /// Every manifest in the current snapshot.
    #[must_use]
    pub fn manifests(&self) -> Vec<Arc<Manifest>> {
        self.current().manifests.clone()
    }

    /// Read a single manifest from the working copy, optionally
    /// fast-forwarding the tracked branch first. Does not touch the index.
    pub fn load_manifest(&self, path: &str, pull: bool) -> Result<Manifest> {
        if pull {
            self.vcs.pull_tracked()?;
        }
        let body = self.vcs.read_file(path)?;
        Manifest::from_yaml(path, &body)
    }
}
