use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_model::{ArtifactId, ArtifactKind, Manifest};

use crate::index::OwnershipIndex;
use crate::provider::{modified_within, Provider};

/// One reconciliation event: an artifact changed on the provider side and a
/// manifest claims it. One event is emitted per claiming manifest.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ArtifactKind,
    pub id: ArtifactId,
    pub manifest: Arc<Manifest>,
}

/// Coordinator-supplied predicate deciding whether a detected change should
/// be emitted at all; used to skip artifacts whose canonical file is not on
/// the tracked branch.
#[async_trait]
pub trait ChangeGuard: Send + Sync {
    async fn component_exists(
        &self,
        kind: ArtifactKind,
        team: &str,
        project: &str,
        id: &ArtifactId,
    ) -> bool;
}

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Periodic change-detection scheduler. Every `interval` it fetches the
/// pollable listings, selects ids modified within the last interval, joins
/// them against the ownership index and emits `Change`s on an unbuffered
/// stream; the send suspends until the consumer is ready, which is the
/// backpressure mechanism.
pub struct Pollster {
    provider: Arc<dyn Provider>,
    index: Arc<OwnershipIndex>,
    interval: Duration,
    guard: Option<Arc<dyn ChangeGuard>>,
    now_fn: NowFn,
}

impl Pollster {
    pub fn new(
        provider: Arc<dyn Provider>,
        index: Arc<OwnershipIndex>,
        interval: Duration,
        guard: Option<Arc<dyn ChangeGuard>>,
    ) -> Self {
        Self {
            provider,
            index,
            interval,
            guard,
            now_fn: Arc::new(Utc::now),
        }
    }

    /// Pin the clock; used by tests to make the modification window
    /// deterministic.
    #[must_use]
    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Start the polling task. The returned stream has no buffering beyond a
    /// single in-flight element; dropping the receiver stops the task, as
    /// does cancelling `cancel`.
    pub fn spawn(self, cancel: CancellationToken) -> mpsc::Receiver<Change> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(cancel, tx).await;
        });
        rx
    }

    async fn run(self, cancel: CancellationToken, tx: mpsc::Sender<Change>) {
        info!(interval = ?self.interval, "start polling provider for changes");
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    warn!("shutting down pollster");
                    return;
                }
                _ = ticker.tick() => {
                    debug!("start polling provider for changes");
                    if !self.tick(&tx).await {
                        return;
                    }
                }
            }
        }
    }

    /// One poll pass. Returns `false` once the consumer is gone.
    async fn tick(&self, tx: &mpsc::Sender<Change>) -> bool {
        let (dashboards, monitors, screenboards) = tokio::join!(
            self.modified_ids(ArtifactKind::Dashboard),
            self.modified_ids(ArtifactKind::Monitor),
            self.modified_ids(ArtifactKind::Screenboard),
        );
        let per_kind = [
            (ArtifactKind::Dashboard, dashboards),
            (ArtifactKind::Monitor, monitors),
            (ArtifactKind::Screenboard, screenboards),
        ];
        for (kind, ids) in per_kind {
            let ids = match ids {
                Ok(ids) => ids,
                Err(err) => {
                    // One kind failing must not starve the others.
                    error!(%kind, %err, "listing failed, skipping kind for this tick");
                    continue;
                }
            };
            if !self.emit(kind, ids, tx).await {
                return false;
            }
        }
        true
    }

    async fn modified_ids(&self, kind: ArtifactKind) -> vigil_core::Result<Vec<ArtifactId>> {
        let records = self.provider.list_modified(kind).await?;
        Ok(modified_within(&records, self.interval, (self.now_fn)()))
    }

    async fn emit(&self, kind: ArtifactKind, ids: Vec<ArtifactId>, tx: &mpsc::Sender<Change>) -> bool {
        for id in ids {
            // One event per manifest claiming the id.
            for manifest in self.index.manifests_for(kind, &id) {
                debug!(%kind, %id, manifest = %manifest.meta.file_path, "detected a change");
                if let Some(guard) = &self.guard {
                    let allowed = guard
                        .component_exists(kind, &manifest.meta.team, &manifest.meta.project, &id)
                        .await;
                    if !allowed {
                        debug!(%kind, %id, "change is not tracked, skipping");
                        continue;
                    }
                }
                let change = Change {
                    kind,
                    id: id.clone(),
                    manifest,
                };
                if tx.send(change).await.is_err() {
                    return false;
                }
            }
        }
        true
    }
}
