use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vigil_core::{Error, Result};
use vigil_model::{artifact_file_path, ArtifactEnvelope, ArtifactId, ArtifactKind, Manifest};

use crate::config::SystemConfig;
use crate::forge::{Forge, Proposal};
use crate::index::OwnershipIndex;
use crate::notify::{Level, Notifier, Target};
use crate::pollster::{Change, ChangeGuard, Pollster};
use crate::provider::Provider;
use crate::vcs::Vcs;
use crate::webhook::PullRequestEvent;
use crate::TRACKED_BASE;

const COMMIT_MESSAGE: &str = "Add modified component files";

/// A batch of artifact ids to reconcile, grouped per kind.
pub type Batch = BTreeMap<ArtifactKind, Vec<ArtifactId>>;

/// The reconciliation engine. For each change event it stages artifact JSON
/// on a working branch, compares against the tracked branch, deduplicates
/// and supersedes in-flight proposals, and opens a new proposal. On proposal
/// close/merge it restores or adopts. All worktree access serializes through
/// the reconciliation mutex.
pub struct Coordinator {
    cfg: Arc<SystemConfig>,
    provider: Arc<dyn Provider>,
    vcs: Arc<dyn Vcs>,
    forge: Arc<dyn Forge>,
    index: Arc<OwnershipIndex>,
    notifier: Notifier,
    recon: Mutex<()>,
}

impl Coordinator {
    pub fn new(
        cfg: Arc<SystemConfig>,
        provider: Arc<dyn Provider>,
        vcs: Arc<dyn Vcs>,
        forge: Arc<dyn Forge>,
        index: Arc<OwnershipIndex>,
        notifier: Notifier,
    ) -> Self {
        Self {
            cfg,
            provider,
            vcs,
            forge,
            index,
            notifier,
            recon: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn index(&self) -> &Arc<OwnershipIndex> {
        &self.index
    }

    /// Run the full reconciliation loop: an initial pass over every loaded
    /// manifest, then consume pollster events until cancelled. Events are
    /// handled inline so the unbuffered stream keeps its backpressure.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let pollster = Pollster::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.index),
            self.cfg.poll_interval,
            Some(Arc::clone(&self) as Arc<dyn ChangeGuard>),
        );
        let mut changes = pollster.spawn(cancel.clone());

        info!("checking provider artifacts against the tracked branch");
        if let Err(err) = self.poll(&self.index.manifests()).await {
            error!(%err, "errors raised during the initial reconciliation pass");
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("shutting down reconciliation loop");
                    return;
                }
                change = changes.recv() => {
                    let Some(change) = change else { return };
                    self.handle_change(change).await;
                }
            }
        }
    }

    async fn handle_change(&self, change: Change) {
        let batch: Batch = BTreeMap::from([(change.kind, vec![change.id.clone()])]);
        if let Err(err) = self
            .create_proposal(
                &change.manifest.meta.team,
                &change.manifest.meta.project,
                &change.manifest.meta.file_path,
                &batch,
            )
            .await
        {
            error!(%err, kind = %change.kind, id = %change.id, "error creating a proposal for detected change");
        }
    }

    /// Run one reconciliation pass over the given manifests; per-manifest
    /// failures are collected, not fatal.
    pub async fn poll(&self, manifests: &[Arc<Manifest>]) -> Result<()> {
        let mut errors = Vec::new();
        for manifest in manifests {
            let batch: Batch = manifest
                .components()
                .into_iter()
                .map(|(kind, ids)| (kind, ids.to_vec()))
                .collect();
            if let Err(err) = self
                .create_proposal(
                    &manifest.meta.team,
                    &manifest.meta.project,
                    &manifest.meta.file_path,
                    &batch,
                )
                .await
            {
                errors.push(err.to_string());
            }
        }
        Error::from_messages(errors)
    }

    /// Reload the ownership index, then reconcile either the given manifests
    /// or, when none are passed, everything the fresh index knows.
    pub async fn reload_and_poll(&self, manifests: Option<Vec<Arc<Manifest>>>) -> Result<()> {
        {
            let _guard = self.recon.lock().await;
            self.index.reload()?;
        }
        let targets = match manifests {
            Some(manifests) if !manifests.is_empty() => manifests,
            _ => self.index.manifests(),
        };
        self.poll(&targets).await
    }

    /// Stage the batch on a fresh working branch and open a proposal when
    /// anything differs from the tracked branch. This is the coordinator's
    /// main entry point.
    pub async fn create_proposal(
        &self,
        team: &str,
        project: &str,
        manifest_path: &str,
        batch: &Batch,
    ) -> Result<()> {
        if batch.values().all(Vec::is_empty) {
            return Ok(());
        }
        let manifest_path = manifest_path.trim_start_matches('/');

        let _guard = self.recon.lock().await;
        debug!(team, project, ?batch, "start preparing a proposal");

        self.vcs.pull_tracked()?;
        if team.is_empty() {
            return Err(Error::InvalidTeam(format!(
                "manifest {manifest_path} with batch {batch:?}"
            )));
        }

        let branch = format!("refs/heads/{team}/{}", unix_nanos());
        self.vcs.create_branch(&branch)?;
        let result = self
            .stage_and_open(team, project, manifest_path, batch, &branch)
            .await;
        // The working branch is released on every exit path.
        if let Err(err) = self.vcs.remove_branch(&branch) {
            error!(%err, %branch, "error removing local working branch");
        }
        result
    }

    async fn stage_and_open(
        &self,
        team: &str,
        project: &str,
        manifest_path: &str,
        batch: &Batch,
        branch: &str,
    ) -> Result<()> {
        self.vcs.checkout(branch, false, false)?;

        for (kind, ids) in batch {
            self.stage_artifacts(team, project, *kind, ids).await?;
        }

        let (clean, patch) = self.vcs.status()?;
        if clean {
            debug!(?batch, "no changes found, skipping");
            return Ok(());
        }

        let (title, body) = prepare_description(
            team,
            &patch,
            manifest_path,
            &self.cfg.proposal_body_extra,
            batch,
        );
        info!(%patch, "a change has been detected");

        let (_, sha) = self.vcs.commit(COMMIT_MESSAGE)?;
        debug!(%sha, "created a staging commit");

        let (duplicates, superseded) = self.find_open_proposals(&title, &sha).await?;
        if !duplicates.is_empty() {
            let numbers: Vec<u64> = duplicates.iter().map(|p| p.number).collect();
            info!(?numbers, "found duplicate proposals, nothing to do");
            return Ok(());
        }
        info!("no duplicate proposals found");

        self.vcs.push(&[branch])?;
        let (url, number) = self
            .forge
            .open_proposal(&title, branch, TRACKED_BASE, &body)
            .await?;

        self.notify_new_proposal(manifest_path, &url).await;
        self.close_superseded(number, &superseded).await;
        Ok(())
    }

    /// Fetch each artifact, wrap it in an envelope and stage the canonical
    /// file. Provider and codec failures skip the entry; VCS failures abort.
    async fn stage_artifacts(
        &self,
        team: &str,
        project: &str,
        kind: ArtifactKind,
        ids: &[ArtifactId],
    ) -> Result<()> {
        for id in ids {
            let path = artifact_file_path(self.cfg.data_path(), kind, team, project, id);
            let envelope = match self.provider.fetch_envelope(kind, id).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    error!(%err, %kind, %id, "unable to fetch artifact, skipping entry");
                    continue;
                }
            };
            let bytes = match envelope.to_bytes() {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!(%err, %kind, %id, "unable to encode artifact, skipping entry");
                    continue;
                }
            };
            self.vcs.write_file(&path, &bytes)?;
            self.vcs.add(&path)?;
        }
        Ok(())
    }

    /// Partition open proposals with the same title into duplicates (no
    /// difference against the new commit, restricted to their files) and
    /// superseded ones.
    async fn find_open_proposals(
        &self,
        title: &str,
        new_sha: &str,
    ) -> Result<(Vec<Proposal>, Vec<Proposal>)> {
        info!(title, "searching open proposals on the forge");
        let proposals = self
            .forge
            .find_proposals(self.cfg.git_user(), title)
            .await?;

        let mut duplicates = Vec::new();
        let mut superseded = Vec::new();
        for proposal in proposals {
            let files = proposal.all_files();
            debug!(number = proposal.number, ?files, "inspecting open proposal");
            let (differ, patch) = self.vcs.diff_commits(&proposal.head_sha, new_sha, &files)?;
            if differ {
                info!(
                    number = proposal.number,
                    %patch,
                    "proposal is superseded by the new commit"
                );
                superseded.push(proposal);
            } else {
                duplicates.push(proposal);
            }
        }
        Ok((duplicates, superseded))
    }

    async fn notify_new_proposal(&self, manifest_path: &str, url: &str) {
        let manifest = match self.index.load_manifest(manifest_path, false) {
            Ok(manifest) => manifest,
            Err(err) => {
                error!(%err, manifest_path, "error retrieving manifest for notification");
                return;
            }
        };
        let message = format!("A new pull request {url} has been created");
        if let Err(err) = self
            .notifier
            .send(
                Level::Info,
                &message,
                "",
                &Target::Channel(manifest.meta.slack.clone()),
            )
            .await
        {
            error!(%err, "error adding a notification");
        }
    }

    /// Close superseded proposals, drop their remote branches and leave a
    /// pointer comment. Failures here are logged but never fatal.
    async fn close_superseded(&self, new_number: u64, proposals: &[Proposal]) {
        for proposal in proposals {
            debug!(number = proposal.number, branch = %proposal.branch, "closing superseded proposal");
            if let Err(err) = self.forge.close_proposal(proposal.number, true).await {
                error!(%err, number = proposal.number, "error closing proposal");
            }
            if let Err(err) = self
                .forge
                .comment(
                    proposal.number,
                    &format!(":warning: **Closed in favor of #{new_number}**"),
                )
                .await
            {
                error!(%err, number = proposal.number, "error commenting on proposal");
            }
        }
    }

    /// Handle a close/merge event from the forge.
    ///
    /// | author | merged | action |
    /// |--------|--------|--------|
    /// | user   | true   | adopt from tracked branch |
    /// | user   | false  | ignore |
    /// | bot    | true   | ignore |
    /// | bot    | false  | adopt (roll back the revert) |
    pub async fn handle_pull_request(&self, event: PullRequestEvent) -> Result<()> {
        if event.pull_request.number == 0 {
            return Err(Error::InvalidWebhook("missing pull request number"));
        }
        let number = event.number;

        if event.action != "closed" {
            info!(number, action = %event.action, "ignoring webhook call");
            return Ok(());
        }
        if event.sender.is_bot() {
            info!(number, sender = %event.sender.login, "ignoring webhook call from a bot sender");
            return Ok(());
        }

        let merged = event.pull_request.merged;
        let author = &event.pull_request.user;
        if (author.is_user() && merged) || (author.is_bot() && !merged) {
            return self.adopt_from_tracked(number).await;
        }
        Ok(())
    }

    /// Apply the now-authoritative tracked-branch state: reload manifests the
    /// proposal touched, then restore the provider from a single qualifying
    /// artifact file.
    async fn adopt_from_tracked(&self, number: u64) -> Result<()> {
        let files = self.forge.proposal_files(number).await.map_err(|err| {
            Error::Forge(format!(
                "unable to extract files from proposal {number}: {err}"
            ))
        })?;
        debug!(
            number,
            created = ?files.created,
            removed = ?files.removed,
            modified = ?files.modified,
            "proposal files"
        );

        // Only modified artifact files trigger provider writes; manifests
        // qualify in every change class.
        let artifact_files = self.filter_artifact_files(&files.modified);
        let manifest_files = self.filter_manifest_files(&files.all());

        if let Err(err) = self.reload_manifests(number, &manifest_files).await {
            error!(%err, number, "unable to reload manifests for proposal");
        }

        // Conservative safety limit: restore only when exactly one artifact
        // file qualifies.
        if artifact_files.len() != 1 {
            return Ok(());
        }

        let result = self.restore_artifacts(number, &artifact_files).await;
        if let Err(err) = &result {
            error!(%err, number, "error restoring artifacts, commenting on proposal");
            if let Err(comment_err) = self
                .notifier
                .send(
                    Level::Error,
                    "Error restoring component",
                    &err.to_string(),
                    &Target::ProposalComment(number),
                )
                .await
            {
                error!(%comment_err, number, "error adding a comment to proposal");
            }
        }
        result
    }

    fn filter_artifact_files(&self, files: &[String]) -> Vec<String> {
        let prefix = format!("{}/", self.cfg.data_path());
        files
            .iter()
            .filter(|file| file.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn filter_manifest_files(&self, files: &[String]) -> Vec<String> {
        let prefix = format!("{}/", self.cfg.manifest_base_path());
        files
            .iter()
            .filter(|file| {
                file.starts_with(&prefix)
                    && (file.ends_with(".yaml") || file.ends_with(".yml"))
            })
            .cloned()
            .collect()
    }

    /// Reload the index for the manifests a proposal touched, run a
    /// follow-up poll and comment the outcome on the proposal.
    async fn reload_manifests(&self, number: u64, manifest_files: &[String]) -> Result<()> {
        if manifest_files.is_empty() {
            return Ok(());
        }

        let mut manifests = Vec::new();
        let mut errors = Vec::new();
        {
            let _guard = self.recon.lock().await;
            for (position, path) in manifest_files.iter().enumerate() {
                match self.index.load_manifest(path, position == 0) {
                    Ok(manifest) => manifests.push(Arc::new(manifest)),
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }
        Error::from_messages(errors)?;

        info!(number, ?manifest_files, "proposal touched manifests, reloading");
        let result = self.reload_and_poll(Some(manifests)).await;

        let (level, title, body) = match &result {
            Ok(()) => (
                Level::Info,
                "Successfully reloaded user config!".to_string(),
                String::new(),
            ),
            Err(err) => (
                Level::Error,
                format!(
                    "Error detected while reloading user config. Config files {manifest_files:?}; Message: ```{err}```"
                ),
                format!("The following errors have been raised: {err}"),
            ),
        };
        if let Err(err) = self
            .notifier
            .send(level, &title, &body, &Target::ProposalComment(number))
            .await
        {
            error!(%err, number, "error commenting on proposal");
        }
        result
    }

    /// Read the files from the tracked branch and PUT their envelopes to the
    /// provider, commenting per file.
    async fn restore_artifacts(&self, number: u64, files: &[String]) -> Result<()> {
        let _guard = self.recon.lock().await;
        self.vcs.pull_tracked()?;

        let mut errors = Vec::new();
        for file in files {
            let body = self.vcs.read_file(file)?;
            let envelope = ArtifactEnvelope::from_slice(&body)?;

            info!(%file, number, "restoring artifact from the tracked branch");
            match self.provider.apply_envelope(&envelope).await {
                Ok(()) => {
                    if let Err(err) = self
                        .notifier
                        .send(
                            Level::Success,
                            &format!("Successfully restored {} file {file}", envelope.kind),
                            "",
                            &Target::ProposalComment(number),
                        )
                        .await
                    {
                        error!(%err, number, "error commenting on proposal");
                    }
                }
                Err(err) => errors.push(err.to_string()),
            }
        }
        Error::from_messages(errors)
    }
}

#[async_trait]
impl ChangeGuard for Coordinator {
    /// Skip changes for artifacts whose canonical file is not already on the
    /// tracked branch; the service only manages what it has been told about.
    async fn component_exists(
        &self,
        kind: ArtifactKind,
        team: &str,
        project: &str,
        id: &ArtifactId,
    ) -> bool {
        let _guard = self.recon.lock().await;
        if let Err(err) = self.vcs.pull_tracked() {
            error!(%err, "error checking component existence, pull failed");
            return false;
        }
        let path = artifact_file_path(self.cfg.data_path(), kind, team, project, id);
        self.vcs.read_file(&path).is_ok()
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos())
}

/// Build the proposal title and body. A batch with exactly one kind and one
/// id gets the kind and id appended to the title and the revert warning in
/// the body.
#[must_use]
pub fn prepare_description(
    team: &str,
    patch: &str,
    manifest_path: &str,
    body_extra: &str,
    batch: &Batch,
) -> (String, String) {
    let mut title = format!(
        "[Automated PR] Update datadog component files owned by [{team}] - {manifest_path}"
    );

    let mut body =
        "Modified component files have been detected and a new PR has been created\n\n"
            .to_string();
    body.push_str(&format!(
        "The following components are different from master branch:\n{patch}"
    ));
    body.push_str("\n\n");

    if batch.len() == 1 {
        if let Some((kind, ids)) = batch.iter().next() {
            if ids.len() == 1 {
                title.push_str(&format!(" {kind} {}", ids[0]));
                body.push_str(
                    ":warning: **Closing this PR will revert all changes made in datadog!!!**",
                );
            }
        }
    }

    if !body_extra.is_empty() {
        body.push_str("\n\n");
        body.push_str(body_extra);
    }

    (title, body)
}
