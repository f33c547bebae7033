//! Hand-rolled fakes for the external collaborators, shared by the unit
//! tests across modules.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use vigil_core::{Error, Result};
use vigil_model::{ArtifactEnvelope, ArtifactId, ArtifactKind, MonitorBundle};

use crate::forge::{Forge, Proposal, ProposalFiles};
use crate::provider::{Downtime, ModifiedRecord, Provider};
use crate::vcs::{DirEntry, Vcs};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// In-memory working copy: a tracked file map plus a worktree overlay, with
/// an operation log for assertions.
#[derive(Default)]
pub struct FakeVcs {
    tracked: Mutex<BTreeMap<String, Vec<u8>>>,
    worktree: Mutex<BTreeMap<String, Vec<u8>>>,
    staged: Mutex<BTreeSet<String>>,
    ops: Mutex<Vec<String>>,
    commits: AtomicU64,
    diff_result: Mutex<(bool, String)>,
    fail_pull: AtomicBool,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            diff_result: Mutex::new((true, "fake patch".to_string())),
            ..Self::default()
        }
    }

    pub fn put_file(&self, path: &str, body: impl AsRef<[u8]>) {
        lock(&self.tracked).insert(path.to_string(), body.as_ref().to_vec());
        lock(&self.worktree).insert(path.to_string(), body.as_ref().to_vec());
    }

    pub fn remove_file(&self, path: &str) {
        lock(&self.tracked).remove(path);
        lock(&self.worktree).remove(path);
    }

    pub fn tracked_file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.tracked).get(path).cloned()
    }

    pub fn ops(&self) -> Vec<String> {
        lock(&self.ops).clone()
    }

    pub fn set_diff(&self, differ: bool, patch: &str) {
        *lock(&self.diff_result) = (differ, patch.to_string());
    }

    pub fn fail_pulls(&self) {
        self.fail_pull.store(true, Ordering::Relaxed);
    }

    fn record(&self, op: String) {
        lock(&self.ops).push(op);
    }
}

impl Vcs for FakeVcs {
    fn pull_tracked(&self) -> Result<()> {
        if self.fail_pull.load(Ordering::Relaxed) {
            return Err(Error::Transient("synthetic pull failure".to_string()));
        }
        *lock(&self.worktree) = lock(&self.tracked).clone();
        lock(&self.staged).clear();
        self.record("pull_tracked".to_string());
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.record(format!("create_branch {name}"));
        Ok(())
    }

    fn checkout(&self, branch: &str, create: bool, force: bool) -> Result<()> {
        self.record(format!("checkout {branch} create={create} force={force}"));
        Ok(())
    }

    fn remove_branch(&self, name: &str) -> Result<()> {
        *lock(&self.worktree) = lock(&self.tracked).clone();
        lock(&self.staged).clear();
        self.record(format!("remove_branch {name}"));
        Ok(())
    }

    fn remove_remote_branch(&self, name: &str) -> Result<()> {
        if !name.starts_with("refs/heads/") {
            return Err(Error::Vcs(format!("invalid branch ref {name}")));
        }
        self.record(format!("remove_remote_branch {name}"));
        Ok(())
    }

    fn write_file(&self, path: &str, body: &[u8]) -> Result<()> {
        lock(&self.worktree).insert(path.to_string(), body.to_vec());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        lock(&self.worktree)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Vcs(format!("unable to read {path}: no such file")))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        for key in lock(&self.worktree).keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((dir, _)) => {
                        entries.insert(dir.to_string(), true);
                    }
                    None => {
                        entries.insert(rest.to_string(), false);
                    }
                }
            }
        }
        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn add(&self, path: &str) -> Result<()> {
        let worktree = lock(&self.worktree);
        let tracked = lock(&self.tracked);
        if worktree.get(path) != tracked.get(path) {
            lock(&self.staged).insert(path.to_string());
        }
        self.record(format!("add {path}"));
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<(String, String)> {
        let staged: Vec<String> = lock(&self.staged).iter().cloned().collect();
        {
            let worktree = lock(&self.worktree);
            let mut tracked = lock(&self.tracked);
            for path in &staged {
                if let Some(body) = worktree.get(path) {
                    tracked.insert(path.clone(), body.clone());
                }
            }
        }
        lock(&self.staged).clear();
        let number = self.commits.fetch_add(1, Ordering::Relaxed) + 1;
        let sha = format!("sha-{number}");
        self.record(format!("commit {sha}"));
        Ok((message.to_string(), sha))
    }

    fn push(&self, branches: &[&str]) -> Result<()> {
        self.record(format!("push {}", branches.join(",")));
        Ok(())
    }

    fn status(&self) -> Result<(bool, String)> {
        let staged = lock(&self.staged);
        let text = staged
            .iter()
            .map(|path| format!("M {path}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok((staged.is_empty(), text))
    }

    fn diff_commits(&self, _sha_a: &str, _sha_b: &str, _files: &[String]) -> Result<(bool, String)> {
        Ok(lock(&self.diff_result).clone())
    }
}

/// In-memory provider with configurable listings, envelopes and failures.
#[derive(Default)]
pub struct FakeProvider {
    listings: Mutex<HashMap<ArtifactKind, Vec<ModifiedRecord>>>,
    failed_listings: Mutex<HashSet<ArtifactKind>>,
    envelopes: Mutex<HashMap<(ArtifactKind, String), ArtifactEnvelope>>,
    failed_fetches: Mutex<HashSet<String>>,
    fail_apply: AtomicBool,
    applied: Mutex<Vec<ArtifactEnvelope>>,
    downtimes: Mutex<Vec<Downtime>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listing(&self, kind: ArtifactKind, records: Vec<ModifiedRecord>) {
        lock(&self.listings).insert(kind, records);
    }

    pub fn fail_listing(&self, kind: ArtifactKind) {
        lock(&self.failed_listings).insert(kind);
    }

    pub fn set_envelope(&self, kind: ArtifactKind, id: &str, envelope: ArtifactEnvelope) {
        lock(&self.envelopes).insert((kind, id.to_string()), envelope);
    }

    pub fn fail_fetch(&self, id: &str) {
        lock(&self.failed_fetches).insert(id.to_string());
    }

    pub fn fail_applies(&self) {
        self.fail_apply.store(true, Ordering::Relaxed);
    }

    pub fn applied(&self) -> Vec<ArtifactEnvelope> {
        lock(&self.applied).clone()
    }

    fn default_envelope(kind: ArtifactKind, id: &ArtifactId) -> ArtifactEnvelope {
        match kind {
            ArtifactKind::Dashboard => ArtifactEnvelope::dashboard(
                json!({"dash": {"id": id.as_str(), "title": "generated"}}),
            ),
            ArtifactKind::Monitor => ArtifactEnvelope::monitor(MonitorBundle {
                monitor: json!({"id": id.as_str(), "name": "generated"}),
                downtime: None,
            }),
            ArtifactKind::Screenboard => {
                ArtifactEnvelope::screenboard(json!({"id": id.as_str(), "title": "generated"}))
            }
            ArtifactKind::Downtime => {
                ArtifactEnvelope::downtime(json!({"id": id.as_str(), "message": "generated"}))
            }
        }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn list_modified(&self, kind: ArtifactKind) -> Result<Vec<ModifiedRecord>> {
        if lock(&self.failed_listings).contains(&kind) {
            return Err(Error::Transient(format!("synthetic {kind} listing failure")));
        }
        Ok(lock(&self.listings).get(&kind).cloned().unwrap_or_default())
    }

    async fn fetch_envelope(&self, kind: ArtifactKind, id: &ArtifactId) -> Result<ArtifactEnvelope> {
        if lock(&self.failed_fetches).contains(id.as_str()) {
            return Err(Error::Transient(format!("synthetic fetch failure for {id}")));
        }
        Ok(lock(&self.envelopes)
            .get(&(kind, id.as_str().to_string()))
            .cloned()
            .unwrap_or_else(|| Self::default_envelope(kind, id)))
    }

    async fn apply_envelope(&self, envelope: &ArtifactEnvelope) -> Result<()> {
        if self.fail_apply.load(Ordering::Relaxed) {
            return Err(Error::Transient("synthetic apply failure".to_string()));
        }
        lock(&self.applied).push(envelope.clone());
        Ok(())
    }

    async fn list_downtimes(&self) -> Result<Vec<Downtime>> {
        Ok(lock(&self.downtimes).clone())
    }
}

/// A config with required fields filled in; tests override what they need.
pub fn test_config() -> crate::config::SystemConfig {
    crate::config::SystemConfig {
        datadog_api_key: "dd-api".to_string(),
        datadog_app_key: "dd-app".to_string(),
        poll_interval: std::time::Duration::from_secs(20),
        data_path: "data".to_string(),
        manifest_base_path: "/config".to_string(),
        github_base_url: String::new(),
        github_owner: "owner".to_string(),
        github_repo: "repo".to_string(),
        github_integration_id: 1,
        github_installation_id: 2,
        github_private_key_pem: String::new(),
        github_webhook_secret: String::new(),
        http_secret: String::new(),
        http_port: 3000,
        slack_token: String::new(),
        ignore_known_hosts: true,
        proposal_body_extra: String::new(),
        logging_level: String::new(),
        logging_json: false,
    }
}

#[derive(Debug, Clone)]
pub struct OpenedProposal {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub number: u64,
}

/// In-memory forge tracking opened/closed proposals and comments.
#[derive(Default)]
pub struct FakeForge {
    open: Mutex<Vec<(String, Proposal)>>,
    files: Mutex<HashMap<u64, ProposalFiles>>,
    opened: Mutex<Vec<OpenedProposal>>,
    closed: Mutex<Vec<(u64, bool)>>,
    comments: Mutex<HashMap<u64, Vec<String>>>,
    deleted_refs: Mutex<Vec<String>>,
    comment_failures: AtomicU64,
    next_number: AtomicU64,
}

impl FakeForge {
    pub fn new() -> Self {
        Self {
            next_number: AtomicU64::new(101),
            ..Self::default()
        }
    }

    pub fn add_open_proposal(&self, title: &str, proposal: Proposal) {
        lock(&self.open).push((title.to_string(), proposal));
    }

    pub fn set_files(&self, number: u64, files: ProposalFiles) {
        lock(&self.files).insert(number, files);
    }

    pub fn fail_comments(&self, count: u64) {
        self.comment_failures.store(count, Ordering::Relaxed);
    }

    pub fn opened(&self) -> Vec<OpenedProposal> {
        lock(&self.opened).clone()
    }

    pub fn closed(&self) -> Vec<(u64, bool)> {
        lock(&self.closed).clone()
    }

    pub fn comments(&self, number: u64) -> Vec<String> {
        lock(&self.comments).get(&number).cloned().unwrap_or_default()
    }

    pub fn deleted_refs(&self) -> Vec<String> {
        lock(&self.deleted_refs).clone()
    }
}

#[async_trait]
impl Forge for FakeForge {
    async fn open_proposal(
        &self,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<(String, u64)> {
        let number = self.next_number.fetch_add(1, Ordering::Relaxed);
        lock(&self.opened).push(OpenedProposal {
            title: title.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            body: body.to_string(),
            number,
        });
        Ok((format!("https://forge.example/pull/{number}"), number))
    }

    async fn find_proposals(&self, _author: &str, title: &str) -> Result<Vec<Proposal>> {
        Ok(lock(&self.open)
            .iter()
            .filter(|(open_title, _)| open_title == title)
            .map(|(_, proposal)| proposal.clone())
            .collect())
    }

    async fn close_proposal(&self, number: u64, remove_branch: bool) -> Result<()> {
        lock(&self.closed).push((number, remove_branch));
        Ok(())
    }

    async fn comment(&self, number: u64, text: &str) -> Result<()> {
        let remaining = self.comment_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.comment_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(Error::Forge("synthetic comment failure".to_string()));
        }
        lock(&self.comments)
            .entry(number)
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn proposal_files(&self, number: u64) -> Result<ProposalFiles> {
        Ok(lock(&self.files).get(&number).cloned().unwrap_or_default())
    }

    async fn delete_ref(&self, reference: &str) -> Result<()> {
        lock(&self.deleted_refs).push(reference.to_string());
        Ok(())
    }

    async fn request_reviewers(&self, _number: u64, _reviewers: &[String]) -> Result<()> {
        Ok(())
    }
}
