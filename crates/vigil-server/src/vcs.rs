// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    CertificateCheckStatus, Cred, DiffFormat, DiffOptions, FetchOptions, PushOptions,
    RemoteCallbacks, Repository, Signature, StatusOptions,
};
use tracing::{debug, info};
use vigil_core::{Error, Result};

use crate::{TRACKED_BRANCH, TRACKED_BASE};

/// One entry from a directory listing inside the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// The version-control collaborator. All methods are synchronous and must be
/// called under the reconciliation mutex; the working copy is a single
/// shared handle.
pub trait Vcs: Send + Sync {
    /// Fast-forward the tracked branch from origin. Refuses to run on a
    /// dirty worktree.
    fn pull_tracked(&self) -> Result<()>;
    fn create_branch(&self, name: &str) -> Result<()>;
    fn checkout(&self, branch: &str, create: bool, force: bool) -> Result<()>;
    /// Release a working branch: reset the worktree onto the tracked branch
    /// and drop the local ref. Must succeed on every coordinator exit path.
    fn remove_branch(&self, name: &str) -> Result<()>;
    /// Delete a branch on the remote. `name` must begin with `refs/heads/`.
    fn remove_remote_branch(&self, name: &str) -> Result<()>;
    fn write_file(&self, path: &str, body: &[u8]) -> Result<()>;
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>>;
    fn add(&self, path: &str) -> Result<()>;
    /// Commit staged changes as the service identity; returns the commit
    /// summary and sha.
    fn commit(&self, message: &str) -> Result<(String, String)>;
    fn push(&self, branches: &[&str]) -> Result<()>;
    /// Worktree cleanliness plus the status text used in proposal bodies.
    fn status(&self) -> Result<(bool, String)>;
    /// Diff two commits, optionally restricted to the given files. Returns
    /// whether anything differs and the textual patch.
    fn diff_commits(&self, sha_a: &str, sha_b: &str, files: &[String]) -> Result<(bool, String)>;
}

/// SSH credentials and identity for the cloned working copy.
#[derive(Debug, Clone)]
pub struct GitAuth {
    pub ssh_key_pem: String,
    pub user: String,
    pub email: String,
    pub ignore_known_hosts: bool,
}

/// A git2-backed working copy. `git2::Repository` is not `Sync`, so the
/// handle lives behind a mutex; callers already serialize through the
/// reconciliation mutex.
pub struct GitWorkspace {
    repo: Mutex<Repository>,
    workdir: PathBuf,
    auth: GitAuth,
}

impl GitWorkspace {
    /// Clone `url` into `workdir` and return a workspace positioned on the
    /// tracked branch.
    pub fn clone(url: &str, workdir: PathBuf, auth: GitAuth) -> Result<Self> {
        info!(url, workdir = %workdir.display(), "cloning repository");
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks(&auth));
        let repo = RepoBuilder::new()
            .fetch_options(fetch)
            .clone(url, &workdir)
            .map_err(|err| Error::Vcs(format!("unable to clone {url}: {err}")))?;
        Ok(Self {
            repo: Mutex::new(repo),
            workdir,
            auth,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| Error::Vcs("repository lock poisoned".to_string()))
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.workdir.join(path.trim_start_matches('/'))
    }

    fn statuses_text(repo: &Repository) -> Result<(bool, String)> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(|err| Error::Vcs(format!("unable to check worktree status: {err}")))?;
        let mut lines = String::new();
        for entry in statuses.iter() {
            if let Some(path) = entry.path() {
                lines.push_str(&format!("{:?} {path}\n", entry.status()));
            }
        }
        Ok((statuses.is_empty(), lines))
    }

    fn checkout_inner(repo: &Repository, branch: &str, create: bool, force: bool) -> Result<()> {
        if create {
            let head = repo
                .head()
                .and_then(|head| head.peel_to_commit())
                .map_err(|err| Error::Vcs(format!("unable to resolve HEAD: {err}")))?;
            repo.reference(branch, head.id(), false, "create branch")
                .map_err(|err| Error::Vcs(format!("unable to create branch {branch}: {err}")))?;
        }
        repo.set_head(branch)
            .map_err(|err| Error::Vcs(format!("unable to set head to {branch}: {err}")))?;
        let mut checkout = CheckoutBuilder::new();
        if force {
            checkout.force().remove_untracked(true);
        } else {
            checkout.safe();
        }
        repo.checkout_head(Some(&mut checkout))
            .map_err(|err| Error::Vcs(format!("unable to checkout {branch}: {err}")))
    }
}

fn remote_callbacks(auth: &GitAuth) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let key = auth.ssh_key_pem.clone();
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        Cred::ssh_key_from_memory(username_from_url.unwrap_or("git"), None, &key, None)
    });
    if auth.ignore_known_hosts {
        callbacks.certificate_check(|_cert, _host| Ok(CertificateCheckStatus::CertificateOk));
    }
    callbacks
}

impl Vcs for GitWorkspace {
    fn pull_tracked(&self) -> Result<()> {
        let repo = self.lock()?;
        Self::checkout_inner(&repo, TRACKED_BRANCH, false, false)?;
        let (clean, _) = Self::statuses_text(&repo)?;
        if !clean {
            return Err(Error::DirtyWorktree);
        }

        let mut remote = repo
            .find_remote("origin")
            .map_err(|err| Error::Vcs(format!("unable to find remote origin: {err}")))?;
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks(&self.auth));
        remote
            .fetch(&[TRACKED_BASE], Some(&mut fetch), None)
            .map_err(|err| Error::Transient(format!("unable to fetch origin: {err}")))?;

        let fetch_head = repo
            .find_reference("FETCH_HEAD")
            .map_err(|err| Error::Vcs(format!("unable to resolve FETCH_HEAD: {err}")))?;
        let fetched = repo
            .reference_to_annotated_commit(&fetch_head)
            .map_err(|err| Error::Vcs(format!("unable to resolve fetched commit: {err}")))?;
        let (analysis, _) = repo
            .merge_analysis(&[&fetched])
            .map_err(|err| Error::Vcs(format!("merge analysis failed: {err}")))?;
        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(Error::Vcs(
                "tracked branch diverged from origin, refusing non fast-forward".to_string(),
            ));
        }
        let mut reference = repo
            .find_reference(TRACKED_BRANCH)
            .map_err(|err| Error::Vcs(format!("unable to find tracked branch: {err}")))?;
        reference
            .set_target(fetched.id(), "fast-forward")
            .map_err(|err| Error::Vcs(format!("unable to fast-forward: {err}")))?;
        repo.set_head(TRACKED_BRANCH)
            .map_err(|err| Error::Vcs(format!("unable to reset head: {err}")))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .map_err(|err| Error::Vcs(format!("unable to checkout fast-forward: {err}")))?;
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        let repo = self.lock()?;
        let head = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(|err| Error::Vcs(format!("unable to resolve HEAD for {name}: {err}")))?;
        repo.reference(name, head.id(), false, "create branch")
            .map_err(|err| Error::Vcs(format!("unable to create branch {name}: {err}")))?;
        Ok(())
    }

    fn checkout(&self, branch: &str, create: bool, force: bool) -> Result<()> {
        let repo = self.lock()?;
        Self::checkout_inner(&repo, branch, create, force)
    }

    fn remove_branch(&self, name: &str) -> Result<()> {
        let repo = self.lock()?;
        // Force back onto the tracked branch so the ref can always be
        // dropped, even when staging left the worktree dirty.
        Self::checkout_inner(&repo, TRACKED_BRANCH, false, true)?;
        let mut reference = repo
            .find_reference(name)
            .map_err(|err| Error::Vcs(format!("unable to find branch {name}: {err}")))?;
        reference
            .delete()
            .map_err(|err| Error::Vcs(format!("unable to remove branch {name}: {err}")))?;
        Ok(())
    }

    fn remove_remote_branch(&self, name: &str) -> Result<()> {
        if !name.starts_with("refs/heads/") {
            return Err(Error::Vcs(format!("invalid branch ref {name}")));
        }
        let repo = self.lock()?;
        let mut remote = repo
            .find_remote("origin")
            .map_err(|err| Error::Vcs(format!("unable to find remote origin: {err}")))?;
        let refspec = format!(":{name}");
        let mut options = PushOptions::new();
        options.remote_callbacks(remote_callbacks(&self.auth));
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(|err| Error::Transient(format!("unable to remove remote branch {name}: {err}")))
    }

    fn write_file(&self, path: &str, body: &[u8]) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| Error::Vcs(format!("unable to create directory for {path}: {err}")))?;
        }
        fs::write(&full, body).map_err(|err| Error::Vcs(format!("unable to write {path}: {err}")))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .map_err(|err| Error::Vcs(format!("unable to read {path}: {err}")))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let full = self.full_path(path);
        let mut entries = Vec::new();
        let listing = fs::read_dir(&full)
            .map_err(|err| Error::Vcs(format!("unable to read directory {path}: {err}")))?;
        for item in listing {
            let item =
                item.map_err(|err| Error::Vcs(format!("unable to read directory {path}: {err}")))?;
            let name = item.file_name().to_string_lossy().to_string();
            if name == ".git" {
                continue;
            }
            let is_dir = item
                .file_type()
                .map_err(|err| Error::Vcs(format!("unable to stat {name}: {err}")))?
                .is_dir();
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn add(&self, path: &str) -> Result<()> {
        let repo = self.lock()?;
        let mut index = repo
            .index()
            .map_err(|err| Error::Vcs(format!("unable to open index: {err}")))?;
        index
            .add_path(Path::new(path.trim_start_matches('/')))
            .map_err(|err| Error::Vcs(format!("unable to add {path}: {err}")))?;
        index
            .write()
            .map_err(|err| Error::Vcs(format!("unable to write index: {err}")))
    }

    fn commit(&self, message: &str) -> Result<(String, String)> {
        let repo = self.lock()?;
        let mut index = repo
            .index()
            .map_err(|err| Error::Vcs(format!("unable to open index: {err}")))?;
        let tree_id = index
            .write_tree()
            .map_err(|err| Error::Vcs(format!("unable to write tree: {err}")))?;
        let tree = repo
            .find_tree(tree_id)
            .map_err(|err| Error::Vcs(format!("unable to find tree: {err}")))?;
        let parent = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(|err| Error::Vcs(format!("unable to resolve HEAD: {err}")))?;
        let signature = Signature::now(&self.auth.user, &self.auth.email)
            .map_err(|err| Error::Vcs(format!("unable to build signature: {err}")))?;
        let oid = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])
            .map_err(|err| Error::Vcs(format!("unable to commit: {err}")))?;
        debug!(sha = %oid, "created commit");
        Ok((message.to_string(), oid.to_string()))
    }

    fn push(&self, branches: &[&str]) -> Result<()> {
        if branches.is_empty() {
            return Err(Error::Vcs("empty branch list for push".to_string()));
        }
        let repo = self.lock()?;
        let mut remote = repo
            .find_remote("origin")
            .map_err(|err| Error::Vcs(format!("unable to find remote origin: {err}")))?;
        let refspecs: Vec<String> = branches
            .iter()
            .map(|branch| format!("{branch}:{branch}"))
            .collect();
        let refspec_refs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
        let mut options = PushOptions::new();
        options.remote_callbacks(remote_callbacks(&self.auth));
        remote
            .push(&refspec_refs, Some(&mut options))
            .map_err(|err| Error::Transient(format!("unable to push {branches:?}: {err}")))
    }

    fn status(&self) -> Result<(bool, String)> {
        let repo = self.lock()?;
        Self::statuses_text(&repo)
    }

    fn diff_commits(&self, sha_a: &str, sha_b: &str, files: &[String]) -> Result<(bool, String)> {
        let repo = self.lock()?;
        let tree_a = repo
            .find_commit(git2::Oid::from_str(sha_a).map_err(|err| {
                Error::Vcs(format!("invalid commit sha {sha_a}: {err}"))
            })?)
            .and_then(|commit| commit.tree())
            .map_err(|err| Error::Vcs(format!("unable to resolve commit {sha_a}: {err}")))?;
        let tree_b = repo
            .find_commit(git2::Oid::from_str(sha_b).map_err(|err| {
                Error::Vcs(format!("invalid commit sha {sha_b}: {err}"))
            })?)
            .and_then(|commit| commit.tree())
            .map_err(|err| Error::Vcs(format!("unable to resolve commit {sha_b}: {err}")))?;

        let mut options = DiffOptions::new();
        for file in files {
            options.pathspec(file);
        }
        let diff = repo
            .diff_tree_to_tree(Some(&tree_a), Some(&tree_b), Some(&mut options))
            .map_err(|err| Error::Vcs(format!("unable to diff {sha_a}..{sha_b}: {err}")))?;
        if diff.deltas().len() == 0 {
            return Ok((false, String::new()));
        }
        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => patch.push(line.origin()),
                _ => {}
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .map_err(|err| Error::Vcs(format!("unable to render patch: {err}")))?;
        Ok((true, patch))
    }
}
