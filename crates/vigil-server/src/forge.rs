// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use vigil_core::{Error, Result};

/// Files touched by a proposal, split by change class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalFiles {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl ProposalFiles {
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        let mut files = self.created.clone();
        files.extend(self.removed.iter().cloned());
        files.extend(self.modified.iter().cloned());
        files
    }
}

/// An open change request on the code forge.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub number: u64,
    pub branch: String,
    pub head_sha: String,
    pub created_at: Option<DateTime<Utc>>,
    pub files: ProposalFiles,
}

impl Proposal {
    #[must_use]
    pub fn all_files(&self) -> Vec<String> {
        self.files.all()
    }
}

/// The code-forge collaborator: proposal CRUD, file listings, comments and
/// reference deletion.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Open a proposal; returns its URL and number.
    async fn open_proposal(&self, title: &str, head: &str, base: &str, body: &str)
        -> Result<(String, u64)>;
    /// Open proposals authored by `author` whose title equals `title`.
    async fn find_proposals(&self, author: &str, title: &str) -> Result<Vec<Proposal>>;
    async fn close_proposal(&self, number: u64, remove_branch: bool) -> Result<()>;
    async fn comment(&self, number: u64, text: &str) -> Result<()>;
    async fn proposal_files(&self, number: u64) -> Result<ProposalFiles>;
    /// Delete a remote reference, e.g. `refs/heads/team/123`.
    async fn delete_ref(&self, reference: &str) -> Result<()>;
    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    #[serde(rename = "ref")]
    reference: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Pull {
    number: u64,
    title: String,
    html_url: String,
    head: PullHead,
    user: PullUser,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
    status: String,
}

/// GitHub client authenticated as a GitHub App: a short-lived RS256 JWT is
/// exchanged for an installation token, cached until shortly before expiry.
pub struct GithubForge {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    integration_id: u64,
    installation_id: u64,
    signing_key: EncodingKey,
    token: Mutex<Option<InstallationToken>>,
}

impl GithubForge {
    pub fn new(
        api_url: String,
        owner: String,
        repo: String,
        integration_id: u64,
        installation_id: u64,
        private_key_pem: &[u8],
    ) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|err| Error::InvalidConfig(format!("invalid forge app key: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| Error::InvalidConfig(format!("unable to build forge client: {err}")))?;
        Ok(Self {
            http,
            api_url,
            owner,
            repo,
            integration_id,
            installation_id,
            signing_key,
            token: Mutex::new(None),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{path}", self.api_url, self.owner, self.repo)
    }

    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now();
        let claims = AppClaims {
            iat: (now - ChronoDuration::seconds(60)).timestamp(),
            exp: (now + ChronoDuration::minutes(9)).timestamp(),
            iss: self.integration_id.to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|err| Error::Forge(format!("unable to sign app jwt: {err}")))
    }

    async fn installation_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() + ChronoDuration::seconds(60) {
                return Ok(token.token.clone());
            }
        }
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, self.installation_id
        );
        let response = self
            .http
            .post(&url)
            .headers(base_headers())
            .header(AUTHORIZATION, format!("Bearer {jwt}"))
            .send()
            .await
            .map_err(|err| Error::Transient(format!("installation token request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(Error::Forge(format!(
                "installation token request returned {}",
                response.status()
            )));
        }
        let token: InstallationToken = response
            .json()
            .await
            .map_err(|err| Error::Forge(format!("invalid installation token response: {err}")))?;
        debug!(expires_at = %token.expires_at, "refreshed installation token");
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.installation_token().await?;
        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(base_headers())
            .header(AUTHORIZATION, format!("token {token}"));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| Error::Transient(format!("forge request {url} failed: {err}")))?;
        if !response.status().is_success() {
            return Err(Error::Forge(format!(
                "forge request {method} {url} returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    headers.insert(USER_AGENT, HeaderValue::from_static("vigil-server"));
    headers
}

/// Classify file entries from the proposal files listing. Renames carry no
/// restorable content change and are dropped.
fn classify_files(entries: Vec<PullFile>) -> ProposalFiles {
    let mut files = ProposalFiles::default();
    for entry in entries {
        match entry.status.as_str() {
            "added" => files.created.push(entry.filename),
            "removed" => files.removed.push(entry.filename),
            "modified" | "changed" => files.modified.push(entry.filename),
            _ => {}
        }
    }
    files
}

#[async_trait]
impl Forge for GithubForge {
    async fn open_proposal(
        &self,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<(String, u64)> {
        let payload = json!({
            "title": title,
            "head": head.trim_start_matches("refs/heads/"),
            "base": base,
            "body": body,
            "maintainer_can_modify": true,
        });
        let response = self
            .request(Method::POST, &self.repo_url("pulls"), Some(payload))
            .await?;
        let pull: Pull = response
            .json()
            .await
            .map_err(|err| Error::Forge(format!("invalid proposal response: {err}")))?;
        info!(number = pull.number, url = %pull.html_url, "proposal opened");
        Ok((pull.html_url, pull.number))
    }

    async fn find_proposals(&self, author: &str, title: &str) -> Result<Vec<Proposal>> {
        let url = self.repo_url("pulls?state=open&per_page=100");
        let response = self.request(Method::GET, &url, None).await?;
        let pulls: Vec<Pull> = response
            .json()
            .await
            .map_err(|err| Error::Forge(format!("invalid proposal listing: {err}")))?;

        let mut proposals = Vec::new();
        for pull in pulls {
            if pull.title != title {
                continue;
            }
            if !author.is_empty() && pull.user.login != author {
                continue;
            }
            let files = self.proposal_files(pull.number).await?;
            proposals.push(Proposal {
                number: pull.number,
                branch: format!("refs/heads/{}", pull.head.reference),
                head_sha: pull.head.sha,
                created_at: pull.created_at,
                files,
            });
        }
        Ok(proposals)
    }

    async fn close_proposal(&self, number: u64, remove_branch: bool) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{number}"));
        let response = self
            .request(Method::PATCH, &url, Some(json!({"state": "closed"})))
            .await?;
        let pull: Pull = response
            .json()
            .await
            .map_err(|err| Error::Forge(format!("invalid close response: {err}")))?;
        if remove_branch {
            let reference = format!("refs/heads/{}", pull.head.reference);
            info!(number, %reference, "removing remote ref for closed proposal");
            if let Err(err) = self.delete_ref(&reference).await {
                error!(number, %err, "unable to remove remote ref");
            }
        }
        Ok(())
    }

    async fn comment(&self, number: u64, text: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        self.request(Method::POST, &url, Some(json!({"body": text})))
            .await?;
        Ok(())
    }

    async fn proposal_files(&self, number: u64) -> Result<ProposalFiles> {
        let url = self.repo_url(&format!("pulls/{number}/files?per_page=100"));
        let response = self.request(Method::GET, &url, None).await?;
        let entries: Vec<PullFile> = response
            .json()
            .await
            .map_err(|err| Error::Forge(format!("invalid files listing: {err}")))?;
        Ok(classify_files(entries))
    }

    async fn delete_ref(&self, reference: &str) -> Result<()> {
        let path = reference.trim_start_matches("refs/");
        let url = self.repo_url(&format!("git/refs/{path}"));
        self.request(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{number}/requested_reviewers"));
        self.request(Method::POST, &url, Some(json!({"reviewers": reviewers})))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_files_by_status() {
        let files = classify_files(vec![
            PullFile {
                filename: "data/team/dashboard-1.json".to_string(),
                status: "modified".to_string(),
            },
            PullFile {
                filename: "config/team.yaml".to_string(),
                status: "added".to_string(),
            },
            PullFile {
                filename: "data/team/monitor-2.json".to_string(),
                status: "removed".to_string(),
            },
            PullFile {
                filename: "data/team/renamed.json".to_string(),
                status: "renamed".to_string(),
            },
        ]);
        assert_eq!(files.created, vec!["config/team.yaml"]);
        assert_eq!(files.removed, vec!["data/team/monitor-2.json"]);
        assert_eq!(files.modified, vec!["data/team/dashboard-1.json"]);
    }

    #[test]
    fn all_files_is_the_union() {
        let files = ProposalFiles {
            created: vec!["a".to_string()],
            removed: vec!["b".to_string()],
            modified: vec!["c".to_string()],
        };
        assert_eq!(files.all(), vec!["a", "b", "c"]);
    }
}
