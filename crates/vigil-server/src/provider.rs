// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use vigil_core::{strip_paths, Error, Result};
use vigil_model::{ArtifactEnvelope, ArtifactId, ArtifactKind, MonitorBundle};

const DATADOG_API: &str = "https://api.datadoghq.com/api/v1";
const API_KEY_FIELD: &str = "api_key";
const APP_KEY_FIELD: &str = "application_key";

/// One `{id, modified}` pair from a provider listing endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifiedRecord {
    pub id: ArtifactId,
    pub modified: DateTime<Utc>,
}

/// A downtime from the provider's downtime listing. Only the fields the
/// service joins on are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct Downtime {
    pub id: i64,
    #[serde(default)]
    pub monitor_id: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub message: String,
}

/// The monitoring provider. Reads produce typed envelopes ready for the
/// working copy; writes restore provider state from an envelope.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn list_modified(&self, kind: ArtifactKind) -> Result<Vec<ModifiedRecord>>;
    async fn fetch_envelope(&self, kind: ArtifactKind, id: &ArtifactId) -> Result<ArtifactEnvelope>;
    async fn apply_envelope(&self, envelope: &ArtifactEnvelope) -> Result<()>;
    async fn list_downtimes(&self) -> Result<Vec<Downtime>>;
}

/// Datadog v1 API client authenticated by api/application key query params.
pub struct DatadogProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

impl DatadogProvider {
    pub fn new(api_key: String, app_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| Error::InvalidConfig(format!("unable to build provider client: {err}")))?;
        Ok(Self {
            http,
            base_url: DATADOG_API.to_string(),
            api_key,
            app_key,
        })
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Vec<u8>> {
        let url = format!("{}/{path}", self.base_url);
        debug!(%method, path, "provider request");
        let mut request = self
            .http
            .request(method.clone(), &url)
            .query(&[(API_KEY_FIELD, &self.api_key), (APP_KEY_FIELD, &self.app_key)]);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| Error::Transient(format!("provider request {path} failed: {err}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| Error::Transient(format!("provider response {path} unreadable: {err}")))?;
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Transient(format!(
                "invalid status code {status} for {method} {path}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(bytes.to_vec())
    }

    /// Fetch one object and strip its volatile fields.
    async fn fetch_raw(&self, kind: ArtifactKind, id: &ArtifactId) -> Result<Value> {
        let descriptor = kind.descriptor();
        let bytes = self
            .request(Method::GET, &format!("{}/{id}", descriptor.object_endpoint), None)
            .await?;
        let mut value: Value = serde_json::from_slice(&bytes)?;
        let strip: Vec<String> = descriptor
            .strip_fields
            .iter()
            .map(ToString::to_string)
            .collect();
        strip_paths(&mut value, &strip);
        Ok(value)
    }

    async fn update_raw(&self, kind: ArtifactKind, payload: &Value) -> Result<()> {
        let id = payload_id(payload).ok_or(Error::MissingId(kind.as_str()))?;
        self.request(
            Method::PUT,
            &format!("{}/{id}", kind.descriptor().object_endpoint),
            Some(payload),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for DatadogProvider {
    async fn list_modified(&self, kind: ArtifactKind) -> Result<Vec<ModifiedRecord>> {
        let descriptor = kind.descriptor();
        let bytes = self.request(Method::GET, descriptor.listing_endpoint, None).await?;
        parse_listing(kind, &bytes)
    }

    async fn fetch_envelope(&self, kind: ArtifactKind, id: &ArtifactId) -> Result<ArtifactEnvelope> {
        match kind {
            ArtifactKind::Dashboard => Ok(ArtifactEnvelope::dashboard(
                self.fetch_raw(kind, id).await?,
            )),
            ArtifactKind::Monitor => {
                let monitor = self.fetch_raw(kind, id).await?;
                let mut downtime = None;
                if let Some(attached) = self
                    .list_downtimes()
                    .await?
                    .into_iter()
                    .find(|d| d.monitor_id.is_some_and(|m| m.to_string() == id.as_str()))
                {
                    downtime = Some(
                        self.fetch_raw(ArtifactKind::Downtime, &ArtifactId::new(attached.id.to_string()))
                            .await?,
                    );
                }
                Ok(ArtifactEnvelope::monitor(MonitorBundle { monitor, downtime }))
            }
            ArtifactKind::Screenboard => Ok(ArtifactEnvelope::screenboard(
                self.fetch_raw(kind, id).await?,
            )),
            ArtifactKind::Downtime => Ok(ArtifactEnvelope::downtime(
                self.fetch_raw(kind, id).await?,
            )),
        }
    }

    async fn apply_envelope(&self, envelope: &ArtifactEnvelope) -> Result<()> {
        envelope.validate()?;
        match envelope.kind {
            ArtifactKind::Dashboard => {
                let payload = envelope
                    .dashboard
                    .as_ref()
                    .ok_or_else(|| Error::InvalidEnvelope("dashboard payload missing".to_string()))?;
                // Dashboard GETs wrap the board under a `dash` key; unwrap
                // before the PUT so the provider sees the bare object.
                let inner = payload.get("dash").unwrap_or(payload);
                self.update_raw(ArtifactKind::Dashboard, inner).await
            }
            ArtifactKind::Monitor => {
                let bundle = envelope
                    .monitor
                    .as_ref()
                    .ok_or_else(|| Error::InvalidEnvelope("monitor payload missing".to_string()))?;
                // Attached downtimes are read-only on the provider side;
                // only the monitor payload is pushed.
                self.update_raw(ArtifactKind::Monitor, &bundle.monitor).await
            }
            ArtifactKind::Screenboard => {
                let payload = envelope
                    .screenboard
                    .as_ref()
                    .ok_or_else(|| Error::InvalidEnvelope("screenboard payload missing".to_string()))?;
                self.update_raw(ArtifactKind::Screenboard, payload).await
            }
            ArtifactKind::Downtime => {
                let payload = envelope
                    .downtime
                    .as_ref()
                    .ok_or_else(|| Error::InvalidEnvelope("downtime payload missing".to_string()))?;
                self.update_raw(ArtifactKind::Downtime, payload).await
            }
        }
    }

    async fn list_downtimes(&self) -> Result<Vec<Downtime>> {
        let bytes = self
            .request(Method::GET, ArtifactKind::Downtime.descriptor().listing_endpoint, None)
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Extract the id a PUT needs from a payload; accepts numeric or string ids.
fn payload_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    id: ArtifactId,
    #[serde(default)]
    modified: String,
}

/// Parse a listing response into `{id, modified}` records. An entry without
/// a `modified` timestamp poisons the whole listing, matching the provider
/// contract that pollable listings always carry one.
pub fn parse_listing(kind: ArtifactKind, bytes: &[u8]) -> Result<Vec<ModifiedRecord>> {
    let entries: Vec<ListingEntry> = match kind.descriptor().listing_key {
        Some(key) => {
            let wrapper: Value = serde_json::from_slice(bytes)?;
            let inner = wrapper
                .get(key)
                .cloned()
                .ok_or_else(|| Error::Transient(format!("{kind} listing missing `{key}` array")))?;
            serde_json::from_value(inner)?
        }
        None => serde_json::from_slice(bytes)?,
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.modified.is_empty() {
            return Err(Error::Transient(format!(
                "{kind} listing entry {} has an empty modified field",
                entry.id
            )));
        }
        let modified = DateTime::parse_from_rfc3339(&entry.modified)
            .map_err(|err| {
                Error::Transient(format!(
                    "unable to parse modified field `{}`: {err}",
                    entry.modified
                ))
            })?
            .with_timezone(&Utc);
        records.push(ModifiedRecord {
            id: entry.id,
            modified,
        });
    }
    Ok(records)
}

/// Select the records modified within `interval` of `now`. The comparison is
/// signed, so a timestamp slightly ahead of the local clock still qualifies.
#[must_use]
pub fn modified_within(
    records: &[ModifiedRecord],
    interval: Duration,
    now: DateTime<Utc>,
) -> Vec<ArtifactId> {
    let Ok(window) = chrono::Duration::from_std(interval) else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|record| now.signed_duration_since(record.modified) < window)
        .map(|record| record.id.clone())
        .collect()
}
