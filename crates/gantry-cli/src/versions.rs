//! Artifact version lookup against the release-tracking service.
//!
//! The service answers `GET {base}/stages/{stage}/list?artifact=..` with the
//! versions currently promoted to the stage.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use gantry_common::constants::{VERSIONS_CLIENT_ID, VERSIONS_STAGE};
use reqwest::Url;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Artifacts promoted to one stage.
#[derive(Debug, Deserialize)]
pub struct StageArtifacts {
    /// Stage name.
    #[serde(default)]
    pub stage: String,
    /// Promoted artifacts.
    #[serde(default)]
    pub artifacts: Vec<ArtifactVersion>,
}

/// One promoted artifact.
#[derive(Debug, Deserialize)]
pub struct ArtifactVersion {
    /// Artifact name as referenced by plan entries.
    pub artifact_name: String,
    /// Free-text description.
    #[serde(default)]
    pub artifact_description: Option<String>,
    /// Artifact type, such as `DockerImage`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Maven group, for Java artifacts.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Maven artifact id, for Java artifacts.
    #[serde(default)]
    pub artifact_id: Option<String>,
    /// Version promoted to the stage.
    pub version: String,
}

impl StageArtifacts {
    /// Artifact name to version.
    #[must_use]
    pub fn into_versions(self) -> HashMap<String, String> {
        self.artifacts
            .into_iter()
            .map(|a| (a.artifact_name, a.version))
            .collect()
    }
}

/// HTTP client for the version service.
#[derive(Debug)]
pub struct VersionClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl VersionClient {
    /// Builds a client for `base_url`, authenticating with `token` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("gantry/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token,
        })
    }

    /// Fetches the versions of `artifacts` promoted to the integration stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the service answers with a
    /// non-success status, or the body is not the expected JSON.
    pub async fn fetch(&self, artifacts: &[&str]) -> anyhow::Result<HashMap<String, String>> {
        let url = list_url(&self.base_url, artifacts)?;
        tracing::info!(url = %url, artifacts = artifacts.len(), "resolving artifact versions");

        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-ClientId", VERSIONS_CLIENT_ID);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("version service unreachable")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("version service returned HTTP {status}");
        }
        let stage: StageArtifacts = response
            .json()
            .await
            .context("invalid response from version service")?;
        for a in &stage.artifacts {
            tracing::debug!(
                artifact = %a.artifact_name,
                version = %a.version,
                kind = ?a.kind,
                group_id = ?a.group_id,
                artifact_id = ?a.artifact_id,
                description = ?a.artifact_description,
                "resolved"
            );
        }
        Ok(stage.into_versions())
    }
}

/// Listing URL for `artifacts` at the integration stage.
fn list_url(base: &str, artifacts: &[&str]) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(base).with_context(|| format!("invalid version service URL: {base}"))?;
    let _ = url
        .path_segments_mut()
        .map_err(|()| anyhow::anyhow!("version service URL cannot be a base: {base}"))?
        .pop_if_empty()
        .extend(["stages", VERSIONS_STAGE, "list"]);
    {
        let mut query = url.query_pairs_mut();
        for artifact in artifacts {
            let _ = query.append_pair("artifact", artifact);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_url_encodes_stage_and_artifacts() {
        let url = list_url(
            "https://artifactor.artifactz.io",
            &["demo-policy", "demo-customers"],
        )
        .expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://artifactor.artifactz.io/stages/Integration%20Test/list?artifact=demo-policy&artifact=demo-customers"
        );
    }

    #[test]
    fn list_url_keeps_base_path() {
        let url = list_url("http://localhost:8080/api/", &["a"]).expect("valid url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/stages/Integration%20Test/list?artifact=a"
        );
    }

    #[test]
    fn list_url_rejects_garbage() {
        assert!(list_url("not a url", &["a"]).is_err());
    }

    #[test]
    fn stage_listing_maps_names_to_versions() {
        let body = r#"{
            "stage": "Integration Test",
            "artifacts": [
                {"artifact_name": "demo-policy", "type": "DockerImage", "version": "1.0.12"},
                {"artifact_name": "demo-frontend", "artifact_description": "UI",
                 "type": "DockerImage", "group_id": null, "version": "2.3.0"}
            ]
        }"#;
        let stage: StageArtifacts = serde_json::from_str(body).expect("valid json");
        assert_eq!(stage.stage, "Integration Test");
        let versions = stage.into_versions();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions["demo-policy"], "1.0.12");
        assert_eq!(versions["demo-frontend"], "2.3.0");
    }
}
