//! HTTP client for the tenant's backend API.
//!
//! This module provides the [`AgentBackend`] trait the provisioner talks to
//! and [`HttpAgentBackend`], its `reqwest` implementation.

use std::time::Duration;

use agent_csi_core::Flavor;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ProvisionerError, Result};
use crate::procconf::ProcessModuleConfig;
use crate::types::ConnectionInfo;

const INSTALLER_PATH: &str = "v1/deployment/installer/agent";
const ARCH: &str = "x86";
const BITNESS: &str = "64";

/// Trait for backend communication.
///
/// This trait abstracts the backend API, allowing for mock implementations
/// in tests.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Get the tenant's identity and endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    async fn get_connection_info(&self) -> Result<ConnectionInfo>;

    /// Get the latest available agent version for a flavor.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    async fn get_latest_agent_version(&self, flavor: Flavor) -> Result<String>;

    /// Stream the agent ZIP for a flavor into `writer`.
    ///
    /// Downloads `version` if given, the latest version otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the backend rejects it, or
    /// writing fails.
    async fn get_agent(
        &self,
        flavor: Flavor,
        version: Option<&str>,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;

    /// Get the process-module config if it changed since `revision`.
    ///
    /// Returns `None` when the backend reports no change.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects it.
    async fn get_process_module_config(&self, revision: u64)
        -> Result<Option<ProcessModuleConfig>>;
}

/// HTTP client for the backend API.
#[derive(Debug, Clone)]
pub struct HttpAgentBackend {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl HttpAgentBackend {
    /// Create a new backend client.
    ///
    /// # Arguments
    ///
    /// * `api_url` - The tenant's API URL (e.g., "https://abc123.live.dynatrace.com/api")
    /// * `token` - The token sent as `Authorization: Api-Token <token>`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30 * 60))
            .build()
            .map_err(|e| ProvisionerError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, api_url, token))
    }

    /// Create a new backend client with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Get the API URL of the backend.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{INSTALLER_PATH}/{path}", self.api_url)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .query(query)
            .header(reqwest::header::AUTHORIZATION, format!("Api-Token {}", self.token))
            .send()
            .await
            .map_err(|e| ProvisionerError::Backend(format!("Backend request failed: {e}")))
    }

    async fn error_from(response: reqwest::Response) -> ProvisionerError {
        let status = response.status();
        let error = response
            .json::<ErrorResponse>()
            .await
            .map(|e| format!("{} ({})", e.error.message, e.error.code))
            .unwrap_or_else(|_| format!("Backend returned status {status}"));

        tracing::error!(status = %status, error = %error, "Backend request rejected");
        ProvisionerError::Backend(error)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.get(url, query).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProvisionerError::Backend(format!("Failed to parse response: {e}")))
    }
}

/// Error body returned by the backend.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LatestVersionResponse {
    #[serde(rename = "latestAgentVersion")]
    latest_agent_version: String,
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn get_connection_info(&self) -> Result<ConnectionInfo> {
        let info: ConnectionInfo = self.get_json(&self.url("connectioninfo"), &[]).await?;
        tracing::debug!(tenant_uuid = %info.tenant_uuid, "Fetched connection info");
        Ok(info)
    }

    async fn get_latest_agent_version(&self, flavor: Flavor) -> Result<String> {
        let response: LatestVersionResponse = self
            .get_json(
                &self.url("unix/default/latest/metainfo"),
                &[("flavor", flavor.as_str()), ("arch", ARCH)],
            )
            .await?;
        Ok(response.latest_agent_version)
    }

    async fn get_agent(
        &self,
        flavor: Flavor,
        version: Option<&str>,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let url = match version {
            Some(version) => self.url(&format!("unix/paas/version/{version}")),
            None => self.url("unix/paas/latest"),
        };
        let mut response = self
            .get(
                &url,
                &[("flavor", flavor.as_str()), ("arch", ARCH), ("bitness", BITNESS)],
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProvisionerError::Backend(format!("Agent download interrupted: {e}")))?
        {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        tracing::debug!(flavor = %flavor, version = ?version, bytes = written, "Downloaded agent archive");
        Ok(())
    }

    async fn get_process_module_config(
        &self,
        revision: u64,
    ) -> Result<Option<ProcessModuleConfig>> {
        let revision = revision.to_string();
        let response = self
            .get(&self.url("processmoduleconfig"), &[("revision", &revision)])
            .await?;

        match response.status() {
            reqwest::StatusCode::NOT_MODIFIED | reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<ProcessModuleConfig>()
                .await
                .map(Some)
                .map_err(|e| ProvisionerError::Backend(format!("Failed to parse response: {e}"))),
            _ => Err(Self::error_from(response).await),
        }
    }
}

/// Mock backend for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::HashMap;
    use std::io::Write;

    use parking_lot::Mutex;

    use super::{
        async_trait, AgentBackend, AsyncWrite, AsyncWriteExt, ConnectionInfo, Flavor,
        ProcessModuleConfig, ProvisionerError, Result,
    };

    /// A backend serving canned responses.
    pub struct MockBackend {
        connection_info: Mutex<ConnectionInfo>,
        latest_version: Mutex<String>,
        archives: Mutex<HashMap<Flavor, Vec<u8>>>,
        config: Mutex<Option<ProcessModuleConfig>>,
        downloads: Mutex<Vec<(Flavor, Option<String>)>>,
        requested_revisions: Mutex<Vec<u64>>,
        unavailable: Mutex<bool>,
    }

    impl MockBackend {
        /// Create a backend for `tenant_uuid` whose latest version is `version`.
        #[must_use]
        pub fn new(tenant_uuid: &str, version: &str) -> Self {
            Self {
                connection_info: Mutex::new(ConnectionInfo {
                    tenant_uuid: tenant_uuid.to_string(),
                    tenant_token: "tenant-token".to_string(),
                    communication_endpoints: "https://endpoint".to_string(),
                }),
                latest_version: Mutex::new(version.to_string()),
                archives: Mutex::new(HashMap::new()),
                config: Mutex::new(None),
                downloads: Mutex::new(Vec::new()),
                requested_revisions: Mutex::new(Vec::new()),
                unavailable: Mutex::new(false),
            }
        }

        /// Serve `archive` for downloads of `flavor`.
        pub fn set_archive(&self, flavor: Flavor, archive: Vec<u8>) {
            self.archives.lock().insert(flavor, archive);
        }

        /// Change the latest version.
        pub fn set_latest_version(&self, version: &str) {
            *self.latest_version.lock() = version.to_string();
        }

        /// Change the tenant UUID.
        pub fn set_tenant_uuid(&self, tenant_uuid: &str) {
            self.connection_info.lock().tenant_uuid = tenant_uuid.to_string();
        }

        /// Serve `config` to config requests; `None` means no change.
        pub fn set_config(&self, config: Option<ProcessModuleConfig>) {
            *self.config.lock() = config;
        }

        /// Make every request fail.
        pub fn set_unavailable(&self, unavailable: bool) {
            *self.unavailable.lock() = unavailable;
        }

        /// Every `(flavor, version)` downloaded so far.
        #[must_use]
        pub fn downloads(&self) -> Vec<(Flavor, Option<String>)> {
            self.downloads.lock().clone()
        }

        /// Every revision passed to config requests so far.
        #[must_use]
        pub fn requested_revisions(&self) -> Vec<u64> {
            self.requested_revisions.lock().clone()
        }

        fn check_available(&self) -> Result<()> {
            if *self.unavailable.lock() {
                return Err(ProvisionerError::Backend("backend unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AgentBackend for MockBackend {
        async fn get_connection_info(&self) -> Result<ConnectionInfo> {
            self.check_available()?;
            Ok(self.connection_info.lock().clone())
        }

        async fn get_latest_agent_version(&self, _flavor: Flavor) -> Result<String> {
            self.check_available()?;
            Ok(self.latest_version.lock().clone())
        }

        async fn get_agent(
            &self,
            flavor: Flavor,
            version: Option<&str>,
            writer: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<()> {
            self.check_available()?;
            self.downloads
                .lock()
                .push((flavor, version.map(ToString::to_string)));
            let archive = self
                .archives
                .lock()
                .get(&flavor)
                .cloned()
                .ok_or_else(|| ProvisionerError::Backend(format!("no {flavor} archive")))?;
            writer.write_all(&archive).await?;
            writer.flush().await?;
            Ok(())
        }

        async fn get_process_module_config(
            &self,
            revision: u64,
        ) -> Result<Option<ProcessModuleConfig>> {
            self.check_available()?;
            self.requested_revisions.lock().push(revision);
            Ok(self
                .config
                .lock()
                .clone()
                .filter(|config| config.revision != revision))
        }
    }

    /// Build an in-memory ZIP from `(name, contents)` entries.
    ///
    /// Names ending in `/` become directories.
    ///
    /// # Panics
    ///
    /// Panics if the archive cannot be written.
    #[must_use]
    pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, options.unix_permissions(0o755))
                    .expect("add directory");
            } else {
                writer
                    .start_file(*name, options.unix_permissions(0o644))
                    .expect("start file");
                writer.write_all(contents.as_bytes()).expect("write file");
            }
        }
        writer.finish().expect("finish archive").into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> HttpAgentBackend {
        HttpAgentBackend::new(format!("{}/api/", server.uri()), "secret").unwrap()
    }

    #[tokio::test]
    async fn connection_info_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/connectioninfo"))
            .and(header("Authorization", "Api-Token secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tenantUUID": "abc123",
                "tenantToken": "tok",
                "communicationEndpoints": "https://a"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = backend(&server).await.get_connection_info().await.unwrap();
        assert_eq!(info.tenant_uuid, "abc123");
    }

    #[tokio::test]
    async fn latest_version_queries_flavor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/unix/default/latest/metainfo"))
            .and(query_param("flavor", "musl"))
            .and(query_param("arch", "x86"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "latestAgentVersion": "1.2.3" })),
            )
            .mount(&server)
            .await;

        let version = backend(&server)
            .await
            .get_latest_agent_version(Flavor::Musl)
            .await
            .unwrap();
        assert_eq!(version, "1.2.3");
    }

    #[tokio::test]
    async fn agent_download_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/unix/paas/version/1.2.3"))
            .and(query_param("bitness", "64"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-archive".to_vec()))
            .mount(&server)
            .await;

        let mut out = Vec::new();
        backend(&server)
            .await
            .get_agent(Flavor::Default, Some("1.2.3"), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"PK-archive");
    }

    #[tokio::test]
    async fn config_not_modified_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/processmoduleconfig"))
            .and(query_param("revision", "4"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/processmoduleconfig"))
            .and(query_param("revision", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "revision": 4,
                "properties": [{ "section": "general", "key": "a", "value": "b" }]
            })))
            .mount(&server)
            .await;

        let client = backend(&server).await;
        assert_eq!(client.get_process_module_config(4).await.unwrap(), None);

        let config = client.get_process_module_config(0).await.unwrap().unwrap();
        assert_eq!(config.revision, 4);
        assert_eq!(config.to_map()["general"]["a"], "b");
    }

    #[tokio::test]
    async fn error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "code": 401, "message": "Token authentication failed" }
            })))
            .mount(&server)
            .await;

        let err = backend(&server).await.get_connection_info().await.unwrap_err();
        match err {
            ProvisionerError::Backend(msg) => assert!(msg.contains("Token authentication failed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = HttpAgentBackend::new("https://abc.example.com/api/", "t").unwrap();
        assert_eq!(client.api_url(), "https://abc.example.com/api");
        assert_eq!(
            client.url("connectioninfo"),
            "https://abc.example.com/api/v1/deployment/installer/agent/connectioninfo"
        );
    }
}
