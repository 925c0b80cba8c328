//! Version resolution against the package index.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::PlannerError;

/// How already-resolved dependencies are treated on re-plan.
///
/// Both modes currently resolve the same way (latest when unpinned); the
/// variant is threaded through so the behaviors can diverge later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeStrategy {
    #[default]
    Pinned,
    Eager,
}

/// Index dialect. Only the pypi.org JSON API is understood today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexProtocol {
    PypiJson,
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct IndexClient {
    base: Url,
    protocol: IndexProtocol,
    client: Client,
}

#[derive(Deserialize)]
struct ProjectDocument {
    info: ProjectInfo,
}

#[derive(Deserialize)]
struct ProjectInfo {
    version: String,
}

impl IndexClient {
    /// Build a client for `index_url`, detecting the dialect from the host.
    pub fn new(index_url: Url) -> Result<Self, PlannerError> {
        let protocol = match index_url.host_str() {
            Some(host) if host == "pypi.org" || host.ends_with(".pypi.org") => {
                IndexProtocol::PypiJson
            }
            _ => IndexProtocol::Unsupported,
        };
        Self::with_protocol(index_url, protocol)
    }

    /// Build a client with an explicit dialect, for mirrors that speak the
    /// pypi JSON API under another host.
    pub fn with_protocol(base: Url, protocol: IndexProtocol) -> Result<Self, PlannerError> {
        let client = Client::builder()
            .user_agent("wheel-refinery-planner")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base,
            protocol,
            client,
        })
    }

    /// Resolve the latest version of `name`.
    ///
    /// The upgrade strategy is accepted and recorded but does not change the
    /// resolution today.
    pub async fn resolve(
        &self,
        name: &str,
        _strategy: UpgradeStrategy,
    ) -> Result<String, PlannerError> {
        match self.protocol {
            IndexProtocol::Unsupported => Err(PlannerError::UnsupportedIndex(
                self.base.host_str().unwrap_or("<none>").to_string(),
            )),
            IndexProtocol::PypiJson => {
                let mut url = self.base.clone();
                url.set_path(&format!("/pypi/{name}/json"));
                url.set_query(None);
                tracing::debug!("resolving {name} via {url}");
                let response = self.client.get(url).send().await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(PlannerError::PackageNotFound(name.to_string()));
                }
                let document: ProjectDocument = response.error_for_status()?.json().await?;
                Ok(document.info.version)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn resolves_info_version_from_pypi_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pypi/requests/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "info": {"version": "2.32.3", "name": "requests"},
            })))
            .mount(&server)
            .await;

        let client = IndexClient::with_protocol(
            Url::parse(&server.uri()).unwrap(),
            IndexProtocol::PypiJson,
        )
        .unwrap();
        let version = client
            .resolve("requests", UpgradeStrategy::Eager)
            .await
            .unwrap();
        assert_eq!(version, "2.32.3");
    }

    #[tokio::test]
    async fn missing_package_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pypi/nonesuch/json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = IndexClient::with_protocol(
            Url::parse(&server.uri()).unwrap(),
            IndexProtocol::PypiJson,
        )
        .unwrap();
        let err = client
            .resolve("nonesuch", UpgradeStrategy::Pinned)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::PackageNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_hosts_are_unsupported() {
        let client =
            IndexClient::new(Url::parse("https://mirror.example.com/simple").unwrap()).unwrap();
        let err = client
            .resolve("requests", UpgradeStrategy::Pinned)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::UnsupportedIndex(_)));
    }

    #[test]
    fn pypi_hosts_are_detected() {
        let client = IndexClient::new(Url::parse("https://pypi.org/simple").unwrap()).unwrap();
        assert_eq!(client.protocol, IndexProtocol::PypiJson);
    }
}
