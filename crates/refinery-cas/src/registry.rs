//! OCI-distribution client for the content-addressed store.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::{verify_digest, CasError};

const OCI_MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(Debug, Clone)]
pub struct CasClient {
    base: Url,
    repo: String,
    auth: Option<(String, String)>,
    client: Client,
}

impl CasClient {
    pub fn new(
        mut base: Url,
        repo: impl Into<String>,
        auth: Option<(String, String)>,
    ) -> Result<Self, CasError> {
        // `Url::join` treats a path without a trailing slash as a file.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let client = Client::builder()
            .user_agent("wheel-refinery")
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            base,
            repo: repo.into(),
            auth,
            client,
        })
    }

    fn manifest_url(&self, digest: &str) -> Result<Url, CasError> {
        Ok(self
            .base
            .join(&format!("v2/{}/manifests/{digest}", self.repo))?)
    }

    fn blob_url(&self, digest: &str) -> Result<Url, CasError> {
        Ok(self.base.join(&format!("v2/{}/blobs/{digest}", self.repo))?)
    }

    fn upload_url(&self) -> Result<Url, CasError> {
        Ok(self.base.join(&format!("v2/{}/blobs/uploads/", self.repo))?)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    /// Probe for an artifact: HEAD on its manifest.
    pub async fn has(&self, digest: &str) -> Result<bool, CasError> {
        let url = self.manifest_url(digest)?;
        let response = self
            .authorized(self.client.head(url.clone()))
            .header("Accept", OCI_MANIFEST_ACCEPT)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(CasError::UnexpectedStatus {
                status,
                context: format!("HEAD {url}"),
            }),
        }
    }

    /// Stream a blob to `dest` and verify its digest before returning.
    pub async fn fetch(&self, digest: &str, dest: &Path) -> Result<(), CasError> {
        let url = self.blob_url(digest)?;
        tracing::debug!("fetching {digest} from {url}");
        let response = self.authorized(self.client.get(url.clone())).send().await?;
        if !response.status().is_success() {
            return Err(CasError::UnexpectedStatus {
                status: response.status(),
                context: format!("GET {url}"),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| CasError::Io(parent.display().to_string(), err))?;
        }
        let io_err = |err| CasError::Io(dest.display().to_string(), err);
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        verify_digest(dest, digest)
    }

    /// Monolithic blob upload: POST to start, PUT the bytes to the returned
    /// location with the digest attached. Returns the canonical blob URL.
    pub async fn push(
        &self,
        digest: &str,
        bytes: Vec<u8>,
        media_type: &str,
    ) -> Result<String, CasError> {
        let start_url = self.upload_url()?;
        let response = self
            .authorized(self.client.post(start_url.clone()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CasError::UnexpectedStatus {
                status: response.status(),
                context: format!("POST {start_url}"),
            });
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| CasError::MissingLocation {
                digest: digest.to_string(),
            })?;

        // The Location may be absolute or base-relative.
        let mut upload_url = if location.starts_with("http://") || location.starts_with("https://")
        {
            Url::parse(location)?
        } else {
            self.base.join(location)?
        };
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let response = self
            .authorized(self.client.put(upload_url.clone()))
            .header(reqwest::header::CONTENT_TYPE, media_type)
            .body(bytes)
            .send()
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(CasError::UnexpectedStatus {
                status: response.status(),
                context: format!("PUT {upload_url}"),
            });
        }

        Ok(self.blob_url(digest)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn client(server: &MockServer) -> CasClient {
        CasClient::new(Url::parse(&server.uri()).unwrap().join("/").unwrap(), "refinery", None)
            .unwrap()
    }

    #[tokio::test]
    async fn has_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/refinery/manifests/sha256:present"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/v2/refinery/manifests/sha256:absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/v2/refinery/manifests/sha256:broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cas = client(&server).await;
        assert!(cas.has("sha256:present").await.unwrap());
        assert!(!cas.has("sha256:absent").await.unwrap());
        assert!(cas.has("sha256:broken").await.is_err());
    }

    #[tokio::test]
    async fn fetch_verifies_bytes() {
        let server = MockServer::start().await;
        let bytes = b"runtime bundle".to_vec();
        let digest = refinery_artifact::sha256_bytes(&bytes);
        Mock::given(method("GET"))
            .and(path(format!("/v2/refinery/blobs/{digest}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob");
        client(&server).await.fetch(&digest, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), bytes);
    }

    #[tokio::test]
    async fn fetch_rejects_tampered_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/refinery/blobs/sha256:expected"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob");
        let err = client(&server)
            .await
            .fetch("sha256:expected", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, CasError::DigestMismatch { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn push_follows_relative_location() {
        let server = MockServer::start().await;
        let bytes = b"wheel bytes".to_vec();
        let digest = refinery_artifact::sha256_bytes(&bytes);
        Mock::given(method("POST"))
            .and(path("/v2/refinery/blobs/uploads/"))
            .respond_with(
                ResponseTemplate::new(202).insert_header("Location", "/v2/refinery/blobs/uploads/session-1"),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v2/refinery/blobs/uploads/session-1"))
            .and(query_param("digest", digest.clone()))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let url = client(&server)
            .await
            .push(&digest, bytes, "application/octet-stream")
            .await
            .unwrap();
        assert!(url.ends_with(&format!("/v2/refinery/blobs/{digest}")));
    }
}
