//! Client for the control-plane HTTP API.
//!
//! Workers use this to lease builds, persist plans, and report everything
//! they observe. Reporting paths are best-effort: callers log failures and
//! continue rather than wedging a build on a flaky control plane.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use refinery_types::{
    BuildOutcome, BuildRequest, Event, Heartbeat, Hint, LogEntry, ManifestEntry, PlanSnapshot,
    Settings,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid control plane URL")]
    Url(#[from] url::ParseError),
    #[error("control plane request failed")]
    Request(#[from] reqwest::Error),
    #[error("control plane returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ControlPlane {
    base: Url,
    token: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ReportBody<'a> {
    package: &'a str,
    version: &'a str,
    #[serde(flatten)]
    outcome: &'a BuildOutcome,
}

#[derive(Debug, serde::Deserialize)]
pub struct SavedPlan {
    pub id: i64,
    #[serde(default)]
    pub seeded: i64,
}

impl ControlPlane {
    pub fn new(mut base: Url, token: Option<String>) -> Result<Self, ClientError> {
        // Relative joins need the base path to end with a slash.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let client = Client::builder()
            .user_agent("refinery-worker")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base,
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let url = self.url(path)?;
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let url = self.url(path)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    /// Persist a plan; the control plane seeds build rows and returns the id.
    pub async fn save_plan(&self, snapshot: &PlanSnapshot) -> Result<SavedPlan, ClientError> {
        self.post_json("api/plans", snapshot).await
    }

    pub async fn latest_plan(&self) -> Result<PlanSnapshot, ClientError> {
        self.get_json("api/plans/latest").await
    }

    /// Lease up to `max` build rows, returned as queue-shaped requests.
    pub async fn pop_builds(&self, max: usize) -> Result<Vec<BuildRequest>, ClientError> {
        self.post_json("api/builds/pop", &serde_json::json!({ "max": max }))
            .await
    }

    pub async fn report_status(
        &self,
        package: &str,
        version: &str,
        outcome: &BuildOutcome,
    ) -> Result<(), ClientError> {
        let body = ReportBody {
            package,
            version,
            outcome,
        };
        let _: serde_json::Value = self.post_json("api/builds/report", &body).await?;
        Ok(())
    }

    pub async fn post_event(&self, event: &Event) -> Result<(), ClientError> {
        let _: serde_json::Value = self.post_json("api/events", event).await?;
        Ok(())
    }

    pub async fn post_manifest(&self, entry: &ManifestEntry) -> Result<(), ClientError> {
        let _: serde_json::Value = self.post_json("api/manifest", entry).await?;
        Ok(())
    }

    pub async fn post_log(&self, entry: &LogEntry) -> Result<(), ClientError> {
        let _: serde_json::Value = self.post_json("api/logs", entry).await?;
        Ok(())
    }

    pub async fn upsert_hint(&self, hint: &Hint) -> Result<(), ClientError> {
        let _: serde_json::Value = self.post_json("api/hints", hint).await?;
        Ok(())
    }

    pub async fn get_hint(&self, id: &str) -> Result<Hint, ClientError> {
        self.get_json(&format!("api/hints/{id}")).await
    }

    pub async fn list_hints(&self) -> Result<Vec<Hint>, ClientError> {
        self.get_json("api/hints").await
    }

    pub async fn fetch_settings(&self) -> Result<Settings, ClientError> {
        self.get_json("api/settings").await
    }

    pub async fn heartbeat(&self, beat: &Heartbeat) -> Result<(), ClientError> {
        let _: serde_json::Value = self.post_json("api/heartbeat", beat).await?;
        Ok(())
    }

    /// Flip a pending input to a new lifecycle status.
    pub async fn mark_pending(&self, id: i64, status: &str) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("api/inputs/{id}/status"),
                &serde_json::json!({ "status": status }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn control_plane(server: &MockServer, token: Option<&str>) -> ControlPlane {
        ControlPlane::new(
            Url::parse(&server.uri()).unwrap().join("/").unwrap(),
            token.map(String::from),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bearer_token_is_attached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/builds/pop"))
            .and(header("authorization", "Bearer sesame"))
            .and(body_partial_json(serde_json::json!({ "max": 3 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let cp = control_plane(&server, Some("sesame")).await;
        let popped = cp.pop_builds(3).await.unwrap();
        assert!(popped.is_empty());
    }

    #[tokio::test]
    async fn not_found_is_a_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/plans/latest"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cp = control_plane(&server, None).await;
        assert!(matches!(cp.latest_plan().await, Err(ClientError::NotFound)));
    }

    #[tokio::test]
    async fn report_status_flattens_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/builds/report"))
            .and(body_partial_json(serde_json::json!({
                "package": "pkg",
                "version": "1.0",
                "outcome": "retry",
                "error": "boom",
                "recipes": ["apt:zlib1g-dev"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let cp = control_plane(&server, None).await;
        cp.report_status(
            "pkg",
            "1.0",
            &BuildOutcome::Retry {
                error: "boom".to_string(),
                recipes: vec!["apt:zlib1g-dev".to_string()],
                hint_ids: vec![],
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn error_bodies_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": "store down"})),
            )
            .mount(&server)
            .await;

        let cp = control_plane(&server, None).await;
        let event: Event = serde_json::from_str(
            r#"{"name": "pkg", "version": "1.0", "status": "built"}"#,
        )
        .unwrap();
        let err = cp.post_event(&event).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { .. }));
        assert!(err.to_string().contains("store down"));
    }
}
