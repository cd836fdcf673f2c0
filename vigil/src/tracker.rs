use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::alert::{Alert, AlertSink, IncidentKey};

#[derive(Deserialize)]
struct Issue {
    number: u64,
    title: String,
    state: String,
    #[serde(default)]
    labels: Vec<IssueLabel>,
}

#[derive(Deserialize)]
struct IssueLabel {
    name: String,
}

impl From<Issue> for Alert {
    fn from(issue: Issue) -> Self {
        Alert {
            number: issue.number,
            title: issue.title,
            open: issue.state == "open",
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

/// Issue-tracker alert sink speaking a GitHub-style REST surface. The
/// incident key rides on an issue label, which is also how open alerts
/// are found again.
pub struct TrackerSink {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl TrackerSink {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("vigil")
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl AlertSink for TrackerSink {
    #[instrument(skip(self), fields(key = %key))]
    async fn find_open(&self, key: &IncidentKey) -> Result<Option<Alert>> {
        let url = format!("{}/issues", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("state", "open"), ("labels", key.as_str())])
            .send()
            .await
            .with_context(|| format!("failed to query open alerts for {key}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("alert sink returned HTTP {status} listing open alerts");
        }

        let issues: Vec<Issue> = response
            .json()
            .await
            .context("failed to parse alert list response")?;

        Ok(issues.into_iter().next().map(Alert::from))
    }

    #[instrument(skip(self, body))]
    async fn create(&self, title: &str, body: &str, labels: &[String]) -> Result<Alert> {
        let url = format!("{}/issues", self.base_url);
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "labels": labels,
        });

        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .context("failed to create alert")?;

        let status = response.status();
        if !status.is_success() {
            bail!("alert sink returned HTTP {status} creating alert");
        }

        let issue: Issue = response
            .json()
            .await
            .context("failed to parse created alert response")?;

        Ok(issue.into())
    }
}
