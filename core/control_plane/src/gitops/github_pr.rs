//! Branch + commit + PR creation in the gitops config repository.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use shared_types::ExecutionPlan;
use thiserror::Error;
use tracing::info;

use crate::signing::canonicalize;

const API_VERSION: &str = "2022-11-28";
const PR_LABELS: &[&str] = &["automated", "hmac-verified"];

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("github request failed: {0}")]
    Http(String),

    #[error("github returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("github response missing field: {0}")]
    MissingField(&'static str),

    #[error("plan serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PrResult {
    pub pr_number: i64,
    pub pr_url: String,
    pub branch: String,
}

/// Creates HMAC-signed plan PRs in the gitops config repository.
pub struct GitHubPrCreator {
    token: String,
    owner: String,
    repo: String,
    api_base: String,
    http: reqwest::Client,
}

impl GitHubPrCreator {
    pub fn new(token: &str, owner: &str, repo: &str) -> Self {
        Self {
            token: token.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            api_base: "https://api.github.com".to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Point at a different API host. Test seam.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_base, self.owner, self.repo, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GitHubError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", "cacp-control-plane")
            .send()
            .await
            .map_err(|e| GitHubError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| GitHubError::Http(e.to_string()))
    }

    async fn get(&self, path: &str) -> Result<Value, GitHubError> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, GitHubError> {
        self.send(self.http.post(self.url(path)).json(&body)).await
    }

    async fn put(&self, path: &str, body: Value) -> Result<Value, GitHubError> {
        self.send(self.http.put(self.url(path)).json(&body)).await
    }

    /// Create a branch from the default-branch head, commit the signed plan,
    /// and open a labelled PR. Any non-2xx response surfaces as an error.
    pub async fn create_plan_pr(
        &self,
        plan: &ExecutionPlan,
        environment: &str,
        branch_name: &str,
    ) -> Result<PrResult, GitHubError> {
        // 1. Default branch and its head commit.
        let repo_info = self.get("").await?;
        let default_branch = repo_info
            .get("default_branch")
            .and_then(Value::as_str)
            .ok_or(GitHubError::MissingField("default_branch"))?
            .to_string();

        let head_ref = self
            .get(&format!("/git/ref/heads/{}", default_branch))
            .await?;
        let head_sha = head_ref
            .get("object")
            .and_then(|o| o.get("sha"))
            .and_then(Value::as_str)
            .ok_or(GitHubError::MissingField("object.sha"))?
            .to_string();

        // 2. Branch for the proposal.
        self.post(
            "/git/refs",
            json!({
                "ref": format!("refs/heads/{}", branch_name),
                "sha": head_sha,
            }),
        )
        .await?;

        // 3. Commit the plan file, canonical bytes.
        let plan_value = serde_json::to_value(plan)?;
        let content = canonicalize(&plan_value, &[])?;
        let path = format!("environments/{}/plans/{}.json", environment, plan.plan_id);
        let appointment_id = plan
            .actions
            .first()
            .map(|a| a.appointment_id.clone())
            .unwrap_or_default();

        self.put(
            &format!("/contents/{}", path),
            json!({
                "message": format!("Add execution plan {}", plan.plan_id),
                "content": BASE64.encode(content.as_bytes()),
                "branch": branch_name,
            }),
        )
        .await?;

        // 4. Open the PR and label it.
        let pr = self
            .post(
                "/pulls",
                json!({
                    "title": format!("{} - {}", branch_name, appointment_id),
                    "head": branch_name,
                    "base": default_branch,
                    "body": format!(
                        "appointment_id: {}\nenvironment: {}\nrisk_level: {}\nhmac_signature: {}",
                        appointment_id, environment, plan.risk_level, plan.hmac_signature,
                    ),
                }),
            )
            .await?;

        let pr_number = pr
            .get("number")
            .and_then(Value::as_i64)
            .ok_or(GitHubError::MissingField("number"))?;
        let pr_url = pr
            .get("html_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.post(
            &format!("/issues/{}/labels", pr_number),
            json!({ "labels": PR_LABELS }),
        )
        .await?;

        info!(pr_number, branch = %branch_name, "plan PR opened");

        Ok(PrResult {
            pr_number,
            pr_url,
            branch: branch_name.to_string(),
        })
    }
}
