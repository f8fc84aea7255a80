//! Thin typed wrapper around the GitHub REST API: directory listings
//! via the contents endpoint and raw file fetches. Token auth is
//! optional; rate-limit responses are mapped to a distinct error so
//! the sync path can surface them as such.

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

const USER_AGENT: &str = concat!("pve-scripthub/", env!("CARGO_PKG_VERSION"));
const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("GitHub API rate limit exceeded")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("GitHub returned {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub download_url: Option<String>,
}

impl RepoEntry {
    pub fn is_json_file(&self) -> bool {
        self.entry_type == "file" && self.name.ends_with(".json")
    }
}

pub struct GithubClient {
    http: Client,
    token: Option<String>,
}

/// 403 and 429 both carry `x-ratelimit-remaining: 0` when the request
/// was dropped for quota reasons rather than permissions.
fn is_rate_limited(status: StatusCode, remaining: Option<&str>) -> bool {
    (status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS)
        && remaining == Some("0")
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Result<Self, GithubError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http, token })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github.v3+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn check_status(response: Response, url: &str) -> Result<Response, GithubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_owned());
        if is_rate_limited(status, remaining.as_deref()) {
            return Err(GithubError::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GithubError::NotFound(url.to_owned()));
        }
        Err(GithubError::Status {
            status,
            url: url.to_owned(),
        })
    }

    /// Lists a directory through the contents API.
    pub async fn list_dir(
        &self,
        owner_repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Vec<RepoEntry>, GithubError> {
        let url = format!("{API_BASE}/repos/{owner_repo}/contents/{path}?ref={branch}");
        let response = self.get(&url).send().await?;
        let response = Self::check_status(response, &url)?;
        Ok(response.json::<Vec<RepoEntry>>().await?)
    }

    /// Fetches one file's raw content.
    pub async fn fetch_text(
        &self,
        owner_repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<String, GithubError> {
        let url = format!("{RAW_BASE}/{owner_repo}/{branch}/{path}");
        let response = self.get(&url).send().await?;
        let response = Self::check_status(response, &url)?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_requires_exhausted_quota_header() {
        assert!(is_rate_limited(StatusCode::FORBIDDEN, Some("0")));
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, Some("0")));
        // A plain 403 without the header is a permissions problem.
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, None));
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, Some("41")));
        assert!(!is_rate_limited(StatusCode::OK, Some("0")));
    }

    #[test]
    fn repo_entry_json_filter() {
        let file = RepoEntry {
            name: "homarr.json".into(),
            path: "json/homarr.json".into(),
            entry_type: "file".into(),
            download_url: None,
        };
        let dir = RepoEntry {
            name: "json".into(),
            path: "json".into(),
            entry_type: "dir".into(),
            download_url: None,
        };
        assert!(file.is_json_file());
        assert!(!dir.is_json_file());
    }
}
