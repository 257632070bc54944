// Minimal GitHub REST client: list/create releases, create gists

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ReleaseError, Result};

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub name: Option<String>,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GistInfo {
    pub html_url: String,
}

#[derive(Serialize)]
struct NewRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Serialize)]
struct GistFile<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct NewGist<'a> {
    description: &'a str,
    public: bool,
    files: HashMap<&'a str, GistFile<'a>>,
}

impl From<reqwest::Error> for ReleaseError {
    fn from(err: reqwest::Error) -> Self {
        ReleaseError::Http(err.to_string())
    }
}

pub struct GitHubClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(token: &str, owner: &str, repo: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ReleaseError::Http("token is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        let http = Client::builder()
            .user_agent(concat!("biweeklybudget-release/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(GitHubClient {
            http,
            api_base: API_BASE.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn releases_url(&self) -> String {
        format!("{}/repos/{}/{}/releases", self.api_base, self.owner, self.repo)
    }

    fn send<T: for<'de> Deserialize<'de>>(request: RequestBuilder) -> Result<T> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ReleaseError::Http(format!("{}: {}", status, body)));
        }
        Ok(response.json()?)
    }

    /// All releases of the repository, following pagination
    pub fn releases(&self) -> Result<Vec<ReleaseInfo>> {
        let mut all = Vec::new();
        for page in 1.. {
            let request = self
                .http
                .get(self.releases_url())
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let batch: Vec<ReleaseInfo> = Self::send(request)?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
        }
        tracing::debug!(count = all.len(), "fetched releases");
        Ok(all)
    }

    pub fn create_release(&self, tag: &str, name: &str, body: &str) -> Result<ReleaseInfo> {
        let payload = NewRelease {
            tag_name: tag,
            name,
            body,
            draft: false,
            prerelease: false,
        };
        Self::send(self.http.post(self.releases_url()).json(&payload))
    }

    /// Private gist holding a single file
    pub fn create_gist(&self, description: &str, filename: &str, content: &str) -> Result<GistInfo> {
        let payload = NewGist {
            description,
            public: false,
            files: HashMap::from([(filename, GistFile { content })]),
        };
        Self::send(self.http.post(format!("{}/gists", self.api_base)).json(&payload))
    }
}
