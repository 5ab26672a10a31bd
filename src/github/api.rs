//! Blocking GitHub REST and GraphQL client.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::commits::GraphqlClient;
use super::{GithubError, WebhookRegistrar};
use crate::credentials::Credential;
use crate::types::{Owner, Repo, RepoKey};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Events a registered webhook delivers.
const HOOK_EVENTS: [&str; 3] = ["push", "status", "check_run"];

/// Client for the GitHub API at `api_url`.
pub struct GithubApi {
    agent: ureq::Agent,
    api_url: String,
}

impl Default for GithubApi {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl GithubApi {
    pub fn new(api_url: impl Into<String>) -> Self {
        let agent = ureq::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("gitmirror/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: &str, url: &str, token: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Accept", "application/vnd.github+json")
            .set("Authorization", &format!("Bearer {}", token))
    }

    /// Every repository the installation behind `token` can access.
    pub fn installation_repos(&self, token: &str) -> Result<Vec<RepoKey>, GithubError> {
        let mut url = Some(format!(
            "{}/installation/repositories?per_page=100",
            self.api_url
        ));
        let mut repos = Vec::new();

        while let Some(page_url) = url.take() {
            let response = send(self.request("GET", &page_url, token), None)?;
            url = response.header("link").and_then(next_page_url);

            let page: InstallationRepos = response
                .into_json()
                .map_err(|e| GithubError::Decode(e.to_string()))?;
            for repo in page.repositories {
                match repo.full_name.parse() {
                    Ok(key) => repos.push(key),
                    Err(e) => log::warn!("Ignoring repository {}: {}", repo.full_name, e),
                }
            }
        }

        Ok(repos)
    }

    fn hooks(&self, token: &str, owner: &Owner, repo: &Repo) -> Result<Vec<Hook>, GithubError> {
        let url = format!("{}/repos/{}/{}/hooks", self.api_url, owner, repo);
        send(self.request("GET", &url, token), None)?
            .into_json()
            .map_err(|e| GithubError::Decode(e.to_string()))
    }
}

impl WebhookRegistrar for GithubApi {
    fn register(
        &self,
        host_url: &str,
        credential: &Credential,
        secret: &str,
        owner: &Owner,
        repo: &Repo,
    ) -> Result<(), GithubError> {
        let target = hook_target(host_url);

        let existing = self.hooks(&credential.secret, owner, repo)?;
        if already_registered(&existing, &target) {
            log::debug!("Webhook for {}/{} already points at {}", owner, repo, target);
            return Ok(());
        }

        let url = format!("{}/repos/{}/{}/hooks", self.api_url, owner, repo);
        send(
            self.request("POST", &url, &credential.secret),
            Some(hook_payload(&target, secret)),
        )?;
        Ok(())
    }
}

impl GraphqlClient for GithubApi {
    fn query(&self, token: &str, query: &str, variables: Value) -> Result<Value, GithubError> {
        let url = format!("{}/graphql", self.api_url);
        let body = json!({ "query": query, "variables": variables });

        let response: GraphQlResponse = send(self.request("POST", &url, token), Some(body))?
            .into_json()
            .map_err(|e| GithubError::Decode(e.to_string()))?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            return Err(GithubError::GraphQl(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        response
            .data
            .ok_or_else(|| GithubError::Decode("response carried no data".to_string()))
    }
}

fn send(request: ureq::Request, body: Option<Value>) -> Result<ureq::Response, GithubError> {
    let result = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    result.map_err(|e| match e {
        ureq::Error::Status(status, response) => GithubError::Http {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(t) => GithubError::Transport(t.to_string()),
    })
}

/// URL webhooks for this deployment deliver to.
fn hook_target(host_url: &str) -> String {
    format!("{}/hook", host_url.trim_end_matches('/'))
}

/// Whether one of `hooks` already delivers to `target`.
fn already_registered(hooks: &[Hook], target: &str) -> bool {
    hooks
        .iter()
        .any(|hook| hook.config.url.as_deref() == Some(target))
}

fn hook_payload(target: &str, secret: &str) -> Value {
    json!({
        "name": "web",
        "active": true,
        "events": HOOK_EVENTS,
        "config": {
            "url": target,
            "content_type": "json",
            "secret": secret,
        },
    })
}

/// Extract the `rel="next"` URL from a `Link` header.
fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        url.trim()
            .strip_prefix('<')
            .and_then(|u| u.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[derive(Deserialize)]
struct InstallationRepos {
    repositories: Vec<InstallationRepo>,
}

#[derive(Deserialize)]
struct InstallationRepo {
    full_name: String,
}

#[derive(Deserialize)]
struct Hook {
    #[serde(default)]
    config: HookConfig,
}

#[derive(Deserialize, Default)]
struct HookConfig {
    url: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}
