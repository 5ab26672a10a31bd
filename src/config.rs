//! Daemon and GitHub settings, resolved from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::cache::{CachePaths, DEFAULT_GIT_HOST};
use crate::credentials::StaticToken;
use crate::github::DEFAULT_API_URL;

/// Username git sends alongside an installation or personal token.
pub const DEFAULT_GITHUB_USER: &str = "x-access-token";

/// How to reach GitHub, shared by every command that talks to it.
#[derive(Args, Debug, Clone)]
pub struct GithubArgs {
    /// Username paired with the token for git over HTTPS
    #[arg(long, env = "GITMIRROR_GITHUB_USER", default_value = DEFAULT_GITHUB_USER)]
    pub github_user: String,

    /// Token used for clones, fetches and API calls
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Base URL of the GitHub REST and GraphQL API
    #[arg(long, env = "GITMIRROR_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
}

impl GithubArgs {
    pub fn token_source(&self) -> StaticToken {
        StaticToken::new(self.github_user.clone(), self.github_token.clone())
    }
}

/// Settings for `gitmirror daemon`.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Cache root; mirrors live under `repos/`
    #[arg(long = "cache-dir", env = "GITMIRROR_CACHE_DIR")]
    pub cache_root: Option<PathBuf>,

    /// Public URL of this deployment. Webhooks are registered only when set.
    #[arg(long, env = "GITMIRROR_HOST_URL")]
    pub host_url: Option<String>,

    /// Secret GitHub signs webhook deliveries with
    #[arg(
        long,
        env = "GITMIRROR_WEBHOOK_SECRET",
        default_value = "",
        hide_env_values = true
    )]
    pub webhook_secret: String,

    /// Seconds between periodic refreshes of every mirror
    #[arg(long = "sync-interval-secs", default_value_t = 30)]
    pub sync_interval: u64,

    /// Git host mirrors are cloned from
    #[arg(long, default_value = DEFAULT_GIT_HOST)]
    pub git_host: String,

    #[command(flatten)]
    pub github: GithubArgs,
}

impl Config {
    pub fn cache_paths(&self) -> CachePaths {
        self.cache_root
            .clone()
            .map(CachePaths::new)
            .unwrap_or_default()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval.max(1))
    }

    /// `host_url` with an empty value treated as unset.
    pub fn host_url(&self) -> Option<&str> {
        self.host_url.as_deref().filter(|url| !url.is_empty())
    }
}
