//! Hosting-provider calls made on behalf of the cache and its clients.

mod api;
pub mod commits;

pub use api::{DEFAULT_API_URL, GithubApi};
pub use commits::{CombinedStatus, Commit, GraphqlClient, MAX_BATCH, Status, fetch_commits};

use thiserror::Error;

use crate::credentials::Credential;
use crate::types::{Owner, Repo};

/// Errors returned by GitHub API calls.
#[derive(Error, Debug)]
pub enum GithubError {
    /// More identifiers than one batch can carry.
    #[error("can only fetch {max} commits at a time, got {0}", max = MAX_BATCH)]
    TooManyCommits(usize),
    #[error("no commits requested")]
    EmptyRequest,
    /// The API answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("commit not found: {0}")]
    CommitNotFound(String),
}

/// Registers push notifications for a repository.
pub trait WebhookRegistrar: Send + Sync {
    /// Make sure `owner/repo` delivers events to `{host_url}/hook`, signed
    /// with `secret`.
    fn register(
        &self,
        host_url: &str,
        credential: &Credential,
        secret: &str,
        owner: &Owner,
        repo: &Repo,
    ) -> Result<(), GithubError>;
}
