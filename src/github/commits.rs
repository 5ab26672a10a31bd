//! Commits and their combined CI status, fetched in batches over GraphQL.
//!
//! One query carries a fixed number of `object(oid:)` slots. Shorter requests
//! are padded by repeating the first identifier; asking for the same object
//! twice returns the same record, so the padding is dropped from the result
//! without changing it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::GithubError;
use crate::types::{Owner, Repo};

/// Slots per query.
pub const MAX_BATCH: usize = 10;

/// Executes a GraphQL query and returns its `data` member.
pub trait GraphqlClient: Send + Sync {
    fn query(&self, token: &str, query: &str, variables: Value) -> Result<Value, GithubError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub author_pic: String,
    pub url: String,
    pub status: CombinedStatus,
}

/// Classic status contexts first, then check runs, each in provider order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub state: String,
    pub contexts: Vec<Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub context: String,
    pub created_at: String,
    pub state: String,
    pub target_url: String,
    pub description: String,
}

const COMMIT_FIELDS: &str = "fragment CommitFields on GitObject { ... on Commit { \
oid url message \
author { user { login avatarUrl } } \
status { state contexts { context createdAt state targetUrl description } } \
checkSuites(first: 100) { nodes { checkRuns(first: 100) { nodes { \
permalink name status conclusion startedAt completedAt } } } } } }";

/// Build a query with `width` object slots aliased `obj0..`, bound to
/// variables `$sha0..`.
pub fn build_query(width: usize) -> String {
    let mut params = String::from("$owner: String!, $name: String!");
    let mut slots = String::new();
    for i in 0..width {
        params.push_str(&format!(", $sha{i}: GitObjectID!"));
        slots.push_str(&format!("obj{i}: object(oid: $sha{i}) {{ ...CommitFields }} "));
    }
    format!(
        "query({params}) {{ repository(owner: $owner, name: $name) {{ {slots}}} }} {COMMIT_FIELDS}"
    )
}

/// Fetch up to [`MAX_BATCH`] commits with one query.
///
/// Returns one record per requested identifier, in request order.
pub fn fetch_commits(
    client: &dyn GraphqlClient,
    owner: &Owner,
    repo: &Repo,
    token: &str,
    shas: &[String],
) -> Result<Vec<Commit>, GithubError> {
    fetch_commits_batched(client, owner, repo, token, shas, MAX_BATCH)
}

/// Like [`fetch_commits`] with a caller-chosen batch width.
pub fn fetch_commits_batched(
    client: &dyn GraphqlClient,
    owner: &Owner,
    repo: &Repo,
    token: &str,
    shas: &[String],
    width: usize,
) -> Result<Vec<Commit>, GithubError> {
    if shas.len() > width {
        return Err(GithubError::TooManyCommits(shas.len()));
    }
    let first = shas.first().ok_or(GithubError::EmptyRequest)?;

    let mut variables = Map::new();
    variables.insert("owner".into(), json!(owner.as_str()));
    variables.insert("name".into(), json!(repo.as_str()));
    for i in 0..width {
        let sha = shas.get(i).unwrap_or(first);
        variables.insert(format!("sha{i}"), json!(sha));
    }

    log::debug!(
        "Fetching {} commits of {}/{} ({} padded)",
        shas.len(),
        owner,
        repo,
        width - shas.len()
    );
    let data = client.query(token, &build_query(width), Value::Object(variables))?;
    let response: QueryData =
        serde_json::from_value(data).map_err(|e| GithubError::Decode(e.to_string()))?;
    let mut objects = response
        .repository
        .ok_or_else(|| GithubError::Decode(format!("repository {owner}/{repo} not visible")))?;

    shas.iter()
        .enumerate()
        .map(|(i, sha)| {
            objects
                .remove(&format!("obj{i}"))
                .flatten()
                .map(CommitNode::translate)
                .ok_or_else(|| GithubError::CommitNotFound(sha.clone()))
        })
        .collect()
}

#[derive(Deserialize)]
struct QueryData {
    repository: Option<HashMap<String, Option<CommitNode>>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CommitNode {
    oid: String,
    url: String,
    message: String,
    author: Option<GitActor>,
    status: Option<StatusNode>,
    #[serde(rename = "checkSuites")]
    check_suites: Option<Nodes<CheckSuiteNode>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct GitActor {
    user: Option<UserNode>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct UserNode {
    login: String,
    avatar_url: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StatusNode {
    state: String,
    contexts: Vec<ContextNode>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ContextNode {
    context: String,
    created_at: Option<String>,
    state: String,
    target_url: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct CheckSuiteNode {
    check_runs: Option<Nodes<CheckRunNode>>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct CheckRunNode {
    permalink: String,
    name: String,
    status: String,
    conclusion: Option<String>,
    completed_at: Option<String>,
}

impl CommitNode {
    fn translate(self) -> Commit {
        let status = self.status.unwrap_or_default();

        let mut contexts: Vec<Status> = status
            .contexts
            .into_iter()
            .map(|c| Status {
                context: c.context,
                created_at: c.created_at.unwrap_or_default(),
                state: c.state,
                target_url: c.target_url.unwrap_or_default(),
                description: c.description.unwrap_or_default(),
            })
            .collect();

        let check_runs = self
            .check_suites
            .into_iter()
            .flat_map(|suites| suites.nodes)
            .filter_map(|suite| suite.check_runs)
            .flat_map(|runs| runs.nodes);
        for run in check_runs {
            let state = match run.conclusion {
                Some(conclusion) if !conclusion.is_empty() => conclusion,
                _ => run.status,
            };
            contexts.push(Status {
                context: run.name,
                created_at: run.completed_at.unwrap_or_default(),
                state,
                target_url: run.permalink,
                description: String::new(),
            });
        }

        let user = self.author.and_then(|a| a.user).unwrap_or_default();
        Commit {
            sha: self.oid,
            message: self.message,
            author: user.login,
            author_pic: user.avatar_url,
            url: self.url,
            status: CombinedStatus {
                state: status.state,
                contexts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers every slot from its bound variable; records each call.
    #[derive(Default)]
    struct FakeGraphql {
        calls: Mutex<Vec<Value>>,
        missing: Option<String>,
    }

    fn commit_json(sha: &str) -> Value {
        json!({
            "oid": sha,
            "url": format!("https://github.com/acme/deploy/commit/{sha}"),
            "message": format!("commit {sha}"),
            "author": { "user": { "login": "laszlocph", "avatarUrl": "https://avatars.example/1" } },
            "status": {
                "state": "PENDING",
                "contexts": [
                    { "context": "ci/build", "createdAt": "2021-01-01T00:00:00Z", "state": "SUCCESS",
                      "targetUrl": "https://ci.example/1", "description": "built" },
                    { "context": "ci/lint", "createdAt": "2021-01-01T00:01:00Z", "state": "PENDING",
                      "targetUrl": null, "description": null }
                ]
            },
            "checkSuites": { "nodes": [
                { "checkRuns": { "nodes": [
                    { "permalink": "https://github.com/run/1", "name": "test", "status": "COMPLETED",
                      "conclusion": "FAILURE", "startedAt": "t0", "completedAt": "t1" },
                    { "permalink": "https://github.com/run/2", "name": "deploy", "status": "IN_PROGRESS",
                      "conclusion": null, "startedAt": "t2", "completedAt": null }
                ] } }
            ] }
        })
    }

    impl GraphqlClient for FakeGraphql {
        fn query(&self, _token: &str, query: &str, variables: Value) -> Result<Value, GithubError> {
            self.calls.lock().unwrap().push(variables.clone());
            let mut repository = Map::new();
            let mut i = 0;
            while let Some(sha) = variables.get(format!("sha{i}")).and_then(Value::as_str) {
                assert!(query.contains(&format!("obj{i}: object(oid: $sha{i})")));
                let node = if self.missing.as_deref() == Some(sha) {
                    Value::Null
                } else {
                    commit_json(sha)
                };
                repository.insert(format!("obj{i}"), node);
                i += 1;
            }
            Ok(json!({ "repository": repository }))
        }
    }

    fn shas(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:040x}")).collect()
    }

    fn owner_repo() -> (Owner, Repo) {
        ("acme".parse().unwrap(), "deploy".parse().unwrap())
    }

    #[test]
    fn three_commits_with_merged_status() {
        let client = FakeGraphql::default();
        let (owner, repo) = owner_repo();
        let requested = shas(3);

        let commits = fetch_commits(&client, &owner, &repo, "token", &requested).unwrap();

        assert_eq!(commits.len(), 3);
        for (commit, sha) in commits.iter().zip(&requested) {
            assert_eq!(&commit.sha, sha);
            assert_eq!(commit.author, "laszlocph");
            let names: Vec<_> = commit.status.contexts.iter().map(|s| s.context.as_str()).collect();
            assert_eq!(names, vec!["ci/build", "ci/lint", "test", "deploy"]);
        }

        let contexts = &commits[0].status.contexts;
        assert_eq!(contexts[1].target_url, "");
        assert_eq!(contexts[2].state, "FAILURE");
        assert_eq!(contexts[2].created_at, "t1");
        assert_eq!(contexts[2].target_url, "https://github.com/run/1");
        assert_eq!(contexts[3].state, "IN_PROGRESS");
        assert_eq!(commits[0].status.state, "PENDING");
    }

    #[test]
    fn eleven_commits_fail_without_network() {
        let client = FakeGraphql::default();
        let (owner, repo) = owner_repo();

        let result = fetch_commits(&client, &owner, &repo, "token", &shas(11));

        assert!(matches!(result, Err(GithubError::TooManyCommits(11))));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn four_commits_use_one_padded_batch() {
        let client = FakeGraphql::default();
        let (owner, repo) = owner_repo();
        let requested = shas(4);

        let commits = fetch_commits(&client, &owner, &repo, "token", &requested).unwrap();

        let returned: Vec<_> = commits.iter().map(|c| c.sha.clone()).collect();
        assert_eq!(returned, requested);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        for i in 0..MAX_BATCH {
            let expected = requested.get(i).unwrap_or(&requested[0]);
            assert_eq!(calls[0][format!("sha{i}")], json!(expected));
        }
        assert_eq!(calls[0]["owner"], json!("acme"));
        assert_eq!(calls[0]["name"], json!("deploy"));
    }

    #[test]
    fn empty_request_is_rejected() {
        let client = FakeGraphql::default();
        let (owner, repo) = owner_repo();
        assert!(matches!(
            fetch_commits(&client, &owner, &repo, "token", &[]),
            Err(GithubError::EmptyRequest)
        ));
    }

    #[test]
    fn unknown_commit_is_reported() {
        let requested = shas(2);
        let client = FakeGraphql {
            missing: Some(requested[1].clone()),
            ..Default::default()
        };
        let (owner, repo) = owner_repo();

        match fetch_commits(&client, &owner, &repo, "token", &requested) {
            Err(GithubError::CommitNotFound(sha)) => assert_eq!(sha, requested[1]),
            other => panic!("expected CommitNotFound, got {:?}", other),
        }
    }

    #[test]
    fn batch_width_is_configurable() {
        let client = FakeGraphql::default();
        let (owner, repo) = owner_repo();

        let commits = fetch_commits_batched(&client, &owner, &repo, "token", &shas(2), 3).unwrap();
        assert_eq!(commits.len(), 2);
        assert!(fetch_commits_batched(&client, &owner, &repo, "token", &shas(4), 3).is_err());
    }

    #[test]
    fn query_declares_every_slot() {
        let query = build_query(MAX_BATCH);
        assert!(query.contains("$sha9: GitObjectID!"));
        assert!(query.contains("obj9: object(oid: $sha9)"));
        assert!(!query.contains("obj10"));
        assert!(query.contains("checkSuites(first: 100)"));
    }
}
