use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{git_clone, RepositoryDriver, ISSUE_TITLE};
use crate::model::{Issue, Platform, Repository};
use crate::runner::CommandRunner;

const PER_PAGE: u32 = 100;
const USER_AGENT: &str = concat!("sheriff/", env!("CARGO_PKG_VERSION"));

pub struct GithubDriver {
    client: reqwest::Client,
    base_url: String,
    token: String,
    runner: Arc<dyn CommandRunner>,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubRepo {
    id: u64,
    name: String,
    full_name: String,
    html_url: String,
    clone_url: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    state: String,
    html_url: String,
}

#[derive(Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct IssueUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    state: &'a str,
}

impl GithubDriver {
    pub fn new(token: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_base_url("https://api.github.com", token, runner)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            runner,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    /// Lists repositories page by page until a short page. GitHub exposes no
    /// total-pages header worth trusting, so pagination is serial here.
    async fn list_repos(&self, listing_path: &str) -> Result<(Vec<Repository>, usize)> {
        let mut repositories = Vec::new();
        let mut skipped = 0;
        let mut page = 1u32;
        loop {
            let entries: Vec<Option<GithubRepo>> = self
                .request(
                    reqwest::Method::GET,
                    &format!("{listing_path}?per_page={PER_PAGE}&page={page}"),
                )
                .send()
                .await
                .with_context(|| format!("listing {listing_path}, page {page}"))?
                .error_for_status()
                .with_context(|| format!("listing {listing_path}, page {page}"))?
                .json()
                .await
                .context("decoding repository list")?;

            let count = entries.len();
            for entry in entries {
                match entry {
                    Some(repo) if repo.archived => {}
                    Some(repo) => repositories.push(self.to_repository(repo)),
                    None => skipped += 1,
                }
            }
            if (count as u32) < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok((repositories, skipped))
    }

    async fn single_repo(&self, path: &str) -> Result<Repository> {
        let repo: GithubRepo = self
            .request(reqwest::Method::GET, &format!("repos/{path}"))
            .send()
            .await
            .with_context(|| format!("fetching repository {path}"))?
            .error_for_status()
            .with_context(|| format!("fetching repository {path}"))?
            .json()
            .await
            .context("decoding repository")?;
        Ok(self.to_repository(repo))
    }

    fn to_repository(&self, repo: GithubRepo) -> Repository {
        Repository {
            id: repo.id,
            name: repo.name,
            path: repo.full_name,
            web_url: repo.html_url,
            clone_url: repo.clone_url,
            platform: Platform::Github,
        }
    }

    /// Resolves one target path: organization first, then user account,
    /// then a single `owner/name` repository.
    async fn discover(&self, path: &str) -> Result<(Vec<Repository>, usize)> {
        match self.list_repos(&format!("orgs/{path}/repos")).await {
            Ok(found) => return Ok(found),
            Err(e) => debug!(path, error = %e, "org lookup failed, trying as user"),
        }
        match self.list_repos(&format!("users/{path}/repos")).await {
            Ok(found) => return Ok(found),
            Err(e) => debug!(path, error = %e, "user lookup failed, trying as repository"),
        }
        let repo = self
            .single_repo(path)
            .await
            .with_context(|| format!("target {path} unresolvable as org, user, or repository"))?;
        Ok((vec![repo], 0))
    }

    /// Finds the reserved issue by exact title, open or closed.
    async fn find_issue(&self, repo: &Repository) -> Result<Option<GithubIssue>> {
        let mut page = 1u32;
        loop {
            let issues: Vec<GithubIssue> = self
                .request(
                    reqwest::Method::GET,
                    &format!(
                        "repos/{}/issues?state=all&per_page={PER_PAGE}&page={page}",
                        repo.path
                    ),
                )
                .send()
                .await
                .with_context(|| format!("listing issues of {}", repo.path))?
                .error_for_status()?
                .json()
                .await
                .context("decoding issue list")?;

            let count = issues.len();
            if let Some(found) = issues.into_iter().find(|i| i.title == ISSUE_TITLE) {
                return Ok(Some(found));
            }
            if (count as u32) < PER_PAGE {
                return Ok(None);
            }
            page += 1;
        }
    }

    async fn update_issue(
        &self,
        repo: &Repository,
        number: u64,
        update: &IssueUpdate<'_>,
    ) -> Result<GithubIssue> {
        let issue: GithubIssue = self
            .request(
                reqwest::Method::PATCH,
                &format!("repos/{}/issues/{number}", repo.path),
            )
            .json(update)
            .send()
            .await
            .with_context(|| format!("updating issue of {}", repo.path))?
            .error_for_status()?
            .json()
            .await
            .context("decoding updated issue")?;
        Ok(issue)
    }
}

#[async_trait]
impl RepositoryDriver for GithubDriver {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    async fn enumerate(&self, paths: &[String]) -> (Vec<Repository>, Vec<String>) {
        let discoveries = join_all(
            paths
                .iter()
                .map(|path| async move { (path, self.discover(path).await) }),
        )
        .await;

        let mut seen = HashSet::new();
        let mut repositories = Vec::new();
        let mut warnings = Vec::new();
        for (path, outcome) in discoveries {
            match outcome {
                Ok((repos, skipped)) => {
                    if skipped > 0 {
                        warnings.push(format!(
                            "skipped {skipped} null repository entries under {path}"
                        ));
                    }
                    for repo in repos {
                        if seen.insert(repo.key()) {
                            repositories.push(repo);
                        }
                    }
                }
                Err(e) => warnings.push(format!("{e:#}")),
            }
        }
        (repositories, warnings)
    }

    async fn clone_repo(&self, clone_url: &str, dir: &Path) -> Result<()> {
        git_clone(
            self.runner.as_ref(),
            clone_url,
            "x-access-token",
            &self.token,
            dir,
        )
        .await
    }

    async fn open_issue(&self, repo: &Repository, body: &str) -> Result<Issue> {
        let issue = match self.find_issue(repo).await? {
            None => {
                let created: GithubIssue = self
                    .request(
                        reqwest::Method::POST,
                        &format!("repos/{}/issues", repo.path),
                    )
                    .json(&NewIssue {
                        title: ISSUE_TITLE,
                        body,
                    })
                    .send()
                    .await
                    .with_context(|| format!("creating issue for {}", repo.path))?
                    .error_for_status()?
                    .json()
                    .await
                    .context("decoding created issue")?;
                created
            }
            Some(existing) => {
                let updated = self
                    .update_issue(
                        repo,
                        existing.number,
                        &IssueUpdate {
                            body: Some(body),
                            state: "open",
                        },
                    )
                    .await?;
                if updated.state != "open" {
                    return Err(anyhow!(
                        "issue of {} is {:?} after reopen",
                        repo.path,
                        updated.state
                    ));
                }
                updated
            }
        };
        Ok(Issue {
            web_url: issue.html_url,
        })
    }

    async fn close_issue(&self, repo: &Repository) -> Result<()> {
        let Some(existing) = self.find_issue(repo).await? else {
            return Ok(());
        };
        if existing.state == "closed" {
            return Ok(());
        }
        let updated = self
            .update_issue(
                repo,
                existing.number,
                &IssueUpdate {
                    body: None,
                    state: "closed",
                },
            )
            .await?;
        if updated.state != "closed" {
            return Err(anyhow!(
                "issue of {} is {:?} after close",
                repo.path,
                updated.state
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_deserializes() {
        let json = r#"{
            "id": 9000,
            "name": "tool",
            "full_name": "owner/tool",
            "html_url": "https://github.com/owner/tool",
            "clone_url": "https://github.com/owner/tool.git",
            "archived": false,
            "fork": false
        }"#;
        let repo: GithubRepo = serde_json::from_str(json).unwrap();
        assert_eq!(repo.full_name, "owner/tool");
        assert!(!repo.archived);
    }

    #[test]
    fn test_issue_deserializes() {
        let json = r#"{
            "number": 3,
            "title": "Sheriff - 🚨 Vulnerability report",
            "state": "open",
            "html_url": "https://github.com/owner/tool/issues/3"
        }"#;
        let issue: GithubIssue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.number, 3);
        assert_eq!(issue.title, ISSUE_TITLE);
    }
}
