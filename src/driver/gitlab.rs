use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{encode_path_segment, git_clone, RepositoryDriver, ISSUE_TITLE};
use crate::model::{Issue, Platform, Repository};
use crate::runner::CommandRunner;

const PER_PAGE: u32 = 100;

pub struct GitlabDriver {
    client: reqwest::Client,
    base_url: String,
    token: String,
    runner: Arc<dyn CommandRunner>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitlabProject {
    id: u64,
    name: String,
    path_with_namespace: String,
    web_url: String,
    http_url_to_repo: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitlabIssue {
    iid: u64,
    title: String,
    state: String,
    web_url: String,
}

#[derive(Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct IssueUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    state_event: &'a str,
}

impl GitlabDriver {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            runner,
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", &self.token)
    }

    /// Lists every project of a group, subgroups included, archived and
    /// shared-in projects excluded. Page 1 is fetched first for the total
    /// page count; the remaining pages are fetched in parallel. A failing
    /// page beyond the first loses only that page and becomes a warning.
    async fn group_projects(&self, path: &str) -> Result<(Vec<Repository>, usize, Vec<String>)> {
        let url = |page: u32| {
            self.api(&format!(
                "groups/{}/projects?archived=false&simple=true&include_subgroups=true&with_shared=false&per_page={PER_PAGE}&page={page}",
                encode_path_segment(path)
            ))
        };

        let response = self
            .request(reqwest::Method::GET, url(1))
            .send()
            .await
            .with_context(|| format!("listing projects of group {path}"))?
            .error_for_status()
            .with_context(|| format!("listing projects of group {path}"))?;

        let total_pages: u32 = response
            .headers()
            .get("x-total-pages")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let mut pages = vec![response
            .json::<Vec<Option<GitlabProject>>>()
            .await
            .context("decoding group project list")?];

        let fetches = (2..=total_pages).map(|page| {
            let url = url(page);
            async move {
                self.request(reqwest::Method::GET, url)
                    .send()
                    .await
                    .with_context(|| format!("listing projects of group {path}, page {page}"))?
                    .error_for_status()?
                    .json::<Vec<Option<GitlabProject>>>()
                    .await
                    .context("decoding group project list")
            }
        });
        let mut warnings = Vec::new();
        for page in join_all(fetches).await {
            match page {
                Ok(page) => pages.push(page),
                Err(e) => warnings.push(format!("{e:#}")),
            }
        }

        let mut repositories = Vec::new();
        let mut skipped = 0;
        for project in pages.into_iter().flatten() {
            match project {
                Some(p) => repositories.push(self.to_repository(p)),
                None => skipped += 1,
            }
        }
        Ok((repositories, skipped, warnings))
    }

    async fn single_project(&self, path: &str) -> Result<Repository> {
        let url = self.api(&format!("projects/{}", encode_path_segment(path)));
        let project: GitlabProject = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .with_context(|| format!("fetching project {path}"))?
            .error_for_status()
            .with_context(|| format!("fetching project {path}"))?
            .json()
            .await
            .context("decoding project")?;
        Ok(self.to_repository(project))
    }

    fn to_repository(&self, project: GitlabProject) -> Repository {
        Repository {
            id: project.id,
            name: project.name,
            path: project.path_with_namespace,
            web_url: project.web_url,
            clone_url: project.http_url_to_repo,
            platform: Platform::Gitlab,
        }
    }

    /// Finds the reserved issue by exact title.
    async fn find_issue(&self, repo: &Repository) -> Result<Option<GitlabIssue>> {
        let url = self.api(&format!(
            "projects/{}/issues?search={}&in=title&per_page={PER_PAGE}",
            repo.id,
            encode_path_segment(ISSUE_TITLE)
        ));
        let issues: Vec<GitlabIssue> = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .with_context(|| format!("listing issues of {}", repo.path))?
            .error_for_status()?
            .json()
            .await
            .context("decoding issue list")?;
        Ok(issues.into_iter().find(|i| i.title == ISSUE_TITLE))
    }

    async fn update_issue(
        &self,
        repo: &Repository,
        iid: u64,
        update: &IssueUpdate<'_>,
    ) -> Result<GitlabIssue> {
        let url = self.api(&format!("projects/{}/issues/{iid}", repo.id));
        let issue: GitlabIssue = self
            .request(reqwest::Method::PUT, url)
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
impl RepositoryDriver for GitlabDriver {
    fn platform(&self) -> Platform {
        Platform::Gitlab
    }

    async fn enumerate(&self, paths: &[String]) -> (Vec<Repository>, Vec<String>) {
        let discoveries = join_all(paths.iter().map(|path| async move {
            match self.group_projects(path).await {
                Ok(found) => (path, Ok(found)),
                Err(group_err) => {
                    // Not a group (or unreachable as one): try it as a
                    // single project before giving up on the path.
                    debug!(path, error = %group_err, "group lookup failed, trying as project");
                    match self.single_project(path).await {
                        Ok(repo) => (path, Ok((vec![repo], 0, Vec::new()))),
                        Err(project_err) => (
                            path,
                            Err(anyhow!(
                                "target {path} unresolvable: as group: {group_err:#}; as project: {project_err:#}"
                            )),
                        ),
                    }
                }
            }
        }))
        .await;

        let mut seen = HashSet::new();
        let mut repositories = Vec::new();
        let mut warnings = Vec::new();
        for (path, outcome) in discoveries {
            match outcome {
                Ok((repos, skipped, page_warnings)) => {
                    warnings.extend(page_warnings);
                    if skipped > 0 {
                        warnings.push(format!("skipped {skipped} null project entries under {path}"));
                    }
                    for repo in repos {
                        if seen.insert(repo.key()) {
                            repositories.push(repo);
                        }
                    }
                }
                Err(e) => warnings.push(e.to_string()),
            }
        }
        (repositories, warnings)
    }

    async fn clone_repo(&self, clone_url: &str, dir: &Path) -> Result<()> {
        git_clone(self.runner.as_ref(), clone_url, "oauth2", &self.token, dir).await
    }

    async fn open_issue(&self, repo: &Repository, body: &str) -> Result<Issue> {
        let issue = match self.find_issue(repo).await? {
            None => {
                let url = self.api(&format!("projects/{}/issues", repo.id));
                let created: GitlabIssue = self
                    .request(reqwest::Method::POST, url)
                    .json(&NewIssue {
                        title: ISSUE_TITLE,
                        description: body,
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
                        existing.iid,
                        &IssueUpdate {
                            description: Some(body),
                            state_event: "reopen",
                        },
                    )
                    .await?;
                if updated.state != "opened" {
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
            web_url: issue.web_url,
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
                existing.iid,
                &IssueUpdate {
                    description: None,
                    state_event: "close",
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
