//! The patrol orchestrator: discover, clone, scan, normalize.
//!
//! One [`Patrol::run`] call discovers every repository reachable from the
//! given targets, scans each working tree with bounded parallelism, and
//! returns normalized per-repository reports plus joined discovery warnings.
//! Per-repository failures become `Report { error: true }` and never halt
//! the rest of the run.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::driver::DriverRegistry;
use crate::model::{Platform, Report, Repository, Target};
use crate::normalize::normalize;
use crate::project_config;
use crate::scan::VulnerabilityScanner;

pub struct Patrol {
    registry: Arc<DriverRegistry>,
    scanner: Arc<dyn VulnerabilityScanner>,
    jobs: usize,
}

/// What one patrol run produced: the reports, and the non-fatal warnings
/// accumulated along the way.
pub struct PatrolOutcome {
    pub reports: Vec<Report>,
    pub warnings: Vec<String>,
}

impl Patrol {
    pub fn new(registry: Arc<DriverRegistry>, scanner: Arc<dyn VulnerabilityScanner>) -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            registry,
            scanner,
            jobs,
        }
    }

    /// Tunes the number of repositories scanned concurrently.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Runs a full patrol over the targets.
    ///
    /// Fails only on setup errors (no temp directory, no driver for a
    /// target's platform); everything downstream degrades to warnings or
    /// per-repository error reports. The scan working tree lives under a
    /// temp root that is removed on every exit path.
    pub async fn run(&self, targets: &[Target]) -> Result<PatrolOutcome> {
        let temp_root = tempfile::tempdir().context("creating patrol temp directory")?;
        let mut warnings = Vec::new();

        let repositories = self.discover(targets, &mut warnings).await?;
        info!(count = repositories.len(), "repositories discovered");

        let reports = self
            .scan_all(repositories, temp_root.path().to_path_buf())
            .await;

        let mut reports = reports;
        reports.sort_by(|a, b| {
            b.vulnerabilities
                .len()
                .cmp(&a.vulnerabilities.len())
                .then_with(|| a.repository.path.cmp(&b.repository.path))
        });

        // TempDir removal on drop covers early returns above as well.
        temp_root
            .close()
            .context("removing patrol temp directory")?;

        Ok(PatrolOutcome { reports, warnings })
    }

    /// Discovers repositories for all targets, one enumerate call per
    /// platform, in parallel. Deduplicates by `(platform, id)`.
    async fn discover(
        &self,
        targets: &[Target],
        warnings: &mut Vec<String>,
    ) -> Result<Vec<Repository>> {
        let mut by_platform: HashMap<Platform, Vec<String>> = HashMap::new();
        for target in targets {
            by_platform
                .entry(target.platform)
                .or_default()
                .push(target.path.clone());
        }

        let discoveries =
            futures::future::join_all(by_platform.into_iter().map(|(platform, paths)| {
                let driver = self.registry.get(platform);
                async move {
                    match driver {
                        Ok(driver) => Ok(driver.enumerate(&paths).await),
                        Err(e) => Err(e),
                    }
                }
            }))
            .await;

        let mut seen = HashSet::new();
        let mut repositories = Vec::new();
        for discovery in discoveries {
            // A missing driver is a setup problem, not a discovery warning.
            let (repos, driver_warnings) = discovery?;
            warnings.extend(driver_warnings);
            for repo in repos {
                if seen.insert(repo.key()) {
                    repositories.push(repo);
                }
            }
        }
        Ok(repositories)
    }

    /// Scans repositories with bounded parallelism. Each task owns a private
    /// subdirectory under the temp root, removed unconditionally afterwards.
    async fn scan_all(&self, repositories: Vec<Repository>, temp_root: PathBuf) -> Vec<Report> {
        stream::iter(repositories.into_iter().map(|repo| {
            let workdir = temp_root.join(format!("{}-{}", repo.platform.as_str(), repo.id));
            async move {
                let report = self.scan_one(repo, &workdir).await;
                if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(dir = %workdir.display(), error = %e, "failed to remove scan workdir");
                    }
                }
                report
            }
        }))
        .buffer_unordered(self.jobs)
        .collect()
        .await
    }

    async fn scan_one(&self, repo: Repository, workdir: &std::path::Path) -> Report {
        let driver = match self.registry.get(repo.platform) {
            Ok(driver) => driver,
            Err(e) => {
                warn!(repo = %repo.path, error = %e, "no driver for repository");
                return Report::failed(repo);
            }
        };

        if let Err(e) = driver.clone_repo(&repo.clone_url, workdir).await {
            warn!(repo = %repo.path, error = %e, "clone failed");
            return Report::failed(repo);
        }

        let raw = match self.scanner.scan(workdir).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(repo = %repo.path, error = %e, "scan failed");
                return Report::failed(repo);
            }
        };

        let config = project_config::load(workdir);
        normalize(raw, repo, config)
    }
}

/// Joins accumulated warnings into a single warning error, or `None` when
/// there were none.
pub fn join_warnings(warnings: &[String]) -> Option<anyhow::Error> {
    if warnings.is_empty() {
        None
    } else {
        Some(anyhow::anyhow!(warnings.join("; ")))
    }
}
