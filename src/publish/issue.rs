//! Tracker-issue publication.
//!
//! Vulnerable repositories get the reserved issue opened (or updated and
//! reopened) with a Markdown report body; clean repositories get it closed.

use chrono::NaiveDate;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::sorted_for_display;
use crate::clock::Clock;
use crate::driver::DriverRegistry;
use crate::model::{Report, SeverityKind};

pub struct IssuePublisher {
    registry: Arc<DriverRegistry>,
    clock: Arc<dyn Clock>,
}

impl IssuePublisher {
    pub fn new(registry: Arc<DriverRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// Opens or closes the reserved issue for every report, in parallel.
    /// Stores the issue URL on the report when one was opened. Failures are
    /// returned as warnings, one per repository.
    pub async fn publish(&self, reports: &mut [Report]) -> Vec<String> {
        let today = self.clock.today();

        let results = join_all(reports.iter().enumerate().map(|(index, report)| {
            let registry = Arc::clone(&self.registry);
            let repo = report.repository.clone();
            let body = report.is_vulnerable.then(|| format_issue(report, today));
            async move {
                let driver = match registry.get(repo.platform) {
                    Ok(driver) => driver,
                    Err(e) => return (index, Err(e)),
                };
                let outcome = match body {
                    Some(body) => driver
                        .open_issue(&repo, &body)
                        .await
                        .map(|issue| Some(issue.web_url)),
                    None => driver.close_issue(&repo).await.map(|()| None),
                };
                (index, outcome)
            }
        }))
        .await;

        let mut warnings = Vec::new();
        for (index, outcome) in results {
            match outcome {
                Ok(Some(url)) => {
                    info!(repo = %reports[index].repository.path, issue = %url, "issue published");
                    reports[index].issue_url = Some(url);
                }
                Ok(None) => {}
                Err(e) => {
                    let path = &reports[index].repository.path;
                    warn!(repo = %path, error = %e, "issue publication failed");
                    warnings.push(format!("issue publication for {path}: {e:#}"));
                }
            }
        }
        warnings
    }
}

/// Renders the Markdown body of the vulnerability-report issue.
pub fn format_issue(report: &Report, today: NaiveDate) -> String {
    let repo = &report.repository;
    let mut body = format!(
        "Vulnerability report {} for [{}]({})\n",
        today.format("%Y-%m-%d"),
        repo.path,
        repo.web_url
    );

    for kind in [
        SeverityKind::Critical,
        SeverityKind::High,
        SeverityKind::Moderate,
        SeverityKind::Low,
        SeverityKind::Unknown,
    ] {
        let vulns = sorted_for_display(report.vulnerabilities_of(kind));
        if vulns.is_empty() {
            continue;
        }
        body.push_str(&format!("\n## Severity: {}\n\n", kind.label()));
        body.push_str("| OSV URL | CVSS | Ecosystem | Package | Version | Fix Available | Source |\n");
        body.push_str("|---|---|---|---|---|---|---|\n");
        for v in vulns {
            body.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                v.osv_url(),
                v.severity_cvss,
                v.package_ecosystem,
                v.package_name,
                v.package_version,
                if v.fix_available { "✅" } else { "❌" },
                v.source,
            ));
        }
    }

    let acknowledged = sorted_for_display(report.vulnerabilities_of(SeverityKind::Acknowledged));
    if !acknowledged.is_empty() {
        body.push_str("\n## Acknowledged\n\n");
        body.push_str(
            "| OSV URL | CVSS | Ecosystem | Package | Version | Fix Available | Source | Reason |\n",
        );
        body.push_str("|---|---|---|---|---|---|---|---|\n");
        for v in acknowledged {
            body.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                v.osv_url(),
                v.severity_cvss,
                v.package_ecosystem,
                v.package_name,
                v.package_version,
                if v.fix_available { "✅" } else { "❌" },
                v.source,
                v.ack_reason.as_deref().unwrap_or(""),
            ));
        }
    }

    if !report.outdated_acks.is_empty() {
        body.push_str("\n## Outdated Acknowledgements\n\n");
        for code in &report.outdated_acks {
            body.push_str(&format!("- {code}\n"));
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, Repository, Vulnerability};
    use crate::project_config::ProjectConfig;

    fn repo() -> Repository {
        Repository {
            id: 1,
            name: "app".to_string(),
            path: "group/app".to_string(),
            web_url: "https://gitlab.example.com/group/app".to_string(),
            clone_url: "https://gitlab.example.com/group/app.git".to_string(),
            platform: Platform::Gitlab,
        }
    }

    fn vuln(id: &str, cvss: &str, kind: SeverityKind) -> Vulnerability {
        Vulnerability {
            id: id.to_string(),
            package_name: "left-pad".to_string(),
            package_version: "1.0.0".to_string(),
            package_url: String::new(),
            package_ecosystem: "npm".to_string(),
            source: "package-lock.json".to_string(),
            severity_cvss: cvss.to_string(),
            severity_kind: kind,
            summary: String::new(),
            details: String::new(),
            fix_available: true,
            ack_reason: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
    }

    #[test]
    fn test_format_issue_critical_section() {
        let report = Report {
            repository: repo(),
            is_vulnerable: true,
            vulnerabilities: vec![vuln("CVE-A", "9.5", SeverityKind::Critical)],
            outdated_acks: Vec::new(),
            issue_url: None,
            error: false,
            project_config: ProjectConfig::default(),
        };
        let body = format_issue(&report, today());
        assert!(body.contains("2026-08-29"));
        assert!(body.contains("[group/app](https://gitlab.example.com/group/app)"));
        assert!(body.contains("## Severity: CRITICAL"));
        assert!(body.contains("https://osv.dev/CVE-A"));
        assert!(body.contains("✅"));
        assert!(!body.contains("## Severity: HIGH"));
        assert!(!body.contains("Outdated Acknowledgements"));
    }

    #[test]
    fn test_format_issue_sorts_rows_by_cvss_descending() {
        let report = Report {
            repository: repo(),
            is_vulnerable: true,
            vulnerabilities: vec![
                vuln("CVE-LOW", "9.1", SeverityKind::Critical),
                vuln("CVE-HIGH", "9.9", SeverityKind::Critical),
            ],
            outdated_acks: Vec::new(),
            issue_url: None,
            error: false,
            project_config: ProjectConfig::default(),
        };
        let body = format_issue(&report, today());
        let first = body.find("CVE-HIGH").unwrap();
        let second = body.find("CVE-LOW").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_format_issue_acknowledged_reason_column() {
        let mut v = vuln("CVE-B", "8.5", SeverityKind::Acknowledged);
        v.ack_reason = Some("mitigated by WAF".to_string());
        let report = Report {
            repository: repo(),
            is_vulnerable: false,
            vulnerabilities: vec![v],
            outdated_acks: Vec::new(),
            issue_url: None,
            error: false,
            project_config: ProjectConfig::default(),
        };
        let body = format_issue(&report, today());
        assert!(body.contains("## Acknowledged"));
        assert!(body.contains("| Reason |"));
        assert!(body.contains("mitigated by WAF"));
    }

    #[test]
    fn test_format_issue_outdated_acknowledgements() {
        let report = Report {
            repository: repo(),
            is_vulnerable: false,
            vulnerabilities: Vec::new(),
            outdated_acks: vec!["CVE-B".to_string()],
            issue_url: None,
            error: false,
            project_config: ProjectConfig::default(),
        };
        let body = format_issue(&report, today());
        assert!(body.contains("## Outdated Acknowledgements"));
        assert!(body.contains("- CVE-B"));
    }
}
