use serde::{Deserialize, Serialize};

use super::Repository;
use crate::project_config::ProjectConfig;

/// Severity taxonomy, ordered so that `Critical` compares greatest.
///
/// `Acknowledged` sorts last for display but is a distinct class:
/// acknowledged findings never contribute to a report's vulnerable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityKind {
    Acknowledged,
    Unknown,
    Low,
    Moderate,
    High,
    Critical,
}

impl SeverityKind {
    /// All kinds in display order, most severe first.
    pub const DISPLAY_ORDER: [SeverityKind; 6] = [
        SeverityKind::Critical,
        SeverityKind::High,
        SeverityKind::Moderate,
        SeverityKind::Low,
        SeverityKind::Unknown,
        SeverityKind::Acknowledged,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SeverityKind::Critical => "CRITICAL",
            SeverityKind::High => "HIGH",
            SeverityKind::Moderate => "MODERATE",
            SeverityKind::Low => "LOW",
            SeverityKind::Unknown => "UNKNOWN",
            SeverityKind::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

impl std::fmt::Display for SeverityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A normalized scanner finding for one package in one lockfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub package_name: String,
    pub package_version: String,
    pub package_url: String,
    pub package_ecosystem: String,
    /// Basename of the lockfile the finding came from.
    pub source: String,
    /// CVSS score exactly as emitted by the scanner; may be empty.
    pub severity_cvss: String,
    pub severity_kind: SeverityKind,
    pub summary: String,
    pub details: String,
    pub fix_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_reason: Option<String>,
}

impl Vulnerability {
    /// The advisory page for this finding.
    pub fn osv_url(&self) -> String {
        format!("https://osv.dev/{}", self.id)
    }

    /// Parses the verbatim CVSS string, when it is numeric.
    pub fn parsed_cvss(&self) -> Option<f64> {
        self.severity_cvss.parse().ok()
    }
}

/// Per-repository outcome of one patrol run.
#[derive(Debug, Clone)]
pub struct Report {
    pub repository: Repository,
    /// True iff at least one finding is not acknowledged.
    pub is_vulnerable: bool,
    /// Findings in scanner insertion order; display ordering is the
    /// publishers' concern.
    pub vulnerabilities: Vec<Vulnerability>,
    /// Acknowledged codes from the project config that matched no finding.
    pub outdated_acks: Vec<String>,
    /// Set by the issue publisher once an issue is opened or updated.
    pub issue_url: Option<String>,
    /// True when clone or scan failed for this repository.
    pub error: bool,
    pub project_config: ProjectConfig,
}

impl Report {
    /// A report recording a per-repository failure (clone or scan).
    pub fn failed(repository: Repository) -> Self {
        Self {
            repository,
            is_vulnerable: false,
            vulnerabilities: Vec::new(),
            outdated_acks: Vec::new(),
            issue_url: None,
            error: true,
            project_config: ProjectConfig::default(),
        }
    }

    /// The most severe kind among non-acknowledged findings, if any.
    pub fn max_severity(&self) -> Option<SeverityKind> {
        self.vulnerabilities
            .iter()
            .map(|v| v.severity_kind)
            .filter(|k| *k != SeverityKind::Acknowledged)
            .max()
    }

    /// Findings of one kind, in insertion order.
    pub fn vulnerabilities_of(&self, kind: SeverityKind) -> Vec<&Vulnerability> {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity_kind == kind)
            .collect()
    }
}
