//! Normalization of raw scanner output into the internal report model.
//!
//! [`normalize`] is a pure function: raw findings plus the repository's
//! policy config go in, a [`Report`] honoring the acknowledgement rules
//! comes out. No I/O happens here.

use std::collections::BTreeSet;
use std::path::Path;

use crate::model::{Report, Repository, SeverityKind, Vulnerability};
use crate::project_config::ProjectConfig;
use crate::scan::{RawPackage, RawReport, RawVulnerability};

/// Severity tiers, most severe first. The single source of truth for
/// classification; display code reuses the same order.
pub const SEVERITY_THRESHOLDS: [(SeverityKind, f64); 4] = [
    (SeverityKind::Critical, 9.0),
    (SeverityKind::High, 8.0),
    (SeverityKind::Moderate, 3.0),
    (SeverityKind::Low, 0.0),
];

/// Maps a verbatim CVSS string to a severity kind.
///
/// Picks the most severe tier whose threshold the parsed score reaches.
/// Empty or unparseable scores (and negatives) classify as `Unknown`.
/// `Acknowledged` is never produced here; that is the acknowledgement
/// pass's job.
pub fn classify_severity(cvss: &str) -> SeverityKind {
    let Ok(value) = cvss.trim().parse::<f64>() else {
        return SeverityKind::Unknown;
    };
    for (kind, threshold) in SEVERITY_THRESHOLDS {
        if value >= threshold {
            return kind;
        }
    }
    SeverityKind::Unknown
}

/// Builds a [`Report`] from raw scanner output and the project's policy.
///
/// `raw` is `None` when the scanner found nothing. Vulnerabilities keep
/// scanner insertion order; display ordering belongs to the publishers.
pub fn normalize(raw: Option<RawReport>, repository: Repository, config: ProjectConfig) -> Report {
    let mut vulnerabilities = Vec::new();
    let mut used_acks = BTreeSet::new();

    for result in raw.map(|r| r.results).unwrap_or_default() {
        let source = basename(&result.source.path);
        for package in &result.packages {
            for raw_vuln in &package.vulnerabilities {
                let mut vuln = build_vulnerability(raw_vuln, package, &source);
                if let Some(ack) = config.acknowledgement(&vuln.id) {
                    vuln.severity_kind = SeverityKind::Acknowledged;
                    vuln.ack_reason = Some(ack.reason.clone());
                    used_acks.insert(ack.code.clone());
                }
                vulnerabilities.push(vuln);
            }
        }
    }

    let outdated_acks = config
        .acknowledged
        .iter()
        .map(|a| a.code.clone())
        .filter(|code| !used_acks.contains(code))
        .collect();

    let is_vulnerable = vulnerabilities
        .iter()
        .any(|v| v.severity_kind != SeverityKind::Acknowledged);

    Report {
        repository,
        is_vulnerable,
        vulnerabilities,
        outdated_acks,
        issue_url: None,
        error: false,
        project_config: config,
    }
}

fn build_vulnerability(raw: &RawVulnerability, package: &RawPackage, source: &str) -> Vulnerability {
    let package_url = raw
        .references
        .iter()
        .find(|r| r.reference_type == "PACKAGE")
        .map(|r| r.url.clone())
        .unwrap_or_default();

    // The scanner reports scores per advisory group, not per advisory.
    let severity_cvss = package
        .groups
        .iter()
        .find(|g| g.ids.contains(&raw.id) || g.aliases.contains(&raw.id))
        .map(|g| g.max_severity.clone())
        .unwrap_or_default();

    let fix_available = raw.affected.iter().any(|affected| {
        affected.ranges.iter().any(|range| {
            range
                .events
                .iter()
                .any(|event| event.fixed.as_deref().is_some_and(|f| !f.is_empty()))
        })
    });

    Vulnerability {
        id: raw.id.clone(),
        package_name: package.package.name.clone(),
        package_version: package.package.version.clone(),
        package_url,
        package_ecosystem: package.package.ecosystem.clone(),
        source: source.to_string(),
        severity_kind: classify_severity(&severity_cvss),
        severity_cvss,
        summary: raw.summary.clone(),
        details: raw.details.clone(),
        fix_available,
        ack_reason: None,
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
