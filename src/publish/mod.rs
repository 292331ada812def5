//! Report publication channels.
//!
//! Every publisher receives the final report list and accumulates
//! per-target failures into warnings instead of failing the run:
//!
//! - [`issue::IssuePublisher`] - tracker issues on the hosting platform
//! - [`slack`] - chat summary + thread, and per-project messages
//! - [`console`] - plain text on stdout

pub mod console;
pub mod issue;
pub mod slack;

use std::cmp::Ordering;

use crate::model::Vulnerability;

/// Display order within a severity section: parsed CVSS descending, falling
/// back to lexicographic descending when a score does not parse, then id
/// ascending for full determinism.
pub(crate) fn display_order(a: &Vulnerability, b: &Vulnerability) -> Ordering {
    let by_score = match (a.parsed_cvss(), b.parsed_cvss()) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.severity_cvss.cmp(&a.severity_cvss),
    };
    by_score.then_with(|| a.id.cmp(&b.id))
}

/// Sorts a severity section for display.
pub(crate) fn sorted_for_display<'a>(vulns: Vec<&'a Vulnerability>) -> Vec<&'a Vulnerability> {
    let mut vulns = vulns;
    vulns.sort_by(|a, b| display_order(a, b));
    vulns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeverityKind;

    fn vuln(id: &str, cvss: &str) -> Vulnerability {
        Vulnerability {
            id: id.to_string(),
            package_name: String::new(),
            package_version: String::new(),
            package_url: String::new(),
            package_ecosystem: String::new(),
            source: String::new(),
            severity_cvss: cvss.to_string(),
            severity_kind: SeverityKind::Unknown,
            summary: String::new(),
            details: String::new(),
            fix_available: false,
            ack_reason: None,
        }
    }

    #[test]
    fn test_display_order_by_parsed_score_descending() {
        let a = vuln("CVE-1", "7.5");
        let b = vuln("CVE-2", "9.8");
        let sorted = sorted_for_display(vec![&a, &b]);
        assert_eq!(sorted[0].id, "CVE-2");
    }

    #[test]
    fn test_display_order_lexicographic_fallback() {
        let a = vuln("CVE-1", "");
        let b = vuln("CVE-2", "CVSS:3.1/B");
        let sorted = sorted_for_display(vec![&a, &b]);
        assert_eq!(sorted[0].id, "CVE-2");
    }

    #[test]
    fn test_display_order_parseable_scores_sort_first() {
        let a = vuln("CVE-1", "not-a-number");
        let b = vuln("CVE-2", "0.1");
        let sorted = sorted_for_display(vec![&a, &b]);
        assert_eq!(sorted[0].id, "CVE-2");
    }

    #[test]
    fn test_display_order_ties_break_by_id() {
        let a = vuln("CVE-B", "5.0");
        let b = vuln("CVE-A", "5.0");
        let sorted = sorted_for_display(vec![&a, &b]);
        assert_eq!(sorted[0].id, "CVE-A");
    }
}
