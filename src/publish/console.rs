//! Plain-text publication to stdout.

use tabled::{settings::Style, Table, Tabled};

use crate::model::Report;

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Repository")]
    path: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Vulnerabilities")]
    vulnerabilities: String,
}

/// Renders the patrol summary as text.
pub fn format_console(reports: &[Report]) -> String {
    let mut out = format!("Scanned {} repositories\n", reports.len());
    if reports.is_empty() {
        return out;
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|r| ReportRow {
            path: r.repository.path.clone(),
            url: r.repository.web_url.clone(),
            vulnerabilities: if r.error {
                "scan failed".to_string()
            } else {
                r.vulnerabilities.len().to_string()
            },
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    out.push_str(&table);
    out.push('\n');
    out
}

/// Prints the patrol summary to stdout.
pub fn publish(reports: &[Report]) {
    print!("{}", format_console(reports));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, Repository};
    use crate::project_config::ProjectConfig;

    fn report(path: &str, error: bool) -> Report {
        Report {
            repository: Repository {
                id: 1,
                name: path.to_string(),
                path: path.to_string(),
                web_url: format!("https://gitlab.example.com/{path}"),
                clone_url: format!("https://gitlab.example.com/{path}.git"),
                platform: Platform::Gitlab,
            },
            is_vulnerable: false,
            vulnerabilities: Vec::new(),
            outdated_acks: Vec::new(),
            issue_url: None,
            error,
            project_config: ProjectConfig::default(),
        }
    }

    #[test]
    fn test_format_console_lists_each_repository() {
        let out = format_console(&[report("group/a", false), report("group/b", true)]);
        assert!(out.contains("Scanned 2 repositories"));
        assert!(out.contains("group/a"));
        assert!(out.contains("group/b"));
        assert!(out.contains("scan failed"));
    }

    #[test]
    fn test_format_console_empty() {
        let out = format_console(&[]);
        assert_eq!(out, "Scanned 0 repositories\n");
    }
}
