//! Per-repository policy file handling.
//!
//! Each scanned repository may carry a `sheriff.toml` at its root:
//!
//! ```toml
//! [report.to]
//! slack-channel = "team-security"   # or: slack-channels = ["a", "b"]
//!
//! [[acknowledged]]
//! code = "CVE-2024-XXXX"
//! reason = "Not exploitable in our usage"
//! ```
//!
//! A missing file yields the empty default. A malformed file is a non-fatal
//! warning and the empty default is used, so one broken repository never
//! stops a patrol. Unknown keys are logged but never rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

pub const PROJECT_CONFIG_FILE: &str = "sheriff.toml";

/// An explicitly accepted finding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Acknowledgement {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportTo {
    #[serde(rename = "slack-channel", skip_serializing_if = "Option::is_none")]
    pub slack_channel: Option<String>,
    #[serde(rename = "slack-channels", skip_serializing_if = "Vec::is_empty")]
    pub slack_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub to: ReportTo,
}

/// Contents of a repository's `sheriff.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub acknowledged: Vec<Acknowledgement>,
    pub report: ReportConfig,
    /// Pre-`[report.to]` location of the channel key, still honored.
    #[serde(rename = "slack-channel", skip_serializing_if = "Option::is_none")]
    pub legacy_slack_channel: Option<String>,
}

impl ProjectConfig {
    /// All configured Slack channels, with the legacy single-channel keys
    /// merged in, de-duplicated.
    pub fn slack_channels(&self) -> BTreeSet<String> {
        let mut channels: BTreeSet<String> =
            self.report.to.slack_channels.iter().cloned().collect();
        if let Some(channel) = &self.report.to.slack_channel {
            channels.insert(channel.clone());
        }
        if let Some(channel) = &self.legacy_slack_channel {
            channels.insert(channel.clone());
        }
        channels.retain(|c| !c.is_empty());
        channels
    }

    /// The acknowledgement for a vulnerability id, if any.
    pub fn acknowledgement(&self, code: &str) -> Option<&Acknowledgement> {
        self.acknowledged.iter().find(|a| a.code == code)
    }
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["acknowledged", "report", "slack-channel"];

/// Loads `<dir>/sheriff.toml`.
///
/// Never fails: absence is the default config, a malformed file is logged
/// and also yields the default.
pub fn load(dir: &Path) -> ProjectConfig {
    let path = dir.join(PROJECT_CONFIG_FILE);

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ProjectConfig::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read project config");
            return ProjectConfig::default();
        }
    };

    // Surface unknown keys without rejecting the file for them.
    if let Ok(table) = content.parse::<toml::Table>() {
        for key in table.keys() {
            if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                warn!(path = %path.display(), key = %key, "unknown key in project config");
            }
        }
    }

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed project config, using defaults");
            ProjectConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(dir.path());
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_malformed_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "not [ valid { toml").unwrap();
        let config = load(dir.path());
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_full_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            r#"
            [report.to]
            slack-channels = ["team-a", "team-b"]

            [[acknowledged]]
            code = "CVE-2024-0001"
            reason = "mitigated by WAF"
            "#,
        )
        .unwrap();

        let config = load(dir.path());
        assert_eq!(config.acknowledged.len(), 1);
        assert_eq!(config.acknowledged[0].code, "CVE-2024-0001");
        assert_eq!(config.acknowledged[0].reason, "mitigated by WAF");
        let channels: Vec<_> = config.slack_channels().into_iter().collect();
        assert_eq!(channels, vec!["team-a", "team-b"]);
    }

    #[test]
    fn test_legacy_top_level_channel_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            r#"
            slack-channel = "legacy-channel"

            [report.to]
            slack-channel = "modern-channel"
            "#,
        )
        .unwrap();

        let config = load(dir.path());
        let channels = config.slack_channels();
        assert!(channels.contains("legacy-channel"));
        assert!(channels.contains("modern-channel"));
    }

    #[test]
    fn test_unknown_keys_do_not_reject() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            r#"
            some-future-key = true

            [[acknowledged]]
            code = "GHSA-1"
            reason = "dev dependency only"
            "#,
        )
        .unwrap();

        let config = load(dir.path());
        assert_eq!(config.acknowledged.len(), 1);
    }

    #[test]
    fn test_channel_merge_deduplicates() {
        let config = ProjectConfig {
            report: ReportConfig {
                to: ReportTo {
                    slack_channel: Some("team".to_string()),
                    slack_channels: vec!["team".to_string(), "other".to_string()],
                },
            },
            ..Default::default()
        };
        assert_eq!(config.slack_channels().len(), 2);
    }

    #[test]
    fn test_acknowledgement_lookup() {
        let config = ProjectConfig {
            acknowledged: vec![Acknowledgement {
                code: "CVE-1".to_string(),
                reason: "accepted".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.acknowledgement("CVE-1").is_some());
        assert!(config.acknowledgement("CVE-2").is_none());
    }
}
