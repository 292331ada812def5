//! Chat publication through the Slack Web API.
//!
//! Two variants: a fleet-wide summary message with a threaded per-severity
//! breakdown, and per-project messages for repositories whose `sheriff.toml`
//! names channels. Slack caps messages at 3000 characters, so long bodies
//! are split at newlines and sent as successive thread replies.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::model::{Report, SeverityKind, Target};

/// Slack's message size cap, in characters.
pub const MAX_MESSAGE_LEN: usize = 3000;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Posts a message to a channel by name; returns the message timestamp
    /// used to address its thread.
    async fn post_message(&self, channel: &str, text: &str) -> Result<String>;

    /// Posts a reply into a message's thread.
    async fn post_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()>;
}

/// Client for the real Slack Web API.
pub struct SlackClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    error: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url("https://slack.com/api", token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn post(&self, message: &PostMessage<'_>) -> Result<String> {
        let response: PostMessageResponse = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .await
            .context("posting slack message")?
            .error_for_status()?
            .json()
            .await
            .context("decoding slack response")?;

        if !response.ok {
            return Err(anyhow!("slack refused message: {}", response.error));
        }
        Ok(response.ts)
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post_message(&self, channel: &str, text: &str) -> Result<String> {
        self.post(&PostMessage {
            channel,
            text,
            thread_ts: None,
        })
        .await
    }

    async fn post_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        self.post(&PostMessage {
            channel,
            text,
            thread_ts: Some(thread_ts),
        })
        .await
        .map(|_| ())
    }
}

/// Splits a body into chunks of at most [`MAX_MESSAGE_LEN`] characters,
/// breaking at the latest newline within the cap. A single overlong line is
/// cut hard at the cap.
pub fn split_message(body: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = body;

    while rest.chars().count() > MAX_MESSAGE_LEN {
        let cap = rest
            .char_indices()
            .nth(MAX_MESSAGE_LEN)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        match rest[..cap].rfind('\n') {
            Some(newline) => {
                chunks.push(rest[..newline].to_string());
                rest = &rest[newline + 1..];
            }
            None => {
                chunks.push(rest[..cap].to_string());
                rest = &rest[cap..];
            }
        }
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

pub struct SlackPublisher {
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
}

impl SlackPublisher {
    pub fn new(chat: Arc<dyn ChatClient>, clock: Arc<dyn Clock>) -> Self {
        Self { chat, clock }
    }

    /// Posts one summary per channel, each followed by the per-severity
    /// breakdown in its thread. Replies go out serially so thread order is
    /// stable. Per-channel failures become warnings.
    pub async fn publish_summary(
        &self,
        targets: &[Target],
        reports: &[Report],
        channels: &[String],
    ) -> Vec<String> {
        let summary = format_summary(targets, reports, self.clock.today());
        let thread = format_thread(reports);

        let mut warnings = Vec::new();
        for channel in channels {
            if let Err(e) = self.post_with_thread(channel, &summary, &thread).await {
                warn!(channel, error = %e, "slack summary failed");
                warnings.push(format!("slack summary to {channel}: {e:#}"));
            }
        }
        warnings
    }

    /// Posts a per-repository message to every channel the repository's
    /// `sheriff.toml` names. Clean repositories with nothing to say are
    /// skipped.
    pub async fn publish_per_project(&self, reports: &[Report]) -> Vec<String> {
        let today = self.clock.today();
        let mut warnings = Vec::new();
        for report in reports {
            if !report.is_vulnerable && report.outdated_acks.is_empty() {
                continue;
            }
            let channels = report.project_config.slack_channels();
            if channels.is_empty() {
                continue;
            }
            let text = format_project_message(report, today);
            for channel in &channels {
                if let Err(e) = self.post_chunked(channel, &text).await {
                    let path = &report.repository.path;
                    warn!(channel, repo = %path, error = %e, "slack project message failed");
                    warnings.push(format!("slack message for {path} to {channel}: {e:#}"));
                }
            }
        }
        warnings
    }

    async fn post_with_thread(&self, channel: &str, summary: &str, thread: &str) -> Result<()> {
        let ts = self.chat.post_message(channel, summary).await?;
        if thread.is_empty() {
            return Ok(());
        }
        for chunk in split_message(thread) {
            self.chat.post_reply(channel, &ts, &chunk).await?;
        }
        Ok(())
    }

    async fn post_chunked(&self, channel: &str, text: &str) -> Result<()> {
        let mut chunks = split_message(text).into_iter();
        let Some(first) = chunks.next() else {
            return Ok(());
        };
        let ts = self.chat.post_message(channel, &first).await?;
        for chunk in chunks {
            self.chat.post_reply(channel, &ts, &chunk).await?;
        }
        Ok(())
    }
}

/// The fleet-wide summary message.
pub fn format_summary(targets: &[Target], reports: &[Report], today: chrono::NaiveDate) -> String {
    let target_list = targets
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut text = format!(
        ":rotating_light: Sheriff vulnerability report {}\nPatrolled: {}\nRepositories scanned: {}\n",
        today.format("%Y-%m-%d"),
        target_list,
        reports.len()
    );

    for kind in SeverityKind::DISPLAY_ORDER {
        let count: usize = reports
            .iter()
            .map(|r| r.vulnerabilities_of(kind).len())
            .sum();
        text.push_str(&format!("{}: {count}\n", kind.label()));
    }
    text
}

/// The threaded per-severity breakdown: for each kind, the affected
/// repositories grouped by their report-level maximum severity.
pub fn format_thread(reports: &[Report]) -> String {
    let mut text = String::new();
    for kind in SeverityKind::DISPLAY_ORDER {
        if kind == SeverityKind::Acknowledged {
            continue;
        }
        let affected: Vec<&Report> = reports
            .iter()
            .filter(|r| r.max_severity() == Some(kind))
            .collect();
        if affected.is_empty() {
            continue;
        }
        text.push_str(&format!("*{}*\n", kind.label()));
        for report in affected {
            let repo = &report.repository;
            let issue = report
                .issue_url
                .as_ref()
                .map(|url| format!(" (<{url}|issue>)"))
                .unwrap_or_default();
            text.push_str(&format!(
                "• <{}|{}>{} - {} vulnerabilities\n",
                repo.web_url,
                repo.path,
                issue,
                report.vulnerabilities.len()
            ));
        }
    }
    text
}

/// The per-repository message for project-configured channels.
pub fn format_project_message(report: &Report, today: chrono::NaiveDate) -> String {
    let repo = &report.repository;
    let mut text = format!(
        ":rotating_light: Sheriff report {} for <{}|{}>\n",
        today.format("%Y-%m-%d"),
        repo.web_url,
        repo.path
    );
    if let Some(kind) = report.max_severity() {
        text.push_str(&format!(
            "{} vulnerabilities, worst severity {}\n",
            report.vulnerabilities.len(),
            kind.label()
        ));
    }
    if let Some(url) = &report.issue_url {
        text.push_str(&format!("Details: <{url}|vulnerability report issue>\n"));
    }
    if !report.outdated_acks.is_empty() {
        text.push_str(&format!(
            "Outdated acknowledgements: {}\n",
            report.outdated_acks.join(", ")
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, Repository, Vulnerability};
    use crate::project_config::ProjectConfig;
    use chrono::NaiveDate;

    fn repo(path: &str) -> Repository {
        Repository {
            id: 1,
            name: path.to_string(),
            path: path.to_string(),
            web_url: format!("https://gitlab.example.com/{path}"),
            clone_url: format!("https://gitlab.example.com/{path}.git"),
            platform: Platform::Gitlab,
        }
    }

    fn vuln(kind: SeverityKind) -> Vulnerability {
        Vulnerability {
            id: "CVE-1".to_string(),
            package_name: String::new(),
            package_version: String::new(),
            package_url: String::new(),
            package_ecosystem: String::new(),
            source: String::new(),
            severity_cvss: String::new(),
            severity_kind: kind,
            summary: String::new(),
            details: String::new(),
            fix_available: false,
            ack_reason: None,
        }
    }

    fn report(path: &str, kinds: &[SeverityKind]) -> Report {
        Report {
            repository: repo(path),
            is_vulnerable: kinds.iter().any(|k| *k != SeverityKind::Acknowledged),
            vulnerabilities: kinds.iter().map(|k| vuln(*k)).collect(),
            outdated_acks: Vec::new(),
            issue_url: None,
            error: false,
            project_config: ProjectConfig::default(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
    }

    #[test]
    fn test_split_message_short_body_is_one_chunk() {
        assert_eq!(split_message("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_message_splits_at_latest_newline() {
        let line = "x".repeat(2000);
        let body = format!("{line}\n{line}\n{line}");
        let chunks = split_message(&body);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], line);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_LEN));
    }

    #[test]
    fn test_split_message_hard_cut_without_newlines() {
        let body = "y".repeat(6500);
        let chunks = split_message(&body);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(chunks[1].chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(chunks[2].chars().count(), 500);
    }

    #[test]
    fn test_split_message_empty_body() {
        assert_eq!(split_message(""), vec![String::new()]);
    }

    #[test]
    fn test_format_summary_counts_missing_kinds_as_zero() {
        let targets = vec![Target::parse("gitlab://group").unwrap()];
        let reports = vec![report("group/app", &[SeverityKind::Critical])];
        let summary = format_summary(&targets, &reports, today());
        assert!(summary.contains("Patrolled: gitlab://group"));
        assert!(summary.contains("Repositories scanned: 1"));
        assert!(summary.contains("CRITICAL: 1"));
        assert!(summary.contains("HIGH: 0"));
        assert!(summary.contains("ACKNOWLEDGED: 0"));
    }

    #[test]
    fn test_format_thread_groups_by_report_max_severity() {
        let reports = vec![
            report("group/a", &[SeverityKind::Critical, SeverityKind::Low]),
            report("group/b", &[SeverityKind::Moderate]),
            report("group/c", &[]),
        ];
        let thread = format_thread(&reports);
        let critical = thread.find("*CRITICAL*").unwrap();
        let moderate = thread.find("*MODERATE*").unwrap();
        assert!(critical < moderate);
        assert!(thread.contains("group/a"));
        assert!(thread.contains("2 vulnerabilities"));
        assert!(!thread.contains("group/c"));
    }

    #[test]
    fn test_format_thread_acknowledged_only_report_is_excluded() {
        let reports = vec![report("group/a", &[SeverityKind::Acknowledged])];
        assert!(format_thread(&reports).is_empty());
    }

    #[test]
    fn test_format_thread_links_issue_when_known() {
        let mut r = report("group/a", &[SeverityKind::High]);
        r.issue_url = Some("https://gitlab.example.com/group/a/-/issues/1".to_string());
        let thread = format_thread(&[r]);
        assert!(thread.contains("|issue>"));
    }

    #[test]
    fn test_format_project_message() {
        let mut r = report("group/a", &[SeverityKind::High]);
        r.outdated_acks = vec!["CVE-OLD".to_string()];
        let text = format_project_message(&r, today());
        assert!(text.contains("group/a"));
        assert!(text.contains("worst severity HIGH"));
        assert!(text.contains("CVE-OLD"));
    }
}
