//! Adapter around the external `osv-scanner` binary.
//!
//! The scanner is invoked recursively on a cloned working tree and its JSON
//! output is deserialized into [`RawReport`]. Exit codes follow the
//! osv-scanner convention: 0 means no findings, 1 means findings were
//! produced on stdout, anything else means the scanner itself failed.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::runner::CommandRunner;

const SCANNER_PROGRAM: &str = "osv-scanner";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to launch {SCANNER_PROGRAM}: {0}")]
    Launch(#[source] anyhow::Error),
    #[error("{SCANNER_PROGRAM} failed with exit code {0}")]
    ScannerFailed(i32),
    #[error("failed to parse {SCANNER_PROGRAM} output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    /// Scans a working tree. `Ok(None)` means no vulnerabilities.
    async fn scan(&self, dir: &Path) -> Result<Option<RawReport>, ScanError>;
}

/// Invokes the real osv-scanner through a [`CommandRunner`].
pub struct OsvScanner {
    runner: Arc<dyn CommandRunner>,
}

impl OsvScanner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl VulnerabilityScanner for OsvScanner {
    async fn scan(&self, dir: &Path) -> Result<Option<RawReport>, ScanError> {
        let dir = dir.to_string_lossy();
        let args = ["-r", "--verbosity", "error", "--format", "json", dir.as_ref()];

        let output = self
            .runner
            .run(SCANNER_PROGRAM, &args)
            .await
            .map_err(ScanError::Launch)?;

        match output.exit_code {
            0 => Ok(None),
            1 => {
                let report: RawReport = serde_json::from_slice(&output.stdout)?;
                Ok(Some(report))
            }
            code => Err(ScanError::ScannerFailed(code)),
        }
    }
}

// Wire format of `osv-scanner --format json`. Only the fields sheriff
// consumes are modeled; unknown fields are ignored by serde.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReport {
    #[serde(default)]
    pub results: Vec<RawResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResult {
    #[serde(default)]
    pub source: RawSource,
    #[serde(default)]
    pub packages: Vec<RawPackage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSource {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPackage {
    #[serde(default)]
    pub package: RawPackageInfo,
    #[serde(default)]
    pub vulnerabilities: Vec<RawVulnerability>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPackageInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub ecosystem: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVulnerability {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, alias = "detail")]
    pub details: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub references: Vec<RawReference>,
    #[serde(default)]
    pub database_specific: RawDatabaseSpecific,
    #[serde(default)]
    pub affected: Vec<RawAffected>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReference {
    #[serde(default, rename = "type")]
    pub reference_type: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDatabaseSpecific {
    #[serde(default)]
    pub severity: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAffected {
    #[serde(default)]
    pub ranges: Vec<RawRange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRange {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub introduced: Option<String>,
    #[serde(default)]
    pub fixed: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGroup {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub max_severity: String,
}
