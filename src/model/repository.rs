use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Gitlab,
    Github,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Gitlab => "gitlab",
            Platform::Github => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Gitlab => "GitLab",
            Platform::Github => "GitHub",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A user-supplied patrol target: either a group/organization path
/// (recursive) or a fully-qualified repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub platform: Platform,
    pub path: String,
}

impl Target {
    /// Parses a target URL of the form `gitlab://group/subgroup` or
    /// `github://owner/name`.
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, path) = s
            .split_once("://")
            .ok_or_else(|| anyhow!("invalid target {s:?}: expected <platform>://<path>"))?;

        let platform = match scheme {
            "gitlab" => Platform::Gitlab,
            "github" => Platform::Github,
            _ => return Err(anyhow!("unknown platform {scheme:?} in target {s:?}")),
        };

        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(anyhow!("invalid target {s:?}: empty path"));
        }

        Ok(Self {
            platform,
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.platform.as_str(), self.path)
    }
}

/// A repository discovered during patrol. Unique per `(platform, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub web_url: String,
    pub clone_url: String,
    pub platform: Platform,
}

impl Repository {
    /// The deduplication key used across overlapping targets.
    pub fn key(&self) -> (Platform, u64) {
        (self.platform, self.id)
    }
}

/// A tracker issue on the hosting platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub web_url: String,
}
