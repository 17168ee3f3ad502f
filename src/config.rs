use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backend::BackendKind;
use crate::error::{Result, SubFinderError};
use crate::scanner::PathFilter;

/// Video extensions recognized without any configuration.
pub const DEFAULT_VIDEO_EXTS: [&str; 5] = [".mkv", ".mp4", ".ts", ".avi", ".wmv"];

/// Subtitle extensions used for existing-subtitle detection when none are configured.
pub const DEFAULT_SUBTITLE_EXTS: [&str; 2] = ["ass", "srt"];

fn default_workers() -> usize {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("subfinder/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File or directory to search subtitles for
    pub path: PathBuf,
    /// Preferred subtitle languages, highest priority first
    pub languages: Option<Vec<String>>,
    /// Accepted subtitle extensions, highest priority first
    pub exts: Option<Vec<String>>,
    /// Extra video extensions, added to the defaults
    pub video_exts: Vec<String>,
    /// Search keyword, only valid when exactly one video file is found
    pub keyword: Option<String>,
    /// Glob patterns matched against file and directory basenames.
    /// A pattern ending with `/` excludes a whole directory.
    pub exclude: Vec<String>,
    /// Search subtitles even if a local subtitle already exists
    pub ignore: bool,
    /// Don't insert the `.NNNNN` ordering marker into subtitle filenames
    pub no_order_marker: bool,
    /// What to do when a subtitle file with the same name already exists
    pub on_conflict: ConflictPolicy,
    /// Don't print anything
    pub silence: bool,
    /// Full diagnostics, including error details
    pub debug: bool,
    pub pool: PoolConfig,
    pub http: HttpConfig,
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent download workers. 0 or 1 runs everything inline.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Idle connections kept per host; raised to the worker count if lower
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Backends to try, in order
    #[serde(default = "BackendKind::all")]
    pub order: Vec<BackendKind>,
    /// Endpoint overrides keyed by backend name
    #[serde(default)]
    pub api_urls: HashMap<String, String>,
    #[serde(default)]
    pub opensubtitles_api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the existing file
    #[default]
    Overwrite,
    /// Keep the existing file and don't write the new one
    Skip,
    /// Write the new file under a numbered name
    Rename,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Rename => "rename",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictPolicy {
    type Err = SubFinderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "skip" => Ok(ConflictPolicy::Skip),
            "rename" => Ok(ConflictPolicy::Rename),
            _ => Err(SubFinderError::Config(format!(
                "Invalid conflict policy '{}'. Valid policies: overwrite, skip, rename",
                s
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./"),
            languages: None,
            exts: None,
            video_exts: Vec::new(),
            keyword: None,
            exclude: Vec::new(),
            ignore: false,
            no_order_marker: false,
            on_conflict: ConflictPolicy::default(),
            silence: false,
            debug: false,
            pool: PoolConfig::default(),
            http: HttpConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            order: BackendKind::all(),
            api_urls: HashMap::new(),
            opensubtitles_api_key: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubFinderError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubFinderError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Resolve the root path to an absolute path and reject settings that
    /// can't produce a meaningful run.
    pub fn validate(mut self) -> Result<Self> {
        self.path = std::path::absolute(&self.path).map_err(|e| {
            SubFinderError::Config(format!(
                "Cannot resolve path {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if self.backends.order.is_empty() {
            return Err(SubFinderError::Config(
                "At least one backend must be configured".to_string(),
            ));
        }

        match self.keyword.as_deref() {
            Some("") => self.keyword = None,
            Some(keyword) if keyword.trim().is_empty() => {
                return Err(SubFinderError::Usage(
                    "`keyword` must not be blank".to_string(),
                ));
            }
            _ => {}
        }

        self.video_exts = self.video_exts.iter().map(|ext| normalize_video_ext(ext)).collect();

        // Malformed exclusion patterns fail here rather than mid-scan
        PathFilter::from_config(&self)?;

        Ok(self)
    }

    /// Default video extensions plus the configured additions, each with a
    /// leading dot and lowercased.
    pub fn video_extensions(&self) -> BTreeSet<String> {
        DEFAULT_VIDEO_EXTS
            .iter()
            .map(|ext| ext.to_string())
            .chain(self.video_exts.iter().map(|ext| normalize_video_ext(ext)))
            .collect()
    }

    /// Subtitle extensions without a leading dot.
    pub fn subtitle_extensions(&self) -> Vec<String> {
        match &self.exts {
            Some(exts) if !exts.is_empty() => exts
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
            _ => DEFAULT_SUBTITLE_EXTS.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    pub fn executor_workers(&self) -> usize {
        self.pool.workers.max(1)
    }
}

fn normalize_video_ext(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
