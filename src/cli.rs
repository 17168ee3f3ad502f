use clap::Parser;
use std::path::PathBuf;

use crate::backend::BackendKind;
use crate::config::{Config, ConflictPolicy};
use crate::error::{Result, SubFinderError};

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Find and download subtitles for video files", long_about = None)]
pub struct Args {
    /// Video file or directory to search subtitles for
    pub path: Option<PathBuf>,

    /// Subtitle languages, highest priority first (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub languages: Vec<String>,

    /// Subtitle formats, highest priority first (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub exts: Vec<String>,

    /// Backends to search with, in order (comma-separated or repeated)
    #[arg(short, long = "method", value_delimiter = ',')]
    pub methods: Vec<String>,

    /// Search keyword, only allowed when a single video file is found
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Extra video extensions (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub video_exts: Vec<String>,

    /// Exclude files or directories matching a glob; end with `/` for directories
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,

    /// Search subtitles even if a local subtitle already exists
    #[arg(long)]
    pub ignore: bool,

    /// Endpoint override as NAME=URL, e.g. shooter=http://localhost:8080/api
    #[arg(long = "api-urls")]
    pub api_urls: Vec<String>,

    /// Don't insert the ordering marker into subtitle file names
    #[arg(long)]
    pub no_order_marker: bool,

    /// Don't print anything
    #[arg(short, long)]
    pub silence: bool,

    /// Show full error details
    #[arg(long)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent download workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// What to do when a subtitle file already exists: overwrite, skip or rename
    #[arg(long)]
    pub on_conflict: Option<String>,

    /// OpenSubtitles API key
    #[arg(long, env = "OPENSUBTITLES_API_KEY", hide_env_values = true)]
    pub opensubtitles_api_key: Option<String>,
}

impl Args {
    /// Override `config` with every flag given on the command line
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if !self.languages.is_empty() {
            config.languages = Some(trimmed(&self.languages));
        }
        if !self.exts.is_empty() {
            config.exts = Some(trimmed(&self.exts));
        }
        if !self.methods.is_empty() {
            config.backends.order = self
                .methods
                .iter()
                .map(|method| method.parse::<BackendKind>())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(keyword) = &self.keyword {
            config.keyword = Some(keyword.clone());
        }
        config.video_exts.extend(trimmed(&self.video_exts));
        config.exclude.extend(self.exclude.iter().cloned());
        for entry in &self.api_urls {
            let (name, url) = parse_api_url(entry)?;
            config.backends.api_urls.insert(name, url);
        }
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        if let Some(policy) = &self.on_conflict {
            config.on_conflict = policy.parse::<ConflictPolicy>()?;
        }
        if let Some(key) = &self.opensubtitles_api_key {
            config.backends.opensubtitles_api_key = Some(key.clone());
        }

        config.ignore |= self.ignore;
        config.no_order_marker |= self.no_order_marker;
        config.silence |= self.silence;
        config.debug |= self.debug;

        Ok(())
    }
}

fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Parse a `NAME=URL` endpoint override
fn parse_api_url(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
            Ok((name.trim().to_lowercase(), url.trim().to_string()))
        }
        _ => Err(SubFinderError::Config(format!(
            "Invalid API URL override '{}'. Expected NAME=URL",
            entry
        ))),
    }
}
