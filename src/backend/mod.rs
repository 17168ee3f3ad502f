// Subtitle search backends
//
// Each backend knows how to talk to one subtitle provider. Backends are
// created once per engine by BackendFactory from an explicit BackendKind list
// and share a single HTTP client:
// - Shooter: file-hash lookup against the shooter.cn API
// - OpenSubtitles: moviehash and title search against the OpenSubtitles REST API
//
// To add a backend:
// 1. Implement SearchBackend for it in its own module
// 2. Add a variant to BackendKind and list it in BackendKind::all()
// 3. Create it in BackendFactory::create

pub mod common;
pub mod opensubtitles;
pub mod shooter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use common::*;
use crate::config::{Config, HttpConfig};
use crate::error::{Result, SubFinderError};

/// How a subtitle file reaches the disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitlePayload {
    /// The backend already wrote the file next to the video
    Persisted,
    /// File content to write
    Bytes(Vec<u8>),
    /// URL to download the content from
    Link(String),
}

/// One output file of a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleFile {
    /// File name, relative to the video's directory
    pub name: String,
    pub payload: SubtitlePayload,
}

/// One search result. A single result may expand into several files,
/// e.g. one per language track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtitleDescriptor {
    /// Page or download link the result came from
    pub link: Option<String>,
    pub languages: Vec<String>,
    pub exts: Vec<String>,
    pub files: Vec<SubtitleFile>,
}

impl SubtitleDescriptor {
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }
}

/// Search parameters shared by every backend call of a run
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Preferred languages, `None` lets the backend use its own defaults
    pub languages: Option<Vec<String>>,
    /// Accepted subtitle extensions, `None` lets the backend decide
    pub exts: Option<Vec<String>>,
    /// Search term replacing the one derived from the video name
    pub keyword: Option<String>,
}

impl SearchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            languages: config.languages.clone().filter(|l| !l.is_empty()),
            exts: config.exts.clone().filter(|e| !e.is_empty()),
            keyword: config.keyword.clone(),
        }
    }
}

/// Main trait for subtitle search operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short name used in logs, configuration and endpoint overrides
    fn name(&self) -> &'static str;

    /// Search subtitles for `video`. An empty result means nothing was
    /// found and is not an error.
    async fn search(&self, video: &Path, options: &SearchOptions)
        -> Result<Vec<SubtitleDescriptor>>;
}

/// Known backends, in default priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Shooter,
    OpenSubtitles,
}

impl BackendKind {
    pub fn all() -> Vec<BackendKind> {
        vec![BackendKind::Shooter, BackendKind::OpenSubtitles]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Shooter => shooter::SHORTNAME,
            BackendKind::OpenSubtitles => opensubtitles::SHORTNAME,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = SubFinderError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        BackendKind::all()
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = BackendKind::all().iter().map(|k| k.name()).collect();
                SubFinderError::Config(format!(
                    "Unknown backend '{}'. Valid backends: {}",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// Everything a backend needs from the engine
#[derive(Clone)]
pub struct BackendContext {
    pub client: reqwest::Client,
    pub api_urls: HashMap<String, String>,
    pub namer: SubtitleNamer,
    pub opensubtitles_api_key: Option<String>,
}

impl BackendContext {
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            api_urls: config.backends.api_urls.clone(),
            namer: SubtitleNamer::new(
                config.languages.as_deref(),
                config.exts.as_deref(),
                config.no_order_marker,
            ),
            opensubtitles_api_key: config.backends.opensubtitles_api_key.clone(),
        }
    }

    /// Endpoint for `backend`, honouring overrides
    pub fn api_url(&self, backend: &str, default: &str) -> String {
        self.api_urls
            .get(backend)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// Factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(kind: BackendKind, context: &BackendContext) -> Arc<dyn SearchBackend> {
        match kind {
            BackendKind::Shooter => Arc::new(shooter::ShooterBackend::new(context)),
            BackendKind::OpenSubtitles => {
                Arc::new(opensubtitles::OpenSubtitlesBackend::new(context))
            }
        }
    }

    /// Create backends in the given order, dropping repeats
    pub fn create_all(kinds: &[BackendKind], context: &BackendContext) -> Vec<Arc<dyn SearchBackend>> {
        let mut seen = Vec::new();
        kinds
            .iter()
            .filter(|kind| {
                if seen.contains(*kind) {
                    false
                } else {
                    seen.push(**kind);
                    true
                }
            })
            .map(|kind| Self::create(*kind, context))
            .collect()
    }
}

/// Build the HTTP client shared by all backends and downloads. The idle
/// pool is never smaller than the number of workers.
pub fn build_http_client(config: &HttpConfig, workers: usize) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .pool_max_idle_per_host(config.pool_max_idle_per_host.max(workers))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(SubFinderError::Http)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("shooter".parse::<BackendKind>().unwrap(), BackendKind::Shooter);
        assert_eq!(
            " OpenSubtitles ".parse::<BackendKind>().unwrap(),
            BackendKind::OpenSubtitles
        );
        assert!(matches!(
            "zimuku".parse::<BackendKind>(),
            Err(SubFinderError::Config(_))
        ));
    }

    #[test]
    fn test_factory_keeps_order_and_drops_repeats() {
        let context = BackendContext::from_config(&Config::default(), reqwest::Client::new());
        let backends = BackendFactory::create_all(
            &[
                BackendKind::OpenSubtitles,
                BackendKind::Shooter,
                BackendKind::OpenSubtitles,
            ],
            &context,
        );
        let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["opensubtitles", "shooter"]);
    }

    #[test]
    fn test_api_url_override() {
        let mut config = Config::default();
        config
            .backends
            .api_urls
            .insert("shooter".to_string(), "http://localhost:8080/api".to_string());
        let context = BackendContext::from_config(&config, reqwest::Client::new());

        assert_eq!(
            context.api_url("shooter", shooter::API_URL),
            "http://localhost:8080/api"
        );
        assert_eq!(
            context.api_url("opensubtitles", opensubtitles::API_URL),
            opensubtitles::API_URL
        );
    }

    #[test]
    fn test_search_options_drop_empty_lists() {
        let config = Config {
            languages: Some(vec![]),
            exts: Some(vec!["srt".to_string()]),
            ..Config::default()
        };
        let options = SearchOptions::from_config(&config);
        assert!(options.languages.is_none());
        assert_eq!(options.exts, Some(vec!["srt".to_string()]));
    }
}
