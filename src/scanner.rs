//! Video file discovery.
//!
//! [`PathFilter`] walks a root path and yields the video files that still
//! need subtitles. A file is a video when its guessed MIME type is `video/*`
//! or its extension is one of the configured video extensions.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Result, SubFinderError};

/// A video file selected for subtitle search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Candidate {
    path: PathBuf,
}

impl Candidate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name including extension
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }

    /// File name without extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }

    /// Directory that holds the video and receives its subtitles
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

pub struct PathFilter {
    video_exts: BTreeSet<String>,
    subtitle_exts: Vec<String>,
    exclude: Vec<GlobMatcher>,
    ignore: bool,
}

impl PathFilter {
    /// `video_exts` carry a leading dot, `subtitle_exts` don't.
    pub fn new(
        video_exts: BTreeSet<String>,
        subtitle_exts: Vec<String>,
        exclude: &[String],
        ignore: bool,
    ) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|pattern| build_matcher(pattern))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            video_exts,
            subtitle_exts,
            exclude,
            ignore,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.video_extensions(),
            config.subtitle_extensions(),
            &config.exclude,
            config.ignore,
        )
    }

    /// Lazily yield every candidate under `root`. Each call walks the
    /// filesystem again.
    pub fn scan<'a>(&'a self, root: &'a Path) -> Box<dyn Iterator<Item = Candidate> + 'a> {
        if root.is_file() {
            return Box::new(self.accept(root).into_iter());
        }

        if !root.is_dir() {
            debug!("Nothing to scan at {}", root.display());
            return Box::new(std::iter::empty());
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                let pruned = entry.depth() > 0
                    && entry.file_type().is_dir()
                    && self.is_excluded_dir(entry.file_name());
                if pruned {
                    debug!("Excluded directory: {}", entry.path().display());
                }
                !pruned
            });

        Box::new(
            walker
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        let path = e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default();
                        warn!("Skipping unreadable path {}: {}", path, e);
                        None
                    }
                })
                .filter(|entry| !entry.file_type().is_dir())
                .filter_map(move |entry| self.accept(entry.path())),
        )
    }

    fn accept(&self, path: &Path) -> Option<Candidate> {
        if !self.is_video_file(path) {
            return None;
        }

        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if self.is_excluded(&name) {
            debug!("Excluded: {}", path.display());
            return None;
        }

        if !self.ignore && self.has_subtitles(path) {
            debug!("Already has subtitles: {}", path.display());
            return None;
        }

        Some(Candidate::new(path))
    }

    pub fn is_video_file(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }

        let is_video_mime = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.type_() == mime_guess::mime::VIDEO)
            .unwrap_or(false);

        is_video_mime
            || path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| self.video_exts.contains(&format!(".{}", ext.to_lowercase())))
                .unwrap_or(false)
    }

    /// Match a file basename against the exclusion patterns.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|matcher| matcher.is_match(name))
    }

    fn is_excluded_dir(&self, name: &OsStr) -> bool {
        self.is_excluded(&format!("{}/", name.to_string_lossy()))
    }

    /// Whether a sibling file starts with the video's stem and carries one
    /// of the subtitle extensions.
    pub fn has_subtitles(&self, video: &Path) -> bool {
        let Some(dir) = video.parent() else {
            return false;
        };
        let stem = video.file_stem().unwrap_or_default().to_string_lossy();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e);
                return false;
            }
        };

        entries.filter_map(|entry| entry.ok()).any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let ext = Path::new(&*name)
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default();
            name.starts_with(&*stem) && self.subtitle_exts.iter().any(|e| *e == ext)
        })
    }
}

fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| SubFinderError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}
