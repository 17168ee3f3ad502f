use std::io::{ErrorKind, Write};
use std::path::{Component, Path};
use tracing::{debug, error, info};

use crate::archive::{extract_subtitles, is_archive, ARCHIVE_SUBTITLE_EXTS};
use crate::backend::{SubtitleFile, SubtitleNamer, SubtitlePayload};
use crate::config::{Config, ConflictPolicy};
use crate::error::{Result, SubFinderError};

/// Writes subtitle payloads next to their video
#[derive(Clone)]
pub struct SubtitleStore {
    policy: ConflictPolicy,
    client: reqwest::Client,
    namer: SubtitleNamer,
    archive_exts: Vec<String>,
}

impl SubtitleStore {
    pub fn new(policy: ConflictPolicy, client: reqwest::Client) -> Self {
        Self {
            policy,
            client,
            namer: SubtitleNamer::new(None, None, false),
            archive_exts: ARCHIVE_SUBTITLE_EXTS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Store honouring the configured conflict policy, and naming archive
    /// entries with the configured languages, exts and order marker setting.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let mut store = Self::new(config.on_conflict, client);
        store.namer = SubtitleNamer::new(
            config.languages.as_deref(),
            config.exts.as_deref(),
            config.no_order_marker,
        );
        if let Some(exts) = config.exts.as_ref().filter(|exts| !exts.is_empty()) {
            store.archive_exts = exts
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect();
        }
        store
    }

    /// Make `file` exist next to `video` and return the names actually used.
    ///
    /// A zip payload expands into one subtitle per matching entry. An entry
    /// that can't be written is logged and left out; a plain file that can't
    /// be written is an error. Files kept under the skip policy are not
    /// returned.
    pub async fn persist(&self, video: &Path, file: &SubtitleFile) -> Result<Vec<String>> {
        check_filename(&file.name)?;
        let dir = video.parent().unwrap_or_else(|| Path::new("."));

        let content = match &file.payload {
            SubtitlePayload::Persisted => return Ok(vec![file.name.clone()]),
            SubtitlePayload::Bytes(content) => content.clone(),
            SubtitlePayload::Link(url) => {
                debug!("Downloading {} from {}", file.name, url);
                let response = self.client.get(url).send().await?.error_for_status()?;
                response.bytes().await?.to_vec()
            }
        };

        if !is_archive(&content) {
            return Ok(self.place(dir, &file.name, content).await?.into_iter().collect());
        }

        let entries = extract_subtitles(&content, video, &self.namer, &self.archive_exts)?;
        debug!("{}: {} subtitles in archive", file.name, entries.len());

        let mut written = Vec::with_capacity(entries.len());
        for (name, data) in entries {
            let placed = match check_filename(&name) {
                Ok(()) => self.place(dir, &name, data).await,
                Err(e) => Err(e),
            };
            match placed {
                Ok(Some(name)) => written.push(name),
                Ok(None) => {}
                Err(e) => error!("Failed to save {} from {}: {}", name, file.name, e),
            }
        }
        Ok(written)
    }

    async fn place(&self, dir: &Path, name: &str, content: Vec<u8>) -> Result<Option<String>> {
        let policy = self.policy;
        let dir = dir.to_path_buf();
        let owned = name.to_string();

        let placed = tokio::task::spawn_blocking(move || place_file(&dir, &owned, &content, policy))
            .await
            .map_err(std::io::Error::other)??;

        if placed.is_none() {
            info!("{} already exists, skipping", name);
        }
        Ok(placed)
    }
}

/// Names must be a single plain path component
fn check_filename(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(SubFinderError::UnsafeFilename(name.to_string())),
    }
}

/// Write into a uniquely named hidden temp file, then move it onto the target.
/// Only the final move claims the name, so concurrent writers never share a
/// temp file and a failed write never leaves a truncated subtitle behind.
fn place_file(
    dir: &Path,
    name: &str,
    content: &[u8],
    policy: ConflictPolicy,
) -> std::io::Result<Option<String>> {
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".part")
        .tempfile_in(dir)?;
    temp.write_all(content)?;
    temp.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }

    match policy {
        ConflictPolicy::Overwrite => {
            temp.persist(dir.join(name)).map_err(|e| e.error)?;
            Ok(Some(name.to_string()))
        }
        ConflictPolicy::Skip => match temp.persist_noclobber(dir.join(name)) {
            Ok(_) => Ok(Some(name.to_string())),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.error),
        },
        ConflictPolicy::Rename => {
            let mut n = 0;
            loop {
                let candidate = numbered_name(name, n);
                match temp.persist_noclobber(dir.join(&candidate)) {
                    Ok(_) => return Ok(Some(candidate)),
                    Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                        temp = e.file;
                        n += 1;
                    }
                    Err(e) => return Err(e.error),
                }
            }
        }
    }
}

/// `name` itself for 0, then `stem.N.ext`
fn numbered_name(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}.{}.{}", stem, n, ext),
        _ => format!("{}.{}", name, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn bytes_file(name: &str, content: &str) -> SubtitleFile {
        SubtitleFile {
            name: name.to_string(),
            payload: SubtitlePayload::Bytes(content.as_bytes().to_vec()),
        }
    }

    fn store(policy: ConflictPolicy) -> SubtitleStore {
        SubtitleStore::new(policy, reqwest::Client::new())
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect()
    }

    #[tokio::test]
    async fn test_persist_bytes() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("movie.mkv");
        let names = store(ConflictPolicy::Overwrite)
            .persist(&video, &bytes_file("movie.en.srt", "1\n"))
            .await
            .unwrap();

        assert_eq!(names, vec!["movie.en.srt"]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("movie.en.srt")).unwrap(),
            "1\n"
        );
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_persisted_payload_is_not_written() {
        let tmp = TempDir::new().unwrap();
        let file = SubtitleFile {
            name: "movie.srt".to_string(),
            payload: SubtitlePayload::Persisted,
        };
        let names = store(ConflictPolicy::Overwrite)
            .persist(&tmp.path().join("movie.mkv"), &file)
            .await
            .unwrap();

        assert_eq!(names, vec!["movie.srt"]);
        assert!(!tmp.path().join("movie.srt").exists());
    }

    #[tokio::test]
    async fn test_conflict_policies() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("movie.mkv");
        std::fs::write(tmp.path().join("movie.srt"), "old").unwrap();

        let skipped = store(ConflictPolicy::Skip)
            .persist(&video, &bytes_file("movie.srt", "new"))
            .await
            .unwrap();
        assert!(skipped.is_empty());
        assert_eq!(std::fs::read_to_string(tmp.path().join("movie.srt")).unwrap(), "old");

        let renamed = store(ConflictPolicy::Rename)
            .persist(&video, &bytes_file("movie.srt", "new"))
            .await
            .unwrap();
        assert_eq!(renamed, vec!["movie.1.srt"]);
        assert_eq!(std::fs::read_to_string(tmp.path().join("movie.1.srt")).unwrap(), "new");

        let overwritten = store(ConflictPolicy::Overwrite)
            .persist(&video, &bytes_file("movie.srt", "newer"))
            .await
            .unwrap();
        assert_eq!(overwritten, vec!["movie.srt"]);
        assert_eq!(std::fs::read_to_string(tmp.path().join("movie.srt")).unwrap(), "newer");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_renames_claim_distinct_names() {
        let tmp = TempDir::new().unwrap();
        let video = Arc::new(tmp.path().join("movie.mkv"));
        let store = Arc::new(store(ConflictPolicy::Rename));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let video = video.clone();
            handles.push(tokio::spawn(async move {
                store
                    .persist(&video, &bytes_file("movie.srt", &i.to_string()))
                    .await
                    .unwrap()
            }));
        }

        let mut names = Vec::new();
        for handle in handles {
            names.extend(handle.await.unwrap());
        }
        names.sort();
        names.dedup();

        assert_eq!(names.len(), 8);
        assert!(names.contains(&"movie.srt".to_string()));
        assert!(names.contains(&"movie.7.srt".to_string()));
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("movie.mkv");
        for name in ["../escape.srt", "sub/movie.srt", "..", ""] {
            let result = store(ConflictPolicy::Overwrite)
                .persist(&video, &bytes_file(name, "x"))
                .await;
            assert!(
                matches!(result, Err(SubFinderError::UnsafeFilename(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_archive_payload_expands_into_subtitles() {
        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("Film.mkv");

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in [("Movie.简体.ass", "chs"), ("Movie.English.srt", "eng"), ("nfo.txt", "")] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        let content = writer.finish().unwrap().into_inner();

        let file = SubtitleFile {
            name: "Film.zip".to_string(),
            payload: SubtitlePayload::Bytes(content),
        };
        let names = store(ConflictPolicy::Overwrite)
            .persist(&video, &file)
            .await
            .unwrap();

        assert_eq!(names, vec!["Film.00021.简体.ass", "Film.00053.English.srt"]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("Film.00053.English.srt")).unwrap(),
            "eng"
        );
        assert!(!tmp.path().join("Film.zip").exists());
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("movie.srt", 0), "movie.srt");
        assert_eq!(numbered_name("movie.en.srt", 2), "movie.en.2.srt");
        assert_eq!(numbered_name("README", 1), "README.1");
    }
}
