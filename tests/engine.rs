use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use subfinder::backend::{
    SearchBackend, SearchOptions, SubtitleDescriptor, SubtitleFile, SubtitlePayload,
};
use subfinder::config::{Config, ConflictPolicy};
use subfinder::error::{Result, SubFinderError};
use subfinder::scanner::Candidate;
use subfinder::workflow::{RunState, SubFinder};

/// What a fake backend does for every video
#[derive(Clone, Copy)]
enum Behaviour {
    /// One `<stem>.<suffix>` file per suffix
    Files(&'static [&'static str]),
    Empty,
    Fail,
}

struct FakeBackend {
    name: &'static str,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeBackend {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(&self, video: &Path, _options: &SearchOptions) -> Result<Vec<SubtitleDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let stem = video.file_stem().unwrap_or_default().to_string_lossy();
        match self.behaviour {
            Behaviour::Files(suffixes) => Ok(vec![SubtitleDescriptor {
                languages: vec!["en".to_string()],
                files: suffixes
                    .iter()
                    .map(|suffix| SubtitleFile {
                        name: format!("{}.{}", stem, suffix),
                        payload: SubtitlePayload::Bytes(format!("{} {}", self.name, suffix).into_bytes()),
                    })
                    .collect(),
                ..SubtitleDescriptor::default()
            }]),
            Behaviour::Empty => Ok(Vec::new()),
            Behaviour::Fail => Err(SubFinderError::backend(self.name, "service unavailable")),
        }
    }
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, b"not really a video").unwrap();
    path
}

fn config(root: &Path, workers: usize) -> Config {
    let mut config = Config {
        path: root.to_path_buf(),
        silence: true,
        ..Config::default()
    };
    config.pool.workers = workers;
    config
}

fn engine(config: Config, backends: &[Arc<FakeBackend>]) -> SubFinder {
    let backends: Vec<Arc<dyn SearchBackend>> = backends
        .iter()
        .map(|b| b.clone() as Arc<dyn SearchBackend>)
        .collect();
    SubFinder::with_backends(config, backends).unwrap()
}

#[tokio::test]
async fn test_video_with_subtitle_is_not_dispatched() {
    let tmp = TempDir::new().unwrap();
    touch(tmp.path(), "movie.mkv");
    touch(tmp.path(), "movie.srt");

    let backend = FakeBackend::new("fake", Behaviour::Files(&["en.srt"]));
    let mut finder = engine(config(tmp.path(), 10), &[backend.clone()]);
    let report = finder.run().await.unwrap();

    assert_eq!(report.total_files(), 0);
    assert_eq!(backend.calls(), 0);
    assert!(finder.ledger().is_empty().await);
}

#[tokio::test]
async fn test_single_video_gets_subtitle() {
    let tmp = TempDir::new().unwrap();
    let video = touch(tmp.path(), "movie.mkv");

    let backend = FakeBackend::new("fake", Behaviour::Files(&["srt"]));
    let mut finder = engine(config(tmp.path(), 10), &[backend.clone()]);
    let report = finder.run().await.unwrap();

    let candidate = Candidate::new(&video);
    assert_eq!(
        report.subtitles_for(&candidate),
        Some(&["movie.srt".to_string()][..])
    );
    assert_eq!(
        finder.ledger().get(&candidate).await,
        Some(vec!["movie.srt".to_string()])
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("movie.srt")).unwrap(),
        "fake srt"
    );
    assert_eq!(finder.state(), RunState::Done);
}

#[tokio::test]
async fn test_keyword_with_many_videos_is_a_usage_error() {
    let tmp = TempDir::new().unwrap();
    touch(tmp.path(), "a.mkv");
    touch(tmp.path(), "b.mp4");

    let backend = FakeBackend::new("fake", Behaviour::Files(&["srt"]));
    let mut cfg = config(tmp.path(), 10);
    cfg.keyword = Some("Some Show".to_string());
    let mut finder = engine(cfg, &[backend.clone()]);

    let err = finder.run().await.unwrap_err();
    assert!(err.is_usage());
    assert_eq!(finder.state(), RunState::Aborted);
    assert_eq!(backend.calls(), 0);
    assert!(finder.ledger().is_empty().await);
}

#[tokio::test]
async fn test_empty_result_falls_back_to_next_backend() {
    let tmp = TempDir::new().unwrap();
    let video = touch(tmp.path(), "movie.mkv");

    let empty = FakeBackend::new("empty", Behaviour::Empty);
    let full = FakeBackend::new("full", Behaviour::Files(&["zh.ass", "en.srt"]));
    let unused = FakeBackend::new("unused", Behaviour::Files(&["srt"]));
    let mut finder = engine(
        config(tmp.path(), 10),
        &[empty.clone(), full.clone(), unused.clone()],
    );
    let report = finder.run().await.unwrap();

    assert_eq!(
        report.subtitles_for(&Candidate::new(&video)),
        Some(&["movie.zh.ass".to_string(), "movie.en.srt".to_string()][..])
    );
    assert_eq!(empty.calls(), 1);
    assert_eq!(full.calls(), 1);
    assert_eq!(unused.calls(), 0);
}

#[tokio::test]
async fn test_failing_backends_leave_zero_subtitles() {
    let tmp = TempDir::new().unwrap();
    let video = touch(tmp.path(), "movie.mkv");

    let a = FakeBackend::new("a", Behaviour::Fail);
    let b = FakeBackend::new("b", Behaviour::Fail);
    let mut finder = engine(config(tmp.path(), 10), &[a.clone(), b.clone()]);
    let report = finder.run().await.unwrap();

    assert_eq!(report.total_files(), 1);
    assert_eq!(report.subtitles_for(&Candidate::new(&video)), Some(&[][..]));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn test_excluded_directory_is_never_visited() {
    let tmp = TempDir::new().unwrap();
    touch(tmp.path(), "show/e01.mkv");
    touch(tmp.path(), "show/sample/e01-sample.mkv");

    let backend = FakeBackend::new("fake", Behaviour::Files(&["srt"]));
    let mut cfg = config(tmp.path(), 10);
    cfg.exclude = vec!["sample/".to_string()];
    let mut finder = engine(cfg, &[backend.clone()]);
    let report = finder.run().await.unwrap();

    let names: Vec<String> = report.entries.iter().map(|(c, _)| c.basename()).collect();
    assert_eq!(names, vec!["e01.mkv"]);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_and_inline_runs_agree() {
    let videos = ["a.mkv", "b.mp4", "season1/c.avi", "season1/d.ts", "season2/e.wmv"];

    let mut results = Vec::new();
    for workers in [1, 3] {
        let tmp = TempDir::new().unwrap();
        for video in videos {
            touch(tmp.path(), video);
        }
        let flaky = FakeBackend::new("flaky", Behaviour::Fail);
        let good = FakeBackend::new("good", Behaviour::Files(&["zh.srt", "en.srt"]));
        let mut finder = engine(config(tmp.path(), workers), &[flaky, good]);
        let report = finder.run().await.unwrap();

        let mut summary: Vec<(PathBuf, Vec<String>)> = report
            .entries
            .iter()
            .map(|(c, names)| (c.path().strip_prefix(tmp.path()).unwrap().to_path_buf(), names.clone()))
            .collect();
        summary.sort();
        results.push(summary);
    }

    assert_eq!(results[0].len(), 5);
    assert_eq!(results[0], results[1]);
}

#[tokio::test]
async fn test_ledger_is_reset_between_runs() {
    let tmp = TempDir::new().unwrap();
    touch(tmp.path(), "movie.mkv");

    let backend = FakeBackend::new("fake", Behaviour::Files(&["srt"]));
    let mut finder = engine(config(tmp.path(), 1), &[backend.clone()]);
    finder.run().await.unwrap();
    assert_eq!(finder.ledger().len().await, 1);

    // movie.srt now exists, so the second run finds nothing to do
    let report = finder.run().await.unwrap();
    assert_eq!(report.total_files(), 0);
    assert!(finder.ledger().is_empty().await);
    assert_eq!(backend.calls(), 1);
}

fn relative_entries(root: &Path, entries: &[(Candidate, Vec<String>)]) -> Vec<(PathBuf, Vec<String>)> {
    entries
        .iter()
        .map(|(c, names)| (c.path().strip_prefix(root).unwrap().to_path_buf(), names.clone()))
        .collect()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_stem_videos_agree_across_executors() {
    let videos = ["m1.mkv", "m1.mp4", "m2.avi", "m2.mkv", "m2.mp4", "s1/m1.mkv", "s1/m1.mp4"];

    for policy in [ConflictPolicy::Overwrite, ConflictPolicy::Rename] {
        let mut results = Vec::new();
        for workers in [1, 10] {
            let tmp = TempDir::new().unwrap();
            for video in videos {
                touch(tmp.path(), video);
            }

            let backend = FakeBackend::new("good", Behaviour::Files(&["srt"]));
            let mut cfg = config(tmp.path(), workers);
            cfg.on_conflict = policy;
            let mut finder = engine(cfg, &[backend.clone()]);
            let report = finder.run().await.unwrap();

            assert_eq!(backend.calls(), videos.len());
            let on_disk = (files_in(tmp.path()), files_in(&tmp.path().join("s1")));
            assert!(on_disk.0.iter().chain(&on_disk.1).all(|n| !n.ends_with(".part")));

            results.push((
                relative_entries(tmp.path(), &report.entries),
                report.total_subtitles(),
                on_disk,
            ));
        }

        assert_eq!(results[0], results[1], "{} runs differ", policy);
        assert_eq!(results[0].1, videos.len());

        let entries = &results[0].0;
        let names_for = |video: &str| {
            entries
                .iter()
                .find(|(path, _)| path == Path::new(video))
                .map(|(_, names)| names.clone())
                .unwrap()
        };
        match policy {
            ConflictPolicy::Rename => {
                assert_eq!(names_for("m1.mkv"), vec!["m1.srt"]);
                assert_eq!(names_for("m1.mp4"), vec!["m1.1.srt"]);
                assert_eq!(names_for("m2.avi"), vec!["m2.srt"]);
                assert_eq!(names_for("m2.mkv"), vec!["m2.1.srt"]);
                assert_eq!(names_for("m2.mp4"), vec!["m2.2.srt"]);
                assert_eq!(names_for("s1/m1.mp4"), vec!["m1.1.srt"]);
            }
            _ => {
                assert_eq!(names_for("m1.mkv"), vec!["m1.srt"]);
                assert_eq!(names_for("m1.mp4"), vec!["m1.srt"]);
                assert_eq!(names_for("m2.mp4"), vec!["m2.srt"]);
            }
        }
    }
}

#[tokio::test]
async fn test_zip_subtitle_is_unpacked_next_to_video() {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    struct ZipBackend;

    #[async_trait]
    impl SearchBackend for ZipBackend {
        fn name(&self) -> &'static str {
            "zip"
        }

        async fn search(&self, _video: &Path, _options: &SearchOptions) -> Result<Vec<SubtitleDescriptor>> {
            let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
            for name in ["Show.S01E01.简体.ass", "Show.S01E01.English.srt", "Show.S01E01.nfo"] {
                writer.start_file(name, SimpleFileOptions::default()).unwrap();
                writer.write_all(name.as_bytes()).unwrap();
            }
            let content = writer.finish().unwrap().into_inner();

            Ok(vec![SubtitleDescriptor {
                files: vec![SubtitleFile {
                    name: "Show.S01E01.zip".to_string(),
                    payload: SubtitlePayload::Bytes(content),
                }],
                ..SubtitleDescriptor::default()
            }])
        }
    }

    let tmp = TempDir::new().unwrap();
    let video = touch(tmp.path(), "episode.mkv");
    let mut finder = SubFinder::with_backends(config(tmp.path(), 1), vec![Arc::new(ZipBackend)]).unwrap();
    let report = finder.run().await.unwrap();

    assert_eq!(
        report.subtitles_for(&Candidate::new(&video)),
        Some(&["episode.00021.简体.ass".to_string(), "episode.00053.English.srt".to_string()][..])
    );
    assert_eq!(files_in(tmp.path()).len(), 3);
}
