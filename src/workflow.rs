use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

use crate::backend::{
    build_http_client, BackendContext, BackendFactory, SearchBackend, SearchOptions,
};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Result, SubFinderError};
use crate::executor::ExecutorFactory;
use crate::ledger::HistoryLedger;
use crate::scanner::{Candidate, PathFilter};
use crate::store::SubtitleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    Dispatching,
    Done,
    /// Stopped by the keyword guard before anything was dispatched
    Aborted,
}

/// Subtitle files obtained per candidate, in dispatch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub entries: Vec<(Candidate, Vec<String>)>,
}

impl RunReport {
    pub fn total_files(&self) -> usize {
        self.entries.len()
    }

    pub fn total_subtitles(&self) -> usize {
        self.entries.iter().map(|(_, names)| names.len()).sum()
    }

    pub fn subtitles_for(&self, candidate: &Candidate) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(c, _)| c == candidate)
            .map(|(_, names)| names.as_slice())
    }
}

/// The subtitle finding engine. Each instance owns its HTTP client, backends
/// and ledger, so several engines can run side by side in one process.
pub struct SubFinder {
    config: Config,
    filter: PathFilter,
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<HistoryLedger>,
    state: RunState,
}

impl SubFinder {
    /// Build an engine with the backends named in `config.backends.order`
    pub fn new(config: Config) -> Result<Self> {
        let config = config.validate()?;
        let client = build_http_client(&config.http, config.executor_workers())?;
        let context = BackendContext::from_config(&config, client.clone());
        let backends = BackendFactory::create_all(&config.backends.order, &context);

        Self::assemble(config, backends, client)
    }

    /// Build an engine around caller-provided backends
    pub fn with_backends(config: Config, backends: Vec<Arc<dyn SearchBackend>>) -> Result<Self> {
        let config = config.validate()?;
        let client = build_http_client(&config.http, config.executor_workers())?;

        Self::assemble(config, backends, client)
    }

    fn assemble(
        config: Config,
        backends: Vec<Arc<dyn SearchBackend>>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let filter = PathFilter::from_config(&config)?;
        let store = SubtitleStore::from_config(&config, client);
        let dispatcher = Dispatcher::new(
            backends,
            SearchOptions::from_config(&config),
            store,
            config.debug,
        );

        Ok(Self {
            config,
            filter,
            dispatcher: Arc::new(dispatcher),
            ledger: Arc::new(HistoryLedger::new()),
            state: RunState::Idle,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Ledger of the last run
    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Walk the root path and collect every candidate
    pub fn scan(&self) -> Vec<Candidate> {
        self.filter.scan(&self.config.path).collect()
    }

    /// Scan, dispatch every candidate on the executor, wait for all of them
    /// and report what was downloaded.
    pub async fn run(&mut self) -> Result<RunReport> {
        let span = info_span!("subfinder", root = %self.config.path.display());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<RunReport> {
        info!("Start");
        self.state = RunState::Scanning;
        self.ledger = Arc::new(HistoryLedger::new());

        let candidates = self.scan();
        debug!("Found {} video files", candidates.len());

        if candidates.len() > 1 && self.config.keyword.is_some() {
            self.state = RunState::Aborted;
            let message = format!(
                "`keyword` should be used only when there is one video file, but there are {} video files",
                candidates.len()
            );
            error!("{}", message);
            return Err(SubFinderError::Usage(message));
        }

        self.state = RunState::Dispatching;
        let progress = self.progress_bar(candidates.len() as u64);
        let mut executor = ExecutorFactory::create(self.config.executor_workers());
        debug!("Dispatching with the {} executor", executor.name());

        for candidate in &candidates {
            self.ledger.record(candidate).await;
        }

        // Videos sharing a directory and stem resolve to the same subtitle
        // names, so they are dispatched one after another in scan order
        for group in group_by_stem(candidates) {
            let dispatcher = self.dispatcher.clone();
            let ledger = self.ledger.clone();
            let progress = progress.clone();
            executor
                .spawn(Box::pin(async move {
                    for candidate in group {
                        let span = info_span!("candidate", file = %candidate.basename());
                        dispatcher.dispatch(&candidate, &ledger).instrument(span).await;
                        progress.inc(1);
                    }
                }))
                .await;
        }

        executor.join().await;
        progress.finish_and_clear();
        self.state = RunState::Done;

        self.log_summary().await;
        let report = RunReport {
            entries: self.ledger.entries().await,
        };

        Ok(report)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if self.config.silence || len == 0 {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    async fn log_summary(&self) {
        let summary = self.ledger.summary().await;
        info!("{} Download complete {}", "=".repeat(20), "=".repeat(20));
        info!("Processed {} video files", summary.len());
        for (candidate, count) in &summary {
            info!("{}: {} subtitles downloaded", candidate.basename(), count);
        }
    }
}

/// Candidates grouped by `(directory, stem)`, groups in order of first
/// appearance and candidates in scan order within each group.
fn group_by_stem(candidates: Vec<Candidate>) -> Vec<Vec<Candidate>> {
    let mut groups: Vec<Vec<Candidate>> = Vec::new();
    let mut index: HashMap<(PathBuf, String), usize> = HashMap::new();

    for candidate in candidates {
        let key = (candidate.dir().to_path_buf(), candidate.stem());
        match index.get(&key) {
            Some(&i) => groups[i].push(candidate),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![candidate]);
            }
        }
    }
    groups
}
