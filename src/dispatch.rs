use std::sync::Arc;
use tracing::{debug, error, info};

use crate::backend::{SearchBackend, SearchOptions, SubtitleDescriptor};
use crate::ledger::HistoryLedger;
use crate::scanner::Candidate;
use crate::store::SubtitleStore;

/// What one candidate's dispatch produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Subtitle file names written, in descriptor order
    pub filenames: Vec<String>,
    /// Backend whose result was used
    pub backend: Option<&'static str>,
}

/// Tries the configured backends in order for one candidate and persists the
/// first non-empty result.
pub struct Dispatcher {
    backends: Vec<Arc<dyn SearchBackend>>,
    options: SearchOptions,
    store: SubtitleStore,
    debug: bool,
}

impl Dispatcher {
    pub fn new(
        backends: Vec<Arc<dyn SearchBackend>>,
        options: SearchOptions,
        store: SubtitleStore,
        debug: bool,
    ) -> Self {
        Self {
            backends,
            options,
            store,
            debug,
        }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn dispatch(&self, candidate: &Candidate, ledger: &HistoryLedger) -> DispatchOutcome {
        let basename = candidate.basename();
        let mut outcome = DispatchOutcome::default();

        let (backend, descriptors) = match self.search(candidate, &basename).await {
            Some(found) => found,
            None => {
                info!("{}: Found 0 subtitles", basename);
                return outcome;
            }
        };
        outcome.backend = Some(backend);

        let count: usize = descriptors.iter().map(|d| d.files.len()).sum();
        info!("{}: Found {} subtitles with {}", basename, count, backend);

        for descriptor in &descriptors {
            let mut written = Vec::with_capacity(descriptor.files.len());
            for file in &descriptor.files {
                match self.store.persist(candidate.path(), file).await {
                    Ok(names) => written.extend(names),
                    Err(e) => error!("{}: Failed to save {}: {}", basename, file.name, e),
                }
            }
            outcome.filenames.extend(written.iter().cloned());
            ledger.append(candidate, written).await;
        }

        outcome
    }

    /// First non-empty result, with the backend that produced it
    async fn search(
        &self,
        candidate: &Candidate,
        basename: &str,
    ) -> Option<(&'static str, Vec<SubtitleDescriptor>)> {
        for backend in &self.backends {
            info!("{}: Start using {} to search subtitles", basename, backend.name());
            match backend.search(candidate.path(), &self.options).await {
                Ok(descriptors) if descriptors.iter().any(|d| !d.files.is_empty()) => {
                    return Some((backend.name(), descriptors));
                }
                Ok(_) => {
                    debug!("{}: nothing from {}", basename, backend.name());
                }
                Err(e) => {
                    if self.debug {
                        error!(
                            "{}: Error while searching subtitles with {}: {:?}",
                            basename,
                            backend.name(),
                            e
                        );
                    } else {
                        error!(
                            "{}: Error while searching subtitles with {}: {}",
                            basename,
                            backend.name(),
                            e
                        );
                    }
                }
            }
        }
        None
    }
}
