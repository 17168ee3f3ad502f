use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::scanner::Candidate;

#[derive(Default)]
struct LedgerInner {
    order: Vec<Candidate>,
    entries: HashMap<Candidate, Vec<String>>,
}

/// Run-scoped record of the subtitle files obtained for each candidate.
///
/// Entries are created by [`record`](Self::record) when a candidate enters
/// dispatch and only ever grow afterwards.
#[derive(Default)]
pub struct HistoryLedger {
    inner: Mutex<LedgerInner>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty entry. Recording the same candidate twice keeps the
    /// first entry and its position.
    pub async fn record(&self, candidate: &Candidate) {
        let mut inner = self.inner.lock().await;
        if inner.entries.contains_key(candidate) {
            return;
        }
        inner.order.push(candidate.clone());
        inner.entries.insert(candidate.clone(), Vec::new());
    }

    pub async fn append<I>(&self, candidate: &Candidate, filenames: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(candidate) {
            warn!("{}: appending to an unrecorded entry", candidate.basename());
            inner.order.push(candidate.clone());
        }
        inner
            .entries
            .entry(candidate.clone())
            .or_default()
            .extend(filenames);
    }

    /// Filenames recorded for `candidate`, if it was recorded at all.
    pub async fn get(&self, candidate: &Candidate) -> Option<Vec<String>> {
        self.inner.lock().await.entries.get(candidate).cloned()
    }

    /// `(candidate, subtitle count)` in record order.
    pub async fn summary(&self) -> Vec<(Candidate, usize)> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .map(|c| (c.clone(), inner.entries.get(c).map_or(0, Vec::len)))
            .collect()
    }

    /// Full entries in record order.
    pub async fn entries(&self) -> Vec<(Candidate, Vec<String>)> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .map(|c| (c.clone(), inner.entries.get(c).cloned().unwrap_or_default()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
