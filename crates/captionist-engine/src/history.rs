use indexmap::IndexMap;

use captionist_contracts::wire::HistoryEntry;
use captionist_contracts::{CaptionError, CaptionResult};

use crate::backend::CaptionBackend;

const HISTORY_NOT_FOUND_MESSAGE: &str = "History entry not found";

/// Local mirror of the backend's history list.
///
/// Deletions only touch local state after the backend confirms them. A
/// failed refresh keeps the previous entries and records the error.
#[derive(Debug, Default)]
pub struct HistoryCache {
    entries: IndexMap<String, HistoryEntry>,
    loaded: bool,
    stale: bool,
    last_error: Option<CaptionError>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.get(id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// True once a new submission may have added a backend row we have not
    /// fetched yet.
    pub fn is_stale(&self) -> bool {
        self.stale || !self.loaded
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn last_error(&self) -> Option<&CaptionError> {
        self.last_error.as_ref()
    }

    pub fn refresh(&mut self, backend: &dyn CaptionBackend) -> CaptionResult<usize> {
        match backend.list_history() {
            Ok(entries) => {
                self.entries = entries
                    .into_iter()
                    .map(|entry| (entry.id.clone(), entry))
                    .collect();
                self.loaded = true;
                self.stale = false;
                self.last_error = None;
                Ok(self.entries.len())
            }
            Err(err) => Err(self.record(err)),
        }
    }

    /// Fetches one entry from the backend and keeps the local copy in step.
    pub fn fetch(&mut self, backend: &dyn CaptionBackend, id: &str) -> CaptionResult<HistoryEntry> {
        match backend.get_history(id) {
            Ok(entry) => {
                self.entries.insert(entry.id.clone(), entry.clone());
                Ok(entry)
            }
            Err(err) => Err(self.record(err)),
        }
    }

    /// Returns the local copy of the removed entry, if one was cached.
    ///
    /// Some backends confirm deletes of ids they never stored. When the list
    /// is loaded and fresh, an id missing from it is reported as not found
    /// even after such a confirmation. A stale list defers to the backend.
    pub fn delete(
        &mut self,
        backend: &dyn CaptionBackend,
        id: &str,
    ) -> CaptionResult<Option<HistoryEntry>> {
        let known_locally = self.entries.contains_key(id);
        let fresh = !self.is_stale();
        backend.delete_history(id).map_err(|err| self.record(err))?;
        if fresh && !known_locally {
            return Err(self.record(CaptionError::backend(404, HISTORY_NOT_FOUND_MESSAGE)));
        }
        self.last_error = None;
        Ok(self.entries.shift_remove(id))
    }

    pub fn clear(&mut self, backend: &dyn CaptionBackend) -> CaptionResult<Vec<HistoryEntry>> {
        backend.clear_history().map_err(|err| self.record(err))?;
        self.last_error = None;
        self.loaded = true;
        self.stale = false;
        Ok(self.entries.drain(..).map(|(_, entry)| entry).collect())
    }

    fn record(&mut self, err: CaptionError) -> CaptionError {
        self.last_error = Some(err.clone());
        err
    }
}
