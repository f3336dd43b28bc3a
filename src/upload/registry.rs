//! In-flight upload registry
//!
//! Shared between the watch loop, which skips files it finds here, and the
//! upload tasks, which register and release them. Also keeps the set of
//! files uploaded during this run so a file left on disk is not sent twice.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct RegistryState {
    /// filename -> item name
    in_flight: HashMap<String, String>,
    /// files uploaded and still on disk
    completed: HashSet<String>,
}

/// Concurrency-safe record of files being uploaded
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file as in flight
    ///
    /// Returns false, and changes nothing, if the file is already registered.
    pub fn try_insert(&self, filename: &str, item: &str) -> bool {
        let mut state = self.state.lock();
        if state.in_flight.contains_key(filename) {
            return false;
        }
        state
            .in_flight
            .insert(filename.to_string(), item.to_string());
        true
    }

    /// Drop a file from the in-flight set, returning its item
    pub fn remove(&self, filename: &str) -> Option<String> {
        self.state.lock().in_flight.remove(filename)
    }

    /// Release a successfully uploaded file
    ///
    /// With `remember` the file is kept in the completed set; pass false when
    /// the local copy is gone and can never be listed again.
    pub fn mark_uploaded(&self, filename: &str, remember: bool) -> Option<String> {
        let mut state = self.state.lock();
        let item = state.in_flight.remove(filename);
        if remember {
            state.completed.insert(filename.to_string());
        }
        item
    }

    /// Check if a file is currently uploading
    pub fn contains(&self, filename: &str) -> bool {
        self.state.lock().in_flight.contains_key(filename)
    }

    /// Check if a file was already uploaded this run
    pub fn is_completed(&self, filename: &str) -> bool {
        self.state.lock().completed.contains(filename)
    }

    /// Check if a scan should leave this file alone
    pub fn is_known(&self, filename: &str) -> bool {
        let state = self.state.lock();
        state.in_flight.contains_key(filename) || state.completed.contains(filename)
    }

    /// Number of uploads in flight
    pub fn len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().in_flight.is_empty()
    }

    /// Forget uploaded files that are no longer on disk
    ///
    /// `listed` is every WARC name seen by a full directory listing. Returns
    /// how many names were dropped.
    pub fn retain_completed(&self, listed: &HashSet<String>) -> usize {
        let mut state = self.state.lock();
        let before = state.completed.len();
        state.completed.retain(|name| listed.contains(name));
        before - state.completed.len()
    }
}
