//! Image fetch progress tracking.
//!
//! A [`ProgressTracker`] holds one [`ImageFetchProgress`] record per container
//! of a pod being created. The creation pipeline appends records and updates
//! them through [`ImageFetchHandle`]s while the progress broadcaster reads
//! snapshots from another task, so every access goes through the mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Progress of pulling the image of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFetchProgress {
    pub container_name: String,
    pub image: String,
    /// Set once the image is fully available; never cleared.
    pub done: bool,
    pub layers_total: u32,
    pub layers_fetched: u32,
    pub bytes_fetched: u64,
}

/// Append-only collection of fetch progress records, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    entries: Arc<Mutex<Vec<ImageFetchProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new record for a container whose pull is about to begin.
    pub fn begin(&self, container_name: &str, image: &str) -> ImageFetchHandle {
        let mut entries = self.lock();
        entries.push(ImageFetchProgress {
            container_name: container_name.to_string(),
            image: image.to_string(),
            ..Default::default()
        });
        ImageFetchHandle {
            entries: self.entries.clone(),
            index: entries.len() - 1,
        }
    }

    /// Copy of the current records.
    pub fn snapshot(&self) -> Vec<ImageFetchProgress> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ImageFetchProgress>> {
        // Records stay readable after a writer panic.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write access to a single record of a [`ProgressTracker`].
#[derive(Debug, Clone)]
pub struct ImageFetchHandle {
    entries: Arc<Mutex<Vec<ImageFetchProgress>>>,
    index: usize,
}

impl ImageFetchHandle {
    /// Record how many layers the image manifest lists.
    pub fn set_layers(&self, total: u32) {
        self.update(|p| p.layers_total = total);
    }

    /// Record one fetched layer of `bytes` size.
    pub fn layer_fetched(&self, bytes: u64) {
        self.update(|p| {
            p.layers_fetched = p.layers_fetched.saturating_add(1);
            p.bytes_fetched = p.bytes_fetched.saturating_add(bytes);
        });
    }

    /// Record an image that was already present locally.
    pub fn restored(&self, layers: u32, bytes: u64) {
        self.update(|p| {
            p.layers_total = layers;
            p.layers_fetched = layers;
            p.bytes_fetched = bytes;
        });
    }

    /// Mark the image as fully available.
    pub fn all_done(&self) {
        self.update(|p| p.done = true);
    }

    fn update(&self, f: impl FnOnce(&mut ImageFetchProgress)) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(progress) = entries.get_mut(self.index) {
            f(progress);
        }
    }
}
