//! Live per-file pipelines, keyed by canonical source path.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::pipeline::FilePipeline;

/// Shared between the poll loop (sole writer) and the pruner (reader).
pub type SharedRegistry = Arc<Mutex<Registry>>;

#[derive(Default)]
pub struct Registry {
    pipelines: HashMap<PathBuf, Arc<FilePipeline>>,
}

impl Registry {
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pipelines.contains_key(path)
    }

    pub fn insert(&mut self, pipeline: FilePipeline) {
        let path = pipeline.source().to_path_buf();
        self.pipelines.insert(path, Arc::new(pipeline));
    }

    /// Remove and return every pipeline whose path is not in `keep`.
    pub fn retain_only(&mut self, keep: &HashSet<&Path>) -> Vec<Arc<FilePipeline>> {
        let gone: Vec<PathBuf> = self
            .pipelines
            .keys()
            .filter(|path| !keep.contains(path.as_path()))
            .cloned()
            .collect();
        gone.iter()
            .filter_map(|path| self.pipelines.remove(path))
            .collect()
    }

    /// Handles to every live pipeline; the registry lock is not held while
    /// callers work on them.
    pub fn snapshot(&self) -> Vec<Arc<FilePipeline>> {
        self.pipelines.values().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<Arc<FilePipeline>> {
        self.pipelines.drain().map(|(_, p)| p).collect()
    }
}
