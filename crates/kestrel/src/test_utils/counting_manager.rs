//
// test_utils/counting_manager.rs
//
// Library manager wrapper that counts calls and can slow resolution down
//

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::library_doc::LibraryDoc;
use crate::library_manager::{
    DocumentKey, FileKind, LibraryManager, VariablesDoc, WorkspaceLibraryManager,
};
use crate::model::Model;

/// Delegates to a `WorkspaceLibraryManager` and records how often each entry point ran
#[derive(Debug, Default)]
pub struct CountingLibraryManager {
    pub inner: WorkspaceLibraryManager,
    /// Delay applied to every library resolution
    pub delay: Duration,
    library_calls: AtomicUsize,
    model_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl CountingLibraryManager {
    pub fn new(inner: WorkspaceLibraryManager) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn library_calls(&self) -> usize {
        self.library_calls.load(Ordering::SeqCst)
    }

    /// Number of keyword catalogs built from parsed files
    pub fn model_calls(&self) -> usize {
        self.model_calls.load(Ordering::SeqCst)
    }

    /// Number of resource files read from disk
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LibraryManager for CountingLibraryManager {
    async fn resolve_library(
        &self,
        context: Option<&DocumentKey>,
        name: &str,
        args: &[String],
        base_dir: &Path,
    ) -> anyhow::Result<Arc<LibraryDoc>> {
        self.library_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.resolve_library(context, name, args, base_dir).await
    }

    async fn resolve_model(&self, model: &Model, source: &Path) -> anyhow::Result<Arc<LibraryDoc>> {
        self.model_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve_model(model, source).await
    }

    async fn find_file(&self, name: &str, base_dir: &Path, kind: FileKind) -> anyhow::Result<PathBuf> {
        self.inner.find_file(name, base_dir, kind).await
    }

    async fn load_model(&self, path: &Path) -> anyhow::Result<Arc<Model>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load_model(path).await
    }

    async fn resolve_variables(
        &self,
        name: &str,
        args: &[String],
        base_dir: &Path,
    ) -> anyhow::Result<Arc<VariablesDoc>> {
        self.inner.resolve_variables(name, args, base_dir).await
    }

    fn subscribe_removed(&self) -> broadcast::Receiver<Vec<String>> {
        self.inner.subscribe_removed()
    }

    fn invalidate_source(&self, path: &Path) -> bool {
        self.inner.invalidate_source(path)
    }
}
