//
// state.rs
//
// Documents, the per-document namespace cache and workspace-wide state
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ropey::Rope;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{TextDocumentContentChangeEvent, Url};
use walkdir::WalkDir;

use crate::config::AnalysisConfig;
use crate::diagnostics::KeywordReferences;
use crate::library_doc::KeywordDoc;
use crate::library_manager::{DocumentKey, LibraryManager, WorkspaceLibraryManager};
use crate::model::Model;
use crate::namespace::Namespace;
use crate::parser;
use crate::revalidation::{DiagnosticsGate, RevalidationState};
use crate::utf16::utf16_column_to_byte_offset;

/// Extensions of files indexed from the workspace
pub const WORKSPACE_EXTENSIONS: &[&str] = &["robot", "resource"];

/// A parsed document
pub struct Document {
    pub uri: Url,
    pub contents: Rope,
    pub model: Arc<Model>,
    /// Editor version, `None` for documents indexed from disk
    pub version: Option<i32>,
    /// Workspace-unique revision, bumped on every change
    pub revision: u64,
    /// Whether the editor has the document open
    pub opened: bool,
}

impl Document {
    pub fn new(uri: Url, text: &str, version: Option<i32>, revision: u64) -> Self {
        let contents = Rope::from_str(text);
        let model = Arc::new(parser::parse(text, Some(uri_to_path(&uri))));
        Self {
            uri,
            contents,
            model,
            version,
            revision,
            opened: version.is_some(),
        }
    }

    /// Apply one content change. Call `reparse` once all changes of a notification are applied.
    pub fn apply_change(&mut self, change: TextDocumentContentChangeEvent) {
        let Some(range) = change.range else {
            // Full document sync
            self.contents = Rope::from_str(&change.text);
            return;
        };

        let start_idx = self.char_index(range.start.line as usize, range.start.character);
        let end_idx = self.char_index(range.end.line as usize, range.end.character);
        let (start_idx, end_idx) = (start_idx.min(end_idx), start_idx.max(end_idx));

        self.contents.remove(start_idx..end_idx);
        self.contents.insert(start_idx, &change.text);
    }

    /// Rebuild the model from the current contents under a new revision.
    pub fn reparse(&mut self, revision: u64) {
        self.revision = revision;
        self.model = Arc::new(parser::parse(&self.text(), Some(self.path())));
    }

    pub fn text(&self) -> String {
        self.contents.to_string()
    }

    pub fn path(&self) -> PathBuf {
        uri_to_path(&self.uri)
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.uri.clone(), self.revision)
    }

    fn char_index(&self, line: usize, utf16_col: u32) -> usize {
        if line >= self.contents.len_lines() {
            return self.contents.len_chars();
        }
        let line_text = self.contents.line(line).to_string();
        let byte = utf16_column_to_byte_offset(&line_text, utf16_col);
        self.contents.line_to_char(line) + line_text[..byte].chars().count()
    }
}

fn uri_to_path(uri: &Url) -> PathBuf {
    uri.to_file_path()
        .unwrap_or_else(|_| PathBuf::from(uri.path()))
}

/// Global server state
pub struct WorldState {
    /// Open documents and workspace files indexed from disk
    pub documents: HashMap<Url, Document>,
    pub workspace_folders: Vec<Url>,
    pub config: AnalysisConfig,
    pub library_manager: Arc<dyn LibraryManager>,
    pub revalidation: RevalidationState,
    pub diagnostics_gate: DiagnosticsGate,
    namespaces: DashMap<Url, Arc<Namespace>>,
    revision: AtomicU64,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

impl WorldState {
    pub fn new(config: AnalysisConfig) -> Self {
        let library_manager = Arc::new(WorkspaceLibraryManager::new(
            config.library_paths.clone(),
            config.resource_paths.clone(),
        ));
        Self::with_library_manager(config, library_manager)
    }

    pub fn with_library_manager(config: AnalysisConfig, library_manager: Arc<dyn LibraryManager>) -> Self {
        Self {
            documents: HashMap::new(),
            workspace_folders: Vec::new(),
            config,
            library_manager,
            revalidation: RevalidationState::new(),
            diagnostics_gate: DiagnosticsGate::new(),
            namespaces: DashMap::new(),
            revision: AtomicU64::new(0),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn open_document(&mut self, uri: Url, text: &str, version: i32) {
        let revision = self.next_revision();
        log::trace!("Opening {} at revision {}", uri, revision);
        self.documents
            .insert(uri.clone(), Document::new(uri, text, Some(version), revision));
    }

    pub fn apply_changes(&mut self, uri: &Url, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        let revision = self.next_revision();
        if let Some(doc) = self.documents.get_mut(uri) {
            for change in changes {
                doc.apply_change(change);
            }
            doc.version = Some(version);
            doc.reparse(revision);
        }
        self.namespaces.remove(uri);
    }

    /// Forget a closed document; callers re-index it from disk if it still exists.
    pub fn close_document(&mut self, uri: &Url) {
        self.documents.remove(uri);
        self.namespaces.remove(uri);
        self.revalidation.cancel(uri);
        self.diagnostics_gate.clear(uri);
    }

    /// Index a workspace file read from disk. Open documents are authoritative and left alone.
    pub fn index_document(&mut self, uri: Url, text: &str) {
        if self.documents.get(&uri).map(|d| d.opened).unwrap_or(false) {
            return;
        }
        let revision = self.next_revision();
        log::trace!("Indexing {}", uri);
        self.documents
            .insert(uri.clone(), Document::new(uri.clone(), text, None, revision));
        self.namespaces.remove(&uri);
    }

    pub fn remove_document(&mut self, uri: &Url) {
        if self.documents.get(uri).map(|d| d.opened).unwrap_or(false) {
            return;
        }
        self.close_document(uri);
    }

    /// Apply pre-scanned workspace files
    pub fn apply_workspace_index(&mut self, files: Vec<(Url, String)>) {
        let count = files.len();
        for (uri, text) in files {
            self.index_document(uri, &text);
        }
        log::info!("Applied {} workspace files", count);
    }

    pub fn get_document(&self, uri: &Url) -> Option<&Document> {
        self.documents.get(uri)
    }

    pub fn open_uris(&self) -> Vec<Url> {
        self.documents
            .values()
            .filter(|d| d.opened)
            .map(|d| d.uri.clone())
            .collect()
    }

    /// The document's namespace, built anew when the cached one is stale.
    pub fn namespace(&self, uri: &Url) -> Option<Arc<Namespace>> {
        let doc = self.documents.get(uri)?;
        let key = doc.key();

        if let Some(cached) = self.namespaces.get(uri) {
            if *cached.value().key() == key && !cached.value().is_invalidated() {
                return Some(cached.value().clone());
            }
        }

        log::trace!("Creating namespace for {} at revision {}", uri, key.revision);
        let namespace = Arc::new(
            Namespace::new(self.library_manager.clone(), doc.model.clone(), doc.path(), key)
                .with_search_order(self.config.search_order.clone()),
        );
        self.namespaces.insert(uri.clone(), namespace.clone());
        Some(namespace)
    }

    /// Documents whose namespace must be rebuilt, after polling pending library removals
    pub fn invalidated_uris(&self) -> Vec<Url> {
        self.namespaces
            .iter()
            .filter(|entry| entry.value().is_invalidated())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Invalidate namespaces that resolved anything from `path` and return their documents.
    pub fn invalidate_dependents(&self, path: &Path) -> Vec<Url> {
        let sources = vec![path.to_string_lossy().into_owned()];
        let mut dependents = Vec::new();
        for entry in self.namespaces.iter() {
            let namespace = entry.value();
            if namespace.source() != path && namespace.depends_on(&sources) {
                namespace.invalidate();
                dependents.push(entry.key().clone());
            }
        }
        dependents
    }

    /// Drop every namespace, e.g. after configuration changes.
    pub fn invalidate_all(&self) {
        for entry in self.namespaces.iter() {
            entry.value().invalidate();
        }
        self.namespaces.clear();
    }

    /// Replace the configuration. Returns whether imports must be resolved again.
    pub fn update_config(&mut self, config: AnalysisConfig) -> bool {
        let changed = self.config.resolution_changed(&config);
        if changed {
            self.library_manager = Arc::new(WorkspaceLibraryManager::new(
                config.library_paths.clone(),
                config.resource_paths.clone(),
            ));
            self.invalidate_all();
        }
        self.config = config;
        changed
    }

    /// Snapshot of every document's namespace for reference lookups outside the state lock
    pub fn references(&self) -> WorkspaceReferences {
        let namespaces = self
            .documents
            .keys()
            .filter_map(|uri| self.namespace(uri).map(|ns| (uri.clone(), ns)))
            .collect();
        WorkspaceReferences { namespaces }
    }
}

/// Keyword call sites across the workspace, answered from each document's analysis
pub struct WorkspaceReferences {
    namespaces: Vec<(Url, Arc<Namespace>)>,
}

#[async_trait]
impl KeywordReferences for WorkspaceReferences {
    async fn find_references(&self, keyword: &KeywordDoc, cancel: &CancellationToken) -> anyhow::Result<Vec<Url>> {
        let id = keyword.id();
        let mut found = Vec::new();
        for (uri, namespace) in &self.namespaces {
            if namespace.analysis(cancel).await?.references.contains(&id) {
                found.push(uri.clone());
            }
        }
        Ok(found)
    }
}

/// Scan workspace folders for suite and resource files without holding any locks
pub fn scan_workspace(folders: &[Url]) -> Vec<(Url, String)> {
    let mut files = Vec::new();
    for folder in folders {
        let Ok(root) = folder.to_file_path() else {
            continue;
        };
        log::info!("Scanning folder: {}", root.display());
        let entries = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && is_workspace_file(e.path()));
        for entry in entries {
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            if let Ok(uri) = Url::from_file_path(entry.path()) {
                log::trace!("Scanning file: {}", uri);
                files.push((uri, text));
            }
        }
    }
    log::info!("Scanned {} workspace files", files.len());
    files
}

/// Whether `path` is a suite or resource file tracked from the workspace
pub fn is_workspace_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| WORKSPACE_EXTENSIONS.iter().any(|w| e.eq_ignore_ascii_case(w)))
        .unwrap_or(false)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.') && s.len() > 1).unwrap_or(false)
}
