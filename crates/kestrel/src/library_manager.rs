//
// library_manager.rs
//
// Resolution of library, resource and variable imports to keyword catalogs
//
// Libraries are described by libdoc JSON specs found on the configured library
// paths; standard libraries without a spec fall back to the embedded catalogs.
// Resolved library documents are kept in a bounded LRU cache, and removals are
// broadcast so open namespaces can be rebuilt.
//

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::broadcast;
use tower_lsp::lsp_types::Url;

use crate::error::{ImportError, VARIABLES_EXTENSIONS};
use crate::library_doc::LibraryDoc;
use crate::model::Model;
use crate::names::normalize;
use crate::parser;
use crate::stdlib;

/// Maximum number of library documents kept in the cache
pub const LIBRARY_CACHE_MAX_ENTRIES: usize = 256;

const REMOVED_CHANNEL_CAPACITY: usize = 64;

/// Opaque resolution context handed to the manager for explicit imports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub uri: Url,
    pub revision: u64,
}

impl DocumentKey {
    pub fn new(uri: Url, revision: u64) -> Self {
        Self { uri, revision }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Resource,
    Variables,
}

impl FileKind {
    fn label(&self) -> &'static str {
        match self {
            FileKind::Resource => "Resource",
            FileKind::Variables => "Variable",
        }
    }
}

/// A resolved variable file. Values are never evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablesDoc {
    pub name: String,
    pub source: PathBuf,
    /// Declared variable names, when the file format exposes them
    pub variables: Vec<String>,
}

/// Loader of keyword catalogs for the namespace
#[async_trait]
pub trait LibraryManager: Send + Sync {
    /// Resolve a library import. `context` is `None` for default libraries.
    async fn resolve_library(
        &self,
        context: Option<&DocumentKey>,
        name: &str,
        args: &[String],
        base_dir: &Path,
    ) -> anyhow::Result<Arc<LibraryDoc>>;

    /// Catalog of the keywords declared in a parsed file
    async fn resolve_model(&self, model: &Model, source: &Path) -> anyhow::Result<Arc<LibraryDoc>> {
        Ok(Arc::new(LibraryDoc::from_model(model, source)))
    }

    /// Locate a resource or variable file relative to `base_dir` or the search paths
    async fn find_file(&self, name: &str, base_dir: &Path, kind: FileKind) -> anyhow::Result<PathBuf>;

    /// Read and parse a resource file
    async fn load_model(&self, path: &Path) -> anyhow::Result<Arc<Model>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Arc::new(parser::parse(&text, Some(path.to_path_buf()))))
    }

    async fn resolve_variables(
        &self,
        name: &str,
        args: &[String],
        base_dir: &Path,
    ) -> anyhow::Result<Arc<VariablesDoc>>;

    /// Channel announcing the sources of libraries that were removed or changed
    fn subscribe_removed(&self) -> broadcast::Receiver<Vec<String>>;

    /// Drop anything loaded from `path` after the file changed on disk.
    /// Returns whether a removal was announced.
    fn invalidate_source(&self, _path: &Path) -> bool {
        false
    }
}

/// Library manager backed by the file system and the embedded standard library catalogs
pub struct WorkspaceLibraryManager {
    /// Directories searched for `<Name>.json` libdoc specs
    library_paths: Vec<PathBuf>,
    /// Directories searched for resource and variable files after the importing file's directory
    resource_paths: Vec<PathBuf>,
    /// Libraries registered in memory (normalized name -> doc); these win over specs on disk
    registered: tokio::sync::RwLock<HashMap<String, Arc<LibraryDoc>>>,
    /// Resolved library documents keyed by spec path and arguments
    cache: RwLock<LruCache<String, Arc<LibraryDoc>>>,
    removed_tx: broadcast::Sender<Vec<String>>,
}

// LruCache doesn't derive Debug
impl fmt::Debug for WorkspaceLibraryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceLibraryManager")
            .field("library_paths", &self.library_paths)
            .field("resource_paths", &self.resource_paths)
            .finish_non_exhaustive()
    }
}

impl Default for WorkspaceLibraryManager {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl WorkspaceLibraryManager {
    pub fn new(library_paths: Vec<PathBuf>, resource_paths: Vec<PathBuf>) -> Self {
        Self::with_capacity(library_paths, resource_paths, LIBRARY_CACHE_MAX_ENTRIES)
    }

    pub fn with_capacity(library_paths: Vec<PathBuf>, resource_paths: Vec<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (removed_tx, _) = broadcast::channel(REMOVED_CHANNEL_CAPACITY);
        Self {
            library_paths,
            resource_paths,
            registered: tokio::sync::RwLock::new(HashMap::new()),
            cache: RwLock::new(LruCache::new(capacity)),
            removed_tx,
        }
    }

    pub fn library_paths(&self) -> &[PathBuf] {
        &self.library_paths
    }

    pub fn resource_paths(&self) -> &[PathBuf] {
        &self.resource_paths
    }

    /// Register an in-memory library document under its name.
    pub async fn register_library(&self, doc: LibraryDoc) {
        let mut registered = self.registered.write().await;
        registered.insert(normalize(&doc.name), Arc::new(doc));
    }

    /// Remove a registered or cached library and announce the removal.
    pub async fn remove_library(&self, name: &str) -> bool {
        let mut removed = Vec::new();
        if let Some(doc) = self.registered.write().await.remove(&normalize(name)) {
            removed.push(removal_name(&doc));
        }
        removed.extend(self.evict(|_, doc| crate::names::eq(&doc.name, name)));
        self.announce(removed)
    }

    /// Number of cached library documents
    pub fn cached_count(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn cache_get(&self, key: &str) -> Option<Arc<LibraryDoc>> {
        self.cache.read().ok()?.peek(key).cloned()
    }

    fn cache_put(&self, key: String, doc: Arc<LibraryDoc>) {
        if let Ok(mut cache) = self.cache.write() {
            cache.push(key, doc);
        }
    }

    fn evict(&self, matches: impl Fn(&str, &LibraryDoc) -> bool) -> Vec<String> {
        let Ok(mut cache) = self.cache.write() else {
            return Vec::new();
        };
        let keys: Vec<String> = cache
            .iter()
            .filter(|(key, doc)| matches(key, doc))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter()
            .filter_map(|key| cache.pop(key))
            .map(|doc| removal_name(&doc))
            .collect()
    }

    fn announce(&self, removed: Vec<String>) -> bool {
        if removed.is_empty() {
            return false;
        }
        log::debug!("Libraries removed: {:?}", removed);
        // No receivers is fine: nothing has resolved anything yet
        let _ = self.removed_tx.send(removed);
        true
    }

    /// Path of the libdoc spec describing `name`, if any.
    async fn find_library_spec(&self, name: &str, base_dir: &Path) -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if name.to_ascii_lowercase().ends_with(".json") {
            let path = Path::new(name);
            if path.is_absolute() {
                candidates.push(path.to_path_buf());
            } else {
                candidates.push(base_dir.join(path));
                candidates.extend(self.library_paths.iter().map(|dir| dir.join(path)));
            }
        } else {
            for dir in &self.library_paths {
                candidates.push(dir.join(format!("{}.json", name)));
                candidates.push(dir.join(format!("{}.libspec.json", name)));
            }
        }

        for candidate in candidates {
            if is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait]
impl LibraryManager for WorkspaceLibraryManager {
    async fn resolve_library(
        &self,
        context: Option<&DocumentKey>,
        name: &str,
        args: &[String],
        base_dir: &Path,
    ) -> anyhow::Result<Arc<LibraryDoc>> {
        log::trace!(
            "Resolving library '{}' for {}",
            name,
            context.map(|k| k.uri.as_str()).unwrap_or("<default>")
        );

        if let Some(doc) = self.registered.read().await.get(&normalize(name)) {
            return Ok(doc.clone());
        }

        if let Some(spec) = self.find_library_spec(name, base_dir).await {
            let key = format!("{}|{}", spec.display(), args.join("|"));
            if let Some(doc) = self.cache_get(&key) {
                return Ok(doc);
            }
            let text = tokio::fs::read_to_string(&spec)
                .await
                .with_context(|| format!("reading library spec {}", spec.display()))?;
            let doc = LibraryDoc::from_libdoc_json(&text, Some(&spec))
                .with_context(|| format!("parsing library spec {}", spec.display()))?;
            let doc = Arc::new(doc);
            self.cache_put(key, doc.clone());
            return Ok(doc);
        }

        let key = format!("stdlib:{}", normalize(name));
        if let Some(doc) = self.cache_get(&key) {
            return Ok(doc);
        }
        if let Some(doc) = stdlib::embedded_library(name) {
            let doc = Arc::new(doc);
            self.cache_put(key, doc.clone());
            return Ok(doc);
        }

        Err(ImportError::LibraryNotFound {
            name: name.to_string(),
            reason: "no library spec found on the library paths.".to_string(),
        }
        .into())
    }

    async fn find_file(&self, name: &str, base_dir: &Path, kind: FileKind) -> anyhow::Result<PathBuf> {
        let name = name.replace("${CURDIR}", &base_dir.to_string_lossy());
        let path = Path::new(&name);

        let candidates: Vec<PathBuf> = if path.is_absolute() {
            vec![path.to_path_buf()]
        } else {
            std::iter::once(base_dir.join(path))
                .chain(self.resource_paths.iter().map(|dir| dir.join(path)))
                .collect()
        };

        for candidate in candidates {
            if is_file(&candidate).await {
                return Ok(candidate);
            }
        }

        Err(ImportError::FileNotFound {
            kind: kind.label(),
            name,
        }
        .into())
    }

    async fn resolve_variables(
        &self,
        name: &str,
        _args: &[String],
        base_dir: &Path,
    ) -> anyhow::Result<Arc<VariablesDoc>> {
        let path = self.find_file(name, base_dir, FileKind::Variables).await?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !VARIABLES_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ImportError::InvalidVariablesExtension {
                extension: format!(".{}", extension),
            }
            .into());
        }

        let variables = if extension == "json" {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let values: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)
                .with_context(|| format!("parsing variable file {}", path.display()))?;
            values.keys().map(|k| format!("${{{}}}", k)).collect()
        } else {
            Vec::new()
        };

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Arc::new(VariablesDoc {
            name,
            source: path,
            variables,
        }))
    }

    fn subscribe_removed(&self) -> broadcast::Receiver<Vec<String>> {
        self.removed_tx.subscribe()
    }

    fn invalidate_source(&self, path: &Path) -> bool {
        // Spec-backed entries are keyed by spec path; their doc source may name the library module
        let prefix = format!("{}|", path.display());
        let removed = self.evict(|key, doc| key.starts_with(&prefix) || doc.source.as_deref() == Some(path));
        self.announce(removed)
    }
}

fn removal_name(doc: &LibraryDoc) -> String {
    doc.source
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| doc.name.clone())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_code;
    use tempfile::TempDir;

    const SPEC: &str = r#"{"name": "MyLib", "keywords": [{"name": "Do Thing"}]}"#;

    #[tokio::test]
    async fn test_resolves_embedded_standard_library() {
        let manager = WorkspaceLibraryManager::default();
        let doc = manager
            .resolve_library(None, "BuiltIn", &[], Path::new("/"))
            .await
            .unwrap();
        assert!(doc.keywords.contains("log"));
        assert_eq!(manager.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_resolves_spec_from_library_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("MyLib.json"), SPEC).unwrap();
        let manager = WorkspaceLibraryManager::new(vec![dir.path().to_path_buf()], Vec::new());

        let doc = manager
            .resolve_library(None, "MyLib", &[], Path::new("/"))
            .await
            .unwrap();
        assert_eq!(doc.name, "MyLib");
        assert!(doc.keywords.contains("Do Thing"));
    }

    #[tokio::test]
    async fn test_unknown_library_is_import_error() {
        let manager = WorkspaceLibraryManager::default();
        let err = manager
            .resolve_library(None, "NoSuchLib", &[], Path::new("/"))
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), "ImportError");
        assert!(err.to_string().starts_with("Importing library 'NoSuchLib' failed"));
    }

    #[tokio::test]
    async fn test_registered_library_wins() {
        let manager = WorkspaceLibraryManager::default();
        manager
            .register_library(LibraryDoc::with_keywords("BuiltIn", ["Only This"]))
            .await;
        let doc = manager
            .resolve_library(None, "builtin", &[], Path::new("/"))
            .await
            .unwrap();
        assert_eq!(doc.keywords.len(), 1);
    }

    #[tokio::test]
    async fn test_find_file_searches_base_dir_then_resource_paths() {
        let base = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        std::fs::write(shared.path().join("common.resource"), "").unwrap();
        let manager = WorkspaceLibraryManager::new(Vec::new(), vec![shared.path().to_path_buf()]);

        let found = manager
            .find_file("common.resource", base.path(), FileKind::Resource)
            .await
            .unwrap();
        assert_eq!(found, shared.path().join("common.resource"));

        let err = manager
            .find_file("missing.resource", base.path(), FileKind::Resource)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Resource file 'missing.resource' does not exist.");
    }

    #[tokio::test]
    async fn test_find_file_expands_curdir() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("a.resource"), "").unwrap();
        let manager = WorkspaceLibraryManager::default();
        let found = manager
            .find_file("${CURDIR}/a.resource", base.path(), FileKind::Resource)
            .await
            .unwrap();
        assert!(found.ends_with("a.resource"));
    }

    #[tokio::test]
    async fn test_json_variables_expose_names() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("vars.json"), r#"{"HOST": "x", "PORT": 1}"#).unwrap();
        let manager = WorkspaceLibraryManager::default();
        let doc = manager
            .resolve_variables("vars.json", &[], base.path())
            .await
            .unwrap();
        assert_eq!(doc.name, "vars");
        assert_eq!(doc.variables, vec!["${HOST}".to_string(), "${PORT}".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_variables_extension() {
        let base = TempDir::new().unwrap();
        std::fs::write(base.path().join("vars.ini"), "").unwrap();
        let manager = WorkspaceLibraryManager::default();
        let err = manager
            .resolve_variables("vars.ini", &[], base.path())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid variable file extension '.ini'"));
    }

    #[tokio::test]
    async fn test_remove_library_broadcasts() {
        let manager = WorkspaceLibraryManager::default();
        let mut rx = manager.subscribe_removed();
        manager.register_library(LibraryDoc::with_keywords("Custom", ["Click"])).await;

        assert!(manager.remove_library("custom").await);
        let removed = rx.recv().await.unwrap();
        assert_eq!(removed, vec!["Custom".to_string()]);
        assert!(!manager.remove_library("custom").await);
    }

    #[tokio::test]
    async fn test_invalidate_source_evicts_spec() {
        let dir = TempDir::new().unwrap();
        let spec = dir.path().join("MyLib.json");
        std::fs::write(&spec, SPEC).unwrap();
        let manager = WorkspaceLibraryManager::new(vec![dir.path().to_path_buf()], Vec::new());
        manager
            .resolve_library(None, "MyLib", &[], Path::new("/"))
            .await
            .unwrap();
        assert_eq!(manager.cached_count(), 1);

        assert!(manager.invalidate_source(&spec));
        assert_eq!(manager.cached_count(), 0);
    }
}
