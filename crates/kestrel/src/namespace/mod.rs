//
// namespace/mod.rs
//
// Per-document namespace: resolved imports, keyword scope and analysis results
//
// A namespace is built once per document revision. Initialization resolves the
// default libraries and every declared import (recursively through resource
// files); analysis then resolves every keyword call against the result. Both
// steps run at most once per instance. Edits and library removals never patch
// a namespace: the document cache drops it and builds a new one.
//

pub mod analyzer;
pub mod finder;
pub mod imports;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use indexmap::IndexMap;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, Range};

use crate::diagnostics::{self, model_range};
use crate::error::{
    error_code, is_cancelled, AnalysisError, Cancelled, ImportError, RESOURCE_EXTENSIONS,
};
use crate::library_doc::{KeywordDoc, KeywordId, LibraryDoc, DEFAULT_LIBRARIES};
use crate::library_manager::{DocumentKey, FileKind, LibraryManager, VariablesDoc};
use crate::model::{ImportKind, Model, SectionKind};

pub use finder::{find_keyword, FinderDiagnostic, KeywordMatch};
pub use imports::{extract_imports, Import};

/// A resolved library or resource import
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    /// Name reported by the resolved document
    pub name: String,
    /// Name as written in the import
    pub import_name: String,
    pub alias: Option<String>,
    pub args: Vec<String>,
    pub doc: Arc<LibraryDoc>,
}

/// Resource entries share the library entry shape
pub type ResourceEntry = LibraryEntry;

impl LibraryEntry {
    pub fn new(import_name: &str, doc: Arc<LibraryDoc>, args: Vec<String>, alias: Option<String>) -> Self {
        Self {
            name: doc.name.clone(),
            import_name: import_name.to_string(),
            alias,
            args,
            doc,
        }
    }

    /// Mapping key: alias, else resolved name, else import name
    pub fn key(&self) -> &str {
        entry_key(self.alias.as_deref(), &self.name, &self.import_name)
    }

    /// Owner name used in qualified keyword names and messages
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A resolved variable file import
#[derive(Debug, Clone)]
pub struct VariablesEntry {
    pub name: String,
    pub import_name: String,
    pub args: Vec<String>,
    pub doc: Arc<VariablesDoc>,
}

impl VariablesEntry {
    pub fn key(&self) -> &str {
        entry_key(None, &self.name, &self.import_name)
    }
}

fn entry_key<'a>(alias: Option<&'a str>, name: &'a str, import_name: &'a str) -> &'a str {
    match alias {
        Some(alias) => alias,
        None if !name.is_empty() => name,
        None => import_name,
    }
}

/// Everything visible to keyword lookup once imports are resolved
#[derive(Debug, Default)]
pub struct ImportedScope {
    pub libraries: IndexMap<String, LibraryEntry>,
    pub resources: IndexMap<String, ResourceEntry>,
    pub variables: IndexMap<String, VariablesEntry>,
    /// Keywords declared in the document itself
    pub self_doc: Option<Arc<LibraryDoc>>,
    /// Library names that win ambiguous lookups, in priority order
    pub search_order: Vec<String>,
    /// Diagnostics reported while resolving imports
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportedScope {
    /// Whether any resolved library or resource came from one of `sources`
    pub fn depends_on(&self, sources: &[String]) -> bool {
        self.libraries
            .values()
            .chain(self.resources.values())
            .any(|entry| {
                sources.iter().any(|removed| {
                    crate::names::eq(removed, &entry.name)
                        || entry
                            .doc
                            .source
                            .as_ref()
                            .map(|p| p.to_string_lossy() == removed.as_str())
                            .unwrap_or(false)
                })
            })
    }
}

/// Result of the analysis pass
#[derive(Debug, Default)]
pub struct Analysis {
    /// Import diagnostics followed by keyword call diagnostics
    pub diagnostics: Vec<Diagnostic>,
    /// Keyword definitions called from this document
    pub references: HashSet<KeywordId>,
}

enum Resolved {
    Library(LibraryEntry),
    Resource(ResourceEntry),
    Variables(VariablesEntry),
}

/// Entries and diagnostics produced by resolving a set of imports, in insertion order
#[derive(Default)]
struct ImportBatch {
    entries: Vec<Resolved>,
    diagnostics: Vec<Diagnostic>,
}

impl ImportBatch {
    fn append(&mut self, other: ImportBatch) {
        self.entries.extend(other.entries);
        self.diagnostics.extend(other.diagnostics);
    }
}

struct ModelImports {
    doc: anyhow::Result<Arc<LibraryDoc>>,
    batch: ImportBatch,
}

pub struct Namespace {
    library_manager: Arc<dyn LibraryManager>,
    model: Arc<Model>,
    source: PathBuf,
    key: DocumentKey,
    search_order: Vec<String>,
    scope: OnceCell<Arc<ImportedScope>>,
    analysis: OnceCell<Arc<Analysis>>,
    keywords: OnceLock<Vec<Arc<KeywordDoc>>>,
    removed_rx: Mutex<broadcast::Receiver<Vec<String>>>,
    invalidated: AtomicBool,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("source", &self.source)
            .field("key", &self.key)
            .field("initialized", &self.scope.initialized())
            .field("analyzed", &self.analysis.initialized())
            .finish_non_exhaustive()
    }
}

impl Namespace {
    pub fn new(
        library_manager: Arc<dyn LibraryManager>,
        model: Arc<Model>,
        source: PathBuf,
        key: DocumentKey,
    ) -> Self {
        let removed_rx = Mutex::new(library_manager.subscribe_removed());
        Self {
            library_manager,
            model,
            source,
            key,
            search_order: Vec::new(),
            scope: OnceCell::new(),
            analysis: OnceCell::new(),
            keywords: OnceLock::new(),
            removed_rx,
            invalidated: AtomicBool::new(false),
        }
    }

    /// Seed the explicit search order used to break ambiguous lookups.
    pub fn with_search_order(mut self, search_order: Vec<String>) -> Self {
        self.search_order = search_order;
        self
    }

    pub fn search_order(&self) -> &[String] {
        &self.search_order
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Resolve imports, once. Concurrent callers share the in-flight resolution.
    pub async fn scope(&self, cancel: &CancellationToken) -> Result<&Arc<ImportedScope>, Cancelled> {
        self.scope.get_or_try_init(|| self.initialize(cancel)).await
    }

    /// Resolve every keyword call, once. Concurrent callers share the in-flight pass.
    pub async fn analysis(&self, cancel: &CancellationToken) -> Result<&Arc<Analysis>, Cancelled> {
        self.analysis.get_or_try_init(|| self.analyze(cancel)).await
    }

    /// Import and keyword call diagnostics of this document
    pub async fn diagnostics(&self, cancel: &CancellationToken) -> Result<Vec<Diagnostic>, Cancelled> {
        Ok(self.analysis(cancel).await?.diagnostics.clone())
    }

    pub async fn libraries(&self, cancel: &CancellationToken) -> Result<&IndexMap<String, LibraryEntry>, Cancelled> {
        Ok(&self.scope(cancel).await?.libraries)
    }

    pub async fn resources(&self, cancel: &CancellationToken) -> Result<&IndexMap<String, ResourceEntry>, Cancelled> {
        Ok(&self.scope(cancel).await?.resources)
    }

    pub async fn variables(&self, cancel: &CancellationToken) -> Result<&IndexMap<String, VariablesEntry>, Cancelled> {
        Ok(&self.scope(cancel).await?.variables)
    }

    /// Keywords declared in the document itself
    pub async fn library_doc(&self, cancel: &CancellationToken) -> Result<Option<Arc<LibraryDoc>>, Cancelled> {
        Ok(self.scope(cancel).await?.self_doc.clone())
    }

    /// Every visible keyword: resource keywords, then library keywords, then own keywords.
    pub async fn keywords(&self, cancel: &CancellationToken) -> Result<&[Arc<KeywordDoc>], Cancelled> {
        let scope = self.scope(cancel).await?;
        let keywords = self.keywords.get_or_init(|| {
            scope
                .resources
                .values()
                .chain(scope.libraries.values())
                .flat_map(|entry| entry.doc.keywords.values())
                .chain(scope.self_doc.iter().flat_map(|doc| doc.keywords.values()))
                .cloned()
                .collect()
        });
        Ok(keywords)
    }

    /// Look up a keyword. The returned diagnostics are not added to the namespace.
    pub async fn find_keyword(&self, name: &str, cancel: &CancellationToken) -> Result<KeywordMatch, Cancelled> {
        let scope = self.scope(cancel).await?;
        Ok(finder::find_keyword(scope, name))
    }

    pub fn invalidate(&self) {
        if !self.invalidated.swap(true, Ordering::AcqRel) {
            log::trace!("Namespace for {} invalidated", self.key.uri);
        }
    }

    /// Whether this namespace must be rebuilt. Pending library removals are applied first.
    pub fn is_invalidated(&self) -> bool {
        if self.invalidated.load(Ordering::Acquire) {
            return true;
        }
        let Ok(mut rx) = self.removed_rx.lock() else {
            return self.invalidated.load(Ordering::Acquire);
        };
        loop {
            match rx.try_recv() {
                Ok(sources) => {
                    if self.depends_on(&sources) {
                        self.invalidate();
                        break;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    log::debug!("Missed {} library removal notices for {}", skipped, self.key.uri);
                    self.invalidate();
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        self.invalidated.load(Ordering::Acquire)
    }

    /// Whether anything this namespace resolved came from one of `sources`.
    /// A namespace still resolving counts as dependent.
    pub fn depends_on(&self, sources: &[String]) -> bool {
        match self.scope.get() {
            Some(scope) => scope.depends_on(sources),
            None => true,
        }
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<Arc<ImportedScope>, Cancelled> {
        log::trace!("Initializing namespace for {}", self.key.uri);
        let start = Instant::now();

        let source = canonical(&self.source).await;
        let ModelImports { doc, batch } = self
            .import_model(&self.model, &source, vec![source.clone()], None, cancel)
            .await?;

        let mut scope = ImportedScope {
            search_order: self.search_order.clone(),
            diagnostics: batch.diagnostics,
            ..ImportedScope::default()
        };
        for resolved in batch.entries {
            match resolved {
                Resolved::Library(entry) => {
                    scope.libraries.insert(entry.key().to_string(), entry);
                }
                Resolved::Resource(entry) => {
                    scope.resources.insert(entry.key().to_string(), entry);
                }
                Resolved::Variables(entry) => {
                    scope.variables.insert(entry.key().to_string(), entry);
                }
            }
        }
        match doc {
            Ok(doc) => scope.self_doc = Some(doc),
            Err(err) => {
                log::warn!("Can't collect keywords of {}: {:#}", self.source.display(), err);
                scope.diagnostics.push(diagnostics::error(
                    model_range(&self.model),
                    format!("Fatal: can't collect keywords '{:#}'", err),
                    error_code(&err),
                ));
            }
        }

        log::trace!(
            "Namespace for {} initialized in {:?}: {} libraries, {} resources, {} variable files",
            self.key.uri,
            start.elapsed(),
            scope.libraries.len(),
            scope.resources.len(),
            scope.variables.len()
        );
        Ok(Arc::new(scope))
    }

    async fn analyze(&self, cancel: &CancellationToken) -> Result<Arc<Analysis>, Cancelled> {
        let scope = self.scope(cancel).await?.clone();

        let model = self.model.clone();
        let pass_scope = scope.clone();
        let token = cancel.clone();
        let result =
            tokio::task::spawn_blocking(move || analyzer::analyze(&model, &pass_scope, &token)).await;

        let mut analysis = match result {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(Cancelled)) => return Err(Cancelled),
            Err(err) => {
                let err = AnalysisError::from(err);
                if matches!(err, AnalysisError::Cancelled(_)) {
                    return Err(Cancelled);
                }
                log::error!("Keyword analysis of {} failed: {}", self.key.uri, err);
                Analysis {
                    diagnostics: vec![diagnostics::error(
                        model_range(&self.model),
                        format!("Fatal: can't analyze keyword calls '{}'", err),
                        err.code(),
                    )],
                    references: HashSet::new(),
                }
            }
        };

        let mut diagnostics = scope.diagnostics.clone();
        diagnostics.append(&mut analysis.diagnostics);
        analysis.diagnostics = diagnostics;
        Ok(Arc::new(analysis))
    }

    /// Resolve the default libraries and declared imports of `model`.
    ///
    /// `chain` holds the canonical paths of the files currently being resolved.
    /// `anchor` is the range of the top-level import being followed; failures
    /// below the top level are not reported, except cycles which are reported
    /// at the anchor.
    fn import_model<'a>(
        &'a self,
        model: &'a Model,
        source: &'a Path,
        chain: Vec<PathBuf>,
        anchor: Option<Range>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ModelImports, Cancelled>> {
        Box::pin(async move {
            check_cancelled(cancel)?;
            let base_dir = source.parent().unwrap_or_else(|| Path::new("."));
            let mut batch = ImportBatch::default();

            let defaults = join_all(
                DEFAULT_LIBRARIES
                    .iter()
                    .map(|name| self.library_manager.resolve_library(None, name, &[], base_dir)),
            )
            .await;
            for (name, result) in DEFAULT_LIBRARIES.iter().zip(defaults) {
                match result {
                    Ok(doc) => batch
                        .entries
                        .push(Resolved::Library(LibraryEntry::new(name, doc, Vec::new(), None))),
                    Err(err) if is_cancelled(&err) => return Err(Cancelled),
                    Err(err) => {
                        log::debug!("Can't import default library '{}': {:#}", name, err);
                        if anchor.is_none() {
                            batch.diagnostics.push(diagnostics::error(
                                Range::default(),
                                format!("Can't import default library '{}': {:#}", name, err),
                                error_code(&err),
                            ));
                        }
                    }
                }
            }

            let extraction = extract_imports(model);
            if anchor.is_none() {
                for (err, range) in &extraction.errors {
                    batch
                        .diagnostics
                        .push(diagnostics::error(*range, err.to_string(), err.code()));
                }
            }

            let results = join_all(
                extraction
                    .imports
                    .iter()
                    .map(|import| self.import_one(import, base_dir, &chain, anchor, cancel)),
            )
            .await;
            for result in results {
                batch.append(result?);
            }

            check_cancelled(cancel)?;
            let doc = self.library_manager.resolve_model(model, source).await;
            Ok(ModelImports { doc, batch })
        })
    }

    /// Resolve one import; failures become diagnostics and never affect siblings.
    async fn import_one(
        &self,
        import: &Import,
        base_dir: &Path,
        chain: &[PathBuf],
        anchor: Option<Range>,
        cancel: &CancellationToken,
    ) -> Result<ImportBatch, Cancelled> {
        check_cancelled(cancel)?;
        match self.resolve_import(import, base_dir, chain, anchor, cancel).await {
            Ok(batch) => Ok(batch),
            Err(err) if is_cancelled(&err) => Err(Cancelled),
            Err(err) => {
                log::debug!(
                    "{} import '{}' in {} failed: {:#}",
                    import.kind.setting_name(),
                    import.name.as_deref().unwrap_or_default(),
                    base_dir.display(),
                    err
                );
                let cyclic = matches!(
                    err.downcast_ref::<ImportError>(),
                    Some(ImportError::CyclicImport { .. })
                );
                let mut batch = ImportBatch::default();
                if anchor.is_none() || cyclic {
                    batch.diagnostics.push(diagnostics::error(
                        anchor.unwrap_or_else(|| import.diagnostic_range()),
                        format!("{:#}", err),
                        error_code(&err),
                    ));
                }
                Ok(batch)
            }
        }
    }

    async fn resolve_import(
        &self,
        import: &Import,
        base_dir: &Path,
        chain: &[PathBuf],
        anchor: Option<Range>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ImportBatch> {
        let name = import
            .name
            .as_deref()
            .ok_or(ImportError::MissingName(import.kind.setting_name()))?;
        let range = import.diagnostic_range();
        let report = anchor.is_none();
        let mut batch = ImportBatch::default();

        match import.kind {
            ImportKind::Library => {
                let doc = self
                    .library_manager
                    .resolve_library(Some(&self.key), name, &import.args, base_dir)
                    .await?;
                if report {
                    report_load_errors(&doc, range, &mut batch);
                    if doc.errors.is_empty() && doc.keywords.is_empty() {
                        batch.diagnostics.push(diagnostics::warning(
                            range,
                            format!("Imported library '{}' contains no keywords.", name),
                            "ImportWarning",
                        ));
                    }
                }
                batch.entries.push(Resolved::Library(LibraryEntry::new(
                    name,
                    doc,
                    import.args.clone(),
                    import.alias.clone(),
                )));
            }
            ImportKind::Resource => {
                let path = self
                    .library_manager
                    .find_file(name, base_dir, FileKind::Resource)
                    .await?;
                let extension = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if !RESOURCE_EXTENSIONS.contains(&extension.as_str()) {
                    return Err(ImportError::InvalidResourceExtension {
                        extension: format!(".{}", extension),
                    }
                    .into());
                }

                let canonical_path = canonical(&path).await;
                if chain.contains(&canonical_path) {
                    return Err(ImportError::CyclicImport {
                        chain: chain
                            .iter()
                            .chain(std::iter::once(&canonical_path))
                            .map(|p| p.display().to_string())
                            .collect(),
                    }
                    .into());
                }

                let model = self.library_manager.load_model(&canonical_path).await?;
                if model.has_tests() {
                    let section = if model.sections_of(SectionKind::TestCases).next().is_some() {
                        "Test Cases"
                    } else {
                        "Tasks"
                    };
                    return Err(ImportError::ResourceWithTests { section }.into());
                }

                let mut nested_chain = chain.to_vec();
                nested_chain.push(canonical_path.clone());
                let nested = self
                    .import_model(
                        &model,
                        &canonical_path,
                        nested_chain,
                        Some(anchor.unwrap_or(range)),
                        cancel,
                    )
                    .await?;
                batch.append(nested.batch);
                let doc = nested.doc?;
                if report {
                    report_load_errors(&doc, range, &mut batch);
                }
                batch
                    .entries
                    .push(Resolved::Resource(LibraryEntry::new(name, doc, Vec::new(), None)));
            }
            ImportKind::Variables => {
                let doc = self
                    .library_manager
                    .resolve_variables(name, &import.args, base_dir)
                    .await?;
                batch.entries.push(Resolved::Variables(VariablesEntry {
                    name: doc.name.clone(),
                    import_name: name.to_string(),
                    args: import.args.clone(),
                    doc,
                }));
            }
        }

        Ok(batch)
    }
}

fn report_load_errors(doc: &LibraryDoc, range: Range, batch: &mut ImportBatch) {
    for err in &doc.errors {
        batch
            .diagnostics
            .push(diagnostics::error(range, err.message.clone(), &err.type_name));
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library_manager::WorkspaceLibraryManager;
    use crate::parser::parse;
    use tower_lsp::lsp_types::{DiagnosticSeverity, NumberOrString, Url};

    fn namespace_for(manager: Arc<dyn LibraryManager>, text: &str) -> Namespace {
        let source = PathBuf::from("/nonexistent/suite.robot");
        let model = Arc::new(parse(text, Some(source.clone())));
        let key = DocumentKey::new(Url::parse("file:///nonexistent/suite.robot").unwrap(), 1);
        Namespace::new(manager, model, source, key)
    }

    fn code(diagnostic: &Diagnostic) -> Option<&str> {
        match &diagnostic.code {
            Some(NumberOrString::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Fails every `BuiltIn` import and delegates the rest
    struct BrokenBuiltIn(WorkspaceLibraryManager);

    #[async_trait::async_trait]
    impl LibraryManager for BrokenBuiltIn {
        async fn resolve_library(
            &self,
            context: Option<&DocumentKey>,
            name: &str,
            args: &[String],
            base_dir: &Path,
        ) -> anyhow::Result<Arc<LibraryDoc>> {
            if name == "BuiltIn" {
                anyhow::bail!("boom");
            }
            self.0.resolve_library(context, name, args, base_dir).await
        }

        async fn find_file(&self, name: &str, base_dir: &Path, kind: FileKind) -> anyhow::Result<PathBuf> {
            self.0.find_file(name, base_dir, kind).await
        }

        async fn resolve_variables(
            &self,
            name: &str,
            args: &[String],
            base_dir: &Path,
        ) -> anyhow::Result<Arc<VariablesDoc>> {
            self.0.resolve_variables(name, args, base_dir).await
        }

        fn subscribe_removed(&self) -> broadcast::Receiver<Vec<String>> {
            self.0.subscribe_removed()
        }
    }

    #[test]
    fn test_entry_key_prefers_alias_then_name() {
        let doc = Arc::new(LibraryDoc::with_keywords("Resolved", ["A"]));
        let aliased = LibraryEntry::new("raw", doc.clone(), Vec::new(), Some("Alias".into()));
        assert_eq!(aliased.key(), "Alias");
        let plain = LibraryEntry::new("raw", doc, Vec::new(), None);
        assert_eq!(plain.key(), "Resolved");
        let unnamed = LibraryEntry::new("raw", Arc::new(LibraryDoc::with_keywords("", ["A"])), Vec::new(), None);
        assert_eq!(unnamed.key(), "raw");
    }

    #[tokio::test]
    async fn test_default_library_is_imported() {
        let ns = namespace_for(Arc::new(WorkspaceLibraryManager::default()), "*** Test Cases ***\nT\n    Log    x\n");
        let cancel = CancellationToken::new();
        let libraries = ns.libraries(&cancel).await.unwrap();
        assert!(libraries.contains_key("BuiltIn"));
        assert!(ns.diagnostics(&cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_default_library_reported_at_document_start() {
        let manager = BrokenBuiltIn(WorkspaceLibraryManager::default());
        let ns = namespace_for(Arc::new(manager), "*** Settings ***\nLibrary    Collections\n");
        let cancel = CancellationToken::new();

        let diagnostics = ns.diagnostics(&cancel).await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range, Range::default());
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diagnostics[0].message, "Can't import default library 'BuiltIn': boom");

        let libraries = ns.libraries(&cancel).await.unwrap();
        assert_eq!(libraries.keys().collect::<Vec<_>>(), vec!["Collections"]);
    }

    #[tokio::test]
    async fn test_missing_alias_surfaces_in_diagnostics() {
        let ns = namespace_for(
            Arc::new(WorkspaceLibraryManager::default()),
            "*** Settings ***\nLibrary    Collections    AS\n",
        );
        let cancel = CancellationToken::new();

        let diagnostics = ns.diagnostics(&cancel).await.unwrap();
        let missing: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.message == "Library alias is missing after 'AS'.")
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].range.start.line, 1);
        assert_eq!(missing[0].severity, Some(DiagnosticSeverity::ERROR));
        assert!(ns.libraries(&cancel).await.unwrap().contains_key("Collections"));
    }

    #[tokio::test]
    async fn test_resource_with_test_cases_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::write(root.join("res.resource"), "*** Test Cases ***\nT\n    Log    x\n").unwrap();
        let source = root.join("suite.robot");
        let text = "*** Settings ***\nResource    res.resource\n";
        std::fs::write(&source, text).unwrap();

        let model = Arc::new(parse(text, Some(source.clone())));
        let key = DocumentKey::new(Url::from_file_path(&source).unwrap(), 1);
        let ns = Namespace::new(Arc::new(WorkspaceLibraryManager::default()), model, source, key);
        let cancel = CancellationToken::new();

        let diagnostics = ns.diagnostics(&cancel).await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Resource file with 'Test Cases' section is invalid.");
        assert_eq!(diagnostics[0].range.start.line, 1);
        assert_eq!(code(&diagnostics[0]), Some("ImportError"));
        assert!(ns.resources(&cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_import_does_not_block_siblings() {
        let text = "\
*** Settings ***
Library    NoSuchLib
Library    Collections
Library    AlsoMissing
";
        let ns = namespace_for(Arc::new(WorkspaceLibraryManager::default()), text);
        let cancel = CancellationToken::new();

        let libraries = ns.libraries(&cancel).await.unwrap();
        assert!(libraries.contains_key("Collections"));
        assert!(libraries.contains_key("BuiltIn"));

        let diagnostics = ns.diagnostics(&cancel).await.unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].range.start.line, 1);
        assert_eq!(diagnostics[1].range.start.line, 3);
        assert!(diagnostics.iter().all(|d| code(d) == Some("ImportError")));
    }

    #[tokio::test]
    async fn test_empty_library_warning() {
        let manager = WorkspaceLibraryManager::default();
        manager.register_library(LibraryDoc::with_keywords("Hollow", std::iter::empty())).await;
        let ns = namespace_for(Arc::new(manager), "*** Settings ***\nLibrary    Hollow\n");
        let diagnostics = ns.diagnostics(&CancellationToken::new()).await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(diagnostics[0].message, "Imported library 'Hollow' contains no keywords.");
    }

    #[tokio::test]
    async fn test_alias_keys_and_last_write_wins() {
        let manager = WorkspaceLibraryManager::default();
        manager.register_library(LibraryDoc::with_keywords("First", ["One"])).await;
        manager.register_library(LibraryDoc::with_keywords("Second", ["Two"])).await;
        let text = "\
*** Settings ***
Library    First    AS    Shared
Library    Collections
Library    Second    AS    Shared
";
        let ns = namespace_for(Arc::new(manager), text);
        let libraries = ns.libraries(&CancellationToken::new()).await.unwrap();
        let keys: Vec<&str> = libraries.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["BuiltIn", "Shared", "Collections"]);
        assert_eq!(libraries["Shared"].name, "Second");
    }

    #[tokio::test]
    async fn test_missing_import_name() {
        let ns = namespace_for(Arc::new(WorkspaceLibraryManager::default()), "*** Settings ***\nResource\n");
        let diagnostics = ns.diagnostics(&CancellationToken::new()).await.unwrap();
        assert_eq!(diagnostics[0].message, "Resource setting requires value.");
    }

    #[tokio::test]
    async fn test_keywords_order_resources_libraries_self() {
        let manager = WorkspaceLibraryManager::default();
        manager.register_library(LibraryDoc::with_keywords("BuiltIn", ["Log"])).await;
        let ns = namespace_for(Arc::new(manager), "*** Keywords ***\nMine\n    Log    x\n");
        let keywords = ns.keywords(&CancellationToken::new()).await.unwrap();
        let names: Vec<&str> = keywords.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["Log", "Mine"]);
    }

    #[tokio::test]
    async fn test_cancelled_initialization_is_retried() {
        let ns = namespace_for(Arc::new(WorkspaceLibraryManager::default()), "*** Settings ***\nLibrary    Collections\n");
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert_eq!(ns.diagnostics(&cancelled).await.unwrap_err(), Cancelled);

        let libraries = ns.libraries(&CancellationToken::new()).await.unwrap();
        assert!(libraries.contains_key("Collections"));
    }

    #[tokio::test]
    async fn test_removal_invalidates_dependent_namespace() {
        let manager = Arc::new(WorkspaceLibraryManager::default());
        manager.register_library(LibraryDoc::with_keywords("Custom", ["Click"])).await;
        manager.register_library(LibraryDoc::with_keywords("Unrelated", ["X"])).await;
        let ns = namespace_for(manager.clone(), "*** Settings ***\nLibrary    Custom\n");
        ns.scope(&CancellationToken::new()).await.unwrap();

        manager.remove_library("Unrelated").await;
        assert!(!ns.is_invalidated());

        manager.remove_library("Custom").await;
        assert!(ns.is_invalidated());
    }

    #[tokio::test]
    async fn test_find_keyword_does_not_touch_diagnostics() {
        let ns = namespace_for(Arc::new(WorkspaceLibraryManager::default()), "*** Test Cases ***\nT\n    Log    x\n");
        let cancel = CancellationToken::new();
        let result = ns.find_keyword("Missing", &cancel).await.unwrap();
        assert!(result.keyword.is_none());
        assert_eq!(result.diagnostics.len(), 1);
        assert!(ns.diagnostics(&cancel).await.unwrap().is_empty());
    }
}
