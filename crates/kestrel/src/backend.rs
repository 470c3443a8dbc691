//
// backend.rs
//
// Language server front end: document sync, configuration and diagnostics scheduling
//

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::config::parse_config;
use crate::revalidation::{schedule_publish, DiagnosticsSink};
use crate::state::{is_workspace_file, scan_workspace, WorldState};

pub struct Backend {
    client: Client,
    state: Arc<RwLock<WorldState>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(WorldState::default())),
        }
    }

    fn sink(&self) -> Arc<dyn DiagnosticsSink> {
        Arc::new(self.client.clone())
    }

    async fn publish(&self, uri: Url) {
        schedule_publish(self.state.clone(), self.sink(), uri).await;
    }

    /// Republish open documents whose diagnostics may have changed without an edit.
    async fn republish_open(&self, except: Option<&Url>) {
        let uris: Vec<Url> = {
            let state = self.state.read().await;
            state
                .open_uris()
                .into_iter()
                .filter(|uri| Some(uri) != except)
                .inspect(|uri| state.diagnostics_gate.mark_force_republish(uri))
                .collect()
        };
        for uri in uris {
            self.publish(uri).await;
        }
    }

    /// Watch the current library manager for removals and republish affected documents.
    fn spawn_removal_listener(&self) {
        let state = self.state.clone();
        let sink = self.sink();
        tokio::spawn(async move {
            let mut rx = state.read().await.library_manager.subscribe_removed();
            loop {
                match rx.recv().await {
                    Ok(removed) => log::debug!("Libraries removed: {:?}", removed),
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("Missed {} library removal notices", skipped)
                    }
                    // The manager was replaced after a configuration change
                    Err(RecvError::Closed) => break,
                }
                let affected: Vec<Url> = {
                    let state = state.read().await;
                    state
                        .invalidated_uris()
                        .into_iter()
                        .filter(|uri| state.get_document(uri).map(|d| d.opened).unwrap_or(false))
                        .inspect(|uri| state.diagnostics_gate.mark_force_republish(uri))
                        .collect()
                };
                for uri in affected {
                    schedule_publish(state.clone(), sink.clone(), uri).await;
                }
            }
        });
    }

    /// React to a file changing on disk: library specs evict cached libraries,
    /// suite and resource files invalidate the namespaces that imported them.
    async fn file_changed(&self, path: &Path) {
        let dependents = {
            let state = self.state.read().await;
            if path.extension().map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false) {
                state.library_manager.invalidate_source(path);
            }
            let dependents = state.invalidate_dependents(path);
            for uri in &dependents {
                state.diagnostics_gate.mark_force_republish(uri);
            }
            dependents
        };
        for uri in dependents {
            self.publish(uri).await;
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing kestrel");

        let mut state = self.state.write().await;

        if let Some(folders) = params.workspace_folders {
            for folder in folders {
                log::info!("Adding workspace folder: {}", folder.uri);
                state.workspace_folders.push(folder.uri);
            }
        } else if let Some(root_uri) = params.root_uri {
            log::info!("Adding root URI as workspace folder: {}", root_uri);
            state.workspace_folders.push(root_uri);
        }

        if let Some(config) = params.initialization_options.as_ref().and_then(parse_config) {
            state.update_config(config);
        }

        drop(state);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::INCREMENTAL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("kestrel"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("kestrel initialized");

        let folders = self.state.read().await.workspace_folders.clone();

        // Scan without holding the lock
        let files = tokio::task::spawn_blocking(move || scan_workspace(&folders))
            .await
            .unwrap_or_default();

        self.state.write().await.apply_workspace_index(files);
        self.spawn_removal_listener();
        self.republish_open(None).await;

        log::info!("Workspace initialization complete");
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("kestrel shutting down");
        self.state.read().await.revalidation.cancel_all();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        self.state
            .write()
            .await
            .open_document(doc.uri.clone(), &doc.text, doc.version);
        self.publish(doc.uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        self.state.write().await.apply_changes(
            &uri,
            params.content_changes,
            params.text_document.version,
        );
        self.publish(uri.clone()).await;
        // Keyword usage in this document feeds the unused keyword scan of the others
        if self.state.read().await.config.unused_keywords {
            self.republish_open(Some(&uri)).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        if let Ok(path) = params.text_document.uri.to_file_path() {
            self.file_changed(&path).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.state.write().await.close_document(&uri);

        // Keep the on-disk version around for workspace references
        let Ok(path) = uri.to_file_path() else {
            return;
        };
        if !is_workspace_file(&path) {
            return;
        }
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            self.state.write().await.index_document(uri, &text);
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::trace!("Configuration changed");
        let Some(config) = parse_config(&params.settings) else {
            log::warn!("No 'robot' settings in configuration change, keeping existing configuration");
            return;
        };

        let resolution_changed = self.state.write().await.update_config(config);
        if resolution_changed {
            self.spawn_removal_listener();
            self.republish_open(None).await;
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        log::trace!("Received watched files change: {} changes", params.changes.len());

        for change in params.changes {
            let Ok(path) = change.uri.to_file_path() else {
                continue;
            };
            if is_workspace_file(&path) {
                match change.typ {
                    FileChangeType::DELETED => {
                        self.state.write().await.remove_document(&change.uri);
                    }
                    _ => {
                        if let Ok(text) = tokio::fs::read_to_string(&path).await {
                            self.state.write().await.index_document(change.uri.clone(), &text);
                        }
                    }
                }
            }
            self.file_changed(&path).await;
        }
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
