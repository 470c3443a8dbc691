//
// revalidation.rs
//
// Debounced diagnostics publishing
//
// Each schedule for a URI cancels the pending one, waits out the debounce
// window and then computes diagnostics outside the state lock. Results are
// only published while the document is still at the revision they were
// computed for, and never for a revision older than the last one published.
//

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::diagnostics::{self, KeywordReferences};
use crate::state::WorldState;

/// Tracks pending publish work per file
#[derive(Debug, Default)]
pub struct RevalidationState {
    pending: RwLock<HashMap<Url, CancellationToken>>,
}

impl RevalidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule work for a file, cancelling any pending work.
    /// Returns a cancellation token for the new task.
    pub fn schedule(&self, uri: Url) -> CancellationToken {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old_token) = pending.remove(&uri) {
            old_token.cancel();
        }
        let token = CancellationToken::new();
        pending.insert(uri, token.clone());
        token
    }

    /// Mark work as complete, unless a newer schedule already replaced it
    pub fn complete(&self, uri: &Url, token: &CancellationToken) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if !token.is_cancelled() {
            pending.remove(uri);
        }
    }

    pub fn cancel(&self, uri: &Url) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = pending.remove(uri) {
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        for (_, token) in pending.drain() {
            token.cancel();
        }
    }

    pub fn is_pending(&self, uri: &Url) -> bool {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(uri)
    }
}

/// Diagnostics publish gating to enforce monotonic publishing
#[derive(Debug, Default)]
pub struct DiagnosticsGate {
    /// Last published document revision per URI
    last_published: RwLock<HashMap<Url, u64>>,
    /// URIs that need republishing although their revision is unchanged
    force_republish: RwLock<HashSet<Url>>,
}

impl DiagnosticsGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if diagnostics can be published for this revision.
    ///
    /// - Normal: publish if `revision > last_published`
    /// - Forced: publish if `revision >= last_published`
    /// - Never: publish if `revision < last_published`
    pub fn can_publish(&self, uri: &Url, revision: u64) -> bool {
        let last_published = self.last_published.read().unwrap_or_else(PoisonError::into_inner);
        let force = self.force_republish.read().unwrap_or_else(PoisonError::into_inner);

        match last_published.get(uri) {
            Some(&last) if revision < last => false,
            Some(&last) if force.contains(uri) => revision >= last,
            Some(&last) => revision > last,
            None => true,
        }
    }

    pub fn record_publish(&self, uri: &Url, revision: u64) {
        let mut last_published = self.last_published.write().unwrap_or_else(PoisonError::into_inner);
        let mut force = self.force_republish.write().unwrap_or_else(PoisonError::into_inner);
        last_published.insert(uri.clone(), revision);
        force.remove(uri);
    }

    /// Allow a same-revision republish, e.g. after a dependency changed
    pub fn mark_force_republish(&self, uri: &Url) {
        log::trace!("Marking {} for force republish", uri);
        let mut force = self.force_republish.write().unwrap_or_else(PoisonError::into_inner);
        force.insert(uri.clone());
    }

    /// Clear all state for a URI (e.g., when document is closed)
    pub fn clear(&self, uri: &Url) {
        let mut last_published = self.last_published.write().unwrap_or_else(PoisonError::into_inner);
        let mut force = self.force_republish.write().unwrap_or_else(PoisonError::into_inner);
        last_published.remove(uri);
        force.remove(uri);
    }
}

/// Receiver of computed diagnostics
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>);
}

#[async_trait]
impl DiagnosticsSink for tower_lsp::Client {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        self.publish_diagnostics(uri, diagnostics, version).await;
    }
}

/// Schedule a debounced diagnostics publish for `uri`.
///
/// The schedule takes effect before this returns, so a later call for the
/// same URI always supersedes an earlier one.
pub async fn schedule_publish(
    state: Arc<tokio::sync::RwLock<WorldState>>,
    sink: Arc<dyn DiagnosticsSink>,
    uri: Url,
) -> Option<JoinHandle<()>> {
    let (token, debounce) = {
        let state = state.read().await;
        let doc = state.get_document(&uri)?;
        let debounce_ms = if doc.opened {
            state.config.document_debounce_ms
        } else {
            state.config.workspace_debounce_ms
        };
        (state.revalidation.schedule(uri.clone()), Duration::from_millis(debounce_ms))
    };

    Some(tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                log::trace!("Publish for {} superseded", uri);
                return;
            }
            _ = tokio::time::sleep(debounce) => {}
        }
        publish(&state, sink.as_ref(), &uri, &token).await;
    }))
}

async fn publish(
    state: &tokio::sync::RwLock<WorldState>,
    sink: &dyn DiagnosticsSink,
    uri: &Url,
    token: &CancellationToken,
) {
    // Snapshot under the lock, compute without it
    let (namespace, references, revision, version) = {
        let state = state.read().await;
        let Some(doc) = state.get_document(uri) else {
            return;
        };
        let revision = doc.revision;
        let version = doc.version;
        if !state.diagnostics_gate.can_publish(uri, revision) {
            log::trace!("Skipping publish for {}: revision {} already published", uri, revision);
            state.revalidation.complete(uri, token);
            return;
        }
        let Some(namespace) = state.namespace(uri) else {
            return;
        };
        let references = state.config.unused_keywords.then(|| state.references());
        (namespace, references, revision, version)
    };

    let references = references
        .as_ref()
        .map(|r| r as &dyn KeywordReferences);
    let diagnostics = match diagnostics::collect(&namespace, references, token).await {
        Ok(diagnostics) => diagnostics,
        Err(_) => {
            log::trace!("Diagnostics for {} cancelled", uri);
            return;
        }
    };

    {
        let state = state.read().await;
        let current = state.get_document(uri).map(|d| d.revision);
        if current != Some(revision) || token.is_cancelled() {
            log::trace!("Skipping stale diagnostics for {} at revision {}", uri, revision);
            return;
        }
        if !state.diagnostics_gate.can_publish(uri, revision) {
            return;
        }
        // Record before releasing the lock so a concurrent publish of the same revision is refused
        state.diagnostics_gate.record_publish(uri, revision);
        state.revalidation.complete(uri, token);
    }

    log::trace!("Publishing {} diagnostics for {}", diagnostics.len(), uri);
    sink.publish(uri.clone(), diagnostics, version).await;
}
