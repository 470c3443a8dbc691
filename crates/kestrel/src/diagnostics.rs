//
// diagnostics.rs
//
// Diagnostic construction and the per-document diagnostics aggregator
//
// A document's diagnostics come from four sources: lexical token errors,
// structural model errors, the namespace (imports and keyword calls) and the
// workspace-wide unused keyword scan. Each source is isolated: a failure in
// one becomes a single fatal diagnostic covering the document and the others
// are still reported.
//

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, DiagnosticTag, NumberOrString, Position, Range, Url,
};

use crate::error::{AnalysisError, Cancelled, KEYWORD_NOT_USED, MODEL_ERROR, TOKEN_ERROR};
use crate::library_doc::KeywordDoc;
use crate::model::Model;
use crate::namespace::Namespace;
use crate::parser;

/// Source tag of every diagnostic we publish
pub const SOURCE: &str = "kestrel";

pub fn error(range: Range, message: impl Into<String>, code: impl Into<String>) -> Diagnostic {
    make(range, DiagnosticSeverity::ERROR, message.into(), code.into())
}

pub fn warning(range: Range, message: impl Into<String>, code: impl Into<String>) -> Diagnostic {
    make(range, DiagnosticSeverity::WARNING, message.into(), code.into())
}

fn make(range: Range, severity: DiagnosticSeverity, message: String, code: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        code: Some(NumberOrString::String(code)),
        source: Some(SOURCE.to_string()),
        message,
        ..Default::default()
    }
}

/// Range from the start of the document to the end of its last token
pub fn model_range(model: &Model) -> Range {
    let end = parser::tokens(model)
        .iter()
        .map(|t| t.range().end)
        .max_by_key(|p| (p.line, p.character))
        .unwrap_or_default();
    Range::new(Position::new(0, 0), end)
}

/// Lexical errors attached to tokens
pub fn token_errors(model: &Model, cancel: &CancellationToken) -> Result<Vec<Diagnostic>, Cancelled> {
    let mut diagnostics = Vec::new();
    for token in parser::tokens(model) {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if let Some(message) = &token.error {
            diagnostics.push(error(token.range(), message.clone(), TOKEN_ERROR));
        }
    }
    Ok(diagnostics)
}

/// Structural errors of statements and blocks
pub fn model_errors(model: &Model, cancel: &CancellationToken) -> Result<Vec<Diagnostic>, Cancelled> {
    let mut diagnostics = Vec::new();
    for section in &model.sections {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        for stmt in section.header.iter().chain(section.statements.iter()) {
            if let Some(message) = &stmt.error {
                diagnostics.push(error(stmt.span.range(), message.clone(), MODEL_ERROR));
            }
        }
        for block in &section.blocks {
            for message in &block.errors {
                diagnostics.push(error(block.name.range(), message.clone(), MODEL_ERROR));
            }
            for stmt in &block.body {
                if let Some(message) = &stmt.error {
                    diagnostics.push(error(stmt.span.range(), message.clone(), MODEL_ERROR));
                }
            }
        }
    }
    Ok(diagnostics)
}

/// Workspace index of keyword call sites
#[async_trait]
pub trait KeywordReferences: Send + Sync {
    /// Documents calling `keyword`
    async fn find_references(&self, keyword: &KeywordDoc, cancel: &CancellationToken) -> anyhow::Result<Vec<Url>>;
}

/// Keywords declared in the document that nothing in the workspace calls
pub async fn unused_keywords(
    namespace: &Namespace,
    references: &dyn KeywordReferences,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<Diagnostic>> {
    let Some(doc) = namespace.library_doc(cancel).await? else {
        return Ok(Vec::new());
    };

    let mut diagnostics = Vec::new();
    for keyword in doc.keywords.values() {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        if references.find_references(keyword, cancel).await?.is_empty() {
            let mut diagnostic = warning(
                keyword.name_range,
                format!("Keyword '{}' is not used.", keyword.name),
                KEYWORD_NOT_USED,
            );
            diagnostic.tags = Some(vec![DiagnosticTag::UNNECESSARY]);
            diagnostics.push(diagnostic);
        }
    }
    Ok(diagnostics)
}

/// Every diagnostic of the namespace's document, in source order: tokens,
/// model, namespace, unused keywords. `references` disables the unused
/// keyword scan when `None`.
pub async fn collect(
    namespace: &Namespace,
    references: Option<&dyn KeywordReferences>,
    cancel: &CancellationToken,
) -> Result<Vec<Diagnostic>, Cancelled> {
    let model = namespace.model().clone();
    let whole = model_range(&model);

    let (tokens, model_diagnostics, namespace_diagnostics, unused) = futures::join!(
        isolated("token", whole, blocking_scan(model.clone(), cancel, token_errors)),
        isolated("model", whole, blocking_scan(model.clone(), cancel, model_errors)),
        isolated("namespace", whole, async {
            Ok::<_, AnalysisError>(namespace.diagnostics(cancel).await?)
        }),
        isolated("unused keyword", whole, async {
            let diagnostics = match references {
                Some(references) => unused_keywords(namespace, references, cancel).await?,
                None => Vec::new(),
            };
            Ok::<_, AnalysisError>(diagnostics)
        }),
    );

    let mut diagnostics = tokens?;
    diagnostics.extend(model_diagnostics?);
    diagnostics.extend(namespace_diagnostics?);
    diagnostics.extend(unused?);
    Ok(diagnostics)
}

async fn blocking_scan(
    model: Arc<Model>,
    cancel: &CancellationToken,
    scan: fn(&Model, &CancellationToken) -> Result<Vec<Diagnostic>, Cancelled>,
) -> Result<Vec<Diagnostic>, AnalysisError> {
    let cancel = cancel.clone();
    let diagnostics = tokio::task::spawn_blocking(move || scan(&model, &cancel)).await??;
    Ok(diagnostics)
}

/// Run one diagnostics source, turning any failure other than cancellation
/// into a fatal diagnostic over `range`.
async fn isolated<F>(label: &str, range: Range, source: F) -> Result<Vec<Diagnostic>, Cancelled>
where
    F: Future<Output = Result<Vec<Diagnostic>, AnalysisError>>,
{
    let err = match AssertUnwindSafe(source).catch_unwind().await {
        Ok(Ok(diagnostics)) => return Ok(diagnostics),
        Ok(Err(AnalysisError::Cancelled(_))) => return Err(Cancelled),
        Ok(Err(AnalysisError::Internal(err))) if crate::error::is_cancelled(&err) => {
            return Err(Cancelled)
        }
        Ok(Err(err)) => err,
        Err(panic) => AnalysisError::Panicked(panic_message(panic.as_ref())),
    };

    log::error!("Can't get {} diagnostics: {}", label, err);
    Ok(vec![error(
        range,
        format!("Fatal: can't get {} diagnostics '{}'", label, err),
        err.code(),
    )])
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
