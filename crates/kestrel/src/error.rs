//
// error.rs
//
// Error taxonomy and the stable codes attached to diagnostics
//

use thiserror::Error;

pub const TOKEN_ERROR: &str = "TokenError";
pub const MODEL_ERROR: &str = "ModelError";
pub const KEYWORD_ERROR: &str = "KeywordError";
pub const KEYWORD_NOT_USED: &str = "KeywordNotUsed";

/// Resource file extensions accepted by resource imports
pub const RESOURCE_EXTENSIONS: &[&str] = &["resource", "robot", "txt", "tsv", "rst", "rest"];

/// Variable file extensions accepted by variables imports
pub const VARIABLES_EXTENSIONS: &[&str] = &["py", "yaml", "yml", "json"];

/// Analysis was cancelled by a newer request; never reported as a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("analysis cancelled")]
pub struct Cancelled;

/// Failure to resolve a single import
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0} setting requires value.")]
    MissingName(&'static str),

    #[error("{kind} file '{name}' does not exist.")]
    FileNotFound { kind: &'static str, name: String },

    #[error(
        "Invalid resource file extension '{extension}'. Supported extensions are {}.",
        extension_list(RESOURCE_EXTENSIONS)
    )]
    InvalidResourceExtension { extension: String },

    #[error(
        "Invalid variable file extension '{extension}'. Supported extensions are {}.",
        extension_list(VARIABLES_EXTENSIONS)
    )]
    InvalidVariablesExtension { extension: String },

    #[error("Resource file with '{section}' section is invalid.")]
    ResourceWithTests { section: &'static str },

    #[error("Importing library '{name}' failed: {reason}")]
    LibraryNotFound { name: String, reason: String },

    #[error("Cyclic resource import: {}", .chain.join(" -> "))]
    CyclicImport { chain: Vec<String> },
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::CyclicImport { .. } => "CyclicImportError",
            _ => "ImportError",
        }
    }
}

/// Malformed import syntax found while extracting imports
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Library alias is missing after '{marker}'.")]
    MissingAlias { marker: String },
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        "ImportError"
    }
}

/// Failure of a whole analysis source
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("scan task failed: {0}")]
    Panicked(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AnalysisError {
    pub fn code(&self) -> String {
        match self {
            AnalysisError::Cancelled(_) => "Cancelled".to_string(),
            AnalysisError::Panicked(_) => "Panic".to_string(),
            AnalysisError::Internal(err) => error_code(err),
        }
    }
}

impl From<tokio::task::JoinError> for AnalysisError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            AnalysisError::Cancelled(Cancelled)
        } else {
            AnalysisError::Panicked(err.to_string())
        }
    }
}

/// Diagnostic code of an arbitrary failure: the first known error type in its chain.
pub fn error_code(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ImportError>() {
            return e.code().to_string();
        }
        if let Some(e) = cause.downcast_ref::<ExtractError>() {
            return e.code().to_string();
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            return match e.kind() {
                std::io::ErrorKind::NotFound => "FileNotFoundError".to_string(),
                std::io::ErrorKind::PermissionDenied => "PermissionError".to_string(),
                _ => "IOError".to_string(),
            };
        }
        if cause.is::<serde_json::Error>() {
            return "JSONDecodeError".to_string();
        }
        if cause.is::<Cancelled>() {
            return "Cancelled".to_string();
        }
    }
    "Error".to_string()
}

/// Whether `err` is a cancellation anywhere in its chain
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

fn extension_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("'.{}'", s)).collect();
    match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}
