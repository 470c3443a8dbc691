// cli/check.rs - `kestrel check` subcommand
//
// Scans a workspace, resolves every suite and resource file and prints the
// diagnostics the language server would publish.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Url};

use crate::config::AnalysisConfig;
use crate::diagnostics::{self, KeywordReferences};
use crate::state::{scan_workspace, WorldState};

/// Parsed arguments for the `check` subcommand.
#[derive(Debug, PartialEq, Eq)]
pub struct CheckArgs {
    pub path: PathBuf,
    pub library_paths: Vec<PathBuf>,
    pub resource_paths: Vec<PathBuf>,
    pub search_order: Vec<String>,
    pub unused_keywords: bool,
}

/// Parse `check` arguments from the remaining CLI args.
///
/// Expected usage: `kestrel check <path> [--library-path <dir>]... [--resource-path <dir>]...
/// [--search-order <name>]... [--no-unused]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<CheckArgs, String> {
    let mut path: Option<PathBuf> = None;
    let mut library_paths = Vec::new();
    let mut resource_paths = Vec::new();
    let mut search_order = Vec::new();
    let mut unused_keywords = true;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--library-path" => library_paths.push(PathBuf::from(value(args, &arg)?)),
            "--resource-path" => resource_paths.push(PathBuf::from(value(args, &arg)?)),
            "--search-order" => search_order.push(value(args, &arg)?),
            "--no-unused" => unused_keywords = false,
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if path.is_some() {
                    return Err("Multiple paths provided; expected exactly one".to_string());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let path = path.ok_or_else(|| "Missing required <path> argument".to_string())?;
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }

    Ok(CheckArgs {
        path,
        library_paths,
        resource_paths,
        search_order,
        unused_keywords,
    })
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{} requires a value", flag))
}

/// Diagnostics of one file
pub struct FileReport {
    pub uri: Url,
    pub diagnostics: Vec<Diagnostic>,
}

/// Analyze every workspace file under `args.path`, in path order.
pub async fn run_check(args: &CheckArgs) -> anyhow::Result<Vec<FileReport>> {
    let root = std::fs::canonicalize(&args.path)?;
    let folder = Url::from_file_path(&root)
        .map_err(|_| anyhow::anyhow!("Not a file path: {}", root.display()))?;

    let config = AnalysisConfig {
        search_order: args.search_order.clone(),
        library_paths: args.library_paths.clone(),
        resource_paths: args.resource_paths.clone(),
        unused_keywords: args.unused_keywords,
        ..AnalysisConfig::default()
    };
    let mut state = WorldState::new(config);
    let files = tokio::task::spawn_blocking(move || scan_workspace(&[folder])).await?;
    state.apply_workspace_index(files);

    let mut uris: Vec<Url> = state.documents.keys().cloned().collect();
    uris.sort();

    let references = args.unused_keywords.then(|| state.references());
    let references = references.as_ref().map(|r| r as &dyn KeywordReferences);
    let cancel = CancellationToken::new();

    let mut reports = Vec::with_capacity(uris.len());
    for uri in uris {
        let Some(namespace) = state.namespace(&uri) else {
            continue;
        };
        let diagnostics = diagnostics::collect(&namespace, references, &cancel).await?;
        reports.push(FileReport { uri, diagnostics });
    }
    Ok(reports)
}

/// Render reports as `path:line:column: severity: message [code]` lines.
pub fn format_reports(reports: &[FileReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let path = report
            .uri
            .to_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| report.uri.to_string());
        for d in &report.diagnostics {
            let severity = match d.severity {
                Some(DiagnosticSeverity::ERROR) => "error",
                Some(DiagnosticSeverity::WARNING) => "warning",
                Some(DiagnosticSeverity::INFORMATION) => "info",
                _ => "hint",
            };
            let code = match &d.code {
                Some(NumberOrString::String(code)) => format!(" [{}]", code),
                Some(NumberOrString::Number(code)) => format!(" [{}]", code),
                None => String::new(),
            };
            out.push_str(&format!(
                "{}:{}:{}: {}: {}{}\n",
                path,
                d.range.start.line + 1,
                d.range.start.character + 1,
                severity,
                d.message.replace('\n', " "),
                code
            ));
        }
    }
    out
}

/// Number of error diagnostics across all reports
pub fn error_count(reports: &[FileReport]) -> usize {
    reports
        .iter()
        .flat_map(|r| r.diagnostics.iter())
        .filter(|d| d.severity == Some(DiagnosticSeverity::ERROR))
        .count()
}

/// Entry point used by `main`: returns the process exit code.
pub async fn main(args: &mut impl Iterator<Item = String>) -> anyhow::Result<i32> {
    let args = parse_args(args).map_err(|e| anyhow::anyhow!(e))?;
    let reports = run_check(&args).await?;
    print!("{}", format_reports(&reports));
    let errors = error_count(&reports);
    log::info!("Checked {} files, {} errors", reports.len(), errors);
    Ok(if errors > 0 { 1 } else { 0 })
}
