//
// config.rs
//
// Analysis configuration from initialization options and settings changes
//

use std::path::PathBuf;

/// Analysis configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Library and resource names that win ambiguous keyword lookups
    pub search_order: Vec<String>,
    /// Directories searched for libdoc JSON specs
    pub library_paths: Vec<PathBuf>,
    /// Directories searched for resource and variable files
    pub resource_paths: Vec<PathBuf>,
    /// Debounce delay for documents open in the editor, in milliseconds
    pub document_debounce_ms: u64,
    /// Debounce delay for background workspace documents, in milliseconds
    pub workspace_debounce_ms: u64,
    /// Whether the unused keyword scan runs
    pub unused_keywords: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            search_order: Vec::new(),
            library_paths: Vec::new(),
            resource_paths: Vec::new(),
            document_debounce_ms: 750,
            workspace_debounce_ms: 2000,
            unused_keywords: true,
        }
    }
}

impl AnalysisConfig {
    /// Whether switching to `other` changes how imports resolve
    pub fn resolution_changed(&self, other: &AnalysisConfig) -> bool {
        self.search_order != other.search_order
            || self.library_paths != other.library_paths
            || self.resource_paths != other.resource_paths
    }
}

/// Parse the `robot` settings object. Missing or mistyped fields keep their defaults.
///
/// ```json
/// { "robot": { "searchOrder": ["MyLib"], "debounce": { "documentMs": 500 } } }
/// ```
pub fn parse_config(settings: &serde_json::Value) -> Option<AnalysisConfig> {
    let robot = settings.get("robot")?;
    let mut config = AnalysisConfig::default();

    if let Some(v) = string_list(robot.get("searchOrder")) {
        config.search_order = v;
    }
    if let Some(v) = string_list(robot.get("libraryPaths")) {
        config.library_paths = v.into_iter().map(PathBuf::from).collect();
    }
    if let Some(v) = string_list(robot.get("resourcePaths")) {
        config.resource_paths = v.into_iter().map(PathBuf::from).collect();
    }

    if let Some(debounce) = robot.get("debounce") {
        if let Some(v) = debounce.get("documentMs").and_then(|v| v.as_u64()) {
            config.document_debounce_ms = v;
        }
        if let Some(v) = debounce.get("workspaceMs").and_then(|v| v.as_u64()) {
            config.workspace_debounce_ms = v;
        }
    }

    if let Some(v) = robot
        .get("diagnostics")
        .and_then(|d| d.get("unusedKeywords"))
        .and_then(|v| v.as_bool())
    {
        config.unused_keywords = v;
    }

    log::info!("Analysis configuration:");
    log::info!("  search order: {:?}", config.search_order);
    log::info!("  library paths: {:?}", config.library_paths);
    log::info!("  resource paths: {:?}", config.resource_paths);
    log::info!(
        "  debounce: document {}ms, workspace {}ms",
        config.document_debounce_ms,
        config.workspace_debounce_ms
    );
    log::info!("  unused keywords: {}", config.unused_keywords);

    Some(config)
}

fn string_list(value: Option<&serde_json::Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
    )
}
