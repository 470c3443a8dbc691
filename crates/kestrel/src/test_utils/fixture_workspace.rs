//! Deterministic fixture workspace generator for benchmarks and tests.
//!
//! Generates synthetic suite workspaces with controlled characteristics:
//! suite count, keywords per resource, resource import chains, library
//! imports and test steps.
//!
//! Output contains no randomness, so benchmarks are reproducible.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tower_lsp::lsp_types::Url;

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub suite_count: usize,
    pub resource_count: usize,
    pub keywords_per_resource: usize,
    /// resource_0 imports resource_1, which imports resource_2, ... up to this depth
    pub resource_chain_depth: usize,
    pub libraries_per_file: usize,
    pub tests_per_suite: usize,
}

/// Embedded standard libraries used deterministically in generated imports.
const LIBRARIES: &[&str] = &[
    "Collections",
    "String",
    "OperatingSystem",
    "DateTime",
    "Process",
    "XML",
];

impl FixtureConfig {
    /// Small workspace: 5 suites, 3 resources of 5 keywords each.
    pub fn small() -> Self {
        Self {
            suite_count: 5,
            resource_count: 3,
            keywords_per_resource: 5,
            resource_chain_depth: 2,
            libraries_per_file: 1,
            tests_per_suite: 3,
        }
    }

    /// Medium workspace: 25 suites, 10 resources of 20 keywords each.
    pub fn medium() -> Self {
        Self {
            suite_count: 25,
            resource_count: 10,
            keywords_per_resource: 20,
            resource_chain_depth: 5,
            libraries_per_file: 2,
            tests_per_suite: 10,
        }
    }

    /// Large workspace: 100 suites, 30 resources of 40 keywords each.
    pub fn large() -> Self {
        Self {
            suite_count: 100,
            resource_count: 30,
            keywords_per_resource: 40,
            resource_chain_depth: 10,
            libraries_per_file: 3,
            tests_per_suite: 20,
        }
    }
}

fn write_libraries(content: &mut String, index: usize, config: &FixtureConfig) {
    for lib_i in 0..config.libraries_per_file {
        let name = LIBRARIES[(index * config.libraries_per_file + lib_i) % LIBRARIES.len()];
        writeln!(content, "Library    {}", name).unwrap();
    }
}

/// Content of `resource_<index>.resource`
pub fn generate_resource_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::from("*** Settings ***\n");
    write_libraries(&mut content, index, config);
    if index < config.resource_chain_depth && index + 1 < config.resource_count {
        writeln!(content, "Resource    resource_{}.resource", index + 1).unwrap();
    }
    content.push_str("\n*** Keywords ***\n");

    for kw_i in 0..config.keywords_per_resource {
        writeln!(content, "Resource {} Keyword {}", index, kw_i).unwrap();
        writeln!(content, "    [Arguments]    ${{value}}").unwrap();
        writeln!(content, "    Log    ${{value}}").unwrap();
        if kw_i > 0 {
            writeln!(content, "    Resource {} Keyword {}    ${{value}}", index, kw_i - 1).unwrap();
        }
        content.push('\n');
    }
    content
}

/// Content of `suite_<index>.robot`
pub fn generate_suite_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::from("*** Settings ***\n");
    write_libraries(&mut content, index, config);
    let resource = if config.resource_count > 0 {
        let r = index % config.resource_count;
        writeln!(content, "Resource    resource_{}.resource", r).unwrap();
        Some(r)
    } else {
        None
    };
    content.push_str("\n*** Test Cases ***\n");

    for test_i in 0..config.tests_per_suite {
        writeln!(content, "Suite {} Test {}", index, test_i).unwrap();
        writeln!(content, "    Log    starting").unwrap();
        if let Some(r) = resource {
            let kw = test_i % config.keywords_per_resource.max(1);
            writeln!(content, "    Given Resource {} Keyword {}    {}", r, kw, test_i).unwrap();
        }
        writeln!(content, "    Suite {} Helper", index).unwrap();
        content.push('\n');
    }

    content.push_str("*** Keywords ***\n");
    writeln!(content, "Suite {} Helper", index).unwrap();
    writeln!(content, "    No Operation").unwrap();
    content
}

/// Create a temporary fixture workspace from the given configuration.
///
/// Calling this twice with the same `FixtureConfig` produces byte-identical files.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    for i in 0..config.resource_count {
        let filename = format!("resource_{}.resource", i);
        std::fs::write(dir.join(&filename), generate_resource_content(i, config))
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
    for i in 0..config.suite_count {
        let filename = format!("suite_{}.robot", i);
        std::fs::write(dir.join(&filename), generate_suite_content(i, config))
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
}

/// A temporary directory of hand-written workspace files
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory for test workspace");
        Self { dir }
    }

    /// Canonical root, so paths match what import resolution reports
    pub fn root(&self) -> PathBuf {
        std::fs::canonicalize(self.dir.path()).expect("temp directory exists")
    }

    /// Write `content` to `name` (creating parent directories) and return its path.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
        }
        std::fs::write(&path, content).unwrap_or_else(|e| panic!("Failed to write {}: {}", name, e));
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    pub fn uri(&self, name: &str) -> Url {
        Url::from_file_path(self.path(name)).expect("absolute path")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_small_preset_values() {
        let config = FixtureConfig::small();
        assert_eq!(config.suite_count, 5);
        assert_eq!(config.resource_count, 3);
        assert_eq!(config.keywords_per_resource, 5);
    }

    #[test]
    fn test_file_count_matches_config() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);
        let count = std::fs::read_dir(workspace.path()).unwrap().count();
        assert_eq!(count, config.suite_count + config.resource_count);
    }

    #[test]
    fn test_deterministic_output() {
        let config = FixtureConfig::small();
        assert_eq!(generate_suite_content(3, &config), generate_suite_content(3, &config));
        assert_eq!(generate_resource_content(1, &config), generate_resource_content(1, &config));
    }

    #[test]
    fn test_resource_chain_structure() {
        let config = FixtureConfig {
            resource_count: 4,
            resource_chain_depth: 2,
            ..FixtureConfig::small()
        };
        assert!(generate_resource_content(0, &config).contains("Resource    resource_1.resource"));
        assert!(generate_resource_content(1, &config).contains("Resource    resource_2.resource"));
        assert!(!generate_resource_content(2, &config).contains("Resource    resource_"));
    }

    #[test]
    fn test_generated_files_parse_without_errors() {
        let config = FixtureConfig::small();
        for i in 0..config.suite_count {
            let model = parse(&generate_suite_content(i, &config), None);
            let errors = crate::parser::tokens(&model)
                .into_iter()
                .filter(|t| t.error.is_some())
                .count();
            assert_eq!(errors, 0, "suite_{} should parse without errors", i);
        }
        for i in 0..config.resource_count {
            let model = parse(&generate_resource_content(i, &config), None);
            assert!(!model.has_tests());
        }
    }

    #[test]
    fn test_workspace_write_creates_directories() {
        let ws = TestWorkspace::new();
        let path = ws.write("nested/common.resource", "*** Keywords ***\n");
        assert!(path.is_file());
        assert_eq!(ws.uri("nested/common.resource").to_file_path().unwrap(), path);
    }
}
