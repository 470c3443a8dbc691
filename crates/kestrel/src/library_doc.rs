//
// library_doc.rs
//
// Keyword catalogs of libraries, resource files and suites
//

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use tower_lsp::lsp_types::{Position, Range};

use crate::model::{Model, StatementKind, TokenKind};
use crate::names::normalize;

/// Libraries shipped with the runtime
pub const STANDARD_LIBRARIES: &[&str] = &[
    "BuiltIn",
    "Collections",
    "DateTime",
    "Dialogs",
    "Easter",
    "OperatingSystem",
    "Process",
    "Remote",
    "Screenshot",
    "String",
    "Telnet",
    "XML",
];

/// Standard library that never takes part in custom-versus-standard conflict resolution
pub const REMOTE_LIBRARY: &str = "Remote";

/// Libraries every suite and resource file imports implicitly
pub const DEFAULT_LIBRARIES: &[&str] = &["BuiltIn"];

/// Whether `name` is a standard library for custom-keyword precedence purposes
pub fn is_standard_library(name: &str) -> bool {
    name != REMOTE_LIBRARY && STANDARD_LIBRARIES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocType {
    Library,
    Resource,
    Suite,
}

/// Identity of a keyword definition, stable across namespaces that load the same file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordId {
    pub source: Option<PathBuf>,
    pub name: String,
    pub line_no: u32,
}

/// A single keyword definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordDoc {
    pub name: String,
    /// Name of the declaring library or resource
    pub libname: String,
    pub args: Vec<String>,
    pub source: Option<PathBuf>,
    /// 1-based definition line, 0 when unknown
    pub line_no: u32,
    /// Range of the definition name, empty when unknown
    pub name_range: Range,
}

impl KeywordDoc {
    pub fn new(name: impl Into<String>, libname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            libname: libname.into(),
            args: Vec::new(),
            source: None,
            line_no: 0,
            name_range: Range::default(),
        }
    }

    pub fn id(&self) -> KeywordId {
        KeywordId {
            source: self.source.clone(),
            name: normalize(&self.name),
            line_no: self.line_no,
        }
    }
}

/// Keywords keyed by normalized name, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordCatalog {
    keywords: IndexMap<String, Arc<KeywordDoc>>,
}

impl KeywordCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a keyword; the first definition of a name wins.
    pub fn insert(&mut self, keyword: KeywordDoc) -> bool {
        let key = normalize(&keyword.name);
        if self.keywords.contains_key(&key) {
            return false;
        }
        self.keywords.insert(key, Arc::new(keyword));
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<KeywordDoc>> {
        self.keywords.get(&normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<KeywordDoc>> {
        self.keywords.values()
    }
}

/// An error reported while loading a library or resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    pub type_name: String,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Keyword catalog of a library, resource file or suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDoc {
    pub name: String,
    pub doc_type: DocType,
    pub source: Option<PathBuf>,
    pub keywords: KeywordCatalog,
    /// Errors reported by the loader; a document with errors is still usable
    pub errors: Vec<ErrorDetail>,
}

impl LibraryDoc {
    pub fn new(name: impl Into<String>, doc_type: DocType) -> Self {
        Self {
            name: name.into(),
            doc_type,
            source: None,
            keywords: KeywordCatalog::new(),
            errors: Vec::new(),
        }
    }

    /// Build a library document from a list of keyword names.
    pub fn with_keywords<'a>(name: &str, keywords: impl IntoIterator<Item = &'a str>) -> Self {
        let mut doc = Self::new(name, DocType::Library);
        for keyword in keywords {
            doc.keywords.insert(KeywordDoc::new(keyword, name));
        }
        doc
    }

    /// Collect the user keywords declared in a parsed file.
    ///
    /// The document is named after the file stem. A file with test cases or tasks
    /// is a suite, anything else is a resource.
    pub fn from_model(model: &Model, source: &Path) -> Self {
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let doc_type = if model.has_tests() {
            DocType::Suite
        } else {
            DocType::Resource
        };

        let mut doc = Self::new(name.clone(), doc_type);
        doc.source = Some(source.to_path_buf());

        for block in model.keyword_blocks() {
            let args = block
                .body
                .iter()
                .filter(|s| {
                    s.kind == StatementKind::Setting
                        && s.get_token(TokenKind::SettingName)
                            .map(|t| normalize(&t.value) == "[arguments]")
                            .unwrap_or(false)
                })
                .flat_map(|s| s.get_tokens(TokenKind::Argument).map(|t| t.value.clone()))
                .collect();

            let keyword = KeywordDoc {
                name: block.name().to_string(),
                libname: name.clone(),
                args,
                source: Some(source.to_path_buf()),
                line_no: block.name.line_no,
                name_range: block.name.range(),
            };
            if !doc.keywords.insert(keyword) {
                log::trace!(
                    "Keyword '{}' defined multiple times in {}",
                    block.name(),
                    source.display()
                );
            }
        }

        doc
    }

    /// Load a library document from a libdoc JSON spec.
    pub fn from_libdoc_json(text: &str, spec_path: Option<&Path>) -> anyhow::Result<Self> {
        let spec: LibdocSpec = serde_json::from_str(text)?;

        let source = spec.source.map(PathBuf::from).or_else(|| spec_path.map(Path::to_path_buf));
        let mut doc = Self::new(spec.name.clone(), DocType::Library);
        doc.source = source.clone();

        for kw in spec.keywords {
            let line_no = kw.lineno.unwrap_or(0);
            let name_range = if line_no > 0 {
                Range::new(Position::new(line_no - 1, 0), Position::new(line_no - 1, 0))
            } else {
                Range::default()
            };
            doc.keywords.insert(KeywordDoc {
                name: kw.name,
                libname: spec.name.clone(),
                args: kw.args.iter().map(LibdocArg::display).collect(),
                source: kw.source.map(PathBuf::from).or_else(|| source.clone()),
                line_no,
                name_range,
            });
        }

        Ok(doc)
    }
}

#[derive(Debug, Deserialize)]
struct LibdocSpec {
    name: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    keywords: Vec<LibdocKeyword>,
}

#[derive(Debug, Deserialize)]
struct LibdocKeyword {
    name: String,
    #[serde(default)]
    args: Vec<LibdocArg>,
    #[serde(default)]
    lineno: Option<u32>,
    #[serde(default)]
    source: Option<String>,
}

/// Arguments appear as plain strings in older specs and as objects in newer ones
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LibdocArg {
    Plain(String),
    Detailed {
        #[serde(default)]
        repr: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl LibdocArg {
    fn display(&self) -> String {
        match self {
            LibdocArg::Plain(s) => s.clone(),
            LibdocArg::Detailed { repr, name } => repr
                .clone()
                .or_else(|| name.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_catalog_lookup_is_normalized() {
        let doc = LibraryDoc::with_keywords("Custom", ["Click Element", "Log"]);
        assert!(doc.keywords.contains("click_element"));
        assert!(doc.keywords.contains("CLICK ELEMENT"));
        assert!(!doc.keywords.contains("Click"));
    }

    #[test]
    fn test_first_definition_wins() {
        let mut catalog = KeywordCatalog::new();
        let mut first = KeywordDoc::new("Foo", "a");
        first.line_no = 1;
        let mut second = KeywordDoc::new("foo", "a");
        second.line_no = 9;
        assert!(catalog.insert(first));
        assert!(!catalog.insert(second));
        assert_eq!(catalog.get("FOO").unwrap().line_no, 1);
    }

    #[test]
    fn test_from_model_collects_keywords() {
        let text = "*** Keywords ***\nOpen Page\n    [Arguments]    ${url}\n    Log    ${url}\n";
        let model = parse(text, None);
        let doc = LibraryDoc::from_model(&model, Path::new("/ws/common.resource"));
        assert_eq!(doc.name, "common");
        assert_eq!(doc.doc_type, DocType::Resource);
        let kw = doc.keywords.get("open page").unwrap();
        assert_eq!(kw.args, vec!["${url}".to_string()]);
        assert_eq!(kw.line_no, 2);
        assert_eq!(kw.name_range.start, Position::new(1, 0));
    }

    #[test]
    fn test_from_libdoc_json() {
        let json = r#"{
            "name": "MyLib",
            "source": "/libs/MyLib.py",
            "keywords": [
                {"name": "Do Thing", "args": ["a", "b=1"], "lineno": 12},
                {"name": "Other", "args": [{"name": "x", "repr": "x: int"}]}
            ]
        }"#;
        let doc = LibraryDoc::from_libdoc_json(json, None).unwrap();
        assert_eq!(doc.name, "MyLib");
        assert_eq!(doc.keywords.len(), 2);
        let kw = doc.keywords.get("do thing").unwrap();
        assert_eq!(kw.line_no, 12);
        assert_eq!(kw.args, vec!["a".to_string(), "b=1".to_string()]);
        assert_eq!(doc.keywords.get("other").unwrap().args, vec!["x: int".to_string()]);
    }

    #[test]
    fn test_standard_library_excludes_remote() {
        assert!(is_standard_library("BuiltIn"));
        assert!(is_standard_library("Collections"));
        assert!(!is_standard_library("Remote"));
        assert!(!is_standard_library("SeleniumLibrary"));
    }
}
