//
// namespace/imports.rs
//
// Import extraction from the settings section
//

use tower_lsp::lsp_types::Range;

use crate::error::ExtractError;
use crate::model::{ImportKind, Model, SectionKind, Statement, StatementKind, TokenKind};

/// An import declared in the settings section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub kind: ImportKind,
    /// Declared name; `None` when the setting has no value
    pub name: Option<String>,
    pub args: Vec<String>,
    pub alias: Option<String>,
    /// Range of the name token
    pub name_range: Option<Range>,
    /// Range of the whole statement
    pub range: Range,
}

impl Import {
    /// Range used for diagnostics about this import
    pub fn diagnostic_range(&self) -> Range {
        self.name_range.unwrap_or(self.range)
    }

    fn from_statement(kind: ImportKind, stmt: &Statement) -> (Self, Option<ExtractError>) {
        let name_token = stmt.get_token(TokenKind::Name);
        let alias = stmt.get_value(TokenKind::Alias).map(str::to_string);

        let error = match (stmt.get_token(TokenKind::AliasMarker), &alias) {
            (Some(marker), None) => Some(ExtractError::MissingAlias {
                marker: marker.value.clone(),
            }),
            _ => None,
        };

        let import = Self {
            kind,
            name: name_token.map(|t| t.value.clone()),
            args: stmt
                .get_tokens(TokenKind::Argument)
                .map(|t| t.value.clone())
                .collect(),
            alias,
            name_range: name_token.map(|t| t.range()),
            range: stmt.span.range(),
        };
        (import, error)
    }
}

/// Result of scanning a model for imports
#[derive(Debug, Default)]
pub struct Extraction {
    pub imports: Vec<Import>,
    /// Malformed imports, with the range of the offending statement
    pub errors: Vec<(ExtractError, Range)>,
}

/// Collect imports from the settings sections in declaration order.
pub fn extract_imports(model: &Model) -> Extraction {
    let mut extraction = Extraction::default();

    let statements = model
        .sections_of(SectionKind::Settings)
        .flat_map(|s| s.statements.iter());
    for stmt in statements {
        let StatementKind::Import(kind) = stmt.kind else {
            continue;
        };
        let (import, error) = Import::from_statement(kind, stmt);
        if let Some(error) = error {
            extraction.errors.push((error, import.range));
        }
        extraction.imports.push(import);
    }

    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use tower_lsp::lsp_types::Position;

    #[test]
    fn test_extracts_imports_in_order() {
        let text = "\
*** Settings ***
Library    Collections
Resource    common.resource
Library    MyLib    arg1    arg2    WITH NAME    Mine
Variables    vars.json
Documentation    not an import
";
        let extraction = extract_imports(&parse(text, None));
        assert!(extraction.errors.is_empty());
        let kinds: Vec<_> = extraction.imports.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImportKind::Library,
                ImportKind::Resource,
                ImportKind::Library,
                ImportKind::Variables
            ]
        );

        let lib = &extraction.imports[2];
        assert_eq!(lib.name.as_deref(), Some("MyLib"));
        assert_eq!(lib.args, vec!["arg1".to_string(), "arg2".to_string()]);
        assert_eq!(lib.alias.as_deref(), Some("Mine"));
    }

    #[test]
    fn test_name_range_and_fallback() {
        let text = "*** Settings ***\nLibrary    Collections\nLibrary\n";
        let extraction = extract_imports(&parse(text, None));

        let named = &extraction.imports[0];
        assert_eq!(
            named.diagnostic_range(),
            Range::new(Position::new(1, 11), Position::new(1, 22))
        );

        let unnamed = &extraction.imports[1];
        assert_eq!(unnamed.name, None);
        assert_eq!(unnamed.diagnostic_range(), unnamed.range);
        assert_eq!(unnamed.range.start, Position::new(2, 0));
    }

    #[test]
    fn test_missing_alias_is_extraction_error() {
        let text = "*** Settings ***\nLibrary    MyLib    AS\n";
        let extraction = extract_imports(&parse(text, None));
        assert_eq!(extraction.imports.len(), 1);
        assert_eq!(
            extraction.errors[0].0,
            ExtractError::MissingAlias { marker: "AS".into() }
        );
    }

    #[test]
    fn test_imports_outside_settings_are_ignored() {
        let text = "*** Keywords ***\nKw\n    Library    Nope\n";
        assert!(extract_imports(&parse(text, None)).imports.is_empty());
    }
}
