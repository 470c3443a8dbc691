//
// namespace/finder.rs
//
// Keyword lookup over a resolved namespace
//

use std::sync::Arc;

use tower_lsp::lsp_types::DiagnosticSeverity;

use super::{ImportedScope, LibraryEntry};
use crate::error::KEYWORD_ERROR;
use crate::library_doc::{is_standard_library, KeywordDoc};
use crate::names::{self, strip_bdd_prefix};

/// A diagnostic produced by a keyword lookup, positioned by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinderDiagnostic {
    pub message: String,
    pub severity: DiagnosticSeverity,
    pub code: &'static str,
}

/// Outcome of a keyword lookup
#[derive(Debug, Clone, Default)]
pub struct KeywordMatch {
    pub keyword: Option<Arc<KeywordDoc>>,
    pub diagnostics: Vec<FinderDiagnostic>,
}

/// Ambiguity or an invalid name ends the whole search
struct Aborted;

type Candidate<'a> = (&'a LibraryEntry, Arc<KeywordDoc>);

/// Find the keyword a call named `name` resolves to.
///
/// Self-declared keywords win, then qualified `Owner.Keyword` names, then
/// resource keywords, then library keywords. BDD prefixes are stripped as a
/// last resort.
pub fn find_keyword(scope: &ImportedScope, name: &str) -> KeywordMatch {
    let mut finder = KeywordFinder {
        scope,
        diagnostics: Vec::new(),
    };
    let keyword = match finder.find(name) {
        Ok(Some(keyword)) => Some(keyword),
        Ok(None) => {
            finder.error(format!("No keyword with name '{}' found.", name));
            None
        }
        Err(Aborted) => None,
    };
    KeywordMatch {
        keyword,
        diagnostics: finder.diagnostics,
    }
}

struct KeywordFinder<'a> {
    scope: &'a ImportedScope,
    diagnostics: Vec<FinderDiagnostic>,
}

impl<'a> KeywordFinder<'a> {
    fn find(&mut self, name: &str) -> Result<Option<Arc<KeywordDoc>>, Aborted> {
        if name.is_empty() {
            self.error("Keyword name cannot be empty.".to_string());
            return Ok(None);
        }

        if let Some(keyword) = self.from_self(name) {
            return Ok(Some(keyword));
        }
        if name.contains('.') {
            if let Some(keyword) = self.explicit(name)? {
                return Ok(Some(keyword));
            }
        }
        if let Some(keyword) = self.implicit(name)? {
            return Ok(Some(keyword));
        }
        match strip_bdd_prefix(name) {
            Some(rest) => self.find(rest),
            None => Ok(None),
        }
    }

    fn from_self(&self, name: &str) -> Option<Arc<KeywordDoc>> {
        self.scope
            .self_doc
            .as_ref()
            .and_then(|doc| doc.keywords.get(name))
            .cloned()
    }

    /// `Owner.Keyword`, trying every dot as the split point
    fn explicit(&mut self, name: &str) -> Result<Option<Arc<KeywordDoc>>, Aborted> {
        let scope = self.scope;
        let mut found: Vec<Candidate<'a>> = Vec::new();
        for (idx, _) in name.match_indices('.') {
            let (owner, keyword) = (&name[..idx], &name[idx + 1..]);
            let entries = scope.libraries.iter().chain(scope.resources.iter());
            for (key, entry) in entries {
                if !names::eq(key, owner) {
                    continue;
                }
                if let Some(kw) = entry.doc.keywords.get(keyword) {
                    found.push((entry, kw.clone()));
                }
            }
        }

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop().map(|(_, kw)| kw)),
            _ => {
                self.error(multiple_keywords_message(name, &found, false));
                Err(Aborted)
            }
        }
    }

    fn implicit(&mut self, name: &str) -> Result<Option<Arc<KeywordDoc>>, Aborted> {
        if let Some(keyword) = self.from_resources(name)? {
            return Ok(Some(keyword));
        }
        self.from_libraries(name)
    }

    fn from_resources(&mut self, name: &str) -> Result<Option<Arc<KeywordDoc>>, Aborted> {
        let found = candidates(self.scope.resources.values(), name);
        if found.is_empty() {
            return Ok(None);
        }
        let found = self.by_search_order(found);
        self.unique(name, found)
    }

    fn from_libraries(&mut self, name: &str) -> Result<Option<Arc<KeywordDoc>>, Aborted> {
        let found = candidates(self.scope.libraries.values(), name);
        if found.is_empty() {
            return Ok(None);
        }
        let mut found = self.by_search_order(found);
        if found.len() == 2 {
            found = self.prefer_custom(found);
        }
        self.unique(name, found)
    }

    fn unique(&mut self, name: &str, mut found: Vec<Candidate<'a>>) -> Result<Option<Arc<KeywordDoc>>, Aborted> {
        if found.len() == 1 {
            return Ok(found.pop().map(|(_, kw)| kw));
        }
        self.error(multiple_keywords_message(name, &found, true));
        Err(Aborted)
    }

    fn by_search_order(&self, mut found: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
        if found.len() < 2 {
            return found;
        }
        for libname in &self.scope.search_order {
            if let Some(pos) = found
                .iter()
                .position(|(entry, _)| names::eq(libname, entry.display_name()))
            {
                return vec![found.swap_remove(pos)];
            }
        }
        found
    }

    /// A custom library keyword shadows a standard library keyword of the same name.
    fn prefer_custom(&mut self, mut found: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
        let first_standard = is_standard_library(&found[0].0.name);
        let second_standard = is_standard_library(&found[1].0.name);
        let (custom, standard) = match (first_standard, second_standard) {
            (false, true) => (found.swap_remove(0), found.swap_remove(0)),
            (true, false) => {
                let custom = found.swap_remove(1);
                (custom, found.swap_remove(0))
            }
            _ => return found,
        };

        self.diagnostics.push(FinderDiagnostic {
            message: custom_and_standard_message(&custom, &standard),
            severity: DiagnosticSeverity::WARNING,
            code: KEYWORD_ERROR,
        });
        vec![custom]
    }

    fn error(&mut self, message: String) {
        self.diagnostics.push(FinderDiagnostic {
            message,
            severity: DiagnosticSeverity::ERROR,
            code: KEYWORD_ERROR,
        });
    }
}

fn candidates<'a>(entries: impl Iterator<Item = &'a LibraryEntry>, name: &str) -> Vec<Candidate<'a>> {
    entries
        .filter_map(|entry| entry.doc.keywords.get(name).map(|kw| (entry, kw.clone())))
        .collect()
}

fn multiple_keywords_message(name: &str, found: &[Candidate<'_>], implicit: bool) -> String {
    let mut header = format!("Multiple keywords with name '{}' found", name);
    if implicit {
        header.push_str(". Give the full name of the keyword you want to use");
    }
    header.push(':');

    let mut names: Vec<String> = found
        .iter()
        .map(|(entry, kw)| format!("{}.{}", entry.display_name(), kw.name))
        .collect();
    names.sort();

    std::iter::once(header)
        .chain(names)
        .collect::<Vec<_>>()
        .join("\n    ")
}

fn custom_and_standard_message(custom: &Candidate<'_>, standard: &Candidate<'_>) -> String {
    let imported_as = |entry: &LibraryEntry| {
        entry
            .alias
            .as_ref()
            .map(|alias| format!(" imported as '{}'", alias))
            .unwrap_or_default()
    };
    format!(
        "Keyword '{}' found both from a custom test library '{}'{} and a standard library '{}'{}. \
         The custom keyword is used. To select explicitly, and to get rid of this warning, use \
         either '{}.{}' or '{}.{}'.",
        standard.1.name,
        custom.0.name,
        imported_as(custom.0),
        standard.0.name,
        imported_as(standard.0),
        custom.0.display_name(),
        custom.1.name,
        standard.0.display_name(),
        standard.1.name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library_doc::{DocType, LibraryDoc};

    fn entry(name: &str, alias: Option<&str>, keywords: &[&str]) -> LibraryEntry {
        LibraryEntry {
            name: name.to_string(),
            import_name: name.to_string(),
            alias: alias.map(str::to_string),
            args: Vec::new(),
            doc: Arc::new(LibraryDoc::with_keywords(name, keywords.iter().copied())),
        }
    }

    fn scope_with(libraries: Vec<LibraryEntry>, resources: Vec<LibraryEntry>) -> ImportedScope {
        let mut scope = ImportedScope::default();
        for lib in libraries {
            scope.libraries.insert(lib.key().to_string(), lib);
        }
        for res in resources {
            scope.resources.insert(res.key().to_string(), res);
        }
        scope
    }

    fn messages(result: &KeywordMatch) -> Vec<&str> {
        result.diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn test_empty_name() {
        let scope = ImportedScope::default();
        let result = find_keyword(&scope, "");
        assert!(result.keyword.is_none());
        assert_eq!(
            messages(&result),
            vec!["Keyword name cannot be empty.", "No keyword with name '' found."]
        );
    }

    #[test]
    fn test_bare_bdd_prefix_is_not_found() {
        let scope = scope_with(vec![entry("BuiltIn", None, &["Log"])], vec![]);
        let result = find_keyword(&scope, "Given ");
        assert!(result.keyword.is_none());
        assert_eq!(
            messages(&result),
            vec!["Keyword name cannot be empty.", "No keyword with name 'Given ' found."]
        );
    }

    #[test]
    fn test_not_found() {
        let scope = scope_with(vec![entry("BuiltIn", None, &["Log"])], vec![]);
        let result = find_keyword(&scope, "Nope");
        assert!(result.keyword.is_none());
        assert_eq!(messages(&result), vec!["No keyword with name 'Nope' found."]);
        assert_eq!(result.diagnostics[0].code, "KeywordError");
    }

    #[test]
    fn test_self_keyword_wins() {
        let mut scope = scope_with(vec![entry("Custom", None, &["Foo"])], vec![]);
        let mut own = LibraryDoc::new("suite", DocType::Suite);
        let mut kw = KeywordDoc::new("Foo", "suite");
        kw.line_no = 7;
        own.keywords.insert(kw);
        scope.self_doc = Some(Arc::new(own));

        let result = find_keyword(&scope, "foo");
        assert_eq!(result.keyword.unwrap().line_no, 7);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_ambiguous_libraries_listed_sorted() {
        let scope = scope_with(
            vec![entry("Zeta", None, &["Bar"]), entry("Alpha", None, &["Bar"])],
            vec![],
        );
        let result = find_keyword(&scope, "Bar");
        assert!(result.keyword.is_none());
        assert_eq!(
            messages(&result),
            vec![
                "Multiple keywords with name 'Bar' found. Give the full name of the keyword you want to use:\n    Alpha.Bar\n    Zeta.Bar"
            ]
        );
    }

    #[test]
    fn test_search_order_breaks_tie() {
        let mut scope = scope_with(
            vec![entry("Zeta", None, &["Bar"]), entry("Alpha", None, &["Bar"])],
            vec![],
        );
        scope.search_order = vec!["zeta".to_string()];
        let result = find_keyword(&scope, "Bar");
        assert_eq!(result.keyword.unwrap().libname, "Zeta");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_custom_shadows_standard_with_warning() {
        let scope = scope_with(
            vec![entry("BuiltIn", None, &["Click"]), entry("Custom", None, &["Click"])],
            vec![],
        );
        let result = find_keyword(&scope, "Click");
        assert_eq!(result.keyword.unwrap().libname, "Custom");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].severity, DiagnosticSeverity::WARNING);
        assert_eq!(
            result.diagnostics[0].message,
            "Keyword 'Click' found both from a custom test library 'Custom' and a standard library \
             'BuiltIn'. The custom keyword is used. To select explicitly, and to get rid of this \
             warning, use either 'Custom.Click' or 'BuiltIn.Click'."
        );
    }

    #[test]
    fn test_remote_is_not_standard_for_precedence() {
        let scope = scope_with(
            vec![entry("Remote", None, &["Click"]), entry("Custom", None, &["Click"])],
            vec![],
        );
        let result = find_keyword(&scope, "Click");
        assert!(result.keyword.is_none());
        assert!(result.diagnostics[0].message.starts_with("Multiple keywords"));
    }

    #[test]
    fn test_resources_before_libraries() {
        let scope = scope_with(
            vec![entry("Custom", None, &["Open"])],
            vec![entry("common", None, &["Open"])],
        );
        let result = find_keyword(&scope, "Open");
        assert_eq!(result.keyword.unwrap().libname, "common");
    }

    #[test]
    fn test_qualified_name_uses_alias_key() {
        let scope = scope_with(
            vec![entry("MyLib", Some("Mine"), &["Do"]), entry("Other", None, &["Do"])],
            vec![],
        );
        let result = find_keyword(&scope, "mine.do");
        assert_eq!(result.keyword.unwrap().libname, "MyLib");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_qualified_name_with_dotted_owner() {
        let scope = scope_with(vec![entry("com.acme.Lib", None, &["Run It"])], vec![]);
        let result = find_keyword(&scope, "com.acme.Lib.Run It");
        assert!(result.keyword.is_some());
    }

    #[test]
    fn test_qualified_ambiguity_has_no_hint() {
        let scope = scope_with(
            vec![entry("a", None, &["b.c"]), entry("a.b", None, &["c"])],
            vec![],
        );
        let result = find_keyword(&scope, "a.b.c");
        assert!(result.keyword.is_none());
        assert_eq!(
            messages(&result),
            vec!["Multiple keywords with name 'a.b.c' found:\n    a.b.c\n    a.b.c"]
        );
    }

    #[test]
    fn test_bdd_prefix_restarts_search() {
        let scope = scope_with(vec![entry("Custom", None, &["Some Keyword"])], vec![]);
        let plain = find_keyword(&scope, "Some Keyword").keyword.unwrap();
        let bdd = find_keyword(&scope, "Given Some Keyword").keyword.unwrap();
        assert!(Arc::ptr_eq(&plain, &bdd));
        let chained = find_keyword(&scope, "and but Some Keyword").keyword.unwrap();
        assert!(Arc::ptr_eq(&plain, &chained));
    }

    #[test]
    fn test_ambiguity_aborts_before_bdd() {
        let scope = scope_with(
            vec![entry("A", None, &["Given X", "X"]), entry("B", None, &["Given X"])],
            vec![],
        );
        let result = find_keyword(&scope, "Given X");
        assert!(result.keyword.is_none());
        assert_eq!(result.diagnostics.len(), 1);
    }
}
