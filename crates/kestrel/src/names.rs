//
// names.rs
//
// Name normalization shared by every keyword, library and setting comparison
//

/// Normalize a name for comparison: lowercase, with spaces and underscores removed.
///
/// Keyword names, library names, aliases and search-order entries are all compared
/// through this function so that `Should Be Equal`, `should_be_equal` and
/// `ShouldBeEqual` denote the same keyword.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare two names after normalization.
pub fn eq(left: &str, right: &str) -> bool {
    // Avoid allocating for the common exact-match case
    left == right || normalize(left) == normalize(right)
}

/// BDD-style prefixes that may precede a keyword invocation.
pub const BDD_PREFIXES: &[&str] = &["given ", "when ", "then ", "and ", "but "];

/// Strip a leading BDD prefix, matched case-insensitively. Returns the remainder
/// when a prefix was present.
pub fn strip_bdd_prefix(name: &str) -> Option<&str> {
    BDD_PREFIXES.iter().find_map(|prefix| {
        let head = name.get(..prefix.len())?;
        if head.eq_ignore_ascii_case(prefix) {
            Some(&name[prefix.len()..])
        } else {
            None
        }
    })
}
