//
// namespace/analyzer.rs
//
// Keyword call resolution over a document's executable statements
//

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, NumberOrString};

use super::{finder, Analysis, ImportedScope};
use crate::diagnostics::SOURCE;
use crate::error::Cancelled;
use crate::model::{Model, SectionKind, Statement, StatementKind, TokenKind};
use crate::names::normalize;

/// Resolve every keyword call and fixture of `model` against `scope`.
///
/// Diagnostics from the keyword lookup are placed on the called keyword's
/// token, or on the whole statement when the call has no keyword.
pub fn analyze(model: &Model, scope: &ImportedScope, cancel: &CancellationToken) -> Result<Analysis, Cancelled> {
    let mut analysis = Analysis {
        diagnostics: Vec::new(),
        references: HashSet::new(),
    };

    let suite_template = model
        .sections_of(SectionKind::Settings)
        .flat_map(|s| s.statements.iter())
        .find(|s| is_setting(s, &["testtemplate", "tasktemplate"]))
        .map(is_active_template)
        .unwrap_or(false);

    for section in &model.sections {
        match section.kind {
            SectionKind::Settings => {
                for stmt in &section.statements {
                    check_statement(stmt, scope, cancel, &mut analysis)?;
                }
            }
            SectionKind::TestCases | SectionKind::Tasks | SectionKind::Keywords => {
                for block in &section.blocks {
                    // Rows of templated tests are data, not keyword calls
                    let templated = section.kind != SectionKind::Keywords
                        && block
                            .body
                            .iter()
                            .find(|s| is_setting(s, &["[template]"]))
                            .map(is_active_template)
                            .unwrap_or(suite_template);
                    for stmt in &block.body {
                        if templated && stmt.kind == StatementKind::KeywordCall {
                            continue;
                        }
                        check_statement(stmt, scope, cancel, &mut analysis)?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(analysis)
}

fn check_statement(
    stmt: &Statement,
    scope: &ImportedScope,
    cancel: &CancellationToken,
    analysis: &mut Analysis,
) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    let is_fixture = match stmt.kind {
        StatementKind::KeywordCall => false,
        StatementKind::Fixture(_) => true,
        _ => return Ok(()),
    };

    let token = stmt.keyword_token();
    let name = token.map(|t| t.value.as_str()).unwrap_or_default();
    if is_fixture && (name.is_empty() || name.eq_ignore_ascii_case("NONE")) {
        return Ok(());
    }
    let range = token.map(|t| t.range()).unwrap_or_else(|| stmt.span.range());

    let result = finder::find_keyword(scope, name);
    if let Some(keyword) = &result.keyword {
        analysis.references.insert(keyword.id());
    }
    analysis
        .diagnostics
        .extend(result.diagnostics.into_iter().map(|d| Diagnostic {
            range,
            severity: Some(d.severity),
            code: Some(NumberOrString::String(d.code.to_string())),
            source: Some(SOURCE.to_string()),
            message: d.message,
            ..Default::default()
        }));
    Ok(())
}

/// A template setting with no value or `NONE` disables templating
fn is_active_template(stmt: &Statement) -> bool {
    stmt.get_tokens(TokenKind::Argument)
        .next()
        .map(|t| !t.value.is_empty() && !t.value.eq_ignore_ascii_case("NONE"))
        .unwrap_or(false)
}

fn is_setting(stmt: &Statement, names: &[&str]) -> bool {
    stmt.kind == StatementKind::Setting
        && stmt
            .get_token(TokenKind::SettingName)
            .map(|t| names.contains(&normalize(&t.value).as_str()))
            .unwrap_or(false)
}
