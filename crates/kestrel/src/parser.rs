//
// parser.rs
//
// Plain-text parser for space- and pipe-separated suite and resource files
//
// This is a deliberately small parser: it recognizes sections, settings,
// variables, test cases, tasks, user keywords, fixtures and keyword calls.
// Control structures are recognized by their markers only and never
// produce keyword calls for their header cells.
//

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::{
    Block, FixtureKind, ImportKind, Model, Section, SectionKind, Span, Statement, StatementKind,
    Token, TokenKind,
};
use crate::names::normalize;
use crate::utf16::byte_offset_to_utf16_column;

const CONTINUATION: &str = "...";

/// Control structure markers; rows starting with one of these are not keyword calls
const CONTROL_MARKERS: &[&str] = &[
    "FOR", "END", "IF", "ELSE IF", "ELSE", "WHILE", "TRY", "EXCEPT", "FINALLY", "BREAK",
    "CONTINUE", "RETURN", "VAR", "GROUP",
];

/// Library alias markers, case-sensitive like the runtime
const ALIAS_MARKERS: &[&str] = &["WITH NAME", "AS"];

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"(?: {2,}|\t)[ \t]*").expect("valid separator regex"))
}

fn header_pattern() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(r"^\*+\s*(.*?)\s*\**$").expect("valid header regex"))
}

/// Variable names, optionally followed by `=`; also used for assignment targets
fn assign_pattern() -> &'static Regex {
    static ASSIGN: OnceLock<Regex> = OnceLock::new();
    ASSIGN.get_or_init(|| Regex::new(r"^[$@&]\{[^}]+\}\s*=?$").expect("valid assign regex"))
}

#[derive(Debug, Clone)]
struct Cell {
    value: String,
    line_no: u32,
    col: u32,
    end_col: u32,
}

impl Cell {
    fn token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.value.clone(), self.line_no, self.col, self.end_col)
    }
}

#[derive(Debug)]
struct Row {
    indented: bool,
    cells: Vec<Cell>,
}

/// Byte ranges of the cells of a line; the flag tells whether the row is indented.
fn split_cells(line: &str) -> (bool, Vec<(usize, usize)>) {
    let mut ranges = Vec::new();

    if line.starts_with('|') {
        let mut start = 1;
        for (idx, _) in line.match_indices('|').skip(1) {
            ranges.push((start, idx));
            start = idx + 1;
        }
        if start < line.len() {
            ranges.push((start, line.len()));
        }
    } else {
        let mut start = 0;
        for m in separator().find_iter(line) {
            ranges.push((start, m.start()));
            start = m.end();
        }
        if start < line.len() {
            ranges.push((start, line.len()));
        }
    }

    // Trim each cell and shift its offsets accordingly
    let trimmed: Vec<(usize, usize)> = ranges
        .into_iter()
        .map(|(s, e)| {
            let cell = &line[s..e];
            let lead = cell.len() - cell.trim_start().len();
            let trail = cell.len() - cell.trim_end().len();
            (s + lead, (e - trail).max(s + lead))
        })
        .collect();

    let indented = match trimmed.first() {
        Some((s, e)) => s == e || line.starts_with(char::is_whitespace),
        None => false,
    };
    (indented, trimmed)
}

fn split_line(line: &str, line_no: u32) -> Option<Row> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let (indented, ranges) = split_cells(line);
    let mut cells = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        let value = &line[start..end];
        if value.starts_with('#') {
            break;
        }
        cells.push(Cell {
            value: value.to_string(),
            line_no,
            col: byte_offset_to_utf16_column(line, start),
            end_col: byte_offset_to_utf16_column(line, end),
        });
    }

    // Indentation cells carry no data
    let first_data = cells.iter().position(|c| !c.value.is_empty()).unwrap_or(cells.len());
    cells.drain(..first_data);
    if cells.is_empty() {
        return None;
    }

    Some(Row { indented, cells })
}

fn section_kind(name: &str) -> Option<SectionKind> {
    match normalize(name).as_str() {
        "settings" | "setting" => Some(SectionKind::Settings),
        "variables" | "variable" => Some(SectionKind::Variables),
        "testcases" | "testcase" => Some(SectionKind::TestCases),
        "tasks" | "task" => Some(SectionKind::Tasks),
        "keywords" | "keyword" => Some(SectionKind::Keywords),
        "comments" | "comment" => Some(SectionKind::Comments),
        _ => None,
    }
}

/// Parse document text into a model.
pub fn parse(text: &str, source: Option<PathBuf>) -> Model {
    let mut rows: Vec<Row> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(row) = split_line(line, idx as u32 + 1) else {
            continue;
        };
        if row.cells[0].value == CONTINUATION {
            if let Some(prev) = rows.last_mut() {
                if !prev.cells[0].value.starts_with('*') {
                    prev.cells.extend(row.cells.into_iter().skip(1));
                    continue;
                }
            }
        }
        rows.push(row);
    }

    let mut builder = ModelBuilder {
        model: Model {
            source,
            sections: Vec::new(),
        },
        section: Section::new(SectionKind::Implicit, None),
        block: None,
    };
    for row in rows {
        builder.push_row(row);
    }
    builder.finish()
}

/// Every token of a model in document order; the lexical stream scanned for errors.
pub fn tokens(model: &Model) -> Vec<&Token> {
    let mut tokens = Vec::new();
    for section in &model.sections {
        if let Some(header) = &section.header {
            tokens.extend(header.tokens.iter());
        }
        tokens.extend(section.statements.iter().flat_map(|s| s.tokens.iter()));
        for block in &section.blocks {
            tokens.push(&block.name);
            tokens.extend(block.body.iter().flat_map(|s| s.tokens.iter()));
        }
    }
    tokens
}

struct ModelBuilder {
    model: Model,
    section: Section,
    block: Option<Block>,
}

impl ModelBuilder {
    fn push_row(&mut self, row: Row) {
        let first = &row.cells[0];
        if !row.indented && first.value.starts_with('*') {
            self.start_section(first);
            return;
        }

        match self.section.kind {
            SectionKind::Settings => {
                let stmt = setting_statement(&row.cells);
                self.section.statements.push(stmt);
            }
            SectionKind::Variables => {
                let stmt = variable_statement(&row.cells);
                self.section.statements.push(stmt);
            }
            SectionKind::TestCases | SectionKind::Tasks | SectionKind::Keywords => {
                self.push_body_row(row);
            }
            SectionKind::Implicit | SectionKind::Comments | SectionKind::Invalid => {}
        }
    }

    fn start_section(&mut self, header_cell: &Cell) {
        self.close_section();

        let name = header_pattern()
            .captures(&header_cell.value)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let mut token = header_cell.token(TokenKind::SectionHeader);
        let kind = match section_kind(&name) {
            Some(kind) => kind,
            None => {
                token = token.with_error(format!(
                    "Unrecognized section header '{}'. Valid sections: 'Settings', 'Variables', \
                     'Test Cases', 'Tasks', 'Keywords' and 'Comments'.",
                    header_cell.value
                ));
                SectionKind::Invalid
            }
        };

        let header = Statement::new(StatementKind::SectionHeader, vec![token]);
        self.section = Section::new(kind, Some(header));
    }

    fn push_body_row(&mut self, row: Row) {
        let cells = row.cells;
        if !row.indented {
            self.close_block();
            let name = cells[0].token(TokenKind::Name);
            let span = Span::covering(std::slice::from_ref(&name));
            self.block = Some(Block {
                name,
                body: Vec::new(),
                span,
                errors: Vec::new(),
            });
            if cells.len() > 1 {
                let stmt = body_statement(&cells[1..]);
                self.push_to_block(stmt);
            }
            return;
        }

        let stmt = body_statement(&cells);
        if self.block.is_some() {
            self.push_to_block(stmt);
        } else {
            let mut stmt = stmt;
            stmt.kind = StatementKind::Error;
            stmt.error = Some("Statement is not inside a test case or keyword.".to_string());
            self.section.statements.push(stmt);
        }
    }

    fn push_to_block(&mut self, stmt: Statement) {
        if let Some(block) = self.block.as_mut() {
            block.span = block.span.join(stmt.span);
            block.body.push(stmt);
        }
    }

    fn close_block(&mut self) {
        let Some(mut block) = self.block.take() else {
            return;
        };
        let has_steps = block.body.iter().any(|s| {
            matches!(
                s.kind,
                StatementKind::KeywordCall | StatementKind::Control | StatementKind::Fixture(_)
            )
        });
        if !has_steps {
            let message = if self.section.kind == SectionKind::Keywords {
                "User keyword cannot be empty."
            } else {
                "Test case cannot be empty."
            };
            block.errors.push(message.to_string());
        }
        self.section.blocks.push(block);
    }

    fn close_section(&mut self) {
        self.close_block();
        let section = std::mem::replace(&mut self.section, Section::new(SectionKind::Implicit, None));
        if section.header.is_some() || !section.statements.is_empty() {
            self.model.sections.push(section);
        }
    }

    fn finish(mut self) -> Model {
        self.close_section();
        self.model
    }
}

fn setting_statement(cells: &[Cell]) -> Statement {
    let name = &cells[0];
    let setting = normalize(&name.value);

    let import_kind = match setting.as_str() {
        "library" => Some(ImportKind::Library),
        "resource" => Some(ImportKind::Resource),
        "variables" => Some(ImportKind::Variables),
        _ => None,
    };
    if let Some(kind) = import_kind {
        return import_statement(kind, cells);
    }

    let fixture_kind = match setting.as_str() {
        "suitesetup" => Some(FixtureKind::SuiteSetup),
        "suiteteardown" => Some(FixtureKind::SuiteTeardown),
        "testsetup" | "tasksetup" => Some(FixtureKind::TestSetup),
        "testteardown" | "taskteardown" => Some(FixtureKind::TestTeardown),
        _ => None,
    };
    if let Some(kind) = fixture_kind {
        return fixture_statement(kind, cells);
    }

    const KNOWN: &[&str] = &[
        "documentation",
        "metadata",
        "forcetags",
        "defaulttags",
        "testtags",
        "tasktags",
        "keywordtags",
        "testtemplate",
        "tasktemplate",
        "testtimeout",
        "tasktimeout",
        "suitename",
    ];

    let mut tokens = vec![name.token(TokenKind::SettingName)];
    tokens.extend(cells[1..].iter().map(|c| c.token(TokenKind::Argument)));
    if KNOWN.contains(&setting.as_str()) {
        Statement::new(StatementKind::Setting, tokens)
    } else {
        tokens[0] = tokens[0]
            .clone()
            .with_error(format!("Non-existing setting '{}'.", name.value));
        Statement::new(StatementKind::Error, tokens)
    }
}

fn import_statement(kind: ImportKind, cells: &[Cell]) -> Statement {
    let mut tokens = vec![cells[0].token(TokenKind::SettingName)];
    let mut error = None;

    if let Some(name) = cells.get(1) {
        tokens.push(name.token(TokenKind::Name));
    }

    let rest = cells.get(2..).unwrap_or_default();
    match kind {
        ImportKind::Library => {
            let marker = rest
                .iter()
                .position(|c| ALIAS_MARKERS.contains(&c.value.as_str()));
            match marker {
                Some(pos) => {
                    tokens.extend(rest[..pos].iter().map(|c| c.token(TokenKind::Argument)));
                    tokens.push(rest[pos].token(TokenKind::AliasMarker));
                    if let Some(alias) = rest.get(pos + 1) {
                        tokens.push(alias.token(TokenKind::Alias));
                    }
                    if rest.len() > pos + 2 {
                        error = Some(format!(
                            "Library alias '{}' cannot be followed by further values.",
                            rest[pos + 1].value
                        ));
                    }
                }
                None => tokens.extend(rest.iter().map(|c| c.token(TokenKind::Argument))),
            }
        }
        ImportKind::Resource => {
            if !rest.is_empty() {
                error = Some(format!(
                    "Setting 'Resource' accepts only one value, got {}.",
                    rest.len() + 1
                ));
            }
            tokens.extend(rest.iter().map(|c| c.token(TokenKind::Argument)));
        }
        ImportKind::Variables => {
            tokens.extend(rest.iter().map(|c| c.token(TokenKind::Argument)));
        }
    }

    let mut stmt = Statement::new(StatementKind::Import(kind), tokens);
    stmt.error = error;
    stmt
}

fn fixture_statement(kind: FixtureKind, cells: &[Cell]) -> Statement {
    let mut tokens = vec![cells[0].token(TokenKind::SettingName)];
    if let Some(name) = cells.get(1) {
        tokens.push(name.token(TokenKind::Name));
    }
    tokens.extend(
        cells
            .get(2..)
            .unwrap_or_default()
            .iter()
            .map(|c| c.token(TokenKind::Argument)),
    );
    Statement::new(StatementKind::Fixture(kind), tokens)
}

fn variable_statement(cells: &[Cell]) -> Statement {
    let name = &cells[0];
    let mut tokens = vec![name.token(TokenKind::Name)];
    if !assign_pattern().is_match(&name.value) {
        tokens[0] = tokens[0]
            .clone()
            .with_error(format!("Invalid variable name '{}'.", name.value));
    }
    tokens.extend(cells[1..].iter().map(|c| c.token(TokenKind::Argument)));
    Statement::new(StatementKind::Variable, tokens)
}

fn body_statement(cells: &[Cell]) -> Statement {
    let first = &cells[0].value;

    if first.starts_with('[') && first.ends_with(']') {
        let setting = normalize(&first[1..first.len() - 1]);
        let fixture = match setting.as_str() {
            "setup" => Some(FixtureKind::Setup),
            "teardown" => Some(FixtureKind::Teardown),
            _ => None,
        };
        if let Some(kind) = fixture {
            return fixture_statement(kind, cells);
        }

        const KNOWN: &[&str] = &[
            "documentation",
            "tags",
            "timeout",
            "arguments",
            "return",
            "template",
        ];
        let mut tokens = vec![cells[0].token(TokenKind::SettingName)];
        tokens.extend(cells[1..].iter().map(|c| c.token(TokenKind::Argument)));
        if KNOWN.contains(&setting.as_str()) {
            return Statement::new(StatementKind::Setting, tokens);
        }
        tokens[0] = tokens[0]
            .clone()
            .with_error(format!("Non-existing setting '{}'.", first));
        return Statement::new(StatementKind::Error, tokens);
    }

    if CONTROL_MARKERS.contains(&first.as_str()) {
        let mut tokens = vec![cells[0].token(TokenKind::Control)];
        tokens.extend(cells[1..].iter().map(|c| c.token(TokenKind::Argument)));
        return Statement::new(StatementKind::Control, tokens);
    }

    let mut tokens = Vec::with_capacity(cells.len());
    let mut iter = cells.iter().peekable();
    while let Some(cell) = iter.next_if(|c| assign_pattern().is_match(&c.value)) {
        tokens.push(cell.token(TokenKind::Assign));
    }
    if let Some(keyword) = iter.next() {
        tokens.push(keyword.token(TokenKind::Keyword));
    }
    tokens.extend(iter.map(|c| c.token(TokenKind::Argument)));
    Statement::new(StatementKind::KeywordCall, tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = "\
*** Settings ***
Library    Collections
Library    SeleniumLibrary    timeout=5    WITH NAME    Browser
Resource    common.resource
Suite Setup    Open Session    admin

*** Test Cases ***
First Test
    [Setup]    Prepare
    ${value}=    Get Value    key
    Log    ${value}
    FOR    ${i}    IN RANGE    3
        Log    ${i}
    END

*** Keywords ***
Prepare
    No Operation
";

    fn settings(model: &Model) -> &Section {
        model.sections_of(SectionKind::Settings).next().unwrap()
    }

    #[test]
    fn test_parse_sections() {
        let model = parse(SUITE, None);
        let kinds: Vec<_> = model.sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SectionKind::Settings, SectionKind::TestCases, SectionKind::Keywords]
        );
    }

    #[test]
    fn test_parse_library_alias_and_args() {
        let model = parse(SUITE, None);
        let stmt = &settings(&model).statements[1];
        assert_eq!(stmt.kind, StatementKind::Import(ImportKind::Library));
        assert_eq!(stmt.get_value(TokenKind::Name), Some("SeleniumLibrary"));
        assert_eq!(stmt.get_value(TokenKind::Alias), Some("Browser"));
        let args: Vec<_> = stmt.get_tokens(TokenKind::Argument).map(|t| t.value.as_str()).collect();
        assert_eq!(args, vec!["timeout=5"]);
    }

    #[test]
    fn test_name_token_positions() {
        let model = parse(SUITE, None);
        let name = settings(&model).statements[0].get_token(TokenKind::Name).unwrap();
        assert_eq!(name.line_no, 2);
        assert_eq!(name.col_offset, 11);
        assert_eq!(name.end_col_offset, 22);
    }

    #[test]
    fn test_parse_keyword_calls_and_assign() {
        let model = parse(SUITE, None);
        let tests = model.sections_of(SectionKind::TestCases).next().unwrap();
        let block = &tests.blocks[0];
        assert_eq!(block.name(), "First Test");
        assert_eq!(block.body[0].kind, StatementKind::Fixture(FixtureKind::Setup));
        let call = &block.body[1];
        assert_eq!(call.kind, StatementKind::KeywordCall);
        assert_eq!(call.get_value(TokenKind::Assign), Some("${value}="));
        assert_eq!(call.get_value(TokenKind::Keyword), Some("Get Value"));
        assert_eq!(block.body[3].kind, StatementKind::Control);
        assert_eq!(block.body[4].get_value(TokenKind::Keyword), Some("Log"));
        assert!(block.errors.is_empty());
    }

    #[test]
    fn test_continuation_rows_join_statement() {
        let text = "*** Settings ***\nLibrary    Foo\n...    arg1\n...    AS    Bar\n";
        let model = parse(text, None);
        let stmt = &settings(&model).statements[0];
        assert_eq!(stmt.get_value(TokenKind::Alias), Some("Bar"));
        assert_eq!(stmt.span.end_line_no, 4);
    }

    #[test]
    fn test_pipe_separated_rows() {
        let text = "| *** Keywords *** |\n| My Keyword |\n|    | Log | hello |\n";
        let model = parse(text, None);
        let block = &model.sections_of(SectionKind::Keywords).next().unwrap().blocks[0];
        assert_eq!(block.name(), "My Keyword");
        assert_eq!(block.body[0].get_value(TokenKind::Keyword), Some("Log"));
    }

    #[test]
    fn test_unknown_header_and_setting_are_token_errors() {
        let text = "*** Setings ***\nFoo\n*** Settings ***\nLibary    X\n";
        let model = parse(text, None);
        let errors: Vec<_> = tokens(&model).into_iter().filter_map(|t| t.error.clone()).collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Unrecognized section header"));
        assert_eq!(errors[1], "Non-existing setting 'Libary'.");
    }

    #[test]
    fn test_empty_keyword_is_model_error() {
        let text = "*** Keywords ***\nEmpty\n    [Documentation]    nothing\n";
        let model = parse(text, None);
        let block = &model.keyword_blocks().next().unwrap();
        assert_eq!(block.errors, vec!["User keyword cannot be empty.".to_string()]);
    }

    #[test]
    fn test_comments_are_dropped() {
        let text = "*** Test Cases ***\nT\n    # just a comment\n    Log    x    # trailing\n";
        let model = parse(text, None);
        let block = &model.sections_of(SectionKind::TestCases).next().unwrap().blocks[0];
        assert_eq!(block.body.len(), 1);
        assert_eq!(block.body[0].tokens.len(), 2);
    }
}
