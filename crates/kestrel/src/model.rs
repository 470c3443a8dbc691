//
// model.rs
//
// Syntax model for plain-text suite and resource files
//
// Lines are 1-based and columns are 0-based UTF-16 code units, so converting a
// node to an LSP range only shifts the line.
//

use std::path::PathBuf;

use tower_lsp::lsp_types::{Position, Range};

/// Kinds of tokens produced by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    SectionHeader,
    SettingName,
    /// Import target, fixture keyword, test/keyword name or variable name
    Name,
    Argument,
    /// `WITH NAME` / `AS` marker of a library import
    AliasMarker,
    Alias,
    Assign,
    Keyword,
    Control,
    Comment,
    Error,
}

/// A single cell of the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line_no: u32,
    pub col_offset: u32,
    pub end_col_offset: u32,
    /// Lexical error attached to the token, if any
    pub error: Option<String>,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, line_no: u32, col_offset: u32, end_col_offset: u32) -> Self {
        Self {
            kind,
            value: value.into(),
            line_no,
            col_offset,
            end_col_offset,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.kind = TokenKind::Error;
        self.error = Some(error.into());
        self
    }

    pub fn range(&self) -> Range {
        let line = self.line_no.saturating_sub(1);
        Range {
            start: Position::new(line, self.col_offset),
            end: Position::new(line, self.end_col_offset),
        }
    }
}

/// Source extent of a statement or block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line_no: u32,
    pub col_offset: u32,
    pub end_line_no: u32,
    pub end_col_offset: u32,
}

impl Span {
    pub fn range(&self) -> Range {
        Range {
            start: Position::new(self.line_no.saturating_sub(1), self.col_offset),
            end: Position::new(self.end_line_no.saturating_sub(1), self.end_col_offset),
        }
    }

    /// Span covering every token, in document order.
    pub fn covering(tokens: &[Token]) -> Self {
        match (tokens.first(), tokens.last()) {
            (Some(first), Some(last)) => Self {
                line_no: first.line_no,
                col_offset: first.col_offset,
                end_line_no: last.line_no,
                end_col_offset: last.end_col_offset,
            },
            _ => Self::default(),
        }
    }

    /// Extend this span to also cover `other`.
    pub fn join(self, other: Span) -> Self {
        let (line_no, col_offset) =
            (self.line_no, self.col_offset).min((other.line_no, other.col_offset));
        let (end_line_no, end_col_offset) =
            (self.end_line_no, self.end_col_offset).max((other.end_line_no, other.end_col_offset));
        Self {
            line_no,
            col_offset,
            end_line_no,
            end_col_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    Library,
    Resource,
    Variables,
}

impl ImportKind {
    pub fn setting_name(&self) -> &'static str {
        match self {
            ImportKind::Library => "Library",
            ImportKind::Resource => "Resource",
            ImportKind::Variables => "Variables",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixtureKind {
    SuiteSetup,
    SuiteTeardown,
    TestSetup,
    TestTeardown,
    /// `[Setup]` inside a test case or task
    Setup,
    /// `[Teardown]` inside a test case, task or keyword
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    SectionHeader,
    Import(ImportKind),
    Fixture(FixtureKind),
    /// Any other recognized setting (`Documentation`, `[Arguments]`, ...)
    Setting,
    Variable,
    KeywordCall,
    /// Control structure markers (`FOR`, `IF`, `END`, ...)
    Control,
    Comment,
    Error,
}

/// One logical row, including `...` continuation rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub tokens: Vec<Token>,
    pub span: Span,
    /// Structural error reported by the parser
    pub error: Option<String>,
}

impl Statement {
    pub fn new(kind: StatementKind, tokens: Vec<Token>) -> Self {
        let span = Span::covering(&tokens);
        Self {
            kind,
            tokens,
            span,
            error: None,
        }
    }

    pub fn get_token(&self, kind: TokenKind) -> Option<&Token> {
        self.tokens.iter().find(|t| t.kind == kind)
    }

    pub fn get_tokens(&self, kind: TokenKind) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(move |t| t.kind == kind)
    }

    pub fn get_value(&self, kind: TokenKind) -> Option<&str> {
        self.get_token(kind).map(|t| t.value.as_str())
    }

    /// Called keyword of a keyword call, or the fixture keyword of a fixture
    pub fn keyword_token(&self) -> Option<&Token> {
        match self.kind {
            StatementKind::KeywordCall => self.get_token(TokenKind::Keyword),
            StatementKind::Fixture(_) => self.get_token(TokenKind::Name),
            _ => None,
        }
    }
}

/// A test case, task or user keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: Token,
    pub body: Vec<Statement>,
    pub span: Span,
    pub errors: Vec<String>,
}

impl Block {
    pub fn name(&self) -> &str {
        &self.name.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Content before the first section header
    Implicit,
    Settings,
    Variables,
    TestCases,
    Tasks,
    Keywords,
    Comments,
    /// Unrecognized header; its content is ignored
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub header: Option<Statement>,
    /// Setting and variable rows (settings/variables sections)
    pub statements: Vec<Statement>,
    /// Test cases, tasks or keywords
    pub blocks: Vec<Block>,
}

impl Section {
    pub fn new(kind: SectionKind, header: Option<Statement>) -> Self {
        Self {
            kind,
            header,
            statements: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Whether blocks in this section are executable bodies
    pub fn has_bodies(&self) -> bool {
        matches!(
            self.kind,
            SectionKind::TestCases | SectionKind::Tasks | SectionKind::Keywords
        )
    }
}

/// A parsed suite or resource file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Model {
    pub source: Option<PathBuf>,
    pub sections: Vec<Section>,
}

impl Model {
    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    /// User keywords declared in `*** Keywords ***` sections
    pub fn keyword_blocks(&self) -> impl Iterator<Item = &Block> {
        self.sections_of(SectionKind::Keywords)
            .flat_map(|s| s.blocks.iter())
    }

    /// Whether the file has a test case or task section (suite files cannot be resources)
    pub fn has_tests(&self) -> bool {
        self.sections
            .iter()
            .any(|s| matches!(s.kind, SectionKind::TestCases | SectionKind::Tasks))
    }

    /// Every statement in document order, including block bodies
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.sections.iter().flat_map(|section| {
            section
                .header
                .iter()
                .chain(section.statements.iter())
                .chain(section.blocks.iter().flat_map(|b| b.body.iter()))
        })
    }
}
