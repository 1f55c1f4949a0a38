#![allow(clippy::module_name_repetitions)]

//! Operator console grammar.
//!
//! A console line such as `config 0x0040 id=1 role=reflector` is lexed by
//! `regal` into at most [`MAX_TOKENS`] tokens. `winnow` parsers over that
//! token slice then turn it into a [`Command`] naming a connection handle and,
//! where the command takes them, a configuration id or a CS role.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::combinator::{alt, cut_err, opt, preceded};
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;

use super::catalog::{self, CommandTag};
use crate::config::{CONFIGS_PER_CONNECTION, ConfigId};
use crate::procedure::{ConnHandle, CsRole};

/// Token cap per console line; the longest command (`config` with both
/// options) needs nine including the line terminator.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Token kinds of the ranging console.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Hexadecimal literal such as a connection handle `0x0040`.
    #[regex(r"0[xX][0-9A-Fa-f]+", priority = 2)]
    Hex,
    /// Decimal handle or configuration id.
    #[regex(r"[0-9]+")]
    Integer,
    /// Command word (`start`, `config`, ...), option key (`id`, `role`) or
    /// role name. Compared case-insensitively.
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    /// Separates `id`/`role` from the value.
    #[token("=")]
    Equals,
    /// Spaces and tabs between tokens.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// Line terminator.
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Rejected before parsing as an invalid character.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Console token; `span` indexes the line for error reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Tokens of one console line.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// The line holds more tokens than [`MAX_TOKENS`].
    TooManyTokens { processed: usize },
    /// The regal engine failed on the line.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line has too many tokens ({processed} lexed)")
            }
            LexError::Engine => write!(f, "console lexer failed"),
        }
    }
}

/// Why a well-lexed line is not a valid command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidHandle {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "number out of range at {span:?}")
            }
            GrammarErrorKind::InvalidHandle { span } => {
                write!(f, "connection handle must be 0..=0x0EFF at {span:?}")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unexpected character `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Grammar failure for one console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidNumber {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_handle(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidHandle {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

/// Anything that stops a line from becoming a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// One operator command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Start(ConnHandle),
    Config(ConfigCommand),
    Params(ConnHandle),
    Enable(ConnHandle),
    Disable(ConnHandle),
    Remove(RemoveCommand),
    Status(Option<ConnHandle>),
    Help(HelpCommand<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigCommand {
    pub conn: ConnHandle,
    pub id: Option<ConfigId>,
    pub role: Option<CsRole>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoveCommand {
    pub conn: ConnHandle,
    pub id: ConfigId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

type Input<'src, 'slice> = &'slice [Token<'src>];

/// Lexes one console line. An unterminated trailing fragment becomes a
/// [`TokenKind::Error`] token so `parse` can point at it.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = line.get(span.clone()).ok_or(LexError::Engine)?;
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let span = start..start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: MAX_TOKENS + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

type GrammarResult<'src, O> = Result<O, ErrMode<GrammarError<'src>>>;

impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    type Inner = Self;

    fn from_input(input: &Input<'src, 'slice>) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn into_inner(self) -> Result<Self::Inner, Self> {
        Ok(self)
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let (command, rest) = parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    if let Some(token) = rest.iter().find(|token| token.kind != TokenKind::Eol) {
        return Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        )));
    }

    Ok(command)
}

/// Parses one command off the front of `tokens`, returning what is left.
fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

fn command<'src, 'slice>()
-> impl Parser<Input<'src, 'slice>, Command<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;
        let Some(spec) = catalog::find(keyword.lexeme) else {
            return Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&keyword),
            )));
        };

        match spec.tag {
            CommandTag::Start => cut_err(connection).map(Command::Start).parse_next(input),
            CommandTag::Params => cut_err(connection).map(Command::Params).parse_next(input),
            CommandTag::Enable => cut_err(connection).map(Command::Enable).parse_next(input),
            CommandTag::Disable => cut_err(connection).map(Command::Disable).parse_next(input),
            CommandTag::Config => config_command.map(Command::Config).parse_next(input),
            CommandTag::Remove => (
                cut_err(connection),
                cut_err(preceded(keyword_assign("id"), config_id)),
            )
                .map(|(conn, id)| Command::Remove(RemoveCommand { conn, id }))
                .parse_next(input),
            CommandTag::Status => opt(connection).map(Command::Status).parse_next(input),
            CommandTag::Help => opt(expect_kind(TokenKind::Ident, "command name"))
                .map(|topic| {
                    Command::Help(HelpCommand {
                        topic: topic.map(|token| token.lexeme),
                    })
                })
                .parse_next(input),
        }
    }
}

#[derive(Clone, Copy)]
enum ConfigOption {
    Id(ConfigId),
    Role(CsRole),
}

fn config_command<'src>(input: &mut Input<'src, '_>) -> GrammarResult<'src, ConfigCommand> {
    let conn = cut_err(connection).parse_next(input)?;
    let mut config = ConfigCommand {
        conn,
        id: None,
        role: None,
    };
    while let Some(option) = opt(config_option).parse_next(input)? {
        match option {
            ConfigOption::Id(id) => config.id = Some(id),
            ConfigOption::Role(role) => config.role = Some(role),
        }
    }
    Ok(config)
}

/// `id=<n>` or `role=<name>`; a key commits the parser to its value.
fn config_option<'src>(input: &mut Input<'src, '_>) -> GrammarResult<'src, ConfigOption> {
    let key = expect_kind(TokenKind::Ident, "id or role").parse_next(input)?;
    cut_err(expect_kind(TokenKind::Equals, "=")).parse_next(input)?;
    if key.lexeme.eq_ignore_ascii_case("id") {
        cut_err(config_id).map(ConfigOption::Id).parse_next(input)
    } else if key.lexeme.eq_ignore_ascii_case("role") {
        cut_err(role).map(ConfigOption::Role).parse_next(input)
    } else {
        Err(ErrMode::Cut(GrammarError::unexpected(
            "id or role",
            Some(&key),
        )))
    }
}

/// Matches `<name> =` with a case-insensitive key.
fn keyword_assign<'src, 'slice>(
    name: &'static str,
) -> impl Parser<Input<'src, 'slice>, (), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let key = expect_kind(TokenKind::Ident, name).parse_next(input)?;
        if !key.lexeme.eq_ignore_ascii_case(name) {
            return Err(ErrMode::Backtrack(GrammarError::unexpected(name, Some(&key))));
        }
        expect_kind(TokenKind::Equals, "=").void().parse_next(input)
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

/// Decimal or `0x` literal, keeping the token for error spans.
fn number<'src, 'slice>(
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, (u32, Token<'src>), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = alt((
            expect_kind(TokenKind::Hex, label),
            expect_kind(TokenKind::Integer, label),
        ))
        .parse_next(input)?;
        let parsed = match token.lexeme.get(2..) {
            Some(digits) if token.kind == TokenKind::Hex => u32::from_str_radix(digits, 16),
            _ => token.lexeme.parse::<u32>(),
        };
        match parsed {
            Ok(value) => Ok((value, token)),
            Err(_) => Err(ErrMode::Cut(GrammarError::invalid_number(&token))),
        }
    }
}

fn connection<'src>(input: &mut Input<'src, '_>) -> GrammarResult<'src, ConnHandle> {
    let (value, token) = number("connection handle").parse_next(input)?;
    u16::try_from(value)
        .ok()
        .and_then(ConnHandle::new)
        .ok_or_else(|| ErrMode::Cut(GrammarError::invalid_handle(&token)))
}

fn config_id<'src>(input: &mut Input<'src, '_>) -> GrammarResult<'src, ConfigId> {
    let (value, token) = number("configuration id").parse_next(input)?;
    match ConfigId::try_from(value) {
        Ok(id) if usize::from(id) < CONFIGS_PER_CONNECTION => Ok(id),
        _ => Err(ErrMode::Cut(GrammarError::invalid_number(&token))),
    }
}

fn role<'src>(input: &mut Input<'src, '_>) -> GrammarResult<'src, CsRole> {
    let token = expect_kind(TokenKind::Ident, "initiator or reflector").parse_next(input)?;
    if token.lexeme.eq_ignore_ascii_case("initiator") {
        Ok(CsRole::Initiator)
    } else if token.lexeme.eq_ignore_ascii_case("reflector") {
        Ok(CsRole::Reflector)
    } else {
        Err(ErrMode::Backtrack(GrammarError::unexpected(
            "initiator or reflector",
            Some(&token),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    fn conn(raw: u16) -> ConnHandle {
        ConnHandle::new(raw).expect("valid handle")
    }

    #[test]
    fn parses_connection_commands() {
        assert_eq!(parse_ok("start 7"), Command::Start(conn(7)));
        assert_eq!(parse_ok("params 0x0040\n"), Command::Params(conn(0x40)));
        assert_eq!(parse_ok("enable 9"), Command::Enable(conn(9)));
        assert_eq!(parse_ok("disable 0"), Command::Disable(conn(0)));
    }

    #[test]
    fn parses_config_options_in_any_order() {
        assert_eq!(
            parse_ok("config 7 role=reflector id=2"),
            Command::Config(ConfigCommand {
                conn: conn(7),
                id: Some(2),
                role: Some(CsRole::Reflector),
            })
        );
        assert_eq!(
            parse_ok("config 7"),
            Command::Config(ConfigCommand {
                conn: conn(7),
                id: None,
                role: None,
            })
        );
    }

    #[test]
    fn remove_requires_id() {
        assert_eq!(
            parse_ok("remove 3 id=1"),
            Command::Remove(RemoveCommand { conn: conn(3), id: 1 })
        );
        assert!(matches!(
            parse("remove 3"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedEnd { .. }
            }))
        ));
    }

    #[test]
    fn parses_status_and_help() {
        assert_eq!(parse_ok("status"), Command::Status(None));
        assert_eq!(parse_ok("STATUS 4"), Command::Status(Some(conn(4))));
        assert_eq!(
            parse_ok("help config"),
            Command::Help(HelpCommand {
                topic: Some("config"),
            })
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            parse("start 0x0F00"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::InvalidHandle { .. }
            }))
        ));
        assert!(matches!(
            parse("config 1 id=4"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::InvalidNumber { .. }
            }))
        ));
    }

    #[test]
    fn rejects_unknown_command_and_trailing_tokens() {
        assert!(parse("reboot now").is_err());
        assert!(matches!(
            parse("start 1 2"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken {
                    expected: "end of command",
                    ..
                }
            }))
        ));
    }

    #[test]
    fn config_key_commits_to_its_value() {
        assert!(matches!(
            parse("config 7 id="),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedEnd {
                    expected: "configuration id"
                }
            }))
        ));
        assert!(matches!(
            parse("config 7 colour=red"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken {
                    expected: "id or role",
                    ..
                }
            }))
        ));
        assert!(matches!(
            parse("config 7 role=observer"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken {
                    expected: "initiator or reflector",
                    ..
                }
            }))
        ));
    }

    #[test]
    fn command_keyword_must_lead() {
        assert!(matches!(
            parse("7 start"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken {
                    expected: "command keyword",
                    found: Some(TokenKind::Integer),
                    ..
                }
            }))
        ));
        assert!(matches!(
            parse("start"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedEnd {
                    expected: "connection handle"
                }
            }))
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        match parse("start 7$") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidToken { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn lexer_emits_error_token_for_unknown_symbol() {
        let tokens = lex("status$").expect("lexing should succeed");
        let last = tokens.last().expect("expected at least one token");
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.lexeme, "$");
    }
}
