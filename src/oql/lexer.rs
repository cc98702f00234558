//! Lexer for the object query language.
//!
//! Converts query text into tokens with span information. String literals
//! are scanned character by character, so commas and keyword-like text
//! inside them never split a token, and a doubled `''` is an escaped quote
//! rather than a terminator.

use chumsky::prelude::*;

use super::error::{SyntaxError, SyntaxErrorKind};
use super::span::Span;

/// A token of the query language.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'src> {
    Keyword(Keyword),
    Ident(&'src str),
    /// Backtick-delimited name, contents only.
    QuotedIdent(&'src str),
    /// Single-quoted literal, raw contents with `''` escapes intact.
    StringLit(&'src str),
    Number(&'src str),
    /// `:name`
    NamedParam(&'src str),
    /// `?1` or a bare `?`
    PositionalParam(Option<&'src str>),

    Comma,
    Dot,
    LParen,
    RParen,
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
}

/// Reserved words, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Select,
    Distinct,
    From,
    Where,
    Group,
    By,
    Having,
    Order,
    Asc,
    Desc,
    Limit,
    Offset,
    As,
    Join,
    Inner,
    Left,
    Outer,
    Fetch,
    On,
    With,
    Update,
    Set,
    Delete,
    And,
    Or,
    Not,
    Is,
    Null,
    Like,
    In,
    Between,
    True,
    False,
}

impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Keyword(k) => write!(f, "{}", format!("{k:?}").to_uppercase()),
            Token::Ident(s) => write!(f, "{s}"),
            Token::QuotedIdent(s) => write!(f, "`{s}`"),
            Token::StringLit(s) => write!(f, "'{s}'"),
            Token::Number(s) => write!(f, "{s}"),
            Token::NamedParam(s) => write!(f, ":{s}"),
            Token::PositionalParam(Some(n)) => write!(f, "?{n}"),
            Token::PositionalParam(None) => write!(f, "?"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Star => write!(f, "*"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Concat => write!(f, "||"),
            Token::Eq => write!(f, "="),
            Token::Ne => write!(f, "<>"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Lte => write!(f, "<="),
            Token::Gte => write!(f, ">="),
        }
    }
}

fn keyword_or_ident(s: &str) -> Token<'_> {
    let keyword = match s.to_ascii_lowercase().as_str() {
        "select" => Keyword::Select,
        "distinct" => Keyword::Distinct,
        "from" => Keyword::From,
        "where" => Keyword::Where,
        "group" => Keyword::Group,
        "by" => Keyword::By,
        "having" => Keyword::Having,
        "order" => Keyword::Order,
        "asc" => Keyword::Asc,
        "desc" => Keyword::Desc,
        "limit" => Keyword::Limit,
        "offset" => Keyword::Offset,
        "as" => Keyword::As,
        "join" => Keyword::Join,
        "inner" => Keyword::Inner,
        "left" => Keyword::Left,
        "outer" => Keyword::Outer,
        "fetch" => Keyword::Fetch,
        "on" => Keyword::On,
        "with" => Keyword::With,
        "update" => Keyword::Update,
        "set" => Keyword::Set,
        "delete" => Keyword::Delete,
        "and" => Keyword::And,
        "or" => Keyword::Or,
        "not" => Keyword::Not,
        "is" => Keyword::Is,
        "null" => Keyword::Null,
        "like" => Keyword::Like,
        "in" => Keyword::In,
        "between" => Keyword::Between,
        "true" => Keyword::True,
        "false" => Keyword::False,
        _ => return Token::Ident(s),
    };
    Token::Keyword(keyword)
}

/// Create the chumsky lexer.
pub fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<(Token<'src>, SimpleSpan)>, extra::Err<Rich<'src, char>>> {
    let ident = text::ident().map(keyword_or_ident);

    let quoted_ident = just('`')
        .ignore_then(none_of('`').repeated().to_slice())
        .then_ignore(just('`'))
        .map(Token::QuotedIdent);

    // '' must be tried before the closing quote
    let string_lit = just('\'')
        .ignore_then(
            just("''")
                .ignored()
                .or(none_of('\'').ignored())
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('\''))
        .map(Token::StringLit);

    let number = text::digits(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .map(Token::Number);

    let named_param = just(':').ignore_then(text::ident()).map(Token::NamedParam);

    let positional_param = just('?')
        .ignore_then(text::digits(10).to_slice().or_not())
        .map(Token::PositionalParam);

    let operator = choice((
        just("<>").to(Token::Ne),
        just("!=").to(Token::Ne),
        just("<=").to(Token::Lte),
        just(">=").to(Token::Gte),
        just("||").to(Token::Concat),
        just('=').to(Token::Eq),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
    ));

    let punctuation = choice((
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('*').to(Token::Star),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
    ));

    let token = choice((
        ident,
        quoted_ident,
        string_lit,
        number,
        named_param,
        positional_param,
        operator,
        punctuation,
    ))
    .map_with(|tok, e| (tok, e.span()));

    token.padded().repeated().collect().padded().then_ignore(end())
}

/// Report an unterminated string literal or quoted identifier at its
/// opening quote. Runs ahead of the chumsky lexer so these errors carry
/// a precise kind instead of a generic "unexpected end of input".
fn scan_quotes(source: &str) -> Result<(), SyntaxError> {
    let mut chars = source.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let (close, kind) = match c {
            '\'' => ('\'', SyntaxErrorKind::UnterminatedString),
            '`' => ('`', SyntaxErrorKind::UnterminatedIdentifier),
            _ => continue,
        };
        let mut terminated = false;
        while let Some((_, ch)) = chars.next() {
            if ch != close {
                continue;
            }
            if close == '\'' && chars.peek().map(|&(_, next)| next) == Some('\'') {
                chars.next();
                continue;
            }
            terminated = true;
            break;
        }
        if !terminated {
            let message = match kind {
                SyntaxErrorKind::UnterminatedString => "unterminated string literal",
                _ => "unterminated quoted identifier",
            };
            return Err(SyntaxError::new(kind, message, start..start + 1));
        }
    }
    Ok(())
}

/// Lex query text into tokens with byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token<'_>, Span)>, SyntaxError> {
    use chumsky::span::Span as _;

    scan_quotes(source)?;

    let (tokens, errs) = lexer().parse(source).into_output_errors();
    if let Some(e) = errs.into_iter().next() {
        let span = e.span();
        let found = source
            .get(span.start()..)
            .and_then(|rest| rest.chars().next())
            .map(|c| format!("unexpected character '{c}'"))
            .unwrap_or_else(|| e.to_string());
        return Err(SyntaxError::new(
            SyntaxErrorKind::UnexpectedCharacter,
            found,
            span.start()..span.end(),
        ));
    }

    Ok(tokens
        .unwrap_or_default()
        .into_iter()
        .map(|(tok, span)| (tok, span.start()..span.end()))
        .collect())
}
