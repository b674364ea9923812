//! Lexer (tokenizer) for snippet source
//!
//! Converts raw source text into a flat [`Token`] stream consumed by the parser.
//! Every token remembers whether a line break preceded it so the parser can
//! apply the usual "semicolons are optional at line ends" rule.

use std::fmt;

use super::ast::SourceLocation;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    /// Template literal: alternating raw text chunks and `${...}` sources.
    Template(Vec<TemplateChunk>),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateChunk {
    Text(String),
    /// Source of an interpolated expression and where it starts.
    Expr(String, SourceLocation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    Void,
    True,
    False,
    Null,
    In,
    Instanceof,
}

/// Reserved words plus the contextual ones the lexer treats as identifiers.
pub const KEYWORDS: &[&str] = &[
    "let", "const", "var", "function", "return", "if", "else", "while", "do", "for", "break",
    "continue", "throw", "try", "catch", "finally", "new", "typeof", "void", "true", "false",
    "null", "in", "instanceof", "async", "await", "of", "undefined", "this",
];

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "let" => Self::Let,
            "const" => Self::Const,
            "var" => Self::Var,
            "function" => Self::Function,
            "return" => Self::Return,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "do" => Self::Do,
            "for" => Self::For,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "throw" => Self::Throw,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            "new" => Self::New,
            "typeof" => Self::Typeof,
            "void" => Self::Void,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "in" => Self::In,
            "instanceof" => Self::Instanceof,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Let => "let",
            Self::Const => "const",
            Self::Var => "var",
            Self::Function => "function",
            Self::Return => "return",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::Do => "do",
            Self::For => "for",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Throw => "throw",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::New => "new",
            Self::Typeof => "typeof",
            Self::Void => "void",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::In => "in",
            Self::Instanceof => "instanceof",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    QuestionDot,
    Question,
    QuestionQuestion,
    QuestionQuestionEq,
    Colon,
    Arrow,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    StarStarEq,
    AndAndEq,
    OrOrEq,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

impl Punct {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::QuestionDot => "?.",
            Self::Question => "?",
            Self::QuestionQuestion => "??",
            Self::QuestionQuestionEq => "??=",
            Self::Colon => ":",
            Self::Arrow => "=>",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::StarStar => "**",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::Eq => "=",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::PercentEq => "%=",
            Self::StarStarEq => "**=",
            Self::AndAndEq => "&&=",
            Self::OrOrEq => "||=",
            Self::EqEq => "==",
            Self::EqEqEq => "===",
            Self::NotEq => "!=",
            Self::NotEqEq => "!==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
        }
    }
}

/// Punctuators ordered longest-first so greedy matching picks `===` over `==`.
const PUNCTUATORS: &[(&str, Punct)] = &[
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("**=", Punct::StarStarEq),
    ("&&=", Punct::AndAndEq),
    ("||=", Punct::OrOrEq),
    ("??=", Punct::QuestionQuestionEq),
    ("=>", Punct::Arrow),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::Le),
    (">=", Punct::Ge),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::QuestionQuestion),
    ("?.", Punct::QuestionDot),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusEq),
    ("-=", Punct::MinusEq),
    ("*=", Punct::StarEq),
    ("/=", Punct::SlashEq),
    ("%=", Punct::PercentEq),
    ("**", Punct::StarStar),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (";", Punct::Semicolon),
    (",", Punct::Comma),
    (".", Punct::Dot),
    ("?", Punct::Question),
    (":", Punct::Colon),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("=", Punct::Eq),
    ("<", Punct::Lt),
    (">", Punct::Gt),
    ("!", Punct::Bang),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", super::value::format_number(*n)),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Template(_) => write!(f, "template literal"),
            Self::Ident(name) => write!(f, "{name}"),
            Self::Keyword(kw) => write!(f, "{}", kw.as_str()),
            Self::Punct(p) => write!(f, "{}", p.as_str()),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexical error with position information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub location: SourceLocation,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    /// Byte offset of `pos` in `source`.
    byte_pos: usize,
    line: usize,
    column: usize,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_origin(source, SourceLocation::new(1, 1))
    }

    /// Lex a fragment that starts at `origin` in the enclosing source
    /// (used for template interpolations).
    pub fn with_origin(source: &'a str, origin: SourceLocation) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            byte_pos: 0,
            line: origin.line,
            column: origin.column,
            source,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let location = self.location();
            let Some(ch) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    location,
                    newline_before,
                });
                return Ok(tokens);
            };

            let kind = if ch.is_ascii_digit()
                || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
            {
                self.lex_number()?
            } else if ch == '"' || ch == '\'' {
                self.lex_string(ch)?
            } else if ch == '`' {
                self.lex_template()?
            } else if is_ident_start(ch) {
                let ident = self.lex_ident();
                Keyword::from_ident(&ident).map_or(TokenKind::Ident(ident), TokenKind::Keyword)
            } else {
                self.lex_punct()?
            };

            tokens.push(Token {
                kind,
                location,
                newline_before,
            });
        }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        self.byte_pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            location: self.location(),
        }
    }

    /// Skip whitespace and comments; returns whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, LexError> {
        let mut newline = false;
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                newline = true;
                self.bump();
            } else if ch.is_whitespace() {
                self.bump();
            } else if ch == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else if ch == '/' && self.peek_at(1) == Some('*') {
                let start = self.location();
                self.bump();
                self.bump();
                loop {
                    match self.bump() {
                        Some('*') if self.peek() == Some('/') => {
                            self.bump();
                            break;
                        }
                        Some('\n') => newline = true,
                        Some(_) => {}
                        None => {
                            return Err(LexError {
                                message: "Unterminated comment".to_string(),
                                location: start,
                            });
                        }
                    }
                }
            } else {
                break;
            }
        }
        Ok(newline)
    }

    fn lex_number(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.bump();
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            return u64::from_str_radix(&digits, 16)
                .map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let n = v as f64;
                    TokenKind::Number(n)
                })
                .map_err(|_| self.error("Invalid hexadecimal number"));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let next = self.peek_at(1);
            let signed = matches!(next, Some('+' | '-'));
            let digit_after = if signed { self.peek_at(2) } else { next };
            if digit_after.is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                if signed {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error("Invalid or unexpected token"));
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("Invalid number '{text}'")))
    }

    fn lex_escape(&mut self) -> Result<char, LexError> {
        let Some(esc) = self.bump() else {
            return Err(self.error("Invalid or unexpected token"));
        };
        Ok(match esc {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            'x' => self.lex_hex_escape(2)?,
            'u' => {
                if self.peek() == Some('{') {
                    self.bump();
                    let mut digits = String::new();
                    while let Some(c) = self.peek() {
                        if c == '}' {
                            break;
                        }
                        digits.push(c);
                        self.bump();
                    }
                    self.bump();
                    u32::from_str_radix(&digits, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| self.error("Invalid Unicode escape sequence"))?
                } else {
                    self.lex_hex_escape(4)?
                }
            }
            other => other,
        })
    }

    fn lex_hex_escape(&mut self, len: usize) -> Result<char, LexError> {
        let mut digits = String::with_capacity(len);
        for _ in 0..len {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                _ => return Err(self.error("Invalid hexadecimal escape sequence")),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("Invalid hexadecimal escape sequence"))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, LexError> {
        let start = self.location();
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(TokenKind::Str(value)),
                Some('\\') => {
                    // Line continuation
                    if self.peek() == Some('\n') {
                        self.bump();
                        continue;
                    }
                    value.push(self.lex_escape()?);
                }
                Some('\n') | None => {
                    return Err(LexError {
                        message: "Invalid or unexpected token".to_string(),
                        location: start,
                    });
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn lex_template(&mut self) -> Result<TokenKind, LexError> {
        let start = self.location();
        self.bump();
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError {
                        message: "Unterminated template literal".to_string(),
                        location: start,
                    });
                }
                Some('`') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    text.push(self.lex_escape()?);
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    let expr_start = self.location();
                    let expr_source = self.lex_interpolation(start)?;
                    chunks.push(TemplateChunk::Expr(expr_source, expr_start));
                }
                Some(_) => {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
            }
        }
        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(TokenKind::Template(chunks))
    }

    /// Collect the raw source of a `${...}` interpolation up to its closing brace.
    fn lex_interpolation(&mut self, template_start: SourceLocation) -> Result<String, LexError> {
        let mut depth = 0usize;
        let mut source = String::new();
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = self.bump() else {
                return Err(LexError {
                    message: "Unterminated template literal".to_string(),
                    location: template_start,
                });
            };
            if let Some(q) = quote {
                source.push(c);
                if c == '\\' {
                    if let Some(next) = self.bump() {
                        source.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => {
                    quote = Some(c);
                    source.push(c);
                }
                '{' => {
                    depth += 1;
                    source.push(c);
                }
                '}' if depth == 0 => return Ok(source),
                '}' => {
                    depth -= 1;
                    source.push(c);
                }
                _ => source.push(c),
            }
        }
    }

    fn lex_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn lex_punct(&mut self) -> Result<TokenKind, LexError> {
        let rest = self.remaining();
        for (text, punct) in PUNCTUATORS {
            if rest.starts_with(text) {
                for _ in 0..text.chars().count() {
                    self.bump();
                }
                return Ok(TokenKind::Punct(*punct));
            }
        }
        let ch = self.peek().unwrap_or('?');
        Err(self.error(format!("Invalid or unexpected token '{ch}'")))
    }

    fn remaining(&self) -> &'a str {
        &self.source[self.byte_pos..]
    }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_console_call_tokens() {
        let toks = kinds("console.log(\"hi\");");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("console".to_string()),
                TokenKind::Punct(Punct::Dot),
                TokenKind::Ident("log".to_string()),
                TokenKind::Punct(Punct::LParen),
                TokenKind::Str("hi".to_string()),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Punct(Punct::Semicolon),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_greedy_punctuators() {
        let toks = kinds("a === b !== c ?? d ?. e => f **= 2");
        assert!(toks.contains(&TokenKind::Punct(Punct::EqEqEq)));
        assert!(toks.contains(&TokenKind::Punct(Punct::NotEqEq)));
        assert!(toks.contains(&TokenKind::Punct(Punct::QuestionQuestion)));
        assert!(toks.contains(&TokenKind::Punct(Punct::QuestionDot)));
        assert!(toks.contains(&TokenKind::Punct(Punct::Arrow)));
        assert!(toks.contains(&TokenKind::Punct(Punct::StarStarEq)));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42")[0], TokenKind::Number(42.0));
        assert_eq!(kinds("3.5")[0], TokenKind::Number(3.5));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds("0xff")[0], TokenKind::Number(255.0));
        assert_eq!(kinds("1_000")[0], TokenKind::Number(1000.0));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'a\n\t\'b' "A\x42""#)[..2],
            [
                TokenKind::Str("a\n\t'b".to_string()),
                TokenKind::Str("AB".to_string())
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert_eq!(err.location, SourceLocation::new(1, 1));
    }

    #[test]
    fn test_comments_are_skipped_and_newlines_tracked() {
        let tokens = Lexer::new("a // trailing\n/* block\n */ b").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("a".to_string()));
        assert!(!tokens[0].newline_before);
        assert_eq!(tokens[1].kind, TokenKind::Ident("b".to_string()));
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].location.line, 3);
    }

    #[test]
    fn test_template_chunks() {
        let toks = kinds("`a ${x + 1} b ${ {y:1}.y }`");
        let TokenKind::Template(chunks) = &toks[0] else {
            panic!("expected template");
        };
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], TemplateChunk::Text("a ".to_string()));
        assert!(matches!(&chunks[1], TemplateChunk::Expr(src, _) if src == "x + 1"));
        assert_eq!(chunks[2], TemplateChunk::Text(" b ".to_string()));
        assert!(matches!(&chunks[3], TemplateChunk::Expr(src, _) if src == " {y:1}.y "));
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let toks = kinds("let x = typeof y");
        assert_eq!(toks[0], TokenKind::Keyword(Keyword::Let));
        assert_eq!(toks[1], TokenKind::Ident("x".to_string()));
        assert_eq!(toks[3], TokenKind::Keyword(Keyword::Typeof));
    }

    #[test]
    fn test_punctuators_after_multibyte_text() {
        let toks = kinds("const ñ = 'é' + `ü`; ñ >= 2");
        assert_eq!(toks[1], TokenKind::Ident("ñ".to_string()));
        assert_eq!(toks[2], TokenKind::Punct(Punct::Eq));
        assert_eq!(toks[4], TokenKind::Punct(Punct::Plus));
        assert_eq!(toks[6], TokenKind::Punct(Punct::Semicolon));
        assert_eq!(toks[8], TokenKind::Punct(Punct::Ge));
    }

    #[test]
    fn test_invalid_character_reports_location() {
        let err = Lexer::new("a\n  #").tokenize().unwrap_err();
        assert_eq!(err.location, SourceLocation::new(2, 3));
    }
}
