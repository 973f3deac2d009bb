//! tinyc-lex - Lexical analysis for Tiny source code.
//!
//! The lexer turns source text into a stream of [`TokenKind`]s with one byte
//! of lookahead. It is pull-based: the parser asks for one token at a time
//! and reads the lexeme and literal values off the lexer before advancing.
//!
//! Recognized input, in match order:
//!
//! - whitespace (line tracking) and `//` line comments, both skipped;
//! - two-character punctuation (`&&`, `||`, `:=`, `::`, compound assignment,
//!   `==`, `!=`, `<=`, `>=`);
//! - single-character punctuation;
//! - identifiers `[A-Za-z_][A-Za-z0-9_]*`, with keyword lookup;
//! - decimal integer literals, switching to float mode at the first `.`
//!   (further dots end the number);
//! - single-quoted character literals and double-quoted string literals,
//!   both with `\n \t \r \b \" \'` escapes;
//! - anything else is a lexical error.
//!
//! Errors are returned as `Err(LexError)`; the caller must stop requesting
//! tokens after an error.

mod token;

pub use token::TokenKind;

use thiserror::Error;
use tinyc_util::Pos;

/// Errors produced during lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// A byte that cannot begin any token.
    #[error("{pos}: unexpected character '{ch}'")]
    UnexpectedChar { ch: char, pos: Pos },

    /// A character literal missing its closing quote.
    #[error("{pos}: expected ' to close character literal")]
    UnterminatedChar { pos: Pos },

    /// A string literal missing its closing quote.
    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Pos },

    /// An integer literal outside the 32-bit signed range.
    #[error("{pos}: integer literal is out of range")]
    IntOutOfRange { pos: Pos },
}

impl LexError {
    /// Position the error was reported at.
    pub fn pos(&self) -> Pos {
        match self {
            LexError::UnexpectedChar { pos, .. }
            | LexError::UnterminatedChar { pos }
            | LexError::UnterminatedString { pos }
            | LexError::IntOutOfRange { pos } => *pos,
        }
    }
}

/// The lexer state machine.
///
/// # Example
///
/// ```
/// use tinyc_lex::{Lexer, TokenKind};
///
/// let mut lexer = Lexer::new("x := 42");
/// assert_eq!(lexer.next_token().unwrap(), TokenKind::Ident);
/// assert_eq!(lexer.lexeme(), "x");
/// assert_eq!(lexer.next_token().unwrap(), TokenKind::Declare);
/// assert_eq!(lexer.next_token().unwrap(), TokenKind::Int);
/// assert_eq!(lexer.int_value(), 42);
/// assert_eq!(lexer.next_token().unwrap(), TokenKind::Eof);
/// ```
pub struct Lexer<'src> {
    src: &'src str,

    /// Byte offset of the next unread byte.
    pos: usize,

    /// Current line, 1-based.
    line: u32,

    /// The byte under the cursor; 0 past the end.
    last: u8,

    /// True once the cursor has moved past the final byte.
    eof: bool,

    /// Position of the most recently returned token.
    token_pos: Pos,

    /// Lexeme bytes of the most recent identifier, number, or string.
    /// Always valid UTF-8: bytes are copied verbatim from the source and
    /// escape processing only inserts ASCII.
    lexeme: Vec<u8>,

    bool_value: bool,
    int_value: i32,
    float_value: f32,
    char_value: char,
}

impl<'src> Lexer<'src> {
    /// Create a lexer over the given source text.
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            last: b' ',
            eof: false,
            token_pos: Pos::line(1),
            lexeme: Vec::new(),
            bool_value: false,
            int_value: 0,
            float_value: 0.0,
            char_value: '\0',
        }
    }

    /// Position of the most recently returned token.
    pub fn pos(&self) -> Pos {
        self.token_pos
    }

    /// Lexeme of the most recent identifier, number, or string token.
    pub fn lexeme(&self) -> &str {
        debug_assert!(std::str::from_utf8(&self.lexeme).is_ok());
        std::str::from_utf8(&self.lexeme).unwrap_or("")
    }

    /// Value of the most recent boolean literal.
    pub fn bool_value(&self) -> bool {
        self.bool_value
    }

    /// Value of the most recent integer literal.
    pub fn int_value(&self) -> i32 {
        self.int_value
    }

    /// Value of the most recent float literal.
    pub fn float_value(&self) -> f32 {
        self.float_value
    }

    /// Value of the most recent character literal.
    pub fn char_value(&self) -> char {
        self.char_value
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Result<TokenKind, LexError> {
        loop {
            while !self.eof && self.last.is_ascii_whitespace() {
                if self.last == b'\n' {
                    self.line += 1;
                }
                self.bump();
            }

            if self.eof {
                self.token_pos = Pos::line(self.line);
                return Ok(TokenKind::Eof);
            }

            // Line comment: skip to end of line and go around again.
            if self.last == b'/' && self.peek() == b'/' {
                while !self.eof && self.last != b'\n' {
                    self.bump();
                }
                continue;
            }

            break;
        }

        self.token_pos = Pos::line(self.line);

        if let Some(kind) = self.match_two_char() {
            return Ok(kind);
        }

        if let Some(kind) = self.match_one_char() {
            return Ok(kind);
        }

        if self.last.is_ascii_alphabetic() || self.last == b'_' {
            return Ok(self.lex_ident());
        }

        if self.last.is_ascii_digit() {
            return self.lex_number();
        }

        if self.last == b'\'' {
            return self.lex_char();
        }

        if self.last == b'"' {
            return self.lex_string();
        }

        let ch = self.last as char;
        self.bump();
        Err(LexError::UnexpectedChar {
            ch,
            pos: self.token_pos,
        })
    }

    fn match_two_char(&mut self) -> Option<TokenKind> {
        let kind = match (self.last, self.peek()) {
            (b'&', b'&') => TokenKind::LogAnd,
            (b'|', b'|') => TokenKind::LogOr,
            (b':', b'=') => TokenKind::Declare,
            (b':', b':') => TokenKind::DeclareConst,
            (b'+', b'=') => TokenKind::PlusEqual,
            (b'-', b'=') => TokenKind::MinusEqual,
            (b'*', b'=') => TokenKind::StarEqual,
            (b'/', b'=') => TokenKind::SlashEqual,
            (b'%', b'=') => TokenKind::PercentEqual,
            (b'|', b'=') => TokenKind::OrEqual,
            (b'&', b'=') => TokenKind::AndEqual,
            (b'=', b'=') => TokenKind::Equals,
            (b'!', b'=') => TokenKind::NotEquals,
            (b'<', b'=') => TokenKind::Lte,
            (b'>', b'=') => TokenKind::Gte,
            _ => return None,
        };

        // Consume both characters.
        self.pos += 1;
        self.bump();

        Some(kind)
    }

    fn match_one_char(&mut self) -> Option<TokenKind> {
        let kind = match self.last {
            b'(' => TokenKind::OpenParen,
            b')' => TokenKind::CloseParen,
            b'{' => TokenKind::OpenCurly,
            b'}' => TokenKind::CloseCurly,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'>' => TokenKind::Gt,
            b'<' => TokenKind::Lt,
            b'=' => TokenKind::Equal,
            b'!' => TokenKind::Bang,
            b'&' => TokenKind::And,
            b'|' => TokenKind::Or,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            _ => return None,
        };

        self.bump();
        Some(kind)
    }

    fn lex_ident(&mut self) -> TokenKind {
        self.lexeme.clear();

        while !self.eof && (self.last.is_ascii_alphanumeric() || self.last == b'_') {
            self.lexeme.push(self.last);
            self.bump();
        }

        match TokenKind::keyword(self.lexeme()) {
            Some(TokenKind::Bool) => {
                self.bool_value = self.lexeme() == "true";
                TokenKind::Bool
            }
            Some(kind) => kind,
            None => TokenKind::Ident,
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, LexError> {
        self.lexeme.clear();

        // A single '.' switches the literal to float mode; a second '.'
        // ends the number.
        let mut is_float = false;

        while !self.eof && (self.last.is_ascii_digit() || (self.last == b'.' && !is_float)) {
            if self.last == b'.' {
                is_float = true;
            }

            self.lexeme.push(self.last);
            self.bump();
        }

        if is_float {
            self.float_value = self.lexeme().parse().unwrap_or(0.0);
            Ok(TokenKind::Float)
        } else {
            self.int_value = self
                .lexeme()
                .parse()
                .map_err(|_| LexError::IntOutOfRange {
                    pos: self.token_pos,
                })?;
            Ok(TokenKind::Int)
        }
    }

    /// Apply an escape sequence if the cursor sits on a backslash.
    ///
    /// Unknown escapes drop the backslash and keep the character, matching
    /// the permissive handling of the reference grammar.
    fn apply_escape(&mut self) {
        if self.last == b'\\' {
            self.bump();
            self.last = match self.last {
                b'"' => b'"',
                b'\'' => b'\'',
                b't' => b'\t',
                b'n' => b'\n',
                b'r' => b'\r',
                b'b' => 0x08,
                other => other,
            };
        }
    }

    fn lex_char(&mut self) -> Result<TokenKind, LexError> {
        self.bump();

        if self.eof {
            return Err(LexError::UnterminatedChar {
                pos: self.token_pos,
            });
        }

        self.apply_escape();

        self.char_value = self.last as char;
        self.bump();

        if self.last != b'\'' {
            return Err(LexError::UnterminatedChar {
                pos: self.token_pos,
            });
        }

        self.bump();
        Ok(TokenKind::Char)
    }

    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        self.lexeme.clear();
        self.bump();

        while self.last != b'"' {
            if self.eof {
                return Err(LexError::UnterminatedString {
                    pos: self.token_pos,
                });
            }

            if self.last == b'\n' {
                self.line += 1;
            }

            self.apply_escape();

            self.lexeme.push(self.last);
            self.bump();
        }

        self.bump();
        Ok(TokenKind::String)
    }

    fn bump(&mut self) {
        if self.pos >= self.src.len() {
            self.eof = true;
            self.last = 0;
        } else {
            self.last = self.src.as_bytes()[self.pos];
            self.pos += 1;
        }
    }

    fn peek(&self) -> u8 {
        if self.pos >= self.src.len() {
            0
        } else {
            self.src.as_bytes()[self.pos]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token().expect("lex error");
            if tok == TokenKind::Eof {
                break;
            }
            tokens.push(tok);
        }
        tokens
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(lex_all(""), vec![]);
        assert_eq!(lex_all("   \n\t  "), vec![]);
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            lex_all("( ) { } + - * / % > < = ! & | , ; : ."),
            vec![
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::OpenCurly,
                TokenKind::CloseCurly,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Gt,
                TokenKind::Lt,
                TokenKind::Equal,
                TokenKind::Bang,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Comma,
                TokenKind::Semi,
                TokenKind::Colon,
                TokenKind::Dot,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            lex_all("&& || := :: == != <= >= += -="),
            vec![
                TokenKind::LogAnd,
                TokenKind::LogOr,
                TokenKind::Declare,
                TokenKind::DeclareConst,
                TokenKind::Equals,
                TokenKind::NotEquals,
                TokenKind::Lte,
                TokenKind::Gte,
                TokenKind::PlusEqual,
                TokenKind::MinusEqual,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            lex_all("if else while for return func foreign struct new cast break continue import"),
            vec![
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::For,
                TokenKind::Return,
                TokenKind::Func,
                TokenKind::Foreign,
                TokenKind::Struct,
                TokenKind::New,
                TokenKind::Cast,
                TokenKind::Break,
                TokenKind::Continue,
                TokenKind::Import,
            ]
        );
    }

    #[test]
    fn test_identifier_lexeme() {
        let mut lexer = Lexer::new("_foo_bar42");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Ident);
        assert_eq!(lexer.lexeme(), "_foo_bar42");
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let mut lexer = Lexer::new("iffy");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Ident);
        assert_eq!(lexer.lexeme(), "iffy");
    }

    #[test]
    fn test_bool_literals() {
        let mut lexer = Lexer::new("true false");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Bool);
        assert!(lexer.bool_value());
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Bool);
        assert!(!lexer.bool_value());
    }

    #[test]
    fn test_int_literal() {
        let mut lexer = Lexer::new("12345");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Int);
        assert_eq!(lexer.int_value(), 12345);
    }

    #[test]
    fn test_int_out_of_range() {
        let mut lexer = Lexer::new("99999999999999999999");
        assert!(matches!(
            lexer.next_token(),
            Err(LexError::IntOutOfRange { .. })
        ));
    }

    #[test]
    fn test_float_literal() {
        let mut lexer = Lexer::new("3.25");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Float);
        assert_eq!(lexer.float_value(), 3.25);
    }

    #[test]
    fn test_second_dot_ends_float() {
        // "1.5.2" lexes as float 1.5, then '.', then int 2.
        assert_eq!(
            lex_all("1.5.2"),
            vec![TokenKind::Float, TokenKind::Dot, TokenKind::Int]
        );
    }

    #[test]
    fn test_char_literal() {
        let mut lexer = Lexer::new("'a' '\\n' '\\''");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Char);
        assert_eq!(lexer.char_value(), 'a');
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Char);
        assert_eq!(lexer.char_value(), '\n');
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Char);
        assert_eq!(lexer.char_value(), '\'');
    }

    #[test]
    fn test_unterminated_char() {
        let mut lexer = Lexer::new("'ab'");
        assert!(matches!(
            lexer.next_token(),
            Err(LexError::UnterminatedChar { .. })
        ));
    }

    #[test]
    fn test_string_literal() {
        let mut lexer = Lexer::new("\"hello\\tworld\\n\"");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.lexeme(), "hello\tworld\n");
    }

    #[test]
    fn test_string_escaped_quote() {
        let mut lexer = Lexer::new("\"say \\\"hi\\\"\"");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.lexeme(), "say \"hi\"");
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("\"runs off the end");
        assert!(matches!(
            lexer.next_token(),
            Err(LexError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn test_line_comment_skipped() {
        assert_eq!(
            lex_all("a // comment until eol\nb"),
            vec![TokenKind::Ident, TokenKind::Ident]
        );
    }

    #[test]
    fn test_comment_at_eof() {
        assert_eq!(lex_all("// just a comment"), vec![]);
    }

    #[test]
    fn test_line_tracking() {
        let mut lexer = Lexer::new("a\nb\n\nc");
        lexer.next_token().unwrap();
        assert_eq!(lexer.pos().line, 1);
        lexer.next_token().unwrap();
        assert_eq!(lexer.pos().line, 2);
        lexer.next_token().unwrap();
        assert_eq!(lexer.pos().line, 4);
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new("@");
        assert!(matches!(
            lexer.next_token(),
            Err(LexError::UnexpectedChar { ch: '@', .. })
        ));
    }

    #[test]
    fn test_declaration_statement() {
        assert_eq!(
            lex_all("x := y + 10"),
            vec![
                TokenKind::Ident,
                TokenKind::Declare,
                TokenKind::Ident,
                TokenKind::Plus,
                TokenKind::Int,
            ]
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Lexing an identifier reproduces its lexeme.
            #[test]
            fn ident_roundtrip(name in "[a-zA-Z_][a-zA-Z0-9_]{0,30}") {
                prop_assume!(TokenKind::keyword(&name).is_none());

                let mut lexer = Lexer::new(&name);
                prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::Ident);
                prop_assert_eq!(lexer.lexeme(), name.as_str());
                prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::Eof);
            }

            /// Lexing a quoted string reproduces its contents, modulo
            /// escape normalization.
            #[test]
            fn string_roundtrip(text in "[a-zA-Z0-9 .,;!?]{0,40}") {
                let src = format!("\"{}\"", text);
                let mut lexer = Lexer::new(&src);
                prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
                prop_assert_eq!(lexer.lexeme(), text.as_str());
            }

            /// Every non-negative i32 lexes back to itself.
            #[test]
            fn int_roundtrip(n in 0i32..=i32::MAX) {
                let src = n.to_string();
                let mut lexer = Lexer::new(&src);
                prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::Int);
                prop_assert_eq!(lexer.int_value(), n);
            }
        }
    }
}
