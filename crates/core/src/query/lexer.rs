//! Splits query text into words, quoted strings, field prefixes, parentheses
//! and the upper-case operators `AND`, `OR`, `NOT`.
//!
//! Positions are 0-based character indices into the query string.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted word, possibly ending in `*`
    Word(String),
    /// Text between double quotes
    Quoted(String),
    /// `name:` directly in front of a value
    Field(String),
    And,
    Or,
    Not,
    LeftParen,
    RightParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexToken {
    pub kind: TokenKind,
    pub position: usize,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self { input: input.chars().collect(), position: 0 }
    }

    /// Tokenize the whole input; the last token is always `Eof`
    pub fn tokenize(mut self) -> Result<Vec<LexToken>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<LexToken> {
        self.skip_whitespace();
        let start = self.position;

        let Some(ch) = self.current_char() else {
            return Ok(LexToken { kind: TokenKind::Eof, position: start });
        };

        let kind = match ch {
            '(' => {
                self.advance();
                TokenKind::LeftParen
            }
            ')' => {
                self.advance();
                TokenKind::RightParen
            }
            '"' => TokenKind::Quoted(self.read_quoted()?),
            ':' => return Err(Error::query_syntax(start, "missing field name before ':'")),
            _ => {
                let word = self.read_word();
                if self.current_char() == Some(':') {
                    self.advance();
                    TokenKind::Field(word)
                } else {
                    match word.as_str() {
                        "AND" => TokenKind::And,
                        "OR" => TokenKind::Or,
                        "NOT" => TokenKind::Not,
                        _ => TokenKind::Word(word),
                    }
                }
            }
        };

        Ok(LexToken { kind, position: start })
    }

    fn read_quoted(&mut self) -> Result<String> {
        let open = self.position;
        self.advance();

        let mut text = String::new();
        while let Some(ch) = self.current_char() {
            self.advance();
            if ch == '"' {
                return Ok(text);
            }
            text.push(ch);
        }

        Err(Error::query_syntax(open, "unbalanced quote"))
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ':') {
                break;
            }
            word.push(ch);
            self.advance();
        }
        word
    }

    fn skip_whitespace(&mut self) {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }
}
