//! Recursive descent parser for query strings
//!
//! # Grammar
//!
//! ```text
//! query    := or_expr EOF | <empty>
//! or_expr  := and_expr (OR and_expr)*
//! and_expr := primary ((AND | NOT)? primary)*
//! primary  := '(' or_expr ')' | FIELD value | value
//! value    := QUOTED | WORD | WORD '*'
//! ```
//!
//! Adjacent operands are combined with AND. `a NOT b` keeps the documents
//! matching `a` that do not match `b`.

use super::ast::{PhraseTerm, QueryNode};
use super::lexer::{LexToken, Lexer, TokenKind};
use crate::analysis::{Analyzer, Token};
use crate::document::DocumentSchema;
use crate::error::{Error, Result};

/// Turns query text into a [`QueryNode`] using the index analyzer
pub struct QueryParser<'a> {
    analyzer: &'a Analyzer,
    schema: &'a DocumentSchema,
}

impl<'a> QueryParser<'a> {
    pub fn new(analyzer: &'a Analyzer, schema: &'a DocumentSchema) -> Self {
        Self { analyzer, schema }
    }

    /// Parse a query; whitespace-only input gives [`QueryNode::Empty`]
    pub fn parse(&self, input: &str) -> Result<QueryNode> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut state = ParseState { parser: self, tokens, index: 0 };

        if state.peek().kind == TokenKind::Eof {
            return Ok(QueryNode::Empty);
        }

        let node = state.parse_or_expr()?;

        let rest = state.peek();
        match rest.kind {
            TokenKind::Eof => Ok(node),
            TokenKind::RightParen => Err(Error::query_syntax(rest.position, "unbalanced ')'")),
            _ => Err(Error::query_syntax(rest.position, "unexpected token")),
        }
    }

    fn value(&self, field: Option<&str>, token: &LexToken) -> Result<QueryNode> {
        match &token.kind {
            TokenKind::Quoted(text) => Ok(phrase(field, self.analyzer.analyze(text))),
            TokenKind::Word(word) if word.ends_with('*') => {
                let stem = word.trim_end_matches('*');
                if stem.is_empty() {
                    return Err(Error::query_syntax(token.position, "prefix needs at least one character"));
                }

                let mut tokens = self.analyzer.analyze_prefix(stem);
                match tokens.len() {
                    0 => Ok(QueryNode::Empty),
                    1 => {
                        let raw = tokens.remove(0).term;
                        let stemmed = self
                            .analyzer
                            .stem_prefix(stem)
                            .into_iter()
                            .next()
                            .map(|t| t.term)
                            .filter(|term| *term != raw);

                        Ok(match stemmed {
                            Some(stemmed) => {
                                QueryNode::or([QueryNode::prefix(field, raw), QueryNode::prefix(field, stemmed)])
                            }
                            None => QueryNode::prefix(field, raw),
                        })
                    }
                    _ => Err(Error::query_syntax(token.position, "prefix must be a single word")),
                }
            }
            TokenKind::Word(word) => Ok(phrase(field, self.analyzer.analyze(word))),
            _ => Err(Error::query_syntax(token.position, "expected a term or a quoted phrase")),
        }
    }
}

fn phrase(field: Option<&str>, tokens: Vec<Token>) -> QueryNode {
    let base = tokens.first().map(|t| t.position).unwrap_or(0);
    let terms = tokens
        .into_iter()
        .map(|t| PhraseTerm::new(t.term, t.position - base))
        .collect();
    QueryNode::phrase(field, terms)
}

struct ParseState<'p, 'a> {
    parser: &'p QueryParser<'a>,
    tokens: Vec<LexToken>,
    index: usize,
}

impl ParseState<'_, '_> {
    fn peek(&self) -> &LexToken {
        // The lexer always ends the stream with Eof and the parser never moves past it.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> LexToken {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.index += 1;
        }
        token
    }

    fn starts_operand(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Word(_) | TokenKind::Quoted(_) | TokenKind::Field(_) | TokenKind::LeftParen
        )
    }

    fn operand_after(&mut self, operator: &LexToken, name: &str) -> Result<QueryNode> {
        if !self.starts_operand() {
            return Err(Error::query_syntax(operator.position, format!("{name} is missing its right operand")));
        }
        self.parse_primary()
    }

    fn parse_or_expr(&mut self) -> Result<QueryNode> {
        let mut clauses = vec![self.parse_and_expr()?];

        while self.peek().kind == TokenKind::Or {
            let operator = self.advance();
            if !self.starts_operand() {
                return Err(Error::query_syntax(operator.position, "OR is missing its right operand"));
            }
            clauses.push(self.parse_and_expr()?);
        }

        Ok(QueryNode::or(clauses))
    }

    fn parse_and_expr(&mut self) -> Result<QueryNode> {
        let mut node = self.parse_primary()?;

        loop {
            match self.peek().kind {
                TokenKind::And => {
                    let operator = self.advance();
                    let rhs = self.operand_after(&operator, "AND")?;
                    node = QueryNode::and([node, rhs]);
                }
                TokenKind::Not => {
                    let operator = self.advance();
                    let rhs = self.operand_after(&operator, "NOT")?;
                    node = QueryNode::not(node, rhs);
                }
                _ if self.starts_operand() => {
                    let rhs = self.parse_primary()?;
                    node = QueryNode::and([node, rhs]);
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<QueryNode> {
        let token = self.advance();

        match &token.kind {
            TokenKind::LeftParen => {
                if self.peek().kind == TokenKind::RightParen {
                    return Err(Error::query_syntax(token.position, "empty group '()'"));
                }

                let inner = self.parse_or_expr()?;
                if self.peek().kind != TokenKind::RightParen {
                    return Err(Error::query_syntax(token.position, "unbalanced '('"));
                }
                self.advance();
                Ok(inner)
            }
            TokenKind::Field(name) => {
                if !self.parser.schema.contains(name) {
                    return Err(Error::query_syntax(token.position, format!("unknown field '{name}'")));
                }

                let value = self.advance();
                match value.kind {
                    TokenKind::Word(_) | TokenKind::Quoted(_) => self.parser.value(Some(name.as_str()), &value),
                    _ => Err(Error::query_syntax(token.position, format!("field '{name}' has no value"))),
                }
            }
            TokenKind::Word(_) | TokenKind::Quoted(_) => self.parser.value(None, &token),
            TokenKind::And | TokenKind::Or | TokenKind::Not => {
                Err(Error::query_syntax(token.position, "operator is missing its left operand"))
            }
            TokenKind::RightParen => Err(Error::query_syntax(token.position, "unbalanced ')'")),
            TokenKind::Eof => Err(Error::query_syntax(token.position, "unexpected end of query")),
        }
    }
}
