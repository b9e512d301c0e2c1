//! Query language: lexer, parser and the query tree handed to the executor.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{PhraseTerm, QueryNode};
pub use parser::QueryParser;
