pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use crate::common::error::CompileError;

/// Tokenize and parse a source file into a typed AST root.
pub fn parse(source: &str) -> Result<ast::Program, CompileError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse_program()
}
