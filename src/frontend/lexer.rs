//! Byte-wise lexer with line tracking.
//!
//! Escape sequences in string and character literals are expanded here;
//! character constants come out as i32-valued bytes. Comments (`//` and
//! `/* */`) and whitespace are skipped.

use crate::common::error::CompileError;

use super::token::{Token, TokenKind};

pub struct Lexer {
    input: Vec<u8>,
    pos: usize,
    line: u32,
}

impl Lexer {
    pub fn new(input: &str) -> Lexer {
        Lexer { input: input.bytes().collect(), pos: 0, line: 1 }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.is_eof();
            tokens.push(tok);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace_and_comments()?;

        if self.pos >= self.input.len() {
            return Ok(Token::new(TokenKind::Eof, self.line));
        }

        let ch = self.input[self.pos];
        if ch.is_ascii_digit() {
            return self.lex_number();
        }
        if ch == b'"' {
            return self.lex_string();
        }
        if ch == b'\'' {
            return self.lex_char();
        }
        if ch == b'_' || ch.is_ascii_alphabetic() {
            return Ok(self.lex_identifier());
        }
        self.lex_punctuation()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), CompileError> {
        loop {
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
                if self.input[self.pos] == b'\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }
            if self.pos + 1 < self.input.len()
                && self.input[self.pos] == b'/'
                && self.input[self.pos + 1] == b'/'
            {
                while self.pos < self.input.len() && self.input[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            if self.pos + 1 < self.input.len()
                && self.input[self.pos] == b'/'
                && self.input[self.pos + 1] == b'*'
            {
                let start_line = self.line;
                self.pos += 2;
                loop {
                    if self.pos + 1 >= self.input.len() {
                        return Err(CompileError::syntax(start_line, "unterminated block comment"));
                    }
                    if self.input[self.pos] == b'*' && self.input[self.pos + 1] == b'/' {
                        self.pos += 2;
                        break;
                    }
                    if self.input[self.pos] == b'\n' {
                        self.line += 1;
                    }
                    self.pos += 1;
                }
                continue;
            }
            return Ok(());
        }
    }

    fn lex_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| CompileError::syntax(self.line, "invalid number"))?;
        let value: i32 = text
            .parse()
            .map_err(|_| CompileError::syntax(self.line, format!("integer '{}' out of range", text)))?;
        Ok(Token::new(TokenKind::IntLiteral(value), self.line))
    }

    fn lex_escape(&mut self) -> Result<u8, CompileError> {
        // self.pos is at the character after the backslash
        if self.pos >= self.input.len() {
            return Err(CompileError::syntax(self.line, "unterminated escape sequence"));
        }
        let ch = self.input[self.pos];
        self.pos += 1;
        Ok(match ch {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            other => {
                return Err(CompileError::syntax(
                    self.line,
                    format!("unknown escape sequence '\\{}'", other as char),
                ))
            }
        })
    }

    fn lex_string(&mut self) -> Result<Token, CompileError> {
        let start_line = self.line;
        self.pos += 1; // opening quote
        let mut bytes = Vec::new();
        loop {
            if self.pos >= self.input.len() {
                return Err(CompileError::syntax(start_line, "unterminated string literal"));
            }
            match self.input[self.pos] {
                b'"' => {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::StringLiteral(bytes), start_line));
                }
                b'\\' => {
                    self.pos += 1;
                    bytes.push(self.lex_escape()?);
                }
                b'\n' => return Err(CompileError::syntax(start_line, "unterminated string literal")),
                other => {
                    bytes.push(other);
                    self.pos += 1;
                }
            }
        }
    }

    fn lex_char(&mut self) -> Result<Token, CompileError> {
        self.pos += 1; // opening quote
        if self.pos >= self.input.len() {
            return Err(CompileError::syntax(self.line, "unterminated character literal"));
        }
        let value = match self.input[self.pos] {
            b'\\' => {
                self.pos += 1;
                self.lex_escape()?
            }
            b'\'' => return Err(CompileError::syntax(self.line, "empty character literal")),
            other => {
                self.pos += 1;
                other
            }
        };
        if self.pos >= self.input.len() || self.input[self.pos] != b'\'' {
            return Err(CompileError::syntax(self.line, "unterminated character literal"));
        }
        self.pos += 1;
        Ok(Token::new(TokenKind::CharLiteral(value as i32), self.line))
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos] == b'_' || self.input[self.pos].is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        let kind = match text.as_str() {
            "void" => TokenKind::Void,
            "int" => TokenKind::Int,
            "char" => TokenKind::Char,
            "struct" => TokenKind::Struct,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "input" => TokenKind::Input,
            "output" => TokenKind::Output,
            _ => TokenKind::Identifier(text),
        };
        Token::new(kind, self.line)
    }

    fn lex_punctuation(&mut self) -> Result<Token, CompileError> {
        let ch = self.input[self.pos];
        let next = self.input.get(self.pos + 1).copied();
        let (kind, len) = match (ch, next) {
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::Ne, 2),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b'{', _) => (TokenKind::LBrace, 1),
            (b'}', _) => (TokenKind::RBrace, 1),
            (b'[', _) => (TokenKind::LBracket, 1),
            (b']', _) => (TokenKind::RBracket, 1),
            (b';', _) => (TokenKind::Semi, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b':', _) => (TokenKind::Colon, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b'=', _) => (TokenKind::Assign, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'&', _) => (TokenKind::Amp, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            _ => {
                return Err(CompileError::syntax(
                    self.line,
                    format!("unexpected character '{}'", ch as char),
                ))
            }
        };
        self.pos += len;
        Ok(Token::new(kind, self.line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            kinds("int a = 5;"),
            vec![
                TokenKind::Int,
                TokenKind::Identifier("a".to_string()),
                TokenKind::Assign,
                TokenKind::IntLiteral(5),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators_and_comments() {
        assert_eq!(
            kinds("a <= b // tail\n/* x\ny */ c != d"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Le,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Identifier("c".to_string()),
                TokenKind::Ne,
                TokenKind::Identifier("d".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn literals_expand_escapes() {
        assert_eq!(
            kinds("'\\n' \"a\\tb\""),
            vec![
                TokenKind::CharLiteral(10),
                TokenKind::StringLiteral(vec![b'a', b'\t', b'b']),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn error_carries_line_number() {
        let err = Lexer::new("a\nb\n@").tokenize().unwrap_err();
        assert!(err.to_string().starts_with("line 3:"));
    }
}
