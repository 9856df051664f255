//! Classifies input bytes into the fixed [`crate::token::TokenKind`]
//! alphabet. Stateless over the input save for a single byte offset, so a
//! lookahead is just "save position, try to match, restore on failure".

use log::trace;

use crate::error::{Error, Position};
use crate::token::{Token, TokenKind, KEYWORDS, OPERATORS};

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    /// 1-based line/column of a byte offset, computed by rescanning the
    /// input up to that position (the lexer carries no running line/col
    /// state of its own).
    pub fn position_at(&self, offset: usize) -> Position {
        Position::at(self.src, offset)
    }

    pub fn position(&self) -> Position {
        self.position_at(self.pos)
    }

    fn is_whitespace(b: u8) -> bool {
        matches!(b, b' ' | b'\t' | b'\r' | b'\n')
    }

    /// Skips whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            while self.pos < self.bytes.len() && Self::is_whitespace(self.bytes[self.pos]) {
                self.pos += 1;
            }
            if self.pos + 1 < self.bytes.len()
                && self.bytes[self.pos] == b'/'
                && self.bytes[self.pos + 1] == b'/'
            {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn is_ident_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_'
    }

    fn is_ident_continue(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_'
    }

    /// Classifies the next token at the current position without consuming
    /// trivia again. Returns `None` at end of input.
    fn classify(&self, start: usize) -> Result<Option<Token>, Error> {
        if start >= self.bytes.len() {
            return Ok(None);
        }

        // (1) longest-match over the fixed operator/punctuation table.
        let remaining = &self.src[start..];
        let mut best: Option<(&str, TokenKind)> = None;
        for &(spelling, kind) in OPERATORS {
            if remaining.starts_with(spelling) {
                if best.map(|(s, _)| spelling.len() > s.len()).unwrap_or(true) {
                    best = Some((spelling, kind));
                }
            }
        }
        if let Some((spelling, kind)) = best {
            let end = start + spelling.len();
            return Ok(Some(Token {
                kind,
                begin: start,
                end,
                text: spelling.to_string(),
            }));
        }

        // (2) digit runs.
        if self.bytes[start].is_ascii_digit() {
            let mut end = start;
            while end < self.bytes.len() && self.bytes[end].is_ascii_digit() {
                end += 1;
            }
            return Ok(Some(Token {
                kind: TokenKind::Integer,
                begin: start,
                end,
                text: self.src[start..end].to_string(),
            }));
        }

        // (3) identifier runs, classified as keyword or identifier.
        if Self::is_ident_start(self.bytes[start]) {
            let mut end = start;
            while end < self.bytes.len() && Self::is_ident_continue(self.bytes[end]) {
                end += 1;
            }
            let text = &self.src[start..end];
            let kind = KEYWORDS
                .iter()
                .find(|(kw, _)| *kw == text)
                .map(|(_, k)| *k)
                .unwrap_or(TokenKind::Identifier);
            return Ok(Some(Token {
                kind,
                begin: start,
                end,
                text: text.to_string(),
            }));
        }

        // (4) otherwise fatal.
        trace!("classification miss at byte {}: '{}'", start, self.bytes[start] as char);
        Err(Error::Lexical {
            at: self.position_at(start),
            msg: format!("Invalid Token '{}'", self.bytes[start] as char),
        })
    }

    /// Skips whitespace, saves position, classifies the next token; if it
    /// matches `expected`, consumes it and returns `Some`. Otherwise
    /// restores the saved position and returns `None`.
    pub fn try_match(&mut self, expected: TokenKind) -> Result<Option<Token>, Error> {
        let saved = self.pos;
        self.skip_trivia();
        let start = self.pos;
        match self.classify(start)? {
            None => {
                if expected == TokenKind::Eof {
                    return Ok(Some(Token {
                        kind: TokenKind::Eof,
                        begin: start,
                        end: start,
                        text: String::new(),
                    }));
                }
                Err(Error::Lexical {
                    at: self.position_at(start),
                    msg: "unexpected end of file".to_string(),
                })
            }
            Some(tok) if tok.kind == expected => {
                self.pos = tok.end;
                Ok(Some(tok))
            }
            Some(_) => {
                self.pos = saved;
                Ok(None)
            }
        }
    }

    /// Like [`Lexer::try_match`], but reports a fatal error on mismatch
    /// instead of restoring position.
    pub fn expect(&mut self, expected: TokenKind) -> Result<Token, Error> {
        let saved = self.pos;
        self.skip_trivia();
        let start = self.pos;
        match self.classify(start)? {
            None if expected == TokenKind::Eof => Ok(Token {
                kind: TokenKind::Eof,
                begin: start,
                end: start,
                text: String::new(),
            }),
            None => Err(Error::Lexical {
                at: self.position_at(start),
                msg: "unexpected end of file".to_string(),
            }),
            Some(tok) if tok.kind == expected => {
                self.pos = tok.end;
                Ok(tok)
            }
            Some(tok) => {
                self.pos = saved;
                Err(Error::Syntax {
                    at: self.position_at(start),
                    msg: format!(
                        "Unexpected Token {}, expected {}",
                        tok.text,
                        expected.name()
                    ),
                })
            }
        }
    }

    /// Peeks the kind of the next token without consuming it.
    pub fn peek_kind(&mut self) -> Result<TokenKind, Error> {
        let saved = self.pos;
        self.skip_trivia();
        let start = self.pos;
        let kind = match self.classify(start)? {
            None => TokenKind::Eof,
            Some(tok) => tok.kind,
        };
        self.pos = saved;
        Ok(kind)
    }

    pub fn eof(&mut self) -> Result<bool, Error> {
        Ok(self.peek_kind()? == TokenKind::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_operator() {
        for &(spelling, kind) in OPERATORS {
            let mut lexer = Lexer::new(spelling);
            let tok = lexer.expect(kind).unwrap();
            assert_eq!(tok.text, spelling);
            assert!(lexer.eof().unwrap());
        }
    }

    #[test]
    fn skips_comments_and_whitespace() {
        let mut lexer = Lexer::new("  // a comment\n\t42");
        let tok = lexer.expect(TokenKind::Integer).unwrap();
        assert_eq!(tok.text, "42");
    }

    #[test]
    fn keyword_vs_identifier() {
        let mut lexer = Lexer::new("while whileish");
        assert_eq!(lexer.peek_kind().unwrap(), TokenKind::While);
        lexer.expect(TokenKind::While).unwrap();
        assert_eq!(lexer.peek_kind().unwrap(), TokenKind::Identifier);
    }

    #[test]
    fn mismatch_restores_position() {
        let mut lexer = Lexer::new("foo");
        assert!(lexer.try_match(TokenKind::Integer).unwrap().is_none());
        let tok = lexer.expect(TokenKind::Identifier).unwrap();
        assert_eq!(tok.text, "foo");
    }
}
