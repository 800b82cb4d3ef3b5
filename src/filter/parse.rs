//! Recursive-descent parser for filter text.

use super::Node;
use regex::Regex;

/// Error raised for malformed filter text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filter `{filter}` at offset {offset}: {message}")]
pub struct FilterError {
    /// The offending filter text
    pub filter: String,
    /// Byte offset of the problem
    pub offset: usize,
    /// What was expected
    pub message: String,
}

pub(super) fn parse(text: &str) -> Result<Node, FilterError> {
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.skip_ws();
    let node = parser.filter()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(node)
}

/// Escape the characters that carry meaning inside a filter value.
pub(super) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

/// One piece of a value: literal text, or an unescaped `*`.
enum Piece {
    Text(String),
    Star,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> FilterError {
        FilterError {
            filter: self.text.to_string(),
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), FilterError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn filter(&mut self) -> Result<Node, FilterError> {
        self.expect(b'(')?;
        self.skip_ws();
        let node = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Node::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Node::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_ws();
                let inner = self.filter()?;
                self.skip_ws();
                Node::Not(Box::new(inner))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        self.skip_ws();
        Ok(node)
    }

    fn filter_list(&mut self) -> Result<Vec<Node>, FilterError> {
        let mut nodes = Vec::new();
        self.skip_ws();
        while self.peek() == Some(b'(') {
            nodes.push(self.filter()?);
            self.skip_ws();
        }
        if nodes.is_empty() {
            return Err(self.error("expected at least one filter in composite"));
        }
        Ok(nodes)
    }

    fn item(&mut self) -> Result<Node, FilterError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'~' | b'<' | b'>' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.text[start..self.pos].trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(op @ (b'~' | b'<' | b'>')) => {
                self.pos += 1;
                self.expect(b'=')?;
                op
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let pieces = self.value()?;
        match op {
            b'=' => Ok(equality_node(attr, pieces)),
            _ => {
                if pieces.iter().any(|p| matches!(p, Piece::Star)) {
                    return Err(self.error("wildcard not allowed with this operator"));
                }
                let value = literal(&pieces);
                Ok(match op {
                    b'~' => Node::Approx(attr, value),
                    b'<' => Node::LessEq(attr, value),
                    _ => Node::GreaterEq(attr, value),
                })
            }
        }
    }

    fn value(&mut self) -> Result<Vec<Piece>, FilterError> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        loop {
            let rest = &self.text[self.pos..];
            let Some(c) = rest.chars().next() else {
                return Err(self.error("unterminated value"));
            };
            match c {
                ')' => break,
                '(' => return Err(self.error("unescaped '(' in value")),
                '*' => {
                    if !current.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut current)));
                    }
                    pieces.push(Piece::Star);
                    self.pos += 1;
                }
                '\\' => {
                    self.pos += 1;
                    let escaped = self.text[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    current.push(escaped);
                    self.pos += escaped.len_utf8();
                }
                other => {
                    current.push(other);
                    self.pos += other.len_utf8();
                }
            }
        }
        if !current.is_empty() {
            pieces.push(Piece::Text(current));
        }
        Ok(pieces)
    }
}

fn literal(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .map(|p| match p {
            Piece::Text(t) => t.as_str(),
            Piece::Star => "*",
        })
        .collect()
}

fn equality_node(attr: String, pieces: Vec<Piece>) -> Node {
    match pieces.as_slice() {
        [Piece::Star] => Node::Present(attr),
        _ if pieces.iter().any(|p| matches!(p, Piece::Star)) => {
            let mut pattern = String::from("^");
            for piece in &pieces {
                match piece {
                    Piece::Text(t) => pattern.push_str(&regex::escape(t)),
                    Piece::Star => pattern.push_str("(?s:.*)"),
                }
            }
            pattern.push('$');
            match Regex::new(&pattern) {
                Ok(re) => Node::Substring(attr, re),
                // Escaped literal pieces always compile; fall back to literal equality.
                Err(_) => Node::Equal(attr, literal(&pieces)),
            }
        }
        _ => Node::Equal(attr, literal(&pieces)),
    }
}
