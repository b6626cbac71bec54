//! A small SQL scanner. It does not parse; it only knows enough to find clause keywords at
//! the outermost nesting level while stepping over literals, quoted identifiers, comments
//! and parenthesized groups.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    Literal,
    Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// Paren depth the token sits at; `(` and `)` carry the depth outside the group.
    pub depth: u32,
}

pub struct Scan<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
}

impl<'a> Scan<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self {
            sql,
            tokens: tokenize(sql),
        }
    }

    pub fn sql(&self) -> &'a str {
        self.sql
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn text(&self, token: &Token) -> &'a str {
        &self.sql[token.start..token.end]
    }

    pub fn is_word(&self, idx: usize, word: &str) -> bool {
        self.tokens.get(idx).is_some_and(|t| {
            t.kind == TokenKind::Word && self.text(t).eq_ignore_ascii_case(word)
        })
    }

    pub fn is_symbol(&self, idx: usize, symbol: char) -> bool {
        self.tokens.get(idx).is_some_and(|t| {
            t.kind == TokenKind::Symbol && self.sql[t.start..].starts_with(symbol)
        })
    }

    /// Index of the first outermost keyword at or after `from`. Two-word keywords such as
    /// `GROUP BY` are passed as `["GROUP", "BY"]`; the returned index points at the first word.
    pub fn find_top_level(&self, keyword: &[&str], from: usize) -> Option<usize> {
        (from..self.tokens.len()).find(|&idx| self.keyword_at(idx, keyword))
    }

    pub fn keyword_at(&self, idx: usize, keyword: &[&str]) -> bool {
        if self.tokens.get(idx).is_none_or(|t| t.depth != 0) {
            return false;
        }
        keyword
            .iter()
            .enumerate()
            .all(|(offset, word)| self.is_word(idx + offset, word))
    }

    /// First outermost occurrence of any of `keywords` at or after `from`.
    pub fn find_any_top_level(&self, keywords: &[&[&str]], from: usize) -> Option<usize> {
        (from..self.tokens.len()).find(|&idx| keywords.iter().any(|kw| self.keyword_at(idx, kw)))
    }

    pub fn top_level_symbols(&self, symbol: char) -> Vec<usize> {
        (0..self.tokens.len())
            .filter(|&idx| self.tokens[idx].depth == 0 && self.is_symbol(idx, symbol))
            .collect()
    }

    /// Identifier value of a word or quoted identifier, with quoting removed.
    pub fn identifier(&self, token: &Token) -> Option<String> {
        let raw = self.text(token);
        match token.kind {
            TokenKind::Word => Some(raw.to_string()),
            TokenKind::QuotedIdent => {
                let quote = raw.chars().next()?;
                let inner = raw
                    .strip_prefix(quote)
                    .map(|s| s.strip_suffix(quote).unwrap_or(s))?;
                let doubled: String = [quote, quote].iter().collect();
                Some(inner.replace(&doubled, &quote.to_string()))
            }
            _ => None,
        }
    }

    /// Whether any identifier in `range` names `column`, ignoring case and quoting.
    pub fn references_identifier(&self, range: std::ops::Range<usize>, column: &str) -> bool {
        self.tokens[range].iter().any(|token| {
            self.identifier(token)
                .is_some_and(|ident| ident.eq_ignore_ascii_case(column))
        })
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub fn tokenize(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut depth: u32 = 0;
    let mut idx = 0;

    while idx < sql.len() {
        let Some(c) = sql[idx..].chars().next() else {
            break;
        };

        if c.is_whitespace() {
            idx += c.len_utf8();
            continue;
        }

        if sql[idx..].starts_with("--") {
            idx = sql[idx..].find('\n').map_or(sql.len(), |offset| idx + offset + 1);
            continue;
        }

        if sql[idx..].starts_with("/*") {
            idx = sql[idx + 2..]
                .find("*/")
                .map_or(sql.len(), |offset| idx + 2 + offset + 2);
            continue;
        }

        let start = idx;
        match c {
            '\'' | '"' | '`' => {
                let end = scan_quoted(bytes, idx, c as u8);
                let kind = if c == '\'' {
                    TokenKind::Literal
                } else {
                    TokenKind::QuotedIdent
                };
                tokens.push(Token {
                    kind,
                    start,
                    end,
                    depth,
                });
                idx = end;
            }
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    start,
                    end: start + 1,
                    depth,
                });
                depth += 1;
                idx += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    start,
                    end: start + 1,
                    depth,
                });
                idx += 1;
            }
            c if is_word_char(c) => {
                let end = sql[idx..]
                    .char_indices()
                    .find(|(_, ch)| !is_word_char(*ch))
                    .map_or(sql.len(), |(offset, _)| idx + offset);
                tokens.push(Token {
                    kind: TokenKind::Word,
                    start,
                    end,
                    depth,
                });
                idx = end;
            }
            other => {
                let end = start + other.len_utf8();
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    start,
                    end,
                    depth,
                });
                idx = end;
            }
        }
    }

    tokens
}

/// Returns the byte offset just past the closing quote; doubled quotes are escapes.
/// An unterminated literal runs to the end of input.
fn scan_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut idx = open + 1;
    while idx < bytes.len() {
        if bytes[idx] == quote {
            if bytes.get(idx + 1) == Some(&quote) {
                idx += 2;
                continue;
            }
            return idx + 1;
        }
        idx += 1;
    }
    bytes.len()
}

/// Trims the statement and drops any number of trailing semicolons.
pub fn strip_trailing_semicolons(sql: &str) -> &str {
    let mut candidate = sql.trim();
    while let Some(rest) = candidate.strip_suffix(';') {
        candidate = rest.trim_end();
    }
    candidate
}
