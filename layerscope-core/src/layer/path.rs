//! Namespace paths and the patterns dissectors register against them.
//!
//! A path is the ordered list of protocol tokens traversed to reach a layer,
//! e.g. `eth → ipv4 → udp`. Patterns match the token sequence directly with
//! an explicit anchor instead of a regular expression over a joined string.
//!
//! Textual pattern syntax:
//!
//! ```text
//! "^$"          root only (empty path)
//! "eth$"        path ends with eth
//! "^eth ipv4"   path starts with eth, ipv4
//! "^eth * udp$" exactly three tokens, any middle token
//! "ipv4 udp"    contiguous ipv4, udp anywhere in the path
//! ```

use std::fmt;
use std::str::FromStr;

use compact_str::CompactString;
use smallvec::SmallVec;
use thiserror::Error;

use crate::intern::Symbol;

/// Ordered sequence of protocol tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NamespacePath {
    tokens: SmallVec<[Symbol; 8]>,
}

impl NamespacePath {
    /// The empty path of the root layer.
    pub fn root() -> Self {
        Self::default()
    }

    /// Extend this path by one token.
    pub fn child(&self, token: Symbol) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        Self { tokens }
    }

    pub fn tokens(&self) -> &[Symbol] {
        &self.tokens
    }

    pub fn last(&self) -> Option<&Symbol> {
        self.tokens.last()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t.as_str() == token)
    }
}

impl FromIterator<Symbol> for NamespacePath {
    fn from_iter<I: IntoIterator<Item = Symbol>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" → ")?;
            }
            f.write_str(token)?;
        }
        Ok(())
    }
}

/// Where a pattern must sit within a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Tokens must be the start of the path
    Prefix,
    /// Tokens must be the end of the path
    Suffix,
    /// Tokens must be the whole path
    Exact,
    /// Tokens may appear anywhere, contiguously
    Anywhere,
}

/// One position in a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(CompactString),
    /// Matches any single token (`*`)
    Any,
}

impl Token {
    fn matches(&self, symbol: &Symbol) -> bool {
        match self {
            Token::Literal(text) => symbol.as_str() == text.as_str(),
            Token::Any => true,
        }
    }
}

/// A namespace-path matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    anchor: Anchor,
    tokens: Vec<Token>,
}

impl PathPattern {
    pub fn new(anchor: Anchor, tokens: Vec<Token>) -> Self {
        Self { anchor, tokens }
    }

    /// Matches only the root layer.
    pub fn root() -> Self {
        Self::new(Anchor::Exact, Vec::new())
    }

    pub fn exact(tokens: &[&str]) -> Self {
        Self::new(Anchor::Exact, literals(tokens))
    }

    pub fn prefix(tokens: &[&str]) -> Self {
        Self::new(Anchor::Prefix, literals(tokens))
    }

    /// Matches when the path ends with `tokens`, i.e. the last protocol
    /// decoded so far.
    pub fn suffix(tokens: &[&str]) -> Self {
        Self::new(Anchor::Suffix, literals(tokens))
    }

    pub fn anywhere(tokens: &[&str]) -> Self {
        Self::new(Anchor::Anywhere, literals(tokens))
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn matches(&self, path: &NamespacePath) -> bool {
        let path = path.tokens();
        let n = self.tokens.len();

        match self.anchor {
            Anchor::Exact => path.len() == n && self.matches_at(path, 0),
            Anchor::Prefix => path.len() >= n && self.matches_at(path, 0),
            Anchor::Suffix => path.len() >= n && self.matches_at(path, path.len() - n),
            Anchor::Anywhere => {
                n == 0 || (path.len() >= n && (0..=path.len() - n).any(|i| self.matches_at(path, i)))
            }
        }
    }

    fn matches_at(&self, path: &[Symbol], start: usize) -> bool {
        self.tokens
            .iter()
            .zip(&path[start..])
            .all(|(token, symbol)| token.matches(symbol))
    }
}

fn literals(tokens: &[&str]) -> Vec<Token> {
    tokens
        .iter()
        .map(|t| Token::Literal(CompactString::new(t)))
        .collect()
}

/// Error returned when a textual pattern cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path pattern: {0}")]
pub struct PatternError(pub String);

impl FromStr for PathPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start, s) = match s.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (end, s) = match s.strip_suffix('$') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let anchor = match (start, end) {
            (true, true) => Anchor::Exact,
            (true, false) => Anchor::Prefix,
            (false, true) => Anchor::Suffix,
            (false, false) => Anchor::Anywhere,
        };

        let mut tokens = Vec::new();
        for word in s.split(|c: char| c.is_whitespace() || c == '→').filter(|w| !w.is_empty()) {
            if word == "*" {
                tokens.push(Token::Any);
            } else if word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                tokens.push(Token::Literal(CompactString::new(word)));
            } else {
                return Err(PatternError(format!("unexpected token '{word}'")));
            }
        }

        Ok(Self::new(anchor, tokens))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if matches!(self.anchor, Anchor::Prefix | Anchor::Exact) {
            f.write_str("^")?;
        }
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match token {
                Token::Literal(text) => f.write_str(text)?,
                Token::Any => f.write_str("*")?,
            }
        }
        if matches!(self.anchor, Anchor::Suffix | Anchor::Exact) {
            f.write_str("$")?;
        }
        Ok(())
    }
}
