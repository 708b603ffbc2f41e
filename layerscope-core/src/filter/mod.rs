//! Filter compilation and evaluation.
//!
//! A filter is compiled once into a [`Predicate`] and then evaluated against
//! any number of frames, from any number of threads. Evaluation never fails:
//!
//! - A comparison is true if *any* attribute with that identifier in the
//!   frame's tree (nested sub-attributes included) satisfies it.
//! - Attributes flagged as errors are invisible to comparisons and
//!   existence tests.
//! - Comparing incompatible types (string literal against a port) is false.
//! - `!=` requires the attribute to be present; use `!field` to test for
//!   absence.
//!
//! # Example
//!
//! ```rust,ignore
//! use layerscope_core::filter::{compile, AliasTable};
//!
//! let predicate = compile("udp.src == 53 && udp.dst != 53", &AliasTable::new())?;
//! let dns_queries = frames.iter().filter(|f| predicate.matches(f));
//! ```

mod ast;
mod error;
mod parser;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use compact_str::{format_compact, CompactString};
use tracing::debug;

use crate::frame::Frame;
use crate::layer::{AttrValue, LayerTree};

pub use ast::{CmpOp, FilterExpr};
pub use error::FilterError;
pub use parser::parse_filter;

/// Short names for fully-qualified attribute identifiers.
///
/// An alias matches either a whole identifier (`sport` → `udp.src`) or its
/// first segment (`u.dst` with `u` → `udp` resolves to `udp.dst`).
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<CompactString, CompactString>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an alias.
    pub fn insert(
        &mut self,
        name: impl Into<CompactString>,
        field: impl Into<CompactString>,
    ) -> &mut Self {
        self.aliases.insert(name.into(), field.into());
        self
    }

    pub fn resolve(&self, field: &str) -> CompactString {
        if let Some(target) = self.aliases.get(field) {
            return target.clone();
        }
        if let Some((head, rest)) = field.split_once('.') {
            if let Some(target) = self.aliases.get(head) {
                return format_compact!("{target}.{rest}");
            }
        }
        CompactString::new(field)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// A compiled filter. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Predicate {
    expr: Arc<FilterExpr>,
    source: Arc<str>,
}

impl Predicate {
    /// The expression after alias resolution.
    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    /// The text the predicate was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        self.matches_tree(frame.layers())
    }

    pub fn matches_tree(&self, tree: &LayerTree) -> bool {
        eval(&self.expr, tree)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("source", &self.source)
            .field("expr", &self.expr.to_string())
            .finish()
    }
}

/// Compile `expression`, resolving field names through `aliases`.
pub fn compile(expression: &str, aliases: &AliasTable) -> Result<Predicate, FilterError> {
    let mut expr = parse_filter(expression)?;
    if !aliases.is_empty() {
        expr = expr.map_fields(&|field| aliases.resolve(field));
    }
    debug!(filter = %expr, "filter compiled");

    Ok(Predicate {
        expr: Arc::new(expr),
        source: Arc::from(expression),
    })
}

fn eval(expr: &FilterExpr, tree: &LayerTree) -> bool {
    match expr {
        FilterExpr::Const(b) => *b,
        FilterExpr::Exists(field) => {
            values(tree, field).next().is_some()
                || tree
                    .layers()
                    .iter()
                    .any(|l| l.token().is_some_and(|t| t.as_str() == field.as_str()))
        }
        FilterExpr::Compare { field, op, value } => {
            values(tree, field).any(|actual| satisfies(actual, *op, value))
        }
        FilterExpr::Tag(tag) => tree.layers().iter().any(|l| l.has_tag(tag)),
        FilterExpr::Path(pattern) => tree.layers().iter().any(|l| pattern.matches(l.path())),
        FilterExpr::Not(inner) => !eval(inner, tree),
        FilterExpr::And(left, right) => eval(left, tree) && eval(right, tree),
        FilterExpr::Or(left, right) => eval(left, tree) || eval(right, tree),
    }
}

/// Values of every error-free attribute named `field`.
fn values<'a>(tree: &'a LayerTree, field: &'a str) -> impl Iterator<Item = &'a AttrValue> + 'a {
    tree.attributes()
        .filter(move |a| !a.error && a.id.as_str() == field)
        .map(|a| &a.value)
}

fn satisfies(actual: &AttrValue, op: CmpOp, expected: &AttrValue) -> bool {
    let Some(ord) = actual.compare(expected) else {
        return false;
    };
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}
