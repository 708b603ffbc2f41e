//! AST types for filter expressions.

use std::fmt;

use compact_str::CompactString;

use crate::layer::{AttrValue, PathPattern};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// `true` / `false`
    Const(bool),
    /// Bare field or layer token: `udp`, `tcp.flags`
    Exists(CompactString),
    /// `field op literal`
    Compare {
        field: CompactString,
        op: CmpOp,
        value: AttrValue,
    },
    /// `tag("name")`
    Tag(CompactString),
    /// `path("pattern")`
    Path(PathPattern),
    /// Logical NOT
    Not(Box<FilterExpr>),
    /// Logical AND
    And(Box<FilterExpr>, Box<FilterExpr>),
    /// Logical OR
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl FilterExpr {
    pub fn negate(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }

    pub fn and(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::Or(Box::new(left), Box::new(right))
    }

    /// Rewrite every field reference with `f`.
    pub fn map_fields(self, f: &impl Fn(&str) -> CompactString) -> Self {
        match self {
            FilterExpr::Exists(field) => FilterExpr::Exists(f(&field)),
            FilterExpr::Compare { field, op, value } => FilterExpr::Compare {
                field: f(&field),
                op,
                value,
            },
            FilterExpr::Not(e) => FilterExpr::negate(e.map_fields(f)),
            FilterExpr::And(l, r) => FilterExpr::and(l.map_fields(f), r.map_fields(f)),
            FilterExpr::Or(l, r) => FilterExpr::or(l.map_fields(f), r.map_fields(f)),
            other => other,
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Const(b) => write!(f, "{b}"),
            FilterExpr::Exists(field) => f.write_str(field),
            FilterExpr::Compare { field, op, value } => write!(f, "{field} {op} {value}"),
            FilterExpr::Tag(tag) => write!(f, "tag({tag:?})"),
            FilterExpr::Path(pattern) => write!(f, "path(\"{pattern}\")"),
            FilterExpr::Not(e) => write!(f, "!({e})"),
            FilterExpr::And(l, r) => write!(f, "({l} && {r})"),
            FilterExpr::Or(l, r) => write!(f, "({l} || {r})"),
        }
    }
}
