//! Error types for filter compilation.

use thiserror::Error;

/// Errors reported while compiling a filter. Offsets are byte offsets into
/// the expression text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    /// Empty filter
    #[error("Empty filter expression")]
    Empty,

    /// Unexpected token or trailing input
    #[error("Syntax error at offset {offset}: unexpected {fragment}")]
    Syntax { offset: usize, fragment: String },

    /// A literal that could not be converted to a value
    #[error("Invalid literal at offset {offset}: {fragment}")]
    Literal { offset: usize, fragment: String },

    /// A `path("...")` argument that is not a valid pattern
    #[error("Invalid path pattern at offset {offset}: {fragment}")]
    Pattern { offset: usize, fragment: String },
}

impl FilterError {
    /// Byte offset of the offending fragment, if any.
    pub fn offset(&self) -> Option<usize> {
        match self {
            FilterError::Empty => None,
            FilterError::Syntax { offset, .. }
            | FilterError::Literal { offset, .. }
            | FilterError::Pattern { offset, .. } => Some(*offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FilterError::Syntax {
            offset: 8,
            fragment: "'=='".to_string(),
        };
        assert_eq!(err.to_string(), "Syntax error at offset 8: unexpected '=='");
        assert_eq!(err.offset(), Some(8));
        assert_eq!(FilterError::Empty.to_string(), "Empty filter expression");
    }
}
