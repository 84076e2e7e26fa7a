//! Owned form of a raw host value.

use std::fmt;

use super::CellRef;

/// A host cell value copied out of (or about to be copied into) the host's
/// own structure. Each variant corresponds to one raw type tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawValue {
    /// No value at all.
    #[default]
    Nil,
    /// An argument the caller omitted.
    Missing,
    Number(f64),
    Int(i32),
    Bool(bool),
    Text(String),
    /// Host error code (see [`XlError`](crate::XlError)).
    Error(i32),
    /// Row-major array of scalar values.
    Multi {
        rows: usize,
        cols: usize,
        items: Vec<RawValue>,
    },
    /// A cell or a rectangular range, not yet coerced.
    Ref(CellRef),
}

impl RawValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Nil => "nil",
            RawValue::Missing => "missing",
            RawValue::Number(_) => "number",
            RawValue::Int(_) => "int",
            RawValue::Bool(_) => "bool",
            RawValue::Text(_) => "text",
            RawValue::Error(_) => "error",
            RawValue::Multi { .. } => "multi",
            RawValue::Ref(_) => "ref",
        }
    }

    /// Numeric payload for the tags the host treats as numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n),
            RawValue::Int(i) => Some(*i as f64),
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Build a row-major array; fails if the shape does not match.
    pub fn multi(rows: usize, cols: usize, items: Vec<RawValue>) -> Option<Self> {
        (rows * cols == items.len()).then_some(RawValue::Multi { rows, cols, items })
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Nil | RawValue::Missing => Ok(()),
            RawValue::Number(n) => write!(f, "{n}"),
            RawValue::Int(i) => write!(f, "{i}"),
            RawValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            RawValue::Text(s) => f.write_str(s),
            RawValue::Error(code) => match crate::XlError::from_code(*code) {
                Some(err) => write!(f, "{err}"),
                None => write!(f, "#ERR{code}"),
            },
            RawValue::Multi { rows, cols, .. } => write!(f, "{{{rows}x{cols}}}"),
            RawValue::Ref(r) => write!(f, "{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_tags() {
        assert_eq!(RawValue::Number(1.5).as_number(), Some(1.5));
        assert_eq!(RawValue::Int(3).as_number(), Some(3.0));
        assert_eq!(RawValue::Bool(true).as_number(), Some(1.0));
        assert_eq!(RawValue::Text("1".into()).as_number(), None);
    }

    #[test]
    fn multi_checks_shape() {
        assert!(RawValue::multi(1, 2, vec![RawValue::Nil, RawValue::Nil]).is_some());
        assert!(RawValue::multi(2, 2, vec![RawValue::Nil]).is_none());
    }

    #[test]
    fn display() {
        assert_eq!(RawValue::Error(23).to_string(), "#REF!");
        assert_eq!(RawValue::Bool(false).to_string(), "FALSE");
        assert_eq!(RawValue::Number(3.0).to_string(), "3");
    }
}
