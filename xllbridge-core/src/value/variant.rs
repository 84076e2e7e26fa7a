//! Variant Implementation
//!
//! A [`Variant`] holds one host cell value: empty, a number, text, an error,
//! a 2-D array of child variants, or a cell reference that has not been
//! read yet.
//!
//! # Lazy references
//!
//! A reference keeps the `CellReference` kind until [`Variant::resolve`]
//! asks the host to coerce it. Resolution tries a number first and text
//! second, because a numeric cell can always be read back as text but the
//! reverse is not reliable. The coerced host value is cached next to the
//! converted payload, and the `is_*` predicates consult both.
//!
//! # Ownership
//!
//! Array elements are owned by value in one flat row-major `Vec`, so
//! `clone()` is a deep copy and dropping a variant drops the whole tree.
//! `std::mem::take` (or [`Variant::take`]) moves the value out and leaves
//! `Empty` behind.

use std::fmt;

use tracing::{debug, warn};

use super::codec;
use crate::error::XlError;
use crate::host::xlcall::{self, XLOPER12};
use crate::host::{CellRef, CoerceTarget, Host, RawValue};

/// Discriminant of a [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantKind {
    #[default]
    Empty,
    Number,
    Text,
    Error,
    Array,
    /// A reference that has not been resolved yet.
    CellReference,
}

/// One host cell value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variant {
    kind: VariantKind,
    number: f64,
    text: String,
    /// Host error code, meaningful when `kind` is `Error`.
    error: i32,
    /// Declared row count. The column count is derived from the length.
    rows: usize,
    items: Vec<Variant>,
    reference: Option<CellRef>,
    /// Host value obtained when the reference was coerced.
    resolved: Option<Box<RawValue>>,
    /// Code returned by the last failed host call.
    last_error: i32,
}

impl Variant {
    /// An empty value.
    pub fn new() -> Self {
        Self::default()
    }

    /// A number.
    pub fn number(value: f64) -> Self {
        Self {
            kind: VariantKind::Number,
            number: value,
            ..Self::default()
        }
    }

    /// A text value.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: VariantKind::Text,
            text: value.into(),
            ..Self::default()
        }
    }

    /// One of the known cell errors.
    pub fn error(err: XlError) -> Self {
        Self::error_code(err.code())
    }

    /// An error from a raw host code, known or not.
    pub fn error_code(code: i32) -> Self {
        Self {
            kind: VariantKind::Error,
            error: code,
            ..Self::default()
        }
    }

    /// A 1×N array.
    pub fn list(items: Vec<Variant>) -> Self {
        Self {
            kind: VariantKind::Array,
            rows: 1,
            items,
            ..Self::default()
        }
    }

    /// An R×C array. Short rows are padded with empty values.
    pub fn matrix(rows: Vec<Vec<Variant>>) -> Self {
        let mut value = Self {
            kind: VariantKind::Array,
            ..Self::default()
        };
        value.fill_matrix(rows);
        value
    }

    /// A reference that will be read on [`resolve`](Self::resolve).
    pub fn reference(reference: CellRef) -> Self {
        Self {
            kind: VariantKind::CellReference,
            reference: Some(reference),
            ..Self::default()
        }
    }

    /// Wrap a raw host value. References are resolved immediately; array
    /// elements are wrapped recursively.
    pub fn from_raw(raw: &RawValue, host: &dyn Host) -> Self {
        match raw {
            RawValue::Nil | RawValue::Missing => Self::new(),
            RawValue::Number(n) => Self::number(*n),
            RawValue::Int(_) | RawValue::Bool(_) => {
                Self::number(raw.as_number().unwrap_or_default())
            }
            RawValue::Text(s) => Self::text(s.clone()),
            RawValue::Error(code) => Self::error_code(*code),
            RawValue::Multi { rows, items, .. } => Self {
                kind: VariantKind::Array,
                rows: *rows,
                items: items.iter().map(|item| Self::from_raw(item, host)).collect(),
                ..Self::default()
            },
            RawValue::Ref(reference) => {
                let mut value = Self::reference(*reference);
                value.resolve(host);
                value
            }
        }
    }

    /// Wrap a host-owned raw value.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawValue::from_xloper`].
    pub unsafe fn from_xloper(op: *const XLOPER12, host: &dyn Host) -> Self {
        Self::from_raw(&RawValue::from_xloper(op), host)
    }

    /// Call a built-in host function with variant arguments.
    ///
    /// A rejected call yields `#VALUE!`, with the host's return code in
    /// [`last_error`](Self::last_error).
    pub fn call_function(host: &dyn Host, function: i32, args: &[Variant]) -> Self {
        let raw_args: Vec<RawValue> = args.iter().map(Variant::to_raw).collect();
        match host.call_function(function, &raw_args) {
            Ok(raw) => Self::from_raw(&raw, host),
            Err(code) => {
                debug!(function, code, "host function call failed");
                Self::failed_call(code)
            }
        }
    }

    /// Evaluate an expression through the host, `#VALUE!` if it is rejected.
    pub fn evaluate(host: &dyn Host, expression: &str) -> Self {
        match host.evaluate(expression) {
            Ok(raw) => Self::from_raw(&raw, host),
            Err(code) => {
                debug!(expression, code, "evaluation failed");
                Self::failed_call(code)
            }
        }
    }

    fn failed_call(code: i32) -> Self {
        let mut value = Self::new();
        value.fail(code, XlError::Value.code());
        value
    }

    /// Read an unresolved reference through the host.
    ///
    /// Returns `false` when the value ends up as an error. Values that are
    /// not references are left alone.
    pub fn resolve(&mut self, host: &dyn Host) -> bool {
        let reference = match (self.kind, self.reference) {
            (VariantKind::CellReference, Some(reference)) => reference,
            _ => return self.kind != VariantKind::Error,
        };

        if let Some(caller) = host.caller() {
            if reference.contains(caller.first_row, caller.first_col) {
                warn!(%reference, %caller, "reference contains the calling cell");
                self.fail(XlError::Ref.code(), XlError::Ref.code());
                return false;
            }
        }

        if !reference.is_single_cell() {
            return match host.coerce(&reference, CoerceTarget::Array) {
                Ok(RawValue::Multi { rows, items, .. }) if !items.is_empty() => {
                    let items = items.iter().map(|item| Self::from_raw(item, host)).collect();
                    self.kind = VariantKind::Array;
                    self.rows = rows;
                    self.items = items;
                    true
                }
                Ok(other) => {
                    debug!(%reference, got = other.type_name(), "range did not coerce to an array");
                    self.fail(xlcall::xlretFailed, XlError::Ref.code());
                    false
                }
                Err(code) => {
                    debug!(%reference, code, "range coercion failed");
                    self.fail(code, XlError::Ref.code());
                    false
                }
            };
        }

        // Number first: a numeric cell can always be re-read as text.
        match host.coerce(&reference, CoerceTarget::Number) {
            Ok(raw) => {
                if let Some(n) = raw.as_number() {
                    self.kind = VariantKind::Number;
                    self.number = n;
                    self.resolved = Some(Box::new(raw));
                    return true;
                }
                if let RawValue::Error(code) = raw {
                    self.kind = VariantKind::Error;
                    self.error = code;
                    self.resolved = Some(Box::new(raw));
                    return false;
                }
            }
            Err(code) => self.last_error = code,
        }

        match host.coerce(&reference, CoerceTarget::Text) {
            Ok(RawValue::Text(text)) => {
                self.kind = VariantKind::Text;
                self.text = text.clone();
                self.resolved = Some(Box::new(RawValue::Text(text)));
                true
            }
            Ok(RawValue::Error(code)) => {
                self.fail(code, code);
                false
            }
            Ok(other) => {
                debug!(%reference, got = other.type_name(), "cell did not coerce to text");
                self.fail(xlcall::xlretFailed, XlError::Value.code());
                false
            }
            Err(code) => {
                debug!(%reference, code, "cell coercion failed");
                let shown = if XlError::from_code(code).is_some() {
                    code
                } else {
                    XlError::Value.code()
                };
                self.fail(code, shown);
                false
            }
        }
    }

    fn fail(&mut self, host_code: i32, error: i32) {
        self.reset();
        self.kind = VariantKind::Error;
        self.error = error;
        self.last_error = host_code;
    }

    /// Drop every payload, keeping only the last error code.
    fn reset(&mut self) {
        self.number = 0.0;
        self.text.clear();
        self.error = 0;
        self.rows = 0;
        self.items.clear();
        self.reference = None;
        self.resolved = None;
    }

    fn fill_matrix(&mut self, rows: Vec<Vec<Variant>>) {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        self.rows = rows.len();
        self.items = Vec::with_capacity(self.rows * width);
        for row in rows {
            let n = row.len();
            self.items.extend(row);
            self.items.extend((n..width).map(|_| Variant::new()));
        }
    }

    /// Replace the content with a number.
    pub fn set_number(&mut self, value: f64) -> &mut Self {
        self.reset();
        self.kind = VariantKind::Number;
        self.number = value;
        self
    }

    /// Replace the content with text.
    pub fn set_text(&mut self, value: impl Into<String>) -> &mut Self {
        self.reset();
        self.kind = VariantKind::Text;
        self.text = value.into();
        self
    }

    /// Replace the content with a cell error.
    pub fn set_error(&mut self, err: XlError) -> &mut Self {
        self.reset();
        self.kind = VariantKind::Error;
        self.error = err.code();
        self
    }

    /// Replace the content with a 1×N array. An empty list is ignored.
    pub fn set_list(&mut self, items: Vec<Variant>) -> &mut Self {
        if items.is_empty() {
            return self;
        }
        self.reset();
        self.kind = VariantKind::Array;
        self.rows = 1;
        self.items = items;
        self
    }

    /// Replace the content with an R×C array. An empty matrix is ignored.
    pub fn set_matrix(&mut self, rows: Vec<Vec<Variant>>) -> &mut Self {
        if rows.is_empty() {
            return self;
        }
        self.reset();
        self.kind = VariantKind::Array;
        self.fill_matrix(rows);
        self
    }

    /// Move the value out, leaving `Empty` behind.
    pub fn take(&mut self) -> Variant {
        std::mem::take(self)
    }

    /// Which payload is meaningful.
    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    /// The number payload, 0 for anything that is not a number.
    pub fn as_number(&self) -> f64 {
        self.number
    }

    /// The text payload, empty for anything that is not text.
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// The error carried by an `Error` value, if it is a known one.
    pub fn as_error(&self) -> Option<XlError> {
        match self.kind {
            VariantKind::Error => XlError::from_code(self.error),
            _ => None,
        }
    }

    /// Raw error code of an `Error` value.
    pub fn error_code_value(&self) -> Option<i32> {
        (self.kind == VariantKind::Error).then_some(self.error)
    }

    /// Code returned by the last failed host call, 0 if none failed.
    pub fn last_error(&self) -> i32 {
        self.last_error
    }

    /// The reference this value was built from, kept after resolution.
    pub fn cell_reference(&self) -> Option<&CellRef> {
        self.reference.as_ref()
    }

    /// True for a value with no content.
    pub fn is_empty(&self) -> bool {
        self.kind == VariantKind::Empty
    }

    /// True for an error value.
    pub fn is_error(&self) -> bool {
        self.kind == VariantKind::Error
    }

    /// True for a reference that has not been resolved.
    pub fn is_reference(&self) -> bool {
        self.kind == VariantKind::CellReference
    }

    /// True for a number, for any value left holding a nonzero number, and
    /// for a reference the host read as a number.
    pub fn is_number(&self) -> bool {
        self.number != 0.0
            || self.kind == VariantKind::Number
            || self
                .resolved
                .as_deref()
                .is_some_and(|raw| raw.as_number().is_some())
    }

    /// True for text, and also for any non-empty array: older call paths
    /// read an array as "has text".
    pub fn is_text(&self) -> bool {
        !self.items.is_empty()
            || self.kind == VariantKind::Text
            || matches!(self.resolved.as_deref(), Some(RawValue::Text(_)))
    }

    /// True for an array, and for a reference spanning more than one cell.
    pub fn is_array(&self) -> bool {
        if !self.items.is_empty() || self.kind == VariantKind::Array {
            return true;
        }
        match (self.kind, &self.reference) {
            (VariantKind::CellReference, Some(reference)) => reference.cell_count() > 1,
            _ => false,
        }
    }

    /// Effective `(rows, cols)`. A row count that is unset or does not
    /// divide the element count collapses the array to a single row.
    pub fn shape(&self) -> (usize, usize) {
        let n = self.items.len();
        if n == 0 {
            return (0, 0);
        }
        let rows = if self.rows == 0 || n % self.rows != 0 {
            1
        } else {
            self.rows
        };
        (rows, n / rows)
    }

    /// Effective row count.
    pub fn rows(&self) -> usize {
        self.shape().0
    }

    /// Effective column count.
    pub fn cols(&self) -> usize {
        self.shape().1
    }

    /// Number of array elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Element at a 0-based row-major index.
    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.items.get(index)
    }

    /// Mutable element at a 0-based row-major index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Variant> {
        self.items.get_mut(index)
    }

    /// Element at a 1-based `(row, col)`; indices are clamped to the shape.
    pub fn at(&self, row: usize, col: usize) -> Option<&Variant> {
        let (rows, cols) = self.shape();
        if rows == 0 {
            return None;
        }
        let r = row.clamp(1, rows);
        let c = col.clamp(1, cols);
        self.items.get((r - 1) * cols + (c - 1))
    }

    /// Elements in row-major order.
    pub fn iter(&self) -> std::slice::Iter<'_, Variant> {
        self.items.iter()
    }

    /// Append an element. A non-array value first becomes a one-element
    /// list holding its current content, so nothing is lost.
    pub fn push_back(&mut self, value: impl Into<Variant>) -> &mut Self {
        if self.kind != VariantKind::Array {
            let current = self.take();
            self.set_list(vec![current]);
        }
        if self.rows <= 1 {
            self.rows = 1;
        }
        self.items.push(value.into());
        self
    }

    fn cell_text(&self) -> String {
        if self.is_number() {
            format_number(self.number)
        } else if self.is_text() {
            self.text.clone()
        } else {
            String::new()
        }
    }

    /// Turn an array into one `Text` value using the matrix codec.
    /// Anything else is left unchanged.
    pub fn serialize(&mut self) -> &mut Self {
        if !self.is_array() || self.items.is_empty() {
            return self;
        }
        let (_, cols) = self.shape();
        let matrix: codec::Matrix = self
            .items
            .chunks(cols)
            .map(|row| row.iter().map(Variant::cell_text).collect())
            .collect();
        let encoded = codec::encode(&matrix);
        if encoded.is_empty() {
            return self;
        }
        self.set_text(encoded)
    }

    /// Turn codec text back into an array of text cells. Anything that is
    /// not non-empty text is left unchanged.
    pub fn deserialize(&mut self) -> &mut Self {
        if !self.is_text() || self.text.is_empty() {
            return self;
        }
        let matrix = codec::decode(&self.text);
        if matrix.is_empty() {
            return self;
        }
        let rows = matrix
            .into_iter()
            .map(|row| row.into_iter().map(Variant::text).collect())
            .collect();
        self.reset();
        self.kind = VariantKind::Array;
        self.fill_matrix(rows);
        self
    }

    /// The single string used when this value travels as an RTD parameter
    /// or as a topic value.
    pub fn topic_text(&self) -> String {
        if self.is_array() {
            let mut copy = self.clone();
            copy.serialize();
            return copy.text;
        }
        if self.is_text() {
            return self.text.clone();
        }
        if self.is_number() {
            return format_number(self.number);
        }
        match self.kind {
            VariantKind::Error => RawValue::Error(self.error).to_string(),
            _ => String::new(),
        }
    }

    /// Safe host form of this value.
    pub fn to_raw(&self) -> RawValue {
        if self.is_array() {
            if self.items.is_empty() {
                return RawValue::Nil;
            }
            let (rows, cols) = self.shape();
            return RawValue::Multi {
                rows,
                cols,
                items: self.items.iter().map(Variant::to_raw).collect(),
            };
        }
        if self.is_text() {
            return RawValue::Text(self.text.clone());
        }
        if self.is_number() {
            return RawValue::Number(self.number);
        }
        match (self.kind, self.reference) {
            (VariantKind::Error, _) => RawValue::Error(self.error),
            (VariantKind::CellReference, Some(reference)) => RawValue::Ref(reference),
            _ => RawValue::Nil,
        }
    }

    /// Build a host-owned copy of this value for returning from a
    /// worksheet function. The host frees it through `xlAutoFree12`.
    pub fn into_host_return(&self) -> *mut XLOPER12 {
        xlcall::into_host_return(self.to_raw())
    }
}

/// Shortest text that reads back as the same number; integral values have
/// no decimal point.
///
/// Magnitudes of 1e16 and up, or below 1e-5, use exponent notation so the
/// text never carries padding zeros.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.abs().log10().floor();
    if exponent.is_finite() && !(-5.0..16.0).contains(&exponent) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

impl<'a> IntoIterator for &'a Variant {
    type Item = &'a Variant;
    type IntoIter = std::slice::Iter<'a, Variant>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::number(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::number(value as f64)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::text(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::text(value)
    }
}

impl From<XlError> for Variant {
    fn from(err: XlError) -> Self {
        Variant::error(err)
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(items: Vec<Variant>) -> Self {
        Variant::list(items)
    }
}

impl From<Vec<Vec<Variant>>> for Variant {
    fn from(rows: Vec<Vec<Variant>>) -> Self {
        Variant::matrix(rows)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VariantKind::Array => {
                let (rows, cols) = self.shape();
                write!(f, "{{{rows}x{cols}}}")
            }
            VariantKind::CellReference => match &self.reference {
                Some(reference) => write!(f, "{reference}"),
                None => Ok(()),
            },
            _ => f.write_str(&self.topic_text()),
        }
    }
}
