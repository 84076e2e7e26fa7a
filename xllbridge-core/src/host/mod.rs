//! Host Boundary
//!
//! Everything the add-in needs from the spreadsheet host goes through this
//! module.
//!
//! # Layers
//!
//! - [`xlcall`]: `#[repr(C)]` definitions of the host's raw cell value and
//!   the allocation rules for values handed back to the host. This is the
//!   only place that knows the wire layout.
//! - [`RawValue`]: an owned, safe mirror of the raw value. Conversions in
//!   the rest of the crate work on this type.
//! - [`Host`]: the services the host provides at runtime (coercing a cell
//!   reference, locating the calling cell, calling built-in functions such
//!   as RTD, evaluating expressions, registering callable functions).
//!
//! Keeping the layout in one file means the variant type, the RTD server
//! and the registries never touch a raw pointer.

pub mod xlcall;
mod raw;

pub use raw::RawValue;

use std::fmt;

use crate::udf::Registration;

/// A cell or rectangular range, with 0-based inclusive bounds.
///
/// `sheet` is `None` for references on the calling sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub sheet: Option<isize>,
    pub first_row: i32,
    pub last_row: i32,
    pub first_col: i32,
    pub last_col: i32,
}

impl CellRef {
    /// A single cell.
    pub fn cell(row: i32, col: i32) -> Self {
        Self::range(row, col, row, col)
    }

    /// A range from `(first_row, first_col)` to `(last_row, last_col)`.
    pub fn range(first_row: i32, first_col: i32, last_row: i32, last_col: i32) -> Self {
        Self {
            sheet: None,
            first_row,
            last_row,
            first_col,
            last_col,
        }
    }

    /// The same span on an explicit sheet.
    pub fn on_sheet(mut self, sheet: isize) -> Self {
        self.sheet = Some(sheet);
        self
    }

    pub fn rows(&self) -> usize {
        (self.last_row - self.first_row + 1).max(0) as usize
    }

    pub fn cols(&self) -> usize {
        (self.last_col - self.first_col + 1).max(0) as usize
    }

    pub fn cell_count(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_single_cell(&self) -> bool {
        self.cell_count() == 1
    }

    /// Whether `(row, col)` lies inside the span. The sheet is not compared.
    pub fn contains(&self, row: i32, col: i32) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}C{}", self.first_row + 1, self.first_col + 1)?;
        if !self.is_single_cell() {
            write!(f, ":R{}C{}", self.last_row + 1, self.last_col + 1)?;
        }
        Ok(())
    }
}

/// Shape requested when coercing a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceTarget {
    Number,
    Text,
    Array,
}

/// Services provided by the spreadsheet host.
///
/// Failures carry the host's own return or error code.
pub trait Host {
    /// Read the value(s) behind a reference in the requested shape.
    fn coerce(&self, reference: &CellRef, target: CoerceTarget) -> Result<RawValue, i32>;

    /// Location of the cell whose formula is currently executing.
    fn caller(&self) -> Option<CellRef>;

    /// Evaluate the host's RTD worksheet function.
    fn call_rtd(&self, prog_id: &str, server: &str, topics: &[String]) -> Result<RawValue, i32> {
        let _ = (prog_id, server, topics);
        Err(xlcall::xlretFailed)
    }

    /// Call a built-in function by number (see the `xlf*` constants in
    /// [`xlcall`]).
    fn call_function(&self, function: i32, args: &[RawValue]) -> Result<RawValue, i32> {
        let _ = (function, args);
        Err(xlcall::xlretFailed)
    }

    /// Evaluate an expression such as `SUM(A1:A5)`, written without the
    /// leading `=`. The answer is a snapshot and does not track the cells.
    fn evaluate(&self, expression: &str) -> Result<RawValue, i32> {
        self.call_function(xlcall::xlfEvaluate, &[RawValue::Text(expression.to_string())])
    }

    /// Make a callable function known to the host.
    fn register_function(&self, registration: &Registration) -> Result<(), i32> {
        let _ = registration;
        Ok(())
    }

    /// Withdraw a callable function registered earlier.
    fn unregister_function(&self, register_name: &str) -> Result<(), i32> {
        let _ = register_name;
        Ok(())
    }
}

/// Stand-in used when no host is attached: there is no caller and every
/// coercion fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl Host for DetachedHost {
    fn coerce(&self, _reference: &CellRef, _target: CoerceTarget) -> Result<RawValue, i32> {
        Err(xlcall::xlretFailed)
    }

    fn caller(&self) -> Option<CellRef> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_arithmetic() {
        let r = CellRef::range(0, 0, 2, 1);
        assert_eq!(r.rows(), 3);
        assert_eq!(r.cols(), 2);
        assert_eq!(r.cell_count(), 6);
        assert!(!r.is_single_cell());
        assert!(CellRef::cell(4, 4).is_single_cell());
    }

    #[test]
    fn containment_is_inclusive() {
        let r = CellRef::range(1, 1, 3, 3);
        assert!(r.contains(1, 1));
        assert!(r.contains(3, 3));
        assert!(!r.contains(0, 2));
        assert!(!r.contains(2, 4));
    }

    #[test]
    fn display_uses_one_based_r1c1() {
        assert_eq!(CellRef::cell(0, 0).to_string(), "R1C1");
        assert_eq!(CellRef::range(0, 0, 1, 2).to_string(), "R1C1:R2C3");
    }

    #[test]
    fn detached_host_refuses_everything() {
        let host = DetachedHost;
        assert!(host.caller().is_none());
        assert_eq!(
            host.coerce(&CellRef::cell(0, 0), CoerceTarget::Number),
            Err(xlcall::xlretFailed)
        );
        assert!(host.call_rtd("p", "", &[]).is_err());
        assert_eq!(
            host.call_function(xlcall::xlfAbs, &[RawValue::Number(-1.0)]),
            Err(xlcall::xlretFailed)
        );
        assert!(host.evaluate("SUM(A1:A5)").is_err());
    }
}
