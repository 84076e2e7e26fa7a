//! Raw host ABI.
//!
//! `#[repr(C)]` mirrors of the host's cell-value structure and the only
//! unsafe code in the crate. Values coming from the host are copied out into
//! an owned [`RawValue`] tree; values going back are built into heap trees
//! marked with [`xlbitDLLFree`] and are released exclusively by
//! [`free_host_return`] once the host hands them back through
//! `xlAutoFree12`.

#![allow(non_upper_case_globals)]

use std::ptr;

use super::raw::RawValue;
use super::{CellRef, CoerceTarget};

pub const xltypeNum: u32 = 0x0001;
pub const xltypeStr: u32 = 0x0002;
pub const xltypeBool: u32 = 0x0004;
pub const xltypeRef: u32 = 0x0008;
pub const xltypeErr: u32 = 0x0010;
pub const xltypeFlow: u32 = 0x0020;
pub const xltypeMulti: u32 = 0x0040;
pub const xltypeMissing: u32 = 0x0080;
pub const xltypeNil: u32 = 0x0100;
pub const xltypeSRef: u32 = 0x0400;
pub const xltypeInt: u32 = 0x0800;

/// The host owns the memory and frees it after the call.
pub const xlbitXLFree: u32 = 0x1000;
/// The add-in owns the memory; the host calls `xlAutoFree12` when done.
pub const xlbitDLLFree: u32 = 0x4000;

const TYPE_MASK: u32 = !(xlbitXLFree | xlbitDLLFree);

pub const xlretSuccess: i32 = 0;
pub const xlretAbort: i32 = 1;
pub const xlretInvXlfn: i32 = 2;
pub const xlretInvCount: i32 = 4;
pub const xlretInvXloper: i32 = 8;
pub const xlretStackOvfl: i32 = 16;
pub const xlretFailed: i32 = 32;
pub const xlretUncalced: i32 = 64;

// Built-in function numbers accepted by `Host::call_function`.
pub const xlfSum: i32 = 4;
pub const xlfMin: i32 = 6;
pub const xlfAbs: i32 = 24;
pub const xlfLeft: i32 = 115;
pub const xlfEvaluate: i32 = 257;

/// Longest text the host accepts, in UTF-16 code units.
pub const MAX_TEXT_UNITS: usize = 32_767;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XLREF12 {
    pub rw_first: i32,
    pub rw_last: i32,
    pub col_first: i32,
    pub col_last: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XLMREF12 {
    pub count: u16,
    pub reftbl: [XLREF12; 1],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SRef12 {
    pub count: u16,
    pub reference: XLREF12,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MRef12 {
    pub lpmref: *mut XLMREF12,
    pub id_sheet: isize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Array12 {
    pub lparray: *mut XLOPER12,
    pub rows: i32,
    pub columns: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union XLOPER12Val {
    pub num: f64,
    pub str_: *mut u16,
    pub xbool: i32,
    pub err: i32,
    pub w: i32,
    pub sref: SRef12,
    pub mref: MRef12,
    pub array: Array12,
}

/// The host's tagged cell value.
#[repr(C)]
pub struct XLOPER12 {
    pub val: XLOPER12Val,
    pub xltype: u32,
}

impl XLOPER12 {
    fn with(xltype: u32, val: XLOPER12Val) -> Self {
        Self { val, xltype }
    }

    /// An empty value.
    pub fn nil() -> Self {
        Self::with(xltypeNil, XLOPER12Val { num: 0.0 })
    }

    /// Type tag without the ownership bits.
    pub fn base_type(&self) -> u32 {
        self.xltype & TYPE_MASK
    }
}

impl From<XLREF12> for CellRef {
    fn from(r: XLREF12) -> Self {
        CellRef::range(r.rw_first, r.col_first, r.rw_last, r.col_last)
    }
}

impl From<&CellRef> for XLREF12 {
    fn from(r: &CellRef) -> Self {
        XLREF12 {
            rw_first: r.first_row,
            rw_last: r.last_row,
            col_first: r.first_col,
            col_last: r.last_col,
        }
    }
}

impl CoerceTarget {
    /// Type tag the host's coercion call expects.
    pub fn type_tag(self) -> u32 {
        match self {
            CoerceTarget::Number => xltypeNum,
            CoerceTarget::Text => xltypeStr,
            CoerceTarget::Array => xltypeMulti,
        }
    }
}

/// Encode text in the host's counted form: one count unit, the data units,
/// then a terminator. Text beyond [`MAX_TEXT_UNITS`] is cut off.
pub fn encode_counted(text: &str) -> Vec<u16> {
    let mut buf = Vec::with_capacity(text.len() + 2);
    buf.push(0);
    buf.extend(text.encode_utf16().take(MAX_TEXT_UNITS));
    buf[0] = (buf.len() - 1) as u16;
    buf.push(0);
    buf
}

/// Decode a counted buffer produced by the host or by [`encode_counted`].
pub fn decode_counted(buf: &[u16]) -> String {
    match buf.split_first() {
        Some((&count, rest)) => {
            let n = (count as usize).min(rest.len());
            String::from_utf16_lossy(&rest[..n])
        }
        None => String::new(),
    }
}

impl RawValue {
    /// Copy a host value into an owned tree.
    ///
    /// # Safety
    ///
    /// `op` must be null or point to a valid value whose payload pointers
    /// are valid for the duration of the call. Ownership is not taken.
    pub unsafe fn from_xloper(op: *const XLOPER12) -> RawValue {
        let Some(op) = op.as_ref() else {
            return RawValue::Missing;
        };
        match op.base_type() {
            xltypeNum => RawValue::Number(op.val.num),
            xltypeInt => RawValue::Int(op.val.w),
            xltypeBool => RawValue::Bool(op.val.xbool != 0),
            xltypeErr => RawValue::Error(op.val.err),
            xltypeStr => {
                let p = op.val.str_;
                if p.is_null() {
                    return RawValue::Text(String::new());
                }
                let count = *p as usize;
                RawValue::Text(decode_counted(std::slice::from_raw_parts(p, count + 1)))
            }
            xltypeMulti => {
                let array = op.val.array;
                let rows = array.rows.max(0) as usize;
                let cols = array.columns.max(0) as usize;
                if array.lparray.is_null() || rows * cols == 0 {
                    return RawValue::Multi { rows: 0, cols: 0, items: Vec::new() };
                }
                let items = std::slice::from_raw_parts(array.lparray, rows * cols)
                    .iter()
                    .map(|item| RawValue::from_xloper(item))
                    .collect();
                RawValue::Multi { rows, cols, items }
            }
            xltypeSRef => RawValue::Ref(CellRef::from(op.val.sref.reference)),
            xltypeRef => {
                let mref = op.val.mref;
                match mref.lpmref.as_ref() {
                    Some(table) if table.count > 0 => {
                        RawValue::Ref(CellRef::from(table.reftbl[0]).on_sheet(mref.id_sheet))
                    }
                    _ => RawValue::Error(crate::XlError::Ref.code()),
                }
            }
            xltypeMissing => RawValue::Missing,
            _ => RawValue::Nil,
        }
    }

    /// Build the host form of this value, allocating every payload.
    ///
    /// The result owns heap memory that only [`free_payload`] may release.
    pub fn into_xloper(self) -> XLOPER12 {
        match self {
            RawValue::Nil => XLOPER12::nil(),
            RawValue::Missing => XLOPER12::with(xltypeMissing, XLOPER12Val { num: 0.0 }),
            RawValue::Number(num) => XLOPER12::with(xltypeNum, XLOPER12Val { num }),
            RawValue::Int(w) => XLOPER12::with(xltypeInt, XLOPER12Val { w }),
            RawValue::Bool(b) => XLOPER12::with(xltypeBool, XLOPER12Val { xbool: b as i32 }),
            RawValue::Error(err) => XLOPER12::with(xltypeErr, XLOPER12Val { err }),
            RawValue::Text(text) => {
                let buf = encode_counted(&text).into_boxed_slice();
                let str_ = Box::into_raw(buf) as *mut u16;
                XLOPER12::with(xltypeStr, XLOPER12Val { str_ })
            }
            RawValue::Multi { rows, cols, items } => {
                if items.is_empty() || rows * cols != items.len() {
                    return XLOPER12::nil();
                }
                let elements: Box<[XLOPER12]> =
                    items.into_iter().map(RawValue::into_xloper).collect();
                let lparray = Box::into_raw(elements) as *mut XLOPER12;
                XLOPER12::with(
                    xltypeMulti,
                    XLOPER12Val {
                        array: Array12 { lparray, rows: rows as i32, columns: cols as i32 },
                    },
                )
            }
            RawValue::Ref(reference) => match reference.sheet {
                None => XLOPER12::with(
                    xltypeSRef,
                    XLOPER12Val {
                        sref: SRef12 { count: 1, reference: XLREF12::from(&reference) },
                    },
                ),
                Some(id_sheet) => {
                    let table = Box::new(XLMREF12 {
                        count: 1,
                        reftbl: [XLREF12::from(&reference)],
                    });
                    XLOPER12::with(
                        xltypeRef,
                        XLOPER12Val {
                            mref: MRef12 { lpmref: Box::into_raw(table), id_sheet },
                        },
                    )
                }
            },
        }
    }
}

/// Hand a value to the host. The returned tree is marked [`xlbitDLLFree`]
/// and must come back through [`free_host_return`]; nothing else frees it.
pub fn into_host_return(value: RawValue) -> *mut XLOPER12 {
    let mut op = value.into_xloper();
    op.xltype |= xlbitDLLFree;
    Box::into_raw(Box::new(op))
}

/// Release a tree created by [`into_host_return`].
///
/// # Safety
///
/// `op` must be null or a pointer obtained from [`into_host_return`] that
/// has not been freed yet.
pub unsafe fn free_host_return(op: *mut XLOPER12) {
    if op.is_null() {
        return;
    }
    let boxed = Box::from_raw(op);
    free_payload(&boxed);
}

/// Release the payload of a value built by [`RawValue::into_xloper`].
///
/// # Safety
///
/// `op` must have been produced by [`RawValue::into_xloper`] and its
/// payload must not have been released already.
pub unsafe fn free_payload(op: &XLOPER12) {
    match op.base_type() {
        xltypeStr => {
            let p = op.val.str_;
            if !p.is_null() {
                let len = *p as usize + 2;
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(p, len)));
            }
        }
        xltypeMulti => {
            let array = op.val.array;
            if !array.lparray.is_null() {
                let n = (array.rows.max(0) * array.columns.max(0)) as usize;
                let elements = Box::from_raw(ptr::slice_from_raw_parts_mut(array.lparray, n));
                for element in elements.iter() {
                    free_payload(element);
                }
            }
        }
        xltypeRef => {
            let lpmref = op.val.mref.lpmref;
            if !lpmref.is_null() {
                drop(Box::from_raw(lpmref));
            }
        }
        _ => {}
    }
}
