//! Symbols exported from the add-in DLL.

use crate::host::xlcall::{self, XLOPER12};

/// Called by the host to release a value returned with the
/// `xlbitDLLFree` bit set.
///
/// # Safety
///
/// `op` must be null or a pointer this crate returned through
/// [`xlcall::into_host_return`] that the host has not handed back before.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn xlAutoFree12(op: *mut XLOPER12) {
    xlcall::free_host_return(op);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RawValue;

    #[test]
    fn frees_a_returned_array() {
        let op = xlcall::into_host_return(RawValue::Multi {
            rows: 1,
            cols: 2,
            items: vec![RawValue::Text("a".into()), RawValue::Number(1.0)],
        });
        unsafe { xlAutoFree12(op) };
        unsafe { xlAutoFree12(std::ptr::null_mut()) };
    }
}
