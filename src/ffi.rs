//! Helpers for reading C arguments.

use std::ffi::CStr;
use std::os::raw::c_char;

/// Copies a nullable C string, replacing invalid UTF-8.
///
/// # Safety
///
/// A non-null `value` must point to a NUL-terminated string that stays
/// valid for the duration of the call.
pub(crate) unsafe fn read_optional_cstr(value: *const c_char) -> Option<String> {
    if value.is_null() {
        return None;
    }
    // Safety: guaranteed by the caller.
    let cstr = unsafe { CStr::from_ptr(value) };
    Some(cstr.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::ptr;

    use super::*;

    #[test]
    fn null_is_absent() {
        assert_eq!(unsafe { read_optional_cstr(ptr::null()) }, None);
    }

    #[test]
    fn text_is_copied() {
        let text = CString::new("wirecall=debug").unwrap();
        assert_eq!(
            unsafe { read_optional_cstr(text.as_ptr()) }.as_deref(),
            Some("wirecall=debug")
        );
    }
}
