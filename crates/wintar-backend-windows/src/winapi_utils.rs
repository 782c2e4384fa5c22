//! Low-level Windows API utilities.
//!
//! Handle ownership and string conversion shared by the file accessor and
//! the privilege guard.

use crate::error::WinError;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};

/// RAII wrapper for Windows HANDLE.
///
/// Automatically closes the handle when dropped.
pub struct SafeHandle(HANDLE);

impl SafeHandle {
    /// Wrap a handle returned by `function`, failing if it is invalid.
    pub fn new(handle: HANDLE, function: &str) -> Result<Self, WinError> {
        if handle == INVALID_HANDLE_VALUE || handle.0.is_null() {
            Err(WinError::from_win32(function))
        } else {
            Ok(SafeHandle(handle))
        }
    }

    /// Get the raw handle value.
    pub fn as_raw(&self) -> HANDLE {
        self.0
    }

    fn is_valid(&self) -> bool {
        self.0 != INVALID_HANDLE_VALUE && !self.0 .0.is_null()
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        if self.is_valid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// Convert a Rust string to a null-terminated wide string (UTF-16).
pub fn to_wide_string(s: &str) -> Vec<u16> {
    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Convert a path to a null-terminated wide string.
// TODO: prefix absolute paths with `\\?\` so trees deeper than MAX_PATH open.
pub fn path_to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wide_string() {
        let wide = to_wide_string("Hello");
        assert_eq!(wide, vec![72, 101, 108, 108, 111, 0]);
    }

    #[test]
    fn test_path_to_wide() {
        let wide = path_to_wide(Path::new("C:\\a"));
        assert_eq!(wide, vec![67, 58, 92, 97, 0]);
    }
}
