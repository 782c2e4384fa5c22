//! Error types for the Windows backend.

use std::io;
use std::path::Path;
use thiserror::Error;
use wintar_core::WintarError;

/// `ERROR_FILE_NOT_FOUND`
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
/// `ERROR_PATH_NOT_FOUND`
pub const ERROR_PATH_NOT_FOUND: u32 = 3;
/// `ERROR_ACCESS_DENIED`
pub const ERROR_ACCESS_DENIED: u32 = 5;
/// `ERROR_NOT_ALL_ASSIGNED`
pub const ERROR_NOT_ALL_ASSIGNED: u32 = 1300;

/// Errors specific to Windows backend operations.
#[derive(Error, Debug)]
pub enum WinError {
    /// Windows API error
    #[error("{function} failed with code {code}: {message}")]
    WinApi {
        function: String,
        code: u32,
        message: String,
    },

    /// The process token does not hold a requested privilege
    #[error("privilege {name} is not held by the process token")]
    PrivilegeNotHeld { name: String },

    /// Called on a platform without the backup APIs
    #[error("Windows backup APIs are only available on Windows")]
    Unsupported,
}

impl WinError {
    /// Create a WinAPI error from the last Windows error
    #[cfg(windows)]
    pub fn from_win32(function: &str) -> Self {
        use windows::Win32::Foundation::GetLastError;

        let code = unsafe { GetLastError().0 };
        Self::from_code(function, code)
    }

    /// Create a WinAPI error from a `windows` crate error
    #[cfg(windows)]
    pub fn from_error(function: &str, err: &windows::core::Error) -> Self {
        // HRESULT_FROM_WIN32 keeps the Win32 code in the low word.
        let hresult = err.code().0 as u32;
        let code = if hresult & 0xFFFF_0000 == 0x8007_0000 {
            hresult & 0xFFFF
        } else {
            hresult
        };
        Self::from_code(function, code)
    }

    pub fn from_code(function: &str, code: u32) -> Self {
        WinError::WinApi {
            function: function.to_string(),
            code,
            message: format_win32_error(code),
        }
    }

    /// The Win32 error code, if any
    pub fn code(&self) -> Option<u32> {
        match self {
            WinError::WinApi { code, .. } => Some(*code),
            WinError::PrivilegeNotHeld { .. } => Some(ERROR_NOT_ALL_ASSIGNED),
            WinError::Unsupported => None,
        }
    }

    /// Check if this error means the path does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code(),
            Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND)
        )
    }

    /// Attach the path the failing call was made on.
    ///
    /// Not-found codes become `WintarError::Missing`, everything else
    /// `WintarError::Access`.
    pub fn at(self, path: &Path) -> WintarError {
        if self.is_not_found() {
            return WintarError::Missing {
                path: path.to_path_buf(),
            };
        }
        let operation = match &self {
            WinError::WinApi { function, .. } => function.clone(),
            _ => "open".to_string(),
        };
        WintarError::access(path, operation, self.to_string())
    }

    /// Report this error as a failure to enable `name`.
    pub fn for_privilege(self, name: &str) -> WintarError {
        WintarError::Privilege {
            name: name.to_string(),
            reason: self.to_string(),
        }
    }
}

impl From<WinError> for WintarError {
    fn from(err: WinError) -> Self {
        match err {
            WinError::WinApi { code, .. } => WintarError::Io(io::Error::from_raw_os_error(code as i32)),
            WinError::PrivilegeNotHeld { name } => WintarError::Privilege {
                reason: "not held by the process token".to_string(),
                name,
            },
            WinError::Unsupported => WintarError::Internal(err.to_string()),
        }
    }
}

/// Format a Win32 error code to a human-readable message
#[cfg(windows)]
fn format_win32_error(code: u32) -> String {
    use windows::core::PWSTR;
    use windows::Win32::System::Diagnostics::Debug::{
        FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
    };

    let mut buffer = [0u16; 512];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            code,
            0,
            PWSTR(buffer.as_mut_ptr()),
            buffer.len() as u32,
            None,
        )
    };

    if len == 0 {
        return format!("Unknown error ({})", code);
    }

    String::from_utf16_lossy(&buffer[..len as usize])
        .trim()
        .to_string()
}

#[cfg(not(windows))]
fn format_win32_error(code: u32) -> String {
    format!("Win32 error {}", code)
}
