//! Thread-scoped privilege elevation.
//!
//! `PrivilegeGuard` impersonates the process token on the calling thread and
//! enables privileges on that thread token only. Dropping the guard reverts
//! the impersonation, so the process token is never modified and the
//! privileges disappear with the guard on every exit path.

use crate::error::{WinError, ERROR_NOT_ALL_ASSIGNED};
use crate::winapi_utils::{to_wide_string, SafeHandle};
use std::marker::PhantomData;
use tracing::{debug, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{GetLastError, BOOL, HANDLE, LUID};
use windows::Win32::Security::{
    AdjustTokenPrivileges, ImpersonateSelf, LookupPrivilegeValueW, RevertToSelf,
    SecurityImpersonation, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES,
    TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::System::Threading::{GetCurrentThread, OpenThreadToken};
use wintar_core::Result;

/// Reverts thread impersonation when dropped.
struct Impersonation {
    // Impersonation belongs to the thread that started it.
    _not_send: PhantomData<*const ()>,
}

impl Impersonation {
    fn begin(names: &[&str]) -> Result<Self> {
        // SAFETY: no pointers are involved; failure leaves the thread as is.
        unsafe { ImpersonateSelf(SecurityImpersonation) }.map_err(|err| {
            WinError::from_error("ImpersonateSelf", &err).for_privilege(&names.join(", "))
        })?;
        Ok(Impersonation {
            _not_send: PhantomData,
        })
    }
}

impl Drop for Impersonation {
    fn drop(&mut self) {
        if let Err(err) = unsafe { RevertToSelf() } {
            warn!(error = %err, "RevertToSelf failed");
        }
    }
}

/// Privileges enabled on the calling thread until dropped.
pub struct PrivilegeGuard {
    // Field order matters: the token closes before the thread reverts.
    token: SafeHandle,
    _impersonation: Impersonation,
    names: Vec<String>,
}

impl PrivilegeGuard {
    /// Enable every privilege in `names` for the calling thread.
    ///
    /// Fails with `WintarError::Privilege` if any of them is unknown or not
    /// held by the process token; the thread is reverted before returning.
    pub fn acquire(names: &[&str]) -> Result<Self> {
        let impersonation = Impersonation::begin(names)?;

        let mut token = HANDLE::default();
        // SAFETY: `token` is a valid out-pointer; the handle is wrapped below.
        unsafe {
            OpenThreadToken(
                GetCurrentThread(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                BOOL::from(false),
                &mut token,
            )
        }
        .map_err(|err| {
            WinError::from_error("OpenThreadToken", &err).for_privilege(&names.join(", "))
        })?;
        let token = SafeHandle::new(token, "OpenThreadToken")
            .map_err(|err| err.for_privilege(&names.join(", ")))?;

        let guard = PrivilegeGuard {
            token,
            _impersonation: impersonation,
            names: names.iter().map(|n| n.to_string()).collect(),
        };
        for name in names {
            guard.enable(name)?;
        }

        debug!(privileges = ?guard.names, "Privileges enabled");
        Ok(guard)
    }

    fn enable(&self, name: &str) -> Result<()> {
        let wide_name = to_wide_string(name);
        let mut luid = LUID::default();

        // SAFETY: `wide_name` is NUL-terminated; `luid` is a valid out-pointer.
        unsafe { LookupPrivilegeValueW(PCWSTR::null(), PCWSTR(wide_name.as_ptr()), &mut luid) }
            .map_err(|err| WinError::from_error("LookupPrivilegeValueW", &err).for_privilege(name))?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };

        // SAFETY: `privileges` is a complete TOKEN_PRIVILEGES with one entry.
        unsafe {
            AdjustTokenPrivileges(
                self.token.as_raw(),
                BOOL::from(false),
                Some(&privileges),
                0,
                None,
                None,
            )
        }
        .map_err(|err| WinError::from_error("AdjustTokenPrivileges", &err).for_privilege(name))?;

        // AdjustTokenPrivileges succeeds even when the token lacks the privilege.
        if unsafe { GetLastError().0 } == ERROR_NOT_ALL_ASSIGNED {
            return Err(WinError::PrivilegeNotHeld {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Names of the enabled privileges
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        debug!(privileges = ?self.names, "Releasing privileges");
    }
}

/// Run `f` with `name` enabled on the calling thread.
pub fn with_privilege<T, F>(name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    let _guard = PrivilegeGuard::acquire(&[name])?;
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wintar_core::WintarError;

    #[test]
    fn test_unknown_privilege_fails() {
        let err = PrivilegeGuard::acquire(&["SeNoSuchPrivilege"]).err().unwrap();
        assert!(matches!(err, WintarError::Privilege { name, .. } if name == "SeNoSuchPrivilege"));
    }

    #[test]
    fn test_with_privilege_runs_closure_once() {
        // SeChangeNotifyPrivilege is held by every standard token.
        let mut calls = 0;
        let result = with_privilege("SeChangeNotifyPrivilege", || {
            calls += 1;
            42
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }
}
