//! # Elevation Module
//!
//! Reports whether the converter itself runs with administrative privileges.
//! The converter never needs Admin to do its job; the answer only feeds the
//! `doctor` report and the hint attached to "output directory not writable" errors
//! (e.g. when the user picks a folder under `C:\Program Files`).
//!
//! Elevation of the *generated* executable is a different matter, handled by the
//! launcher template and the embedded manifest (see `template`).

/// Checks if the current process has administrative privileges.
///
/// It opens the current process token and queries `TokenElevation`.
///
/// # Returns
/// * `true` - If the process is running as Admin / High Integrity.
/// * `false` - If running as Standard User, or on a non-Windows host.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let mut token = HANDLE::default();
    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }
        let mut elevation = TOKEN_ELEVATION::default();
        let mut size = 0;
        let queried = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        )
        .is_ok();
        let _ = CloseHandle(token);
        queried && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    false
}

/// Suffix for write-permission errors, nudging the user when running unelevated.
pub fn permission_hint() -> &'static str {
    if cfg!(windows) && !is_elevated() {
        " (choose another folder or run bat2exe as Administrator)"
    } else {
        ""
    }
}
