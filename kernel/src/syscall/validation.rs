// SPDX-License-Identifier: MPL-2.0

//! User-pointer validation for the system-call surface.

use crate::arch::x86_64::USER_ADDR_LIMIT;
use crate::prelude::*;

/// Checks that `[ptr, ptr + len)` is a plausible user-mode range: non-null
/// and entirely within the low half of the address space.
pub fn check_user_range(ptr: u64, len: u64) -> Result {
    if ptr == 0 {
        return Err(Error::InvalidParam);
    }
    let end = ptr.checked_add(len).ok_or(Error::InvalidParam)?;
    if end > USER_ADDR_LIMIT {
        return Err(Error::InvalidParam);
    }
    Ok(())
}

/// Borrows a user buffer for reading.
///
/// # Safety
///
/// The caller context must guarantee the range is mapped for the duration of
/// the call; the range itself has been validated.
pub unsafe fn user_slice<'a>(ptr: u64, len: u64) -> Result<&'a [u8]> {
    check_user_range(ptr, len)?;
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

/// Borrows a user buffer for writing.
///
/// # Safety
///
/// As for [`user_slice`].
pub unsafe fn user_slice_mut<'a>(ptr: u64, len: u64) -> Result<&'a mut [u8]> {
    check_user_range(ptr, len)?;
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

/// Copies a UTF-8 string out of user memory.
///
/// # Safety
///
/// As for [`user_slice`].
pub unsafe fn read_user_string(ptr: u64, len: u64) -> Result<String> {
    let bytes = unsafe { user_slice(ptr, len)? };
    core::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| Error::InvalidParam)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_and_high_half() {
        assert_eq!(check_user_range(0, 10).unwrap_err(), Error::InvalidParam);
        assert_eq!(
            check_user_range(USER_ADDR_LIMIT, 1).unwrap_err(),
            Error::InvalidParam
        );
        assert_eq!(
            check_user_range(u64::MAX, 2).unwrap_err(),
            Error::InvalidParam
        );
        assert!(check_user_range(0x1000, 4096).is_ok());
    }

    #[test]
    fn reads_utf8_strings() {
        let text = b"\\azalea\\path";
        let s = unsafe { read_user_string(text.as_ptr() as u64, text.len() as u64) }.unwrap();
        assert_eq!(s, "\\azalea\\path");
    }
}
