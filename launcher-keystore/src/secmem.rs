//! Secure Memory
//!
//! Locks the pages backing decrypted private keys so they are not swapped
//! to disk while a session is open.
//!
//! - **Unix**: `mlock()`
//! - **Windows**: `VirtualLock()`
//! - **Other**: warning, no lock
//!
//! Locking failures are logged and the session continues. Zeroizing the
//! buffer on drop is handled separately by [`crate::keys::PrivateKey`].

use std::ptr::NonNull;

/// Result of a memory lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Locked,
    /// Logged, continuing without lock
    Failed,
    #[cfg_attr(any(unix, windows), allow(dead_code))]
    Unsupported,
}

/// Lock a memory region.
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes.
pub unsafe fn mlock(ptr: NonNull<u8>, len: usize) -> LockResult {
    if len == 0 {
        return LockResult::Locked;
    }

    #[cfg(unix)]
    {
        mlock_unix(ptr, len)
    }

    #[cfg(windows)]
    {
        mlock_windows(ptr, len)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
        tracing::warn!("Memory locking not supported on this platform - key may be swapped to disk");
        LockResult::Unsupported
    }
}

/// Unlock a previously locked memory region.
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes that was
/// previously locked with [`mlock`].
pub unsafe fn munlock(ptr: NonNull<u8>, len: usize) {
    if len == 0 {
        return;
    }

    #[cfg(unix)]
    {
        munlock_unix(ptr, len);
    }

    #[cfg(windows)]
    {
        munlock_windows(ptr, len);
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = ptr;
    }
}

#[cfg(unix)]
unsafe fn mlock_unix(ptr: NonNull<u8>, len: usize) -> LockResult {
    let result = libc::mlock(ptr.as_ptr() as *const libc::c_void, len);

    if result == 0 {
        tracing::debug!("Locked {} bytes of key memory", len);
        LockResult::Locked
    } else {
        let error = std::io::Error::last_os_error();
        let errno = error.raw_os_error().unwrap_or(0);
        let error_msg = match errno {
            libc::ENOMEM => "insufficient memory or exceeds RLIMIT_MEMLOCK",
            libc::EPERM => "insufficient permissions (may need CAP_IPC_LOCK)",
            libc::EINVAL => "invalid address range",
            _ => "unknown error",
        };
        tracing::warn!(
            "Failed to lock key memory: {} (errno {}). Key may be swapped to disk.",
            error_msg,
            errno
        );
        LockResult::Failed
    }
}

#[cfg(unix)]
unsafe fn munlock_unix(ptr: NonNull<u8>, len: usize) {
    if libc::munlock(ptr.as_ptr() as *const libc::c_void, len) != 0 {
        tracing::debug!("munlock returned non-zero (likely already unlocked)");
    }
}

#[cfg(windows)]
unsafe fn mlock_windows(ptr: NonNull<u8>, len: usize) -> LockResult {
    use windows::Win32::System::Memory::VirtualLock;

    if VirtualLock(ptr.as_ptr() as *const std::ffi::c_void, len).is_ok() {
        tracing::debug!("Locked {} bytes of key memory", len);
        LockResult::Locked
    } else {
        let error = windows::core::Error::from_win32();
        tracing::warn!("Failed to lock key memory: {}. Key may be swapped to disk.", error);
        LockResult::Failed
    }
}

#[cfg(windows)]
unsafe fn munlock_windows(ptr: NonNull<u8>, len: usize) {
    use windows::Win32::System::Memory::VirtualUnlock;

    if VirtualUnlock(ptr.as_ptr() as *const std::ffi::c_void, len).is_err() {
        tracing::debug!("VirtualUnlock failed (likely already unlocked)");
    }
}

/// Locks memory on creation and unlocks it on drop.
#[derive(Debug)]
pub struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
    was_locked: bool,
}

impl LockedRegion {
    /// # Safety
    /// `ptr` must point to `len` valid bytes that stay allocated, and do not
    /// move, for the whole lifetime of the region.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        let lock_result = mlock(ptr, len);
        Self {
            ptr,
            len,
            was_locked: lock_result == LockResult::Locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.was_locked
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        if self.was_locked {
            // SAFETY: only regions we locked are unlocked, and the owner drops
            // the region before the backing buffer.
            unsafe {
                munlock(self.ptr, self.len);
            }
        }
    }
}

// SAFETY: the pointer is never dereferenced, only handed to the OS memory
// locking calls.
unsafe impl Send for LockedRegion {}
unsafe impl Sync for LockedRegion {}

/// Lock the memory backing a byte buffer.
///
/// # Safety
/// The buffer must outlive the returned region and must not be reallocated
/// while it exists.
pub unsafe fn lock_bytes(bytes: &[u8]) -> LockedRegion {
    match NonNull::new(bytes.as_ptr() as *mut u8) {
        Some(ptr) if !bytes.is_empty() => LockedRegion::new(ptr, bytes.len()),
        _ => LockedRegion {
            ptr: NonNull::dangling(),
            len: 0,
            was_locked: true,
        },
    }
}
