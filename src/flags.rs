//! Open-mode flags, checked against a file's stored permission bits on
//! `open`: `AccessDenied` is raised when an open requests a mode the
//! file's stored permission bits forbid.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: i32 {
        const RDONLY = 0;
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;
    }
}

impl OpenFlags {
    /// The access-mode bits of a raw `open(2)` flags value (the low two
    /// bits on every platform `libc` supports here).
    const ACCESS_MASK: i32 = libc::O_ACCMODE;

    pub fn access_mode(raw: i32) -> OpenFlags {
        OpenFlags::from_bits_truncate(raw & Self::ACCESS_MASK)
    }

    pub fn wants_write(self) -> bool {
        self == OpenFlags::WRONLY || self == OpenFlags::RDWR
    }
}
