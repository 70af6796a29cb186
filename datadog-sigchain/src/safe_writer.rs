// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Byte and integer output restricted to async-signal-safe primitives.
//!
//! Everything here is callable from a signal handler: no allocation, no
//! locking, no stdio, only raw `write(2)`.
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
//! Short writes are accepted and never retried; a handler that loops on a
//! blocked pipe is worse than a truncated banner.

use std::ffi::c_void;

/// Minimum number of base-10 digits needed to render `n`.
/// `n` must be non-negative.
pub const fn digits10(n: i64) -> usize {
    if n < 10 {
        1
    } else {
        1 + digits10(n / 10)
    }
}

// Sign byte plus the widest magnitude an i64 can carry.
const INT_BUF_LEN: usize = 1 + digits10(i64::MAX);

/// Write `bytes` to `fd` with a single `write(2)`.
///
/// Returns the number of bytes written, or -1 on error.  A negative `fd`
/// means "not configured" and returns 0 without touching the OS.
pub fn write_bytes(fd: i32, bytes: &[u8]) -> isize {
    if fd < 0 || bytes.is_empty() {
        return 0;
    }
    // SAFETY: the buffer outlives the call and the length matches it.
    unsafe { libc::write(fd, bytes.as_ptr() as *const c_void, bytes.len() as _) as isize }
}

/// Render `n` in base 10 into a fixed stack buffer and write it to `fd`,
/// with a leading `-` for negative values.
///
/// Returns the number of bytes written, or -1 on error.
pub fn write_int(fd: i32, n: i64) -> isize {
    let mut buf = [0u8; INT_BUF_LEN];
    let mut pos = INT_BUF_LEN;

    // Work in unsigned space so i64::MIN does not overflow on negation.
    let mut magnitude = n.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    if n < 0 {
        pos -= 1;
        buf[pos] = b'-';
    }
    write_bytes(fd, &buf[pos..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits10_boundaries() {
        assert_eq!(digits10(0), 1);
        assert_eq!(digits10(9), 1);
        assert_eq!(digits10(10), 2);
        assert_eq!(digits10(99), 2);
        assert_eq!(digits10(100), 3);
        assert_eq!(digits10(i64::MAX), 19);
    }

    #[test]
    fn test_digits10_is_const() {
        const WIDTH: usize = digits10(255);
        assert_eq!(WIDTH, 3);
    }

    #[cfg(unix)]
    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_write_int_round_trip() {
        use std::io::Read;
        use std::os::unix::io::AsRawFd;

        let mut file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();

        for (value, expected) in [
            (0i64, "0"),
            (7, "7"),
            (10, "10"),
            (255, "255"),
            (-1, "-1"),
            (i64::MAX, "9223372036854775807"),
            (i64::MIN, "-9223372036854775808"),
        ] {
            assert_eq!(write_int(fd, value), expected.len() as isize);
            write_bytes(fd, b"\n");
        }

        use std::io::Seek;
        file.rewind().unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(
            contents,
            "0\n7\n10\n255\n-1\n9223372036854775807\n-9223372036854775808\n"
        );
    }

    #[test]
    fn test_write_bytes_rejects_unconfigured_fd() {
        assert_eq!(write_bytes(-1, b"dropped"), 0);
        assert_eq!(write_int(-1, 42), 0);
    }
}
