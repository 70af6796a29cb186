// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `SignalHandler_*` symbols the host runtime binds.
//!
//! Symbol names are unprefixed because the host side resolves these exact
//! names; everything else follows the usual FFI rules here: no panics
//! escape, strings handed out live on the libc heap so the caller can
//! `free` them, and errors collapse to `-1`/no-op because most of these
//! entry points return `void` on the C side.

use datadog_sigchain::OnSignalCallback;
use libc::{c_char, c_int, c_void};
use std::ffi::CStr;
use std::ptr;

/// Install the chaining signal dispatcher on `signum`.
///
/// Records the disposition currently in force (first install only, so the
/// host runtime's handler is never lost), sets up the alternate signal
/// stack once per process, and installs the dispatcher with
/// `SA_SIGINFO | SA_ONSTACK | SA_RESTART`.
///
/// Returns 0 on success, -1 when the alternate stack cannot be
/// established, `sigaction` fails, or `signum` is not installable.
///
/// # Safety
/// No safety concerns; call from any thread, before signals are expected.
#[no_mangle]
#[must_use]
pub unsafe extern "C" fn SignalHandler_SetSig(signum: c_int) -> c_int {
    match datadog_sigchain::set_sig(signum) {
        Ok(()) => 0,
        Err(error) => {
            log::warn!("SignalHandler_SetSig({signum}) failed: {error:#}");
            -1
        }
    }
}

/// Direct the signal-time banner at `fd`.  A negative `fd` disables it.
///
/// # Safety
/// `fd` must stay open for as long as signals can fire.
#[no_mangle]
pub unsafe extern "C" fn SignalHandler_SetSignalDumpToFd(fd: c_int) {
    datadog_sigchain::set_signal_dump_to_fd(fd);
}

/// Configure the file the binary stack dump is written to at signal time.
/// NULL or an empty string clears the configuration.
///
/// # Safety
/// `path` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn SignalHandler_SetStacktraceDumpToFile(path: *const c_char) {
    let path = if path.is_null() {
        ""
    } else {
        // SAFETY: NUL-terminated per the contract above.
        match CStr::from_ptr(path).to_str() {
            Ok(path) => path,
            Err(_) => {
                log::warn!("SignalHandler_SetStacktraceDumpToFile: path is not valid UTF-8");
                return;
            }
        }
    };
    if let Err(error) = datadog_sigchain::set_stacktrace_dump_to_file(path) {
        log::warn!("SignalHandler_SetStacktraceDumpToFile failed: {error}");
    }
}

/// Register the callback the dispatcher invokes on every delivery, after
/// the banner and before the chain.  NULL unregisters.
///
/// # Safety
/// The callback must be async-signal-safe and must not call back into the
/// host runtime's managed code; `ctx` must stay valid for the lifetime of
/// the registration.
#[no_mangle]
pub unsafe extern "C" fn SignalHandler_RegisterOnSignal(
    callback: Option<OnSignalCallback>,
    ctx: *mut c_void,
) {
    match callback {
        Some(callback) => datadog_sigchain::register_on_signal(callback, ctx),
        None => datadog_sigchain::clear_on_signal(),
    }
}

/// Write `"Previous run crashed:\n"` plus the rendered previous stacktrace
/// to the configured dump fd.  A no-op without a dump fd.
///
/// # Safety
/// Must not be called from a signal handler: rendering resolves symbols.
#[no_mangle]
pub unsafe extern "C" fn SignalHandler_DumpPreviousStacktrace() {
    datadog_sigchain::dump_previous_stacktrace();
}

/// The previous stacktrace rendered human-readable, one frame per line.
///
/// Returns an empty string when no dump file is configured, the file is
/// missing, or it cannot be parsed.  The returned string lives on the libc
/// heap; the caller frees it.
///
/// # Safety
/// Must not be called from a signal handler: rendering resolves symbols.
#[no_mangle]
#[must_use]
pub unsafe extern "C" fn SignalHandler_PreviousStacktrace() -> *mut c_char {
    malloc_cstring(&datadog_sigchain::previous_stacktrace())
}

/// Configure the signal chain: on delivery of `from`, invoke the prior
/// disposition of `to` (if non-negative), block until `wait` (if
/// non-negative) has been observed, then sleep `sleep_seconds`.
/// Self-referential `to`/`wait` values are ignored at delivery time.
///
/// # Safety
/// No safety concerns; configure before `SignalHandler_SetSig`.
#[no_mangle]
pub unsafe extern "C" fn SignalHandler_SetSigInvokeChain(
    from: c_int,
    to: c_int,
    wait: c_int,
    sleep_seconds: c_int,
) {
    if let Err(error) = datadog_sigchain::set_chain(from, to, wait, sleep_seconds.max(0) as u32) {
        log::warn!("SignalHandler_SetSigInvokeChain({from}) failed: {error:#}");
    }
}

/// Configure a pipe chain: on delivery of `from`, one byte is written to
/// `writer` to wake whatever blocks on `reader`.
///
/// # Safety
/// Both descriptors must stay open for as long as signals can fire.
#[no_mangle]
pub unsafe extern "C" fn SignalHandler_SetSigInvokeChainPipe(
    from: c_int,
    writer: c_int,
    reader: c_int,
) {
    if let Err(error) = datadog_sigchain::set_chain_pipe(from, writer, reader) {
        log::warn!("SignalHandler_SetSigInvokeChainPipe({from}) failed: {error:#}");
    }
}

/// Copy `s` onto the libc heap, NUL-terminated, so C callers can `free` it.
pub(crate) fn malloc_cstring(s: &str) -> *mut c_char {
    // SAFETY: sized allocation, checked for null; +1 for the NUL.
    let dst = unsafe { libc::malloc(s.len() + 1) } as *mut u8;
    if dst.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: `dst` holds `s.len() + 1` bytes and the ranges are disjoint.
    unsafe {
        ptr::copy_nonoverlapping(s.as_ptr(), dst, s.len());
        *dst.add(s.len()) = 0;
    }
    dst as *mut c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_stacktrace_unconfigured_is_empty_string() {
        // SAFETY: not called from a signal handler.
        let text = unsafe { SignalHandler_PreviousStacktrace() };
        assert!(!text.is_null());
        // SAFETY: `malloc_cstring` NUL-terminates.
        assert_eq!(unsafe { CStr::from_ptr(text) }.to_bytes(), b"");
        // SAFETY: ownership transferred to us, the caller.
        unsafe { libc::free(text as *mut c_void) };
    }

    #[test]
    fn test_set_stacktrace_dump_tolerates_null() {
        // SAFETY: NULL is explicitly allowed.
        unsafe { SignalHandler_SetStacktraceDumpToFile(ptr::null()) };
    }

    #[test]
    fn test_set_sig_rejects_bad_signum() {
        // SAFETY: no preconditions.
        assert_eq!(unsafe { SignalHandler_SetSig(-5) }, -1);
    }

    #[test]
    fn test_invalid_chain_is_swallowed() {
        // SAFETY: no preconditions; the error is logged, not returned.
        unsafe { SignalHandler_SetSigInvokeChain(-1, 2, 3, 0) };
        unsafe { SignalHandler_SetSigInvokeChainPipe(-1, 2, 3) };
    }

    #[test]
    fn test_malloc_cstring_round_trips() {
        let text = malloc_cstring("frames");
        // SAFETY: NUL-terminated by construction.
        assert_eq!(unsafe { CStr::from_ptr(text) }.to_bytes(), b"frames");
        // SAFETY: we own the allocation.
        unsafe { libc::free(text as *mut c_void) };
    }
}
