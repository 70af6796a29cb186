// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `Traceback`/`Symbolizer` entry points the host runtime's crash
//! reporter calls.  Both are catch-all boundaries: no panic may cross into
//! the host runtime, and a failed traceback reports "no frames" rather
//! than leaving `buf` undefined.

use datadog_sigchain::{SymbolizerArg, TracebackArg};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Walk the current native stack into `arg->buf`, zero-terminated when
/// shorter than `arg->max`.  A nonzero `arg->context` yields an empty
/// trace: only the current stack can be walked.
///
/// # Safety
/// `arg` must be NULL or point to a valid `TracebackArg` whose `buf` holds
/// `max` entries.  Must not be called from a signal handler.
#[no_mangle]
pub unsafe extern "C" fn Traceback(arg: *mut TracebackArg) {
    let Some(arg) = arg.as_mut() else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| datadog_sigchain::fill_traceback(&mut *arg))).is_err() {
        // Report "no frames"; the host runtime treats that as an empty
        // native stack and carries on.
        if !arg.buf.is_null() && arg.max > 0 {
            *arg.buf = 0;
        }
    }
}

/// Resolve `arg->pc` to file/line/function, queueing linked nodes through
/// `arg->data` when the pc covers inlined frames.  Strings handed back are
/// heap-allocated and owned by the caller after return.
///
/// # Safety
/// `arg` must be NULL or point to a valid `SymbolizerArg`; a non-null
/// `arg->data` must be a node produced by a previous call.  Must not be
/// called from a signal handler.
#[no_mangle]
pub unsafe extern "C" fn Symbolizer(arg: *mut SymbolizerArg) {
    let Some(arg) = arg.as_mut() else {
        return;
    };
    // On panic the output fields keep whatever the partial fill produced;
    // `more` only becomes nonzero after a fully built chain is attached.
    let _ = catch_unwind(AssertUnwindSafe(|| datadog_sigchain::fill_symbolizer(&mut *arg)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_traceback_tolerates_null() {
        // SAFETY: NULL is explicitly allowed.
        unsafe { Traceback(ptr::null_mut()) };
    }

    #[test]
    fn test_symbolizer_tolerates_null() {
        // SAFETY: NULL is explicitly allowed.
        unsafe { Symbolizer(ptr::null_mut()) };
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_traceback_fills_current_stack() {
        let mut buf = [0usize; 64];
        let mut arg = TracebackArg {
            context: 0,
            sig_context: 0,
            buf: buf.as_mut_ptr(),
            max: buf.len(),
        };
        // SAFETY: `arg` and `buf` are valid for the call.
        unsafe { Traceback(&mut arg) };
        assert_ne!(buf[0], 0);
        assert!(buf.contains(&0), "expected a zero terminator");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_symbolizer_resolves_and_is_callee_owned() {
        #[inline(never)]
        fn probe_function() {}

        let mut arg = SymbolizerArg {
            pc: probe_function as usize,
            file: ptr::null(),
            lineno: 0,
            func: ptr::null(),
            entry: 0,
            more: 0,
            data: ptr::null_mut(),
        };
        // SAFETY: `arg` is valid and `data` is null on the first call.
        unsafe { Symbolizer(&mut arg) };
        assert!(!arg.func.is_null());
        // SAFETY: `func` is NUL-terminated and ours to free.
        let name = unsafe { std::ffi::CStr::from_ptr(arg.func) }
            .to_string_lossy()
            .into_owned();
        assert!(name.contains("probe_function"), "got {name}");
        unsafe { libc::free(arg.func as *mut libc::c_void) };
        if !arg.file.is_null() {
            unsafe { libc::free(arg.file as *mut libc::c_void) };
        }
    }
}
