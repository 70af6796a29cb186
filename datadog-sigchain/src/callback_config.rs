// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide dispatcher configuration read from the signal path.
//!
//! Using mutexes inside a signal handler is not allowed, so every field is
//! an atomic the handler snapshots with single loads.  Registration swaps
//! boxed values through `AtomicPtr` (`Box::into_raw` in, `Box::from_raw`
//! out), so a value is never torn.  Callers configure before the first
//! `set_sig`; changes after that race with delivery.

use libc::{c_int, c_void};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicI32, AtomicPtr};

/// Invoked by the dispatcher after the banner and stack dump, before the
/// chain runs.  The callback contract forbids calling back into the host
/// runtime's managed code, and everything async-signal-unsafe.
#[cfg(unix)]
pub type OnSignalCallback = unsafe extern "C" fn(
    ctx: *mut c_void,
    fd: c_int,
    signum: c_int,
    info: *mut libc::siginfo_t,
    ucontext: *mut c_void,
);

/// The `signal(2)` fallback has no siginfo or context to forward.
#[cfg(not(unix))]
pub type OnSignalCallback = unsafe extern "C" fn(ctx: *mut c_void, fd: c_int, signum: c_int);

struct OnSignal {
    callback: OnSignalCallback,
    context: *mut c_void,
}

// Always either null or `Box::into_raw` of an `OnSignal`.
static ON_SIGNAL: AtomicPtr<OnSignal> = AtomicPtr::new(ptr::null_mut());

static SIGNAL_DUMP_FD: AtomicI32 = AtomicI32::new(-1);

/// Direct the signal-time banner at `fd`.  Pass a negative value to
/// disable banner output.
pub fn set_signal_dump_to_fd(fd: c_int) {
    SIGNAL_DUMP_FD.store(fd, SeqCst);
}

/// [`set_signal_dump_to_fd`] for anything that owns a descriptor.
/// The stream must stay open for as long as signals can fire.
#[cfg(unix)]
pub fn set_signal_dump_to_stream(stream: &impl std::os::unix::io::AsRawFd) {
    set_signal_dump_to_fd(stream.as_raw_fd());
}

pub(crate) fn signal_dump_fd() -> c_int {
    SIGNAL_DUMP_FD.load(SeqCst)
}

/// Register the user callback the dispatcher invokes on every delivery.
/// Replaces any previous registration.
pub fn register_on_signal(callback: OnSignalCallback, context: *mut c_void) {
    let new = Box::into_raw(Box::new(OnSignal { callback, context }));
    let old = ON_SIGNAL.swap(new, SeqCst);
    if !old.is_null() {
        // SAFETY: only ever set from `Box::into_raw` above.
        drop(unsafe { Box::from_raw(old) });
    }
}

/// Remove the registered callback, if any.
pub fn clear_on_signal() {
    let old = ON_SIGNAL.swap(ptr::null_mut(), SeqCst);
    if !old.is_null() {
        // SAFETY: only ever set from `Box::into_raw` in `register_on_signal`.
        drop(unsafe { Box::from_raw(old) });
    }
}

/// Single-load snapshot for the dispatcher.
pub(crate) fn on_signal_snapshot() -> Option<(OnSignalCallback, *mut c_void)> {
    let registration = ON_SIGNAL.load(SeqCst);
    if registration.is_null() {
        return None;
    }
    // SAFETY: registrations are leaked-until-replaced boxes; replacement
    // after installation is documented as racy and configuration is
    // expected to precede `set_sig`.
    let registration = unsafe { &*registration };
    Some((registration.callback, registration.context))
}
