// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persists a binary stack dump at signal time and renders it on request.
//!
//! The dump path is converted to a C string when configured, so the signal
//! handler never allocates; the human-readable rendering happens later,
//! off the signal path, by reloading the dump and resolving each frame.

use crate::callback_config;
use crate::safe_writer::{write_bytes, write_int};
use crate::shared::constants::*;
use crate::unwinder;
use std::ffi::{CString, NulError};
use std::fmt::Write;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering::SeqCst};
use thiserror::Error;

/// Failures configuring the stacktrace store.  Queries never error: a
/// missing or unreadable dump renders as the empty string.
#[derive(Debug, Error)]
pub enum StacktraceStoreError {
    #[error("Dump path contains a NUL byte")]
    InvalidPath(#[from] NulError),
}

struct DumpPath {
    path: PathBuf,
    cpath: CString,
}

// Swapped whole, never mutated in place: the signal path reads a snapshot
// pointer.  Always either null or `Box::into_raw` of a `DumpPath`.
static DUMP_PATH: AtomicPtr<DumpPath> = AtomicPtr::new(ptr::null_mut());

/// Configure the file the stack dump is written to at signal time.
/// An empty `path` clears the configuration.
pub fn set_stacktrace_dump_to_file(path: &str) -> Result<(), StacktraceStoreError> {
    let new = if path.is_empty() {
        ptr::null_mut()
    } else {
        let cpath = CString::new(path)?;
        Box::into_raw(Box::new(DumpPath {
            path: PathBuf::from(path),
            cpath,
        }))
    };
    let old = DUMP_PATH.swap(new, SeqCst);
    if !old.is_null() {
        // SAFETY: only ever set from `Box::into_raw` above.
        drop(unsafe { Box::from_raw(old) });
    }
    Ok(())
}

fn snapshot() -> Option<&'static DumpPath> {
    let dump = DUMP_PATH.load(SeqCst);
    if dump.is_null() {
        None
    } else {
        // SAFETY: leaked-until-replaced box; replacement after installation
        // is documented as racy and configuration precedes `set_sig`.
        Some(unsafe { &*dump })
    }
}

/// Banner plus binary dump, run inside the signal handler.
///
/// Exact bytes on the dump fd: `"Signal received(" <signum> ").\n"`, then,
/// when a dump path is configured, `"Stacktrace dumped to file: " <path>
/// ".\n"` before the dump itself is written.  Short writes are not retried.
pub(crate) fn write_on_signal(signum: i32) {
    let fd = callback_config::signal_dump_fd();
    write_bytes(fd, SIGNAL_RECEIVED_PREFIX);
    write_int(fd, signum as i64);
    write_bytes(fd, SIGNAL_RECEIVED_SUFFIX);

    if let Some(dump) = snapshot() {
        write_bytes(fd, STACKTRACE_DUMPED_PREFIX);
        write_bytes(fd, dump.cpath.to_bytes());
        write_bytes(fd, STACKTRACE_DUMPED_SUFFIX);
        unwinder::dump_to_path(&dump.cpath);
    }
}

/// Whether a previous dump exists at the configured path.
pub fn has_previous() -> bool {
    snapshot().map(|dump| dump.path.exists()).unwrap_or(false)
}

/// Human-readable rendering of the previous dump, one frame per line.
///
/// Empty when no dump path is configured, the file is missing, or it
/// cannot be parsed; those are not errors.
pub fn previous_stacktrace() -> String {
    let Some(dump) = snapshot() else {
        return String::new();
    };
    let Ok(pcs) = unwinder::reload_from_path(&dump.path) else {
        return String::new();
    };
    let mut text = String::new();
    for (index, pc) in pcs.iter().enumerate() {
        for frame in unwinder::resolve(*pc) {
            if frame.file.is_empty() {
                let _ = writeln!(text, "{index:2}# {}", frame.function);
            } else {
                let _ = writeln!(
                    text,
                    "{index:2}# {} at {}:{}",
                    frame.function, frame.file, frame.line
                );
            }
        }
    }
    text
}

/// Write `"Previous run crashed:\n"` plus the rendered previous stacktrace
/// to `fd`.  Returns the `write(2)` result; 0 for a negative `fd`.
pub fn dump_previous(fd: i32) -> isize {
    if fd < 0 {
        return 0;
    }
    let mut message = String::from(PREVIOUS_CRASH_BANNER);
    message.push_str(&previous_stacktrace());
    write_bytes(fd, message.as_bytes())
}

/// [`dump_previous`] against the configured dump fd.
pub fn dump_previous_stacktrace() -> isize {
    dump_previous(callback_config::signal_dump_fd())
}
