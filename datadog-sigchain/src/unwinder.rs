// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adapters over the native unwinder and symbol resolver.
//!
//! Capture and dump run on the signal path and stick to
//! `trace_unsynchronized` plus raw descriptors.  Getting a backtrace on
//! rust is not guaranteed to be signal safe
//! (<https://github.com/rust-lang/backtrace-rs/issues/414>): collecting
//! the `ip` of each frame is safe in practice, resolving them is not.
//! Resolution therefore lives in [`resolve`], which allocates freely and
//! must never be called from a signal handler.

use crate::safe_writer;
use std::ffi::{c_void, CStr};
use std::path::{Path, PathBuf};
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};
use thiserror::Error;

/// Failures reloading a binary stack dump.
#[derive(Debug, Error)]
pub enum DumpReloadError {
    #[error("Stack dump {} is truncated", .0.display())]
    Truncated(PathBuf),
    #[error("Failed to read stack dump: {0}")]
    ReadError(#[from] std::io::Error),
}

/// One resolved source position for a program counter.  A pc covered by
/// inlined code resolves to several of these, in the order the resolver
/// reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame {
    /// Source file, or the containing module path, or empty.
    pub file: String,
    /// 0 when unknown.
    pub line: u32,
    /// Demangled function name; the hex address when no symbol is known.
    pub function: String,
}

/// Capture up to `max_frames` instruction pointers of the current stack,
/// skipping the innermost `skip` frames.
///
/// Allocates up front; on the signal path use [`dump_to_fd`] instead.
pub fn capture(skip: usize, max_frames: usize) -> Vec<usize> {
    let mut frames = Vec::with_capacity(max_frames);
    if max_frames == 0 {
        return frames;
    }
    let mut to_skip = skip;
    // SAFETY: the unsynchronized variant avoids the libbacktrace lock; we
    // only read frame ips, which does not race with other resolutions.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if to_skip > 0 {
                to_skip -= 1;
                return true;
            }
            frames.push(frame.ip() as usize);
            frames.len() < max_frames
        });
    }
    frames
}

/// Append the current stack to `fd` as native-endian instruction pointers.
///
/// Callable from a signal handler: no allocation, one `write(2)` per
/// frame.  Returns the number of frames written.  The byte layout is an
/// opaque format consumed by [`reload_from_path`] in the same build only.
pub fn dump_to_fd(fd: i32) -> usize {
    let mut count = 0usize;
    // SAFETY: see `capture`; only ips are read.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            let ip = (frame.ip() as usize).to_ne_bytes();
            safe_writer::write_bytes(fd, &ip);
            count += 1;
            true
        });
    }
    count
}

/// Open `path` (truncating) and dump the current stack into it.
///
/// Callable from a signal handler: `open(2)`/`close(2)` are
/// async-signal-safe and the path was converted to a C string at
/// configuration time.  Returns the number of frames written; 0 when the
/// file cannot be opened.
pub fn dump_to_path(path: &CStr) -> usize {
    // SAFETY: `path` is NUL-terminated by construction.
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o644 as libc::c_int,
        )
    };
    if fd < 0 {
        return 0;
    }
    let count = dump_to_fd(fd);
    // SAFETY: `fd` came from `open` above and is closed exactly once.
    unsafe { libc::close(fd) };
    count
}

/// Reload a dump produced by [`dump_to_fd`] / [`dump_to_path`].
pub fn reload_from_path(path: &Path) -> Result<Vec<usize>, DumpReloadError> {
    let bytes = std::fs::read(path)?;
    const WORD: usize = std::mem::size_of::<usize>();
    if bytes.len() % WORD != 0 {
        return Err(DumpReloadError::Truncated(path.to_path_buf()));
    }
    Ok(bytes
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            usize::from_ne_bytes(word)
        })
        .collect())
}

/// Resolve `pc` to source info, one entry per inlined frame, in resolver
/// order.  Never returns an empty list: an unknown symbol falls back to the
/// hex address, an unknown (or `?`-prefixed) file to the containing module
/// path.  Must not be called from a signal handler.
pub fn resolve(pc: usize) -> Vec<ResolvedFrame> {
    let mut frames = Vec::new();
    backtrace::resolve(pc as *mut c_void, |symbol| {
        let function = symbol
            .name()
            .and_then(|name| name.as_str().map(demangle))
            .unwrap_or_else(|| format!("{pc:#x}"));
        let file = symbol
            .filename()
            .map(|file| file.display().to_string())
            .unwrap_or_default();
        frames.push(ResolvedFrame {
            file,
            line: symbol.lineno().unwrap_or(0),
            function,
        });
    });
    if frames.is_empty() {
        frames.push(ResolvedFrame {
            file: String::new(),
            line: 0,
            function: format!("{pc:#x}"),
        });
    }
    for frame in &mut frames {
        if frame.file.is_empty() || frame.file.starts_with('?') {
            if let Some(module) = module_for_pc(pc) {
                frame.file = module;
            }
        }
    }
    frames
}

/// The raw (still mangled) symbol name covering `pc`, or the hex address
/// when no symbol is known.  Used for the symbolizer's entry field.
pub fn symbol_name(pc: usize) -> String {
    let mut name = None;
    backtrace::resolve(pc as *mut c_void, |symbol| {
        if name.is_none() {
            name = symbol
                .name()
                .and_then(|symbol_name| symbol_name.as_str().map(str::to_string));
        }
    });
    name.unwrap_or_else(|| format!("{pc:#x}"))
}

fn demangle(name: &str) -> String {
    match Name::from(name).demangle(DemangleOptions::name_only()) {
        Some(demangled) => demangled,
        None => name.to_string(),
    }
}

#[cfg(unix)]
fn module_for_pc(pc: usize) -> Option<String> {
    // SAFETY: `Dl_info` is plain data and `dladdr` only fills it in.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(pc as *const c_void, &mut info) } == 0 || info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per dladdr's contract.
    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn module_for_pc(_pc: usize) -> Option<String> {
    None
}
