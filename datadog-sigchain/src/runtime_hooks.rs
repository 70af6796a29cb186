// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Traceback and symbolizer hooks for the host runtime's crash reporter.
//!
//! The argument records are bit-exact against the host runtime's traceback
//! ABI.  Strings and list nodes handed back are `malloc`-allocated:
//! ownership transfers to the caller, which releases them with `free`, or
//! leaks them the way the host runtime does for symbolizer results.
//! Neither entry point may be called from a signal handler.

use crate::shared::constants::TRACEBACK_SKIP;
use crate::unwinder::{self, ResolvedFrame};
use libc::c_char;
use std::ptr;

/// Traceback request.  `buf` receives up to `max` program counters,
/// zero-terminated when shorter than `max`.
#[repr(C)]
#[derive(Debug)]
pub struct TracebackArg {
    /// Host context; nonzero asks for a saved context this implementation
    /// cannot walk, which yields an empty trace.
    pub context: usize,
    pub sig_context: usize,
    pub buf: *mut usize,
    pub max: usize,
}

/// Symbolizer request/response.  `data` threads the pending inlined-frame
/// list between successive calls for the same `pc`.
#[repr(C)]
#[derive(Debug)]
pub struct SymbolizerArg {
    pub pc: usize,
    pub file: *const c_char,
    pub lineno: usize,
    pub func: *const c_char,
    pub entry: usize,
    pub more: usize,
    pub data: *mut SymbolizerMore,
}

/// One queued inlined frame, owned by the caller after it is handed back.
#[repr(C)]
#[derive(Debug)]
pub struct SymbolizerMore {
    pub more: *mut SymbolizerMore,
    pub file: *const c_char,
    pub lineno: usize,
    pub func: *const c_char,
}

/// Fill `buf` with the current stack's program counters.
///
/// A nonzero `context` reports "no frames" by writing a single 0: only the
/// current stack can be walked.
pub fn fill_traceback(arg: &mut TracebackArg) {
    if arg.buf.is_null() || arg.max == 0 {
        return;
    }
    if arg.context != 0 {
        // SAFETY: the caller guarantees `buf` holds `max` entries.
        unsafe { *arg.buf = 0 };
        return;
    }
    let frames = unwinder::capture(TRACEBACK_SKIP, arg.max);
    for (i, pc) in frames.iter().enumerate() {
        // SAFETY: `i < frames.len() <= max`.
        unsafe { *arg.buf.add(i) = *pc };
    }
    if frames.len() < arg.max {
        // SAFETY: in bounds by the comparison above.
        unsafe { *arg.buf.add(frames.len()) = 0 };
    }
}

/// One step of the symbolizer protocol (see `runtime.SetCgoTraceback`):
/// drain a queued node if one is pending, otherwise resolve `arg.pc` and
/// queue nodes for any additional inlined frames.  The entry field is
/// populated together with the final frame for a pc.
pub fn fill_symbolizer(arg: &mut SymbolizerArg) {
    if !arg.data.is_null() {
        // SAFETY: `data` is a node we allocated on an earlier call,
        // preserved untouched by the host runtime in between.
        let node = unsafe { &*arg.data };
        arg.file = node.file;
        arg.lineno = node.lineno;
        arg.func = node.func;
        arg.more = usize::from(!node.more.is_null());
        arg.data = node.more;
        if arg.more == 0 {
            // Returning the last file/line, so the entry point field can
            // be filled in now.
            arg.entry = entry_name(arg.pc);
        }
        return;
    }

    arg.file = ptr::null();
    arg.lineno = 0;
    arg.func = ptr::null();
    arg.more = 0;
    if arg.pc == 0 {
        return;
    }

    let frames = unwinder::resolve(arg.pc);
    // `resolve` never returns an empty list.
    let head = &frames[0];
    arg.file = c_strdup(&head.file);
    arg.lineno = head.line as usize;
    arg.func = c_strdup(&head.function);

    if frames.len() > 1 {
        let chain = build_more_chain(&frames[1..]);
        if !chain.is_null() {
            arg.data = chain;
            arg.more = 1;
            return;
        }
        // Allocation failed: fall through with the head frame only.
    }
    arg.entry = entry_name(arg.pc);
}

/// Build the linked tail for `frames`, preserving order.  Returns null if
/// a node allocation fails, leaving the caller with the head frame only.
pub(crate) fn build_more_chain(frames: &[ResolvedFrame]) -> *mut SymbolizerMore {
    let mut head: *mut SymbolizerMore = ptr::null_mut();
    for frame in frames.iter().rev() {
        // SAFETY: sized allocation, checked for null before use.
        let node =
            unsafe { libc::malloc(std::mem::size_of::<SymbolizerMore>()) } as *mut SymbolizerMore;
        if node.is_null() {
            return ptr::null_mut();
        }
        // SAFETY: `node` is valid for writes of `SymbolizerMore`.
        unsafe {
            (*node).more = head;
            (*node).file = c_strdup(&frame.file);
            (*node).lineno = frame.line as usize;
            (*node).func = c_strdup(&frame.function);
        }
        head = node;
    }
    head
}

fn entry_name(pc: usize) -> usize {
    if pc == 0 {
        return 0;
    }
    c_strdup(&unwinder::symbol_name(pc)) as usize
}

/// `strdup` into the libc heap so the receiving side can `free` the
/// string with its own allocator.
fn c_strdup(s: &str) -> *const c_char {
    let len = s.len();
    // SAFETY: sized allocation, checked for null; +1 for the NUL.
    let dst = unsafe { libc::malloc(len + 1) } as *mut u8;
    if dst.is_null() {
        return ptr::null();
    }
    // SAFETY: `dst` holds `len + 1` bytes and the ranges are disjoint.
    unsafe {
        ptr::copy_nonoverlapping(s.as_ptr(), dst, len);
        *dst.add(len) = 0;
    }
    dst as *const c_char
}
