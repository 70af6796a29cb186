// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This crate intercepts asynchronous signals on behalf of a host runtime
//! that installs signal dispositions of its own (typically a managed,
//! garbage-collected runtime driving us over a C ABI).
//!
//! Architecturally, it consists of three parts:
//! 1. A signal dispatcher, installed with `SA_SIGINFO | SA_ONSTACK |
//!    SA_RESTART` on an oversized alternate stack.  On delivery it emits an
//!    async-signal-safe banner and a binary stack dump, invokes an optional
//!    user callback, evaluates the signal chain, and finally delegates to
//!    the disposition that was in force before installation.  The handler
//!    runs under a constrained environment where many standard operations
//!    are illegal
//!    (<https://man7.org/linux/man-pages/man7/signal-safety.7.html>); in
//!    particular memory allocation and mutexes are out, so every shared
//!    value it reads is an atomic populated before installation.
//! 2. A signal chain: per-signal rules that, upon receipt of one signal,
//!    invoke another signal's prior disposition, block until a third
//!    signal has been observed (a 1-second atomic-flag poll), sleep a
//!    fixed number of seconds, or wake a pipe descriptor.
//! 3. Traceback and symbolizer hooks matching the host runtime's traceback
//!    ABI, used by its crash reporter to walk the native stack and resolve
//!    program counters to demangled source locations, including linked
//!    nodes for inlined frames.
//!
//! The prior disposition for each signal number is recorded exactly once
//! per process, so the host runtime's own handlers are never lost no
//! matter how many times installation runs.  All configuration is expected
//! to happen before the first [`set_sig`]; later changes are pointer-swap
//! atomic but race with concurrent deliveries.

mod callback_config;
mod dispatcher;
mod runtime_hooks;
mod safe_writer;
mod shared;
mod stacktrace_store;
mod unwinder;

pub use callback_config::{
    clear_on_signal, register_on_signal, set_signal_dump_to_fd, OnSignalCallback,
};
#[cfg(unix)]
pub use callback_config::set_signal_dump_to_stream;
#[cfg(unix)]
pub use dispatcher::set_sig_action;
pub use dispatcher::{set_chain, set_chain_pipe, set_sig, ChainRule, PipeRule};
pub use runtime_hooks::{
    fill_symbolizer, fill_traceback, SymbolizerArg, SymbolizerMore, TracebackArg,
};
pub use safe_writer::{digits10, write_bytes, write_int};
pub use stacktrace_store::{
    dump_previous, dump_previous_stacktrace, has_previous, previous_stacktrace,
    set_stacktrace_dump_to_file, StacktraceStoreError,
};
pub use unwinder::{
    capture, dump_to_fd, dump_to_path, reload_from_path, resolve, symbol_name, DumpReloadError,
    ResolvedFrame,
};
