// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits and exact banner bytes shared by the dispatcher and the
//! stacktrace store.

/// Signal numbers index fixed arrays everywhere in this crate.
/// Linux tops out at 64 (inclusive), other platforms lower; 256 leaves
/// room for every numbering scheme we chain on.
pub(crate) const MAX_SIGNALS: usize = 256;

/// The alternate signal stack is `SIGSTKSZ * ALT_STACK_MULTIPLIER` usable
/// bytes plus one guard page, allocated once and never freed.
#[cfg(unix)]
pub(crate) const ALT_STACK_MULTIPLIER: usize = 100;

/// Poll interval of the chain's wait loop, in seconds.  `sleep(3)` returns
/// early when a signal is delivered to the polling thread, so the loop
/// reacts faster than this bound when it can.
pub(crate) const CHAIN_WAIT_POLL_SECONDS: u32 = 1;

/// Frames the host-runtime traceback skips (the exported shim plus the
/// capture helper) so `buf[0]` is the host's call site.
pub(crate) const TRACEBACK_SKIP: usize = 2;

// Banner bytes emitted on the signal path.  These are a wire format: the
// host side greps for them, so they are byte-exact and never localized.
pub(crate) const SIGNAL_RECEIVED_PREFIX: &[u8] = b"Signal received(";
pub(crate) const SIGNAL_RECEIVED_SUFFIX: &[u8] = b").\n";
pub(crate) const STACKTRACE_DUMPED_PREFIX: &[u8] = b"Stacktrace dumped to file: ";
pub(crate) const STACKTRACE_DUMPED_SUFFIX: &[u8] = b".\n";
pub(crate) const PREVIOUS_CRASH_BANNER: &str = "Previous run crashed:\n";
