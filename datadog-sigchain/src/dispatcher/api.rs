// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! Installation surface: the dispatcher install and the alternate stack.

use super::{registry, signal_dispatcher};
use crate::shared::constants::ALT_STACK_MULTIPLIER;
use anyhow::Context;
use libc::{
    mmap, sigaltstack, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE,
    SIGSTKSZ,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ptr;
use std::sync::{Mutex, PoisonError};

pub(crate) fn signal_from_signum(signum: i32) -> anyhow::Result<Signal> {
    Signal::try_from(signum)
        .with_context(|| format!("signal number {signum} is not supported on this platform"))
}

/// Install the chaining dispatcher on `signum`.
///
/// Idempotent in effect: every call re-installs the dispatcher, but only
/// the first records the prior disposition, so the handler the host
/// runtime installed is never lost.  Reports an error when the alternate
/// stack cannot be established or `sigaction` fails; nothing is rolled
/// back on failure.
pub fn set_sig(signum: i32) -> anyhow::Result<()> {
    set_sig_action(signum, SigHandler::SigAction(signal_dispatcher::dispatch))
}

/// Install an arbitrary disposition on `signum` with the dispatcher's
/// flags and alternate stack, still recording the prior disposition once.
///
/// The handler must be async-signal-safe; an action-form handler is
/// installed with `SA_SIGINFO`, a plain handler without it.
pub fn set_sig_action(signum: i32, handler: SigHandler) -> anyhow::Result<()> {
    let signal_type = signal_from_signum(signum)?;
    ensure_alt_stack()?;

    // nix sets SA_SIGINFO iff the handler is the action form, which is
    // also the `sa_flags & SA_SIGINFO` test applied when the recorded
    // disposition is read back.
    let new_action = SigAction::new(
        handler,
        SaFlags::SA_ONSTACK | SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    // SAFETY: the dispatcher (and any handler accepted here) is
    // async-signal-safe by contract.
    let old_action = unsafe { signal::sigaction(signal_type, &new_action) }
        .with_context(|| format!("sigaction failed for {signal_type}"))?;

    // There is a tiny instant between installing the new action and
    // recording the old one; a delivery inside it chains to nothing.
    // Hard to fully eliminate with the POSIX API.
    if !registry::record_once(signum, (signal_type, old_action)) {
        log::debug!("prior disposition for {signal_type} already recorded, keeping the first");
    }
    Ok(())
}

enum AltStackState {
    Unallocated,
    Ready,
}

static ALT_STACK: Mutex<AltStackState> = Mutex::new(AltStackState::Unallocated);

/// Allocate and install the alternate signal stack once per process: one
/// guard page followed by `SIGSTKSZ * ALT_STACK_MULTIPLIER` usable bytes,
/// never freed.  The default `SIGSTKSZ` is far too small for a dump that
/// walks the whole stack.
/// Inspired by <https://github.com/rust-lang/rust/pull/69969/files>
fn ensure_alt_stack() -> anyhow::Result<()> {
    let mut state = ALT_STACK.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(*state, AltStackState::Ready) {
        return Ok(());
    }

    let page_size = page_size::get();
    let stack_size = SIGSTKSZ * ALT_STACK_MULTIPLIER;
    // SAFETY: anonymous private mapping, never unmapped.
    let stackp = unsafe {
        mmap(
            ptr::null_mut(),
            stack_size + page_size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANON,
            -1,
            0,
        )
    };
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate the alternate signal stack"
    );
    // Guard page at the low end catches the handler overflowing its own
    // stack instead of silently corrupting adjacent memory.
    // SAFETY: the first page of the mapping above.
    let guard = unsafe { libc::mprotect(stackp, page_size, PROT_NONE) };
    anyhow::ensure!(guard == 0, "failed to protect the alternate stack guard page");

    let stack = libc::stack_t {
        // SAFETY: stays within the mapping.
        ss_sp: unsafe { stackp.add(page_size) },
        ss_flags: 0,
        ss_size: stack_size,
    };
    // SAFETY: `stack` describes memory that lives for the whole process.
    let rval = unsafe { sigaltstack(&stack, ptr::null_mut()) };
    anyhow::ensure!(rval == 0, "sigaltstack failed: {rval}");

    *state = AltStackState::Ready;
    Ok(())
}
