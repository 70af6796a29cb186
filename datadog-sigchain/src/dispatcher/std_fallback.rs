// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(not(unix))]

//! `signal(2)`-based fallback for platforms without `sigaction`.
//!
//! System V semantics re-arm the disposition to `SIG_DFL` on every
//! delivery, so the dispatcher re-installs itself before doing anything
//! else.  Only the handler form of a prior disposition exists here, there
//! is no siginfo or context to forward, and the chain's wait step always
//! uses the polling variant.

use super::chain;
use crate::safe_writer::write_bytes;
use crate::shared::constants::MAX_SIGNALS;
use crate::{callback_config, stacktrace_store};
use libc::{c_int, sighandler_t, SIG_DFL, SIG_ERR, SIG_IGN};
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Mutex, PoisonError};

// In this case, we actually WANT multiple copies of the interior mutable struct
#[allow(clippy::declare_interior_mutable_const)]
const UNRECORDED: AtomicBool = AtomicBool::new(false);
#[allow(clippy::declare_interior_mutable_const)]
const NO_HANDLER: AtomicUsize = AtomicUsize::new(0);

// Prior dispositions as raw `sighandler_t` values; handler form only.
static RECORDED: [AtomicBool; MAX_SIGNALS] = [UNRECORDED; MAX_SIGNALS];
static PRIOR: [AtomicUsize; MAX_SIGNALS] = [NO_HANDLER; MAX_SIGNALS];

static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Install the chaining dispatcher on `signum` via `signal(2)`.
///
/// Only the first call records the prior disposition, so the handler the
/// host runtime installed is never lost.
pub fn set_sig(signum: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        (1..MAX_SIGNALS as i32).contains(&signum),
        "signal number {signum} out of range"
    );
    // SAFETY: `dispatch` is an extern "C" fn with the handler signature.
    let prior = unsafe { libc::signal(signum, dispatch as sighandler_t) };
    anyhow::ensure!(prior != SIG_ERR, "signal() failed for {signum}");
    record_once(signum, prior);
    Ok(())
}

fn record_once(signum: i32, prior: sighandler_t) {
    let index = signum as usize;
    let _guard = WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if RECORDED[index].load(Acquire) {
        return;
    }
    PRIOR[index].store(prior, Release);
    RECORDED[index].store(true, Release);
}

fn recorded(signum: c_int) -> Option<sighandler_t> {
    if !(1..MAX_SIGNALS as c_int).contains(&signum) {
        return None;
    }
    let index = signum as usize;
    if !RECORDED[index].load(Acquire) {
        return None;
    }
    Some(PRIOR[index].load(Acquire))
}

extern "C" fn dispatch(signum: c_int) {
    // System V re-arm: restore ourselves before anything else runs.
    // SAFETY: re-installing the currently running handler is allowed.
    unsafe { libc::signal(signum, dispatch as sighandler_t) };

    stacktrace_store::write_on_signal(signum);

    if let Some((callback, context)) = callback_config::on_signal_snapshot() {
        let fd = callback_config::signal_dump_fd();
        // SAFETY: registration requires an async-signal-safe callback.
        unsafe { callback(context, fd, signum) };
    }

    chain::mark_seen(signum);
    if let Some(rule) = chain::lookup(signum) {
        if let Some(to) = rule.to {
            if to != signum {
                invoke_prior(to);
            }
        }
        if let Some(wait) = rule.wait {
            if wait != signum {
                chain::wait_for(wait);
            }
        }
        if rule.sleep_seconds > 0 {
            chain::sleep_seconds(rule.sleep_seconds);
        }
    }
    if let Some(pipe) = chain::lookup_pipe(signum) {
        write_bytes(pipe.writer_fd, b"\x01");
    }

    invoke_prior(signum);
}

fn invoke_prior(signum: c_int) {
    let Some(prior) = recorded(signum) else {
        return;
    };
    if prior == SIG_IGN {
        return;
    }
    if prior == SIG_DFL {
        // SAFETY: resetting to the default and re-raising mirrors the
        // sigaction path; signals are only delivered once.
        unsafe {
            libc::signal(signum, SIG_DFL);
            libc::raise(signum);
        }
        return;
    }
    // SAFETY: anything that is not SIG_IGN/SIG_DFL/SIG_ERR was a handler
    // function pointer when it was recorded.
    let handler: extern "C" fn(c_int) = unsafe { std::mem::transmute(prior) };
    handler(signum);
}
