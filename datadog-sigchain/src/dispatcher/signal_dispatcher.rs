// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! The installed signal disposition.
//!
//! A delivery runs, strictly in this order: banner and stack dump, user
//! callback, chain (secondary invocation → wait → sleep, then the pipe
//! wake-up), and finally the prior disposition of the delivered signal.
//! Everything on this path touches only atomics, pre-allocated buffers,
//! and async-signal-safe calls:
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
//! - open / close / write (banner and dump)
//! - raise / sigaction (default-disposition delegation)
//! - sleep (chain wait and delay)

use super::{chain, registry};
use crate::safe_writer::write_bytes;
use crate::{callback_config, stacktrace_store};
use libc::{c_int, c_void, siginfo_t};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet};

pub(crate) extern "C" fn dispatch(signum: c_int, info: *mut siginfo_t, ucontext: *mut c_void) {
    stacktrace_store::write_on_signal(signum);

    // Snapshot, then call: the registration is read exactly once.
    if let Some((callback, context)) = callback_config::on_signal_snapshot() {
        let fd = callback_config::signal_dump_fd();
        // SAFETY: registration requires a callback that is async-signal-safe
        // and never calls back into the host runtime's managed code.
        unsafe { callback(context, fd, signum, info, ucontext) };
    }

    run_chain(signum, info, ucontext);

    // SAFETY: only dereferences dispositions captured by `record_once`
    // before installation replaced them.
    unsafe { invoke_prior(signum, info, ucontext) };
}

fn run_chain(signum: c_int, info: *mut siginfo_t, ucontext: *mut c_void) {
    chain::mark_seen(signum);

    if let Some(rule) = chain::lookup(signum) {
        if let Some(to) = rule.to {
            if to != signum {
                // Secondary invocation goes straight to the prior
                // disposition of `to`: no banner, no callback, no chain
                // recursion.
                // SAFETY: same contract as the delegation below.
                unsafe { invoke_prior(to, info, ucontext) };
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
}

/// Delegate to the disposition recorded before installation.
/// How we chain depends on what kind of handler we're chaining to.
/// <https://www.gnu.org/software/libc/manual/html_node/Signal-Handling.html>
/// <https://man7.org/linux/man-pages/man2/sigaction.2.html>
unsafe fn invoke_prior(signum: c_int, info: *mut siginfo_t, ucontext: *mut c_void) {
    let Some((signal_type, action)) = registry::recorded(signum) else {
        // Nothing was recorded for this signal; nothing to chain to.
        return;
    };
    match action.handler() {
        SigHandler::SigDfl => {
            // Restore the default and re-raise so termination and core
            // dumps behave as if we were never installed.  Signals are
            // only delivered once; without the raise the default handler
            // would never see this one.
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            let _ = signal::sigaction(signal_type, &default);
            libc::raise(signum);
        }
        SigHandler::SigIgn => (), // Return and ignore the signal.
        SigHandler::Handler(handler) => handler(signum),
        SigHandler::SigAction(action_fn) => action_fn(signum, info, ucontext),
    }
}
