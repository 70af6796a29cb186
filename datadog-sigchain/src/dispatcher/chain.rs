// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signal-chain tables and the seen-flag wait loop.
//!
//! On delivery of `from`, a timed rule can invoke the prior disposition of
//! `to`, block until `wait` has been seen, and then sleep a fixed number of
//! seconds; a pipe rule wakes a descriptor instead.  Rules are overwritten
//! wholesale under a lock; the dispatcher's lookup is lock-free and treats
//! a rule whose stored `from` does not match its key as absent.

use crate::shared::constants::{CHAIN_WAIT_POLL_SECONDS, MAX_SIGNALS};
use std::cell::UnsafeCell;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, PoisonError};

/// Timed chain rule: `to` and `wait` are other signal numbers, `None` when
/// the step is disabled.  Self-references are skipped at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRule {
    pub from: i32,
    pub to: Option<i32>,
    pub wait: Option<i32>,
    pub sleep_seconds: u32,
}

/// Pipe chain rule: on delivery of `from`, one byte is written to
/// `writer_fd` to wake whatever blocks on `reader_fd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeRule {
    pub from: i32,
    pub writer_fd: i32,
    pub reader_fd: i32,
}

// In this case, we actually WANT multiple copies of the interior mutable struct
#[allow(clippy::declare_interior_mutable_const)]
const UNSET: AtomicBool = AtomicBool::new(false);

struct RuleTable<T> {
    set: [AtomicBool; MAX_SIGNALS],
    entries: UnsafeCell<[Option<T>; MAX_SIGNALS]>,
}

// SAFETY: writes happen under `WRITE_LOCK` and publish with a release
// store; readers dereference only after an acquire load of the flag.  An
// overwrite after signals are installed can race a concurrent delivery;
// that window is accepted, chains are configured before installation.
unsafe impl<T: Send> Sync for RuleTable<T> {}

impl<T: Copy> RuleTable<T> {
    fn store(&self, index: usize, rule: T) {
        let _guard = WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // SAFETY: serialized by the lock; see the Sync rationale above.
        unsafe {
            (*self.entries.get())[index] = Some(rule);
        }
        self.set[index].store(true, Release);
    }

    fn load(&self, index: usize) -> Option<T> {
        if !self.set[index].load(Acquire) {
            return None;
        }
        // SAFETY: acquire pairs with the release store in `store`.
        unsafe { (*self.entries.get())[index] }
    }
}

static WRITE_LOCK: Mutex<()> = Mutex::new(());

static TIMED_RULES: RuleTable<ChainRule> = RuleTable {
    set: [UNSET; MAX_SIGNALS],
    entries: UnsafeCell::new([None; MAX_SIGNALS]),
};

static PIPE_RULES: RuleTable<PipeRule> = RuleTable {
    set: [UNSET; MAX_SIGNALS],
    entries: UnsafeCell::new([None; MAX_SIGNALS]),
};

/// Overwrite the timed chain rule for `from`.  Negative `to`/`wait`
/// disable the respective step, matching the C surface.
pub fn set_chain(from: i32, to: i32, wait: i32, sleep_seconds: u32) -> anyhow::Result<()> {
    let index = slot(from)?;
    TIMED_RULES.store(
        index,
        ChainRule {
            from,
            to: (to >= 0).then_some(to),
            wait: (wait >= 0).then_some(wait),
            sleep_seconds,
        },
    );
    Ok(())
}

/// Overwrite the pipe chain rule for `from`.
pub fn set_chain_pipe(from: i32, writer_fd: i32, reader_fd: i32) -> anyhow::Result<()> {
    let index = slot(from)?;
    PIPE_RULES.store(
        index,
        PipeRule {
            from,
            writer_fd,
            reader_fd,
        },
    );
    Ok(())
}

/// Rule lookup for the dispatcher.  A stored rule whose `from` does not
/// match the key is treated as absent.
pub(crate) fn lookup(signum: i32) -> Option<ChainRule> {
    let index = checked_slot(signum)?;
    TIMED_RULES.load(index).filter(|rule| rule.from == signum)
}

pub(crate) fn lookup_pipe(signum: i32) -> Option<PipeRule> {
    let index = checked_slot(signum)?;
    PIPE_RULES.load(index).filter(|rule| rule.from == signum)
}

fn slot(from: i32) -> anyhow::Result<usize> {
    anyhow::ensure!(
        (1..MAX_SIGNALS as i32).contains(&from),
        "signal number {from} out of range"
    );
    Ok(from as usize)
}

fn checked_slot(signum: i32) -> Option<usize> {
    (1..MAX_SIGNALS as i32)
        .contains(&signum)
        .then_some(signum as usize)
}

// Written only by the dispatcher, read only by the wait loop.
#[allow(clippy::declare_interior_mutable_const)]
const UNSEEN: AtomicBool = AtomicBool::new(false);
static SEEN: [AtomicBool; MAX_SIGNALS] = [UNSEEN; MAX_SIGNALS];

/// Flag `signum` as delivered.  Called by the dispatcher before chain
/// evaluation; pairs with the acquire loads in [`wait_for`].
pub(crate) fn mark_seen(signum: i32) {
    if let Some(index) = checked_slot(signum) {
        SEEN[index].store(true, Release);
    }
}

/// Block until `signum` has been seen, polling at 1-second granularity,
/// clearing the flag on exit.  The sleep wakes early when any unmasked
/// signal is delivered to the polling thread, so the common case reacts
/// faster than the poll bound.
pub(crate) fn wait_for(signum: i32) {
    let Some(index) = checked_slot(signum) else {
        return;
    };
    loop {
        if SEEN[index].load(Acquire) {
            SEEN[index].store(false, Release);
            return;
        }
        sleep_seconds(CHAIN_WAIT_POLL_SECONDS);
    }
}

#[cfg(unix)]
pub(crate) fn sleep_seconds(seconds: u32) {
    // SAFETY: sleep(3) is the original interruptible wait primitive here;
    // it has no preconditions.
    unsafe { libc::sleep(seconds) };
}

#[cfg(not(unix))]
pub(crate) fn sleep_seconds(seconds: u32) {
    std::thread::sleep(std::time::Duration::from_secs(seconds.into()));
}
