// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! Prior-disposition registry.
//!
//! One slot per signal number, written at most once for the life of the
//! process, so the disposition the host runtime installed before us is
//! never lost no matter how many times installation runs.  Writers are
//! serialized by a mutex; the dispatcher's read is lock-free and relies on
//! the acquire/release pairing on the per-slot flag.

use crate::shared::constants::MAX_SIGNALS;
use nix::sys::signal::{SigAction, Signal};
use std::cell::UnsafeCell;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, PoisonError};

// In this case, we actually WANT multiple copies of the interior mutable struct
#[allow(clippy::declare_interior_mutable_const)]
const UNRECORDED: AtomicBool = AtomicBool::new(false);

struct DispositionTable {
    recorded: [AtomicBool; MAX_SIGNALS],
    entries: UnsafeCell<[Option<(Signal, SigAction)>; MAX_SIGNALS]>,
}

// SAFETY: `entries[i]` is written exactly once, before the release store of
// `recorded[i]`; readers only dereference a slot after an acquire load
// observes the flag, at which point the slot is immutable.  Writers are
// additionally serialized by `WRITE_LOCK`.
unsafe impl Sync for DispositionTable {}

static TABLE: DispositionTable = DispositionTable {
    recorded: [UNRECORDED; MAX_SIGNALS],
    entries: UnsafeCell::new([None; MAX_SIGNALS]),
};

static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Record the disposition in force for `signum` unless one was already
/// recorded.  Returns whether this call performed the recording.
/// Never called from a signal handler.
pub(crate) fn record_once(signum: i32, disposition: (Signal, SigAction)) -> bool {
    let Some(index) = slot(signum) else {
        return false;
    };
    let _guard = WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if TABLE.recorded[index].load(Acquire) {
        return false;
    }
    // SAFETY: the flag is not set yet, so no reader dereferences this slot;
    // the write lock keeps other writers out.
    unsafe {
        (*TABLE.entries.get())[index] = Some(disposition);
    }
    TABLE.recorded[index].store(true, Release);
    true
}

/// Lock-free read used by the dispatcher while handling a delivery.
pub(crate) fn recorded(signum: i32) -> Option<(Signal, SigAction)> {
    let index = slot(signum)?;
    if !TABLE.recorded[index].load(Acquire) {
        return None;
    }
    // SAFETY: the acquire load pairs with the release store in
    // `record_once`, after which the slot is never written again.
    unsafe { (*TABLE.entries.get())[index] }
}

fn slot(signum: i32) -> Option<usize> {
    (1..MAX_SIGNALS as i32)
        .contains(&signum)
        .then_some(signum as usize)
}
