// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! End-to-end scenarios that deliver real signals to the test process.
//!
//! The dispatcher, registry, and chain tables are process-wide, so every
//! test takes the same lock, resets the shared configuration, and owns a
//! signal number no other test raises: the prior disposition for a signal
//! is recorded once per process and never replaced.

use libc::{c_int, c_void, siginfo_t};
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

static SIGNAL_TEST_LOCK: Mutex<()> = Mutex::new(());

fn serialize_test() -> MutexGuard<'static, ()> {
    let guard = SIGNAL_TEST_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    datadog_sigchain::set_signal_dump_to_fd(-1);
    datadog_sigchain::clear_on_signal();
    datadog_sigchain::set_stacktrace_dump_to_file("").unwrap();
    guard
}

/// Install a plain handler-form disposition the way a host runtime would,
/// bypassing this crate.
fn preinstall_handler(signum: c_int, handler: extern "C" fn(c_int)) {
    // SAFETY: zeroed sigaction plus a valid handler pointer.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        assert_eq!(libc::sigaction(signum, &action, std::ptr::null_mut()), 0);
    }
}

/// Same, but action-form (`SA_SIGINFO`).
fn preinstall_action(signum: c_int, action_fn: extern "C" fn(c_int, *mut siginfo_t, *mut c_void)) {
    // SAFETY: zeroed sigaction plus a valid action pointer.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = action_fn as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_SIGINFO;
        assert_eq!(libc::sigaction(signum, &action, std::ptr::null_mut()), 0);
    }
}

fn make_pipe() -> (c_int, c_int) {
    let mut fds = [0 as c_int; 2];
    // SAFETY: `fds` is a valid two-element array.
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn read_available(fd: c_int) -> Vec<u8> {
    // SAFETY: querying and setting flags on an fd we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        // SAFETY: `buf` is valid for `buf.len()` bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len() as _) };
        if n <= 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n as usize]);
    }
    collected
}

fn close_pair(read_fd: c_int, write_fd: c_int) {
    // SAFETY: closing fds this test created.
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

fn raise(signum: c_int) {
    // SAFETY: raise has no preconditions.
    assert_eq!(unsafe { libc::raise(signum) }, 0);
}

static USR1_PRIOR_CALLS: AtomicUsize = AtomicUsize::new(0);
extern "C" fn usr1_prior(_signum: c_int) {
    USR1_PRIOR_CALLS.fetch_add(1, SeqCst);
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_banner_only_then_prior_disposition() {
    let _guard = serialize_test();
    let (read_fd, write_fd) = make_pipe();
    datadog_sigchain::set_signal_dump_to_fd(write_fd);

    preinstall_handler(libc::SIGUSR1, usr1_prior);
    datadog_sigchain::set_sig(libc::SIGUSR1).unwrap();

    raise(libc::SIGUSR1);

    assert_eq!(USR1_PRIOR_CALLS.load(SeqCst), 1, "prior handler runs once");
    let banner = read_available(read_fd);
    assert_eq!(
        banner,
        format!("Signal received({}).\n", libc::SIGUSR1).into_bytes()
    );

    datadog_sigchain::set_signal_dump_to_fd(-1);
    close_pair(read_fd, write_fd);
}

static TERM_PRIOR_CALLS: AtomicUsize = AtomicUsize::new(0);
extern "C" fn term_prior(_signum: c_int) {
    TERM_PRIOR_CALLS.fetch_add(1, SeqCst);
}

static INT_PRIOR_CALLS: AtomicUsize = AtomicUsize::new(0);
extern "C" fn int_prior(_signum: c_int) {
    INT_PRIOR_CALLS.fetch_add(1, SeqCst);
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_chain_to_invokes_secondary_prior_once() {
    let _guard = serialize_test();
    let (read_fd, write_fd) = make_pipe();
    datadog_sigchain::set_signal_dump_to_fd(write_fd);

    preinstall_handler(libc::SIGTERM, term_prior);
    preinstall_handler(libc::SIGINT, int_prior);
    datadog_sigchain::set_sig(libc::SIGTERM).unwrap();
    datadog_sigchain::set_sig(libc::SIGINT).unwrap();
    datadog_sigchain::set_chain(libc::SIGTERM, libc::SIGINT, -1, 0).unwrap();

    raise(libc::SIGTERM);

    assert_eq!(INT_PRIOR_CALLS.load(SeqCst), 1, "chained-to prior runs once");
    assert_eq!(TERM_PRIOR_CALLS.load(SeqCst), 1, "own prior runs once");
    // One banner for the delivered signal, none for the chained one.
    let banner = read_available(read_fd);
    assert_eq!(
        banner,
        format!("Signal received({}).\n", libc::SIGTERM).into_bytes()
    );

    datadog_sigchain::set_signal_dump_to_fd(-1);
    close_pair(read_fd, write_fd);
}

extern "C" fn quiet_prior(_signum: c_int) {}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_chain_wait_blocks_until_second_signal() {
    let _guard = serialize_test();

    preinstall_handler(libc::SIGHUP, quiet_prior);
    preinstall_handler(libc::SIGQUIT, quiet_prior);
    datadog_sigchain::set_sig(libc::SIGHUP).unwrap();
    datadog_sigchain::set_sig(libc::SIGQUIT).unwrap();
    datadog_sigchain::set_chain(libc::SIGHUP, -1, libc::SIGQUIT, 0).unwrap();

    let waker = std::thread::spawn(|| {
        std::thread::sleep(Duration::from_millis(200));
        raise(libc::SIGQUIT);
    });

    let start = Instant::now();
    raise(libc::SIGHUP);
    let blocked = start.elapsed();
    waker.join().unwrap();

    assert!(
        blocked >= Duration::from_millis(150),
        "handler returned before the awaited signal: {blocked:?}"
    );
    assert!(
        blocked < Duration::from_secs(3),
        "poll loop overshot: {blocked:?}"
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_dump_file_round_trip() {
    let _guard = serialize_test();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crash.bin");
    datadog_sigchain::set_stacktrace_dump_to_file(path.to_str().unwrap()).unwrap();

    preinstall_handler(libc::SIGUSR2, quiet_prior);
    datadog_sigchain::set_sig(libc::SIGUSR2).unwrap();

    raise(libc::SIGUSR2);

    assert!(datadog_sigchain::has_previous());
    let text = datadog_sigchain::previous_stacktrace();
    assert!(!text.is_empty());
    assert!(text.lines().count() >= 3, "got: {text}");
    assert!(text.lines().next().unwrap().contains('#'));

    datadog_sigchain::set_stacktrace_dump_to_file("").unwrap();
}

static SEGV_PRIOR_CALLS: AtomicUsize = AtomicUsize::new(0);
extern "C" fn segv_prior(_signum: c_int, _info: *mut siginfo_t, _ucontext: *mut c_void) {
    SEGV_PRIOR_CALLS.fetch_add(1, SeqCst);
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_prior_disposition_survives_reinstall() {
    let _guard = serialize_test();
    let (read_fd, write_fd) = make_pipe();
    datadog_sigchain::set_signal_dump_to_fd(write_fd);

    preinstall_action(libc::SIGSEGV, segv_prior);
    datadog_sigchain::set_sig(libc::SIGSEGV).unwrap();
    datadog_sigchain::set_sig(libc::SIGSEGV).unwrap();

    raise(libc::SIGSEGV);
    raise(libc::SIGSEGV);

    // Were the second install to overwrite the recorded disposition with
    // the dispatcher itself, delegation would recurse and double the
    // banner count; were it to drop the prior, the spy would never run.
    assert_eq!(SEGV_PRIOR_CALLS.load(SeqCst), 2);
    let banners = String::from_utf8(read_available(read_fd)).unwrap();
    let expected = format!("Signal received({}).\n", libc::SIGSEGV);
    assert_eq!(banners, expected.repeat(2));

    datadog_sigchain::set_signal_dump_to_fd(-1);
    close_pair(read_fd, write_fd);
}

static CALLBACK_FD: AtomicUsize = AtomicUsize::new(usize::MAX);
static CALLBACK_SIGNUM: AtomicUsize = AtomicUsize::new(usize::MAX);
unsafe extern "C" fn observe_callback(
    _ctx: *mut c_void,
    fd: c_int,
    signum: c_int,
    _info: *mut siginfo_t,
    _ucontext: *mut c_void,
) {
    CALLBACK_FD.store(fd as usize, SeqCst);
    CALLBACK_SIGNUM.store(signum as usize, SeqCst);
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_user_callback_sees_fd_and_signum() {
    let _guard = serialize_test();
    let (read_fd, write_fd) = make_pipe();
    datadog_sigchain::set_signal_dump_to_fd(write_fd);
    datadog_sigchain::register_on_signal(observe_callback, std::ptr::null_mut());

    preinstall_handler(libc::SIGPROF, quiet_prior);
    datadog_sigchain::set_sig(libc::SIGPROF).unwrap();

    raise(libc::SIGPROF);

    assert_eq!(CALLBACK_FD.load(SeqCst), write_fd as usize);
    assert_eq!(CALLBACK_SIGNUM.load(SeqCst), libc::SIGPROF as usize);

    datadog_sigchain::clear_on_signal();
    datadog_sigchain::set_signal_dump_to_fd(-1);
    close_pair(read_fd, write_fd);
}

static ALRM_PRIOR_CALLS: AtomicUsize = AtomicUsize::new(0);
extern "C" fn alrm_prior(_signum: c_int) {
    ALRM_PRIOR_CALLS.fetch_add(1, SeqCst);
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_self_referential_chain_is_ignored() {
    let _guard = serialize_test();

    preinstall_handler(libc::SIGALRM, alrm_prior);
    datadog_sigchain::set_sig(libc::SIGALRM).unwrap();
    // `to == from` would double-invoke the prior, `wait == from` would
    // deadlock the handler; both fields must be skipped.
    datadog_sigchain::set_chain(libc::SIGALRM, libc::SIGALRM, libc::SIGALRM, 0).unwrap();

    let start = Instant::now();
    raise(libc::SIGALRM);

    assert_eq!(ALRM_PRIOR_CALLS.load(SeqCst), 1);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
#[cfg_attr(miri, ignore)]
fn scenario_chain_pipe_wakes_reader() {
    let _guard = serialize_test();
    let (read_fd, write_fd) = make_pipe();

    preinstall_handler(libc::SIGWINCH, quiet_prior);
    datadog_sigchain::set_sig(libc::SIGWINCH).unwrap();
    datadog_sigchain::set_chain_pipe(libc::SIGWINCH, write_fd, read_fd).unwrap();

    raise(libc::SIGWINCH);

    assert_eq!(read_available(read_fd), vec![1u8]);
    close_pair(read_fd, write_fd);
}
