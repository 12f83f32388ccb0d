//! Primary-thread marker.
//!
//! Cache operations block on disk IO and must never run on the host's
//! primary (UI or event-loop) thread. The host calls
//! [`mark_primary_thread`] once at startup; every engine-touching cache
//! operation then calls [`assert_off_primary_thread`].

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

static PRIMARY_THREAD: OnceLock<ThreadId> = OnceLock::new();

/// Records the calling thread as the process's primary thread.
///
/// Returns `false` if a primary thread was already recorded (the first call wins).
pub fn mark_primary_thread() -> bool {
    PRIMARY_THREAD.set(thread::current().id()).is_ok()
}

/// Whether the calling thread is the recorded primary thread.
#[must_use]
pub fn is_primary_thread() -> bool {
    PRIMARY_THREAD
        .get()
        .is_some_and(|id| *id == thread::current().id())
}

/// Fails loudly when a blocking cache operation runs on the primary thread.
///
/// Panics in debug builds; logs an error in release builds.
#[track_caller]
pub fn assert_off_primary_thread(operation: &'static str) {
    if is_primary_thread() {
        tracing::error!(operation, "blocking cache operation invoked on the primary thread");
        debug_assert!(false, "{operation} must not run on the primary thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_marked_thread_is_primary() {
        let marked = thread::spawn(|| {
            let first = mark_primary_thread();
            (first, is_primary_thread())
        })
        .join()
        .unwrap();

        assert!(marked.0, "first mark should win");
        assert!(marked.1);
        assert!(!is_primary_thread());
        assert!(!mark_primary_thread(), "second mark is ignored");

        // Off the primary thread the assertion is silent.
        assert_off_primary_thread("get");
    }
}
