//! Fork awareness
//!
//! After a process clone the child inherits a running capture whose
//! hooks point at the parent's bookkeeping. A fork observer (an atfork
//! handler, or the host's own fork notification) calls
//! [`teardown_active`] in the child; the capture notices the disarmed
//! token at its next use and drops to idle without touching the stale
//! hooks.
//!
//! At most one capture is active per OS thread, so a per-thread slot is
//! enough to find it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

/// Shared armed flag between a capture and the per-thread slot. The
/// capture arms it on `start` and disarms it on `stop`; the fork
/// observer disarms it from outside.
#[derive(Debug, Clone, Default)]
pub(crate) struct ArmedToken(Rc<Cell<bool>>);

impl ArmedToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn arm(&self) {
        self.0.set(true);
    }

    pub(crate) fn disarm(&self) {
        self.0.set(false);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.0.get()
    }

    fn same_as(&self, other: &ArmedToken) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<ArmedToken>> = const { RefCell::new(None) };
}

pub(crate) fn set_active(token: ArmedToken) {
    ACTIVE.with(|slot| *slot.borrow_mut() = Some(token));
}

/// Clear the slot, but only if it still belongs to the given capture.
pub(crate) fn clear_active(token: &ArmedToken) {
    ACTIVE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(|active| active.same_as(token)) {
            *slot = None;
        }
    });
}

/// Forcibly disarm the capture that was active on this thread, if any.
/// Returns whether a capture was torn down.
///
/// Call this from a fork observer in the child process. The capture's
/// next `dispatch` or `stop` sees the disarmed token and clears its
/// active state; `stop` then reports `false` and does not try to remove
/// hooks that no longer exist.
pub fn teardown_active() -> bool {
    ACTIVE.with(|slot| match slot.borrow_mut().take() {
        Some(token) => {
            token.disarm();
            debug!("active capture torn down after fork");
            true
        }
        None => false,
    })
}
