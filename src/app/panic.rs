//! Panic capture for the dispatch recovery boundary.
//!
//! `catch_unwind` hands back only the payload, so a process-wide hook records
//! the backtrace of the panic site in a thread-local slot. The boundary reads
//! it back on the same thread, in the same poll that observed the unwind.

use std::{any::Any, backtrace::Backtrace, cell::RefCell, panic, sync::Once};

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Installs the capturing hook on top of whatever hook was already set.
pub(crate) fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// The backtrace of the most recent panic on this thread, if any.
pub(crate) fn take_backtrace() -> Option<String> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// A human-readable message from a panic payload.
pub(crate) fn message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
