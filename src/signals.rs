//! Stop requests from SIGINT and SIGTERM
//!
//! The first signal asks the running transaction to stop after the current
//! resource. A second one exits immediately.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};

static STOP: AtomicBool = AtomicBool::new(false);

/// Record a stop request on `flag`
///
/// Returns `true` when a stop had already been requested.
#[cfg_attr(not(unix), allow(dead_code))]
fn request_stop(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn on_signal(_signal: nix::libc::c_int) {
    if request_stop(&STOP) {
        // SAFETY: _exit is async-signal-safe
        unsafe { nix::libc::_exit(130) };
    }
}

/// Install the handlers and return the flag they set
#[cfg(unix)]
pub fn install() -> Result<&'static AtomicBool> {
    use anyhow::Context;
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only touches an atomic and calls _exit
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("Failed to install {signal} handler"))?;
    }
    Ok(&STOP)
}

#[cfg(not(unix))]
pub fn install() -> Result<&'static AtomicBool> {
    Ok(&STOP)
}
