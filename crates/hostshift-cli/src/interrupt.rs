use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use thiserror::Error;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Raised at the next step boundary after SIGINT or SIGTERM.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("conversion aborted by an interrupt signal")]
pub struct ConversionAborted;

extern "C" fn record_signal(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to the process-wide flag instead of terminating.
/// A mutation already in flight runs to completion.
pub fn install_signal_handlers() -> Result<&'static AtomicBool> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        let handler = record_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            return Err(anyhow!("failed to install handler for signal {signal}"));
        }
    }
    Ok(&INTERRUPTED)
}

pub fn check_interrupt(flag: &AtomicBool) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(ConversionAborted.into());
    }
    Ok(())
}

pub fn is_aborted(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ConversionAborted>().is_some())
}
