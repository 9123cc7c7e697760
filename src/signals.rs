//! Ctrl-C handling for the terminal session.

use std::io;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use chat_provider::CancelSignal;
use signal_hook::consts::SIGINT;
use signal_hook::iterator::{Handle, Signals};

/// Keeps the SIGINT listener running; dropping it stops the listener thread.
pub struct CancelHookGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for CancelHookGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Routes SIGINT to `cancel` instead of terminating the process.
///
/// A running reply stops at its next fragment. At an idle prompt the flag is
/// cleared again by the next submitted turn, so the signal has no effect.
pub fn install_cancel_handler(cancel: CancelSignal) -> io::Result<CancelHookGuard> {
    let mut signals = Signals::new([SIGINT])?;
    let handle = signals.handle();
    let thread = thread::Builder::new()
        .name("sigint-cancel".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                tracing::info!(signal, "interrupt received; cancelling generation");
                cancel.store(true, Ordering::Release);
            }
        })?;

    Ok(CancelHookGuard {
        handle,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::install_cancel_handler;

    #[test]
    fn sigint_sets_the_cancel_flag() {
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = install_cancel_handler(Arc::clone(&cancel)).expect("install handler");

        signal_hook::low_level::raise(signal_hook::consts::SIGINT).expect("raise SIGINT");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !cancel.load(Ordering::Acquire) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(cancel.load(Ordering::Acquire));
    }
}
