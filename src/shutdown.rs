use signal_hook::consts::SIGINT;
use signal_hook::SigId;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Routes SIGINT into a flag for the lifetime of the guard.
///
/// While installed, Ctrl-C no longer kills the process: an exchange already on the wire runs
/// to completion and the command loop stops before the next prompt.
pub struct InterruptGuard {
    handle: InterruptHandle,
    id: SigId,
}

impl InterruptGuard {
    pub fn install() -> io::Result<Self> {
        let handle = InterruptHandle::new();
        let id = signal_hook::flag::register(SIGINT, Arc::clone(&handle.flag))?;
        debug!("SIGINT handler installed");
        Ok(Self { handle, id })
    }

    pub fn handle(&self) -> InterruptHandle {
        self.handle.clone()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.id);
    }
}

/// Lightweight handle for checking whether the user asked to stop.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}
