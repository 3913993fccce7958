use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set by the TX worker whenever the hardware reports an underflow. Read once, after the worker
/// has been joined, with `check_clear`.
#[derive(Debug, Default)]
pub struct UnderflowFlag(AtomicBool);

impl UnderflowFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return whether an underflow happened and clear the flag
    pub fn check_clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Cooperative stop request shared with the workers. Cloning gives another handle to the same
/// flag
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State shared between the workers of one session
#[derive(Debug, Default)]
pub struct StreamSignals {
    pub stop: StopHandle,
    pub underflow: UnderflowFlag,
}

impl StreamSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }
}
