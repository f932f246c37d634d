//! Cooperative yield signal shared between the driver and the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag the driver raises to ask the engine to give control back.
///
/// The engine checks the signal between row appends; a raised signal makes
/// it return after emitting whatever output is complete, resumable from the
/// same heap state. This avoids any coroutine primitive.
#[derive(Debug, Clone, Default)]
pub struct YieldSignal {
    raised: Arc<AtomicBool>,
}

impl YieldSignal {
    /// New, unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to yield at the next row boundary.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Clear the signal so processing can resume.
    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Whether the signal is currently raised.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}
