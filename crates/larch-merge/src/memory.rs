//! User-memory accounting for retained pages.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks the bytes retained by one merge pipeline.
///
/// Reservations are RAII guards: dropping a reservation returns its bytes to
/// the context, so accounting drains to zero when the pipeline is drained or
/// torn down.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    reserved: Arc<AtomicUsize>,
}

impl MemoryContext {
    /// New context with nothing reserved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently reserved against this context.
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }

    /// Reserve `bytes` and return the owning guard.
    pub fn reserve(&self, bytes: usize) -> MemoryReservation {
        self.reserved.fetch_add(bytes, Ordering::SeqCst);
        MemoryReservation {
            context: self.clone(),
            bytes,
        }
    }
}

/// One accounted allocation. Dropping it releases the bytes.
#[derive(Debug)]
pub struct MemoryReservation {
    context: MemoryContext,
    bytes: usize,
}

impl MemoryReservation {
    /// Bytes held by this reservation.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Grow or shrink the reservation in place.
    pub fn resize(&mut self, bytes: usize) {
        if bytes >= self.bytes {
            self.context.reserved.fetch_add(bytes - self.bytes, Ordering::SeqCst);
        } else {
            self.context.reserved.fetch_sub(self.bytes - bytes, Ordering::SeqCst);
        }
        self.bytes = bytes;
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.context.reserved.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_balance_to_zero() {
        let context = MemoryContext::new();
        let a = context.reserve(100);
        let mut b = context.reserve(50);
        assert_eq!(context.reserved_bytes(), 150);

        b.resize(80);
        assert_eq!(context.reserved_bytes(), 180);
        b.resize(10);
        assert_eq!(context.reserved_bytes(), 110);

        drop(a);
        assert_eq!(context.reserved_bytes(), 10);
        drop(b);
        assert_eq!(context.reserved_bytes(), 0);
    }
}
