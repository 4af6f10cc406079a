// =============================================================================
// gate.rs: process-wide initialization gate
// =============================================================================
//
// Externally the gate has two states: not ready and ready. Internally a
// third phase, Bootstrapping, lets exactly one caller claim the one-time
// transition. Publication is a single release store of the context pointer;
// readers acquire it. A reader therefore either sees no context at all or a
// fully built one, never anything in between.
// =============================================================================

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized = 0,
    Bootstrapping = 1,
    Ready = 2,
}

impl Phase {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Bootstrapping,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Bootstrapping => "bootstrapping",
            Phase::Ready => "ready",
        }
    }
}

/// Write-once holder for the redirection context.
pub struct InitGate<T> {
    phase: AtomicU8,
    ctx: AtomicPtr<T>,
    _owns: PhantomData<Box<T>>,
}

impl<T: Send + Sync> InitGate<T> {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Uninitialized as u8),
            ctx: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// The published context, or `None` while not ready.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        let p = self.ctx.load(Ordering::Acquire);
        if p.is_null() {
            None
        } else {
            // Published once, never freed before the gate itself
            Some(unsafe { &*p })
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        !self.ctx.load(Ordering::Acquire).is_null()
    }

    /// Claim the bootstrap. Only one caller ever gets `true`.
    pub fn try_begin(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Uninitialized as u8,
                Phase::Bootstrapping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish `ctx` and enter `Ready`. The caller must hold the claim from
    /// [`try_begin`](Self::try_begin); otherwise `ctx` is handed back.
    pub fn publish(&self, ctx: T) -> Result<&T, T> {
        if self.phase() != Phase::Bootstrapping {
            return Err(ctx);
        }
        let p = Box::into_raw(Box::new(ctx));
        self.ctx.store(p, Ordering::Release);
        self.phase.store(Phase::Ready as u8, Ordering::Release);
        Ok(unsafe { &*p })
    }

    /// Give up a claimed bootstrap; the gate stays not ready.
    pub fn abandon(&self) {
        let _ = self.phase.compare_exchange(
            Phase::Bootstrapping as u8,
            Phase::Uninitialized as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl<T: Send + Sync> Default for InitGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for InitGate<T> {
    fn drop(&mut self) {
        let p = *self.ctx.get_mut();
        if !p.is_null() {
            drop(unsafe { Box::from_raw(p) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_uninitialized() {
        let gate: InitGate<u32> = InitGate::new();
        assert_eq!(gate.phase(), Phase::Uninitialized);
        assert!(gate.get().is_none());
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_publish_requires_claim() {
        let gate: InitGate<u32> = InitGate::new();
        assert_eq!(gate.publish(7), Err(7));
        assert!(gate.try_begin());
        assert_eq!(gate.publish(7), Ok(&7));
        assert_eq!(gate.get(), Some(&7));
        assert_eq!(gate.phase(), Phase::Ready);
    }

    #[test]
    fn test_ready_is_terminal() {
        let gate: InitGate<u32> = InitGate::new();
        assert!(gate.try_begin());
        gate.publish(1).unwrap();
        assert!(!gate.try_begin());
        gate.abandon();
        assert_eq!(gate.phase(), Phase::Ready);
        assert_eq!(gate.publish(2), Err(2));
        assert_eq!(gate.get(), Some(&1));
    }

    #[test]
    fn test_abandon_allows_retry() {
        let gate: InitGate<u32> = InitGate::new();
        assert!(gate.try_begin());
        assert!(!gate.try_begin());
        gate.abandon();
        assert_eq!(gate.phase(), Phase::Uninitialized);
        assert!(gate.get().is_none());
        assert!(gate.try_begin());
    }

    #[test]
    fn test_single_winner_across_threads() {
        let gate: Arc<InitGate<u32>> = Arc::new(InitGate::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.try_begin())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_readers_see_complete_context() {
        let gate: Arc<InitGate<Vec<u64>>> = Arc::new(InitGate::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || loop {
                    if let Some(v) = gate.get() {
                        return v.len();
                    }
                    std::hint::spin_loop();
                })
            })
            .collect();

        assert!(gate.try_begin());
        gate.publish((0..1024).collect()).unwrap();

        for r in readers {
            assert_eq!(r.join().unwrap(), 1024);
        }
    }
}
