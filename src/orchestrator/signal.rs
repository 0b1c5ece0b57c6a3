use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootMode {
    /// Clean caches, provision dependencies, generate and sync schema.
    Full,
    /// Skip provisioning and schema work; only `fast_caches` are cleaned.
    Fast,
}

impl fmt::Display for RebootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootMode::Full => write!(f, "full"),
            RebootMode::Fast => write!(f, "fast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Reboot(RebootMode),
    Quit,
}

impl Signal {
    fn encode(self) -> u8 {
        match self {
            Signal::Continue => 0,
            Signal::Reboot(RebootMode::Full) => 1,
            Signal::Reboot(RebootMode::Fast) => 2,
            Signal::Quit => 3,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            1 => Signal::Reboot(RebootMode::Full),
            2 => Signal::Reboot(RebootMode::Fast),
            3 => Signal::Quit,
            _ => Signal::Continue,
        }
    }
}

/// The one piece of state shared between the monitoring loop and the
/// command listener.
///
/// Within a cycle the signal only moves away from `Continue` once: the first
/// request wins and later requests are ignored until [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct SupervisorSignal(AtomicU8);

impl SupervisorSignal {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn get(&self) -> Signal {
        Signal::decode(self.0.load(Ordering::Acquire))
    }

    /// Request a reboot or quit. Returns `true` when this call set the
    /// signal, `false` when another request already had.
    pub fn request(&self, signal: Signal) -> bool {
        if signal == Signal::Continue {
            return false;
        }
        self.0
            .compare_exchange(0, signal.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_continue(&self) -> bool {
        self.get() == Signal::Continue
    }

    /// Back to `Continue`. Only the supervisor calls this, at the start of a
    /// cycle.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}
