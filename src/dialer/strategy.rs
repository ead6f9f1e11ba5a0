//! Serial/concurrent strategy selection

use super::race::{
    concurrent_dual_stack, concurrent_single_stack, serial_dual_stack, serial_single_stack, DialFn,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(300);

/// Strategy pair and fallback delay a dial call runs under
#[derive(Clone, Copy)]
pub struct Strategy {
    pub(crate) single_stack: DialFn,
    pub(crate) dual_stack: DialFn,
    pub concurrent: bool,
    pub fallback_delay: Duration,
}

impl Strategy {
    fn new(concurrent: bool, fallback_delay: Duration) -> Self {
        let (single_stack, dual_stack): (DialFn, DialFn) = if concurrent {
            (concurrent_single_stack, concurrent_dual_stack)
        } else {
            (serial_single_stack, serial_dual_stack)
        };
        Strategy {
            single_stack,
            dual_stack,
            concurrent,
            fallback_delay,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("concurrent", &self.concurrent)
            .field("fallback_delay", &self.fallback_delay)
            .finish()
    }
}

/// Thread-safe switch between serial and concurrent dialing.
///
/// Dial calls take a [`Strategy`] snapshot when they start, so a switch only
/// affects calls that begin after it.
pub struct StrategySelector {
    current: Mutex<Strategy>,
}

impl StrategySelector {
    /// Serial dialing with the default fallback delay
    pub fn new() -> Self {
        StrategySelector {
            current: Mutex::new(Strategy::new(false, DEFAULT_FALLBACK_DELAY)),
        }
    }

    pub fn set_concurrent(&self, concurrent: bool) {
        let mut current = self.current.lock();
        *current = Strategy::new(concurrent, current.fallback_delay);
    }

    pub fn is_concurrent(&self) -> bool {
        self.current.lock().concurrent
    }

    /// Interval of the dual-stack fallback tick. Zero is ignored.
    pub fn set_fallback_delay(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        self.current.lock().fallback_delay = delay;
    }

    pub fn fallback_delay(&self) -> Duration {
        self.current.lock().fallback_delay
    }

    pub fn snapshot(&self) -> Strategy {
        *self.current.lock()
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StrategySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StrategySelector").field(&self.snapshot()).finish()
    }
}

static STRATEGY: OnceLock<Arc<StrategySelector>> = OnceLock::new();

/// Process-wide strategy selector
pub fn strategy() -> Arc<StrategySelector> {
    STRATEGY
        .get_or_init(|| Arc::new(StrategySelector::new()))
        .clone()
}

/// Switch process-wide dialing between serial and concurrent
pub fn set_tcp_concurrent(concurrent: bool) {
    strategy().set_concurrent(concurrent);
    info!("tcp concurrent dialing {}", if concurrent { "enabled" } else { "disabled" });
}

pub fn tcp_concurrent() -> bool {
    strategy().is_concurrent()
}
