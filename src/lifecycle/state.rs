//! Backend lifecycle state machine.
//!
//! # State Transitions
//! ```text
//! Idle    → Running : start() claimed the backend
//! Running → Stopped : stop(), bind failure, or serve loop ended
//! Idle    → Idle    : stop() before start() (no-op)
//! Running → Running : start() again (no-op)
//! Stopped → Stopped : stop()/start() again (no-op)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle state of one backend instance.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl From<u8> for LifecycleState {
    fn from(val: u8) -> Self {
        match val {
            0 => LifecycleState::Idle,
            1 => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Atomic holder for a `LifecycleState`.
///
/// Every transition is a single compare-exchange so the thread blocked in
/// `start()` and the thread calling `stop()` never need a lock.
#[derive(Debug)]
pub struct LifecycleCell {
    state: AtomicU8,
}

impl LifecycleCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Idle as u8),
        }
    }

    pub fn get(&self) -> LifecycleState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Idle → Running. Returns the observed state on failure.
    pub fn begin(&self) -> Result<(), LifecycleState> {
        self.transition(LifecycleState::Idle, LifecycleState::Running)
    }

    /// Running → Stopped. Returns true only for the call that performed it.
    pub fn stop(&self) -> bool {
        self.transition(LifecycleState::Running, LifecycleState::Stopped)
            .is_ok()
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(LifecycleState::from)
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Set while some backend in this process is serving.
static PROCESS_SLOT: AtomicBool = AtomicBool::new(false);

/// Process-wide claim that at most one backend is serving.
///
/// Every handle points at the same flag, so the claim holds across
/// registries as well as across backends of one registry.
#[derive(Debug, Clone, Copy)]
pub struct RunSlot {
    taken: &'static AtomicBool,
}

impl RunSlot {
    /// Handle to the slot shared by the whole process.
    pub fn global() -> Self {
        Self {
            taken: &PROCESS_SLOT,
        }
    }

    /// Claim the slot. Returns a guard that releases it on drop.
    pub fn try_claim(&self) -> Option<RunSlotGuard> {
        self.taken
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunSlotGuard { taken: self.taken })
    }

    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::SeqCst)
    }
}

/// A RAII guard holding the run slot.
#[derive(Debug)]
pub struct RunSlotGuard {
    taken: &'static AtomicBool,
}

impl Drop for RunSlotGuard {
    fn drop(&mut self) {
        self.taken.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_runs_once() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.get(), LifecycleState::Idle);

        assert!(cell.begin().is_ok());
        assert_eq!(cell.get(), LifecycleState::Running);
        assert_eq!(cell.begin(), Err(LifecycleState::Running));
    }

    #[test]
    fn stop_before_start_is_noop() {
        let cell = LifecycleCell::new();
        assert!(!cell.stop());
        assert_eq!(cell.get(), LifecycleState::Idle);
    }

    #[test]
    fn double_stop_is_noop() {
        let cell = LifecycleCell::new();
        cell.begin().unwrap();
        assert!(cell.stop());
        assert!(!cell.stop());
        assert_eq!(cell.get(), LifecycleState::Stopped);
        assert_eq!(cell.begin(), Err(LifecycleState::Stopped));
    }

    #[test]
    fn run_slot_is_shared_by_every_handle() {
        // Only test in this binary that claims the slot.
        let slot = RunSlot::global();
        let other = RunSlot::global();

        let guard = slot.try_claim().expect("first claim");
        assert!(other.try_claim().is_none());
        assert!(other.is_taken());

        drop(guard);
        assert!(!slot.is_taken());
        assert!(other.try_claim().is_some());
    }
}
