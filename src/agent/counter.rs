//! Host-wide count of agents holding a VM slot.

use std::sync::Arc;

use parking_lot::Mutex;

use super::RestartCoordinator;

/// Number of agents whose VM will need disposal, plus the derived
/// "safe to restart" signal.
///
/// All updates happen under one lock and the coordinator is notified while
/// it is held, so readiness updates reach it in the order they happened.
pub struct ActiveAgents {
    count: Mutex<usize>,
    coordinator: Arc<dyn RestartCoordinator>,
}

impl ActiveAgents {
    pub fn new(coordinator: Arc<dyn RestartCoordinator>) -> Self {
        Self {
            count: Mutex::new(0),
            coordinator,
        }
    }

    /// Record one more active agent. Returns the new readiness (always false).
    pub fn acquire(&self) -> bool {
        let mut count = self.count.lock();
        *count += 1;
        if *count == 1 {
            self.coordinator.set_ready_to_restart(false);
        }
        tracing::debug!(active = *count, "agent slot acquired");
        false
    }

    /// Record one agent less, never going below zero. Returns the new readiness.
    pub fn release(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            tracing::debug!("agent slot released with no active agents");
            return true;
        }

        *count -= 1;
        if *count == 0 {
            self.coordinator.set_ready_to_restart(true);
        }
        tracing::debug!(active = *count, "agent slot released");
        *count == 0
    }

    /// Current number of active agents.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Whether no agent holds a slot.
    pub fn is_ready_to_restart(&self) -> bool {
        self.count() == 0
    }
}
