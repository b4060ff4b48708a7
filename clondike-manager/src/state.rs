//! Manager state machine (spec. §4.4): a small hand-rolled state machine
//! with atomic, guarded transitions rather than a generic FSM crate —
//! matching the size and shape of `wormhole`'s other small enum-driven
//! state trackers.

use parking_lot::Mutex;

use clondike_wire::{ClondikeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Init,
    Connected,
    ShuttingDown,
    ShutDown,
}

impl ManagerState {
    fn name(self) -> &'static str {
        match self {
            ManagerState::Init => "Init",
            ManagerState::Connected => "Connected",
            ManagerState::ShuttingDown => "ShuttingDown",
            ManagerState::ShutDown => "ShutDown",
        }
    }
}

/// Legal edges (spec. §4.4 diagram): `Init -> Connected`, the auth-failure
/// short-cut `Init -> ShutDown`, `Connected -> ShuttingDown`, and
/// `ShuttingDown -> ShutDown`.
const LEGAL: &[(ManagerState, ManagerState)] = &[
    (ManagerState::Init, ManagerState::Connected),
    (ManagerState::Init, ManagerState::ShutDown),
    (ManagerState::Connected, ManagerState::ShuttingDown),
    (ManagerState::ShuttingDown, ManagerState::ShutDown),
];

pub struct ManagerStateCell(Mutex<ManagerState>);

impl Default for ManagerStateCell {
    fn default() -> Self {
        Self(Mutex::new(ManagerState::Init))
    }
}

impl ManagerStateCell {
    pub fn get(&self) -> ManagerState {
        *self.0.lock()
    }

    /// Guarded transition: only a state pair listed in `LEGAL` succeeds.
    /// Requests arriving in `ShuttingDown` must be dropped by the caller,
    /// not retried through this (spec. §4.4).
    pub fn try_transition(&self, to: ManagerState) -> Result<()> {
        let mut current = self.0.lock();
        if LEGAL.contains(&(*current, to)) {
            *current = to;
            Ok(())
        } else {
            Err(ClondikeError::BadState(format!("{} -> {}", current.name(), to.name())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_path_succeeds() {
        let cell = ManagerStateCell::default();
        cell.try_transition(ManagerState::Connected).unwrap();
        cell.try_transition(ManagerState::ShuttingDown).unwrap();
        cell.try_transition(ManagerState::ShutDown).unwrap();
        assert_eq!(cell.get(), ManagerState::ShutDown);
    }

    #[test]
    fn auth_failure_shortcut_is_legal() {
        let cell = ManagerStateCell::default();
        cell.try_transition(ManagerState::ShutDown).unwrap();
    }

    #[test]
    fn illegal_transition_leaves_state_unchanged() {
        let cell = ManagerStateCell::default();
        assert!(cell.try_transition(ManagerState::ShuttingDown).is_err());
        assert_eq!(cell.get(), ManagerState::Init);
    }

    #[test]
    fn cannot_leave_shutdown() {
        let cell = ManagerStateCell::default();
        cell.try_transition(ManagerState::ShutDown).unwrap();
        assert!(cell.try_transition(ManagerState::Connected).is_err());
    }
}
