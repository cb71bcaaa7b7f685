//! Bus state tracking
//!
//! The device reports state changes asynchronously. This module keeps the observed state
//! apart from the state the user asked for, so that recovery from bus-off returns to the
//! requested mode.

use crate::types::{BusState, Result, WuenscheError};
use crate::wire::CanState;

/// Observed and requested bus state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStateMachine {
    state: BusState,
    target: BusState,
}

impl BusStateMachine {
    /// New machine aiming for `target`; the observed state starts as Error
    pub fn new(target: BusState) -> Result<Self> {
        Self::check_target(target)?;
        Ok(Self {
            state: BusState::Error,
            target,
        })
    }

    fn check_target(target: BusState) -> Result<()> {
        match target {
            BusState::Active | BusState::Passive => Ok(()),
            BusState::Error => Err(WuenscheError::InvalidStateRequest(target)),
        }
    }

    /// Observed state
    pub fn state(&self) -> BusState {
        self.state
    }

    /// Requested state
    pub fn target(&self) -> BusState {
        self.target
    }

    /// True if the requested state implies listen-only operation
    pub fn listen_only(&self) -> bool {
        self.target == BusState::Passive
    }

    pub fn set_target(&mut self, target: BusState) -> Result<()> {
        Self::check_target(target)?;
        self.target = target;
        Ok(())
    }

    /// Bus-state report from the device
    pub fn on_bus_state(&mut self, can_state: CanState) {
        if can_state.contains(CanState::BUSOFF) {
            if self.state != BusState::Error {
                log::warn!("Controller reported bus-off");
            }
            self.state = BusState::Error;
        } else if self.state == BusState::Error {
            log::info!("Controller recovered, returning to {}", self.target);
            self.state = self.target;
        }
    }

    /// Parameter echo from the device
    pub fn on_params_echo(&mut self, listen_only: bool) {
        self.target = if listen_only {
            BusState::Passive
        } else {
            BusState::Active
        };
        if self.state != BusState::Error {
            self.state = self.target;
        }
    }

    /// Parameters were applied successfully
    pub fn on_applied(&mut self) {
        self.state = self.target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let machine = BusStateMachine::new(BusState::Passive).unwrap();
        assert_eq!(machine.state(), BusState::Error);
        assert_eq!(machine.target(), BusState::Passive);
        assert!(machine.listen_only());
        assert!(matches!(
            BusStateMachine::new(BusState::Error),
            Err(WuenscheError::InvalidStateRequest(BusState::Error))
        ));
    }

    #[test]
    fn test_bus_off_and_recovery() {
        let mut machine = BusStateMachine::new(BusState::Active).unwrap();
        machine.on_applied();
        assert_eq!(machine.state(), BusState::Active);

        machine.on_bus_state(CanState::BUSOFF | CanState::ERROR);
        assert_eq!(machine.state(), BusState::Error);

        machine.on_bus_state(CanState::BUSOFF);
        assert_eq!(machine.state(), BusState::Error);

        machine.on_bus_state(CanState::ERROR);
        assert_eq!(machine.state(), BusState::Active);

        machine.on_bus_state(CanState::empty());
        assert_eq!(machine.state(), BusState::Active);
    }

    #[test]
    fn test_recovery_goes_to_target() {
        let mut machine = BusStateMachine::new(BusState::Active).unwrap();
        machine.set_target(BusState::Passive).unwrap();
        machine.on_bus_state(CanState::empty());
        assert_eq!(machine.state(), BusState::Passive);
    }

    #[test]
    fn test_params_echo() {
        let mut machine = BusStateMachine::new(BusState::Active).unwrap();
        machine.on_params_echo(true);
        assert_eq!(machine.target(), BusState::Passive);
        // still in error, echo does not clear it
        assert_eq!(machine.state(), BusState::Error);

        machine.on_applied();
        machine.on_params_echo(false);
        assert_eq!(machine.state(), BusState::Active);
        assert_eq!(machine.target(), BusState::Active);
    }

    #[test]
    fn test_set_target_rejects_error() {
        let mut machine = BusStateMachine::new(BusState::Active).unwrap();
        assert!(machine.set_target(BusState::Error).is_err());
        assert_eq!(machine.target(), BusState::Active);
    }
}
