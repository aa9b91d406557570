//! Port sub-state-machine: link state of one port served by a module.

use serde::{Deserialize, Serialize};

/// Link state of one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    #[default]
    Down,
    Up,
}

impl PortState {
    /// Convert state to string for state dumps
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Down => "down",
            PortState::Up => "up",
        }
    }
}

/// Event delivered by the link-state source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortEvent {
    PortUp,
    PortDown,
}

impl From<bool> for PortEvent {
    fn from(up: bool) -> Self {
        if up {
            PortEvent::PortUp
        } else {
            PortEvent::PortDown
        }
    }
}

/// State machine for one port. Always starts `Down`.
///
/// There is no failure mode: every event maps to exactly one next state.
/// The owning module re-evaluates its aggregate after every call.
#[derive(Debug, Clone, Default)]
pub struct PortStateMachine {
    state: PortState,
}

impl PortStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state == PortState::Up
    }

    /// Applies an event and returns the new state.
    pub fn process_event(&mut self, event: PortEvent) -> PortState {
        self.state = match event {
            PortEvent::PortUp => PortState::Up,
            PortEvent::PortDown => PortState::Down,
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_down() {
        let psm = PortStateMachine::new();
        assert_eq!(psm.state(), PortState::Down);
        assert!(!psm.is_up());
    }

    #[test]
    fn test_up_down_round_trip() {
        let mut psm = PortStateMachine::new();
        assert_eq!(psm.process_event(PortEvent::PortUp), PortState::Up);
        assert_eq!(psm.process_event(PortEvent::PortUp), PortState::Up);
        assert_eq!(psm.process_event(PortEvent::PortDown), PortState::Down);
        assert_eq!(psm.state().as_str(), "down");
    }

    #[test]
    fn test_event_from_link_flag() {
        assert_eq!(PortEvent::from(true), PortEvent::PortUp);
        assert_eq!(PortEvent::from(false), PortEvent::PortDown);
    }
}
