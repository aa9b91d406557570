//! Module state machine: hardware lifecycle of one transceiver.
//!
//! The machine is a single top-level [`ModuleState`] plus an owned vector of
//! [`PortStateMachine`]s. `Active` versus `Inactive` is never set directly:
//! it is recomputed from the ports after every port event.
//!
//! | From                | Event               | To          |
//! |---------------------|---------------------|-------------|
//! | NotPresent          | DetectTransceiver   | Present     |
//! | Present             | ReadEeprom          | Discovered  |
//! | Discovered          | AgentSyncTimeout    | Inactive    |
//! | Inactive            | BringupDone         | Inactive    |
//! | Inactive            | RemediateDone       | Inactive    |
//! | Inactive            | TriggerUpgrade      | Upgrading   |
//! | Inactive / Active   | ForcedUpgrade       | Upgrading   |
//! | Upgrading           | ResetTransceiver    | NotPresent  |
//! | any                 | RemoveTransceiver   | NotPresent  |
//!
//! Any other (state, event) pair is ignored and leaves the state unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::port_sm::{PortEvent, PortState, PortStateMachine};

/// Lifecycle state of one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    #[default]
    NotPresent,
    Present,
    Discovered,
    Inactive,
    Active,
    Upgrading,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::NotPresent => "not_present",
            ModuleState::Present => "present",
            ModuleState::Discovered => "discovered",
            ModuleState::Inactive => "inactive",
            ModuleState::Active => "active",
            ModuleState::Upgrading => "upgrading",
        }
    }

    /// States in which port events drive the Active/Inactive aggregate.
    fn follows_ports(&self) -> bool {
        matches!(
            self,
            ModuleState::Discovered | ModuleState::Inactive | ModuleState::Active
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events submitted to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleEvent {
    DetectTransceiver,
    ReadEeprom,
    AgentSyncTimeout,
    BringupDone,
    RemediateDone,
    TriggerUpgrade,
    ForcedUpgrade,
    ResetTransceiver,
    RemoveTransceiver,
}

/// What happened when an event was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ModuleState,
    pub to: ModuleState,
    /// False when the event is not accepted in `from`
    pub accepted: bool,
}

impl Transition {
    /// Returns true if the state actually changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Lifecycle state machine of one module and its ports.
#[derive(Debug, Clone)]
pub struct ModuleStateMachine {
    state: ModuleState,
    /// Number of port sub-machines created on discovery
    port_count: usize,
    /// Empty unless discovered and not yet returned to NotPresent
    ports: Vec<PortStateMachine>,
}

impl ModuleStateMachine {
    /// Creates a machine in `NotPresent` for a module serving `port_count` ports.
    pub fn new(port_count: usize) -> Self {
        Self {
            state: ModuleState::NotPresent,
            port_count,
            ports: Vec::new(),
        }
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Number of port sub-machines currently alive.
    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// Number of ports that will be created on discovery.
    pub fn configured_port_count(&self) -> usize {
        self.port_count
    }

    pub fn port_states(&self) -> Vec<PortState> {
        self.ports.iter().map(PortStateMachine::state).collect()
    }

    pub fn any_port_up(&self) -> bool {
        self.ports.iter().any(PortStateMachine::is_up)
    }

    /// Returns whether every port is down, or `None` before discovery.
    pub fn all_ports_down(&self) -> Option<bool> {
        if self.ports.is_empty() {
            None
        } else {
            Some(!self.any_port_up())
        }
    }

    fn next_state(&self, event: ModuleEvent) -> Option<ModuleState> {
        use ModuleEvent::*;
        use ModuleState::*;

        match (self.state, event) {
            (_, RemoveTransceiver) => Some(NotPresent),
            (NotPresent, DetectTransceiver) => Some(Present),
            (Present, ReadEeprom) => Some(Discovered),
            (Discovered, AgentSyncTimeout) => Some(Inactive),
            (Inactive, BringupDone) | (Inactive, RemediateDone) => Some(Inactive),
            // Guard checked against the ports, not the aggregate
            (Inactive, TriggerUpgrade) if !self.any_port_up() => Some(Upgrading),
            (Inactive, ForcedUpgrade) | (Active, ForcedUpgrade) => Some(Upgrading),
            (Upgrading, ResetTransceiver) => Some(NotPresent),
            _ => None,
        }
    }

    /// Processes a lifecycle event.
    ///
    /// Unaccepted events are no-ops and are reported with `accepted = false`.
    pub fn process_event(&mut self, event: ModuleEvent) -> Transition {
        let from = self.state;
        let Some(to) = self.next_state(event) else {
            return Transition {
                from,
                to: from,
                accepted: false,
            };
        };

        match to {
            ModuleState::NotPresent => self.ports.clear(),
            ModuleState::Discovered => {
                self.ports = vec![PortStateMachine::new(); self.port_count];
            }
            _ => {}
        }
        self.state = to;

        Transition {
            from,
            to,
            accepted: true,
        }
    }

    /// Delivers a link event to port `index` and re-evaluates the aggregate.
    ///
    /// Returns `None` if the port does not exist (module not discovered or
    /// index out of range).
    pub fn process_port_event(&mut self, index: usize, event: PortEvent) -> Option<Transition> {
        let port = self.ports.get_mut(index)?;
        port.process_event(event);

        let from = self.state;
        if from.follows_ports() {
            self.state = self.aggregate();
        }
        Some(Transition {
            from,
            to: self.state,
            accepted: true,
        })
    }

    fn aggregate(&self) -> ModuleState {
        if self.any_port_up() {
            ModuleState::Active
        } else {
            ModuleState::Inactive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ModuleEvent::*;

    fn discovered(ports: usize) -> ModuleStateMachine {
        let mut msm = ModuleStateMachine::new(ports);
        msm.process_event(DetectTransceiver);
        msm.process_event(ReadEeprom);
        msm
    }

    fn all_events() -> [ModuleEvent; 9] {
        [
            DetectTransceiver,
            ReadEeprom,
            AgentSyncTimeout,
            BringupDone,
            RemediateDone,
            TriggerUpgrade,
            ForcedUpgrade,
            ResetTransceiver,
            RemoveTransceiver,
        ]
    }

    #[test]
    fn test_discovery_creates_down_ports() {
        let mut msm = ModuleStateMachine::new(4);
        assert_eq!(msm.num_ports(), 0);
        assert_eq!(msm.all_ports_down(), None);

        assert_eq!(msm.process_event(DetectTransceiver).to, ModuleState::Present);
        assert_eq!(msm.num_ports(), 0);

        assert_eq!(msm.process_event(ReadEeprom).to, ModuleState::Discovered);
        assert_eq!(msm.num_ports(), 4);
        assert!(msm.port_states().iter().all(|s| *s == PortState::Down));
    }

    #[test]
    fn test_agent_sync_timeout_to_inactive() {
        let mut msm = discovered(4);
        let t = msm.process_event(AgentSyncTimeout);
        assert!(t.accepted && t.changed());
        assert_eq!(msm.state(), ModuleState::Inactive);
    }

    #[test]
    fn test_port_aggregate_four_ports() {
        let mut msm = discovered(4);
        for i in 0..4 {
            msm.process_port_event(i, PortEvent::PortDown);
        }
        assert_eq!(msm.state(), ModuleState::Inactive);

        msm.process_port_event(3, PortEvent::PortUp);
        assert_eq!(msm.state(), ModuleState::Active);

        msm.process_port_event(3, PortEvent::PortDown);
        assert_eq!(msm.state(), ModuleState::Inactive);

        for i in 0..4 {
            msm.process_port_event(i, PortEvent::PortUp);
        }
        assert_eq!(msm.state(), ModuleState::Active);

        // One down, rest up
        msm.process_port_event(0, PortEvent::PortDown);
        assert_eq!(msm.state(), ModuleState::Active);
    }

    #[test]
    fn test_port_event_before_discovery_is_ignored() {
        let mut msm = ModuleStateMachine::new(2);
        assert!(msm.process_port_event(0, PortEvent::PortUp).is_none());
        msm.process_event(DetectTransceiver);
        assert!(msm.process_port_event(0, PortEvent::PortUp).is_none());
        assert_eq!(msm.state(), ModuleState::Present);

        let mut msm = discovered(2);
        assert!(msm.process_port_event(2, PortEvent::PortUp).is_none());
        assert_eq!(msm.state(), ModuleState::Discovered);
    }

    #[test]
    fn test_workflow_acknowledgements_stay_inactive() {
        let mut msm = discovered(2);
        msm.process_port_event(0, PortEvent::PortDown);
        msm.process_port_event(1, PortEvent::PortDown);
        assert_eq!(msm.state(), ModuleState::Inactive);

        let t = msm.process_event(BringupDone);
        assert!(t.accepted && !t.changed());
        let t = msm.process_event(RemediateDone);
        assert!(t.accepted && !t.changed());
        assert_eq!(msm.state(), ModuleState::Inactive);
    }

    #[test]
    fn test_trigger_upgrade_rejected_while_active() {
        let mut msm = discovered(2);
        msm.process_port_event(0, PortEvent::PortDown);
        msm.process_port_event(1, PortEvent::PortUp);
        assert_eq!(msm.state(), ModuleState::Active);

        let t = msm.process_event(TriggerUpgrade);
        assert!(!t.accepted);
        assert_eq!(msm.state(), ModuleState::Active);

        msm.process_port_event(1, PortEvent::PortDown);
        assert_eq!(msm.state(), ModuleState::Inactive);

        assert_eq!(msm.process_event(TriggerUpgrade).to, ModuleState::Upgrading);
        assert_eq!(msm.process_event(ResetTransceiver).to, ModuleState::NotPresent);
        assert_eq!(msm.num_ports(), 0);
    }

    #[test]
    fn test_forced_upgrade_from_active() {
        let mut msm = discovered(2);
        msm.process_port_event(1, PortEvent::PortUp);
        assert_eq!(msm.state(), ModuleState::Active);

        assert_eq!(msm.process_event(ForcedUpgrade).to, ModuleState::Upgrading);

        // Port events no longer move the module while upgrading
        msm.process_port_event(1, PortEvent::PortDown);
        assert_eq!(msm.state(), ModuleState::Upgrading);

        assert_eq!(msm.process_event(ResetTransceiver).to, ModuleState::NotPresent);
    }

    #[test]
    fn test_forced_upgrade_needs_lifecycle_superstate() {
        let mut msm = discovered(1);
        let t = msm.process_event(ForcedUpgrade);
        assert!(!t.accepted);
        assert_eq!(msm.state(), ModuleState::Discovered);
    }

    #[test]
    fn test_remove_from_every_state() {
        let setups: Vec<Box<dyn Fn() -> ModuleStateMachine>> = vec![
            Box::new(|| ModuleStateMachine::new(2)),
            Box::new(|| {
                let mut m = ModuleStateMachine::new(2);
                m.process_event(DetectTransceiver);
                m
            }),
            Box::new(|| discovered(2)),
            Box::new(|| {
                let mut m = discovered(2);
                m.process_event(AgentSyncTimeout);
                m
            }),
            Box::new(|| {
                let mut m = discovered(2);
                m.process_port_event(0, PortEvent::PortUp);
                m
            }),
            Box::new(|| {
                let mut m = discovered(2);
                m.process_event(AgentSyncTimeout);
                m.process_event(TriggerUpgrade);
                m
            }),
        ];

        for setup in setups {
            let mut msm = setup();
            let from = msm.state();
            let t = msm.process_event(RemoveTransceiver);
            assert!(t.accepted, "remove rejected from {from}");
            assert_eq!(msm.state(), ModuleState::NotPresent);
            assert_eq!(msm.num_ports(), 0);
        }
    }

    #[test]
    fn test_unlisted_events_are_noops() {
        let mut msm = ModuleStateMachine::new(2);
        for event in all_events() {
            if matches!(event, DetectTransceiver | RemoveTransceiver) {
                continue;
            }
            let t = msm.process_event(event);
            assert!(!t.accepted, "{event:?} accepted in NotPresent");
            assert_eq!(msm.state(), ModuleState::NotPresent);
        }
    }

    #[test]
    fn test_aggregate_invariant_over_event_sequences() {
        // Small deterministic pseudo-random walk over module and port events.
        let mut msm = ModuleStateMachine::new(3);
        let mut seed: u32 = 0x1234_5678;
        let mut driven = [0usize; 3];
        for _ in 0..5_000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let pick = (seed >> 16) as usize;
            if pick % 3 == 0 {
                let event = all_events()[(pick / 3) % 9];
                msm.process_event(event);
            } else {
                let index = (pick / 3) % 3;
                let up = (pick / 9) % 2 == 0;
                if msm.process_port_event(index, PortEvent::from(up)).is_some() {
                    driven[index] += 1;
                }
            }

            match msm.state() {
                ModuleState::Active => assert!(msm.any_port_up()),
                ModuleState::Inactive => assert!(!msm.any_port_up()),
                ModuleState::NotPresent | ModuleState::Present => {
                    assert_eq!(msm.num_ports(), 0)
                }
                ModuleState::Discovered | ModuleState::Upgrading => {
                    assert_eq!(msm.num_ports(), 3)
                }
            }
        }
        assert!(driven.iter().all(|n| *n > 0), "ports driven: {driven:?}");
    }
}
