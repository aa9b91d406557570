//! Module instance: one physical transceiver and its lifecycle.
//!
//! A [`TransceiverModule`] binds a [`ModuleStateMachine`] to a slot id, the
//! management-interface variant chosen at discovery, a handle to the bus and
//! the cached telemetry of the last refresh. Hardware results are turned into
//! state machine events here; nothing else submits hardware events.
//!
//! Internal state sits behind a `parking_lot::Mutex` that is never held across
//! bus I/O. Concurrent readers (info, telemetry) only contend for the short
//! critical sections.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{ProtocolDecoder, TransceiverBus};
use crate::error::{Result, XcvrError};
use crate::module_sm::{ModuleEvent, ModuleState, ModuleStateMachine, Transition};
use crate::port_sm::{PortEvent, PortState};
use crate::telemetry::{
    DecodedTelemetry, MediaLaneSignals, ModuleStatus, RawTelemetry, SignalFlags, TelemetryCache,
};
use crate::types::{
    ManagementInterfaceType, ModulePresence, PortSpeed, RegisterAddr, TransceiverId,
    TransceiverInfo,
};
use crate::variant::ModuleVariant;

/// Mutable part of a module.
#[derive(Debug)]
struct ModuleInner {
    fsm: ModuleStateMachine,
    presence: ModulePresence,
    /// When the module entered `Discovered`
    discovered_at: Option<Instant>,
    cache: TelemetryCache,
    raw: Option<RawTelemetry>,
    decoded: Option<DecodedTelemetry>,
    last_refresh: Option<DateTime<Utc>>,
    speed: Option<PortSpeed>,
}

impl ModuleInner {
    fn apply(&mut self, id: TransceiverId, event: ModuleEvent) -> Transition {
        let transition = self.fsm.process_event(event);
        if !transition.accepted {
            debug!(id = %id, ?event, state = %transition.from, "Event ignored");
            return transition;
        }
        if transition.changed() {
            info!(
                id = %id,
                ?event,
                from = %transition.from,
                to = %transition.to,
                "Transceiver state changed"
            );
        }

        match transition.to {
            ModuleState::Discovered if transition.changed() => {
                self.discovered_at = Some(Instant::now());
            }
            ModuleState::NotPresent => {
                self.discovered_at = None;
                self.raw = None;
                self.decoded = None;
            }
            _ => {}
        }
        transition
    }
}

/// A transceiver plugged into one slot.
pub struct TransceiverModule {
    id: TransceiverId,
    variant: Box<dyn ModuleVariant>,
    bus: Arc<dyn TransceiverBus>,
    decoder: Arc<dyn ProtocolDecoder>,
    agent_sync_timeout: Duration,
    inner: Mutex<ModuleInner>,
}

impl std::fmt::Debug for TransceiverModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransceiverModule")
            .field("id", &self.id)
            .field("interface", &self.variant.interface())
            .field("state", &self.state())
            .finish()
    }
}

impl TransceiverModule {
    /// Creates a module in `NotPresent`.
    ///
    /// `port_count` is the topology's count for the slot; variants with a
    /// fixed count override it.
    pub fn new(
        id: TransceiverId,
        variant: Box<dyn ModuleVariant>,
        bus: Arc<dyn TransceiverBus>,
        decoder: Arc<dyn ProtocolDecoder>,
        port_count: usize,
        agent_sync_timeout: Duration,
    ) -> Self {
        let port_count = variant.fixed_port_count().unwrap_or(port_count);
        let cache = TelemetryCache::new(variant.lane_count());
        Self {
            id,
            variant,
            bus,
            decoder,
            agent_sync_timeout,
            inner: Mutex::new(ModuleInner {
                fsm: ModuleStateMachine::new(port_count),
                presence: ModulePresence::Unknown,
                discovered_at: None,
                cache,
                raw: None,
                decoded: None,
                last_refresh: None,
                speed: None,
            }),
        }
    }

    pub fn id(&self) -> TransceiverId {
        self.id
    }

    pub fn interface(&self) -> ManagementInterfaceType {
        self.variant.interface()
    }

    pub fn state(&self) -> ModuleState {
        self.inner.lock().fsm.state()
    }

    pub fn presence(&self) -> ModulePresence {
        self.inner.lock().presence
    }

    /// Ports created on discovery.
    pub fn port_count(&self) -> usize {
        self.inner.lock().fsm.configured_port_count()
    }

    pub fn port_states(&self) -> Vec<PortState> {
        self.inner.lock().fsm.port_states()
    }

    /// Port aggregate, or `None` before discovery.
    pub fn all_ports_down(&self) -> Option<bool> {
        self.inner.lock().fsm.all_ports_down()
    }

    pub fn speed(&self) -> Option<PortSpeed> {
        self.inner.lock().speed
    }

    /// Submits a lifecycle event that does not come from hardware polling.
    pub fn process_event(&self, event: ModuleEvent) -> Transition {
        self.inner.lock().apply(self.id, event)
    }

    /// Delivers a link event to the port at `index` (lane order).
    pub fn handle_port_event(&self, index: usize, event: PortEvent) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let transition = inner.fsm.process_port_event(index, event)?;
        if transition.changed() {
            info!(
                id = %self.id,
                port = index,
                ?event,
                from = %transition.from,
                to = %transition.to,
                "Transceiver state changed by port event"
            );
        }
        Some(transition)
    }

    /// Records a presence observation and emits the matching event.
    /// Returns whether the module is present.
    fn observe_presence(&self, present: bool) -> bool {
        let mut inner = self.inner.lock();
        inner.presence = ModulePresence::from(present);

        let state = inner.fsm.state();
        if present {
            if state == ModuleState::NotPresent {
                inner.apply(self.id, ModuleEvent::DetectTransceiver);
            }
        } else if state != ModuleState::NotPresent {
            inner.apply(self.id, ModuleEvent::RemoveTransceiver);
        }
        present
    }

    /// Detects presence over the bus and updates the lifecycle.
    pub async fn detect_presence(&self) -> Result<bool> {
        let present = self
            .variant
            .detect_presence(self.bus.as_ref(), self.id)
            .await
            .map_err(|e| XcvrError::module_io(self.id, e))?;
        Ok(self.observe_presence(present))
    }

    /// Re-polls the hardware and updates state and telemetry.
    ///
    /// Idempotent. A successful telemetry read of a `Present` module is the
    /// identity read that moves it to `Discovered`. Modules in `Upgrading`
    /// are left to the firmware updater.
    #[instrument(skip(self), fields(id = %self.id, interface = %self.variant.interface()))]
    pub async fn refresh(&self) -> Result<ModuleState> {
        if !self.detect_presence().await? {
            return Ok(self.state());
        }
        if self.state() == ModuleState::Upgrading {
            return Ok(ModuleState::Upgrading);
        }

        let raw = self
            .variant
            .read_hardware(self.bus.as_ref(), self.id)
            .await
            .map_err(|e| XcvrError::module_io(self.id, e))?;

        let decoded = match self.decoder.decode(self.variant.interface(), &raw) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(id = %self.id, error = %e, "Failed to decode telemetry");
                None
            }
        };

        let mut inner = self.inner.lock();
        if inner.fsm.state() == ModuleState::Present {
            inner.apply(self.id, ModuleEvent::ReadEeprom);
        }
        if let Some(decoded) = decoded {
            inner.cache.accumulate(&decoded);
            inner.decoded = Some(decoded);
        }
        inner.raw = Some(raw);
        inner.last_refresh = Some(Utc::now());

        let sync_expired = inner
            .discovered_at
            .is_some_and(|at| at.elapsed() >= self.agent_sync_timeout);
        if inner.fsm.state() == ModuleState::Discovered && sync_expired {
            warn!(
                id = %self.id,
                timeout = ?self.agent_sync_timeout,
                "No port status sync since discovery"
            );
            inner.apply(self.id, ModuleEvent::AgentSyncTimeout);
        }

        Ok(inner.fsm.state())
    }

    /// Programs the module for a port speed. Best-effort: failures are
    /// logged and never change the lifecycle state.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn customize_for_speed(&self, speed: PortSpeed) -> bool {
        match self
            .variant
            .customize_for_speed(self.bus.as_ref(), self.id, speed)
            .await
        {
            Ok(()) => {
                self.inner.lock().speed = Some(speed);
                info!(id = %self.id, ?speed, "Customized transceiver");
                true
            }
            Err(e) => {
                error!(id = %self.id, ?speed, error = %e, "Failed to customize transceiver");
                false
            }
        }
    }

    pub async fn read_register(&self, addr: RegisterAddr, len: usize) -> Result<Vec<u8>> {
        self.bus
            .read_register(self.id, addr, len)
            .await
            .map_err(|e| XcvrError::module_io(self.id, e))
    }

    pub async fn write_register(&self, addr: RegisterAddr, data: &[u8]) -> Result<()> {
        self.bus
            .write_register(self.id, addr, data)
            .await
            .map_err(|e| XcvrError::module_io(self.id, e))
    }

    /// Starts the next VDM sample capture. Does not change the lifecycle.
    pub async fn trigger_vdm_capture(&self) -> Result<()> {
        self.variant
            .trigger_vdm_capture(self.bus.as_ref(), self.id)
            .await
            .map_err(|e| XcvrError::module_io(self.id, e))?;
        debug!(id = %self.id, "VDM capture triggered");
        Ok(())
    }

    pub fn read_and_clear_signal_flags(&self) -> SignalFlags {
        self.inner.lock().cache.read_and_clear_signal_flags()
    }

    pub fn read_and_clear_media_signals(&self) -> Vec<MediaLaneSignals> {
        self.inner.lock().cache.read_and_clear_media_signals()
    }

    pub fn read_and_clear_module_status(&self) -> ModuleStatus {
        self.inner.lock().cache.read_and_clear_module_status()
    }

    /// Verifies the EEPROM checksums of the last snapshot.
    pub fn verify_checksum(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .raw
            .as_ref()
            .is_some_and(|raw| self.variant.verify_checksum(raw))
    }

    pub fn raw_telemetry(&self) -> Option<RawTelemetry> {
        self.inner.lock().raw.clone()
    }

    pub fn info(&self) -> TransceiverInfo {
        let inner = self.inner.lock();
        let decoded = inner.decoded.as_ref();
        TransceiverInfo {
            id: self.id,
            presence: inner.presence,
            interface: self.variant.interface(),
            state: inner.fsm.state(),
            port_states: inner.fsm.port_states(),
            temperature_c: decoded.and_then(|d| d.temperature_c),
            vcc_v: decoded.and_then(|d| d.vcc_v),
            vendor: decoded.and_then(|d| d.vendor.clone()),
            last_refresh: inner.last_refresh,
            checksum_valid: inner
                .raw
                .as_ref()
                .is_some_and(|raw| self.variant.verify_checksum(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{cmis, StandardDecoder};
    use crate::sim::{SimModule, SimulatedBus};
    use crate::variant::{for_interface, CmisVariant};
    use pretty_assertions::assert_eq;

    const ID: TransceiverId = TransceiverId(0);

    fn module_on(bus: Arc<SimulatedBus>, interface: ManagementInterfaceType) -> TransceiverModule {
        TransceiverModule::new(
            ID,
            for_interface(interface).unwrap(),
            bus,
            Arc::new(StandardDecoder),
            4,
            Duration::from_secs(120),
        )
    }

    fn cmis_bus() -> Arc<SimulatedBus> {
        Arc::new(SimulatedBus::new().with_module(ID, SimModule::cmis("ACME")))
    }

    #[tokio::test]
    async fn test_refresh_discovers_module() {
        let bus = cmis_bus();
        let module = module_on(bus, ManagementInterfaceType::Cmis);
        assert_eq!(module.state(), ModuleState::NotPresent);

        assert_eq!(module.refresh().await.unwrap(), ModuleState::Discovered);
        assert_eq!(module.port_states(), vec![PortState::Down; 4]);

        let info = module.info();
        assert_eq!(info.presence, ModulePresence::Present);
        assert_eq!(info.vendor.as_deref(), Some("ACME"));
        assert!(info.checksum_valid);
        assert!(info.last_refresh.is_some());

        // Idempotent
        assert_eq!(module.refresh().await.unwrap(), ModuleState::Discovered);
    }

    #[tokio::test]
    async fn test_refresh_removal_drops_ports() {
        let bus = cmis_bus();
        let module = module_on(bus.clone(), ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();
        module.handle_port_event(0, PortEvent::PortUp);
        assert_eq!(module.state(), ModuleState::Active);

        bus.set_present(ID, false);
        assert_eq!(module.refresh().await.unwrap(), ModuleState::NotPresent);
        assert!(module.port_states().is_empty());
        assert!(module.raw_telemetry().is_none());
        assert_eq!(module.presence(), ModulePresence::NotPresent);
    }

    #[tokio::test]
    async fn test_read_failure_is_module_io() {
        let bus = cmis_bus();
        let module = module_on(bus.clone(), ManagementInterfaceType::Cmis);
        bus.set_fail_io(ID, true);

        let err = module.refresh().await.unwrap_err();
        assert!(matches!(err, XcvrError::ModuleIo { id: ID, .. }));
        assert!(err.is_module_local());
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_sync_timeout_from_refresh() {
        let bus = cmis_bus();
        let module = module_on(bus, ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(module.refresh().await.unwrap(), ModuleState::Discovered);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(module.refresh().await.unwrap(), ModuleState::Inactive);
    }

    #[tokio::test]
    async fn test_port_sync_before_timeout_settles_state() {
        let bus = cmis_bus();
        let module = module_on(bus, ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();

        let t = module.handle_port_event(2, PortEvent::PortDown).unwrap();
        assert_eq!(t.to, ModuleState::Inactive);
        assert!(module.handle_port_event(7, PortEvent::PortUp).is_none());
    }

    #[tokio::test]
    async fn test_latched_flags_clear_on_read() {
        let bus = cmis_bus();
        // Temperature high alarm latched in the lower page
        bus.poke(ID, crate::decoder::cmis::TEMP_VCC_FLAGS, &[0x01]);
        let module = module_on(bus.clone(), ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();

        bus.poke(ID, crate::decoder::cmis::TEMP_VCC_FLAGS, &[0x00]);
        module.refresh().await.unwrap();

        assert!(module.read_and_clear_signal_flags().temp_high_alarm);
        assert!(!module.read_and_clear_signal_flags().temp_high_alarm);
        assert_eq!(module.read_and_clear_media_signals().len(), 8);
    }

    #[tokio::test]
    async fn test_customize_failure_keeps_state() {
        let bus = cmis_bus();
        let module = module_on(bus.clone(), ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();

        assert!(module.customize_for_speed(PortSpeed::Gbps400).await);
        assert_eq!(module.speed(), Some(PortSpeed::Gbps400));

        bus.set_fail_io(ID, true);
        assert!(!module.customize_for_speed(PortSpeed::Gbps100).await);
        assert_eq!(module.state(), ModuleState::Discovered);
        assert_eq!(module.speed(), Some(PortSpeed::Gbps400));
    }

    #[tokio::test]
    async fn test_upgrading_module_is_not_polled() {
        let bus = cmis_bus();
        let module = module_on(bus.clone(), ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();
        module.process_event(ModuleEvent::AgentSyncTimeout);
        module.process_event(ModuleEvent::TriggerUpgrade);

        bus.poke(ID, crate::decoder::cmis::TEMP_VCC_FLAGS, &[0x01]);
        assert_eq!(module.refresh().await.unwrap(), ModuleState::Upgrading);
        assert!(!module.read_and_clear_signal_flags().any());
    }

    #[tokio::test]
    async fn test_sff8472_has_one_port() {
        let bus = Arc::new(SimulatedBus::new().with_module(ID, SimModule::sff8472("SFPCO")));
        let module = module_on(bus, ManagementInterfaceType::Sff8472);
        assert_eq!(module.port_count(), 1);
        module.refresh().await.unwrap();
        assert_eq!(module.port_states().len(), 1);
        assert!(module.verify_checksum());
    }

    #[tokio::test]
    async fn test_corrupt_eeprom_fails_checksum() {
        let bus = cmis_bus();
        bus.poke(ID, RegisterAddr::paged(0x00, 200), &[0x5A]);
        let module = TransceiverModule::new(
            ID,
            Box::new(CmisVariant),
            bus,
            Arc::new(StandardDecoder),
            4,
            Duration::from_secs(120),
        );
        assert!(!module.verify_checksum());
        module.refresh().await.unwrap();
        assert!(!module.verify_checksum());
        assert!(!module.info().checksum_valid);
    }

    #[tokio::test]
    async fn test_vdm_capture_writes_freeze_on_cmis_only() {
        let bus = cmis_bus();
        let module = module_on(bus.clone(), ManagementInterfaceType::Cmis);
        module.refresh().await.unwrap();

        module.trigger_vdm_capture().await.unwrap();
        assert_eq!(
            bus.peek(ID, cmis::VDM_CONTROL, 1),
            Some(vec![cmis::VDM_FREEZE])
        );
        assert_eq!(module.state(), ModuleState::Discovered);

        let sff_bus = Arc::new(SimulatedBus::new().with_module(ID, SimModule::sff8636("QSFP")));
        let sff = module_on(sff_bus.clone(), ManagementInterfaceType::Sff8636);
        sff.trigger_vdm_capture().await.unwrap();
        assert_eq!(sff_bus.peek(ID, cmis::VDM_CONTROL, 1), None);
    }
}
