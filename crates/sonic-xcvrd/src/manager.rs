//! Transceiver Manager: owner of every module instance.
//!
//! The manager holds the authoritative `{TransceiverId -> TransceiverModule}`
//! collection behind a reader/writer lock. The write lock is only taken for
//! structural changes (create, replace, evict) and is never held across bus
//! I/O; per-module hardware work runs as a fan-out outside of it so that
//! queries are never blocked by a slow module.
//!
//! # Refresh cycle
//!
//! 1. Verify the bus. An unusable bus aborts the cycle with an empty result.
//! 2. Probe every settled slot concurrently (presence, then identifier byte).
//!    A failed or stuck probe skips that slot for this cycle.
//! 3. Under the write lock, create or replace instances whose interface
//!    changed, and run the reset-safety policy for present modules with an
//!    unknown interface.
//! 4. Issue the resets that were found safe and evict their instances.
//! 5. Fan out `refresh()` over every probed slot that has an instance, and
//!    seed the port machines of newly discovered modules from the synced
//!    port status.
//!
//! # Lanes
//!
//! A port's lane within its module comes from the topology. For modules the
//! topology does not map, a port takes the lowest free lane the first time it
//! is synced and keeps it until it is synced to another module.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sonic_xcvr_common::{fan_out, PeriodicService, SlotMap, TaskOutcome};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{PortTopology, ProtocolDecoder, TransceiverBus};
use crate::decoder::IDENTIFIER;
use crate::error::{BusError, Result, XcvrError};
use crate::module::TransceiverModule;
use crate::module_sm::{ModuleEvent, ModuleState};
use crate::port_sm::PortEvent;
use crate::remediation::{self, RemediationGuard, ResetCandidate, ResetDecision};
use crate::telemetry::{MediaLaneSignals, ModuleStatus, RawTelemetry, SignalFlags};
use crate::types::{
    ManagementInterfaceType, ModulePresence, PortId, PortSpeed, PortStatus, ReadResponse,
    RegisterAddr, TransceiverId, TransceiverInfo, WriteResponse,
};
use crate::variant;

/// Manager policy knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Size of the fixed id universe `0..num_modules`
    pub num_modules: usize,
    /// Port count for slots the topology does not map
    pub ports_per_module: usize,
    pub bus_verify_timeout: Duration,
    /// Bound on each per-module probe, register access and reset
    pub probe_timeout: Duration,
    /// Bound on each per-module refresh
    pub refresh_timeout: Duration,
    pub agent_sync_timeout: Duration,
    /// Slots are not probed for this long after a hard reset
    pub post_reset_settle: Duration,
    /// Remediation pause applied on warm start
    pub remediation_pause: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            num_modules: 32,
            ports_per_module: 4,
            bus_verify_timeout: Duration::from_millis(2000),
            probe_timeout: Duration::from_millis(1000),
            refresh_timeout: Duration::from_millis(5000),
            agent_sync_timeout: Duration::from_secs(120),
            post_reset_settle: Duration::from_secs(2),
            remediation_pause: Duration::from_secs(600),
        }
    }
}

/// Counters since start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub cycles: u64,
    /// Cycles aborted because the bus was unusable
    pub aborted_cycles: u64,
    pub probe_failures: u64,
    pub refresh_failures: u64,
    /// Hard resets issued, automatic and administrative
    pub resets: u64,
}

/// Result of probing one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    present: bool,
    interface: ManagementInterfaceType,
}

/// Owner of every module instance and entry point for callers.
pub struct TransceiverManager {
    config: ManagerConfig,
    bus: Arc<dyn TransceiverBus>,
    decoder: Arc<dyn ProtocolDecoder>,
    topology: Arc<dyn PortTopology>,
    modules: RwLock<SlotMap<TransceiverId, Arc<TransceiverModule>>>,
    /// Port status as last synced from the link-state source
    synced_ports: RwLock<BTreeMap<PortId, PortStatus>>,
    /// Lanes handed out to ports of modules the topology does not map
    lanes: Mutex<BTreeMap<TransceiverId, BTreeMap<PortId, usize>>>,
    /// Presence seen by the last probe of each slot
    last_probe: Mutex<BTreeMap<TransceiverId, ModulePresence>>,
    /// Slots inside their post-reset settle window
    reset_at: Mutex<BTreeMap<TransceiverId, Instant>>,
    guard: RemediationGuard,
    stats: Mutex<ManagerStats>,
}

impl TransceiverManager {
    pub fn new(
        config: ManagerConfig,
        bus: Arc<dyn TransceiverBus>,
        decoder: Arc<dyn ProtocolDecoder>,
        topology: Arc<dyn PortTopology>,
    ) -> Self {
        let modules = RwLock::new(SlotMap::new(config.num_modules));
        Self {
            config,
            bus,
            decoder,
            topology,
            modules,
            synced_ports: RwLock::new(BTreeMap::new()),
            lanes: Mutex::new(BTreeMap::new()),
            last_probe: Mutex::new(BTreeMap::new()),
            reset_at: Mutex::new(BTreeMap::new()),
            guard: RemediationGuard::new(),
            stats: Mutex::new(ManagerStats::default()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats.lock().clone()
    }

    /// Every id of the fixed universe.
    pub fn universe(&self) -> Vec<TransceiverId> {
        (0..self.config.num_modules)
            .filter_map(|i| u32::try_from(i).ok())
            .map(TransceiverId)
            .collect()
    }

    fn in_universe(&self, id: TransceiverId) -> bool {
        usize::from(id) < self.config.num_modules
    }

    /// Validates a batch request. Empty means all; invalid ids are skipped.
    fn resolve_ids(&self, ids: &[TransceiverId]) -> Vec<TransceiverId> {
        if ids.is_empty() {
            return self.universe();
        }
        let mut valid = BTreeSet::new();
        for id in ids {
            if self.in_universe(*id) {
                valid.insert(*id);
            } else {
                warn!(error = %XcvrError::InvalidIdentifier(*id), "Skipping id");
            }
        }
        valid.into_iter().collect()
    }

    /// Returns the instance for `id` under the read lock.
    pub fn module(&self, id: TransceiverId) -> Option<Arc<TransceiverModule>> {
        self.modules.read().get(&id).cloned()
    }

    fn lookup(&self, id: TransceiverId) -> Result<Arc<TransceiverModule>> {
        if !self.in_universe(id) {
            return Err(XcvrError::InvalidIdentifier(id));
        }
        self.module(id)
            .ok_or_else(|| XcvrError::module_io(id, BusError::NotPresent(id)))
    }

    /// Number of ports created when the module in `id` is discovered.
    fn ports_per_module(&self, id: TransceiverId) -> usize {
        match self.topology.ports_for_module(id).len() {
            0 => self.config.ports_per_module,
            n => n,
        }
    }

    /// Runs `op` on every listed module concurrently, one bounded wait each.
    async fn fan_out_modules<T, F, Fut>(
        &self,
        ids: Vec<TransceiverId>,
        per_unit: Duration,
        op: F,
    ) -> BTreeMap<TransceiverId, TaskOutcome<T>>
    where
        F: Fn(Arc<TransceiverModule>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        fan_out(ids, per_unit, |id| {
            let unit = self.lookup(id).map(&op);
            async move { unit?.await }
        })
        .await
    }

    fn log_failures<T>(operation: &str, results: &BTreeMap<TransceiverId, TaskOutcome<T>>) {
        for (id, outcome) in results {
            if let Some(reason) = outcome.failure_reason() {
                error!(id = %id, operation, reason, "Transceiver operation failed");
            }
        }
    }

    // ---- refresh cycle ----

    async fn verify_bus(&self) -> Result<()> {
        let limit = self.config.bus_verify_timeout;
        match tokio::time::timeout(limit, self.bus.verify_bus_healthy()).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(XcvrError::BusFatal("bus reported unhealthy".to_string())),
            Ok(Err(e)) => Err(XcvrError::BusFatal(e.to_string())),
            Err(_) => Err(XcvrError::BusFatal(format!(
                "bus verification timed out after {limit:?}"
            ))),
        }
    }

    /// Slots outside their post-reset settle window.
    fn settled_ids(&self) -> Vec<TransceiverId> {
        let settle = self.config.post_reset_settle;
        let mut reset_at = self.reset_at.lock();
        reset_at.retain(|_, at| at.elapsed() < settle);
        self.universe()
            .into_iter()
            .filter(|id| !reset_at.contains_key(id))
            .collect()
    }

    async fn probe(&self, id: TransceiverId) -> Result<Probe> {
        let present = self
            .bus
            .detect_presence(id)
            .await
            .map_err(|e| XcvrError::module_io(id, e))?;
        if !present {
            return Ok(Probe {
                present,
                interface: ManagementInterfaceType::Unknown,
            });
        }

        let identifier = self
            .bus
            .read_register(id, IDENTIFIER, 1)
            .await
            .map_err(|e| XcvrError::module_io(id, e))?;
        let interface = identifier
            .first()
            .map(|b| self.decoder.interface_type(*b))
            .unwrap_or(ManagementInterfaceType::Unknown);

        Ok(Probe { present, interface })
    }

    /// Makes sure the instance in `id` matches `interface`. Caller holds
    /// the write lock.
    fn ensure_instance(
        &self,
        modules: &mut SlotMap<TransceiverId, Arc<TransceiverModule>>,
        id: TransceiverId,
        interface: ManagementInterfaceType,
    ) {
        if let Some(existing) = modules.get(&id) {
            if existing.interface() == interface {
                return;
            }
            info!(
                id = %id,
                from = %existing.interface(),
                to = %interface,
                "Management interface changed, replacing transceiver"
            );
            modules.evict(&id);
        }

        let Some(variant) = variant::for_interface(interface) else {
            return;
        };
        let module = TransceiverModule::new(
            id,
            variant,
            self.bus.clone(),
            self.decoder.clone(),
            self.ports_per_module(id),
            self.config.agent_sync_timeout,
        );
        info!(id = %id, %interface, ports = module.port_count(), "Created transceiver");
        if let Err(e) = modules.insert(id, Arc::new(module)) {
            error!(id = %id, error = %e, "Failed to store transceiver");
        }
    }

    /// Port aggregate from the synced status map: `Some` only when every
    /// expected port of the module has been synced.
    fn synced_ports_down(&self, id: TransceiverId) -> Option<bool> {
        let expected = self.ports_per_module(id);
        let synced = self.synced_ports.read();
        let ports: Vec<&PortStatus> = synced
            .values()
            .filter(|s| s.transceiver == Some(id))
            .collect();
        (expected > 0 && ports.len() == expected).then(|| ports.iter().all(|s| !s.up))
    }

    fn reset_decision(
        &self,
        modules: &SlotMap<TransceiverId, Arc<TransceiverModule>>,
        id: TransceiverId,
        present: bool,
    ) -> ResetDecision {
        let ports_down = modules
            .get(&id)
            .and_then(|m| m.all_ports_down())
            .or_else(|| self.synced_ports_down(id));
        let candidate = ResetCandidate {
            presence_confirmed: present,
            ports_down,
        };
        remediation::evaluate(&candidate, &self.guard, Utc::now())
    }

    /// Pulses the reset line and opens the settle window. Does not touch the
    /// module collection.
    async fn issue_reset(&self, id: TransceiverId) -> Result<()> {
        self.bus
            .hard_reset(id)
            .await
            .map_err(|e| XcvrError::module_io(id, e))?;
        self.reset_at.lock().insert(id, Instant::now());
        self.stats.lock().resets += 1;
        info!(id = %id, "Hard reset issued");
        Ok(())
    }

    /// Runs one refresh cycle. Returns the ids refreshed successfully.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> Vec<TransceiverId> {
        self.stats.lock().cycles += 1;

        if let Err(e) = self.verify_bus().await {
            error!(error = %e, "Aborting refresh cycle");
            self.stats.lock().aborted_cycles += 1;
            return Vec::new();
        }

        let probes = fan_out(self.settled_ids(), self.config.probe_timeout, |id| {
            self.probe(id)
        })
        .await;

        let mut probed = Vec::new();
        let mut reset_candidates = Vec::new();
        {
            let mut modules = self.modules.write();
            for (id, outcome) in probes {
                let presence = match &outcome {
                    TaskOutcome::Done(probe) => ModulePresence::from(probe.present),
                    _ => ModulePresence::Unknown,
                };
                self.last_probe.lock().insert(id, presence);

                let probe = match outcome {
                    TaskOutcome::Done(probe) => probe,
                    failed => {
                        self.stats.lock().probe_failures += 1;
                        error!(
                            id = %id,
                            reason = failed.failure_reason().unwrap_or_default(),
                            "Failed to probe transceiver, skipping this cycle"
                        );
                        continue;
                    }
                };
                probed.push(id);

                if !probe.present {
                    continue;
                }
                if probe.interface.is_known() {
                    self.ensure_instance(&mut modules, id, probe.interface);
                    continue;
                }

                match self.reset_decision(&modules, id, probe.present) {
                    ResetDecision::Reset => {
                        info!(id = %id, "Present transceiver with unknown interface, resetting");
                        reset_candidates.push(id);
                    }
                    ResetDecision::Skip(reason) => {
                        warn!(
                            id = %id,
                            reason = reason.as_str(),
                            "Unknown management interface, not resetting"
                        );
                    }
                }
            }
        }

        if !reset_candidates.is_empty() {
            let resets = fan_out(reset_candidates, self.config.probe_timeout, |id| {
                self.issue_reset(id)
            })
            .await;
            Self::log_failures("hard_reset", &resets);

            let mut modules = self.modules.write();
            for (id, _) in resets.iter().filter(|(_, o)| o.is_done()) {
                modules.evict(id);
            }
        }

        let targets: Vec<TransceiverId> = {
            let modules = self.modules.read();
            probed
                .into_iter()
                .filter(|id| modules.contains_key(id))
                .collect()
        };
        let results = self
            .fan_out_modules(targets, self.config.refresh_timeout, |module| async move {
                module.refresh().await
            })
            .await;
        Self::log_failures("refresh", &results);

        let failed = results.values().filter(|o| !o.is_done()).count() as u64;
        self.stats.lock().refresh_failures += failed;

        for (id, _) in results
            .iter()
            .filter(|(_, o)| matches!(o, TaskOutcome::Done(ModuleState::Discovered)))
        {
            if let Some(module) = self.module(*id) {
                self.seed_ports(&module);
            }
        }

        let refreshed: Vec<TransceiverId> = results
            .into_iter()
            .filter(|(_, o)| o.is_done())
            .map(|(id, _)| id)
            .collect();
        debug!(count = refreshed.len(), "Refresh cycle complete");
        refreshed
    }

    /// Start-up. A cold boot hard-resets every slot and waits out the settle
    /// window; a warm start pauses remediation instead. Then runs the first
    /// refresh.
    #[instrument(skip(self))]
    pub async fn init(&self, cold_boot: bool) -> Vec<TransceiverId> {
        if cold_boot {
            info!(modules = self.config.num_modules, "Cold boot, hard resetting all transceivers");
            let resets = fan_out(self.universe(), self.config.probe_timeout, |id| {
                self.issue_reset(id)
            })
            .await;
            for (id, outcome) in &resets {
                if let Some(reason) = outcome.failure_reason() {
                    warn!(id = %id, reason, "Cold boot reset failed");
                }
            }
            if resets.values().any(TaskOutcome::is_done) {
                tokio::time::sleep(self.config.post_reset_settle).await;
            }
        } else {
            let until = self.guard.pause_for(self.config.remediation_pause);
            info!(%until, "Warm start, remediation paused");
        }
        self.refresh_all().await
    }

    // ---- queries ----

    /// Snapshot of one slot. A slot without an instance reports the presence
    /// its last probe saw, `Unknown` if it was never probed successfully.
    fn slot_info(&self, id: TransceiverId) -> TransceiverInfo {
        match self.module(id) {
            Some(module) => module.info(),
            None => {
                let presence = self
                    .last_probe
                    .lock()
                    .get(&id)
                    .copied()
                    .unwrap_or(ModulePresence::Unknown);
                TransceiverInfo::without_instance(id, presence)
            }
        }
    }

    /// Snapshot per id.
    pub fn get_info(&self, ids: &[TransceiverId]) -> BTreeMap<TransceiverId, TransceiverInfo> {
        self.resolve_ids(ids)
            .into_iter()
            .map(|id| (id, self.slot_info(id)))
            .collect()
    }

    /// Last register snapshot per id, for modules that have one.
    pub fn get_raw_telemetry(&self, ids: &[TransceiverId]) -> BTreeMap<TransceiverId, RawTelemetry> {
        self.resolve_ids(ids)
            .into_iter()
            .filter_map(|id| Some((id, self.module(id)?.raw_telemetry()?)))
            .collect()
    }

    /// Reads registers from every listed module concurrently.
    #[instrument(skip(self))]
    pub async fn read_registers(
        &self,
        ids: &[TransceiverId],
        addr: RegisterAddr,
        len: usize,
    ) -> BTreeMap<TransceiverId, ReadResponse> {
        let results = self
            .fan_out_modules(self.resolve_ids(ids), self.config.probe_timeout, |module| async move {
                module.read_register(addr, len).await
            })
            .await;
        Self::log_failures("read_register", &results);

        results
            .into_iter()
            .map(|(id, outcome)| {
                let response = match outcome {
                    TaskOutcome::Done(data) => ReadResponse { data, valid: true },
                    _ => ReadResponse::invalid(),
                };
                (id, response)
            })
            .collect()
    }

    /// Writes registers on every listed module concurrently.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn write_registers(
        &self,
        ids: &[TransceiverId],
        addr: RegisterAddr,
        data: &[u8],
    ) -> BTreeMap<TransceiverId, WriteResponse> {
        let results = self
            .fan_out_modules(self.resolve_ids(ids), self.config.probe_timeout, |module| async move {
                module.write_register(addr, data).await
            })
            .await;
        Self::log_failures("write_register", &results);

        results
            .into_iter()
            .map(|(id, outcome)| {
                (
                    id,
                    WriteResponse {
                        success: outcome.is_done(),
                    },
                )
            })
            .collect()
    }

    pub fn get_and_clear_signal_flags(
        &self,
        ids: &[TransceiverId],
    ) -> BTreeMap<TransceiverId, SignalFlags> {
        self.resolve_ids(ids)
            .into_iter()
            .filter_map(|id| Some((id, self.module(id)?.read_and_clear_signal_flags())))
            .collect()
    }

    pub fn get_and_clear_media_signals(
        &self,
        ids: &[TransceiverId],
    ) -> BTreeMap<TransceiverId, Vec<MediaLaneSignals>> {
        self.resolve_ids(ids)
            .into_iter()
            .filter_map(|id| Some((id, self.module(id)?.read_and_clear_media_signals())))
            .collect()
    }

    pub fn get_and_clear_module_status(
        &self,
        ids: &[TransceiverId],
    ) -> BTreeMap<TransceiverId, ModuleStatus> {
        self.resolve_ids(ids)
            .into_iter()
            .filter_map(|id| Some((id, self.module(id)?.read_and_clear_module_status())))
            .collect()
    }

    /// Counts present modules among `ids`, updating instances on the way.
    #[instrument(skip(self))]
    pub async fn scan_presence(&self, ids: &[TransceiverId]) -> usize {
        let results = fan_out(self.resolve_ids(ids), self.config.probe_timeout, |id| {
            let module = self.module(id);
            async move {
                match module {
                    Some(module) => module.detect_presence().await,
                    None => self
                        .bus
                        .detect_presence(id)
                        .await
                        .map_err(|e| XcvrError::module_io(id, e)),
                }
            }
        })
        .await;
        Self::log_failures("detect_presence", &results);

        results
            .values()
            .filter(|o| matches!(o, TaskOutcome::Done(true)))
            .count()
    }

    /// Starts the next VDM sample capture on every listed module. Failures
    /// are isolated per module.
    #[instrument(skip(self))]
    pub async fn trigger_vdm_stats_capture(
        &self,
        ids: &[TransceiverId],
    ) -> BTreeMap<TransceiverId, bool> {
        let results = self
            .fan_out_modules(self.resolve_ids(ids), self.config.probe_timeout, |module| async move {
                module.trigger_vdm_capture().await
            })
            .await;
        Self::log_failures("trigger_vdm_capture", &results);

        results
            .into_iter()
            .map(|(id, outcome)| (id, outcome.is_done()))
            .collect()
    }

    // ---- control ----

    /// Programs one module for a port speed. Best-effort.
    #[instrument(skip(self))]
    pub async fn customize(&self, id: TransceiverId, speed: PortSpeed) -> bool {
        match self.lookup(id) {
            Ok(module) => module.customize_for_speed(speed).await,
            Err(e) => {
                warn!(id = %id, error = %e, "Cannot customize transceiver");
                false
            }
        }
    }

    /// Applies port status from the link-state source and drives each
    /// affected module's port state machines. Returns the affected modules.
    #[instrument(skip(self, statuses), fields(ports = statuses.len()))]
    pub fn sync_port_status(
        &self,
        statuses: &BTreeMap<PortId, PortStatus>,
    ) -> BTreeMap<TransceiverId, TransceiverInfo> {
        let mut affected: BTreeMap<TransceiverId, Vec<(PortId, bool)>> = BTreeMap::new();
        let mut moved = Vec::new();
        {
            let mut synced = self.synced_ports.write();
            for (port, status) in statuses {
                let mut status = status.clone();
                if status.transceiver.is_none() {
                    status.transceiver = self.topology.module_for_port(*port);
                }
                match status.transceiver {
                    Some(id) if self.in_universe(id) => {
                        affected.entry(id).or_default().push((*port, status.up));
                    }
                    Some(id) => {
                        warn!(port = %port, error = %XcvrError::InvalidIdentifier(id), "Ignoring port status");
                        continue;
                    }
                    None => debug!(port = %port, "Port not mapped to a transceiver"),
                }
                let now = status.transceiver;
                if let Some(before) = synced.insert(*port, status) {
                    if let Some(old) = before.transceiver.filter(|old| Some(*old) != now) {
                        moved.push((old, *port));
                    }
                }
            }
        }

        {
            let mut lanes = self.lanes.lock();
            for (old, port) in moved {
                if let Some(assigned) = lanes.get_mut(&old) {
                    assigned.remove(&port);
                }
            }
        }

        for (id, ports) in &affected {
            let module = self.module(*id);
            let cap = module
                .as_ref()
                .map_or_else(|| self.ports_per_module(*id), |m| m.port_count());
            for (port, up) in ports {
                let index = self.port_index(*id, *port, cap);
                match (&module, index) {
                    (Some(module), Some(index)) => {
                        module.handle_port_event(index, PortEvent::from(*up));
                    }
                    (_, None) => debug!(id = %id, port = %port, "No lane for port"),
                    (None, Some(_)) => {}
                }
            }
        }

        affected
            .keys()
            .map(|id| (*id, self.slot_info(*id)))
            .collect()
    }

    /// Lane index of `port` within module `id`: topology order when the
    /// topology maps the module, else the lane handed out on first sight.
    /// Returns `None` once all `cap` lanes are taken.
    fn port_index(&self, id: TransceiverId, port: PortId, cap: usize) -> Option<usize> {
        let mapped = self.topology.ports_for_module(id);
        if !mapped.is_empty() {
            return mapped.iter().position(|p| *p == port);
        }

        let mut lanes = self.lanes.lock();
        let assigned = lanes.entry(id).or_default();
        if let Some(index) = assigned.get(&port) {
            return Some(*index);
        }
        let taken: BTreeSet<usize> = assigned.values().copied().collect();
        let index = (0..cap).find(|i| !taken.contains(i))?;
        assigned.insert(port, index);
        debug!(id = %id, port = %port, lane = index, "Assigned lane");
        Some(index)
    }

    /// Replays the synced status of every port of a freshly discovered
    /// module into its port machines.
    fn seed_ports(&self, module: &TransceiverModule) {
        let id = module.id();
        let ports: Vec<(PortId, bool)> = self
            .synced_ports
            .read()
            .iter()
            .filter(|(_, s)| s.transceiver == Some(id))
            .map(|(port, s)| (*port, s.up))
            .collect();
        if ports.is_empty() {
            return;
        }

        for (port, up) in &ports {
            if let Some(index) = self.port_index(id, *port, module.port_count()) {
                module.handle_port_event(index, PortEvent::from(*up));
            }
        }
        info!(id = %id, ports = ports.len(), state = %module.state(), "Seeded ports from synced status");
    }

    /// Administrative hard reset. Bypasses the safety policy and evicts the
    /// instance; the next refresh rediscovers the module.
    #[instrument(skip(self))]
    pub async fn trigger_hard_reset(&self, id: TransceiverId) -> bool {
        if !self.in_universe(id) {
            warn!(error = %XcvrError::InvalidIdentifier(id), "Cannot reset");
            return false;
        }
        match tokio::time::timeout(self.config.probe_timeout, self.issue_reset(id)).await {
            Ok(Ok(())) => {
                self.modules.write().evict(&id);
                true
            }
            Ok(Err(e)) => {
                error!(id = %id, error = %e, "Failed to hard reset transceiver");
                false
            }
            Err(_) => {
                error!(id = %id, "Hard reset timed out");
                false
            }
        }
    }

    fn submit(&self, id: TransceiverId, event: ModuleEvent) -> Option<bool> {
        match self.lookup(id) {
            Ok(module) => Some(module.process_event(event).accepted),
            Err(e) => {
                warn!(id = %id, ?event, error = %e, "Cannot submit event");
                None
            }
        }
    }

    /// Safety-checked firmware upgrade: refused while any port is up.
    #[instrument(skip(self))]
    pub fn trigger_firmware_upgrade(&self, id: TransceiverId) -> bool {
        let accepted = self.submit(id, ModuleEvent::TriggerUpgrade).unwrap_or(false);
        if !accepted {
            warn!(id = %id, "Firmware upgrade refused");
        }
        accepted
    }

    /// Administrative firmware upgrade, bypassing the active-port check.
    #[instrument(skip(self))]
    pub fn force_firmware_upgrade(&self, id: TransceiverId) -> bool {
        let accepted = self.submit(id, ModuleEvent::ForcedUpgrade).unwrap_or(false);
        if accepted {
            warn!(id = %id, "Forced firmware upgrade, live traffic may be disrupted");
        }
        accepted
    }

    /// Ends an upgrade with a physical reset. The module must be rediscovered.
    #[instrument(skip(self))]
    pub async fn complete_firmware_upgrade(&self, id: TransceiverId) -> bool {
        let Ok(module) = self.lookup(id) else {
            return false;
        };
        if module.state() != ModuleState::Upgrading {
            warn!(id = %id, state = %module.state(), "No upgrade in progress");
            return false;
        }
        match tokio::time::timeout(self.config.probe_timeout, self.issue_reset(id)).await {
            Ok(Ok(())) => module.process_event(ModuleEvent::ResetTransceiver).accepted,
            Ok(Err(e)) => {
                error!(id = %id, error = %e, "Failed to reset after upgrade");
                false
            }
            Err(_) => {
                error!(id = %id, "Reset after upgrade timed out");
                false
            }
        }
    }

    pub fn acknowledge_bringup(&self, id: TransceiverId) -> bool {
        self.submit(id, ModuleEvent::BringupDone).unwrap_or(false)
    }

    pub fn acknowledge_remediation(&self, id: TransceiverId) -> bool {
        self.submit(id, ModuleEvent::RemediateDone).unwrap_or(false)
    }

    /// Suppresses automatic resets for `window`. Returns the deadline.
    pub fn pause_remediation(&self, window: Duration) -> DateTime<Utc> {
        let until = self.guard.pause_for(window);
        info!(%until, "Remediation paused");
        until
    }

    /// Suppresses automatic resets until `deadline`.
    pub fn pause_remediation_until(&self, deadline: DateTime<Utc>) {
        self.guard.pause_until(deadline);
        info!(until = %deadline, "Remediation paused");
    }

    pub fn resume_remediation(&self) {
        self.guard.resume();
        info!("Remediation resumed");
    }

    pub fn remediation_paused_until(&self) -> Option<DateTime<Utc>> {
        self.guard.paused_until()
    }
}

#[async_trait]
impl PeriodicService for TransceiverManager {
    fn name(&self) -> &str {
        "xcvrd"
    }

    async fn tick(&self) {
        let refreshed = self.refresh_all().await;
        debug!(refreshed = refreshed.len(), "Periodic refresh done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockPortTopology;
    use crate::decoder::StandardDecoder;
    use crate::port_sm::PortState;
    use crate::sim::{SimModule, SimulatedBus};
    use pretty_assertions::assert_eq;

    fn unmapped_topology() -> MockPortTopology {
        let mut topo = MockPortTopology::new();
        topo.expect_ports_for_module().returning(|_| Vec::new());
        topo.expect_module_for_port().returning(|_| None);
        topo
    }

    fn manager_with(bus: Arc<SimulatedBus>, topo: MockPortTopology) -> TransceiverManager {
        let config = ManagerConfig {
            num_modules: 4,
            ..Default::default()
        };
        TransceiverManager::new(config, bus, Arc::new(StandardDecoder), Arc::new(topo))
    }

    #[test]
    fn test_resolve_ids() {
        let manager = manager_with(Arc::new(SimulatedBus::new()), unmapped_topology());
        assert_eq!(manager.resolve_ids(&[]).len(), 4);
        assert_eq!(
            manager.resolve_ids(&[TransceiverId(3), TransceiverId(9), TransceiverId(3)]),
            vec![TransceiverId(3)]
        );
    }

    #[tokio::test]
    async fn test_port_count_from_topology() {
        let mut topo = MockPortTopology::new();
        topo.expect_ports_for_module().returning(|id| {
            if id == TransceiverId(0) {
                vec![PortId(10), PortId(11)]
            } else {
                Vec::new()
            }
        });
        topo.expect_module_for_port().returning(|_| None);

        let bus = Arc::new(
            SimulatedBus::new()
                .with_module(TransceiverId(0), SimModule::cmis("A"))
                .with_module(TransceiverId(1), SimModule::sff8636("B"))
                .with_module(TransceiverId(2), SimModule::sff8472("C")),
        );
        let manager = manager_with(bus, topo);
        manager.refresh_all().await;

        let info = manager.get_info(&[]);
        assert_eq!(info[&TransceiverId(0)].port_states.len(), 2);
        assert_eq!(info[&TransceiverId(1)].port_states.len(), 4);
        assert_eq!(info[&TransceiverId(2)].port_states.len(), 1);
        assert_eq!(info[&TransceiverId(3)].state, ModuleState::NotPresent);
    }

    #[tokio::test]
    async fn test_sync_uses_topology_lane_order() {
        let mut topo = MockPortTopology::new();
        topo.expect_ports_for_module()
            .returning(|_| vec![PortId(20), PortId(21), PortId(22), PortId(23)]);
        topo.expect_module_for_port()
            .returning(|port| (port.0 >= 20).then_some(TransceiverId(0)));

        let bus = Arc::new(SimulatedBus::new().with_module(TransceiverId(0), SimModule::cmis("A")));
        let manager = manager_with(bus, topo);
        manager.refresh_all().await;

        let statuses: BTreeMap<PortId, PortStatus> = [(
            PortId(22),
            PortStatus {
                transceiver: None,
                up: true,
                enabled: true,
            },
        )]
        .into_iter()
        .collect();
        let info = manager.sync_port_status(&statuses);

        let module = &info[&TransceiverId(0)];
        assert_eq!(module.state, ModuleState::Active);
        assert_eq!(
            module.port_states,
            vec![PortState::Down, PortState::Down, PortState::Up, PortState::Down]
        );
    }

    #[test]
    fn test_synced_ports_need_full_count() {
        let manager = manager_with(Arc::new(SimulatedBus::new()), unmapped_topology());
        let id = TransceiverId(1);

        let partial: BTreeMap<PortId, PortStatus> = (0..3)
            .map(|p| (PortId(p), PortStatus::new(id, false)))
            .collect();
        manager.sync_port_status(&partial);
        assert_eq!(manager.synced_ports_down(id), None);

        let full: BTreeMap<PortId, PortStatus> = [(PortId(3), PortStatus::new(id, false))]
            .into_iter()
            .collect();
        manager.sync_port_status(&full);
        assert_eq!(manager.synced_ports_down(id), Some(true));

        let one_up: BTreeMap<PortId, PortStatus> = [(PortId(0), PortStatus::new(id, true))]
            .into_iter()
            .collect();
        manager.sync_port_status(&one_up);
        assert_eq!(manager.synced_ports_down(id), Some(false));
    }

    #[test]
    fn test_lanes_assigned_on_first_sight() {
        let manager = manager_with(Arc::new(SimulatedBus::new()), unmapped_topology());
        let (a, b) = (TransceiverId(1), TransceiverId(2));
        let sync = |port: u32, id: TransceiverId| {
            manager.sync_port_status(&BTreeMap::from([(PortId(port), PortStatus::new(id, false))]));
        };

        for port in [7, 3, 5, 1] {
            sync(port, a);
        }
        let lanes = manager.lanes.lock()[&a].clone();
        assert_eq!(
            lanes,
            BTreeMap::from([(PortId(7), 0), (PortId(3), 1), (PortId(5), 2), (PortId(1), 3)])
        );

        // Every lane taken
        sync(9, a);
        assert!(!manager.lanes.lock()[&a].contains_key(&PortId(9)));

        // A port moving away frees its lane for the next newcomer
        sync(3, b);
        sync(11, a);
        assert_eq!(manager.lanes.lock()[&a].get(&PortId(11)), Some(&1));
        assert_eq!(manager.lanes.lock()[&b].get(&PortId(3)), Some(&0));
    }

    #[tokio::test]
    async fn test_acknowledgements_need_inactive() {
        let bus = Arc::new(SimulatedBus::new().with_module(TransceiverId(0), SimModule::cmis("A")));
        let manager = manager_with(bus, unmapped_topology());
        manager.refresh_all().await;

        assert!(!manager.acknowledge_bringup(TransceiverId(0)));
        let down: BTreeMap<PortId, PortStatus> = (0..4)
            .map(|p| (PortId(p), PortStatus::new(TransceiverId(0), false)))
            .collect();
        manager.sync_port_status(&down);

        assert!(manager.acknowledge_bringup(TransceiverId(0)));
        assert!(manager.acknowledge_remediation(TransceiverId(0)));
        assert!(!manager.acknowledge_bringup(TransceiverId(2)));
    }

    #[tokio::test]
    async fn test_stats_and_periodic_tick() {
        let bus = Arc::new(SimulatedBus::new().with_module(TransceiverId(0), SimModule::cmis("A")));
        let manager = manager_with(bus.clone(), unmapped_topology());

        manager.tick().await;
        bus.set_healthy(false);
        manager.tick().await;

        let stats = manager.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.aborted_cycles, 1);
        assert_eq!(manager.name(), "xcvrd");
    }
}
