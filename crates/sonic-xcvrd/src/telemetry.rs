//! Raw register snapshots, decoded telemetry and the clear-on-read cache.
//!
//! Hardware alarm registers latch: once a condition is seen it stays set
//! until software reads it. [`TelemetryCache`] models that on top of periodic
//! polling. Every refresh ORs the freshly decoded flags into the cache and
//! every `read_and_clear_*` returns the accumulated value and resets it.

use serde::{Deserialize, Serialize};
use std::mem;

use crate::types::RegisterAddr;

/// One contiguous window of register bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRegion {
    pub addr: RegisterAddr,
    pub data: Vec<u8>,
}

impl RawRegion {
    fn byte(&self, addr: RegisterAddr) -> Option<u8> {
        if addr.page != self.addr.page || addr.offset < self.addr.offset {
            return None;
        }
        self.data
            .get(usize::from(addr.offset - self.addr.offset))
            .copied()
    }
}

/// Register windows read from a module during one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTelemetry {
    pub regions: Vec<RawRegion>,
}

impl RawTelemetry {
    pub fn push(&mut self, addr: RegisterAddr, data: Vec<u8>) {
        self.regions.push(RawRegion { addr, data });
    }

    /// Returns the byte at `addr` if any region covers it.
    pub fn byte(&self, addr: RegisterAddr) -> Option<u8> {
        self.regions.iter().find_map(|r| r.byte(addr))
    }

    /// Big-endian u16 starting at `addr`.
    pub fn u16_be(&self, addr: RegisterAddr) -> Option<u16> {
        let hi = self.byte(addr)?;
        let lo = self.byte(RegisterAddr::paged(addr.page, addr.offset.checked_add(1)?))?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    /// `len` consecutive bytes starting at `addr`.
    pub fn bytes(&self, addr: RegisterAddr, len: usize) -> Option<Vec<u8>> {
        (0..len)
            .map(|i| {
                let offset = u8::try_from(usize::from(addr.offset) + i).ok()?;
                self.byte(RegisterAddr::paged(addr.page, offset))
            })
            .collect()
    }
}

/// Module-level latched alarm flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFlags {
    pub temp_high_alarm: bool,
    pub temp_low_alarm: bool,
    pub vcc_high_alarm: bool,
    pub vcc_low_alarm: bool,
}

impl SignalFlags {
    fn accumulate(&mut self, other: &SignalFlags) {
        self.temp_high_alarm |= other.temp_high_alarm;
        self.temp_low_alarm |= other.temp_low_alarm;
        self.vcc_high_alarm |= other.vcc_high_alarm;
        self.vcc_low_alarm |= other.vcc_low_alarm;
    }

    pub fn any(&self) -> bool {
        self.temp_high_alarm || self.temp_low_alarm || self.vcc_high_alarm || self.vcc_low_alarm
    }
}

/// Latched per-lane media signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLaneSignals {
    pub lane: u8,
    pub tx_los: bool,
    pub rx_los: bool,
    pub tx_lol: bool,
    pub rx_lol: bool,
    pub tx_fault: bool,
}

impl MediaLaneSignals {
    pub fn new(lane: u8) -> Self {
        Self {
            lane,
            ..Default::default()
        }
    }

    fn accumulate(&mut self, other: &MediaLaneSignals) {
        self.tx_los |= other.tx_los;
        self.rx_los |= other.rx_los;
        self.tx_lol |= other.tx_lol;
        self.rx_lol |= other.rx_lol;
        self.tx_fault |= other.tx_fault;
    }
}

/// Latched module status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    /// CMIS module state changed since last read
    pub cmis_state_changed: bool,
    pub data_not_ready: bool,
    pub interrupt: bool,
    pub fw_fault: bool,
}

impl ModuleStatus {
    fn accumulate(&mut self, other: &ModuleStatus) {
        self.cmis_state_changed |= other.cmis_state_changed;
        self.data_not_ready |= other.data_not_ready;
        self.interrupt |= other.interrupt;
        self.fw_fault |= other.fw_fault;
    }
}

/// Semantic view of one refresh, produced by a protocol decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedTelemetry {
    pub temperature_c: Option<f64>,
    pub vcc_v: Option<f64>,
    pub vendor: Option<String>,
    pub flags: SignalFlags,
    pub lanes: Vec<MediaLaneSignals>,
    pub status: ModuleStatus,
}

/// Clear-on-read accumulation of decoded flags.
#[derive(Debug, Clone, Default)]
pub struct TelemetryCache {
    flags: SignalFlags,
    lanes: Vec<MediaLaneSignals>,
    status: ModuleStatus,
}

impl TelemetryCache {
    pub fn new(lane_count: usize) -> Self {
        Self {
            lanes: fresh_lanes(lane_count),
            ..Default::default()
        }
    }

    /// ORs a decoded refresh into the latched state.
    pub fn accumulate(&mut self, decoded: &DecodedTelemetry) {
        self.flags.accumulate(&decoded.flags);
        self.status.accumulate(&decoded.status);

        for lane in &decoded.lanes {
            match self.lanes.iter_mut().find(|l| l.lane == lane.lane) {
                Some(cached) => cached.accumulate(lane),
                None => self.lanes.push(*lane),
            }
        }
    }

    pub fn read_and_clear_signal_flags(&mut self) -> SignalFlags {
        mem::take(&mut self.flags)
    }

    pub fn read_and_clear_media_signals(&mut self) -> Vec<MediaLaneSignals> {
        let fresh = fresh_lanes(self.lanes.len());
        mem::replace(&mut self.lanes, fresh)
    }

    pub fn read_and_clear_module_status(&mut self) -> ModuleStatus {
        mem::take(&mut self.status)
    }
}

fn fresh_lanes(count: usize) -> Vec<MediaLaneSignals> {
    (0..count)
        .filter_map(|lane| u8::try_from(lane).ok())
        .map(MediaLaneSignals::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decoded_with_high_temp() -> DecodedTelemetry {
        DecodedTelemetry {
            flags: SignalFlags {
                temp_high_alarm: true,
                ..Default::default()
            },
            lanes: vec![MediaLaneSignals {
                rx_los: true,
                ..MediaLaneSignals::new(1)
            }],
            status: ModuleStatus {
                cmis_state_changed: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_raw_lookup_by_page_and_offset() {
        let mut raw = RawTelemetry::default();
        raw.push(RegisterAddr::lower(0), vec![0x18, 0x00, 0x07]);
        raw.push(RegisterAddr::paged(0x11, 128), vec![0xAA, 0x55]);

        assert_eq!(raw.byte(RegisterAddr::lower(0)), Some(0x18));
        assert_eq!(raw.byte(RegisterAddr::lower(3)), None);
        assert_eq!(raw.byte(RegisterAddr::paged(0x11, 129)), Some(0x55));
        assert_eq!(raw.byte(RegisterAddr::paged(0x10, 129)), None);
        assert_eq!(raw.u16_be(RegisterAddr::lower(1)), Some(0x0007));
        assert_eq!(raw.bytes(RegisterAddr::lower(0), 2), Some(vec![0x18, 0x00]));
        assert_eq!(raw.bytes(RegisterAddr::lower(1), 4), None);
    }

    #[test]
    fn test_flags_latch_until_read() {
        let mut cache = TelemetryCache::new(4);
        cache.accumulate(&decoded_with_high_temp());
        // A later clean refresh must not clear the latch
        cache.accumulate(&DecodedTelemetry::default());

        let flags = cache.read_and_clear_signal_flags();
        assert!(flags.temp_high_alarm);
        assert!(!cache.read_and_clear_signal_flags().any());
    }

    #[test]
    fn test_media_signals_clear_on_read() {
        let mut cache = TelemetryCache::new(4);
        cache.accumulate(&decoded_with_high_temp());

        let lanes = cache.read_and_clear_media_signals();
        assert_eq!(lanes.len(), 4);
        assert!(lanes[1].rx_los);
        assert!(!lanes[0].rx_los);

        let lanes = cache.read_and_clear_media_signals();
        assert_eq!(lanes.len(), 4);
        assert!(lanes.iter().all(|l| !l.rx_los));
        assert_eq!(lanes[3].lane, 3);
    }

    #[test]
    fn test_module_status_clear_on_read() {
        let mut cache = TelemetryCache::new(1);
        cache.accumulate(&decoded_with_high_temp());

        assert!(cache.read_and_clear_module_status().cmis_state_changed);
        assert_eq!(cache.read_and_clear_module_status(), ModuleStatus::default());
    }
}
