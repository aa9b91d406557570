//! Per-interface module behavior.
//!
//! The lifecycle state machine is the same for every module. What differs
//! per management interface lives behind [`ModuleVariant`]: which register
//! windows make up a telemetry snapshot, lane count, EEPROM checksum ranges
//! and the register writes that customize a module for a port speed.

use std::fmt;

use async_trait::async_trait;

use crate::bus::TransceiverBus;
use crate::decoder::{cmis, sff8472, sff8636};
use crate::error::BusError;
use crate::telemetry::RawTelemetry;
use crate::types::{ManagementInterfaceType, PortSpeed, RegisterAddr, TransceiverId};

/// A checksummed EEPROM range: the low byte of the sum of `len` bytes
/// starting at `start` must equal the byte at `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumRange {
    pub start: RegisterAddr,
    pub len: usize,
    pub check: RegisterAddr,
}

impl ChecksumRange {
    const fn new(start: RegisterAddr, len: usize, check: RegisterAddr) -> Self {
        Self { start, len, check }
    }

    /// Returns false if the range is not fully covered by `raw`.
    pub fn verify(&self, raw: &RawTelemetry) -> bool {
        let (Some(bytes), Some(expected)) = (raw.bytes(self.start, self.len), raw.byte(self.check))
        else {
            return false;
        };
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        sum == expected
    }
}

/// A register window read as part of a telemetry snapshot.
pub type Region = (RegisterAddr, usize);

/// Behavior that depends on the module's management interface.
#[async_trait]
pub trait ModuleVariant: Send + Sync + fmt::Debug {
    fn interface(&self) -> ManagementInterfaceType;

    fn lane_count(&self) -> usize;

    /// Port count forced by the form factor, overriding topology.
    fn fixed_port_count(&self) -> Option<usize> {
        None
    }

    fn telemetry_regions(&self) -> &'static [Region];

    fn checksum_ranges(&self) -> &'static [ChecksumRange];

    /// Register writes that select `speed`.
    fn speed_writes(&self, speed: PortSpeed) -> Vec<(RegisterAddr, Vec<u8>)>;

    /// Starts the next VDM sample capture. Modules without VDM do nothing.
    async fn trigger_vdm_capture(
        &self,
        _bus: &dyn TransceiverBus,
        _id: TransceiverId,
    ) -> Result<(), BusError> {
        Ok(())
    }

    async fn detect_presence(
        &self,
        bus: &dyn TransceiverBus,
        id: TransceiverId,
    ) -> Result<bool, BusError> {
        bus.detect_presence(id).await
    }

    /// Reads every telemetry region. Fails on the first unreadable region.
    async fn read_hardware(
        &self,
        bus: &dyn TransceiverBus,
        id: TransceiverId,
    ) -> Result<RawTelemetry, BusError> {
        let mut raw = RawTelemetry::default();
        for (addr, len) in self.telemetry_regions() {
            let data = bus.read_register(id, *addr, *len).await?;
            raw.push(*addr, data);
        }
        Ok(raw)
    }

    async fn customize_for_speed(
        &self,
        bus: &dyn TransceiverBus,
        id: TransceiverId,
        speed: PortSpeed,
    ) -> Result<(), BusError> {
        for (addr, data) in self.speed_writes(speed) {
            bus.write_register(id, addr, &data).await?;
        }
        Ok(())
    }

    /// Checks every EEPROM checksum against a snapshot.
    fn verify_checksum(&self, raw: &RawTelemetry) -> bool {
        let ranges = self.checksum_ranges();
        !ranges.is_empty() && ranges.iter().all(|r| r.verify(raw))
    }
}

/// Returns the variant for a known interface.
pub fn for_interface(interface: ManagementInterfaceType) -> Option<Box<dyn ModuleVariant>> {
    match interface {
        ManagementInterfaceType::Cmis => Some(Box::new(CmisVariant)),
        ManagementInterfaceType::Sff8636 => Some(Box::new(Sff8636Variant)),
        ManagementInterfaceType::Sff8472 => Some(Box::new(Sff8472Variant)),
        ManagementInterfaceType::Unknown => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CmisVariant;

const CMIS_REGIONS: &[Region] = &[
    (RegisterAddr::lower(0), 128),
    (RegisterAddr::paged(0x00, 128), 128),
    (RegisterAddr::paged(cmis::LANE_FLAGS_PAGE, 128), 128),
];

const CMIS_CHECKSUMS: &[ChecksumRange] = &[ChecksumRange::new(
    RegisterAddr::paged(0x00, 128),
    94,
    RegisterAddr::paged(0x00, 222),
)];

impl CmisVariant {
    fn application_code(speed: PortSpeed) -> u8 {
        match speed {
            PortSpeed::Gbps400 => 1,
            PortSpeed::Gbps200 => 2,
            PortSpeed::Gbps100 => 3,
            _ => 4,
        }
    }
}

#[async_trait]
impl ModuleVariant for CmisVariant {
    fn interface(&self) -> ManagementInterfaceType {
        ManagementInterfaceType::Cmis
    }

    fn lane_count(&self) -> usize {
        cmis::LANES
    }

    fn telemetry_regions(&self) -> &'static [Region] {
        CMIS_REGIONS
    }

    fn checksum_ranges(&self) -> &'static [ChecksumRange] {
        CMIS_CHECKSUMS
    }

    fn speed_writes(&self, speed: PortSpeed) -> Vec<(RegisterAddr, Vec<u8>)> {
        // ApSel code in the upper nibble, data path id 0
        let apsel = Self::application_code(speed) << 4;
        vec![(cmis::APSEL_CONTROL, vec![apsel; cmis::LANES])]
    }

    async fn trigger_vdm_capture(
        &self,
        bus: &dyn TransceiverBus,
        id: TransceiverId,
    ) -> Result<(), BusError> {
        bus.write_register(id, cmis::VDM_CONTROL, &[cmis::VDM_FREEZE])
            .await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sff8636Variant;

const SFF8636_REGIONS: &[Region] = &[
    (RegisterAddr::lower(0), 128),
    (RegisterAddr::paged(0x00, 128), 128),
];

const SFF8636_CHECKSUMS: &[ChecksumRange] = &[
    ChecksumRange::new(RegisterAddr::paged(0x00, 128), 63, RegisterAddr::paged(0x00, 191)),
    ChecksumRange::new(RegisterAddr::paged(0x00, 192), 31, RegisterAddr::paged(0x00, 223)),
];

#[async_trait]
impl ModuleVariant for Sff8636Variant {
    fn interface(&self) -> ManagementInterfaceType {
        ManagementInterfaceType::Sff8636
    }

    fn lane_count(&self) -> usize {
        sff8636::LANES
    }

    fn telemetry_regions(&self) -> &'static [Region] {
        SFF8636_REGIONS
    }

    fn checksum_ranges(&self) -> &'static [ChecksumRange] {
        SFF8636_CHECKSUMS
    }

    fn speed_writes(&self, speed: PortSpeed) -> Vec<(RegisterAddr, Vec<u8>)> {
        // RX and TX rate select, two bits per lane
        let rate = if speed.mbps() >= 100_000 { 0xAA } else { 0x00 };
        vec![(sff8636::RATE_SELECT, vec![rate, rate])]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sff8472Variant;

const SFF8472_REGIONS: &[Region] = &[
    (RegisterAddr::lower(0), 128),
    (RegisterAddr::paged(sff8472::DIAG_PAGE, 0), 128),
];

const SFF8472_CHECKSUMS: &[ChecksumRange] = &[
    ChecksumRange::new(RegisterAddr::lower(0), 63, RegisterAddr::lower(63)),
    ChecksumRange::new(RegisterAddr::lower(64), 31, RegisterAddr::lower(95)),
];

#[async_trait]
impl ModuleVariant for Sff8472Variant {
    fn interface(&self) -> ManagementInterfaceType {
        ManagementInterfaceType::Sff8472
    }

    fn lane_count(&self) -> usize {
        sff8472::LANES
    }

    fn fixed_port_count(&self) -> Option<usize> {
        Some(1)
    }

    fn telemetry_regions(&self) -> &'static [Region] {
        SFF8472_REGIONS
    }

    fn checksum_ranges(&self) -> &'static [ChecksumRange] {
        SFF8472_CHECKSUMS
    }

    fn speed_writes(&self, speed: PortSpeed) -> Vec<(RegisterAddr, Vec<u8>)> {
        // RS1 soft rate select
        let rs1 = if speed.mbps() >= 10_000 { 0x08 } else { 0x00 };
        vec![(sff8472::EXT_CONTROL, vec![rs1])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(mut page: Vec<u8>, start: usize, len: usize, check: usize) -> Vec<u8> {
        let sum = page[start..start + len]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        page[check] = sum;
        page
    }

    #[test]
    fn test_for_interface() {
        assert_eq!(
            for_interface(ManagementInterfaceType::Cmis).unwrap().lane_count(),
            8
        );
        assert_eq!(
            for_interface(ManagementInterfaceType::Sff8472)
                .unwrap()
                .fixed_port_count(),
            Some(1)
        );
        assert!(for_interface(ManagementInterfaceType::Unknown).is_none());
    }

    #[test]
    fn test_cmis_checksum() {
        // Upper page 00h, stored from offset 128
        let page: Vec<u8> = (0..128u32).map(|i| (i * 7) as u8).collect();
        let page = with_checksum(page, 0, 94, 94);

        let mut raw = RawTelemetry::default();
        raw.push(RegisterAddr::paged(0x00, 128), page.clone());
        assert!(CmisVariant.verify_checksum(&raw));

        let mut corrupt = page;
        corrupt[10] ^= 0xFF;
        let mut raw = RawTelemetry::default();
        raw.push(RegisterAddr::paged(0x00, 128), corrupt);
        assert!(!CmisVariant.verify_checksum(&raw));
    }

    #[test]
    fn test_sff8636_needs_both_ranges() {
        let page: Vec<u8> = (0..128u32).map(|i| (i * 3 + 1) as u8).collect();
        let base_only = with_checksum(page, 0, 63, 63);

        let mut raw = RawTelemetry::default();
        raw.push(RegisterAddr::paged(0x00, 128), base_only.clone());
        assert!(!Sff8636Variant.verify_checksum(&raw));

        let both = with_checksum(base_only, 64, 31, 95);
        let mut raw = RawTelemetry::default();
        raw.push(RegisterAddr::paged(0x00, 128), both);
        assert!(Sff8636Variant.verify_checksum(&raw));
    }

    #[test]
    fn test_sff8472_checksum_on_a0() {
        let a0: Vec<u8> = (0..128u32).map(|i| (i + 0x40) as u8).collect();
        let a0 = with_checksum(with_checksum(a0, 0, 63, 63), 64, 31, 95);
        let mut raw = RawTelemetry::default();
        raw.push(RegisterAddr::lower(0), a0);
        assert!(Sff8472Variant.verify_checksum(&raw));
    }

    #[test]
    fn test_missing_snapshot_fails_checksum() {
        assert!(!CmisVariant.verify_checksum(&RawTelemetry::default()));
    }

    #[test]
    fn test_speed_writes() {
        let writes = CmisVariant.speed_writes(PortSpeed::Gbps400);
        assert_eq!(writes, vec![(cmis::APSEL_CONTROL, vec![0x10; 8])]);

        let writes = Sff8636Variant.speed_writes(PortSpeed::Gbps40);
        assert_eq!(writes[0].1, vec![0x00, 0x00]);
    }
}
