//! Standard register decoding for CMIS, SFF-8636 and SFF-8472 modules.
//!
//! Only the fields xcvrd acts on are decoded: identity, temperature, supply
//! voltage, latched alarm flags and per-lane media signals. Everything else
//! stays available through the raw register snapshot.

use crate::bus::ProtocolDecoder;
use crate::error::{Result, XcvrError};
use crate::telemetry::{DecodedTelemetry, MediaLaneSignals, ModuleStatus, RawTelemetry, SignalFlags};
use crate::types::{ManagementInterfaceType, RegisterAddr};

/// Identifier byte, common to every interface.
pub const IDENTIFIER: RegisterAddr = RegisterAddr::lower(0);

/// CMIS 4.0/5.x register layout.
pub mod cmis {
    use crate::types::RegisterAddr;

    pub const LANES: usize = 8;
    pub const MODULE_FLAGS: RegisterAddr = RegisterAddr::lower(8);
    pub const TEMP_VCC_FLAGS: RegisterAddr = RegisterAddr::lower(9);
    pub const TEMPERATURE: RegisterAddr = RegisterAddr::lower(14);
    pub const VCC: RegisterAddr = RegisterAddr::lower(16);
    pub const VENDOR_NAME: RegisterAddr = RegisterAddr::paged(0x00, 129);
    pub const LANE_FLAGS_PAGE: u8 = 0x11;
    pub const TX_FAULT: RegisterAddr = RegisterAddr::paged(LANE_FLAGS_PAGE, 135);
    pub const TX_LOS: RegisterAddr = RegisterAddr::paged(LANE_FLAGS_PAGE, 136);
    pub const TX_LOL: RegisterAddr = RegisterAddr::paged(LANE_FLAGS_PAGE, 137);
    pub const RX_LOS: RegisterAddr = RegisterAddr::paged(LANE_FLAGS_PAGE, 147);
    pub const RX_LOL: RegisterAddr = RegisterAddr::paged(LANE_FLAGS_PAGE, 148);
    /// Staged control set 0, application select per lane
    pub const APSEL_CONTROL: RegisterAddr = RegisterAddr::paged(0x10, 145);
    /// VDM sample control; bit 7 requests a freeze of the current samples
    pub const VDM_CONTROL: RegisterAddr = RegisterAddr::paged(0x2F, 144);
    pub const VDM_FREEZE: u8 = 0x80;
}

/// SFF-8636 (QSFP) register layout.
pub mod sff8636 {
    use crate::types::RegisterAddr;

    pub const LANES: usize = 4;
    pub const STATUS: RegisterAddr = RegisterAddr::lower(2);
    pub const LOS: RegisterAddr = RegisterAddr::lower(3);
    pub const TX_FAULT: RegisterAddr = RegisterAddr::lower(4);
    pub const LOL: RegisterAddr = RegisterAddr::lower(5);
    pub const TEMP_FLAGS: RegisterAddr = RegisterAddr::lower(6);
    pub const VCC_FLAGS: RegisterAddr = RegisterAddr::lower(7);
    pub const TEMPERATURE: RegisterAddr = RegisterAddr::lower(22);
    pub const VCC: RegisterAddr = RegisterAddr::lower(26);
    pub const RATE_SELECT: RegisterAddr = RegisterAddr::lower(87);
    pub const VENDOR_NAME: RegisterAddr = RegisterAddr::paged(0x00, 148);
}

/// SFF-8472 (SFP) register layout. The A2h diagnostics device is addressed
/// as page `DIAG_PAGE`.
pub mod sff8472 {
    use crate::types::RegisterAddr;

    pub const LANES: usize = 1;
    pub const DIAG_PAGE: u8 = 0xA2;
    pub const VENDOR_NAME: RegisterAddr = RegisterAddr::lower(20);
    pub const TEMPERATURE: RegisterAddr = RegisterAddr::paged(DIAG_PAGE, 96);
    pub const VCC: RegisterAddr = RegisterAddr::paged(DIAG_PAGE, 98);
    pub const STATUS: RegisterAddr = RegisterAddr::paged(DIAG_PAGE, 110);
    pub const ALARMS: RegisterAddr = RegisterAddr::paged(DIAG_PAGE, 112);
    pub const EXT_CONTROL: RegisterAddr = RegisterAddr::paged(DIAG_PAGE, 118);
}

const VENDOR_NAME_LEN: usize = 16;

/// Decoder for the three standard management interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

impl StandardDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolDecoder for StandardDecoder {
    fn interface_type(&self, identifier: u8) -> ManagementInterfaceType {
        // SFF-8024 table 4-1
        match identifier {
            0x03 => ManagementInterfaceType::Sff8472,
            0x0C | 0x0D | 0x11 => ManagementInterfaceType::Sff8636,
            0x18 | 0x19 | 0x1E => ManagementInterfaceType::Cmis,
            _ => ManagementInterfaceType::Unknown,
        }
    }

    fn decode(
        &self,
        interface: ManagementInterfaceType,
        raw: &RawTelemetry,
    ) -> Result<DecodedTelemetry> {
        if raw.byte(IDENTIFIER).is_none() {
            return Err(XcvrError::Decode("identifier byte not read".to_string()));
        }

        match interface {
            ManagementInterfaceType::Cmis => Ok(decode_cmis(raw)),
            ManagementInterfaceType::Sff8636 => Ok(decode_sff8636(raw)),
            ManagementInterfaceType::Sff8472 => Ok(decode_sff8472(raw)),
            ManagementInterfaceType::Unknown => Err(XcvrError::Decode(
                "no register layout for unknown interface".to_string(),
            )),
        }
    }
}

fn bit(byte: Option<u8>, n: u8) -> bool {
    byte.is_some_and(|b| b & (1 << n) != 0)
}

/// Signed 1/256 degC.
fn temperature(raw: &RawTelemetry, addr: RegisterAddr) -> Option<f64> {
    raw.u16_be(addr)
        .map(|v| f64::from(i16::from_be_bytes(v.to_be_bytes())) / 256.0)
}

/// Unsigned 100 uV.
fn vcc(raw: &RawTelemetry, addr: RegisterAddr) -> Option<f64> {
    raw.u16_be(addr).map(|v| f64::from(v) * 0.0001)
}

fn vendor_name(raw: &RawTelemetry, addr: RegisterAddr) -> Option<String> {
    let bytes = raw.bytes(addr, VENDOR_NAME_LEN)?;
    let name = String::from_utf8_lossy(&bytes)
        .trim_end_matches(|c: char| c == ' ' || c == '\0')
        .to_string();
    (!name.is_empty()).then_some(name)
}

fn decode_cmis(raw: &RawTelemetry) -> DecodedTelemetry {
    let module_flags = raw.byte(cmis::MODULE_FLAGS);
    let temp_vcc = raw.byte(cmis::TEMP_VCC_FLAGS);
    let tx_fault = raw.byte(cmis::TX_FAULT);
    let tx_los = raw.byte(cmis::TX_LOS);
    let tx_lol = raw.byte(cmis::TX_LOL);
    let rx_los = raw.byte(cmis::RX_LOS);
    let rx_lol = raw.byte(cmis::RX_LOL);

    let lanes = (0..cmis::LANES as u8)
        .map(|lane| MediaLaneSignals {
            lane,
            tx_los: bit(tx_los, lane),
            rx_los: bit(rx_los, lane),
            tx_lol: bit(tx_lol, lane),
            rx_lol: bit(rx_lol, lane),
            tx_fault: bit(tx_fault, lane),
        })
        .collect();

    DecodedTelemetry {
        temperature_c: temperature(raw, cmis::TEMPERATURE),
        vcc_v: vcc(raw, cmis::VCC),
        vendor: vendor_name(raw, cmis::VENDOR_NAME),
        flags: SignalFlags {
            temp_high_alarm: bit(temp_vcc, 0),
            temp_low_alarm: bit(temp_vcc, 1),
            vcc_high_alarm: bit(temp_vcc, 4),
            vcc_low_alarm: bit(temp_vcc, 5),
        },
        lanes,
        status: ModuleStatus {
            cmis_state_changed: bit(module_flags, 0),
            data_not_ready: false,
            interrupt: false,
            fw_fault: bit(module_flags, 1) || bit(module_flags, 2),
        },
    }
}

fn decode_sff8636(raw: &RawTelemetry) -> DecodedTelemetry {
    let status = raw.byte(sff8636::STATUS);
    let los = raw.byte(sff8636::LOS);
    let fault = raw.byte(sff8636::TX_FAULT);
    let lol = raw.byte(sff8636::LOL);
    let temp_flags = raw.byte(sff8636::TEMP_FLAGS);
    let vcc_flags = raw.byte(sff8636::VCC_FLAGS);

    let lanes = (0..sff8636::LANES as u8)
        .map(|lane| MediaLaneSignals {
            lane,
            rx_los: bit(los, lane),
            tx_los: bit(los, lane + 4),
            rx_lol: bit(lol, lane),
            tx_lol: bit(lol, lane + 4),
            tx_fault: bit(fault, lane),
        })
        .collect();

    DecodedTelemetry {
        temperature_c: temperature(raw, sff8636::TEMPERATURE),
        vcc_v: vcc(raw, sff8636::VCC),
        vendor: vendor_name(raw, sff8636::VENDOR_NAME),
        flags: SignalFlags {
            temp_high_alarm: bit(temp_flags, 7),
            temp_low_alarm: bit(temp_flags, 6),
            vcc_high_alarm: bit(vcc_flags, 7),
            vcc_low_alarm: bit(vcc_flags, 6),
        },
        lanes,
        status: ModuleStatus {
            cmis_state_changed: false,
            data_not_ready: bit(status, 0),
            // IntL is active low
            interrupt: status.is_some_and(|s| s & 0x02 == 0),
            fw_fault: false,
        },
    }
}

fn decode_sff8472(raw: &RawTelemetry) -> DecodedTelemetry {
    let status = raw.byte(sff8472::STATUS);
    let alarms = raw.byte(sff8472::ALARMS);

    DecodedTelemetry {
        temperature_c: temperature(raw, sff8472::TEMPERATURE),
        vcc_v: vcc(raw, sff8472::VCC),
        vendor: vendor_name(raw, sff8472::VENDOR_NAME),
        flags: SignalFlags {
            temp_high_alarm: bit(alarms, 7),
            temp_low_alarm: bit(alarms, 6),
            vcc_high_alarm: bit(alarms, 5),
            vcc_low_alarm: bit(alarms, 4),
        },
        lanes: vec![MediaLaneSignals {
            lane: 0,
            rx_los: bit(status, 1),
            tx_fault: bit(status, 2),
            ..Default::default()
        }],
        status: ModuleStatus {
            data_not_ready: bit(status, 0),
            ..Default::default()
        },
    }
}
