//! In-memory transceiver bus.
//!
//! Backs the daemon's `--simulate` mode and the tests. Each slot holds a
//! register image per page plus fault switches: failing I/O, a stalled
//! module that never answers, and a whole-bus health flag.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::bus::TransceiverBus;
use crate::decoder::{cmis, sff8472, sff8636};
use crate::error::BusError;
use crate::types::{RegisterAddr, TransceiverId};

const PAGE_SIZE: usize = 256;

/// Register image and fault switches of one simulated module.
#[derive(Debug, Clone)]
pub struct SimModule {
    present: bool,
    pages: BTreeMap<u8, Vec<u8>>,
    fail_io: bool,
    stalled: bool,
    resets: u32,
}

impl SimModule {
    /// A present module whose page 00h holds only `identifier`.
    pub fn with_identifier(identifier: u8) -> Self {
        let mut module = Self {
            present: true,
            pages: BTreeMap::new(),
            fail_io: false,
            stalled: false,
            resets: 0,
        };
        module.write(RegisterAddr::lower(0), &[identifier]);
        module
    }

    /// QSFP-DD module, 30 degC, 3.3 V.
    pub fn cmis(vendor: &str) -> Self {
        let mut m = Self::with_identifier(0x18);
        m.write(cmis::TEMPERATURE, &(30u16 * 256).to_be_bytes());
        m.write(cmis::VCC, &33_000u16.to_be_bytes());
        m.write(cmis::VENDOR_NAME, &vendor_field(vendor));
        m.ensure_page(cmis::LANE_FLAGS_PAGE);
        m.ensure_page(0x10);
        m.seal(0x00, 128, 94, 222);
        m
    }

    /// QSFP28 module, 30 degC, 3.3 V.
    pub fn sff8636(vendor: &str) -> Self {
        let mut m = Self::with_identifier(0x11);
        // IntL deasserted
        m.write(sff8636::STATUS, &[0x02]);
        m.write(sff8636::TEMPERATURE, &(30u16 * 256).to_be_bytes());
        m.write(sff8636::VCC, &33_000u16.to_be_bytes());
        m.write(sff8636::VENDOR_NAME, &vendor_field(vendor));
        m.seal(0x00, 128, 63, 191);
        m.seal(0x00, 192, 31, 223);
        m
    }

    /// SFP+ module, 30 degC, 3.3 V.
    pub fn sff8472(vendor: &str) -> Self {
        let mut m = Self::with_identifier(0x03);
        m.write(sff8472::VENDOR_NAME, &vendor_field(vendor));
        m.write(sff8472::TEMPERATURE, &(30u16 * 256).to_be_bytes());
        m.write(sff8472::VCC, &33_000u16.to_be_bytes());
        m.seal(0x00, 0, 63, 63);
        m.seal(0x00, 64, 31, 95);
        m
    }

    fn ensure_page(&mut self, page: u8) -> &mut Vec<u8> {
        self.pages.entry(page).or_insert_with(|| vec![0; PAGE_SIZE])
    }

    fn write(&mut self, addr: RegisterAddr, data: &[u8]) {
        let start = usize::from(addr.offset);
        let page = self.ensure_page(addr.page);
        let end = (start + data.len()).min(PAGE_SIZE);
        page[start..end].copy_from_slice(&data[..end - start]);
    }

    /// Stores the checksum of `len` bytes from `start` at `check`.
    fn seal(&mut self, page: u8, start: usize, len: usize, check: usize) {
        let image = self.ensure_page(page);
        image[check] = image[start..start + len]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
    }

    fn read(&self, id: TransceiverId, addr: RegisterAddr, len: usize) -> Result<Vec<u8>, BusError> {
        let page = self
            .pages
            .get(&addr.page)
            .ok_or_else(|| BusError::io(id, format!("page {:#04x} not implemented", addr.page)))?;
        let start = usize::from(addr.offset);
        start
            .checked_add(len)
            .and_then(|end| page.get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BusError::io(id, format!("read past end of page at {addr}")))
    }
}

fn vendor_field(vendor: &str) -> Vec<u8> {
    let mut field = vendor.as_bytes().to_vec();
    field.resize(16, b' ');
    field
}

#[derive(Debug)]
struct SimState {
    healthy: bool,
    modules: BTreeMap<TransceiverId, SimModule>,
}

/// What a bus call should do once the state lock is released.
enum Access<T> {
    Ready(Result<T, BusError>),
    Stall,
}

/// In-memory [`TransceiverBus`].
#[derive(Debug)]
pub struct SimulatedBus {
    state: Mutex<SimState>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Creates a healthy bus with every slot empty.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                healthy: true,
                modules: BTreeMap::new(),
            }),
        }
    }

    pub fn with_module(self, id: TransceiverId, module: SimModule) -> Self {
        self.insert(id, module);
        self
    }

    /// Plugs a module into a slot, replacing any previous one.
    pub fn insert(&self, id: TransceiverId, module: SimModule) {
        self.state.lock().modules.insert(id, module);
    }

    /// Unplugs the module from a slot.
    pub fn remove(&self, id: TransceiverId) {
        self.state.lock().modules.remove(&id);
    }

    pub fn set_present(&self, id: TransceiverId, present: bool) {
        if let Some(m) = self.state.lock().modules.get_mut(&id) {
            m.present = present;
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Makes every transaction on a module fail.
    pub fn set_fail_io(&self, id: TransceiverId, fail: bool) {
        if let Some(m) = self.state.lock().modules.get_mut(&id) {
            m.fail_io = fail;
        }
    }

    /// Makes every transaction on a module hang forever.
    pub fn set_stalled(&self, id: TransceiverId, stalled: bool) {
        if let Some(m) = self.state.lock().modules.get_mut(&id) {
            m.stalled = stalled;
        }
    }

    /// Number of hard resets a slot has received.
    pub fn reset_count(&self, id: TransceiverId) -> u32 {
        self.state
            .lock()
            .modules
            .get(&id)
            .map(|m| m.resets)
            .unwrap_or(0)
    }

    /// Writes register bytes directly, bypassing fault switches.
    pub fn poke(&self, id: TransceiverId, addr: RegisterAddr, data: &[u8]) {
        if let Some(m) = self.state.lock().modules.get_mut(&id) {
            m.write(addr, data);
        }
    }

    /// Reads register bytes directly, bypassing fault switches.
    pub fn peek(&self, id: TransceiverId, addr: RegisterAddr, len: usize) -> Option<Vec<u8>> {
        self.state.lock().modules.get(&id)?.read(id, addr, len).ok()
    }

    fn access<T>(
        &self,
        id: TransceiverId,
        require_present: bool,
        op: impl FnOnce(&mut SimModule) -> Result<T, BusError>,
    ) -> Access<T> {
        let mut state = self.state.lock();
        let Some(module) = state.modules.get_mut(&id) else {
            return Access::Ready(Err(BusError::NotPresent(id)));
        };
        if module.stalled {
            return Access::Stall;
        }
        if module.fail_io {
            return Access::Ready(Err(BusError::io(id, "simulated transaction failure")));
        }
        if require_present && !module.present {
            return Access::Ready(Err(BusError::NotPresent(id)));
        }
        Access::Ready(op(module))
    }

    async fn complete<T>(access: Access<T>) -> Result<T, BusError> {
        match access {
            Access::Ready(result) => result,
            Access::Stall => std::future::pending().await,
        }
    }
}

#[async_trait]
impl TransceiverBus for SimulatedBus {
    async fn detect_presence(&self, id: TransceiverId) -> Result<bool, BusError> {
        let access = match self.access(id, false, |m| Ok(m.present)) {
            Access::Ready(Err(BusError::NotPresent(_))) => Access::Ready(Ok(false)),
            other => other,
        };
        Self::complete(access).await
    }

    async fn read_register(
        &self,
        id: TransceiverId,
        addr: RegisterAddr,
        len: usize,
    ) -> Result<Vec<u8>, BusError> {
        let access = self.access(id, true, |m| m.read(id, addr, len));
        Self::complete(access).await
    }

    async fn write_register(
        &self,
        id: TransceiverId,
        addr: RegisterAddr,
        data: &[u8],
    ) -> Result<(), BusError> {
        let access = self.access(id, true, |m| {
            m.write(addr, data);
            Ok(())
        });
        Self::complete(access).await
    }

    async fn verify_bus_healthy(&self) -> Result<bool, BusError> {
        Ok(self.state.lock().healthy)
    }

    async fn hard_reset(&self, id: TransceiverId) -> Result<(), BusError> {
        let access = self.access(id, true, |m| {
            m.resets += 1;
            Ok(())
        });
        debug!(id = %id, "Simulated hard reset");
        Self::complete(access).await
    }
}
