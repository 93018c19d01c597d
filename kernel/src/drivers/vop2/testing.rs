//! In-process fakes for the register window, the platform and DMA memory.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::crtc::{DisplayMode, ModeFlags};
use super::format::{Fourcc, Modifier};
use super::layout::{CFG_DONE_PORT_MASK, REG_CFG_DONE, WB_CFG_DONE};
use super::plane::{check_plane, Framebuffer, PlaneRequest, WindowPlaneState};
use super::profile::{HardwareProfile, MAX_VPS};
use super::regs::RegisterIo;
use super::{DmaBuffer, Platform, Vop2};
use crate::util::{Vop2Error, Vop2Result};

#[derive(Default)]
struct RegsInner {
    words: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    scripted: BTreeMap<u32, VecDeque<u32>>,
    /// Write-one-to-clear pairs: clear register to status register.
    clears: BTreeMap<u32, u32>,
}

/// Map backed register window that records every write in order.
#[derive(Clone, Default)]
pub struct FakeRegs(Arc<Mutex<RegsInner>>);

impl FakeRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, off: u32) -> u32 {
        self.0.lock().words.get(&off).copied().unwrap_or(0)
    }

    /// Sets what the hardware reports, bypassing the write log.
    pub fn set(&self, off: u32, v: u32) {
        self.0.lock().words.insert(off, v);
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.0.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.0.lock().writes.clear();
    }

    /// Reads of `off` return `values` in order before falling back to the
    /// stored word.
    pub fn script_reads(&self, off: u32, values: &[u32]) {
        self.0.lock().scripted.entry(off).or_default().extend(values.iter().copied());
    }

    /// Writes to `clear` drop the written low half bits from `status`.
    pub fn link_clear(&self, clear: u32, status: u32) {
        self.0.lock().clears.insert(clear, status);
    }
}

impl RegisterIo for FakeRegs {
    fn read32(&self, offset: u32) -> u32 {
        let mut inner = self.0.lock();
        if let Some(v) = inner.scripted.get_mut(&offset).and_then(|q| q.pop_front()) {
            return v;
        }
        inner.words.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut inner = self.0.lock();
        inner.writes.push((offset, value));
        inner.words.insert(offset, value);
        if let Some(&status) = inner.clears.get(&offset) {
            let cur = inner.words.get(&status).copied().unwrap_or(0);
            inner.words.insert(status, cur & !(value & 0xffff));
        }
    }
}

struct PlatformInner {
    slept_us: u64,
    latch_on_delay: bool,
    runtime_active: bool,
    dclk: [u64; MAX_VPS],
    iommu_enabled: bool,
    iommu_fail: bool,
    iommu_attached: u32,
}

/// Counts delays instead of sleeping. With `latch_on_delay` every delay
/// behaves like a frame start: pending config-done bits clear.
#[derive(Clone)]
pub struct FakePlatform {
    regs: FakeRegs,
    inner: Arc<Mutex<PlatformInner>>,
}

impl FakePlatform {
    pub fn new(regs: FakeRegs) -> Self {
        Self {
            regs,
            inner: Arc::new(Mutex::new(PlatformInner {
                slept_us: 0,
                latch_on_delay: false,
                runtime_active: true,
                dclk: [0; MAX_VPS],
                iommu_enabled: false,
                iommu_fail: false,
                iommu_attached: 0,
            })),
        }
    }

    pub fn slept_us(&self) -> u64 {
        self.inner.lock().slept_us
    }

    pub fn latch_on_delay(&self, on: bool) {
        self.inner.lock().latch_on_delay = on;
    }

    pub fn set_runtime_active(&self, on: bool) {
        self.inner.lock().runtime_active = on;
    }

    pub fn set_iommu(&self, enabled: bool, fail: bool) {
        let mut inner = self.inner.lock();
        inner.iommu_enabled = enabled;
        inner.iommu_fail = fail;
    }

    pub fn iommu_attached(&self) -> u32 {
        self.inner.lock().iommu_attached
    }
}

impl Platform for FakePlatform {
    fn udelay(&self, us: u32) {
        let latch = {
            let mut inner = self.inner.lock();
            inner.slept_us += us as u64;
            inner.latch_on_delay
        };
        if latch {
            let v = self.regs.get(REG_CFG_DONE);
            self.regs.set(REG_CFG_DONE, v & !(CFG_DONE_PORT_MASK | WB_CFG_DONE));
        }
    }

    fn set_dclk_rate(&self, port: usize, rate: u64) {
        if let Some(d) = self.inner.lock().dclk.get_mut(port) {
            *d = rate;
        }
    }

    fn dclk_rate(&self, port: usize) -> u64 {
        self.inner.lock().dclk.get(port).copied().unwrap_or(0)
    }

    fn runtime_active(&self) -> bool {
        self.inner.lock().runtime_active
    }

    fn iommu_enabled(&self) -> bool {
        self.inner.lock().iommu_enabled
    }

    fn iommu_attach(&self) -> Vop2Result<()> {
        let mut inner = self.inner.lock();
        if inner.iommu_fail {
            return Err(Vop2Error::IommuAttach);
        }
        inner.iommu_attached += 1;
        Ok(())
    }

    fn iommu_detach(&self) {
        let mut inner = self.inner.lock();
        inner.iommu_attached = inner.iommu_attached.saturating_sub(1);
    }
}

/// DMA memory visible to the test.
#[derive(Clone)]
pub struct FakeDma {
    addr: u32,
    words: Arc<Mutex<Vec<u32>>>,
}

impl FakeDma {
    pub fn new(addr: u32, len: usize) -> Self {
        Self { addr, words: Arc::new(Mutex::new(vec![0; len])) }
    }

    pub fn word(&self, i: usize) -> u32 {
        self.words.lock().get(i).copied().unwrap_or(0)
    }
}

impl DmaBuffer for FakeDma {
    fn dma_addr(&self) -> u32 {
        self.addr
    }

    fn write_words(&self, offset: usize, words: &[u32]) {
        let mut mem = self.words.lock();
        if mem.len() < offset + words.len() {
            mem.resize(offset + words.len(), 0);
        }
        mem[offset..offset + words.len()].copy_from_slice(words);
    }
}

pub fn mode_1080p() -> DisplayMode {
    DisplayMode {
        clock: 148_500,
        hdisplay: 1920,
        hsync_start: 2008,
        hsync_end: 2052,
        htotal: 2200,
        vdisplay: 1080,
        vsync_start: 1084,
        vsync_end: 1089,
        vtotal: 1125,
        flags: ModeFlags::empty(),
    }
}

pub fn xrgb_fb(w: u32, h: u32) -> Framebuffer {
    Framebuffer {
        format: Fourcc::Xrgb8888,
        modifier: Modifier::LINEAR,
        width: w,
        height: h,
        pitches: [w * 4, 0],
        offsets: [0, 0],
        dma_addr: [0x1000_0000, 0],
    }
}

pub fn nv12_10_afbc_fb(w: u32, h: u32) -> Framebuffer {
    Framebuffer {
        format: Fourcc::Nv12_10,
        modifier: Modifier::afbc(false),
        width: w,
        height: h,
        pitches: [w * 10 / 8; 2],
        offsets: [0, 0],
        dma_addr: [0x2000_0000; 2],
    }
}

/// `req` validated against the first cluster of an rk3588 at 1080p.
pub fn plane_state(req: &PlaneRequest) -> WindowPlaneState {
    let profile = HardwareProfile::rk3588();
    check_plane(&profile, &profile.windows[0], req, &mode_1080p()).unwrap()
}

/// Device over fake registers with write-one-to-clear interrupt status.
pub fn device(profile: HardwareProfile) -> (Vop2, FakeRegs, FakePlatform) {
    let fake = FakeRegs::new();
    for p in &profile.ports {
        fake.link_clear(p.regs.irq.clear, p.regs.irq.status);
    }
    fake.link_clear(profile.sys.axi_irq.clear, profile.sys.axi_irq.status);
    let plat = FakePlatform::new(fake.clone());
    let vop = Vop2::new(profile, Box::new(fake.clone()), Box::new(plat.clone()));
    (vop, fake, plat)
}
