//! Register access layer
//!
//! All programming goes through [`RegisterFile`], which mirrors every
//! plain write into a shadow cache. Read-modify-write of bitfields uses
//! the shadow, never the hardware, because most VOP registers are double
//! buffered and read back the *active* value until the next config-done.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

/// 32 bit register window of one controller instance.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
}

/// Volatile MMIO backend.
pub struct MmioRegisters {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// # Safety
    ///
    /// `base` must map `len` bytes of the VOP register space for the whole
    /// lifetime of the returned value, with device memory attributes.
    pub const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline(always)]
    fn reg_ptr(&self, offset: u32) -> Option<*mut u32> {
        let off = offset as usize;
        if off + 4 > self.len || off % 4 != 0 {
            return None;
        }
        // SAFETY: bounds and alignment checked above; mapping guaranteed by `new`.
        Some(unsafe { self.base.as_ptr().add(off) as *mut u32 })
    }
}

impl RegisterIo for MmioRegisters {
    fn read32(&self, offset: u32) -> u32 {
        match self.reg_ptr(offset) {
            Some(p) => unsafe { core::ptr::read_volatile(p) },
            None => {
                log::error!("vop2: read outside register window: {:#x}", offset);
                0
            }
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        match self.reg_ptr(offset) {
            Some(p) => unsafe { core::ptr::write_volatile(p, value) },
            None => log::error!("vop2: write outside register window: {:#x}", offset),
        }
    }
}

/// Location of a register bitfield.
///
/// A zero mask marks a field the hardware generation does not have;
/// writes to it are silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VopReg {
    pub offset: u32,
    pub mask: u32,
    pub shift: u8,
    /// Upper 16 bits of the register act as per-bit write enables.
    pub write_mask: bool,
}

impl VopReg {
    pub const NONE: VopReg = VopReg { offset: 0, mask: 0, shift: 0, write_mask: false };

    pub const fn new(offset: u32, mask: u32, shift: u8) -> Self {
        Self { offset, mask, shift, write_mask: false }
    }

    pub const fn wmsk(offset: u32, mask: u32, shift: u8) -> Self {
        Self { offset, mask, shift, write_mask: true }
    }

    /// Whole 32 bit register.
    pub const fn word(offset: u32) -> Self {
        Self::new(offset, 0xffff_ffff, 0)
    }

    #[inline]
    pub const fn exists(&self) -> bool {
        self.mask != 0
    }

    /// Same field moved by `delta` bytes.
    pub const fn at(self, delta: u32) -> Self {
        if self.mask == 0 {
            return self;
        }
        Self { offset: self.offset + delta, ..self }
    }

    /// Value as it lands in the register, without the surrounding bits.
    #[inline]
    pub const fn place(&self, v: u32) -> u32 {
        (v & self.mask) << self.shift
    }
}

/// Hardware registers plus their shadow copy.
pub struct RegisterFile {
    io: Box<dyn RegisterIo>,
    shadow: Box<[AtomicU32]>,
}

impl RegisterFile {
    pub fn new(io: Box<dyn RegisterIo>, len: usize) -> Self {
        let shadow: Vec<AtomicU32> = (0..len / 4).map(|_| AtomicU32::new(0)).collect();
        Self { io, shadow: shadow.into_boxed_slice() }
    }

    pub fn len(&self) -> usize {
        self.shadow.len() * 4
    }

    fn slot(&self, offset: u32) -> Option<&AtomicU32> {
        self.shadow.get(offset as usize / 4)
    }

    /// Raw hardware read.
    #[inline]
    pub fn read(&self, offset: u32) -> u32 {
        self.io.read32(offset)
    }

    /// Last value software wrote (or seeded) at `offset`.
    #[inline]
    pub fn shadow(&self, offset: u32) -> u32 {
        self.slot(offset).map(|s| s.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Full word write, mirrored into the shadow.
    pub fn write(&self, offset: u32, v: u32) {
        if let Some(s) = self.slot(offset) {
            s.store(v, Ordering::Relaxed);
        }
        self.io.write32(offset, v);
    }

    pub fn write_field(&self, reg: VopReg, v: u32) {
        if !reg.exists() {
            return;
        }

        if reg.write_mask {
            // hardware merges using the enable bits, shadow is left alone
            let val = reg.place(v) | (reg.mask << (reg.shift + 16));
            self.io.write32(reg.offset, val);
        } else {
            let cached = self.shadow(reg.offset);
            let val = (cached & !(reg.mask << reg.shift)) | reg.place(v);
            self.write(reg.offset, val);
        }
    }

    pub fn write_bool(&self, reg: VopReg, on: bool) {
        self.write_field(reg, on as u32);
    }

    /// Field value as currently latched by hardware.
    pub fn read_field(&self, reg: VopReg) -> u32 {
        if !reg.exists() {
            return 0;
        }
        (self.read(reg.offset) >> reg.shift) & reg.mask
    }

    /// Field value as staged by software.
    pub fn shadow_field(&self, reg: VopReg) -> u32 {
        if !reg.exists() {
            return 0;
        }
        (self.shadow(reg.offset) >> reg.shift) & reg.mask
    }

    /// Reloads the whole shadow from hardware, done once on first enable.
    pub fn sync_shadow(&self) {
        for (i, s) in self.shadow.iter().enumerate() {
            s.store(self.io.read32((i * 4) as u32), Ordering::Relaxed);
        }
    }
}
