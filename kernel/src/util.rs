//! Shared helpers for the display engine
//!
//! Error taxonomy, fixed-point/alignment math and a tiny log rate limiter
//! usable from interrupt context.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

use crate::drivers::vop2::format::Fourcc;

/// The bounded hardware wait that expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    CfgDone,            // port config-done bit clear
    PortMux,            // OVL_PORT_SEL readback
    LayerConfig,        // OVL_LAYER_SEL readback
    FrameStart,         // fs irq status clear
    AllWindowsDisabled,
    DspHold,
    GammaLut,
    HdrLutFetch,
    LineFlag,
    Vblank,
}

/// Coarse error classes used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Plane is rejected and treated as invisible; the commit goes on.
    Validation,
    /// Bounded poll expired; logged, execution proceeds.
    TimingTimeout,
    /// Hard failure propagated to the caller.
    ResourceExhaustion,
    /// Logged at error severity and otherwise ignored.
    HardwareInconsistency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Vop2Error {
    #[error("rotate 90 and rotate 270 requested at the same time")]
    RotationConflict,
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(Fourcc),
    #[error("afbc and tiled modifiers requested at the same time")]
    InvalidModifierCombination,
    #[error("source {width}x{height} exceeds max input {max_width}x{max_height}")]
    SourceTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
    #[error("source rectangle outside the framebuffer")]
    SourceOutsideFramebuffer,
    #[error("plane address does not fit the 32-bit dma window")]
    AddressOverflow,
    #[error("scale factor out of range")]
    ScaleOutOfRange,
    #[error("yuv source x offset {0} is odd")]
    OddYuvOffset(u32),
    #[error("{0} only accepts afbc buffers")]
    LinearClusterUnsupported(&'static str),
    #[error("invalid hdr vivid mode {0}")]
    InvalidVividMode(u32),
    #[error("hdr vivid mode {0} needs a pq or hlg plane")]
    HdrInputNotHdr(u32),
    #[error("lut of {len} entries, port takes {expected}")]
    LutSize { len: usize, expected: usize },
    #[error("timed out waiting for {0:?}")]
    TimingTimeout(WaitKind),
    #[error("no such window {0}")]
    UnknownWindow(usize),
    #[error("no such video port {0}")]
    UnknownPort(usize),
    #[error("write-back job ring is full")]
    WriteBackBusy,
    #[error("iommu attach failed")]
    IommuAttach,
    #[error("no dma buffer for lut upload")]
    DmaBufferMissing,
    #[error("unexpected interrupt status {0:#x}")]
    UnexpectedIrq(u32),
    #[error("video port {0} is not enabled")]
    PortDisabled(usize),
}

impl Vop2Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Vop2Error::RotationConflict
            | Vop2Error::UnsupportedFormat(_)
            | Vop2Error::InvalidModifierCombination
            | Vop2Error::SourceTooLarge { .. }
            | Vop2Error::SourceOutsideFramebuffer
            | Vop2Error::AddressOverflow
            | Vop2Error::ScaleOutOfRange
            | Vop2Error::OddYuvOffset(_)
            | Vop2Error::LinearClusterUnsupported(_)
            | Vop2Error::InvalidVividMode(_)
            | Vop2Error::HdrInputNotHdr(_)
            | Vop2Error::LutSize { .. } => ErrorKind::Validation,
            Vop2Error::TimingTimeout(_) => ErrorKind::TimingTimeout,
            Vop2Error::UnknownWindow(_)
            | Vop2Error::UnknownPort(_)
            | Vop2Error::WriteBackBusy
            | Vop2Error::IommuAttach
            | Vop2Error::DmaBufferMissing
            | Vop2Error::PortDisabled(_) => ErrorKind::ResourceExhaustion,
            Vop2Error::UnexpectedIrq(_) => ErrorKind::HardwareInconsistency,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

pub type Vop2Result<T> = core::result::Result<T, Vop2Error>;

// ============================================================================
// Integer helpers
// ============================================================================

/// Rounds `v` down to a multiple of `a` (`a == 0` leaves `v` untouched).
#[inline]
pub const fn align_down(v: u32, a: u32) -> u32 {
    if a == 0 { v } else { v - v % a }
}

#[inline]
pub const fn align_up(v: u32, a: u32) -> u32 {
    if a == 0 { v } else { align_down(v + a - 1, a) }
}

#[inline]
pub const fn div_round_up(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

#[inline]
pub const fn hweight(mask: u32) -> u32 {
    mask.count_ones()
}

/// Index of the lowest set bit, `None` for zero.
#[inline]
pub const fn ffs(mask: u32) -> Option<u32> {
    if mask == 0 { None } else { Some(mask.trailing_zeros()) }
}

/// Swaps the two 16 bit halves of a word.
#[inline]
pub const fn swahw32(v: u32) -> u32 {
    v.rotate_left(16)
}

/// Iterator over the set bit positions of `mask`, lowest first.
pub fn bits(mask: u32) -> impl Iterator<Item = usize> {
    (0..32usize).filter(move |b| mask & (1 << b) != 0)
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Lets `burst` messages through per `interval` events.
///
/// Counts events rather than time so it works from the interrupt path
/// without a clock source.
pub struct RateLimit {
    events: AtomicU32,
    burst: u32,
    interval: u32,
}

impl RateLimit {
    pub const fn new(burst: u32, interval: u32) -> Self {
        Self { events: AtomicU32::new(0), burst, interval }
    }

    /// Returns true when the caller should emit its message.
    pub fn allow(&self) -> bool {
        let n = self.events.fetch_add(1, Ordering::Relaxed);
        n % self.interval.max(1) < self.burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_down(13, 4), 12);
        assert_eq!(align_down(13, 1), 13);
        assert_eq!(align_down(13, 0), 13);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(div_round_up(7681, 4), 1921);
        assert_eq!(hweight(0b1011), 3);
        assert_eq!(ffs(0b1000), Some(3));
        assert_eq!(ffs(0), None);
        assert_eq!(swahw32(0x0437_077f), 0x077f_0437);
    }

    #[test]
    fn test_bits_iterates_low_to_high() {
        let v: alloc::vec::Vec<usize> = bits(0b1010_0001).collect();
        assert_eq!(v, alloc::vec![0, 5, 7]);
    }

    #[test]
    fn test_rate_limit_bursts() {
        let rl = RateLimit::new(2, 10);
        let allowed = (0..20).filter(|_| rl.allow()).count();
        assert_eq!(allowed, 4);
    }

    #[test]
    fn test_error_kinds() {
        assert!(Vop2Error::RotationConflict.is_validation());
        assert_eq!(
            Vop2Error::TimingTimeout(WaitKind::PortMux).kind(),
            ErrorKind::TimingTimeout
        );
        assert_eq!(Vop2Error::WriteBackBusy.kind(), ErrorKind::ResourceExhaustion);
    }
}
