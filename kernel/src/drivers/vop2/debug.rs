//! Register and frame dumps

use alloc::vec::Vec;
use core::ops::Range;

use super::Vop2;

#[cfg(feature = "dump")]
pub use self::hook::{DumpInfo, FrameDumpHook};

/// One register word as staged and as read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegDump {
    pub offset: u32,
    pub shadow: u32,
    pub hw: u32,
}

impl RegDump {
    /// Staged but not latched yet.
    pub fn pending(&self) -> bool {
        self.shadow != self.hw
    }
}

impl Vop2 {
    /// Word aligned dump of `range`, clipped to the register window.
    pub fn dump_regs(&self, range: Range<u32>) -> Vec<RegDump> {
        let end = range.end.min(self.regs.len() as u32);
        let start = range.start & !3;
        (start..end)
            .step_by(4)
            .map(|offset| RegDump { offset, shadow: self.regs.shadow(offset), hw: self.regs.read(offset) })
            .collect()
    }

    /// Logs every word of `range` that differs from zero.
    pub fn log_regs(&self, range: Range<u32>) {
        for r in self.dump_regs(range).iter().filter(|r| r.hw != 0 || r.shadow != 0) {
            log::info!(
                "vop2: {:#06x}: {:08x}{}",
                r.offset,
                r.hw,
                if r.pending() { " (staged)" } else { "" }
            );
        }
    }
}

#[cfg(feature = "dump")]
mod hook {
    use super::super::format::Fourcc;

    /// What a frame dumper needs to copy one plane out of memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DumpInfo {
        pub port: usize,
        pub window: &'static str,
        pub area_id: u8,
        pub afbc: bool,
        pub yuv: bool,
        pub format: Fourcc,
        pub yrgb_mst: u32,
        pub uv_mst: u32,
        pub offset: u32,
        pub pitch: u32,
        pub height: u32,
    }

    /// Called after each window update of a commit.
    pub trait FrameDumpHook: Send + Sync {
        fn plane_updated(&self, info: &DumpInfo);
    }
}

#[cfg(test)]
mod tests {
    use crate::drivers::vop2::layout::REG_CFG_DONE;
    use crate::drivers::vop2::profile::HardwareProfile;
    use crate::drivers::vop2::testing::device;

    #[test]
    fn test_dump_marks_staged_words() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.regs.write(0x10, 0xabcd);
        fake.set(0x10, 0);
        let dump = vop.dump_regs(REG_CFG_DONE..0x20);
        assert_eq!(dump.len(), 8);
        assert!(dump[4].pending());
        assert_eq!(dump[4].shadow, 0xabcd);
        assert!(!dump[0].pending());
    }

    #[test]
    fn test_dump_clips_to_window() {
        let (vop, _, _) = device(HardwareProfile::rk3588());
        let len = vop.regs.len() as u32;
        assert_eq!(vop.dump_regs(len - 8..len + 64).len(), 2);
    }
}
