//! Gamma and 3D color lookup tables

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::layout::REG_GAMMA_LUT_BASE;
use super::profile::PortFeature;
use super::{DmaBuffer, PortState, Vop2};
use crate::sync::poll_timeout;
use crate::util::{Vop2Error, Vop2Result, WaitKind};

const GAMMA_DRAIN_TIMEOUT_US: u32 = 33_333;
const GAMMA_DRAIN_STEP_US: u32 = 5;

/// One 16 bit per channel table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorLutEntry {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl ColorLutEntry {
    pub const fn new(red: u16, green: u16, blue: u16) -> Self {
        Self { red, green, blue }
    }
}

/// Gamma RAM word: each channel quantized to `len` steps, packed as
/// `b * len^2 + g * len + r`.
pub fn gamma_word(len: u32, e: ColorLutEntry) -> u32 {
    let q = |c: u16| c as u32 * (len - 1) / 0xffff;
    q(e.blue) * len * len + q(e.green) * len + q(e.red)
}

pub fn gamma_entry(len: u32, word: u32) -> ColorLutEntry {
    let mask = len - 1;
    let e = |v: u32| (v * 0xffff / mask) as u16;
    ColorLutEntry {
        red: e(word & mask),
        green: e((word / len) & mask),
        blue: e((word / len / len) & mask),
    }
}

/// Packs a 3D LUT into the layout the LUT DMA fetches: two entries of
/// 12 bit channels per four words.
pub fn pack_cubic_lut(lut: &[ColorLutEntry]) -> Vec<u32> {
    let mut words = Vec::with_capacity(lut.len().div_ceil(2) * 4);
    let r = |e: &ColorLutEntry| e.red as u32;
    let g = |e: &ColorLutEntry| e.green as u32;
    let b = |e: &ColorLutEntry| e.blue as u32;

    let mut pairs = lut.chunks_exact(2);
    for pair in &mut pairs {
        let (a, n) = (&pair[0], &pair[1]);
        words.push((r(a) & 0xfff) + ((g(a) & 0xfff) << 12) + ((b(a) & 0xff) << 24));
        words.push(((b(a) & 0xf00) >> 8) + ((r(n) & 0xfff) << 4) + ((g(n) & 0xfff) << 16) + ((b(n) & 0xf) << 28));
        words.push((b(n) & 0xff0) >> 4);
        words.push(0);
    }
    if let [a] = pairs.remainder() {
        words.push((r(a) & 0xfff) + ((g(a) & 0xfff) << 12) + ((b(a) & 0xff) << 24));
        words.push((b(a) & 0xf00) >> 8);
        words.push(0);
        words.push(0);
    }
    words
}

impl Vop2 {
    /// Replaces the first `lut.len()` gamma entries of `port`. A running
    /// port reloads the table right away, otherwise it loads on enable.
    pub fn set_gamma_lut(&self, port: usize, lut: &[ColorLutEntry]) -> Vop2Result<()> {
        let desc = self.profile.ports.get(port).ok_or(Vop2Error::UnknownPort(port))?;
        let len = desc.gamma_lut_len;
        if !desc.feature.contains(PortFeature::GAMMA) || len < 2 || lut.len() > len as usize {
            log::error!(
                "vop2: gamma size[{}] out of video port{} gamma lut len[{}]",
                lut.len(),
                port,
                len
            );
            return Err(Vop2Error::LutSize { len: lut.len(), expected: len as usize });
        }

        let mut st = self.state.lock();
        let ps = &mut st.ports[port];
        ps.gamma_lut.resize(len as usize, 0);
        for (w, e) in ps.gamma_lut.iter_mut().zip(lut) {
            *w = gamma_word(len, *e);
        }
        if ps.crtc.is_none() {
            return Ok(());
        }
        self.load_gamma_lut(port, ps);
        Ok(())
    }

    /// Gamma table of `port` as last set.
    pub fn gamma_lut(&self, port: usize) -> Vec<ColorLutEntry> {
        let Some(desc) = self.profile.ports.get(port) else {
            return Vec::new();
        };
        let st = self.state.lock();
        st.ports[port]
            .gamma_lut
            .iter()
            .map(|&w| gamma_entry(desc.gamma_lut_len, w))
            .collect()
    }

    /// Uploads `ps.gamma_lut` into the gamma RAM. Generations that can't
    /// load a live table turn it off and wait for it to drain first.
    pub(crate) fn load_gamma_lut(&self, port: usize, ps: &mut PortState) {
        let vp = &self.profile.ports[port].regs;

        if self.profile.quirks.gamma_disable_before_load {
            {
                let _reg = self.reg_lock.lock();
                self.regs.write_bool(vp.dsp_lut_en, false);
                self.cfg_done(port);
            }
            let mut delay = |us| self.platform.udelay(us);
            let drained = poll_timeout(GAMMA_DRAIN_TIMEOUT_US, GAMMA_DRAIN_STEP_US, &mut delay, || {
                self.regs.read_field(vp.dsp_lut_en) == 0
            });
            if !drained {
                log::warn!("vop2: vp{} {}", port, Vop2Error::TimingTimeout(WaitKind::GammaLut));
            }

            let _reg = self.reg_lock.lock();
            self.write_gamma_words(port, &ps.gamma_lut);
            self.regs.write_bool(vp.dsp_lut_en, true);
            self.regs.write_bool(vp.gamma_update_en, true);
            self.cfg_done(port);
            ps.gamma_active = true;
        } else {
            {
                let _reg = self.reg_lock.lock();
                self.write_gamma_words(port, &ps.gamma_lut);
                self.regs.write_bool(vp.dsp_lut_en, true);
                self.regs.write_bool(vp.gamma_update_en, true);
                ps.gamma_active = true;
            }
            self.cfg_done(port);
        }

        // the next commit must not latch together with the table
        if self.regs.read_field(vp.standby) == 0 {
            let _ = self.wait_fs_by_done_bit(port);
        }
    }

    fn write_gamma_words(&self, port: usize, words: &[u32]) {
        self.regs.write_field(self.profile.sys.gamma_port_sel, port as u32);
        for (i, &w) in words.iter().enumerate() {
            self.regs.write(REG_GAMMA_LUT_BASE + i as u32 * 4, w);
        }
    }

    /// Stages a 3D LUT for `port` into `buf`. The table takes effect with
    /// the port's next commit.
    pub fn set_cubic_lut(&self, port: usize, lut: &[ColorLutEntry], buf: Box<dyn DmaBuffer>) -> Vop2Result<()> {
        let desc = self.profile.ports.get(port).ok_or(Vop2Error::UnknownPort(port))?;
        let expected = desc.cubic_lut_len as usize;
        if !desc.feature.contains(PortFeature::CUBIC_LUT) || expected == 0 {
            log::error!("vop2: video port{} unsupported 3D lut", port);
            return Err(Vop2Error::LutSize { len: lut.len(), expected: 0 });
        }
        if lut.len() != expected {
            return Err(Vop2Error::LutSize { len: lut.len(), expected });
        }

        let words = pack_cubic_lut(lut);
        buf.write_words(0, &words);

        let mut st = self.state.lock();
        let ps = &mut st.ports[port];
        ps.cubic_buffer = Some(buf);
        ps.cubic_dirty = true;
        Ok(())
    }

    /// Commit step: points the LUT DMA at a new table or stops the
    /// update of the current one. Caller holds `reg_lock`.
    pub(crate) fn commit_cubic_lut(&self, port: usize, ps: &mut PortState) {
        self.reg_lock.assert_held();
        let vp = &self.profile.ports[port].regs;
        match ps.cubic_buffer.as_deref() {
            Some(buf) if ps.cubic_dirty => {
                self.regs.write(vp.cubic_lut_mst, buf.dma_addr());
                self.regs.write_bool(vp.cubic_lut_update_en, true);
                self.regs.write_bool(vp.cubic_lut_en, true);
                self.regs.write_bool(self.profile.sys.lut_dma_en, true);
                ps.cubic_dirty = false;
            }
            Some(_) => self.regs.write_bool(vp.cubic_lut_update_en, false),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vop2::crtc::{CrtcState, OutputIf};
    use crate::drivers::vop2::format::{BusFormat, OutputMode};
    use crate::drivers::vop2::profile::HardwareProfile;
    use crate::drivers::vop2::testing::{device, mode_1080p, FakeDma};

    fn ramp(n: usize) -> Vec<ColorLutEntry> {
        (0..n)
            .map(|i| {
                let v = (i * 0xffff / (n - 1)) as u16;
                ColorLutEntry::new(v, v, v)
            })
            .collect()
    }

    #[test]
    fn test_gamma_word_packing() {
        assert_eq!(gamma_word(1024, ColorLutEntry::new(0xffff, 0, 0)), 1023);
        assert_eq!(gamma_word(1024, ColorLutEntry::new(0, 0xffff, 0)), 1023 * 1024);
        assert_eq!(gamma_word(256, ColorLutEntry::new(0, 0, 0xffff)), 255 * 256 * 256);
        let e = ColorLutEntry::new(0xffff, 0, 0xffff);
        assert_eq!(gamma_entry(1024, gamma_word(1024, e)), e);
    }

    #[test]
    fn test_cubic_packing_with_odd_tail() {
        let lut = [
            ColorLutEntry::new(0x123, 0x456, 0x789),
            ColorLutEntry::new(0xabc, 0xdef, 0x321),
            ColorLutEntry::new(0x111, 0x222, 0x333),
        ];
        let w = pack_cubic_lut(&lut);
        assert_eq!(w.len(), 8);
        assert_eq!(w[0], 0x123 | 0x456 << 12 | 0x89 << 24);
        assert_eq!(w[1], 0x7 | 0xabc << 4 | 0xdef << 16 | 0x1 << 28);
        assert_eq!(w[2], 0x32);
        assert_eq!(w[3], 0);
        assert_eq!(w[4], 0x111 | 0x222 << 12 | 0x33 << 24);
        assert_eq!(w[5], 0x3);
        assert_eq!(&w[6..], &[0, 0]);
    }

    #[test]
    fn test_gamma_rejects_oversized_table() {
        let (vop, _, _) = device(HardwareProfile::rk3568());
        assert_eq!(
            vop.set_gamma_lut(2, &ramp(300)),
            Err(Vop2Error::LutSize { len: 300, expected: 256 })
        );
    }

    #[test]
    fn test_gamma_stored_until_enable() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.set_gamma_lut(0, &ramp(1024)).unwrap();
        assert_eq!(fake.get(REG_GAMMA_LUT_BASE + 4), 0);
        assert_eq!(vop.gamma_lut(0).len(), 1024);
    }

    #[test]
    fn test_gamma_drain_before_load() {
        let (vop, fake, plat) = device(HardwareProfile::rk3568());
        plat.latch_on_delay(true);
        vop.enable(1, CrtcState::new(mode_1080p(), OutputIf::HDMI0, BusFormat::Rgb888_1x24, OutputMode::Aaaa))
            .unwrap();
        fake.clear_writes();
        vop.set_gamma_lut(1, &ramp(1024)).unwrap();

        let vp = &vop.profile.ports[1].regs;
        assert_eq!(vop.regs.read_field(vop.profile.sys.gamma_port_sel), 1);
        assert_eq!(fake.get(REG_GAMMA_LUT_BASE + 1023 * 4), gamma_word(1024, ramp(1024)[1023]));
        assert_eq!(vop.regs.shadow_field(vp.dsp_lut_en), 1);
        assert_eq!(vop.regs.shadow_field(vp.gamma_update_en), 1);
        let writes = fake.writes();
        let lut_en_off = writes
            .iter()
            .position(|&(off, v)| off == vp.dsp_lut_en.offset && v & (1 << 28) == 0)
            .unwrap();
        let first_word = writes.iter().position(|&(off, _)| off == REG_GAMMA_LUT_BASE).unwrap();
        assert!(lut_en_off < first_word);
        assert!(vop.state.lock().ports[1].gamma_active);
    }

    #[test]
    fn test_cubic_lut_applies_on_commit() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.enable(2, CrtcState::new(mode_1080p(), OutputIf::HDMI1, BusFormat::Rgb888_1x24, OutputMode::Aaaa))
            .unwrap();
        let dma = FakeDma::new(0x5000_0000, 256);
        assert_eq!(
            vop.set_cubic_lut(2, &ramp(10), Box::new(dma.clone())),
            Err(Vop2Error::LutSize { len: 10, expected: 125 })
        );
        assert!(vop.set_cubic_lut(3, &ramp(125), Box::new(dma.clone())).is_err());

        vop.set_cubic_lut(2, &ramp(125), Box::new(dma.clone())).unwrap();
        let vp = &vop.profile.ports[2].regs;
        assert_eq!(fake.get(vp.cubic_lut_mst), 0);

        let plan = vop.begin_commit(2).unwrap();
        vop.commit(2, plan).unwrap();
        assert_eq!(fake.get(vp.cubic_lut_mst), 0x5000_0000);
        assert_eq!(vop.regs.shadow_field(vp.cubic_lut_update_en), 1);
        assert_eq!(vop.regs.shadow_field(vop.profile.sys.lut_dma_en), 1);
        assert_eq!(dma.word(0), pack_cubic_lut(&ramp(125))[0]);

        let plan = vop.begin_commit(2).unwrap();
        vop.commit(2, plan).unwrap();
        assert_eq!(vop.regs.shadow_field(vp.cubic_lut_update_en), 0);
        assert_eq!(vop.regs.shadow_field(vp.cubic_lut_en), 1);
    }
}
