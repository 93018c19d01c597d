//! Config-done protocol
//!
//! Staged register writes latch at a port's next frame start once its
//! config-done bit is set. Some generations have one latch word for all
//! ports whose bits can't be written independently: setting our bit also
//! rewrites the others, so a port that is about to latch must be waited
//! for, or its pending bit carried along.

use core::sync::atomic::Ordering;

use super::crtc::DisplayMode;
use super::irq::VpIrq;
use super::layer::{calc_port_mux, wait_port_mux, PortMux, Routing};
use super::layout::{CFG_DONE_PORT_MASK, GLB_CFG_DONE_EN, OVL, REG_CFG_DONE, REG_OVL_LAYER_SEL, WB_CFG_DONE};
use super::Vop2;
use crate::sync::poll_timeout;
use crate::util::{ffs, hweight, Vop2Error, Vop2Result, WaitKind};

pub const CFG_DONE_TIMEOUT_US: u32 = 50_000;
const IRQ_HANDLER_TIMEOUT_US: u32 = 10_000;
const VCNT_READ_RETRIES: usize = 10;
pub(crate) const POLL_STEP_US: u32 = 10;

impl Vop2 {
    /// Scan line counter of `port`. The counter is not latched, so two
    /// reads must agree before the value is trusted.
    pub fn read_vcnt(&self, port: usize) -> u32 {
        let Some(desc) = self.profile.ports.get(port) else {
            return 0;
        };
        let off = desc.regs.status;
        let (mut v0, mut v1) = (0, 0);
        for _ in 0..VCNT_READ_RETRIES {
            v0 = self.regs.read(off) >> 16;
            v1 = self.regs.read(off) >> 16;
            if v1.wrapping_sub(v0) <= 1 {
                return v1;
            }
        }
        log::error!("vop2: read vp{} vcnt error: {} {}", port, v0, v1);
        self.regs.read(off) >> 16
    }

    /// Waits for the hardware to consume `port`'s config-done bit, which
    /// happens at its frame start.
    pub(crate) fn wait_fs_by_done_bit(&self, port: usize) -> Vop2Result<()> {
        let bit = 1 << port;
        let mut delay = |us| self.platform.udelay(us);
        let latched = poll_timeout(CFG_DONE_TIMEOUT_US, POLL_STEP_US, &mut delay, || {
            self.regs.read(REG_CFG_DONE) & bit == 0
        });
        if latched {
            return Ok(());
        }
        log::error!(
            "vop2: wait vp{} done bit status timeout, vcnt: {}",
            port,
            self.read_vcnt(port)
        );
        Err(Vop2Error::TimingTimeout(WaitKind::CfgDone))
    }

    fn timing(&self, port: usize) -> Option<DisplayMode> {
        self.ports.get(port).and_then(|p| *p.timing.lock())
    }

    /// Remaining time of the current frame, `None` for a port without timing.
    fn time_left_us(&self, port: usize) -> Option<(u64, u64)> {
        let mode = self.timing(port)?;
        let mut vcnt = self.read_vcnt(port);
        if mode.is_interlaced() {
            vcnt >>= 1;
        }
        let vrefresh = match mode.vrefresh() {
            0 => {
                log::warn!("vop2: vp{} vrefresh is 0, assume 60", port);
                60
            }
            v => v,
        };
        // last 1/8 of the frame is too close to the latch point
        let safe = (1_000_000 / vrefresh as u64) >> 3;
        Some((mode.line_to_time_us(mode.vtotal.saturating_sub(vcnt)), safe))
    }

    /// Other ports' pending config-done bits to carry in `port`'s write.
    ///
    /// A port within the last eighth of its frame is waited for instead,
    /// so its latch can't race our write. Returns 0 straight away when no
    /// other port has a bit pending.
    pub fn pending_done_bits(&self, port: usize) -> u32 {
        let done_bits = self.regs.read(REG_CFG_DONE) & CFG_DONE_PORT_MASK;
        let own = 1u32 << port;
        let others = done_bits & !own;
        if others == 0 {
            return 0;
        }

        if hweight(others) == 1 {
            let Some(other) = ffs(others).map(|b| b as usize) else {
                return 0;
            };
            let Some(mode) = self.timing(other) else {
                return others;
            };
            let mut vcnt = self.read_vcnt(other);
            if mode.is_interlaced() {
                vcnt >>= 1;
            }
            if vcnt > (mode.vtotal * 7) >> 3 {
                let _ = self.wait_fs_by_done_bit(other);
                return 0;
            }
            return others;
        }

        let (Some(first), Some(second)) = (
            ffs(others).map(|b| b as usize),
            ffs(others & (others - 1)).map(|b| b as usize),
        ) else {
            return others;
        };
        let (Some((first_left, first_safe)), Some((second_left, second_safe))) =
            (self.time_left_us(first), self.time_left_us(second))
        else {
            return done_bits;
        };
        if first_left > first_safe && second_left > second_safe {
            return done_bits;
        }

        // wait for the port that latches first, unless the other one is
        // also close enough that a single wait covers both
        let wait_vp = if first_left > second_left {
            if first_left - second_left > first_safe { second } else { first }
        } else if second_left - first_left > second_safe {
            first
        } else {
            second
        };
        let _ = self.wait_fs_by_done_bit(wait_vp);
        self.regs.read(REG_CFG_DONE) & CFG_DONE_PORT_MASK
    }

    /// Sets `port`'s config-done bit.
    pub(crate) fn cfg_done(&self, port: usize) {
        if !self.profile.quirks.shared_cfg_done {
            self.regs
                .write(REG_CFG_DONE, GLB_CFG_DONE_EN | 1 << port | 1 << (port + 16));
            return;
        }

        let mut val = GLB_CFG_DONE_EN | 1 << port | self.pending_done_bits(port);
        let old_layer_sel = self.regs.read(REG_OVL_LAYER_SEL);
        let cfg_layer_sel = self.regs.shadow(REG_OVL_LAYER_SEL);
        val |= self.regs.read(REG_CFG_DONE) & CFG_DONE_PORT_MASK;
        self.regs.write(REG_CFG_DONE, val);

        // a new layer select latches with this port only
        if old_layer_sel != cfg_layer_sel {
            self.ports[port].layer_sel_update.store(true, Ordering::Release);
            let _ = self.wait_fs_by_done_bit(port);
            log::debug!(
                "vop2: vp{} layer sel {:#x} -> {:#x}",
                port,
                old_layer_sel,
                cfg_layer_sel
            );
        }
    }

    /// Latches the write-back registers. Runs from the ISR as well.
    pub(crate) fn wb_cfg_done(&self, port: usize) {
        let val = WB_CFG_DONE | WB_CFG_DONE << 16 | GLB_CFG_DONE_EN;
        if self.profile.quirks.shared_cfg_done {
            let _irq = self.irq_lock.lock();
            let val = val | self.pending_done_bits(port);
            self.regs.write(REG_CFG_DONE, val);
        } else {
            self.regs.write(REG_CFG_DONE, val);
        }
    }

    /// Reprograms the port mux for the current window masks. A change
    /// suppresses `port`'s next vblank event, the frame is shown with a
    /// half-applied overlay. Caller holds `reg_lock`.
    pub(crate) fn setup_port_mux(&self, routing: &mut Routing, port: usize) -> PortMux {
        self.reg_lock.assert_held();
        let mux = calc_port_mux(&self.profile, &routing.win_mask);
        if mux.cfg == routing.port_mux_cfg {
            return mux;
        }

        self.regs.write_field(OVL.port_mux, mux.cfg);
        self.ports[port].skip_vsync.store(true, Ordering::Release);
        self.cfg_done(port);
        routing.port_mux_cfg = mux.cfg;
        let mut delay = |us| self.platform.udelay(us);
        let _ = wait_port_mux(&self.regs, mux.cfg, &mut delay);
        mux
    }

    /// Lets a frame start that raced the config-done write reach the ISR
    /// before the commit returns.
    pub(crate) fn wait_for_irq_handler(&self, port: usize) {
        let status = self.profile.ports[port].regs.irq.status;
        let fs = VpIrq::FS_FIELD.bits();
        let mut delay = |us| self.platform.udelay(us);
        if !poll_timeout(IRQ_HANDLER_TIMEOUT_US, 1, &mut delay, || self.regs.read(status) & fs == 0) {
            log::error!("vop2: vp{} fs irq not handled in {} us", port, IRQ_HANDLER_TIMEOUT_US);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vop2::layout::REG_OVL_PORT_SEL;
    use crate::drivers::vop2::profile::HardwareProfile;
    use crate::drivers::vop2::testing::{device, mode_1080p};

    fn with_timing(vop: &Vop2, port: usize) {
        *vop.ports[port].timing.lock() = Some(mode_1080p());
    }

    #[test]
    fn test_no_pending_bits_is_immediate() {
        let (vop, fake, plat) = device(HardwareProfile::rk3568());
        fake.set(REG_CFG_DONE, 1 << 1);
        assert_eq!(vop.pending_done_bits(1), 0);
        fake.set(REG_CFG_DONE, 0);
        assert_eq!(vop.pending_done_bits(0), 0);
        assert_eq!(plat.slept_us(), 0);
    }

    #[test]
    fn test_other_port_early_in_frame_is_carried() {
        let (vop, fake, plat) = device(HardwareProfile::rk3568());
        with_timing(&vop, 0);
        fake.set(REG_CFG_DONE, 1 << 0);
        fake.set(vop.profile.ports[0].regs.status, 100 << 16);
        assert_eq!(vop.pending_done_bits(1), 1 << 0);
        assert_eq!(plat.slept_us(), 0);
    }

    #[test]
    fn test_other_port_near_latch_is_waited_for() {
        let (vop, fake, plat) = device(HardwareProfile::rk3568());
        with_timing(&vop, 0);
        plat.latch_on_delay(true);
        fake.set(REG_CFG_DONE, 1 << 0 | 1 << 1);
        fake.set(vop.profile.ports[0].regs.status, 1100 << 16);
        assert_eq!(vop.pending_done_bits(1), 0);
        assert!(plat.slept_us() > 0);
    }

    #[test]
    fn test_two_ports_both_safe() {
        let (vop, fake, plat) = device(HardwareProfile::rk3588());
        with_timing(&vop, 1);
        with_timing(&vop, 2);
        fake.set(REG_CFG_DONE, 0b110);
        assert_eq!(vop.pending_done_bits(0), 0b110);
        assert_eq!(plat.slept_us(), 0);
    }

    #[test]
    fn test_two_ports_one_close_waits_then_rereads() {
        let (vop, fake, plat) = device(HardwareProfile::rk3588());
        with_timing(&vop, 1);
        with_timing(&vop, 2);
        plat.latch_on_delay(true);
        fake.set(REG_CFG_DONE, 0b110);
        fake.set(vop.profile.ports[2].regs.status, 1120 << 16);
        assert_eq!(vop.pending_done_bits(0), 0);
        assert!(plat.slept_us() > 0);
    }

    #[test]
    fn test_independent_cfg_done_uses_write_mask() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.cfg_done(2);
        assert_eq!(fake.get(REG_CFG_DONE), GLB_CFG_DONE_EN | 1 << 2 | 1 << 18);
    }

    #[test]
    fn test_shared_cfg_done_keeps_other_bits() {
        let (vop, fake, _) = device(HardwareProfile::rk3568());
        with_timing(&vop, 0);
        fake.set(REG_CFG_DONE, 1 << 0);
        vop.cfg_done(1);
        assert_eq!(fake.get(REG_CFG_DONE), GLB_CFG_DONE_EN | 0b11);
    }

    #[test]
    fn test_shared_cfg_done_flags_layer_sel_update() {
        let (vop, fake, plat) = device(HardwareProfile::rk3568());
        plat.latch_on_delay(true);
        vop.regs.write(REG_OVL_LAYER_SEL, 0x1234);
        fake.set(REG_OVL_LAYER_SEL, 0x4321);
        vop.cfg_done(0);
        assert!(vop.ports[0].layer_sel_update.load(Ordering::Acquire));
        assert!(!vop.ports[1].layer_sel_update.load(Ordering::Acquire));
    }

    #[test]
    fn test_vcnt_retries_until_stable() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        let status = vop.profile.ports[0].regs.status;
        fake.script_reads(status, &[10 << 16, 20 << 16, 30 << 16, 31 << 16]);
        assert_eq!(vop.read_vcnt(0), 31);
    }

    #[test]
    fn test_port_mux_change_skips_vsync() {
        let (vop, fake, _) = device(HardwareProfile::rk3568());
        let mut routing = Routing::initial(&vop.profile, &vop.regs);
        let before = routing.port_mux_cfg;
        let _reg = vop.reg_lock.lock();
        assert_eq!(vop.setup_port_mux(&mut routing, 0).cfg, before);
        assert!(!vop.ports[0].skip_vsync.load(Ordering::Acquire));

        routing.claim(1, 2);
        let mux = vop.setup_port_mux(&mut routing, 1);
        assert_ne!(mux.cfg, before);
        assert_eq!(routing.port_mux_cfg, mux.cfg);
        assert!(vop.ports[1].skip_vsync.load(Ordering::Acquire));
        assert_eq!(fake.get(REG_OVL_PORT_SEL) & 0xffff, mux.cfg);
    }
}
