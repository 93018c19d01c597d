//! Interrupt handling
//!
//! One handler serves every port. Status words are read and cleared under
//! `irq_lock`; events are dispatched after the lock is dropped since the
//! write-back handler latches its own config-done.

use core::sync::atomic::Ordering;

use bitflags::bitflags;

use super::layout::IrqRegs;
use super::profile::MAX_VPS;
use super::regs::RegisterFile;
use super::Vop2;
use crate::util::{RateLimit, Vop2Error, Vop2Result, WaitKind};

bitflags! {
    /// Per video port interrupt sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VpIrq: u32 {
        const FS             = 1 << 0;
        const FS_NEW         = 1 << 1;
        const ADDR_SAME      = 1 << 2;
        const LINE_FLAG      = 1 << 3;
        const LINE_FLAG1     = 1 << 4;
        const POST_BUF_EMPTY = 1 << 5;
        /// Frame start of the active field.
        const FS_FIELD       = 1 << 6;
        const DSP_HOLD_VALID = 1 << 7;
    }
}

bitflags! {
    /// Bus and write-back interrupt sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysIrq: u32 {
        const BUS_ERROR         = 1 << 0;
        const WB_UV_FIFO_FULL   = 1 << 2;
        const WB_YRGB_FIFO_FULL = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

const VBLANK_TIMEOUT_US: u32 = 50_000;
const IRQ_POLL_STEP_US: u32 = 100;

static POST_BUF_EMPTY_RL: RateLimit = RateLimit::new(10, 100);
static BUS_ERROR_RL: RateLimit = RateLimit::new(10, 100);
static WB_FIFO_RL: RateLimit = RateLimit::new(10, 100);

/// Enable registers take the upper half as per-bit write enables.
pub(crate) fn irq_enable(regs: &RegisterFile, irq: &IrqRegs, bits: u32, on: bool) {
    let val = if on { bits } else { 0 };
    regs.write(irq.enable, bits << 16 | val);
}

pub(crate) fn irq_clear(regs: &RegisterFile, irq: &IrqRegs, bits: u32) {
    regs.write(irq.clear, bits << 16 | bits);
}

fn read_and_clear(regs: &RegisterFile, irq: &IrqRegs, mask: u32) -> u32 {
    let active = regs.read(irq.status) & mask;
    if active != 0 {
        irq_clear(regs, irq, active);
    }
    active
}

impl Vop2 {
    /// Top half. Returns [`IrqReturn::None`] when the controller is
    /// powered down or nothing was pending.
    pub fn handle_irq(&self) -> IrqReturn {
        if !self.platform.runtime_active() {
            return IrqReturn::None;
        }

        let nr_vps = self.profile.nr_vps().min(MAX_VPS);
        let mut vp_irqs = [0u32; MAX_VPS];
        let sys_irqs = {
            let _irq = self.irq_lock.lock();
            for (i, desc) in self.profile.ports.iter().take(nr_vps).enumerate() {
                vp_irqs[i] = read_and_clear(&self.regs, &desc.regs.irq, VpIrq::all().bits());
            }
            read_and_clear(&self.regs, &self.profile.sys.axi_irq, SysIrq::all().bits())
        };

        let mut ret = IrqReturn::None;
        for (port, &raw) in vp_irqs.iter().enumerate().take(nr_vps) {
            if raw != 0 {
                ret = IrqReturn::Handled;
            }
            self.dispatch_port_irq(port, VpIrq::from_bits_retain(raw));
        }

        let mut sys = SysIrq::from_bits_retain(sys_irqs);
        if !sys.is_empty() {
            ret = IrqReturn::Handled;
        }
        let wb_full = SysIrq::WB_UV_FIFO_FULL | SysIrq::WB_YRGB_FIFO_FULL;
        if sys.intersects(wb_full) {
            if WB_FIFO_RL.allow() {
                log::error!("vop2: wb fifo full: {:?}", sys & wb_full);
            }
            sys.remove(wb_full);
        }
        if sys.contains(SysIrq::BUS_ERROR) {
            if BUS_ERROR_RL.allow() {
                log::error!("vop2: BUS_ERROR irq err");
            }
            sys.remove(SysIrq::BUS_ERROR);
        }
        if !sys.is_empty() {
            log::error!("vop2: {}", Vop2Error::UnexpectedIrq(sys.bits()));
        }

        ret
    }

    fn dispatch_port_irq(&self, port: usize, mut active: VpIrq) {
        let sync = &self.ports[port];

        if active.contains(VpIrq::DSP_HOLD_VALID) {
            sync.dsp_hold.complete();
            active.remove(VpIrq::DSP_HOLD_VALID);
        }

        if active.contains(VpIrq::LINE_FLAG) {
            sync.line_flag.complete();
            active.remove(VpIrq::LINE_FLAG);
        }

        if active.contains(VpIrq::LINE_FLAG1) {
            sync.line_flag_events.fetch_add(1, Ordering::AcqRel);
            active.remove(VpIrq::LINE_FLAG1);
        }

        if self.profile.quirks.post_buf_empty_port == Some(port) && active.contains(VpIrq::POST_BUF_EMPTY) {
            sync.post_buf_empty.fetch_add(1, Ordering::AcqRel);
        }

        if active.contains(VpIrq::FS_FIELD) {
            self.wb_handler(port);
            // a frame shown with half a layer/mux switch is not reported
            let skip = sync.skip_vsync.load(Ordering::Acquire) && sync.layer_sel_update.load(Ordering::Acquire);
            if !skip {
                sync.vblank_count.fetch_add(1, Ordering::AcqRel);
                if sync.vblank_enabled.load(Ordering::Acquire) {
                    sync.vblank.complete();
                }
            }
            active.remove(VpIrq::FS_FIELD);
        }

        if active.contains(VpIrq::POST_BUF_EMPTY) {
            if POST_BUF_EMPTY_RL.allow() {
                log::error!("vop2: POST_BUF_EMPTY irq err at vp{}", port);
            }
            active.remove(VpIrq::POST_BUF_EMPTY);
        }

        // frame start variants are status only
        active.remove(VpIrq::FS | VpIrq::FS_NEW | VpIrq::ADDR_SAME);
        if !active.is_empty() {
            log::error!("vop2: unknown vp{} irqs: {:#x}", port, active.bits());
        }
    }

    fn port_irq(&self, port: usize) -> Vop2Result<&IrqRegs> {
        self.profile
            .ports
            .get(port)
            .map(|d| &d.regs.irq)
            .ok_or(Vop2Error::UnknownPort(port))
    }

    /// Enables frame start events on `port`.
    pub fn enable_vblank(&self, port: usize) -> Vop2Result<()> {
        let irq = self.port_irq(port)?;
        let _irq = self.irq_lock.lock();
        irq_clear(&self.regs, irq, VpIrq::FS_FIELD.bits());
        irq_enable(&self.regs, irq, VpIrq::FS_FIELD.bits(), true);
        self.ports[port].vblank_enabled.store(true, Ordering::Release);
        Ok(())
    }

    pub fn disable_vblank(&self, port: usize) -> Vop2Result<()> {
        let irq = self.port_irq(port)?;
        let _irq = self.irq_lock.lock();
        irq_enable(&self.regs, irq, VpIrq::FS_FIELD.bits(), false);
        self.ports[port].vblank_enabled.store(false, Ordering::Release);
        Ok(())
    }

    /// Frame start events counted on `port` so far.
    pub fn vblank_count(&self, port: usize) -> u32 {
        self.ports.get(port).map(|p| p.vblank_count.load(Ordering::Acquire)).unwrap_or(0)
    }

    /// Blocks until the next reported frame start on `port`.
    pub fn wait_vblank(&self, port: usize) -> Vop2Result<u32> {
        let sync = self.ports.get(port).ok_or(Vop2Error::UnknownPort(port))?;
        if !sync.vblank_enabled.load(Ordering::Acquire) {
            return Err(Vop2Error::PortDisabled(port));
        }
        sync.vblank.reinit();
        let mut delay = |us| self.platform.udelay(us);
        if !sync.vblank.wait_timeout(VBLANK_TIMEOUT_US, IRQ_POLL_STEP_US, &mut delay) {
            return Err(Vop2Error::TimingTimeout(WaitKind::Vblank));
        }
        Ok(sync.vblank_count.load(Ordering::Acquire))
    }

    /// Arms a scan line event on `line` of `port`, or turns it off.
    /// Every hit bumps [`Vop2::line_flag_events`].
    pub fn set_line_flag(&self, port: usize, line: Option<u32>) -> Vop2Result<()> {
        let irq = self.port_irq(port)?;
        let vp = &self.profile.ports[port].regs;
        {
            let _reg = self.reg_lock.lock();
            let _irq = self.irq_lock.lock();
            match line {
                Some(l) => {
                    self.regs.write_field(vp.line_flag_num1, l);
                    irq_clear(&self.regs, irq, VpIrq::LINE_FLAG1.bits());
                    irq_enable(&self.regs, irq, VpIrq::LINE_FLAG1.bits(), true);
                }
                None => irq_enable(&self.regs, irq, VpIrq::LINE_FLAG1.bits(), false),
            }
        }
        self.state.lock().ports[port].line_flag = line;
        Ok(())
    }

    pub fn line_flag_events(&self, port: usize) -> u32 {
        self.ports.get(port).map(|p| p.line_flag_events.load(Ordering::Acquire)).unwrap_or(0)
    }

    /// Waits until `port` scans past `line`. The event is armed only for
    /// the duration of the wait.
    pub fn wait_line_flag(&self, port: usize, line: u32, timeout_us: u32) -> Vop2Result<()> {
        let irq = self.port_irq(port)?;
        let vp = &self.profile.ports[port].regs;
        let sync = &self.ports[port];
        sync.line_flag.reinit();
        {
            let _irq = self.irq_lock.lock();
            self.regs.write_field(vp.line_flag_num0, line);
            irq_clear(&self.regs, irq, VpIrq::LINE_FLAG.bits());
            irq_enable(&self.regs, irq, VpIrq::LINE_FLAG.bits(), true);
        }

        let mut delay = |us| self.platform.udelay(us);
        let hit = sync.line_flag.wait_timeout(timeout_us, IRQ_POLL_STEP_US, &mut delay);

        let _irq = self.irq_lock.lock();
        irq_enable(&self.regs, irq, VpIrq::LINE_FLAG.bits(), false);
        if hit {
            Ok(())
        } else {
            log::error!("vop2: vp{} wait line flag {} timeout", port, line);
            Err(Vop2Error::TimingTimeout(WaitKind::LineFlag))
        }
    }

    /// Post-buffer-empty events on the port that counts them.
    pub fn post_buf_empty_count(&self, port: usize) -> u32 {
        self.ports.get(port).map(|p| p.post_buf_empty.load(Ordering::Acquire)).unwrap_or(0)
    }

    pub(crate) fn dsp_hold_irq(&self, port: usize, on: bool) {
        let irq = &self.profile.ports[port].regs.irq;
        let _irq = self.irq_lock.lock();
        if on {
            irq_clear(&self.regs, irq, VpIrq::DSP_HOLD_VALID.bits());
        }
        irq_enable(&self.regs, irq, VpIrq::DSP_HOLD_VALID.bits(), on);
    }

    /// Bus error and post-buffer-empty reporting, enabled with the port.
    pub(crate) fn debug_irq_enable(&self, port: usize) {
        let irq = &self.profile.ports[port].regs.irq;
        let _irq = self.irq_lock.lock();
        irq_clear(&self.regs, irq, VpIrq::POST_BUF_EMPTY.bits());
        irq_enable(&self.regs, irq, VpIrq::POST_BUF_EMPTY.bits(), true);
    }

    pub(crate) fn axi_irq_enable(&self) {
        let irq = &self.profile.sys.axi_irq;
        let _irq = self.irq_lock.lock();
        irq_clear(&self.regs, irq, SysIrq::BUS_ERROR.bits());
        irq_enable(&self.regs, irq, SysIrq::BUS_ERROR.bits(), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vop2::profile::HardwareProfile;
    use crate::drivers::vop2::testing::device;

    #[test]
    fn test_enable_uses_write_mask() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.enable_vblank(1).unwrap();
        let irq = vop.profile.ports[1].regs.irq;
        assert_eq!(fake.get(irq.enable), 1 << 22 | 1 << 6);
        vop.disable_vblank(1).unwrap();
        assert_eq!(fake.get(irq.enable), 1 << 22);
        assert_eq!(vop.enable_vblank(7), Err(Vop2Error::UnknownPort(7)));
    }

    #[test]
    fn test_powered_down_is_not_handled() {
        let (vop, fake, plat) = device(HardwareProfile::rk3588());
        plat.set_runtime_active(false);
        fake.set(vop.profile.ports[0].regs.irq.status, VpIrq::FS_FIELD.bits());
        assert_eq!(vop.handle_irq(), IrqReturn::None);
        assert_eq!(vop.vblank_count(0), 0);
    }

    #[test]
    fn test_fs_counts_vblank_and_clears() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.enable_vblank(0).unwrap();
        let irq = vop.profile.ports[0].regs.irq;
        fake.set(irq.status, VpIrq::FS_FIELD.bits());
        assert_eq!(vop.handle_irq(), IrqReturn::Handled);
        assert_eq!(vop.vblank_count(0), 1);
        assert_eq!(fake.get(irq.status), 0);
        assert_eq!(vop.handle_irq(), IrqReturn::None);
    }

    #[test]
    fn test_vblank_suppressed_during_layer_switch() {
        let (vop, fake, _) = device(HardwareProfile::rk3568());
        let irq = vop.profile.ports[0].regs.irq;
        vop.ports[0].skip_vsync.store(true, Ordering::Release);
        vop.ports[0].layer_sel_update.store(true, Ordering::Release);
        fake.set(irq.status, VpIrq::FS_FIELD.bits());
        vop.handle_irq();
        assert_eq!(vop.vblank_count(0), 0);

        vop.ports[0].layer_sel_update.store(false, Ordering::Release);
        fake.set(irq.status, VpIrq::FS_FIELD.bits());
        vop.handle_irq();
        assert_eq!(vop.vblank_count(0), 1);
    }

    #[test]
    fn test_line_flag_events_and_dsp_hold() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        vop.set_line_flag(2, Some(800)).unwrap();
        let vp = &vop.profile.ports[2].regs;
        assert_eq!(vop.regs.shadow_field(vp.line_flag_num1), 800);
        fake.set(vp.irq.status, (VpIrq::LINE_FLAG1 | VpIrq::DSP_HOLD_VALID).bits());
        vop.handle_irq();
        assert_eq!(vop.line_flag_events(2), 1);
        assert!(vop.ports[2].dsp_hold.try_wait());
    }

    #[test]
    fn test_post_buf_empty_counted_on_quirk_port() {
        let (vop, fake, _) = device(HardwareProfile::rk3528());
        fake.set(vop.profile.ports[1].regs.irq.status, VpIrq::POST_BUF_EMPTY.bits());
        fake.set(vop.profile.ports[0].regs.irq.status, VpIrq::POST_BUF_EMPTY.bits());
        vop.handle_irq();
        assert_eq!(vop.post_buf_empty_count(1), 1);
        assert_eq!(vop.post_buf_empty_count(0), 0);
    }

    #[test]
    fn test_wait_line_flag_times_out() {
        let (vop, _, plat) = device(HardwareProfile::rk3588());
        assert_eq!(
            vop.wait_line_flag(0, 100, 1_000),
            Err(Vop2Error::TimingTimeout(WaitKind::LineFlag))
        );
        assert_eq!(plat.slept_us(), 1_000);
    }

    #[test]
    fn test_sys_irqs_are_cleared() {
        let (vop, fake, _) = device(HardwareProfile::rk3588());
        let sys = vop.profile.sys.axi_irq;
        fake.set(sys.status, (SysIrq::BUS_ERROR | SysIrq::WB_YRGB_FIFO_FULL).bits());
        assert_eq!(vop.handle_irq(), IrqReturn::Handled);
        assert_eq!(fake.get(sys.status), 0);
    }
}
