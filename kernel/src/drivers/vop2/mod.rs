//! Rockchip VOP2/VOP3 display controller
//!
//! Up to four video ports each scan out a stack of windows blended by a
//! mixer chain and drive one or more output interfaces. Register writes
//! are staged and latch at the port's next frame start once its
//! config-done bit is set.
//!
//! A port is brought up with [`Vop2::enable`]. Each frame, planes are
//! staged with [`Vop2::set_plane`], then [`Vop2::begin_commit`] routes and
//! blends them and [`Vop2::commit`] programs and latches them.
//! [`Vop2::handle_irq`] is the interrupt entry point.
//!
//! Lock order: `state`, `reg_lock`, `irq_lock`, then a port's `timing`.

pub mod alpha;
pub mod bandwidth;
pub mod commit;
pub mod crtc;
pub mod csc;
pub mod debug;
pub mod format;
pub mod hdr;
pub mod irq;
pub mod layer;
pub mod layout;
pub mod lut;
pub mod plane;
pub mod profile;
pub mod regs;
pub mod scale;
pub mod wb;

#[cfg(test)]
pub(crate) mod testing;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use self::alpha::{clear_stage, cluster_alpha, plan_mixer_alpha, AlphaLayer, HdrMix, MixerAlpha, MixerOptions};
use self::bandwidth::{port_bandwidth, BandwidthReport};
use self::commit::POLL_STEP_US;
use self::crtc::{cfg_update, mode_changed, post_config, program_timing, route_outputs, CrtcState, DisplayMode};
use self::csc::{setup_csc_mode, CscInput, Eotf};
use self::hdr::{
    setup_dly_for_vp, setup_dly_for_windows, setup_dynamic_hdr, setup_hdr10, vop3_pipe_dly, HdrOutcome, PlaneHdr,
    PortHdr, VividHdrConfig,
};
use self::layer::{sort_zorder, vop3_layer_sel, write_layer_sel, Routing, ZposEntry};
use self::layout::{OvlRegs, HDR, OVL, REG_OVL_LAYER_SEL, REG_WINDOW_LEN, WB};
use self::plane::{
    check_plane, disable_window_regs, program_window, PlaneRequest, ProgramContext, ProgrammedWindow,
    WindowPlaneState,
};
use self::profile::{HardwareProfile, PortDesc, PortFeature, WinFeature};
use self::regs::{RegisterFile, RegisterIo};
use self::wb::{WbRing, WbState};
use crate::sync::{poll_timeout, Completion, TicketSpinlock};
use crate::util::{hweight, ErrorKind, Vop2Error, Vop2Result};

#[cfg(feature = "dump")]
use self::debug::{DumpInfo, FrameDumpHook};

const DSP_HOLD_TIMEOUT_US: u32 = 50_000;
const DSP_HOLD_STEP_US: u32 = 100;
const WIN_DISABLE_TIMEOUT_US: u32 = 500_000;

/// Clock, power and IOMMU services of the SoC around the controller.
pub trait Platform: Send + Sync {
    fn udelay(&self, us: u32);
    fn set_dclk_rate(&self, port: usize, rate: u64);
    fn dclk_rate(&self, port: usize) -> u64;
    /// The controller is powered and its registers may be touched.
    fn runtime_active(&self) -> bool;
    fn iommu_enabled(&self) -> bool;
    fn iommu_attach(&self) -> Vop2Result<()>;
    fn iommu_detach(&self);
}

/// Memory the controller fetches tables from.
pub trait DmaBuffer: Send + Sync {
    fn dma_addr(&self) -> u32;
    /// Copies `words` in at word index `offset`.
    fn write_words(&self, offset: usize, words: &[u32]);
}

/// Per port state shared with the interrupt handler.
pub(crate) struct PortSync {
    pub(crate) dsp_hold: Completion,
    pub(crate) line_flag: Completion,
    pub(crate) vblank: Completion,
    pub(crate) vblank_enabled: AtomicBool,
    /// Next vblank follows a port mux change.
    pub(crate) skip_vsync: AtomicBool,
    /// A layer select change is latching with this port.
    pub(crate) layer_sel_update: AtomicBool,
    pub(crate) vblank_count: AtomicU32,
    pub(crate) line_flag_events: AtomicU32,
    pub(crate) post_buf_empty: AtomicU32,
    pub(crate) timing: TicketSpinlock<Option<DisplayMode>>,
}

impl PortSync {
    const fn new() -> Self {
        Self {
            dsp_hold: Completion::new(),
            line_flag: Completion::new(),
            vblank: Completion::new(),
            vblank_enabled: AtomicBool::new(false),
            skip_vsync: AtomicBool::new(false),
            layer_sel_update: AtomicBool::new(false),
            vblank_count: AtomicU32::new(0),
            line_flag_events: AtomicU32::new(0),
            post_buf_empty: AtomicU32::new(0),
            timing: TicketSpinlock::new("timing", None),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WindowState {
    /// Port the staged plane targets.
    pub(crate) port: Option<usize>,
    pub(crate) plane: Option<WindowPlaneState>,
    pub(crate) hdr: PlaneHdr,
    /// Port whose commit last turned the window on.
    pub(crate) enabled_on: Option<usize>,
}

pub(crate) struct PortState {
    pub(crate) crtc: Option<CrtcState>,
    pub(crate) hdr: PortHdr,
    pub(crate) vivid: Option<Box<VividHdrConfig>>,
    pub(crate) lut_buffer: Option<Box<dyn DmaBuffer>>,
    pub(crate) bg_ovl_dly: u32,
    pub(crate) gamma_lut: Vec<u32>,
    pub(crate) gamma_active: bool,
    pub(crate) cubic_buffer: Option<Box<dyn DmaBuffer>>,
    pub(crate) cubic_dirty: bool,
    pub(crate) line_flag: Option<u32>,
    pub(crate) layer_sel: u32,
    pub(crate) bandwidth: BandwidthReport,
}

impl PortState {
    fn new() -> Self {
        Self {
            crtc: None,
            hdr: PortHdr::default(),
            vivid: None,
            lut_buffer: None,
            bg_ovl_dly: 0,
            gamma_lut: Vec::new(),
            gamma_active: false,
            cubic_buffer: None,
            cubic_dirty: false,
            line_flag: None,
            layer_sel: 0,
            bandwidth: BandwidthReport::default(),
        }
    }
}

pub(crate) struct DeviceState {
    pub(crate) enable_count: u32,
    pub(crate) active_ports: u32,
    pub(crate) routing: Routing,
    pub(crate) ports: Vec<PortState>,
    pub(crate) windows: Vec<WindowState>,
    pub(crate) iommu_attached: bool,
    pub(crate) wb_staged: Option<WbState>,
}

impl DeviceState {
    fn new(profile: &HardwareProfile) -> Self {
        Self {
            enable_count: 0,
            active_ports: 0,
            routing: Routing::new(),
            ports: (0..profile.nr_vps()).map(|_| PortState::new()).collect(),
            windows: alloc::vec![WindowState::default(); profile.windows.len()],
            iommu_attached: false,
            wb_staged: None,
        }
    }

    /// Visible plane staged on window `idx` for `port`.
    fn active_plane(&self, idx: usize, port: usize) -> Option<&WindowPlaneState> {
        let w = self.windows.get(idx)?;
        if w.port != Some(port) {
            return None;
        }
        w.plane.as_ref().filter(|p| p.active().is_some())
    }
}

/// Layer assignment of one port, produced by [`Vop2::begin_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    pub port: usize,
    /// Bottom first.
    pub stack: Vec<ZposEntry>,
    pub layer_sel: u32,
    pub port_mux: u32,
}

pub struct Vop2 {
    pub(crate) profile: HardwareProfile,
    pub(crate) regs: RegisterFile,
    pub(crate) platform: Box<dyn Platform>,
    /// Serialises staged register writes against config-done.
    pub(crate) reg_lock: TicketSpinlock<()>,
    /// Interrupt enable/clear words, shared with the ISR.
    pub(crate) irq_lock: TicketSpinlock<()>,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) ports: Vec<PortSync>,
    pub(crate) wb: TicketSpinlock<WbRing>,
    pub(crate) wb_done: Completion,
    #[cfg(feature = "dump")]
    dump_hook: Option<Box<dyn FrameDumpHook>>,
}

impl Vop2 {
    /// Wraps the register window `io`. Nothing is written until the first
    /// port is enabled.
    pub fn new(profile: HardwareProfile, io: Box<dyn RegisterIo>, platform: Box<dyn Platform>) -> Self {
        let state = DeviceState::new(&profile);
        let ports = (0..profile.nr_vps()).map(|_| PortSync::new()).collect();
        Self {
            regs: RegisterFile::new(io, REG_WINDOW_LEN),
            platform,
            reg_lock: TicketSpinlock::new("reg_lock", ()),
            irq_lock: TicketSpinlock::new("irq_lock", ()),
            state: Mutex::new(state),
            ports,
            wb: TicketSpinlock::new("wb", WbRing::default()),
            wb_done: Completion::new(),
            #[cfg(feature = "dump")]
            dump_hook: None,
            profile,
        }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    #[cfg(feature = "dump")]
    pub fn set_dump_hook(&mut self, hook: Box<dyn FrameDumpHook>) {
        self.dump_hook = Some(hook);
    }

    /// Window ownership and layer bookkeeping as of the last commit.
    pub fn routing(&self) -> Routing {
        self.state.lock().routing.clone()
    }

    pub fn bandwidth(&self, port: usize) -> Option<BandwidthReport> {
        self.state.lock().ports.get(port).map(|p| p.bandwidth)
    }

    fn window_index(&self, win: usize) -> Vop2Result<usize> {
        if win < self.profile.windows.len() {
            Ok(win)
        } else {
            Err(Vop2Error::UnknownWindow(win))
        }
    }

    fn port_desc(&self, port: usize) -> Vop2Result<&PortDesc> {
        self.profile.ports.get(port).ok_or(Vop2Error::UnknownPort(port))
    }

    /// Checks `req` for window `win` on `port` without staging it.
    pub fn validate(&self, port: usize, win: usize, req: &PlaneRequest) -> Vop2Result<WindowPlaneState> {
        let st = self.state.lock();
        self.validate_locked(&st, port, win, req)
    }

    fn validate_locked(
        &self,
        st: &DeviceState,
        port: usize,
        win: usize,
        req: &PlaneRequest,
    ) -> Vop2Result<WindowPlaneState> {
        let idx = self.window_index(win)?;
        self.port_desc(port)?;
        let crtc = st.ports[port].crtc.ok_or(Vop2Error::PortDisabled(port))?;
        let desc = &self.profile.windows[idx];
        check_plane(&self.profile, desc, req, &crtc.mode).map_err(|e| {
            log::debug!("vop2: {} rejected on vp{}: {}", desc.name, port, e);
            e
        })
    }

    /// Stages `req` on window `win` for the next commit of `port`. A
    /// rejected request leaves the window off.
    pub fn set_plane(&self, port: usize, win: usize, req: &PlaneRequest) -> Vop2Result<()> {
        let mut st = self.state.lock();
        let result = self.validate_locked(&st, port, win, req);
        let w = &mut st.windows[self.window_index(win)?];
        match result {
            Ok(plane) => {
                w.port = Some(port);
                w.plane = Some(plane);
                Ok(())
            }
            Err(e) => {
                w.plane = None;
                Err(e)
            }
        }
    }

    /// Drops the staged plane of `win` and turns the window off now.
    pub fn disable_plane(&self, win: usize) -> Vop2Result<()> {
        let idx = self.window_index(win)?;
        let mut st = self.state.lock();
        let w = &mut st.windows[idx];
        w.plane = None;
        if w.enabled_on.take().is_some() {
            let _reg = self.reg_lock.lock();
            disable_window_regs(&self.regs, &self.profile, idx);
        }
        Ok(())
    }

    /// Programs one window straight away, outside the commit sequence.
    /// An invisible `plane` turns the window off and yields `None`.
    pub fn program(
        &self,
        port: usize,
        win: usize,
        plane: &WindowPlaneState,
    ) -> Vop2Result<Option<ProgrammedWindow>> {
        let idx = self.window_index(win)?;
        self.port_desc(port)?;
        let mut st = self.state.lock();
        let crtc = st.ports[port].crtc.ok_or(Vop2Error::PortDisabled(port))?;
        let _reg = self.reg_lock.lock();
        let out = self.program_locked(&st, port, idx, plane, &crtc);
        if out.is_some() {
            st.windows[idx].enabled_on = Some(port);
        } else {
            disable_window_regs(&self.regs, &self.profile, idx);
            st.windows[idx].enabled_on = None;
        }
        Ok(out)
    }

    /// Caller holds `reg_lock`.
    fn program_locked(
        &self,
        st: &DeviceState,
        port: usize,
        idx: usize,
        plane: &WindowPlaneState,
        crtc: &CrtcState,
    ) -> Option<ProgrammedWindow> {
        self.reg_lock.assert_held();
        let fb = plane.active()?;
        let desc = &self.profile.windows[idx];
        let hdr = st.windows[idx].hdr;
        let csc = setup_csc_mode(&CscInput {
            input_yuv: plane.is_yuv(),
            output_yuv: crtc.yuv_overlay,
            input_cs: plane.color_space,
            output_cs: crtc.color_space,
            y2r_13bit: desc.feature.contains(WinFeature::Y2R_13BIT_DEPTH),
            vop3: self.profile.is_vop3(),
            hdr_in: hdr.hdr_in,
            hdr2sdr: hdr.hdr2sdr,
            sdr2hdr: st.ports[port].hdr.sdr2hdr_en,
        });
        let ctx = ProgramContext {
            profile: &self.profile,
            port,
            mode: &crtc.mode,
            csc,
            yuv_clip: crtc.yuv_clip(),
        };
        let out = program_window(&self.regs, &ctx, desc, plane, fb);
        #[cfg(feature = "dump")]
        if let Some(hook) = &self.dump_hook {
            hook.plane_updated(&DumpInfo {
                port,
                window: desc.name,
                area_id: desc.area_id,
                afbc: plane.afbc,
                yuv: plane.is_yuv(),
                format: fb.format,
                yrgb_mst: plane.yrgb_mst,
                uv_mst: plane.uv_mst,
                offset: plane.offset,
                pitch: fb.pitches[0],
                height: fb.height,
            });
        }
        Some(out)
    }

    /// Vivid HDR metadata for `port`'s next commits. `None` turns the
    /// engine off.
    pub fn set_vivid_hdr(&self, port: usize, cfg: Option<VividHdrConfig>) -> Vop2Result<()> {
        self.port_desc(port)?;
        self.state.lock().ports[port].vivid = cfg.map(Box::new);
        Ok(())
    }

    /// Memory the vivid engine loads its curves from.
    pub fn set_lut_buffer(&self, port: usize, buf: Box<dyn DmaBuffer>) -> Vop2Result<()> {
        self.port_desc(port)?;
        self.state.lock().ports[port].lut_buffer = Some(buf);
        Ok(())
    }

    /// Replaces the output properties of a running port. A new mode goes
    /// through a full [`Vop2::enable`].
    pub fn update_port(&self, port: usize, crtc: CrtcState) -> Vop2Result<()> {
        self.port_desc(port)?;
        let cur = self.state.lock().ports[port].crtc.ok_or(Vop2Error::PortDisabled(port))?;
        if cur.mode != crtc.mode || cur.output_if != crtc.output_if {
            return self.enable(port, crtc);
        }
        let mut st = self.state.lock();
        let yuv_overlay = cur.yuv_overlay;
        st.ports[port].crtc = Some(CrtcState { yuv_overlay, ..crtc });
        Ok(())
    }

    /// One-time setup when the first port comes up.
    fn initial(&self, st: &mut DeviceState, port: usize) {
        self.regs.sync_shadow();

        self.regs.write_field(WB.axi_yrgb_id, 0xd);
        self.regs.write_field(WB.axi_uv_id, 0xe);
        self.wb_cfg_done(port);

        let sys = &self.profile.sys;
        if self.profile.is_vop3() {
            self.regs.write_bool(sys.dsp_vs_t_sel, false);
        }
        // rk3528 resets with a value vp1 can't display with
        self.regs.write_field(sys.init_clear, 0);

        self.regs.write_bool(sys.cfg_done_en, true);
        // auto gating shifts the image when a window turns on
        self.regs.write_bool(sys.auto_gating_en, false);
        self.regs.write_bool(sys.aclk_pre_auto_gating_en, false);
        self.regs.write_bool(OVL.ovl_port_mux_cfg_done_imd, true);
        self.regs.write_bool(sys.if_ctrl_cfg_done_imd, true);

        st.routing = Routing::initial(&self.profile, &self.regs);
        self.axi_irq_enable();
    }

    /// Starts scanout of `crtc` on `port`, or reprograms its timing.
    pub fn enable(&self, port: usize, crtc: CrtcState) -> Vop2Result<()> {
        let desc = self.port_desc(port)?;
        let mut guard = self.state.lock();
        let st = &mut *guard;

        if st.enable_count == 0 {
            self.initial(st, port);
        }
        if st.ports[port].crtc.is_none() {
            st.enable_count += 1;
        }
        self.debug_irq_enable(port);

        if mode_changed(&self.regs, &desc.regs, &crtc.mode, self.platform.dclk_rate(port)) {
            self.disable_all_planes(st, port);
        }
        st.ports[port].hdr.invalidate_tables();

        let mut crtc = crtc;
        crtc.yuv_overlay = crtc.bus_format.is_yuv();
        {
            let _reg = self.reg_lock.lock();
            route_outputs(&self.regs, port, &crtc);
            let dclk = program_timing(&self.regs, &self.profile, desc, &crtc);
            self.platform.set_dclk_rate(port, dclk);
            post_config(&self.regs, desc, &crtc);
            if self.profile.is_vop3() {
                vop3_pipe_dly(&self.regs, &self.profile, desc, &st.ports[port].hdr, &crtc.mode, None);
            }
            *self.ports[port].timing.lock() = Some(crtc.mode);
            self.cfg_done(port);
            self.regs.write_bool(desc.regs.standby, false);
        }

        let ps = &mut st.ports[port];
        ps.crtc = Some(crtc);
        if !ps.gamma_lut.is_empty() {
            self.load_gamma_lut(port, ps);
        }
        st.active_ports |= 1 << port;
        log::info!(
            "vop2: vp{} {}x{}{}@{} enabled",
            port,
            crtc.mode.hdisplay,
            crtc.mode.vdisplay,
            if crtc.mode.is_interlaced() { "i" } else { "p" },
            crtc.mode.vrefresh()
        );
        Ok(())
    }

    /// Turns off every window last enabled by `port` and waits for the
    /// hardware to drop them.
    fn disable_all_planes(&self, st: &mut DeviceState, port: usize) {
        let mut disabled = Vec::new();
        {
            let _reg = self.reg_lock.lock();
            for (idx, w) in st.windows.iter_mut().enumerate() {
                if w.enabled_on == Some(port) {
                    disable_window_regs(&self.regs, &self.profile, idx);
                    w.enabled_on = None;
                    disabled.push(idx);
                }
            }
            if disabled.is_empty() {
                return;
            }
            self.cfg_done(port);
        }

        let mut delay = |us| self.platform.udelay(us);
        let off = poll_timeout(WIN_DISABLE_TIMEOUT_US, POLL_STEP_US, &mut delay, || {
            disabled
                .iter()
                .all(|&idx| self.regs.read_field(self.profile.windows[idx].regs.enable) == 0)
        });
        if !off {
            log::error!("vop2: wait vp{} windows disabled timeout", port);
        }
    }

    /// Stops scanout on `port`.
    pub fn disable(&self, port: usize) -> Vop2Result<()> {
        let desc = self.port_desc(port)?;
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.ports[port].crtc.is_none() {
            return Ok(());
        }
        log::info!("vop2: vp{} disable", port);

        {
            let _reg = self.reg_lock.lock();
            if st.ports[port].cubic_buffer.is_some() {
                self.regs.write_bool(desc.regs.cubic_lut_update_en, false);
                self.regs.write_bool(desc.regs.cubic_lut_en, false);
            }
            if desc.feature.contains(PortFeature::VIVID_HDR) {
                self.regs.write_bool(HDR.hdr_lut_update_en, false);
            }
        }
        self.disable_all_planes(st, port);

        // standby takes effect at the end of the frame
        let sync = &self.ports[port];
        sync.dsp_hold.reinit();
        self.dsp_hold_irq(port, true);
        {
            let _reg = self.reg_lock.lock();
            self.regs.write_bool(desc.regs.standby, true);
        }
        let mut delay = |us| self.platform.udelay(us);
        if !sync.dsp_hold.wait_timeout(DSP_HOLD_TIMEOUT_US, DSP_HOLD_STEP_US, &mut delay) {
            log::info!("vop2: wait for vp{} dsp_hold timeout", port);
        }
        self.dsp_hold_irq(port, false);
        *sync.timing.lock() = None;

        let ps = &mut st.ports[port];
        ps.crtc = None;
        ps.hdr = PortHdr::default();
        ps.gamma_active = false;
        for w in st.windows.iter_mut().filter(|w| w.port == Some(port)) {
            w.plane = None;
            w.port = None;
        }
        st.active_ports &= !(1 << port);

        st.enable_count = st.enable_count.saturating_sub(1);
        if st.enable_count == 0 {
            let _reg = self.reg_lock.lock();
            self.regs.write_bool(self.profile.sys.dma_stop, true);
            if st.iommu_attached {
                self.platform.iommu_detach();
                st.iommu_attached = false;
            }
        }
        Ok(())
    }

    /// Bottom first stack of `port`, one entry per layer slot.
    fn collect_stack(&self, st: &DeviceState, port: usize) -> Vec<ZposEntry> {
        let mut stack: Vec<ZposEntry> = Vec::new();
        for (idx, desc) in self.profile.windows.iter().enumerate() {
            let Some(plane) = st.active_plane(idx, port) else {
                continue;
            };
            let Some(main) = self.profile.window_by_phys(desc.phys_id) else {
                continue;
            };
            match stack.iter_mut().find(|e| e.phys_id == desc.phys_id) {
                Some(e) => e.zpos = e.zpos.min(plane.zpos),
                None => stack.push(ZposEntry { phys_id: desc.phys_id, win: main, zpos: plane.zpos }),
            }
        }
        sort_zorder(&mut stack);
        stack
    }

    /// First visible plane in layer slot `phys` of `port`.
    fn layer_plane<'a>(&self, st: &'a DeviceState, port: usize, phys: u8) -> Option<&'a WindowPlaneState> {
        self.profile
            .windows
            .iter()
            .enumerate()
            .filter(|(_, w)| w.phys_id == phys)
            .find_map(|(idx, _)| st.active_plane(idx, port))
    }

    /// Routes the windows staged for `port` onto its layers and sets up
    /// blending, HDR and pipeline delays for them.
    pub fn begin_commit(&self, port: usize) -> Vop2Result<LayerPlan> {
        let desc = self.port_desc(port)?;
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let crtc = st.ports[port].crtc.ok_or(Vop2Error::PortDisabled(port))?;

        let stack = self.collect_stack(st, port);
        for e in &stack {
            if let Some(old) = st.windows[e.win].enabled_on.filter(|&p| p != port) {
                log::error!(
                    "vop2: {} still enabled on vp{}, disable it there first",
                    self.profile.windows[e.win].name,
                    old
                );
            }
            st.routing.claim(port, e.phys_id as usize);
        }

        let eotfs: Vec<Eotf> = (0..self.profile.windows.len())
            .filter_map(|idx| st.active_plane(idx, port).map(|p| p.eotf))
            .collect();
        let bottom = stack
            .first()
            .and_then(|e| self.layer_plane(st, port, e.phys_id))
            .map(|p| p.eotf)
            .unwrap_or(Eotf::Sdr);

        let _reg = self.reg_lock.lock();
        let mut delay = |us| self.platform.udelay(us);
        let vop3 = self.profile.is_vop3();
        let (layer_sel, outcome) = if vop3 {
            let sel = vop3_layer_sel(&self.profile, &self.regs, &st.routing, port, &stack);
            let outcome = self.vop3_hdr(st, port, bottom, &eotfs, &mut delay)?;
            (sel, outcome)
        } else {
            let mux = self.setup_port_mux(&mut st.routing, port);
            for (ps, &dly) in st.ports.iter_mut().zip(mux.bg_ovl_dly.iter()) {
                ps.bg_ovl_dly = dly;
            }
            let old = self.regs.shadow(REG_OVL_LAYER_SEL);
            let sel = st.routing.assign_layers(&self.profile, &self.regs, port, &stack, old);
            if let Err(e) = write_layer_sel(&self.regs, port, old, sel, &mut delay) {
                log::warn!("vop2: vp{} layer select: {}", port, e);
            }
            let ps = &mut st.ports[port];
            let outcome = setup_hdr10(&self.regs, desc, &mut ps.hdr, bottom, crtc.eotf, &eotfs).unwrap_or_default();
            (sel, outcome)
        };

        for w in st.windows.iter_mut().filter(|w| w.port == Some(port)) {
            w.hdr = PlaneHdr::default();
        }
        if let Some(b) = stack.first() {
            st.windows[b.win].hdr = outcome.bottom;
        }

        let layers: Vec<AlphaLayer> = stack
            .iter()
            .filter_map(|e| {
                let p = self.layer_plane(st, port, e.phys_id)?;
                Some(AlphaLayer {
                    pixel_alpha: p.pixel_alpha(),
                    premultiplied: p.premultiplied(),
                    global_alpha: p.global_alpha,
                    cluster: self.profile.windows[e.win].is_cluster(),
                })
            })
            .collect();
        let ps = &st.ports[port];
        let mix = plan_mixer_alpha(
            &layers,
            MixerOptions {
                per_port_mixer: vop3,
                has_hdr_mix: desc.feature.intersects(PortFeature::HDR10 | PortFeature::VIVID_HDR),
                hdr_en: ps.hdr.hdr_en,
            },
        );
        self.write_mixer(desc, st.routing.start_layer(port), st.routing.win_mask[port], &mix);
        self.setup_cluster_alpha(st, port, &stack);

        let planes_hdr: Vec<(usize, PlaneHdr)> = stack.iter().map(|e| (e.win, st.windows[e.win].hdr)).collect();
        if vop3 {
            vop3_pipe_dly(&self.regs, &self.profile, desc, &ps.hdr, &crtc.mode, Some(&planes_hdr));
        } else {
            setup_dly_for_vp(&self.regs, &self.profile, desc, &ps.hdr, ps.bg_ovl_dly, &crtc.mode);
            setup_dly_for_windows(&self.regs, &self.profile, &ps.hdr, ps.bg_ovl_dly, &planes_hdr);
        }

        let ps = &mut st.ports[port];
        ps.layer_sel = layer_sel;
        if let Some(c) = ps.crtc.as_mut() {
            c.yuv_overlay = c.bus_format.is_yuv() && !outcome.force_rgb_overlay;
        }
        Ok(LayerPlan { port, stack, layer_sel, port_mux: st.routing.port_mux_cfg })
    }

    /// Vivid HDR of a VOP3 port. Only missing resources fail the commit,
    /// bad metadata leaves the engine as it was.
    fn vop3_hdr(
        &self,
        st: &mut DeviceState,
        port: usize,
        bottom: Eotf,
        eotfs: &[Eotf],
        delay: &mut dyn FnMut(u32),
    ) -> Vop2Result<HdrOutcome> {
        let desc = &self.profile.ports[port];
        if !desc.feature.contains(PortFeature::VIVID_HDR) {
            return Ok(HdrOutcome::default());
        }
        let ps = &mut st.ports[port];
        let res = setup_dynamic_hdr(
            &self.regs,
            desc,
            &mut ps.hdr,
            ps.vivid.as_deref(),
            bottom,
            eotfs,
            ps.lut_buffer.as_deref(),
            delay,
        );
        match res {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.kind() == ErrorKind::ResourceExhaustion => Err(e),
            Err(e) => {
                log::warn!("vop2: vp{} hdr setup skipped: {}", port, e);
                Ok(HdrOutcome::default())
            }
        }
    }

    /// VOP3 ports own their mixer stages. VOP2 ports use their slice of the
    /// shared chain, one stage per owned window past the first, starting at
    /// `start_layer`. Unused stages pass through in both.
    fn write_mixer(&self, desc: &PortDesc, start_layer: usize, win_mask: u32, mix: &MixerAlpha) {
        let vp = &desc.regs;
        if self.profile.is_vop3() {
            for (k, words) in mix.stages.iter().enumerate() {
                words.write(&self.regs, vp.layer_mix_base + k as u32 * 0x10);
            }
            let last = (self.profile.nr_layers as usize).saturating_sub(1);
            for k in mix.stages.len()..last {
                mix.passthrough.write(&self.regs, vp.layer_mix_base + k as u32 * 0x10);
            }
        } else {
            for (k, words) in mix.stages.iter().enumerate() {
                words.write(&self.regs, OvlRegs::mix((start_layer + k) as u32));
            }
            let owned = (hweight(win_mask) as usize).saturating_sub(1);
            for k in mix.stages.len()..owned {
                mix.passthrough.write(&self.regs, OvlRegs::mix((start_layer + k) as u32));
            }
            if !desc.feature.contains(PortFeature::HDR10) {
                return;
            }
        }

        let base = vp.hdr_mix_base;
        match mix.hdr {
            HdrMix::Untouched => {}
            HdrMix::ClearSrcColor => self.regs.write(base, 0),
            HdrMix::Clear => clear_stage(&self.regs, base),
            HdrMix::Blend(words) => words.write(&self.regs, base),
        }
    }

    /// Blends the two windows of each cluster on `port` ahead of the mixer.
    fn setup_cluster_alpha(&self, st: &DeviceState, port: usize, stack: &[ZposEntry]) {
        let layer = |p: &WindowPlaneState| AlphaLayer {
            pixel_alpha: p.pixel_alpha(),
            premultiplied: p.premultiplied(),
            global_alpha: p.global_alpha,
            cluster: true,
        };
        for e in stack {
            let desc = &self.profile.windows[e.win];
            if !desc.is_cluster() {
                continue;
            }
            let sub = self
                .profile
                .windows
                .iter()
                .position(|w| w.phys_id == desc.phys_id && w.feature.contains(WinFeature::CLUSTER_SUB))
                .and_then(|i| st.active_plane(i, port));
            let words = match (st.active_plane(e.win, port), sub) {
                (Some(m), Some(s)) => {
                    if m.zpos.abs_diff(s.zpos) != 1 {
                        log::error!(
                            "vop2: {} win0 zpos {} and win1 zpos {} must be adjacent",
                            desc.name,
                            m.zpos,
                            s.zpos
                        );
                    }
                    cluster_alpha(&layer(m), m.zpos, Some((&layer(s), s.zpos)))
                }
                (Some(p), None) | (None, Some(p)) => cluster_alpha(&layer(p), p.zpos, None),
                (None, None) => continue,
            };
            words.write(&self.regs, desc.cluster.mix_base);
        }
    }

    /// Attaches the IOMMU ahead of the first fetch. Caller holds `reg_lock`.
    fn attach_iommu(&self, st: &mut DeviceState, port: usize) -> Vop2Result<()> {
        self.reg_lock.assert_held();
        if st.iommu_attached || !self.platform.iommu_enabled() {
            return Ok(());
        }
        let sys = &self.profile.sys;
        self.regs.write_bool(sys.dma_stop, true);
        if let Err(e) = self.platform.iommu_attach() {
            log::error!("vop2: vp{} iommu attach failed: {}", port, e);
            for (idx, w) in st.windows.iter_mut().enumerate() {
                if w.port == Some(port) || w.enabled_on == Some(port) {
                    disable_window_regs(&self.regs, &self.profile, idx);
                    w.enabled_on = None;
                }
            }
            self.cfg_done(port);
            return Err(e);
        }
        self.regs.write_bool(sys.dma_stop, false);
        st.iommu_attached = true;
        Ok(())
    }

    /// Programs the windows of `plan` and latches the frame.
    pub fn commit(&self, port: usize, plan: LayerPlan) -> Vop2Result<()> {
        let desc = self.port_desc(port)?;
        if plan.port != port {
            return Err(Vop2Error::UnknownPort(plan.port));
        }
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let crtc = st.ports[port].crtc.ok_or(Vop2Error::PortDisabled(port))?;

            let _reg = self.reg_lock.lock();
            self.attach_iommu(st, port)?;

            for idx in 0..self.profile.windows.len() {
                if st.windows[idx].enabled_on == Some(port) && st.active_plane(idx, port).is_none() {
                    disable_window_regs(&self.regs, &self.profile, idx);
                    st.windows[idx].enabled_on = None;
                }
            }

            let mut planes = Vec::new();
            for idx in 0..self.profile.windows.len() {
                let Some(plane) = st.active_plane(idx, port).copied() else {
                    continue;
                };
                if self.program_locked(st, port, idx, &plane, &crtc).is_some() {
                    st.windows[idx].enabled_on = Some(port);
                    planes.push(plane);
                }
            }

            let refs: Vec<&WindowPlaneState> = planes.iter().collect();
            let bw = port_bandwidth(&crtc.mode, &refs);
            log::debug!(
                "vop2: vp{} {} planes, line {} MB/s, frame {} MB/s",
                port,
                bw.plane_num,
                bw.line_bw_mbyte,
                bw.frame_bw_mbyte
            );
            st.ports[port].bandwidth = bw;

            cfg_update(&self.regs, desc, &crtc);
            self.commit_cubic_lut(port, &mut st.ports[port]);

            for e in &plan.stack {
                let phys = e.phys_id as usize;
                st.routing.old_vp_mask[phys] = st.routing.vp_mask[phys];
            }

            let _irq = self.irq_lock.lock();
            self.wb_commit(st, port, &crtc);
            self.cfg_done(port);
        }

        self.wait_for_irq_handler(port);
        let sync = &self.ports[port];
        sync.layer_sel_update.store(false, Ordering::Release);
        sync.skip_vsync.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vop2::crtc::OutputIf;
    use crate::drivers::vop2::format::{BusFormat, OutputMode};
    use crate::drivers::vop2::layout::REG_OVL_PORT_SEL;
    use crate::drivers::vop2::plane::Rect;
    use crate::drivers::vop2::testing::{device, mode_1080p, xrgb_fb};

    const ESMART0: usize = 4;

    fn hdmi(out: OutputIf) -> CrtcState {
        CrtcState::new(mode_1080p(), out, BusFormat::Rgb888_1x24, OutputMode::Aaaa)
    }

    fn fullscreen() -> PlaneRequest {
        PlaneRequest::new(xrgb_fb(1920, 1080), Rect::fixed(0, 0, 1920, 1080), Rect::new(0, 0, 1920, 1080))
    }

    fn win_enabled(vop: &Vop2, idx: usize) -> bool {
        vop.regs.read_field(vop.profile.windows[idx].regs.enable) != 0
    }

    fn flush(vop: &Vop2, port: usize) {
        let plan = vop.begin_commit(port).unwrap();
        vop.commit(port, plan).unwrap();
    }

    #[test]
    fn test_enable_and_disable_port() {
        let (vop, _, plat) = device(HardwareProfile::rk3588());
        let desc = &vop.profile.ports[0];
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        assert_eq!(vop.state.lock().enable_count, 1);
        assert_eq!(vop.regs.read_field(desc.regs.standby), 0);
        assert_eq!(*vop.ports[0].timing.lock(), Some(mode_1080p()));
        assert!(plat.dclk_rate(0) > 0);

        // a second enable of the same port only retimes it
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        assert_eq!(vop.state.lock().enable_count, 1);

        vop.disable(0).unwrap();
        let st = vop.state.lock();
        assert_eq!(st.enable_count, 0);
        assert_eq!(st.active_ports, 0);
        assert!(st.ports[0].crtc.is_none());
        drop(st);
        assert_eq!(vop.regs.read_field(desc.regs.standby), 1);
        assert_eq!(vop.regs.read_field(vop.profile.sys.dma_stop), 1);
        assert!(vop.ports[0].timing.lock().is_none());
    }

    #[test]
    fn test_plane_needs_enabled_port() {
        let (vop, _, _) = device(HardwareProfile::rk3588());
        assert_eq!(vop.validate(0, 0, &fullscreen()), Err(Vop2Error::PortDisabled(0)));
        assert_eq!(vop.validate(0, 99, &fullscreen()), Err(Vop2Error::UnknownWindow(99)));
        assert_eq!(vop.validate(9, 0, &fullscreen()), Err(Vop2Error::UnknownPort(9)));
    }

    #[test]
    fn test_rejected_plane_stays_off() {
        let (vop, _, _) = device(HardwareProfile::rk3568());
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        vop.set_plane(0, ESMART0, &fullscreen()).unwrap();

        // rk3568 clusters only take afbc
        assert_eq!(vop.set_plane(0, 0, &fullscreen()), Err(Vop2Error::LinearClusterUnsupported("Cluster0")));
        assert!(vop.state.lock().windows[0].plane.is_none());

        flush(&vop, 0);
        assert!(win_enabled(&vop, ESMART0));
        assert!(!win_enabled(&vop, 0));
    }

    #[test]
    fn test_negative_source_origin_is_rejected() {
        let (vop, _, _) = device(HardwareProfile::rk3568());
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        let req = PlaneRequest::new(xrgb_fb(1920, 1080), Rect::fixed(-8, 0, 100, 100), Rect::new(0, 0, 100, 100));
        assert_eq!(vop.validate(0, ESMART0, &req), Err(Vop2Error::SourceOutsideFramebuffer));
        assert_eq!(vop.set_plane(0, ESMART0, &req), Err(Vop2Error::SourceOutsideFramebuffer));
        assert!(vop.state.lock().windows[ESMART0].plane.is_none());
    }

    #[test]
    fn test_commit_programs_and_disables() {
        let (vop, _, _) = device(HardwareProfile::rk3588());
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        vop.set_plane(0, 0, &fullscreen()).unwrap();
        flush(&vop, 0);
        assert!(win_enabled(&vop, 0));
        assert_eq!(vop.state.lock().windows[0].enabled_on, Some(0));
        assert_eq!(vop.bandwidth(0).map(|b| b.plane_num), Some(1));

        vop.disable_plane(0).unwrap();
        assert!(!win_enabled(&vop, 0));
        flush(&vop, 0);
        assert!(!win_enabled(&vop, 0));
        assert_eq!(vop.bandwidth(0).map(|b| b.plane_num), Some(0));
    }

    #[test]
    fn test_window_moves_between_ports() {
        let (vop, fake, plat) = device(HardwareProfile::rk3568());
        plat.latch_on_delay(true);
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        vop.enable(1, hdmi(OutputIf::EDP0)).unwrap();
        assert_eq!(vop.routing().port_mux_cfg, 0x752);

        vop.set_plane(0, ESMART0, &fullscreen()).unwrap();
        flush(&vop, 0);
        assert!(win_enabled(&vop, ESMART0));

        // restaged for vp1: vp0 lets go of it first
        vop.set_plane(1, ESMART0, &fullscreen()).unwrap();
        flush(&vop, 0);
        assert_ne!(vop.routing().win_mask[0] & 1 << 2, 0);
        assert!(!win_enabled(&vop, ESMART0));

        let plan = vop.begin_commit(1).unwrap();
        let routing = vop.routing();
        assert_eq!(routing.win_mask[0] & 1 << 2, 0);
        assert_ne!(routing.win_mask[1] & 1 << 2, 0);
        assert_eq!(plan.port_mux, 0x751);
        assert_eq!(fake.get(REG_OVL_PORT_SEL) & 0xffff, 0x751);
        assert!(routing.is_consistent());

        vop.commit(1, plan).unwrap();
        assert!(win_enabled(&vop, ESMART0));
        assert_eq!(vop.state.lock().windows[ESMART0].enabled_on, Some(1));
    }

    #[test]
    fn test_unused_shared_stages_pass_through() {
        let (vop, fake, _) = device(HardwareProfile::rk3568());
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        // vp0 owns three windows, so two stages of the chain are its own
        assert_eq!(hweight(vop.routing().win_mask[0]), 3);
        for k in 0..3 {
            fake.set(OvlRegs::mix(k), 0xdead);
        }

        vop.set_plane(0, ESMART0, &fullscreen()).unwrap();
        flush(&vop, 0);

        let opts = MixerOptions { per_port_mixer: false, has_hdr_mix: false, hdr_en: false };
        let passthrough = plan_mixer_alpha(&[], opts).passthrough.to_regs();
        for k in 0..2 {
            for (i, &word) in passthrough.iter().enumerate() {
                assert_eq!(fake.get(OvlRegs::mix(k) + i as u32 * 4), word, "stage {} word {}", k, i);
            }
        }
        // past the end of vp0's slice
        assert_eq!(fake.get(OvlRegs::mix(2)), 0xdead);
    }

    #[test]
    fn test_vop3_layer_select() {
        let (vop, _, _) = device(HardwareProfile::rk3528());
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        // Esmart0 answers to selector 1
        vop.set_plane(0, 2, &fullscreen()).unwrap();
        let plan = vop.begin_commit(0).unwrap();
        assert_eq!(plan.stack.len(), 1);
        assert_eq!(plan.layer_sel & 0xf, 1);
        assert_eq!(plan.layer_sel >> 4 & 0xf, 0xf);
        assert_eq!(vop.regs.shadow(vop.profile.ports[0].regs.layer_sel), plan.layer_sel);
        vop.commit(0, plan).unwrap();
        assert!(win_enabled(&vop, 2));
    }

    #[test]
    fn test_iommu_attach_failure_blanks_port() {
        let (vop, _, plat) = device(HardwareProfile::rk3588());
        plat.set_iommu(true, true);
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        vop.set_plane(0, 0, &fullscreen()).unwrap();
        let plan = vop.begin_commit(0).unwrap();
        assert_eq!(vop.commit(0, plan), Err(Vop2Error::IommuAttach));
        assert!(!win_enabled(&vop, 0));

        plat.set_iommu(true, false);
        flush(&vop, 0);
        assert!(win_enabled(&vop, 0));
        assert_eq!(plat.iommu_attached(), 1);
        assert_eq!(vop.regs.read_field(vop.profile.sys.dma_stop), 0);

        vop.disable(0).unwrap();
        assert_eq!(plat.iommu_attached(), 0);
    }

    #[test]
    fn test_vivid_without_lut_buffer_fails() {
        use crate::drivers::vop2::hdr::HdrFormat;

        let (vop, _, _) = device(HardwareProfile::rk3528());
        vop.enable(0, hdmi(OutputIf::HDMI0)).unwrap();
        let mut req = fullscreen();
        req.eotf = Eotf::St2084;
        vop.set_plane(0, 2, &req).unwrap();
        vop.set_vivid_hdr(0, Some(VividHdrConfig::new(HdrFormat::Hdr10, 0))).unwrap();
        assert_eq!(vop.begin_commit(0), Err(Vop2Error::DmaBufferMissing));
    }
}
