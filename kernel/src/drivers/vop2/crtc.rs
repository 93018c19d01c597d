//! Video port timing and output routing
//!
//! A port scans one display mode out to one or more output interfaces.
//! Everything here runs with the register lock held, either on port
//! enable or as part of the per-commit port update.

use bitflags::bitflags;

use super::csc::{ColorSpace, Eotf};
use super::format::{BusFormat, OutputMode};
use super::layout::{OutputIfRegs, VpRegs, IF_CTRL};
use super::profile::{HardwareProfile, PortDesc, PortFeature};
use super::regs::RegisterFile;
use super::scale::post_scale_factor;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModeFlags: u32 {
        const NHSYNC    = 1 << 0;
        const NVSYNC    = 1 << 1;
        const INTERLACE = 1 << 2;
        const DBLCLK    = 1 << 3;
    }
}

/// Timing of one mode, in the port's own (crtc) line and pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayMode {
    /// Pixel clock in kHz.
    pub clock: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
    pub flags: ModeFlags,
}

impl DisplayMode {
    pub fn hsync_len(&self) -> u32 {
        self.hsync_end - self.hsync_start
    }

    pub fn vsync_len(&self) -> u32 {
        self.vsync_end - self.vsync_start
    }

    pub fn hact_st(&self) -> u32 {
        self.htotal - self.hsync_start
    }

    pub fn hact_end(&self) -> u32 {
        self.hact_st() + self.hdisplay
    }

    pub fn vact_st(&self) -> u32 {
        self.vtotal - self.vsync_start
    }

    pub fn vact_end(&self) -> u32 {
        self.vact_st() + self.vdisplay
    }

    pub fn is_interlaced(&self) -> bool {
        self.flags.contains(ModeFlags::INTERLACE)
    }

    /// Refresh rate in Hz, rounded to nearest. 0 for an empty mode.
    pub fn vrefresh(&self) -> u32 {
        let mut num = self.clock as u64 * 1000;
        let den = self.htotal as u64 * self.vtotal as u64;
        if den == 0 {
            return 0;
        }
        if self.is_interlaced() {
            num *= 2;
        }
        ((num + den / 2) / den) as u32
    }

    /// Scanout time of `lines` lines in microseconds.
    pub fn line_to_time_us(&self, lines: u32) -> u64 {
        if self.clock == 0 {
            return 0;
        }
        self.htotal as u64 * lines as u64 * 1000 / self.clock as u64
    }
}

bitflags! {
    /// Output interfaces a port can drive. Bit order matches the
    /// interface slots of the routing registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OutputIf: u32 {
        const RGB    = 1 << 0;
        const BT1120 = 1 << 1;
        const BT656  = 1 << 2;
        const LVDS0  = 1 << 3;
        const LVDS1  = 1 << 4;
        const MIPI0  = 1 << 5;
        const MIPI1  = 1 << 6;
        const EDP0   = 1 << 7;
        const EDP1   = 1 << 8;
        const DP0    = 1 << 9;
        const DP1    = 1 << 10;
        const HDMI0  = 1 << 11;
        const HDMI1  = 1 << 12;
    }
}

impl OutputIf {
    /// Routing slot of a single interface flag.
    pub fn slot(self) -> u8 {
        self.bits().trailing_zeros() as u8
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OutputFlags: u32 {
        const DUAL_CHANNEL_ODD_EVEN   = 1 << 0;
        const DUAL_CHANNEL_LEFT_RIGHT = 1 << 1;
        const DATA_SWAP               = 1 << 2;
    }
}

/// Overscan margins in percent, 100 shows the full picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margins {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Default for Margins {
    fn default() -> Self {
        Self { left: 100, right: 100, top: 100, bottom: 100 }
    }
}

/// Everything a port needs to scan out besides its windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrtcState {
    pub mode: DisplayMode,
    pub output_if: OutputIf,
    pub output_flags: OutputFlags,
    pub bus_format: BusFormat,
    pub output_mode: OutputMode,
    pub color_space: ColorSpace,
    /// Transfer function the sink expects.
    pub eotf: Eotf,
    pub margins: Margins,
    /// 0xRRGGBB; 0 keeps black.
    pub background: u32,
    /// Data launched on the falling clock edge.
    pub dclk_inv: bool,
    pub xmirror: bool,
    /// Blend in YUV. Derived on every commit from the bus format and the
    /// HDR setup.
    pub yuv_overlay: bool,
}

impl CrtcState {
    pub fn new(mode: DisplayMode, output_if: OutputIf, bus_format: BusFormat, output_mode: OutputMode) -> Self {
        Self {
            mode,
            output_if,
            output_flags: OutputFlags::empty(),
            bus_format,
            output_mode,
            color_space: ColorSpace::Default,
            eotf: Eotf::Sdr,
            margins: Margins::default(),
            background: 0,
            dclk_inv: false,
            xmirror: false,
            yuv_overlay: bus_format.is_yuv(),
        }
    }

    /// Pin polarity: bit 0 hsync, bit 1 vsync, set when active high.
    pub fn sync_polarity(&self) -> u32 {
        let mut val = 0;
        if !self.mode.flags.contains(ModeFlags::NHSYNC) {
            val |= 1 << 0;
        }
        if !self.mode.flags.contains(ModeFlags::NVSYNC) {
            val |= 1 << 1;
        }
        val
    }

    /// BT1120 and BT656 carry YUV at limited range.
    pub fn yuv_clip(&self) -> bool {
        self.output_if.intersects(OutputIf::BT1120 | OutputIf::BT656)
    }
}

// dsp_data_swap bits
const DSP_RB_SWAP: u32 = 0x2;

// dither_down_mode
const RGB888_TO_RGB565: u32 = 0;
const RGB888_TO_RGB666: u32 = 1;
// dither_down_sel
const DITHER_DOWN_ALLEGRO: u32 = 1;

/// Background in YUV overlay when none was requested: black at limited range.
const YUV_BLACK: u32 = 0x2001_0200;

/// Routes port `port` to every interface in `st.output_if`.
pub fn route_outputs(regs: &RegisterFile, port: usize, st: &CrtcState) {
    let pol = st.sync_polarity();
    let id = port as u32;

    for iface in st.output_if.iter() {
        let slot = OutputIfRegs::slot(iface.slot());
        regs.write_bool(slot.en, true);
        regs.write_field(slot.mux, id);

        match iface {
            OutputIf::RGB => regs.write_field(slot.pin_pol, pol),
            OutputIf::BT1120 => {
                // BT1120 rides on the RGB interface
                let rgb = OutputIfRegs::slot(OutputIf::RGB.slot());
                regs.write_bool(rgb.en, true);
                regs.write_field(rgb.mux, id);
                regs.write_bool(IF_CTRL.bt1120_yc_swap, st.bus_format.yc_swap());
            }
            OutputIf::BT656 => regs.write_bool(IF_CTRL.bt656_yc_swap, st.bus_format.yc_swap()),
            OutputIf::DP0 | OutputIf::DP1 => {
                regs.write_field(slot.pin_pol, pol);
                regs.write_bool(slot.dclk_pol, false);
            }
            OutputIf::HDMI0 | OutputIf::HDMI1 => {
                regs.write_field(slot.pin_pol, pol);
                regs.write_bool(slot.dclk_pol, true);
            }
            _ => {
                regs.write_field(slot.pin_pol, pol);
                regs.write_bool(slot.dclk_pol, st.dclk_inv);
            }
        }
    }

    let dual = OutputFlags::DUAL_CHANNEL_ODD_EVEN | OutputFlags::DUAL_CHANNEL_LEFT_RIGHT;
    let swap = st.output_flags.contains(OutputFlags::DATA_SWAP);
    if st.output_if.intersects(OutputIf::LVDS0 | OutputIf::LVDS1) && st.output_flags.intersects(dual) {
        regs.write_bool(IF_CTRL.lvds_dual_en, true);
        if st.output_flags.contains(OutputFlags::DUAL_CHANNEL_LEFT_RIGHT) {
            regs.write_bool(IF_CTRL.lvds_dual_mode, true);
        }
        if swap {
            regs.write_bool(IF_CTRL.lvds_dual_channel_swap, true);
        }
    }
    if st.output_if.intersects(OutputIf::MIPI0 | OutputIf::MIPI1)
        && st.output_flags.contains(OutputFlags::DUAL_CHANNEL_LEFT_RIGHT)
    {
        regs.write_bool(IF_CTRL.mipi_dual_en, true);
        if swap {
            regs.write_bool(IF_CTRL.mipi_dual_channel_swap, true);
        }
    }
}

/// Programs the sync and active window of `st.mode`, returns the dot
/// clock rate in Hz the platform must provide.
pub fn program_timing(regs: &RegisterFile, profile: &HardwareProfile, desc: &PortDesc, st: &CrtcState) -> u64 {
    let vp = &desc.regs;
    let m = &st.mode;
    let mut vtotal = m.vtotal;

    regs.write(vp.htotal_pw, m.htotal << 16 | m.hsync_len());
    regs.write(vp.hact_st_end, m.hact_st() << 16 | m.hact_end());
    regs.write(vp.vact_st_end, m.vact_st() << 16 | m.vact_end());

    let act_end = if m.is_interlaced() {
        let vact_st_f1 = m.vtotal + m.vact_st() + 1;
        let vact_end_f1 = vact_st_f1 + m.vdisplay;
        regs.write(vp.vact_st_end_f1, vact_st_f1 << 16 | vact_end_f1);
        regs.write(vp.vs_st_end_f1, m.vtotal << 16 | (m.vtotal + m.vsync_len()));
        regs.write_bool(vp.dsp_interlace, true);
        regs.write_bool(vp.dsp_filed_pol, true);
        regs.write_bool(vp.p2i_en, true);
        vtotal += m.vtotal + 1;
        vact_end_f1
    } else {
        regs.write_bool(vp.dsp_interlace, false);
        regs.write_bool(vp.dsp_filed_pol, false);
        regs.write_bool(vp.p2i_en, false);
        m.vact_end()
    };

    regs.write_bool(vp.dsp_x_mir_en, st.xmirror);
    regs.write_field(vp.line_flag_num0, act_end);
    regs.write_field(vp.line_flag_num1, act_end);
    regs.write(vp.vtotal_pw, vtotal << 16 | m.vsync_len());

    let bt656 = st.output_if.contains(OutputIf::BT656);
    regs.write_bool(vp.core_dclk_div, m.flags.contains(ModeFlags::DBLCLK) || bt656);
    let yuv420 = st.output_mode == OutputMode::Yuv420;
    regs.write_bool(vp.dclk_div2, yuv420);
    regs.write_bool(vp.dclk_div2_phase_lock, yuv420);

    let mut dclk = m.clock as u64 * 1000;
    if profile.quirks.bt656_dclk_x4 && bt656 {
        dclk *= 4;
    }
    dclk
}

/// True when the running timing differs from `mode`, in which case the
/// windows must be turned off before the new timing is written.
pub fn mode_changed(regs: &RegisterFile, vp: &VpRegs, mode: &DisplayMode, dclk_rate: u64) -> bool {
    let wanted = [
        (vp.htotal_pw, mode.htotal << 16 | mode.hsync_len()),
        (vp.hact_st_end, mode.hact_st() << 16 | mode.hact_end()),
        (vp.vtotal_pw, mode.vtotal << 16 | mode.vsync_len()),
        (vp.vact_st_end, mode.vact_st() << 16 | mode.vact_end()),
    ];
    if wanted.iter().any(|&(off, v)| regs.read(off) != v) {
        return true;
    }
    dclk_rate != mode.clock as u64 * 1000
}

/// Down dither and pre-dither by bus format.
pub fn dither_setup(regs: &RegisterFile, vp: &VpRegs, bus: BusFormat) {
    let (en, mode, pre) = match bus {
        BusFormat::Rgb565_1x16 => (true, Some(RGB888_TO_RGB565), true),
        BusFormat::Rgb666_1x18 | BusFormat::Rgb666_1x24CpadHi | BusFormat::Rgb666_1x7x3Spwg => {
            (true, Some(RGB888_TO_RGB666), true)
        }
        BusFormat::Yuv8_1x24 | BusFormat::Uyyvyy8_0_5x24 => (false, None, true),
        BusFormat::Yuv10_1x30 | BusFormat::Uyyvyy10_0_5x30 | BusFormat::Rgb101010_1x30 => {
            (false, None, false)
        }
        _ => (false, None, true),
    };

    regs.write_bool(vp.dither_down_en, en);
    if let Some(mode) = mode {
        regs.write_field(vp.dither_down_mode, mode);
    }
    regs.write_bool(vp.pre_dither_down_en, pre);
    regs.write_field(vp.dither_down_sel, DITHER_DOWN_ALLEGRO);
}

/// Post scaler: shrinks the picture into the overscan margins.
pub fn post_config(regs: &RegisterFile, desc: &PortDesc, st: &CrtcState) {
    let vp = &desc.regs;
    let m = &st.mode;
    let mg = &st.margins;

    let hsize = (m.hdisplay * (mg.left + mg.right) / 200) & !1;
    let vsize = (m.vdisplay * (mg.top + mg.bottom) / 200) & !1;
    let hact_st = m.htotal - m.hsync_start + m.hdisplay * (100 - mg.left.min(100)) / 200;
    let vact_st = m.vtotal - m.vsync_start + m.vdisplay * (100 - mg.top.min(100)) / 200;

    regs.write(vp.hpost_st_end, hact_st << 16 | (hact_st + hsize));
    regs.write(vp.vpost_st_end, vact_st << 16 | (vact_st + vsize));

    let factor = post_scale_factor(m.vdisplay, vsize) << 16 | post_scale_factor(m.hdisplay, hsize);
    regs.write(vp.post_scl_factor, factor);
    let ctrl = (m.hdisplay != hsize) as u32 | ((m.vdisplay != vsize) as u32) << 1;
    regs.write_field(vp.post_scl_ctrl, ctrl);

    if m.is_interlaced() {
        let st_f1 = m.vtotal + vact_st + 1;
        regs.write(vp.vpost_st_end_f1, st_f1 << 16 | (st_f1 + vsize));
    }

    let r2y = if desc.feature.contains(PortFeature::POST_ACM) {
        st.yuv_overlay
    } else {
        st.bus_format.is_yuv()
    };
    regs.write_bool(vp.post_dsp_out_r2y, r2y);
}

/// 10 bit per channel background word.
pub fn background_word(st: &CrtcState) -> u32 {
    if st.background != 0 {
        let r = ((st.background >> 16) & 0xff) << 2;
        let g = ((st.background >> 8) & 0xff) << 2;
        let b = (st.background & 0xff) << 2;
        r << 20 | g << 10 | b
    } else if st.yuv_overlay {
        YUV_BLACK
    } else {
        0
    }
}

/// Per-commit port configuration: output mode, swaps, dither, overlay
/// color domain, background and post scaler.
pub fn cfg_update(regs: &RegisterFile, desc: &PortDesc, st: &CrtcState) {
    let vp = &desc.regs;

    let out_mode = if (st.output_mode == OutputMode::Aaaa && !desc.feature.contains(PortFeature::OUTPUT_10BIT))
        || st.output_if.contains(OutputIf::BT656)
    {
        OutputMode::P888
    } else {
        st.output_mode
    };
    regs.write_field(vp.out_mode, out_mode as u32);

    let swap = if st.bus_format.uv_swap(st.output_mode) { DSP_RB_SWAP } else { 0 };
    regs.write_field(vp.dsp_data_swap, swap);

    dither_setup(regs, vp, st.bus_format);
    regs.write_bool(vp.overlay_mode, st.yuv_overlay);
    regs.write(vp.dsp_background, background_word(st));
    post_config(regs, desc, st);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vop2::layout::REG_WINDOW_LEN;
    use crate::drivers::vop2::testing::{mode_1080p, FakeRegs};
    use alloc::boxed::Box;

    fn setup() -> (RegisterFile, FakeRegs, HardwareProfile) {
        let fake = FakeRegs::new();
        (RegisterFile::new(Box::new(fake.clone()), REG_WINDOW_LEN), fake, HardwareProfile::rk3588())
    }

    fn hdmi_state() -> CrtcState {
        CrtcState::new(mode_1080p(), OutputIf::HDMI0, BusFormat::Rgb888_1x24, OutputMode::Aaaa)
    }

    #[test]
    fn test_mode_helpers() {
        let m = mode_1080p();
        assert_eq!(m.vrefresh(), 60);
        assert_eq!(m.hsync_len(), 44);
        assert_eq!((m.hact_st(), m.hact_end()), (192, 2112));
        assert_eq!((m.vact_st(), m.vact_end()), (41, 1121));
        // 2200 * 1125 / 148500 kHz ~ one frame in us
        assert_eq!(m.line_to_time_us(1125), 16666);
        assert_eq!(DisplayMode::default().vrefresh(), 0);
    }

    #[test]
    fn test_progressive_timing() {
        let (regs, fake, p) = setup();
        let st = hdmi_state();
        let vp = &p.ports[0].regs;
        let dclk = program_timing(&regs, &p, &p.ports[0], &st);
        assert_eq!(dclk, 148_500_000);
        assert_eq!(fake.get(vp.htotal_pw), 2200 << 16 | 44);
        assert_eq!(fake.get(vp.hact_st_end), 192 << 16 | 2112);
        assert_eq!(fake.get(vp.vtotal_pw), 1125 << 16 | 5);
        assert_eq!(fake.get(vp.vact_st_end), 41 << 16 | 1121);
        assert_eq!(regs.shadow_field(vp.line_flag_num0), 1121);
        assert_eq!(regs.shadow_field(vp.dsp_interlace), 0);
        assert!(!mode_changed(&regs, vp, &st.mode, dclk));
        assert!(mode_changed(&regs, vp, &st.mode, 74_250_000));
    }

    #[test]
    fn test_interlaced_timing_programs_second_field() {
        let (regs, fake, p) = setup();
        let mut st = hdmi_state();
        st.mode = DisplayMode {
            clock: 74250,
            hdisplay: 1920,
            hsync_start: 2008,
            hsync_end: 2052,
            htotal: 2200,
            vdisplay: 540,
            vsync_start: 542,
            vsync_end: 547,
            vtotal: 562,
            flags: ModeFlags::INTERLACE,
        };
        let vp = &p.ports[1].regs;
        program_timing(&regs, &p, &p.ports[1], &st);
        let vact_st = 562 - 542;
        let f1 = 562 + vact_st + 1;
        assert_eq!(fake.get(vp.vact_st_end_f1), f1 << 16 | (f1 + 540));
        assert_eq!(fake.get(vp.vs_st_end_f1), 562 << 16 | 567);
        assert_eq!(fake.get(vp.vtotal_pw), (2 * 562 + 1) << 16 | 5);
        assert_eq!(regs.shadow_field(vp.p2i_en), 1);
        assert_eq!(regs.shadow_field(vp.line_flag_num1), f1 + 540);
    }

    #[test]
    fn test_hdmi_routing() {
        let (regs, _, _) = setup();
        let mut st = hdmi_state();
        st.mode.flags = ModeFlags::NVSYNC;
        route_outputs(&regs, 2, &st);
        let slot = OutputIfRegs::slot(OutputIf::HDMI0.slot());
        assert_eq!(regs.shadow_field(slot.en), 1);
        assert_eq!(regs.shadow_field(slot.mux), 2);
        assert_eq!(regs.shadow_field(slot.pin_pol), 0b01);
        assert_eq!(regs.shadow_field(slot.dclk_pol), 1);
    }

    #[test]
    fn test_bt1120_enables_rgb_and_yc_swap() {
        let (regs, _, _) = setup();
        let st = CrtcState::new(mode_1080p(), OutputIf::BT1120, BusFormat::Yuyv8_1x16, OutputMode::Bt656);
        route_outputs(&regs, 1, &st);
        let rgb = OutputIfRegs::slot(OutputIf::RGB.slot());
        assert_eq!(regs.shadow_field(rgb.en), 1);
        assert_eq!(regs.shadow_field(rgb.mux), 1);
        assert_eq!(regs.shadow_field(IF_CTRL.bt1120_yc_swap), 1);
        assert!(st.yuv_clip());
    }

    #[test]
    fn test_lvds_dual_channel() {
        let (regs, _, _) = setup();
        let mut st = CrtcState::new(mode_1080p(), OutputIf::LVDS0, BusFormat::Rgb888_1x24, OutputMode::P888);
        st.output_flags = OutputFlags::DUAL_CHANNEL_LEFT_RIGHT | OutputFlags::DATA_SWAP;
        route_outputs(&regs, 0, &st);
        assert_eq!(regs.shadow_field(IF_CTRL.lvds_dual_en), 1);
        assert_eq!(regs.shadow_field(IF_CTRL.lvds_dual_mode), 1);
        assert_eq!(regs.shadow_field(IF_CTRL.lvds_dual_channel_swap), 1);
        assert_eq!(regs.shadow_field(IF_CTRL.mipi_dual_en), 0);
    }

    #[test]
    fn test_dither_by_bus_format() {
        let (regs, _, p) = setup();
        let vp = &p.ports[0].regs;
        dither_setup(&regs, vp, BusFormat::Rgb565_1x16);
        assert_eq!(regs.shadow_field(vp.dither_down_en), 1);
        assert_eq!(regs.shadow_field(vp.dither_down_mode), RGB888_TO_RGB565);
        dither_setup(&regs, vp, BusFormat::Yuv10_1x30);
        assert_eq!(regs.shadow_field(vp.dither_down_en), 0);
        assert_eq!(regs.shadow_field(vp.pre_dither_down_en), 0);
        assert_eq!(regs.shadow_field(vp.dither_down_sel), DITHER_DOWN_ALLEGRO);
    }

    #[test]
    fn test_background_word() {
        let mut st = hdmi_state();
        st.background = 0xff8001;
        assert_eq!(background_word(&st), (0xff << 2) << 20 | (0x80 << 2) << 10 | (0x01 << 2));
        st.background = 0;
        st.yuv_overlay = true;
        assert_eq!(background_word(&st), YUV_BLACK);
    }

    #[test]
    fn test_post_config_full_and_overscan() {
        let (regs, fake, p) = setup();
        let mut st = hdmi_state();
        let vp = &p.ports[1].regs;
        post_config(&regs, &p.ports[1], &st);
        assert_eq!(fake.get(vp.hpost_st_end), 192 << 16 | (192 + 1920));
        assert_eq!(regs.shadow_field(vp.post_scl_ctrl), 0);

        st.margins = Margins { left: 90, right: 90, top: 100, bottom: 100 };
        post_config(&regs, &p.ports[1], &st);
        // 1920 * 180 / 200 = 1728, shifted right by 1920 * 10 / 200
        assert_eq!(fake.get(vp.hpost_st_end), (192 + 96) << 16 | (192 + 96 + 1728));
        assert_eq!(regs.shadow_field(vp.post_scl_ctrl), 0b01);
    }

    #[test]
    fn test_cfg_update_forces_p888_without_10bit() {
        let (regs, _, p) = setup();
        let st = hdmi_state();
        cfg_update(&regs, &p.ports[3], &st);
        assert_eq!(regs.shadow_field(p.ports[3].regs.out_mode), OutputMode::P888 as u32);
        cfg_update(&regs, &p.ports[0], &st);
        assert_eq!(regs.shadow_field(p.ports[0].regs.out_mode), OutputMode::Aaaa as u32);
        assert_eq!(regs.shadow_field(p.ports[0].regs.overlay_mode), 0);
    }
}
