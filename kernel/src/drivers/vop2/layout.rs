//! Register map
//!
//! Offsets and bitfields for every block the engine touches. The map is
//! plain data: generation differences are expressed by which fields exist
//! (non-zero mask) and where the per-port overlay block lives, never by
//! branching in the programming code.

#![allow(dead_code)]

use super::regs::VopReg;

// Global/system block
pub const REG_CFG_DONE: u32 = 0x000;
pub const REG_VERSION: u32 = 0x004;
pub const REG_SYS_CTRL: u32 = 0x008;
pub const REG_SYS_CTRL1: u32 = 0x00c;
pub const REG_DSP_IF_EN: u32 = 0x028;
pub const REG_DSP_IF_MUX: u32 = 0x02c;
pub const REG_DSP_IF_POL: u32 = 0x034;
pub const REG_DSP_IF_CTRL: u32 = 0x03c;
pub const REG_WB_CTRL: u32 = 0x040;
pub const REG_WB_XSCAL: u32 = 0x044;
pub const REG_WB_YRGB_MST: u32 = 0x048;
pub const REG_WB_CBR_MST: u32 = 0x04c;
pub const REG_WB_AXI: u32 = 0x050;
pub const REG_LUT_PORT_SEL: u32 = 0x058;
pub const REG_SYS_STATUS0: u32 = 0x060;
pub const REG_SYS_INT_EN: u32 = 0x080;
pub const REG_SYS_INT_CLR: u32 = 0x084;
pub const REG_SYS_INT_STATUS: u32 = 0x088;
pub const REG_VP_INT_BASE: u32 = 0x0a0;

pub const CFG_DONE_PORT_MASK: u32 = 0x7;
pub const GLB_CFG_DONE_EN: u32 = 1 << 15;
pub const WB_CFG_DONE: u32 = 1 << 14;

// Overlay block
pub const REG_OVL_CTRL: u32 = 0x600;
pub const REG_OVL_LAYER_SEL: u32 = 0x604;
pub const REG_OVL_PORT_SEL: u32 = 0x608;
pub const REG_CLUSTER_MIX_BASE: u32 = 0x610;
pub const REG_MIX0_BASE: u32 = 0x650;
pub const REG_HDR_MIX_BASE: u32 = 0x6c0;
pub const REG_BG_MIX_BASE: u32 = 0x6d0;
pub const REG_WIN_DLY_BASE: u32 = 0x6e0;
/// Per-port overlay block used by generations with a layer mixer per port.
pub const REG_PORT_OVL_BASE: u32 = 0x800;

// Video port blocks
pub const REG_VP_BASE: u32 = 0xc00;
pub const VP_STRIDE: u32 = 0x100;

// HDR engine
pub const REG_HDR_BASE: u32 = 0x2000;
pub const HDR2SDR_EETF_OETF_Y0: u32 = 0x203c;
pub const HDR2SDR_SAT_Y0: u32 = 0x20c0;
pub const SDR2HDR_EOTF_OETF_Y0: u32 = 0x20f0;
pub const SDR2HDR_OETF_DX_POW1: u32 = 0x2200;
pub const SDR2HDR_OETF_XN1: u32 = 0x2300;

// HDR vivid engine (vop3)
pub const REG_VIVID_BASE: u32 = 0x2400;
pub const VIVID_SDR2HDR_CTRL: u32 = 0x2400;
pub const VIVID_HDRVIVID_CTRL: u32 = 0x2404;
pub const VIVID_SDR_CFG_COE0: u32 = 0x2408;
pub const VIVID_SDR_CFG_COE1: u32 = 0x240c;
pub const VIVID_SDR_CSC_COE: u32 = 0x2410; // 5 words
pub const VIVID_HDR_PQ_GAMMA: u32 = 0x2424;
pub const VIVID_HLG_RFIX_SCALEFAC: u32 = 0x2428;
pub const VIVID_HLG_MAXLUMA: u32 = 0x242c;
pub const VIVID_HLG_R_TM_LIN2NON: u32 = 0x2430;
pub const VIVID_HDR_CSC_COE: u32 = 0x2434; // 5 words
pub const VIVID_HDRGAMMA_CURVE: u32 = 0x2500;
pub const VIVID_HDRGAMMA_MDFVALUE: u32 = 0x2650;
pub const VIVID_SDRINVGAMMA_CURVE: u32 = 0x2680;
pub const VIVID_SDRINVGAMMA_STARTIDX: u32 = 0x27a0;
pub const VIVID_SDRINVGAMMA_CHANGEIDX: u32 = 0x27c0;
pub const VIVID_SDR_SMGAIN: u32 = 0x2800;

// Gamma LUT RAM
pub const REG_GAMMA_LUT_BASE: u32 = 0x3000;

/// Size of the register window the shadow cache covers.
pub const REG_WINDOW_LEN: usize = 0x4000;

#[derive(Debug, Clone, Copy)]
pub struct IrqRegs {
    pub enable: u32,
    pub clear: u32,
    pub status: u32,
}

impl IrqRegs {
    pub const fn at(base: u32) -> Self {
        Self { enable: base, clear: base + 4, status: base + 8 }
    }
}

/// Global controls.
#[derive(Debug, Clone, Copy)]
pub struct SysRegs {
    pub cfg_done_en: VopReg,
    pub auto_gating_en: VopReg,
    pub aclk_pre_auto_gating_en: VopReg,
    pub dma_stop: VopReg,
    pub if_ctrl_cfg_done_imd: VopReg,
    pub dsp_vs_t_sel: VopReg,
    pub esmart_lb_mode: VopReg,
    /// Generation specific bits cleared once at first enable.
    pub init_clear: VopReg,
    pub lut_dma_en: VopReg,
    pub gamma_port_sel: VopReg,
    pub axi_irq: IrqRegs,
}

#[derive(Debug, Clone, Copy)]
pub struct OvlRegs {
    pub port_mux: VopReg,
    pub ovl_cfg_done_port: VopReg,
    pub ovl_port_mux_cfg_done_imd: VopReg,
}

impl OvlRegs {
    /// Per-window video port affinity lives in the upper half of OVL_PORT_SEL.
    pub const fn win_vp_id(phys_id: u8) -> VopReg {
        VopReg::new(REG_OVL_PORT_SEL, 0x3, 16 + phys_id * 2)
    }

    pub const fn win_dly(phys_id: u8) -> u32 {
        REG_WIN_DLY_BASE + phys_id as u32 * 4
    }

    pub const fn mix(stage: u32) -> u32 {
        REG_MIX0_BASE + stage * 0x10
    }
}

/// One output interface routing slot.
#[derive(Debug, Clone, Copy)]
pub struct OutputIfRegs {
    pub en: VopReg,
    pub mux: VopReg,
    pub pin_pol: VopReg,
    pub dclk_pol: VopReg,
}

impl OutputIfRegs {
    pub const fn slot(i: u8) -> Self {
        let reg = (i as u32 / 8) * 4;
        let nib = (i % 8) * 4;
        Self {
            en: VopReg::new(REG_DSP_IF_EN, 0x1, i),
            mux: VopReg::new(REG_DSP_IF_MUX + reg, 0x3, nib),
            pin_pol: VopReg::new(REG_DSP_IF_POL + reg, 0x7, nib),
            dclk_pol: VopReg::new(REG_DSP_IF_POL + reg, 0x1, nib + 3),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DualChannelRegs {
    pub bt1120_yc_swap: VopReg,
    pub bt656_yc_swap: VopReg,
    pub lvds_dual_en: VopReg,
    pub lvds_dual_mode: VopReg,
    pub lvds_dual_channel_swap: VopReg,
    pub mipi_dual_en: VopReg,
    pub mipi_dual_channel_swap: VopReg,
}

pub const IF_CTRL: DualChannelRegs = DualChannelRegs {
    bt1120_yc_swap: VopReg::new(REG_DSP_IF_CTRL, 0x1, 0),
    bt656_yc_swap: VopReg::new(REG_DSP_IF_CTRL, 0x1, 1),
    lvds_dual_en: VopReg::new(REG_DSP_IF_CTRL, 0x1, 4),
    lvds_dual_mode: VopReg::new(REG_DSP_IF_CTRL, 0x1, 5),
    lvds_dual_channel_swap: VopReg::new(REG_DSP_IF_CTRL, 0x1, 6),
    mipi_dual_en: VopReg::new(REG_DSP_IF_CTRL, 0x1, 8),
    mipi_dual_channel_swap: VopReg::new(REG_DSP_IF_CTRL, 0x1, 9),
};

#[derive(Debug, Clone, Copy)]
pub struct WbRegs {
    pub enable: VopReg,
    pub format: VopReg,
    pub r2y_en: VopReg,
    pub scale_y_en: VopReg,
    pub fifo_throd: VopReg,
    pub scale_x_factor: VopReg,
    pub scale_x_en: VopReg,
    pub yrgb_mst: VopReg,
    pub uv_mst: VopReg,
    pub axi_yrgb_id: VopReg,
    pub axi_uv_id: VopReg,
    pub vp_id: VopReg,
}

pub const WB: WbRegs = WbRegs {
    enable: VopReg::new(REG_WB_CTRL, 0x1, 0),
    format: VopReg::new(REG_WB_CTRL, 0x7, 1),
    r2y_en: VopReg::new(REG_WB_CTRL, 0x1, 5),
    scale_y_en: VopReg::new(REG_WB_CTRL, 0x1, 7),
    fifo_throd: VopReg::new(REG_WB_CTRL, 0x3ff, 16),
    scale_x_factor: VopReg::new(REG_WB_XSCAL, 0x3fff, 0),
    scale_x_en: VopReg::new(REG_WB_XSCAL, 0x1, 16),
    yrgb_mst: VopReg::word(REG_WB_YRGB_MST),
    uv_mst: VopReg::word(REG_WB_CBR_MST),
    axi_yrgb_id: VopReg::new(REG_WB_AXI, 0x1f, 0),
    axi_uv_id: VopReg::new(REG_WB_AXI, 0x1f, 8),
    vp_id: VopReg::new(REG_LUT_PORT_SEL, 0x3, 8),
};

/// Per video port registers.
#[derive(Debug, Clone, Copy)]
pub struct VpRegs {
    pub out_mode: VopReg,
    pub core_dclk_div: VopReg,
    pub p2i_en: VopReg,
    pub dsp_filed_pol: VopReg,
    pub dsp_interlace: VopReg,
    pub dsp_data_swap: VopReg,
    pub dsp_x_mir_en: VopReg,
    pub pre_dither_down_en: VopReg,
    pub dither_down_en: VopReg,
    pub dither_down_sel: VopReg,
    pub dither_down_mode: VopReg,
    pub gamma_update_en: VopReg,
    pub dsp_lut_en: VopReg,
    pub standby: VopReg,
    pub dclk_div2: VopReg,
    pub dclk_div2_phase_lock: VopReg,
    pub line_flag_num0: VopReg,
    pub line_flag_num1: VopReg,
    pub dsp_background: u32,
    pub pre_scan_htiming: u32,
    pub hpost_st_end: u32,
    pub vpost_st_end: u32,
    pub post_scl_factor: u32,
    pub post_scl_ctrl: VopReg,
    pub post_dsp_out_r2y: VopReg,
    pub vpost_st_end_f1: u32,
    pub htotal_pw: u32,
    pub hact_st_end: u32,
    pub vtotal_pw: u32,
    pub vact_st_end: u32,
    pub vs_st_end_f1: u32,
    pub vact_st_end_f1: u32,
    pub cubic_lut_en: VopReg,
    pub cubic_lut_update_en: VopReg,
    pub cubic_lut_mst: u32,
    pub overlay_mode: VopReg,
    pub bg_dly: VopReg,
    pub bg_mix_ctrl: u32,
    /// Per-port layer selector, only with per-port mixers.
    pub layer_sel: u32,
    /// First stage of the per-port mixer chain.
    pub layer_mix_base: u32,
    pub hdr_mix_base: u32,
    pub irq: IrqRegs,
    pub status: u32,
}

impl VpRegs {
    pub const fn new(id: u8, per_port_mixer: bool) -> Self {
        let b = REG_VP_BASE + id as u32 * VP_STRIDE;
        let ovl = REG_PORT_OVL_BASE + id as u32 * 0x100;
        Self {
            out_mode: VopReg::new(b, 0xf, 0),
            core_dclk_div: VopReg::new(b, 0x1, 4),
            p2i_en: VopReg::new(b, 0x1, 5),
            dsp_filed_pol: VopReg::new(b, 0x1, 6),
            dsp_interlace: VopReg::new(b, 0x1, 7),
            dsp_data_swap: VopReg::new(b, 0x1f, 8),
            dsp_x_mir_en: VopReg::new(b, 0x1, 13),
            pre_dither_down_en: VopReg::new(b, 0x1, 16),
            dither_down_en: VopReg::new(b, 0x1, 17),
            dither_down_sel: VopReg::new(b, 0x3, 18),
            dither_down_mode: VopReg::new(b, 0x1, 20),
            gamma_update_en: VopReg::new(b, 0x1, 22),
            dsp_lut_en: VopReg::new(b, 0x1, 28),
            standby: VopReg::new(b, 0x1, 31),
            dclk_div2: VopReg::new(b + 0x0c, 0x1, 4),
            dclk_div2_phase_lock: VopReg::new(b + 0x0c, 0x1, 5),
            line_flag_num0: VopReg::new(b + 0x10, 0x1fff, 0),
            line_flag_num1: VopReg::new(b + 0x10, 0x1fff, 16),
            dsp_background: b + 0x14,
            pre_scan_htiming: b + 0x18,
            hpost_st_end: b + 0x1c,
            vpost_st_end: b + 0x20,
            post_scl_factor: b + 0x24,
            post_scl_ctrl: VopReg::new(b + 0x28, 0x3, 0),
            post_dsp_out_r2y: VopReg::new(b + 0x28, 0x1, 15),
            vpost_st_end_f1: b + 0x2c,
            htotal_pw: b + 0x30,
            hact_st_end: b + 0x34,
            vtotal_pw: b + 0x38,
            vact_st_end: b + 0x3c,
            vs_st_end_f1: b + 0x40,
            vact_st_end_f1: b + 0x44,
            cubic_lut_en: VopReg::new(b + 0x50, 0x1, 0),
            cubic_lut_update_en: VopReg::new(b + 0x50, 0x1, 2),
            cubic_lut_mst: b + 0x54,
            overlay_mode: VopReg::new(REG_OVL_CTRL, 0x1, id),
            bg_dly: VopReg::new(REG_BG_MIX_BASE + id as u32 * 4, 0xff, 24),
            bg_mix_ctrl: REG_BG_MIX_BASE + id as u32 * 4,
            layer_sel: if per_port_mixer { ovl + 0x04 } else { REG_OVL_LAYER_SEL },
            layer_mix_base: if per_port_mixer { ovl + 0x10 } else { REG_MIX0_BASE },
            hdr_mix_base: if per_port_mixer { ovl + 0x60 } else { REG_HDR_MIX_BASE },
            irq: IrqRegs::at(REG_VP_INT_BASE + id as u32 * 0x10),
            status: REG_SYS_STATUS0 + id as u32 * 4,
        }
    }
}

/// Static HDR10 engine (one instance, attached to the first port).
#[derive(Debug, Clone, Copy)]
pub struct HdrRegs {
    pub hdr10_en: VopReg,
    pub hdr_lut_mode: VopReg,
    pub hdr_lut_update_en: VopReg,
    pub hdr_lut_fetch_done: VopReg,
    pub lut_dma_rid: VopReg,
    pub hdr_lut_mst: VopReg,
    pub sdr2hdr_en: VopReg,
    pub sdr2hdr_path_en: VopReg,
    pub sdr2hdr_oetf_en: VopReg,
    pub sdr2hdr_eotf_en: VopReg,
    pub sdr2hdr_r2r_en: VopReg,
    pub sdr2hdr_r2r_mode: VopReg,
    pub sdr2hdr_bypass_en: VopReg,
    pub sdr2hdr_auto_gating_en: VopReg,
    pub hdr2sdr_en: VopReg,
    pub hdr2sdr_bypass_en: VopReg,
    pub hdr2sdr_src_min: VopReg,
    pub hdr2sdr_src_max: VopReg,
    pub hdr2sdr_normfaceetf: VopReg,
    pub hdr2sdr_dst_min: VopReg,
    pub hdr2sdr_dst_max: VopReg,
    pub hdr2sdr_normfacgamma: VopReg,
    pub hdr_vivid_en: VopReg,
    pub hdr_vivid_bypass_en: VopReg,
    pub hdr_vivid_path_mode: VopReg,
}

pub const HDR: HdrRegs = HdrRegs {
    hdr10_en: VopReg::new(REG_HDR_BASE, 0x1, 0),
    hdr_lut_mode: VopReg::new(REG_HDR_BASE, 0x1, 1),
    hdr_lut_update_en: VopReg::new(REG_HDR_BASE, 0x1, 2),
    hdr_lut_fetch_done: VopReg::new(REG_HDR_BASE, 0x1, 3),
    lut_dma_rid: VopReg::new(REG_HDR_BASE, 0xf, 4),
    hdr_lut_mst: VopReg::word(REG_HDR_BASE + 0x04),
    sdr2hdr_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 0),
    sdr2hdr_path_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 1),
    sdr2hdr_oetf_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 2),
    sdr2hdr_eotf_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 3),
    sdr2hdr_r2r_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 4),
    sdr2hdr_r2r_mode: VopReg::new(REG_HDR_BASE + 0x10, 0x3, 5),
    sdr2hdr_bypass_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 8),
    sdr2hdr_auto_gating_en: VopReg::new(REG_HDR_BASE + 0x10, 0x1, 9),
    hdr2sdr_en: VopReg::new(REG_HDR_BASE + 0x20, 0x1, 0),
    hdr2sdr_bypass_en: VopReg::new(REG_HDR_BASE + 0x20, 0x1, 1),
    hdr2sdr_src_min: VopReg::new(REG_HDR_BASE + 0x24, 0xffff, 0),
    hdr2sdr_src_max: VopReg::new(REG_HDR_BASE + 0x24, 0xffff, 16),
    hdr2sdr_normfaceetf: VopReg::new(REG_HDR_BASE + 0x28, 0x7ff, 0),
    hdr2sdr_dst_min: VopReg::new(REG_HDR_BASE + 0x2c, 0xffff, 0),
    hdr2sdr_dst_max: VopReg::new(REG_HDR_BASE + 0x2c, 0xffff, 16),
    hdr2sdr_normfacgamma: VopReg::new(REG_HDR_BASE + 0x30, 0xffff, 0),
    hdr_vivid_en: VopReg::new(REG_HDR_BASE + 0x34, 0x1, 0),
    hdr_vivid_bypass_en: VopReg::new(REG_HDR_BASE + 0x34, 0x1, 1),
    hdr_vivid_path_mode: VopReg::new(REG_HDR_BASE + 0x34, 0x7, 4),
};

/// Window registers relative to nothing: every field carries its absolute
/// offset. Fields a window does not implement are [`VopReg::NONE`].
#[derive(Debug, Clone, Copy)]
pub struct WinRegs {
    pub enable: VopReg,
    pub format: VopReg,
    pub y2r_en: VopReg,
    pub r2y_en: VopReg,
    pub csc_mode: VopReg,
    pub dither_up: VopReg,
    pub rb_swap: VopReg,
    pub uv_swap: VopReg,
    pub csc_13bit_en: VopReg,
    pub yuv_clip: VopReg,
    pub tile_mode: VopReg,
    pub scale_engine_num: VopReg,
    pub vsd_yrgb_gt2: VopReg,
    pub vsd_yrgb_gt4: VopReg,
    pub vsd_cbcr_gt2: VopReg,
    pub vsd_cbcr_gt4: VopReg,
    pub xgt_en: VopReg,
    pub xgt_mode: VopReg,
    pub xavg_en: VopReg,
    pub vsd_avg2: VopReg,
    pub vsd_avg4: VopReg,
    pub xmirror: VopReg,
    pub ymirror: VopReg,
    pub yrgb_hor_scl_mode: VopReg,
    pub yrgb_ver_scl_mode: VopReg,
    pub yrgb_hscl_filter_mode: VopReg,
    pub yrgb_vscl_filter_mode: VopReg,
    pub cbcr_hor_scl_mode: VopReg,
    pub cbcr_ver_scl_mode: VopReg,
    pub cbcr_hscl_filter_mode: VopReg,
    pub cbcr_vscl_filter_mode: VopReg,
    pub color_key: VopReg,
    pub color_key_en: VopReg,
    pub axi_id: VopReg,
    pub axi_yrgb_id: VopReg,
    pub axi_uv_id: VopReg,
    pub yrgb_mst: VopReg,
    pub uv_mst: VopReg,
    pub yrgb_vir: VopReg,
    pub uv_vir: VopReg,
    pub act_info: VopReg,
    pub dsp_info: VopReg,
    pub dsp_st: VopReg,
    pub scale_yrgb_x: VopReg,
    pub scale_yrgb_y: VopReg,
    pub scale_cbcr_x: VopReg,
    pub scale_cbcr_y: VopReg,
    pub transform_offset: VopReg,
}

impl WinRegs {
    pub const fn at(b: u32) -> Self {
        Self {
            enable: VopReg::new(b, 0x1, 0),
            format: VopReg::new(b, 0x1f, 1),
            y2r_en: VopReg::new(b, 0x1, 8),
            r2y_en: VopReg::new(b, 0x1, 9),
            csc_mode: VopReg::new(b, 0x7, 10),
            dither_up: VopReg::new(b, 0x1, 13),
            rb_swap: VopReg::new(b, 0x1, 14),
            uv_swap: VopReg::new(b, 0x1, 15),
            csc_13bit_en: VopReg::new(b, 0x1, 16),
            yuv_clip: VopReg::new(b, 0x1, 20),
            tile_mode: VopReg::new(b, 0x1, 24),
            scale_engine_num: VopReg::new(b, 0x3, 28),
            vsd_yrgb_gt2: VopReg::new(b + 0x04, 0x1, 0),
            vsd_yrgb_gt4: VopReg::new(b + 0x04, 0x1, 1),
            vsd_cbcr_gt2: VopReg::new(b + 0x04, 0x1, 2),
            vsd_cbcr_gt4: VopReg::new(b + 0x04, 0x1, 3),
            xgt_en: VopReg::new(b + 0x04, 0x1, 4),
            xgt_mode: VopReg::new(b + 0x04, 0x1, 5),
            xavg_en: VopReg::new(b + 0x04, 0x1, 6),
            vsd_avg2: VopReg::new(b + 0x04, 0x1, 7),
            vsd_avg4: VopReg::new(b + 0x04, 0x1, 8),
            xmirror: VopReg::new(b + 0x04, 0x1, 12),
            ymirror: VopReg::new(b + 0x04, 0x1, 13),
            yrgb_hor_scl_mode: VopReg::new(b + 0x04, 0x3, 16),
            yrgb_ver_scl_mode: VopReg::new(b + 0x04, 0x3, 18),
            yrgb_hscl_filter_mode: VopReg::new(b + 0x04, 0x3, 20),
            yrgb_vscl_filter_mode: VopReg::new(b + 0x04, 0x3, 22),
            cbcr_hor_scl_mode: VopReg::new(b + 0x04, 0x3, 24),
            cbcr_ver_scl_mode: VopReg::new(b + 0x04, 0x3, 26),
            cbcr_hscl_filter_mode: VopReg::new(b + 0x04, 0x3, 28),
            cbcr_vscl_filter_mode: VopReg::new(b + 0x04, 0x3, 30),
            color_key: VopReg::new(b + 0x08, 0x3fff_ffff, 0),
            color_key_en: VopReg::new(b + 0x08, 0x1, 31),
            axi_id: VopReg::new(b + 0x0c, 0x1, 0),
            axi_yrgb_id: VopReg::new(b + 0x0c, 0x1f, 8),
            axi_uv_id: VopReg::new(b + 0x0c, 0x1f, 16),
            yrgb_mst: VopReg::word(b + 0x10),
            uv_mst: VopReg::word(b + 0x14),
            yrgb_vir: VopReg::new(b + 0x18, 0xffff, 0),
            uv_vir: VopReg::new(b + 0x18, 0xffff, 16),
            act_info: VopReg::word(b + 0x20),
            dsp_info: VopReg::word(b + 0x24),
            dsp_st: VopReg::word(b + 0x28),
            scale_yrgb_x: VopReg::new(b + 0x30, 0xffff, 0),
            scale_yrgb_y: VopReg::new(b + 0x30, 0xffff, 16),
            scale_cbcr_x: VopReg::new(b + 0x34, 0xffff, 0),
            scale_cbcr_y: VopReg::new(b + 0x34, 0xffff, 16),
            transform_offset: VopReg::word(b + 0x3c),
        }
    }

    /// Sub-area of a multi-area window: only addressing and placement are
    /// per area, everything else is taken from the parent.
    pub const fn area(b: u32) -> Self {
        let n = VopReg::NONE;
        Self {
            enable: VopReg::new(b, 0x1, 0),
            format: n,
            y2r_en: n,
            r2y_en: n,
            csc_mode: n,
            dither_up: n,
            rb_swap: n,
            uv_swap: n,
            csc_13bit_en: n,
            yuv_clip: n,
            tile_mode: n,
            scale_engine_num: n,
            vsd_yrgb_gt2: n,
            vsd_yrgb_gt4: n,
            vsd_cbcr_gt2: n,
            vsd_cbcr_gt4: n,
            xgt_en: n,
            xgt_mode: n,
            xavg_en: n,
            vsd_avg2: n,
            vsd_avg4: n,
            xmirror: n,
            ymirror: n,
            yrgb_hor_scl_mode: n,
            yrgb_ver_scl_mode: n,
            yrgb_hscl_filter_mode: n,
            yrgb_vscl_filter_mode: n,
            cbcr_hor_scl_mode: n,
            cbcr_ver_scl_mode: n,
            cbcr_hscl_filter_mode: n,
            cbcr_vscl_filter_mode: n,
            color_key: n,
            color_key_en: n,
            axi_id: n,
            axi_yrgb_id: n,
            axi_uv_id: n,
            yrgb_mst: VopReg::word(b + 0x04),
            uv_mst: VopReg::word(b + 0x08),
            yrgb_vir: VopReg::new(b + 0x0c, 0xffff, 0),
            uv_vir: VopReg::new(b + 0x0c, 0xffff, 16),
            act_info: n,
            dsp_info: VopReg::word(b + 0x10),
            dsp_st: VopReg::word(b + 0x14),
            scale_yrgb_x: n,
            scale_yrgb_y: n,
            scale_cbcr_x: n,
            scale_cbcr_y: n,
            transform_offset: n,
        }
    }
}

/// AFBC decoder, present on cluster windows only.
#[derive(Debug, Clone, Copy)]
pub struct AfbcRegs {
    pub format: VopReg,
    pub half_block_en: VopReg,
    pub rb_swap: VopReg,
    pub uv_swap: VopReg,
    pub auto_gating_en: VopReg,
    pub block_split_en: VopReg,
    pub hdr_ptr: VopReg,
    pub pic_size: VopReg,
    pub pic_offset: VopReg,
    pub dsp_offset: VopReg,
    pub pic_vir_width: VopReg,
    pub tile_num: VopReg,
    pub rotate_90: VopReg,
    pub rotate_270: VopReg,
    pub xmirror: VopReg,
    pub ymirror: VopReg,
}

impl AfbcRegs {
    pub const NONE: AfbcRegs = Self::none();

    pub const fn at(b: u32) -> Self {
        let c = b + 0x40;
        Self {
            format: VopReg::new(c, 0x1f, 2),
            half_block_en: VopReg::new(c, 0x1, 7),
            rb_swap: VopReg::new(c, 0x1, 9),
            uv_swap: VopReg::new(c, 0x1, 10),
            auto_gating_en: VopReg::new(c, 0x1, 11),
            block_split_en: VopReg::new(c, 0x1, 12),
            hdr_ptr: VopReg::word(b + 0x44),
            pic_size: VopReg::word(b + 0x48),
            pic_offset: VopReg::word(b + 0x4c),
            dsp_offset: VopReg::word(b + 0x50),
            pic_vir_width: VopReg::new(b + 0x54, 0xffff, 0),
            tile_num: VopReg::new(b + 0x54, 0xffff, 16),
            rotate_90: VopReg::new(b + 0x5c, 0x1, 0),
            rotate_270: VopReg::new(b + 0x5c, 0x1, 1),
            xmirror: VopReg::new(b + 0x5c, 0x1, 2),
            ymirror: VopReg::new(b + 0x5c, 0x1, 3),
        }
    }

    const fn none() -> Self {
        let n = VopReg::NONE;
        Self {
            format: n,
            half_block_en: n,
            rb_swap: n,
            uv_swap: n,
            auto_gating_en: n,
            block_split_en: n,
            hdr_ptr: n,
            pic_size: n,
            pic_offset: n,
            dsp_offset: n,
            pic_vir_width: n,
            tile_num: n,
            rotate_90: n,
            rotate_270: n,
            xmirror: n,
            ymirror: n,
        }
    }
}

/// Cluster level controls shared by the main and sub window.
#[derive(Debug, Clone, Copy)]
pub struct ClusterRegs {
    pub enable: VopReg,
    pub afbc_enable: VopReg,
    pub lb_mode: VopReg,
    pub scl_lb_mode: VopReg,
    pub frm_reset_en: VopReg,
    /// Main/sub pre-blend stage, 0 when absent.
    pub mix_base: u32,
}

impl ClusterRegs {
    pub const NONE: ClusterRegs = ClusterRegs {
        enable: VopReg::NONE,
        afbc_enable: VopReg::NONE,
        lb_mode: VopReg::NONE,
        scl_lb_mode: VopReg::NONE,
        frm_reset_en: VopReg::NONE,
        mix_base: 0,
    };

    pub const fn at(cluster_base: u32) -> Self {
        let c = cluster_base + 0x100;
        Self {
            enable: VopReg::new(c, 0x1, 0),
            afbc_enable: VopReg::new(c, 0x1, 1),
            lb_mode: VopReg::new(c, 0xf, 4),
            scl_lb_mode: VopReg::new(c, 0x3, 8),
            frm_reset_en: VopReg::new(c, 0x1, 12),
            mix_base: REG_CLUSTER_MIX_BASE + ((cluster_base - 0x1000) / 0x200) * 0x10,
        }
    }
}

pub const SYS: SysRegs = SysRegs {
    cfg_done_en: VopReg::new(REG_SYS_CTRL, 0x1, 0),
    auto_gating_en: VopReg::new(REG_SYS_CTRL, 0x1, 31),
    aclk_pre_auto_gating_en: VopReg::new(REG_SYS_CTRL, 0x1, 30),
    dma_stop: VopReg::new(REG_SYS_CTRL, 0x1, 1),
    if_ctrl_cfg_done_imd: VopReg::new(REG_SYS_CTRL, 0x1, 29),
    dsp_vs_t_sel: VopReg::new(REG_SYS_CTRL1, 0x1, 0),
    esmart_lb_mode: VopReg::new(REG_SYS_CTRL1, 0x3, 4),
    init_clear: VopReg::NONE,
    lut_dma_en: VopReg::new(REG_SYS_CTRL, 0x1, 2),
    gamma_port_sel: VopReg::new(REG_LUT_PORT_SEL, 0x3, 12),
    axi_irq: IrqRegs::at(REG_SYS_INT_EN),
};

pub const OVL: OvlRegs = OvlRegs {
    port_mux: VopReg::new(REG_OVL_PORT_SEL, 0xffff, 0),
    ovl_cfg_done_port: VopReg::new(REG_OVL_CTRL, 0x3, 28),
    ovl_port_mux_cfg_done_imd: VopReg::new(REG_OVL_CTRL, 0x1, 31),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vp_blocks_do_not_overlap() {
        let a = VpRegs::new(0, false);
        let b = VpRegs::new(1, false);
        assert!(a.vact_st_end_f1 < b.out_mode.offset);
        assert_eq!(b.irq.enable, REG_VP_INT_BASE + 0x10);
        assert_eq!(a.layer_sel, REG_OVL_LAYER_SEL);
        assert_eq!(VpRegs::new(1, true).layer_sel, REG_PORT_OVL_BASE + 0x104);
    }

    #[test]
    fn test_output_if_slot_packing() {
        let s = OutputIfRegs::slot(9);
        assert_eq!(s.en.shift, 9);
        assert_eq!(s.mux.offset, REG_DSP_IF_MUX + 4);
        assert_eq!(s.mux.shift, 4);
        assert_eq!(s.dclk_pol.shift, 7);
    }

    #[test]
    fn test_area_regs_fall_back() {
        let a = WinRegs::area(0x1d00);
        assert!(a.enable.exists());
        assert!(!a.format.exists());
        assert_eq!(a.dsp_st.offset, 0x1d14);
    }

    #[test]
    fn test_win_vp_id_fields() {
        assert_eq!(OvlRegs::win_vp_id(0).shift, 16);
        assert_eq!(OvlRegs::win_vp_id(7).shift, 30);
    }
}
