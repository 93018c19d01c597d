//! HDR paths and pipeline delay alignment
//!
//! VOP2 ports with an HDR10 engine convert the bottom layer HDR to SDR
//! (or lift SDR layers to HDR) before the mixer. The VOP3 vivid engine
//! does the same with dynamic metadata and a DMA fed tone LUT.
//!
//! Every path has its own latency, so window and background delays are
//! set per commit to make all layers reach the mixer on the same cycle.

use super::crtc::DisplayMode;
use super::csc::Eotf;
use super::layout::{
    OvlRegs, HDR, HDR2SDR_EETF_OETF_Y0, HDR2SDR_SAT_Y0, SDR2HDR_EOTF_OETF_Y0, SDR2HDR_OETF_DX_POW1,
    SDR2HDR_OETF_XN1, VIVID_HDRGAMMA_CURVE, VIVID_HDRGAMMA_MDFVALUE, VIVID_HDRVIVID_CTRL,
    VIVID_HDR_CSC_COE, VIVID_HDR_PQ_GAMMA, VIVID_HLG_MAXLUMA, VIVID_HLG_RFIX_SCALEFAC,
    VIVID_HLG_R_TM_LIN2NON, VIVID_SDR2HDR_CTRL, VIVID_SDRINVGAMMA_CHANGEIDX, VIVID_SDRINVGAMMA_CURVE,
    VIVID_SDRINVGAMMA_STARTIDX, VIVID_SDR_CFG_COE0, VIVID_SDR_CFG_COE1, VIVID_SDR_CSC_COE, VIVID_SDR_SMGAIN,
};
use super::profile::{DlyMode, HardwareProfile, PortDesc, WindowDesc};
use super::regs::RegisterFile;
use super::DmaBuffer;
use crate::sync::poll_timeout;
use crate::util::{Vop2Error, Vop2Result, WaitKind};

/// Number of vivid modes that carry a pipeline latency.
pub const VIVID_MODES: usize = 10;

pub const EETF_POINTS: usize = 33;
pub const SAT_POINTS: usize = 9;
pub const SDR2HDR_EOTF_POINTS: usize = 65;
pub const SDR2HDR_OETF_DX_POINTS: usize = 64;
pub const SDR2HDR_OETF_XN_POINTS: usize = 63;

pub const TONE_LUT_LEN: usize = 264;
pub const HDRGAMMA_CURVE_LEN: usize = 81;
pub const HDRGAMMA_MDF_LEN: usize = 9;
pub const SDRINVGAMMA_CURVE_LEN: usize = 69;
pub const SDRINVGAMMA_IDX_LEN: usize = 6;
pub const SDR_SMGAIN_LEN: usize = 64;

// hdr_lut_mode
const HDR_LUT_MODE_AHB: u32 = 0;
const HDR_LUT_MODE_DMA: u32 = 1;
// sdr2hdr_r2r_mode
const BT709_TO_BT2020: u32 = 0;

const LUT_FETCH_TIMEOUT_US: u32 = 50_000;
const LUT_FETCH_STEP_US: u32 = 100;

/// Which transfer the SDR to HDR curves target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sdr2HdrTf {
    Bt2020 = 0,
    Hdr = 1,
    HlgHdr = 2,
}

/// One SDR to HDR curve set: BT1886 EOTF and ST2084 OETF samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdr2HdrCurve {
    pub eotf_yn: [u32; SDR2HDR_EOTF_POINTS],
    pub oetf_yn: [u32; SDR2HDR_EOTF_POINTS],
}

/// Static HDR10 coefficient tables of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdrTable {
    pub hdr2sdr_eetf_yn: [u16; EETF_POINTS],
    pub hdr2sdr_bt1886oetf_yn: [u16; EETF_POINTS],
    pub hdr2sdr_sat_yn: [u32; SAT_POINTS],
    pub hdr2sdr_src_range_min: u32,
    pub hdr2sdr_src_range_max: u32,
    pub hdr2sdr_normfaceetf: u32,
    pub hdr2sdr_dst_range_min: u32,
    pub hdr2sdr_dst_range_max: u32,
    pub hdr2sdr_normfacgamma: u32,
    /// Indexed by [`Sdr2HdrTf`].
    pub sdr2hdr: [Sdr2HdrCurve; 3],
    pub sdr2hdr_oetf_dxn: [u16; SDR2HDR_OETF_DX_POINTS],
    pub sdr2hdr_oetf_dxn_pow2: [u16; SDR2HDR_OETF_DX_POINTS],
    pub sdr2hdr_oetf_xn: [u32; SDR2HDR_OETF_XN_POINTS],
}

impl HdrTable {
    /// Monotonic integer ramps covering each field's full range. Boards
    /// with tuned curves replace the table in their profile.
    pub fn generated() -> Self {
        let ramp16 = |i: usize, n: usize, max: u32| (i as u32 * max / (n as u32 - 1)) as u16;

        let mut eetf = [0u16; EETF_POINTS];
        let mut oetf = [0u16; EETF_POINTS];
        for i in 0..EETF_POINTS {
            eetf[i] = ramp16(i, EETF_POINTS, 0xffff);
            oetf[i] = ramp16(i, EETF_POINTS, 0xffff);
        }

        let curve = |gain: u32| {
            let mut c = Sdr2HdrCurve { eotf_yn: [0; SDR2HDR_EOTF_POINTS], oetf_yn: [0; SDR2HDR_EOTF_POINTS] };
            for i in 0..SDR2HDR_EOTF_POINTS {
                // eotf is 18 bits wide, oetf 14
                c.eotf_yn[i] = i as u32 * 0x3ffff / (SDR2HDR_EOTF_POINTS as u32 - 1);
                c.oetf_yn[i] = i as u32 * gain / (SDR2HDR_EOTF_POINTS as u32 - 1);
            }
            c
        };

        let mut dxn = [0u16; SDR2HDR_OETF_DX_POINTS];
        let mut dxn_pow2 = [0u16; SDR2HDR_OETF_DX_POINTS];
        for i in 0..SDR2HDR_OETF_DX_POINTS {
            dxn[i] = 1 << (i / 4).min(15);
            dxn_pow2[i] = (i / 4).min(15) as u16;
        }
        let mut xn = [0u32; SDR2HDR_OETF_XN_POINTS];
        let mut x = 0u32;
        for i in 0..SDR2HDR_OETF_XN_POINTS {
            x += dxn[i] as u32;
            xn[i] = x;
        }

        Self {
            hdr2sdr_eetf_yn: eetf,
            hdr2sdr_bt1886oetf_yn: oetf,
            hdr2sdr_sat_yn: [1 << 10; SAT_POINTS],
            hdr2sdr_src_range_min: 0,
            hdr2sdr_src_range_max: 0xffff,
            hdr2sdr_normfaceetf: 0x400,
            hdr2sdr_dst_range_min: 0,
            hdr2sdr_dst_range_max: 0xffff,
            hdr2sdr_normfacgamma: 0x400,
            sdr2hdr: [curve(0x2000), curve(0x3fff), curve(0x2800)],
            sdr2hdr_oetf_dxn: dxn,
            sdr2hdr_oetf_dxn_pow2: dxn_pow2,
            sdr2hdr_oetf_xn: xn,
        }
    }
}

/// Vivid engine modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VividMode {
    PqHdr2HdrWithDynamic = 0,
    PqHdr2SdrWithDynamic = 1,
    Hlg2HdrWithDynamic = 2,
    Hlg2SdrWithDynamic = 3,
    Hlg2HdrWithoutDynamic = 4,
    Hlg2SdrWithoutDynamic = 5,
    HdrBypass = 6,
    Hdr102Sdr = 7,
    Sdr2Hdr10 = 8,
    Sdr2Hlg = 9,
}

impl VividMode {
    /// Accepts the engine range plus the two SDR aliases user space uses.
    pub fn from_raw(raw: u32) -> Option<Self> {
        use VividMode::*;
        Some(match raw {
            0 => PqHdr2HdrWithDynamic,
            1 => PqHdr2SdrWithDynamic,
            2 => Hlg2HdrWithDynamic,
            3 => Hlg2SdrWithDynamic,
            4 => Hlg2HdrWithoutDynamic,
            5 => Hlg2SdrWithoutDynamic,
            6 => HdrBypass,
            7 => Hdr102Sdr,
            8 | 10 => Sdr2Hdr10,
            9 | 11 => Sdr2Hlg,
            _ => return None,
        })
    }

    /// Takes HDR input (as opposed to lifting SDR).
    pub fn hdr_input(self) -> bool {
        self <= VividMode::Hdr102Sdr
    }

    pub fn to_sdr(self) -> bool {
        matches!(
            self,
            VividMode::PqHdr2SdrWithDynamic
                | VividMode::Hlg2SdrWithDynamic
                | VividMode::Hlg2SdrWithoutDynamic
                | VividMode::Hdr102Sdr
        )
    }
}

/// Metadata class carried with a vivid commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrFormat {
    None,
    Hdr10,
    HlgStatic,
    HdrVivid,
    Other(u32),
}

/// Dynamic HDR parameters for one commit, as produced by the metadata parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VividHdrConfig {
    pub format: HdrFormat,
    /// Raw mode, validated on use.
    pub mode: u32,
    pub sdr2hdr_ctrl: u32,
    pub hdrvivid_ctrl: u32,
    pub sdr2hdr_coe: [u32; 2],
    pub sdr2hdr_csc: [u32; 5],
    pub hdr_pq_gamma: u32,
    pub hlg_rfix_scalefac: u32,
    pub hlg_maxluma: u32,
    pub hlg_r_tm_lin2non: u32,
    pub hdr_csc: [u32; 5],
    pub tone_sca_axi_tab: [u32; TONE_LUT_LEN],
    pub hdrgamma_curve: [u32; HDRGAMMA_CURVE_LEN],
    pub hdrgamma_mdfvalue: [u32; HDRGAMMA_MDF_LEN],
    pub sdrinvgamma_curve: [u32; SDRINVGAMMA_CURVE_LEN],
    pub sdrinvgamma_startidx: [u32; SDRINVGAMMA_IDX_LEN],
    pub sdrinvgamma_changeidx: [u32; SDRINVGAMMA_IDX_LEN],
    pub sdr_smgain: [u32; SDR_SMGAIN_LEN],
}

impl VividHdrConfig {
    pub fn new(format: HdrFormat, mode: u32) -> Self {
        Self {
            format,
            mode,
            sdr2hdr_ctrl: 0,
            hdrvivid_ctrl: 0,
            sdr2hdr_coe: [0; 2],
            sdr2hdr_csc: [0; 5],
            hdr_pq_gamma: 0,
            hlg_rfix_scalefac: 0,
            hlg_maxluma: 0,
            hlg_r_tm_lin2non: 0,
            hdr_csc: [0; 5],
            tone_sca_axi_tab: [0; TONE_LUT_LEN],
            hdrgamma_curve: [0; HDRGAMMA_CURVE_LEN],
            hdrgamma_mdfvalue: [0; HDRGAMMA_MDF_LEN],
            sdrinvgamma_curve: [0; SDRINVGAMMA_CURVE_LEN],
            sdrinvgamma_startidx: [0; SDRINVGAMMA_IDX_LEN],
            sdrinvgamma_changeidx: [0; SDRINVGAMMA_IDX_LEN],
            sdr_smgain: [0; SDR_SMGAIN_LEN],
        }
    }
}

/// HDR state of one port, recomputed on every commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortHdr {
    pub hdr_en: bool,
    pub hdr_in: bool,
    pub hdr_out: bool,
    pub sdr2hdr_en: bool,
    pub vivid_mode: Option<VividMode>,
    /// Coefficient RAM holds the current mode's curves.
    pub hdr2sdr_loaded: bool,
    pub sdr2hdr_loaded: bool,
}

impl PortHdr {
    /// Drops per-commit decisions, keeps what is loaded in RAM.
    fn reset(&mut self) {
        self.hdr_en = false;
        self.hdr_in = false;
        self.hdr_out = false;
        self.sdr2hdr_en = false;
    }

    /// Called on mode change: tone curves are reloaded on next use.
    pub fn invalidate_tables(&mut self) {
        self.hdr2sdr_loaded = false;
        self.sdr2hdr_loaded = false;
    }
}

/// HDR flags of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneHdr {
    pub hdr_in: bool,
    pub hdr2sdr: bool,
}

/// What the port must apply after an HDR setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrOutcome {
    /// Flags for the bottom window.
    pub bottom: PlaneHdr,
    /// HDR conversions blend in RGB.
    pub force_rgb_overlay: bool,
}

fn load_hdr2sdr_table(regs: &RegisterFile, table: &HdrTable) {
    for i in 0..EETF_POINTS {
        let v = table.hdr2sdr_eetf_yn[i] as u32 | (table.hdr2sdr_bt1886oetf_yn[i] as u32) << 16;
        regs.write(HDR2SDR_EETF_OETF_Y0 + i as u32 * 4, v);
    }
    for (i, &v) in table.hdr2sdr_sat_yn.iter().enumerate() {
        regs.write(HDR2SDR_SAT_Y0 + i as u32 * 4, v);
    }
}

fn load_sdr2hdr_table(regs: &RegisterFile, table: &HdrTable, tf: Sdr2HdrTf) {
    let curve = &table.sdr2hdr[tf as usize];
    for i in 0..SDR2HDR_EOTF_POINTS {
        regs.write(SDR2HDR_EOTF_OETF_Y0 + i as u32 * 4, curve.eotf_yn[i] + (curve.oetf_yn[i] << 18));
    }
    for i in 0..SDR2HDR_OETF_DX_POINTS {
        let v = table.sdr2hdr_oetf_dxn[i] as u32 | (table.sdr2hdr_oetf_dxn_pow2[i] as u32) << 16;
        regs.write(SDR2HDR_OETF_DX_POW1 + i as u32 * 4, v);
    }
    for (i, &v) in table.sdr2hdr_oetf_xn.iter().enumerate() {
        regs.write(SDR2HDR_OETF_XN1 + i as u32 * 4, v);
    }
}

/// Static HDR10 setup of a VOP2 port.
///
/// Only the bottom layer can run HDR to SDR. When the sink wants HDR,
/// every SDR layer is lifted so the mixer blends in one color volume.
/// `layer_eotfs` holds the transfer of every active window on the port.
/// Returns `None` when the port has no HDR engine.
pub fn setup_hdr10(
    regs: &RegisterFile,
    desc: &PortDesc,
    hdr: &mut PortHdr,
    bottom: Eotf,
    out: Eotf,
    layer_eotfs: &[Eotf],
) -> Option<HdrOutcome> {
    let table = desc.hdr_table.as_deref()?;

    let hdr_en = bottom == Eotf::St2084;
    hdr.hdr_en = hdr_en;
    hdr.hdr_in = hdr_en;
    hdr.hdr_out = out == Eotf::St2084;
    let hdr2sdr = hdr.hdr_in && !hdr.hdr_out;

    let have_sdr_layer = layer_eotfs.iter().any(|&e| e != Eotf::St2084);
    let sdr2hdr = have_sdr_layer && hdr.hdr_out;
    hdr.sdr2hdr_en = sdr2hdr;

    regs.write_bool(HDR.hdr10_en, hdr_en);
    let force_rgb_overlay = hdr2sdr || sdr2hdr;
    if force_rgb_overlay {
        regs.write_field(HDR.hdr_lut_mode, HDR_LUT_MODE_AHB);
    }

    if hdr2sdr {
        if !hdr.hdr2sdr_loaded {
            load_hdr2sdr_table(regs, table);
            hdr.hdr2sdr_loaded = true;
        }
        regs.write_field(HDR.hdr2sdr_src_min, table.hdr2sdr_src_range_min);
        regs.write_field(HDR.hdr2sdr_src_max, table.hdr2sdr_src_range_max);
        regs.write_field(HDR.hdr2sdr_normfaceetf, table.hdr2sdr_normfaceetf);
        regs.write_field(HDR.hdr2sdr_dst_min, table.hdr2sdr_dst_range_min);
        regs.write_field(HDR.hdr2sdr_dst_max, table.hdr2sdr_dst_range_max);
        regs.write_field(HDR.hdr2sdr_normfacgamma, table.hdr2sdr_normfacgamma);
    }
    regs.write_bool(HDR.hdr2sdr_en, hdr2sdr);
    regs.write_bool(HDR.hdr2sdr_bypass_en, !hdr2sdr);

    if sdr2hdr {
        if !hdr.sdr2hdr_loaded {
            load_sdr2hdr_table(regs, table, Sdr2HdrTf::Hdr);
            hdr.sdr2hdr_loaded = true;
        }
        regs.write_field(HDR.sdr2hdr_r2r_mode, BT709_TO_BT2020);
    }
    regs.write_bool(HDR.sdr2hdr_path_en, sdr2hdr);
    regs.write_bool(HDR.sdr2hdr_oetf_en, sdr2hdr);
    regs.write_bool(HDR.sdr2hdr_eotf_en, sdr2hdr);
    regs.write_bool(HDR.sdr2hdr_r2r_en, sdr2hdr);
    regs.write_bool(HDR.sdr2hdr_bypass_en, !sdr2hdr);

    Some(HdrOutcome { bottom: PlaneHdr { hdr_in: hdr_en, hdr2sdr }, force_rgb_overlay })
}

/// Turns the vivid engine off when a commit carries no metadata.
pub fn disable_dynamic_hdr(regs: &RegisterFile, hdr: &mut PortHdr) {
    regs.write_bool(HDR.hdr10_en, false);
    regs.write_bool(HDR.hdr_vivid_en, false);
    regs.write_bool(HDR.hdr_vivid_bypass_en, false);
    regs.write_bool(HDR.hdr_lut_update_en, false);
    regs.write_bool(HDR.sdr2hdr_en, false);
    regs.write_bool(HDR.sdr2hdr_path_en, false);
    regs.write_bool(HDR.sdr2hdr_auto_gating_en, true);
    hdr.reset();
    hdr.vivid_mode = None;
}

/// Vivid HDR setup of a VOP3 port.
///
/// `bottom` is the transfer of the bottom window, `layer_eotfs` that of
/// every active window on the port. `None` metadata turns the engine off.
/// Invalid modes leave the registers untouched and come back as errors.
#[allow(clippy::too_many_arguments)]
pub fn setup_dynamic_hdr(
    regs: &RegisterFile,
    desc: &PortDesc,
    hdr: &mut PortHdr,
    cfg: Option<&VividHdrConfig>,
    bottom: Eotf,
    layer_eotfs: &[Eotf],
    lut: Option<&dyn DmaBuffer>,
    delay: &mut dyn FnMut(u32),
) -> Vop2Result<HdrOutcome> {
    let Some(cfg) = cfg else {
        disable_dynamic_hdr(regs, hdr);
        return Ok(HdrOutcome::default());
    };
    if let HdrFormat::Other(f) = cfg.format {
        log::debug!("vop2: vp{} unsupported hdr format {}", desc.id, f);
        return Ok(HdrOutcome::default());
    }

    hdr.reset();
    let mode = match VividMode::from_raw(cfg.mode) {
        Some(m) => m,
        None => {
            log::error!("vop2: vp{} invalid hdr mode {}, beyond the mode range", desc.id, cfg.mode);
            return Err(Vop2Error::InvalidVividMode(cfg.mode));
        }
    };
    if mode.hdr_input() && !bottom.is_hdr() {
        log::error!("vop2: vp{} invalid hdr mode {:?}, mismatch plane eotf {:?}", desc.id, mode, bottom);
        return Err(Vop2Error::HdrInputNotHdr(cfg.mode));
    }
    let Some(lut) = lut else {
        log::error!("vop2: vp{} no tone lut buffer", desc.id);
        return Err(Vop2Error::DmaBufferMissing);
    };

    hdr.vivid_mode = Some(mode);
    let mut bottom_hdr = PlaneHdr::default();
    if mode.hdr_input() {
        hdr.hdr_en = true;
        hdr.hdr_in = true;
        bottom_hdr.hdr_in = true;
    } else {
        hdr.sdr2hdr_en = true;
    }

    let have_sdr_layer = layer_eotfs.iter().any(|e| !e.is_hdr());
    if mode.to_sdr() {
        bottom_hdr.hdr2sdr = true;
    } else {
        hdr.hdr_out = true;
        if have_sdr_layer {
            hdr.sdr2hdr_en = true;
        }
    }

    regs.write(VIVID_SDR2HDR_CTRL, cfg.sdr2hdr_ctrl);
    regs.write(VIVID_HDRVIVID_CTRL, cfg.hdrvivid_ctrl);

    regs.write_bool(HDR.hdr10_en, hdr.hdr_en);
    if hdr.hdr_en {
        let path = if mode == VividMode::Hdr102Sdr { VividMode::PqHdr2SdrWithDynamic } else { mode };
        regs.write_bool(HDR.hdr_vivid_en, mode != VividMode::HdrBypass);
        regs.write_field(HDR.hdr_vivid_path_mode, path as u32);
        regs.write_bool(HDR.hdr_vivid_bypass_en, mode == VividMode::HdrBypass);
    } else {
        regs.write_bool(HDR.hdr_vivid_en, false);
    }
    regs.write_bool(HDR.sdr2hdr_en, hdr.sdr2hdr_en);
    regs.write_bool(HDR.sdr2hdr_path_en, hdr.sdr2hdr_en);
    regs.write_bool(HDR.sdr2hdr_auto_gating_en, !hdr.sdr2hdr_en);

    regs.write(VIVID_SDR_CFG_COE0, cfg.sdr2hdr_coe[0]);
    regs.write(VIVID_SDR_CFG_COE1, cfg.sdr2hdr_coe[1]);
    write_words(regs, VIVID_SDR_CSC_COE, &cfg.sdr2hdr_csc);
    regs.write(VIVID_HDR_PQ_GAMMA, cfg.hdr_pq_gamma);
    regs.write(VIVID_HLG_RFIX_SCALEFAC, cfg.hlg_rfix_scalefac);
    regs.write(VIVID_HLG_MAXLUMA, cfg.hlg_maxluma);
    regs.write(VIVID_HLG_R_TM_LIN2NON, cfg.hlg_r_tm_lin2non);
    write_words(regs, VIVID_HDR_CSC_COE, &cfg.hdr_csc);

    // the engine may still be fetching the previous table
    if regs.shadow_field(HDR.hdr_lut_update_en) != 0 {
        let fetched = poll_timeout(LUT_FETCH_TIMEOUT_US, LUT_FETCH_STEP_US, delay, || {
            regs.read_field(HDR.hdr_lut_fetch_done) != 0
        });
        if !fetched {
            log::warn!("vop2: vp{} {:?} timeout", desc.id, WaitKind::HdrLutFetch);
        }
    }
    lut.write_words(0, &cfg.tone_sca_axi_tab);
    regs.write_field(HDR.lut_dma_rid, desc.lut_dma_rid.wrapping_sub(desc.id as u32));
    regs.write_field(HDR.hdr_lut_mode, HDR_LUT_MODE_DMA);
    regs.write_field(HDR.hdr_lut_mst, lut.dma_addr());
    regs.write_bool(HDR.hdr_lut_update_en, true);

    write_words(regs, VIVID_HDRGAMMA_CURVE, &cfg.hdrgamma_curve);
    write_words(regs, VIVID_HDRGAMMA_MDFVALUE, &cfg.hdrgamma_mdfvalue);
    write_words(regs, VIVID_SDRINVGAMMA_CURVE, &cfg.sdrinvgamma_curve);
    write_words(regs, VIVID_SDRINVGAMMA_STARTIDX, &cfg.sdrinvgamma_startidx);
    write_words(regs, VIVID_SDRINVGAMMA_CHANGEIDX, &cfg.sdrinvgamma_changeidx);
    write_words(regs, VIVID_SDR_SMGAIN, &cfg.sdr_smgain);

    Ok(HdrOutcome { bottom: bottom_hdr, force_rgb_overlay: true })
}

fn write_words(regs: &RegisterFile, base: u32, words: &[u32]) {
    for (i, &w) in words.iter().enumerate() {
        regs.write(base + i as u32 * 4, w);
    }
}

/// Background and pre-scan delay of a VOP2 port. The HDR window is the
/// slowest path and never moves with the port mux, so the background is
/// delayed to meet it.
pub fn setup_dly_for_vp(
    regs: &RegisterFile,
    profile: &HardwareProfile,
    desc: &PortDesc,
    hdr: &PortHdr,
    bg_ovl_dly: u32,
    mode: &DisplayMode,
) {
    let d = &desc.pre_scan_max_dly;
    let mut bg_dly = d[0];
    if desc.hdr_table.is_some() {
        bg_dly = match (hdr.hdr_in, hdr.hdr_out) {
            (true, true) => d[2],
            (true, false) => d[0],
            (false, true) => d[1],
            (false, false) => d[3],
        };
    }
    if !hdr.hdr_in {
        bg_dly = bg_dly.saturating_sub(bg_ovl_dly);
    }

    let hsync_len = mode.hsync_len().max(profile.quirks.min_prescan_hsync);
    let pre_scan = (bg_dly + (mode.hdisplay >> 1) - 1) << 16 | hsync_len;
    regs.write_field(desc.regs.bg_dly, bg_dly);
    regs.write(desc.regs.pre_scan_htiming, pre_scan);
}

/// Delay for one window on a VOP2 port.
pub fn window_dly(win: &WindowDesc, hdr: &PortHdr, plane: PlaneHdr, bg_ovl_dly: u32) -> u32 {
    let dly = if hdr.hdr_in && !hdr.hdr_out && !plane.hdr_in {
        win.dly[DlyMode::HisoS as usize] + bg_ovl_dly
    } else if hdr.hdr_in && hdr.hdr_out && plane.hdr_in {
        win.dly[DlyMode::HihoH as usize].saturating_sub(bg_ovl_dly)
    } else {
        win.dly[DlyMode::Default as usize]
    };
    cluster_dly(win, dly)
}

/// Clusters carry the delay for both their windows.
fn cluster_dly(win: &WindowDesc, dly: u32) -> u32 {
    if win.is_cluster() {
        dly | dly << 8
    } else {
        dly
    }
}

/// Writes each window's delay. `stack` pairs arena index and plane flags.
pub fn setup_dly_for_windows(
    regs: &RegisterFile,
    profile: &HardwareProfile,
    hdr: &PortHdr,
    bg_ovl_dly: u32,
    stack: &[(usize, PlaneHdr)],
) {
    for &(idx, plane) in stack {
        let win = &profile.windows[idx];
        regs.write(OvlRegs::win_dly(win.phys_id), window_dly(win, hdr, plane, bg_ovl_dly));
    }
}

/// Delays of a VOP3 port.
///
/// The HDR layer runs win, vivid and hdr mix; SDR layers run win, layer
/// mix, an optional SDR to HDR lift and hdr mix. Whichever path is
/// shorter gets the difference as extra window delay, the background
/// waits for the longer one.
pub fn vop3_pipe_dly(
    regs: &RegisterFile,
    profile: &HardwareProfile,
    desc: &PortDesc,
    hdr: &PortHdr,
    mode: &DisplayMode,
    stack: Option<&[(usize, PlaneHdr)]>,
) {
    let vivid = hdr.vivid_mode.filter(|_| hdr.hdr_en || hdr.sdr2hdr_en);
    let (bg_dly, hdr_win_dly, sdr_win_dly) = match vivid {
        Some(m) => {
            let sdr2hdr_dly = if hdr.sdr2hdr_en { desc.sdr2hdr_dly } else { 0 };
            let vivid_dly = desc.hdrvivid_dly[m as usize];
            let sdr_path = sdr2hdr_dly + desc.layer_mix_dly;
            if vivid_dly >= sdr_path {
                (desc.win_dly + vivid_dly + desc.hdr_mix_dly, 0, vivid_dly - sdr_path)
            } else {
                (desc.win_dly + sdr_path + desc.hdr_mix_dly, sdr_path - vivid_dly, 0)
            }
        }
        None => (desc.win_dly + desc.layer_mix_dly + desc.hdr_mix_dly, 0, 0),
    };

    let pre_scan = (bg_dly + (mode.hdisplay >> 1) - 1) << 16 | mode.hsync_len();
    regs.write_field(desc.regs.bg_dly, bg_dly);
    regs.write(desc.regs.pre_scan_htiming, pre_scan);

    let Some(stack) = stack else {
        return;
    };
    for &(idx, plane) in stack {
        let win = &profile.windows[idx];
        let dly = match vivid {
            Some(_) if plane.hdr_in => hdr_win_dly,
            _ => sdr_win_dly,
        };
        regs.write(OvlRegs::win_dly(win.phys_id), cluster_dly(win, dly));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vop2::layout::REG_WINDOW_LEN;
    use crate::drivers::vop2::testing::{mode_1080p, FakeDma, FakeRegs};
    use alloc::boxed::Box;

    fn setup() -> (RegisterFile, FakeRegs) {
        let fake = FakeRegs::new();
        (RegisterFile::new(Box::new(fake.clone()), REG_WINDOW_LEN), fake)
    }

    #[test]
    fn test_generated_table_is_monotonic() {
        let t = HdrTable::generated();
        assert!(t.hdr2sdr_eetf_yn.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(t.hdr2sdr_eetf_yn[EETF_POINTS - 1], 0xffff);
        assert!(t.sdr2hdr[1].eotf_yn.iter().all(|&v| v < 1 << 18));
        assert!(t.sdr2hdr_oetf_xn.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_hdr10_pq_on_sdr_sink_runs_hdr2sdr() {
        let (regs, fake) = setup();
        let p = HardwareProfile::rk3568();
        let mut hdr = PortHdr::default();
        let out = setup_hdr10(&regs, &p.ports[0], &mut hdr, Eotf::St2084, Eotf::Sdr, &[Eotf::St2084, Eotf::Sdr])
            .unwrap();
        assert!(hdr.hdr_en && hdr.hdr_in && !hdr.hdr_out && !hdr.sdr2hdr_en);
        assert_eq!(out.bottom, PlaneHdr { hdr_in: true, hdr2sdr: true });
        assert!(out.force_rgb_overlay);
        assert_eq!(regs.shadow_field(HDR.hdr2sdr_en), 1);
        assert_eq!(regs.shadow_field(HDR.sdr2hdr_bypass_en), 1);
        let t = p.ports[0].hdr_table.as_deref().unwrap();
        let w0 = t.hdr2sdr_eetf_yn[1] as u32 | (t.hdr2sdr_bt1886oetf_yn[1] as u32) << 16;
        assert_eq!(fake.get(HDR2SDR_EETF_OETF_Y0 + 4), w0);
        assert!(hdr.hdr2sdr_loaded);
    }

    #[test]
    fn test_hdr10_tables_load_once_per_mode() {
        let (regs, fake) = setup();
        let p = HardwareProfile::rk3568();
        let mut hdr = PortHdr::default();
        setup_hdr10(&regs, &p.ports[0], &mut hdr, Eotf::Sdr, Eotf::St2084, &[Eotf::Sdr]);
        assert!(hdr.sdr2hdr_en && hdr.sdr2hdr_loaded);
        let writes = fake.writes().len();
        setup_hdr10(&regs, &p.ports[0], &mut hdr, Eotf::Sdr, Eotf::St2084, &[Eotf::Sdr]);
        // second commit only flips control bits
        assert!(fake.writes().len() - writes < 20);
        hdr.invalidate_tables();
        let writes = fake.writes().len();
        setup_hdr10(&regs, &p.ports[0], &mut hdr, Eotf::Sdr, Eotf::St2084, &[Eotf::Sdr]);
        assert!(fake.writes().len() - writes > SDR2HDR_EOTF_POINTS);
    }

    #[test]
    fn test_hdr10_needs_table() {
        let (regs, _) = setup();
        let p = HardwareProfile::rk3568();
        let mut hdr = PortHdr::default();
        assert!(setup_hdr10(&regs, &p.ports[1], &mut hdr, Eotf::St2084, Eotf::Sdr, &[]).is_none());
        assert!(!hdr.hdr_en);
    }

    #[test]
    fn test_vivid_rejects_bad_modes() {
        let (regs, _) = setup();
        let p = HardwareProfile::rk3528();
        let dma = FakeDma::new(0x3000_0000, TONE_LUT_LEN);
        let mut hdr = PortHdr::default();
        let cfg = VividHdrConfig::new(HdrFormat::HdrVivid, 12);
        let res = setup_dynamic_hdr(&regs, &p.ports[0], &mut hdr, Some(&cfg), Eotf::St2084, &[], Some(&dma), &mut |_| {});
        assert_eq!(res, Err(Vop2Error::InvalidVividMode(12)));

        let cfg = VividHdrConfig::new(HdrFormat::HdrVivid, VividMode::PqHdr2SdrWithDynamic as u32);
        let res = setup_dynamic_hdr(&regs, &p.ports[0], &mut hdr, Some(&cfg), Eotf::Sdr, &[], Some(&dma), &mut |_| {});
        assert_eq!(res, Err(Vop2Error::HdrInputNotHdr(1)));
        assert!(!hdr.hdr_en);
    }

    #[test]
    fn test_vivid_hdr_to_sdr_programs_lut_dma() {
        let (regs, _) = setup();
        let p = HardwareProfile::rk3528();
        let dma = FakeDma::new(0x3000_0000, TONE_LUT_LEN);
        let mut hdr = PortHdr::default();
        let mut cfg = VividHdrConfig::new(HdrFormat::HdrVivid, VividMode::Hlg2SdrWithDynamic as u32);
        cfg.tone_sca_axi_tab[5] = 0x55;
        let out = setup_dynamic_hdr(
            &regs,
            &p.ports[0],
            &mut hdr,
            Some(&cfg),
            Eotf::Hlg,
            &[Eotf::Hlg, Eotf::Sdr],
            Some(&dma),
            &mut |_| {},
        )
        .unwrap();
        assert!(hdr.hdr_en && !hdr.hdr_out && !hdr.sdr2hdr_en);
        assert_eq!(out.bottom, PlaneHdr { hdr_in: true, hdr2sdr: true });
        assert_eq!(dma.word(5), 0x55);
        assert_eq!(regs.shadow_field(HDR.hdr_lut_mst), 0x3000_0000);
        assert_eq!(regs.shadow_field(HDR.hdr_lut_update_en), 1);
        assert_eq!(regs.shadow_field(HDR.hdr_vivid_path_mode), 3);
    }

    #[test]
    fn test_vivid_sdr_lift_and_disable() {
        let (regs, _) = setup();
        let p = HardwareProfile::rk3528();
        let dma = FakeDma::new(0x3000_0000, TONE_LUT_LEN);
        let mut hdr = PortHdr::default();
        let cfg = VividHdrConfig::new(HdrFormat::None, 10);
        setup_dynamic_hdr(&regs, &p.ports[0], &mut hdr, Some(&cfg), Eotf::Sdr, &[Eotf::Sdr], Some(&dma), &mut |_| {})
            .unwrap();
        assert_eq!(hdr.vivid_mode, Some(VividMode::Sdr2Hdr10));
        assert!(hdr.sdr2hdr_en && hdr.hdr_out && !hdr.hdr_en);
        assert_eq!(regs.shadow_field(HDR.sdr2hdr_auto_gating_en), 0);

        setup_dynamic_hdr(&regs, &p.ports[0], &mut hdr, None, Eotf::Sdr, &[], None, &mut |_| {}).unwrap();
        assert_eq!(hdr, PortHdr::default());
        assert_eq!(regs.shadow_field(HDR.sdr2hdr_auto_gating_en), 1);
    }

    #[test]
    fn test_dly_for_vp_picks_hdr_column() {
        let (regs, fake) = setup();
        let p = HardwareProfile::rk3568();
        let d = &p.ports[0];
        let mode = mode_1080p();
        let hdr = PortHdr { hdr_in: true, hdr_out: true, ..PortHdr::default() };
        setup_dly_for_vp(&regs, &p, d, &hdr, 6, &mode);
        // hdr in: no bg_ovl_dly correction
        assert_eq!(regs.shadow_field(d.regs.bg_dly), 53);
        assert_eq!(fake.get(d.regs.pre_scan_htiming), (53 + 960 - 1) << 16 | 44);

        setup_dly_for_vp(&regs, &p, d, &PortHdr::default(), 6, &mode);
        assert_eq!(regs.shadow_field(d.regs.bg_dly), 42 - 6);
    }

    #[test]
    fn test_window_dly_modes() {
        let p = HardwareProfile::rk3568();
        let cluster = &p.windows[0];
        let esmart = &p.windows[p.window_by_phys(2).unwrap()];
        let hiso = PortHdr { hdr_in: true, ..PortHdr::default() };
        assert_eq!(window_dly(esmart, &hiso, PlaneHdr::default(), 4), 14 + 4);
        let hiho = PortHdr { hdr_in: true, hdr_out: true, ..PortHdr::default() };
        let h = PlaneHdr { hdr_in: true, hdr2sdr: false };
        assert_eq!(window_dly(cluster, &hiho, h, 4), 17 | 17 << 8);
        assert_eq!(window_dly(esmart, &PortHdr::default(), h, 4), 7);
    }

    #[test]
    fn test_vop3_pipe_dly_aligns_paths() {
        let (regs, fake) = setup();
        let p = HardwareProfile::rk3528();
        let d = &p.ports[0];
        let mode = mode_1080p();
        let hdr = PortHdr {
            hdr_en: true,
            hdr_in: true,
            sdr2hdr_en: true,
            vivid_mode: Some(VividMode::PqHdr2HdrWithDynamic),
            ..PortHdr::default()
        };
        let cluster = p.window_by_phys(0).unwrap();
        let esmart = p.window_by_phys(2).unwrap();
        let stack = [(cluster, PlaneHdr { hdr_in: true, hdr2sdr: false }), (esmart, PlaneHdr::default())];
        vop3_pipe_dly(&regs, &p, d, &hdr, &mode, Some(&stack));
        // vivid 17 < layer mix 6 + sdr2hdr 21: hdr layer waits 10
        assert_eq!(regs.shadow_field(d.regs.bg_dly), 10 + 27 + 2);
        assert_eq!(fake.get(OvlRegs::win_dly(0)), 10 | 10 << 8);
        assert_eq!(fake.get(OvlRegs::win_dly(2)), 0);

        let plain = PortHdr::default();
        vop3_pipe_dly(&regs, &p, d, &plain, &mode, None);
        assert_eq!(regs.shadow_field(d.regs.bg_dly), 10 + 6 + 2);
    }
}
