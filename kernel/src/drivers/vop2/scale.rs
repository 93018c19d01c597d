//! Window scaler configuration
//!
//! Factors are fixed point: bilinear scale-down uses 12 fractional bits,
//! every other combination 16. The computed value is nudged down until
//! `fac * (dst - 1) >> shift` stays strictly below `src - 1`, so the last
//! output pixel never samples past the source edge.

use super::format::Fourcc;
use super::profile::{HardwareProfile, PreScaleFilter, ScaleFilter, WinFeature, WindowDesc};
use super::regs::RegisterFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    None = 0,
    Up = 1,
    Down = 2,
}

impl ScaleMode {
    pub fn of(src: u32, dst: u32) -> Self {
        if src < dst {
            ScaleMode::Up
        } else if src > dst {
            ScaleMode::Down
        } else {
            ScaleMode::None
        }
    }
}

const CALIBRATE_STEPS: u32 = 100;

fn calibrate(src: u32, dst: u32, shift: u32) -> u32 {
    let mut fac = ((src - 1) << shift) / (dst - 1);
    for _ in 0..CALIBRATE_STEPS {
        if (fac.wrapping_mul(dst - 1) >> shift) < src - 1 {
            break;
        }
        fac = fac.wrapping_sub(1);
        log::debug!("vop2: fac cali: src:{}, dst:{}, fac:{:#x}", src, dst, fac);
    }
    fac
}

/// Guards the `x - 1` divisor: a one pixel side is scaled as two.
fn widen(src: u32, dst: u32) -> (u32, u32) {
    if src == 1 || dst == 1 {
        (src + 1, dst + 1)
    } else {
        (src, dst)
    }
}

pub fn scale_factor(mode: ScaleMode, filter: ScaleFilter, src: u32, dst: u32) -> u16 {
    if mode == ScaleMode::None {
        return 0;
    }
    let (src, dst) = widen(src, dst);
    let shift = if mode == ScaleMode::Down && filter == ScaleFilter::Bilinear { 12 } else { 16 };
    calibrate(src, dst, shift) as u16
}

/// Newer scalers always scale down bilinearly.
pub fn scale_factor_v3(mode: ScaleMode, src: u32, dst: u32) -> u16 {
    if mode == ScaleMode::None {
        return 0;
    }
    let (src, dst) = widen(src, dst);
    let shift = if mode == ScaleMode::Down { 12 } else { 16 };
    calibrate(src, dst, shift) as u16
}

/// Post-scaler ratio, 12 fractional bits.
pub fn post_scale_factor(src: u32, dst: u32) -> u32 {
    if dst <= 1 {
        return 1 << 12;
    }
    ((src.saturating_sub(1)) << 12) / (dst - 1)
}

/// Everything the scaler registers of one window need.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleConfig {
    pub yrgb_x: u16,
    pub yrgb_y: u16,
    pub hor_mode: u32,
    pub ver_mode: u32,
    pub hfilter: u32,
    pub vfilter: u32,
    pub ygt2: bool,
    pub ygt4: bool,
    pub avg2: bool,
    pub avg4: bool,
    pub xgt_en: bool,
    pub xavg_en: bool,
    /// 0 selects decimation by 2, 1 by 4.
    pub xgt_mode: u32,
    pub cbcr_gt2: bool,
    pub cbcr_gt4: bool,
    /// Chroma scaling, separate only on older generations.
    pub cbcr: Option<CbcrScale>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CbcrScale {
    pub x: u16,
    pub y: u16,
    pub hor_mode: u32,
    pub ver_mode: u32,
}

pub struct ScaleInput {
    pub format: Fourcc,
    /// Fetch is compressed or block tiled.
    pub packed: bool,
    pub src_w: u32,
    pub src_h: u32,
    pub dst_w: u32,
    pub dst_h: u32,
}

/// Vertical line skipping for `src_h` onto `dst_h`, as (gt2, gt4).
fn vertical_decimation(profile: &HardwareProfile, src_w: u32, src_h: u32, dst_h: u32) -> (bool, bool) {
    if profile.quirks.ygt_2ppc && src_w > 1920 {
        if src_h >= 100 * dst_h / 35 {
            (false, true)
        } else if src_h >= 100 * dst_h / 65 {
            (true, false)
        } else {
            (false, false)
        }
    } else if src_h >= 4 * dst_h {
        (false, true)
    } else if src_h >= 2 * dst_h {
        (true, false)
    } else {
        (false, false)
    }
}

impl ScaleConfig {
    pub fn compute(profile: &HardwareProfile, desc: &WindowDesc, input: &ScaleInput) -> Self {
        let vop3 = profile.is_vop3();
        let cbcr_src_w = input.src_w / input.format.hsub();
        let mut cbcr_src_h = input.src_h / input.format.vsub();
        let mut src_w = input.src_w;
        let mut src_h = input.src_h;
        let mut dst_w = input.dst_w;
        let dst_h = input.dst_h;
        let mut cfg = ScaleConfig::default();

        let (mut xgt2, mut xgt4) = (false, false);
        if vop3 {
            if src_w >= 4 * dst_w {
                xgt4 = true;
                src_w >>= 2;
            } else if src_w >= 2 * dst_w {
                xgt2 = true;
                src_w >>= 1;
            }
        }

        let (ygt2, ygt4) = vertical_decimation(profile, src_w, src_h, dst_h);
        if ygt4 {
            src_h >>= 2;
        } else if ygt2 {
            src_h >>= 1;
        }

        let hor = ScaleMode::of(src_w, dst_w);
        let ver = ScaleMode::of(src_h, dst_h);
        let hfilter = if hor == ScaleMode::Up { desc.hsu_filter } else { desc.hsd_filter };
        let vfilter = if ver == ScaleMode::Up { desc.vsu_filter } else { desc.vsd_filter };

        if !desc.feature.contains(WinFeature::AFBDC) && !vop3 && hor == ScaleMode::Down && dst_w & 1 != 0 {
            log::debug!("vop2: {} dst_w[{}] should align as 2 pixel", desc.name, dst_w);
            dst_w += 1;
        }

        if vop3 {
            cfg.yrgb_x = scale_factor_v3(hor, src_w, dst_w);
            cfg.yrgb_y = scale_factor_v3(ver, src_h, dst_h);
            if desc.hsd_pre_filter == PreScaleFilter::Avg {
                cfg.xavg_en = xgt2 || xgt4;
            } else {
                cfg.xgt_en = xgt2 || xgt4;
            }
            cfg.xgt_mode = if xgt2 { 0 } else { 1 };
        } else {
            cfg.yrgb_x = scale_factor(hor, hfilter, src_w, dst_w);
            cfg.yrgb_y = scale_factor(ver, vfilter, src_h, dst_h);
        }

        // linear fetch can only skip lines, packed fetch may average
        let line_skip = !vop3 || !input.packed || desc.vsd_pre_filter == PreScaleFilter::Gt;
        if line_skip {
            cfg.ygt2 = ygt2;
            cfg.ygt4 = ygt4;
        } else {
            cfg.avg2 = ygt2;
            cfg.avg4 = ygt4;
        }

        cfg.hor_mode = hor as u32;
        cfg.ver_mode = ver as u32;
        cfg.hfilter = hfilter.code();
        cfg.vfilter = vfilter.code();

        if input.format.is_yuv() {
            if line_skip {
                let (gt2, gt4) = vertical_decimation(profile, src_w, cbcr_src_h, dst_h);
                cfg.cbcr_gt2 = gt2;
                cfg.cbcr_gt4 = gt4;
                if gt4 {
                    cbcr_src_h >>= 2;
                } else if gt2 {
                    cbcr_src_h >>= 1;
                }
            }

            if !vop3 {
                let chor = ScaleMode::of(cbcr_src_w, dst_w);
                let cver = ScaleMode::of(cbcr_src_h, dst_h);
                cfg.cbcr = Some(CbcrScale {
                    x: scale_factor(chor, hfilter, cbcr_src_w, dst_w),
                    y: scale_factor(cver, vfilter, cbcr_src_h, dst_h),
                    hor_mode: chor as u32,
                    ver_mode: cver as u32,
                });
            }
        }

        cfg
    }

    pub fn apply(&self, regs: &RegisterFile, desc: &WindowDesc) {
        let w = &desc.regs;
        regs.write_field(w.scale_yrgb_x, self.yrgb_x as u32);
        regs.write_field(w.scale_yrgb_y, self.yrgb_y as u32);
        regs.write_bool(w.xgt_en, self.xgt_en);
        regs.write_bool(w.xavg_en, self.xavg_en);
        regs.write_field(w.xgt_mode, self.xgt_mode);

        regs.write_bool(w.vsd_yrgb_gt4, self.ygt4);
        regs.write_bool(w.vsd_yrgb_gt2, self.ygt2);
        regs.write_bool(w.vsd_avg4, self.avg4);
        regs.write_bool(w.vsd_avg2, self.avg2);

        regs.write_field(w.yrgb_hor_scl_mode, self.hor_mode);
        regs.write_field(w.yrgb_ver_scl_mode, self.ver_mode);
        regs.write_field(w.yrgb_hscl_filter_mode, self.hfilter);
        regs.write_field(w.yrgb_vscl_filter_mode, self.vfilter);

        regs.write_bool(w.vsd_cbcr_gt4, self.cbcr_gt4);
        regs.write_bool(w.vsd_cbcr_gt2, self.cbcr_gt2);
        if let Some(c) = self.cbcr {
            regs.write_field(w.scale_cbcr_x, c.x as u32);
            regs.write_field(w.scale_cbcr_y, c.y as u32);
            regs.write_field(w.cbcr_hor_scl_mode, c.hor_mode);
            regs.write_field(w.cbcr_ver_scl_mode, c.ver_mode);
            regs.write_field(w.cbcr_hscl_filter_mode, self.hfilter);
            regs.write_field(w.cbcr_vscl_filter_mode, self.vfilter);
        }
    }
}
