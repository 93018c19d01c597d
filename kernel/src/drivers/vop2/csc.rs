//! Window color space conversion
//!
//! Each window can convert YUV to RGB (y2r) or RGB to YUV (r2y) on its
//! way into the overlay. Which one runs depends on the window input, the
//! overlay color domain and whether an HDR path already converts for it.

/// Transfer function tag of a plane or of the port output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eotf {
    #[default]
    Sdr,
    /// HDR10 (PQ).
    St2084,
    Hlg,
}

impl Eotf {
    pub fn is_hdr(self) -> bool {
        self != Eotf::Sdr
    }
}

/// Color space of a plane or of the port output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Default,
    Smpte170m,
    Smpte240m,
    Rec709,
    Bt878,
    System470M,
    System470Bg,
    Jpeg,
    Srgb,
    Bt2020,
    Bt709Full,
    Bt2020Full,
}

pub const CSC_BT601L: u32 = 0;
pub const CSC_BT709L: u32 = 1;
pub const CSC_BT601F: u32 = 2;
pub const CSC_BT2020: u32 = 3;
pub const CSC_BT709L_13BIT: u32 = 4;
pub const CSC_BT709F_13BIT: u32 = 5;
pub const CSC_BT2020L_13BIT: u32 = 6;
pub const CSC_BT2020F_13BIT: u32 = 7;

/// Matrix precision of the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CscDepth {
    Bit10,
    Bit13,
}

pub fn convert_csc_mode(cs: ColorSpace, depth: CscDepth) -> u32 {
    match cs {
        ColorSpace::Smpte170m | ColorSpace::System470M | ColorSpace::System470Bg => CSC_BT601L,
        ColorSpace::Rec709 | ColorSpace::Smpte240m | ColorSpace::Default => match depth {
            CscDepth::Bit13 => CSC_BT709L_13BIT,
            CscDepth::Bit10 => CSC_BT709L,
        },
        ColorSpace::Jpeg => CSC_BT601F,
        ColorSpace::Bt2020 => match depth {
            CscDepth::Bit13 => CSC_BT2020L_13BIT,
            CscDepth::Bit10 => CSC_BT2020,
        },
        ColorSpace::Bt709Full => match depth {
            CscDepth::Bit10 => {
                log::warn!("vop2: bt709f unsupported at 10bit csc depth, using bt601f");
                CSC_BT601F
            }
            CscDepth::Bit13 => CSC_BT709F_13BIT,
        },
        ColorSpace::Bt2020Full => match depth {
            CscDepth::Bit10 => {
                log::warn!("vop2: bt2020f unsupported at 10bit csc depth, using bt601f");
                CSC_BT601F
            }
            CscDepth::Bit13 => CSC_BT2020F_13BIT,
        },
        _ => CSC_BT709L,
    }
}

/// What drives the per-window converter decision.
#[derive(Debug, Clone, Copy)]
pub struct CscInput {
    pub input_yuv: bool,
    /// Port overlays in YUV.
    pub output_yuv: bool,
    pub input_cs: ColorSpace,
    pub output_cs: ColorSpace,
    /// Window converter supports 13 bit matrices.
    pub y2r_13bit: bool,
    pub vop3: bool,
    pub hdr_in: bool,
    pub hdr2sdr: bool,
    /// Port runs its SDR to HDR path.
    pub sdr2hdr: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CscDecision {
    pub y2r: bool,
    pub r2y: bool,
    pub mode: u32,
}

impl CscDecision {
    fn y2r(cs: ColorSpace, depth: CscDepth) -> Self {
        Self { y2r: true, r2y: false, mode: convert_csc_mode(cs, depth) }
    }

    fn r2y(cs: ColorSpace) -> Self {
        Self { y2r: false, r2y: true, mode: convert_csc_mode(cs, CscDepth::Bit10) }
    }

    /// 13 bit matrices are flagged separately on non-cluster windows.
    pub fn is_13bit(&self) -> bool {
        self.mode & 0x4 != 0
    }
}

/// HDR engines convert on their own, so a window feeding one only gets
/// the conversion that engine's input needs.
pub fn setup_csc_mode(inp: &CscInput) -> CscDecision {
    let y2r_depth = if inp.y2r_13bit { CscDepth::Bit13 } else { CscDepth::Bit10 };

    if inp.vop3 {
        if inp.hdr_in {
            return if inp.input_yuv {
                CscDecision::y2r(inp.input_cs, CscDepth::Bit13)
            } else {
                CscDecision::default()
            };
        }
        if inp.sdr2hdr {
            return if inp.input_yuv {
                CscDecision::y2r(inp.input_cs, y2r_depth)
            } else {
                CscDecision::default()
            };
        }
    } else if inp.hdr2sdr {
        // hdr2sdr takes yuv only
        return if inp.input_yuv { CscDecision::default() } else { CscDecision::r2y(inp.output_cs) };
    } else if !inp.hdr_in && inp.sdr2hdr {
        // sdr2hdr takes rgb only
        return if inp.input_yuv {
            CscDecision::y2r(inp.input_cs, y2r_depth)
        } else {
            CscDecision::default()
        };
    }

    match (inp.input_yuv, inp.output_yuv) {
        (true, false) => CscDecision::y2r(inp.input_cs, y2r_depth),
        (false, true) => CscDecision::r2y(inp.output_cs),
        _ => CscDecision::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> CscInput {
        CscInput {
            input_yuv: true,
            output_yuv: false,
            input_cs: ColorSpace::Rec709,
            output_cs: ColorSpace::Default,
            y2r_13bit: false,
            vop3: false,
            hdr_in: false,
            hdr2sdr: false,
            sdr2hdr: false,
        }
    }

    #[test]
    fn test_convert_csc_mode_table() {
        assert_eq!(convert_csc_mode(ColorSpace::Smpte170m, CscDepth::Bit13), CSC_BT601L);
        assert_eq!(convert_csc_mode(ColorSpace::Rec709, CscDepth::Bit10), CSC_BT709L);
        assert_eq!(convert_csc_mode(ColorSpace::Default, CscDepth::Bit13), CSC_BT709L_13BIT);
        assert_eq!(convert_csc_mode(ColorSpace::Jpeg, CscDepth::Bit13), CSC_BT601F);
        assert_eq!(convert_csc_mode(ColorSpace::Bt2020, CscDepth::Bit10), CSC_BT2020);
        assert_eq!(convert_csc_mode(ColorSpace::Bt2020, CscDepth::Bit13), CSC_BT2020L_13BIT);
        assert_eq!(convert_csc_mode(ColorSpace::Bt709Full, CscDepth::Bit10), CSC_BT601F);
        assert_eq!(convert_csc_mode(ColorSpace::Bt2020Full, CscDepth::Bit13), CSC_BT2020F_13BIT);
        assert_eq!(convert_csc_mode(ColorSpace::Srgb, CscDepth::Bit13), CSC_BT709L);
    }

    #[test]
    fn test_yuv_into_rgb_overlay_uses_13bit_709() {
        let mut inp = input();
        inp.y2r_13bit = true;
        let d = setup_csc_mode(&inp);
        assert!(d.y2r && !d.r2y);
        assert_eq!(d.mode, CSC_BT709L_13BIT);
        assert!(d.is_13bit());
    }

    #[test]
    fn test_rgb_into_yuv_overlay_is_r2y_10bit() {
        let mut inp = input();
        inp.input_yuv = false;
        inp.output_yuv = true;
        inp.output_cs = ColorSpace::Bt2020;
        inp.y2r_13bit = true;
        let d = setup_csc_mode(&inp);
        assert!(d.r2y && !d.y2r);
        assert_eq!(d.mode, CSC_BT2020);
    }

    #[test]
    fn test_same_domain_bypasses() {
        let mut inp = input();
        inp.output_yuv = true;
        assert_eq!(setup_csc_mode(&inp), CscDecision::default());
    }

    #[test]
    fn test_hdr2sdr_suppresses_y2r() {
        let mut inp = input();
        inp.hdr2sdr = true;
        assert_eq!(setup_csc_mode(&inp), CscDecision::default());

        inp.input_yuv = false;
        let d = setup_csc_mode(&inp);
        assert!(d.r2y);
    }

    #[test]
    fn test_sdr2hdr_rgb_window_bypasses_even_for_yuv_overlay() {
        let mut inp = input();
        inp.input_yuv = false;
        inp.output_yuv = true;
        inp.sdr2hdr = true;
        assert_eq!(setup_csc_mode(&inp), CscDecision::default());
    }

    #[test]
    fn test_vop3_hdr_input_always_13bit() {
        let mut inp = input();
        inp.vop3 = true;
        inp.hdr_in = true;
        inp.input_cs = ColorSpace::Bt2020;
        let d = setup_csc_mode(&inp);
        assert!(d.y2r);
        assert_eq!(d.mode, CSC_BT2020L_13BIT);
    }
}
