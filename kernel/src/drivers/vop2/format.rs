//! Pixel and bus format translation
//!
//! Pure mappings from framebuffer formats/modifiers and output bus formats
//! to the hardware codes and per-format swap/alpha/dither predicates.

use crate::util::{Vop2Error, Vop2Result};

/// Framebuffer pixel formats the windows can fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fourcc {
    Xrgb8888,
    Argb8888,
    Xbgr8888,
    Abgr8888,
    Argb2101010,
    Rgb888,
    Bgr888,
    Rgb565,
    Bgr565,
    Nv12,
    Nv21,
    Nv16,
    Nv61,
    Nv24,
    Nv42,
    Nv12_10,
    Nv16_10,
    Nv24_10,
    Yuyv,
    Yvyu,
    Uyvy,
    Vyuy,
}

impl Fourcc {
    pub fn is_yuv(self) -> bool {
        !matches!(
            self,
            Fourcc::Xrgb8888
                | Fourcc::Argb8888
                | Fourcc::Xbgr8888
                | Fourcc::Abgr8888
                | Fourcc::Argb2101010
                | Fourcc::Rgb888
                | Fourcc::Bgr888
                | Fourcc::Rgb565
                | Fourcc::Bgr565
        )
    }

    /// Bits per pixel of plane `i` (0 luma/rgb, 1 chroma).
    pub fn bpp(self, plane: usize) -> u32 {
        match (self, plane) {
            (Fourcc::Xrgb8888 | Fourcc::Argb8888 | Fourcc::Xbgr8888 | Fourcc::Abgr8888, 0) => 32,
            (Fourcc::Argb2101010, 0) => 32,
            (Fourcc::Rgb888 | Fourcc::Bgr888, 0) => 24,
            (Fourcc::Rgb565 | Fourcc::Bgr565, 0) => 16,
            (Fourcc::Yuyv | Fourcc::Yvyu | Fourcc::Uyvy | Fourcc::Vyuy, 0) => 16,
            (
                Fourcc::Nv12 | Fourcc::Nv21 | Fourcc::Nv16 | Fourcc::Nv61 | Fourcc::Nv24
                | Fourcc::Nv42,
                0,
            ) => 8,
            (
                Fourcc::Nv12 | Fourcc::Nv21 | Fourcc::Nv16 | Fourcc::Nv61 | Fourcc::Nv24
                | Fourcc::Nv42,
                1,
            ) => 16,
            (Fourcc::Nv12_10 | Fourcc::Nv16_10 | Fourcc::Nv24_10, 0) => 10,
            (Fourcc::Nv12_10 | Fourcc::Nv16_10 | Fourcc::Nv24_10, 1) => 20,
            _ => 0,
        }
    }

    pub fn hsub(self) -> u32 {
        match self {
            Fourcc::Nv12 | Fourcc::Nv21 | Fourcc::Nv16 | Fourcc::Nv61 | Fourcc::Nv12_10
            | Fourcc::Nv16_10 => 2,
            Fourcc::Yuyv | Fourcc::Yvyu | Fourcc::Uyvy | Fourcc::Vyuy => 2,
            _ => 1,
        }
    }

    pub fn vsub(self) -> u32 {
        match self {
            Fourcc::Nv12 | Fourcc::Nv21 | Fourcc::Nv12_10 => 2,
            _ => 1,
        }
    }

    pub fn num_planes(self) -> usize {
        if self.bpp(1) != 0 { 2 } else { 1 }
    }

    /// Per-pixel alpha the blender can use.
    pub fn has_alpha(self) -> bool {
        matches!(self, Fourcc::Argb8888 | Fourcc::Abgr8888)
    }

    pub fn win_rb_swap(self) -> bool {
        matches!(self, Fourcc::Xbgr8888 | Fourcc::Abgr8888 | Fourcc::Bgr888 | Fourcc::Bgr565)
    }

    pub fn afbc_rb_swap(self) -> bool {
        matches!(self, Fourcc::Nv24 | Fourcc::Nv24_10)
    }

    pub fn afbc_uv_swap(self) -> bool {
        matches!(
            self,
            Fourcc::Nv12 | Fourcc::Nv16 | Fourcc::Yuyv | Fourcc::Nv12_10 | Fourcc::Nv16_10
        )
    }

    pub fn win_uv_swap(self) -> bool {
        matches!(
            self,
            Fourcc::Nv12
                | Fourcc::Nv16
                | Fourcc::Nv24
                | Fourcc::Nv12_10
                | Fourcc::Nv16_10
                | Fourcc::Nv24_10
                | Fourcc::Yuyv
                | Fourcc::Uyvy
        )
    }

    pub fn dither_up(self) -> bool {
        matches!(self, Fourcc::Rgb565 | Fourcc::Bgr565)
    }
}

// Linear window format codes
pub const FMT_ARGB8888: u32 = 0x0;
pub const FMT_RGB888: u32 = 0x1;
pub const FMT_RGB565: u32 = 0x2;
pub const FMT_YUV420SP: u32 = 0x4;
pub const FMT_YUV422SP: u32 = 0x5;
pub const FMT_YUV444SP: u32 = 0x6;
pub const FMT_YUYV422: u32 = 0x8;
pub const FMT_VYUY422: u32 = 0xa;
pub const FMT_YUV420SP_10: u32 = 0x14;
pub const FMT_YUV422SP_10: u32 = 0x15;
pub const FMT_YUV444SP_10: u32 = 0x16;
/// Cluster windows decode every 10 bit AFBC YUV buffer to 444.
pub const FMT_CLUSTER_YUV444_10: u32 = 0x12;

// AFBC decoder format codes
pub const AFBC_FMT_RGB565: u32 = 0x0;
pub const AFBC_FMT_ARGB2101010: u32 = 0x2;
pub const AFBC_FMT_YUV420_10BIT: u32 = 0x3;
pub const AFBC_FMT_RGB888: u32 = 0x4;
pub const AFBC_FMT_ARGB8888: u32 = 0x5;
pub const AFBC_FMT_YUV420: u32 = 0x9;
pub const AFBC_FMT_YUV422: u32 = 0xb;
pub const AFBC_FMT_YUV422_10BIT: u32 = 0xe;
/// Colour transform bit OR-ed into the AFBC format for YTR buffers.
pub const AFBC_FMT_YTR: u32 = 1 << 4;

// Write-back formats
pub const WB_ARGB8888: u32 = 0x0;
pub const WB_BGR888: u32 = 0x1;
pub const WB_RGB565: u32 = 0x2;
pub const WB_YUV420SP: u32 = 0x4;

/// Rockchip tiled block layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMode {
    None,
    Block8x8,
    /// 4x4 blocks with luma and chroma packed in one plane.
    Block4x4Mode0,
    Block4x4Mode1,
}

impl TileMode {
    pub fn is_tiled(self) -> bool {
        self != TileMode::None
    }

    /// Tile edge in pixels, 1 when linear.
    pub fn size(self) -> u32 {
        match self {
            TileMode::None => 1,
            TileMode::Block8x8 => 8,
            TileMode::Block4x4Mode0 | TileMode::Block4x4Mode1 => 4,
        }
    }
}

/// Framebuffer modifier split into the parts the hardware cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modifier {
    pub afbc: bool,
    /// AFBC with the YUV transform (YTR) enabled.
    pub afbc_ytr: bool,
    pub tiled: TileMode,
}

impl Modifier {
    pub const LINEAR: Modifier = Modifier { afbc: false, afbc_ytr: false, tiled: TileMode::None };

    pub const fn afbc(ytr: bool) -> Self {
        Modifier { afbc: true, afbc_ytr: ytr, tiled: TileMode::None }
    }

    pub const fn tiled(mode: TileMode) -> Self {
        Modifier { afbc: false, afbc_ytr: false, tiled: mode }
    }
}

pub fn convert_format(f: Fourcc) -> Vop2Result<u32> {
    let code = match f {
        Fourcc::Xrgb8888 | Fourcc::Argb8888 | Fourcc::Xbgr8888 | Fourcc::Abgr8888 => FMT_ARGB8888,
        Fourcc::Rgb888 | Fourcc::Bgr888 => FMT_RGB888,
        Fourcc::Rgb565 | Fourcc::Bgr565 => FMT_RGB565,
        Fourcc::Nv12 => FMT_YUV420SP,
        Fourcc::Nv12_10 => FMT_YUV420SP_10,
        Fourcc::Nv16 => FMT_YUV422SP,
        Fourcc::Nv16_10 => FMT_YUV422SP_10,
        Fourcc::Nv24 => FMT_YUV444SP,
        Fourcc::Nv24_10 => FMT_YUV444SP_10,
        Fourcc::Yuyv | Fourcc::Yvyu => FMT_VYUY422,
        Fourcc::Vyuy | Fourcc::Uyvy => FMT_YUYV422,
        _ => {
            log::error!("vop2: unsupported format {:?}", f);
            return Err(Vop2Error::UnsupportedFormat(f));
        }
    };
    Ok(code)
}

pub fn convert_afbc_format(f: Fourcc) -> Option<u32> {
    let code = match f {
        Fourcc::Xrgb8888 | Fourcc::Argb8888 | Fourcc::Xbgr8888 | Fourcc::Abgr8888 => {
            AFBC_FMT_ARGB8888
        }
        Fourcc::Argb2101010 => AFBC_FMT_ARGB2101010,
        Fourcc::Rgb888 | Fourcc::Bgr888 => AFBC_FMT_RGB888,
        Fourcc::Rgb565 | Fourcc::Bgr565 => AFBC_FMT_RGB565,
        Fourcc::Nv12 => AFBC_FMT_YUV420,
        Fourcc::Nv12_10 => AFBC_FMT_YUV420_10BIT,
        Fourcc::Nv16 | Fourcc::Yuyv => AFBC_FMT_YUV422,
        Fourcc::Nv16_10 => AFBC_FMT_YUV422_10BIT,
        _ => {
            log::warn!("vop2: unsupported afbc format {:?}", f);
            return None;
        }
    };
    Some(code)
}

/// 8x8 tiled codes used by generations with a single tile layout.
pub fn convert_tiled_format(f: Fourcc) -> Option<u32> {
    let code = match f {
        Fourcc::Nv12 | Fourcc::Nv21 => 0xc,
        Fourcc::Nv16 | Fourcc::Nv61 => 0xd,
        Fourcc::Nv24 | Fourcc::Nv42 => 0xe,
        Fourcc::Nv12_10 => 0x1c,
        Fourcc::Nv16_10 => 0x1d,
        Fourcc::Nv24_10 => 0x1e,
        _ => {
            log::warn!("vop2: unsupported tiled format {:?}", f);
            return None;
        }
    };
    Some(code)
}

/// Tiled codes for generations that support both 4x4 and 8x8 blocks.
pub fn convert_tiled_format_v3(f: Fourcc, mode: TileMode) -> Option<u32> {
    let base = match f {
        Fourcc::Nv12 | Fourcc::Nv21 => 0xc,
        Fourcc::Nv16 | Fourcc::Nv61 => 0xd,
        Fourcc::Nv24 | Fourcc::Nv42 => 0xe,
        Fourcc::Nv12_10 => 0x1c,
        Fourcc::Nv16_10 => 0x1d,
        Fourcc::Nv24_10 => 0x1e,
        _ => {
            log::warn!("vop2: unsupported tiled format {:?}", f);
            return None;
        }
    };
    Some(if mode == TileMode::Block8x8 { base + 0x20 } else { base })
}

pub fn convert_wb_format(f: Fourcc) -> Option<u32> {
    match f {
        Fourcc::Argb8888 => Some(WB_ARGB8888),
        Fourcc::Bgr888 => Some(WB_BGR888),
        Fourcc::Rgb565 => Some(WB_RGB565),
        Fourcc::Nv12 => Some(WB_YUV420SP),
        _ => {
            log::error!("vop2: unsupported wb format {:?}", f);
            None
        }
    }
}

/// Media bus formats on the port output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFormat {
    Rgb888_1x24,
    Rgb666_1x18,
    Rgb666_1x24CpadHi,
    Rgb666_1x7x3Spwg,
    Rgb565_1x16,
    Rgb101010_1x30,
    Yuv8_1x24,
    Yuv10_1x30,
    Uyyvyy8_0_5x24,
    Uyyvyy10_0_5x30,
    Yuyv8_2x8,
    Yvyu8_2x8,
    Uyvy8_2x8,
    Vyuy8_2x8,
    Yuyv8_1x16,
    Yvyu8_1x16,
    Uyvy8_1x16,
    Vyuy8_1x16,
}

impl BusFormat {
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            BusFormat::Yuv8_1x24
                | BusFormat::Yuv10_1x30
                | BusFormat::Uyyvyy8_0_5x24
                | BusFormat::Uyyvyy10_0_5x30
                | BusFormat::Yuyv8_2x8
                | BusFormat::Yvyu8_2x8
                | BusFormat::Uyvy8_2x8
                | BusFormat::Vyuy8_2x8
                | BusFormat::Yuyv8_1x16
                | BusFormat::Yvyu8_1x16
                | BusFormat::Uyvy8_1x16
                | BusFormat::Vyuy8_1x16
        )
    }

    pub fn yc_swap(self) -> bool {
        matches!(
            self,
            BusFormat::Yuyv8_1x16 | BusFormat::Yvyu8_1x16 | BusFormat::Yuyv8_2x8 | BusFormat::Yvyu8_2x8
        )
    }

    /// YUV444 over AAAA/P888 needs a chroma swap as well.
    pub fn uv_swap(self, mode: OutputMode) -> bool {
        match self {
            BusFormat::Yvyu8_1x16 | BusFormat::Vyuy8_1x16 | BusFormat::Yvyu8_2x8
            | BusFormat::Vyuy8_2x8 => true,
            BusFormat::Yuv8_1x24 | BusFormat::Yuv10_1x30 => {
                matches!(mode, OutputMode::Aaaa | OutputMode::P888)
            }
            _ => false,
        }
    }
}

/// Port output data mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    P888 = 0,
    P666 = 1,
    P565 = 2,
    Bt656 = 5,
    S888 = 8,
    S888Dummy = 12,
    Yuv420 = 14,
    Aaaa = 15,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_codes() {
        assert_eq!(convert_format(Fourcc::Abgr8888), Ok(FMT_ARGB8888));
        assert_eq!(convert_format(Fourcc::Nv12_10), Ok(FMT_YUV420SP_10));
        assert_eq!(convert_format(Fourcc::Yvyu), Ok(FMT_VYUY422));
        assert_eq!(convert_format(Fourcc::Uyvy), Ok(FMT_YUYV422));
        assert_eq!(
            convert_format(Fourcc::Argb2101010),
            Err(Vop2Error::UnsupportedFormat(Fourcc::Argb2101010))
        );
        assert!(convert_format(Fourcc::Nv21).is_err());
    }

    #[test]
    fn test_afbc_and_tiled_codes() {
        assert_eq!(convert_afbc_format(Fourcc::Yuyv), Some(AFBC_FMT_YUV422));
        assert_eq!(convert_afbc_format(Fourcc::Nv24), None);
        assert_eq!(convert_tiled_format(Fourcc::Nv61), Some(0xd));
        assert_eq!(convert_tiled_format_v3(Fourcc::Nv12, TileMode::Block4x4Mode0), Some(0xc));
        assert_eq!(convert_tiled_format_v3(Fourcc::Nv24_10, TileMode::Block8x8), Some(0x3e));
        assert_eq!(convert_wb_format(Fourcc::Nv12), Some(WB_YUV420SP));
        assert_eq!(convert_wb_format(Fourcc::Xrgb8888), None);
    }

    #[test]
    fn test_plane_geometry() {
        assert_eq!(Fourcc::Nv12.hsub(), 2);
        assert_eq!(Fourcc::Nv12.vsub(), 2);
        assert_eq!(Fourcc::Nv16.vsub(), 1);
        assert_eq!(Fourcc::Nv24.hsub(), 1);
        assert_eq!(Fourcc::Nv12_10.bpp(1), 20);
        assert_eq!(Fourcc::Yuyv.num_planes(), 1);
        assert!(Fourcc::Yuyv.is_yuv());
        assert!(!Fourcc::Bgr565.is_yuv());
    }

    #[test]
    fn test_swap_predicates() {
        assert!(Fourcc::Abgr8888.win_rb_swap());
        assert!(!Fourcc::Argb8888.win_rb_swap());
        assert!(Fourcc::Uyvy.win_uv_swap());
        assert!(!Fourcc::Vyuy.win_uv_swap());
        assert!(Fourcc::Nv24_10.afbc_rb_swap());
        assert!(Fourcc::Bgr565.dither_up());
        assert!(Fourcc::Argb8888.has_alpha());
        assert!(!Fourcc::Xrgb8888.has_alpha());
    }

    #[test]
    fn test_bus_predicates() {
        assert!(BusFormat::Yuv8_1x24.uv_swap(OutputMode::Aaaa));
        assert!(!BusFormat::Yuv8_1x24.uv_swap(OutputMode::S888));
        assert!(BusFormat::Vyuy8_2x8.uv_swap(OutputMode::Bt656));
        assert!(BusFormat::Yuyv8_2x8.yc_swap());
        assert!(!BusFormat::Uyvy8_2x8.yc_swap());
        assert!(BusFormat::Uyyvyy10_0_5x30.is_yuv());
        assert!(!BusFormat::Rgb101010_1x30.is_yuv());
    }
}
