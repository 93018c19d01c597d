//! Window plane state
//!
//! [`check_plane`] turns a requested plane into a [`WindowPlaneState`]:
//! clipped rectangles, hardware format, fetch addresses. [`program_window`]
//! writes that state into one window's registers. Neither touches device
//! bookkeeping; the device decides when they run.

use bitflags::bitflags;

use super::crtc::DisplayMode;
use super::csc::{ColorSpace, CscDecision, Eotf};
use super::format::{
    convert_afbc_format, convert_format, convert_tiled_format, convert_tiled_format_v3, Fourcc,
    Modifier, TileMode, AFBC_FMT_YTR, FMT_CLUSTER_YUV444_10,
};
use super::profile::{HardwareProfile, WinFeature, WindowDesc};
use super::regs::RegisterFile;
use super::scale::{ScaleConfig, ScaleInput};
use crate::util::{align_down, align_up, div_round_up, swahw32, Vop2Error, Vop2Result};

bitflags! {
    /// Plane rotation and reflection, same bit values as the DRM property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rotation: u32 {
        const ROTATE_0   = 1 << 0;
        const ROTATE_90  = 1 << 1;
        const ROTATE_180 = 1 << 2;
        const ROTATE_270 = 1 << 3;
        const REFLECT_X  = 1 << 4;
        const REFLECT_Y  = 1 << 5;
    }
}

/// Rectangle with exclusive `x2`/`y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x1: x, y1: y, x2: x + w, y2: y + h }
    }

    /// Source rectangle in 16.16 from whole pixels.
    pub const fn fixed(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x << 16, y << 16, w << 16, h << 16)
    }

    pub const fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub const fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    None,
    #[default]
    Premultiplied,
    Coverage,
}

/// Scanout buffer as the windows see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub format: Fourcc,
    pub modifier: Modifier,
    pub width: u32,
    pub height: u32,
    pub pitches: [u32; 2],
    pub offsets: [u32; 2],
    /// Bus address of each plane's backing memory.
    pub dma_addr: [u32; 2],
}

/// Plane properties a caller proposes for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneRequest {
    pub fb: Option<Framebuffer>,
    /// Source in 16.16 fixed point.
    pub src: Rect,
    pub dst: Rect,
    pub rotation: Rotation,
    pub zpos: u32,
    /// 16 bit plane alpha, 0xffff is opaque.
    pub alpha: u16,
    pub blend: BlendMode,
    pub eotf: Eotf,
    pub color_space: ColorSpace,
    /// Key color in the framebuffer's own packing.
    pub color_key: Option<u32>,
}

impl PlaneRequest {
    pub fn new(fb: Framebuffer, src: Rect, dst: Rect) -> Self {
        Self {
            fb: Some(fb),
            src,
            dst,
            rotation: Rotation::ROTATE_0,
            zpos: 0,
            alpha: 0xffff,
            blend: BlendMode::Premultiplied,
            eotf: Eotf::Sdr,
            color_space: ColorSpace::Default,
            color_key: None,
        }
    }
}

/// Validated plane, replaced wholesale on every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlaneState {
    pub visible: bool,
    pub fb: Option<Framebuffer>,
    pub src: Rect,
    pub dst: Rect,
    pub zpos: u32,
    /// Eight bit global alpha.
    pub global_alpha: u16,
    pub blend: BlendMode,
    pub eotf: Eotf,
    pub color_space: ColorSpace,
    pub color_key: Option<u32>,
    pub format: u32,
    pub afbc: bool,
    pub tiled: TileMode,
    pub xmirror: bool,
    pub ymirror: bool,
    pub rotate_90: bool,
    pub rotate_270: bool,
    pub yrgb_mst: u32,
    pub uv_mst: u32,
    /// Byte offset of the first fetched pixel within plane 0.
    pub offset: u32,
}

impl WindowPlaneState {
    fn invisible(req: &PlaneRequest) -> Self {
        Self {
            visible: false,
            fb: req.fb,
            src: req.src,
            dst: req.dst,
            zpos: req.zpos,
            global_alpha: req.alpha >> 8,
            blend: req.blend,
            eotf: req.eotf,
            color_space: req.color_space,
            color_key: req.color_key,
            format: 0,
            afbc: false,
            tiled: TileMode::None,
            xmirror: false,
            ymirror: false,
            rotate_90: false,
            rotate_270: false,
            yrgb_mst: 0,
            uv_mst: 0,
            offset: 0,
        }
    }

    /// Visible and backed by a framebuffer.
    pub fn active(&self) -> Option<&Framebuffer> {
        if self.visible { self.fb.as_ref() } else { None }
    }

    pub fn is_yuv(&self) -> bool {
        self.fb.map(|f| f.format.is_yuv()).unwrap_or(false)
    }

    pub fn pixel_alpha(&self) -> bool {
        self.fb.map(|f| f.format.has_alpha()).unwrap_or(false)
    }

    pub fn premultiplied(&self) -> bool {
        self.blend == BlendMode::Premultiplied
    }

    /// Half block decoding can't be used with rotation.
    pub fn afbc_half_block(&self) -> bool {
        !(self.rotate_90 || self.rotate_270)
    }
}

const MIN_SCALE: i64 = 1 << 13; // 1/8 in 16.16
const MAX_SCALE: i64 = 8 << 16;

/// Clips `dst` to the active area and moves `src` along by the plane's
/// scale. Returns `None` when nothing stays on screen.
fn clip_to_mode(src: Rect, dst: Rect, w: i32, h: i32) -> Vop2Result<Option<(Rect, Rect)>> {
    if dst.width() <= 0 || dst.height() <= 0 || src.width() <= 0 || src.height() <= 0 {
        return Ok(None);
    }
    let hscale = src.width() as i64 / dst.width() as i64;
    let vscale = src.height() as i64 / dst.height() as i64;
    if !(MIN_SCALE..=MAX_SCALE).contains(&hscale) || !(MIN_SCALE..=MAX_SCALE).contains(&vscale) {
        return Err(Vop2Error::ScaleOutOfRange);
    }

    let (mut s, mut d) = (src, dst);
    if d.x1 < 0 {
        s.x1 += (-d.x1 as i64 * hscale) as i32;
        d.x1 = 0;
    }
    if d.x2 > w {
        s.x2 -= ((d.x2 - w) as i64 * hscale) as i32;
        d.x2 = w;
    }
    if d.y1 < 0 {
        s.y1 += (-d.y1 as i64 * vscale) as i32;
        d.y1 = 0;
    }
    if d.y2 > h {
        s.y2 -= ((d.y2 - h) as i64 * vscale) as i32;
        d.y2 = h;
    }

    if d.width() <= 0 || d.height() <= 0 {
        return Ok(None);
    }
    Ok(Some((s, d)))
}

/// Whether the 16.16 `src` lies inside `fb`.
fn src_within_fb(src: &Rect, fb: &Framebuffer) -> bool {
    let (w, h) = ((fb.width as i64) << 16, (fb.height as i64) << 16);
    src.x1 >= 0 && src.y1 >= 0 && src.x1 <= src.x2 && src.y1 <= src.y2 && src.x2 as i64 <= w && src.y2 as i64 <= h
}

fn dma32(addr: u64) -> Vop2Result<u32> {
    u32::try_from(addr).map_err(|_| Vop2Error::AddressOverflow)
}

/// Validates `req` for the window `desc` on a port scanning `mode`.
///
/// An invisible plane is not an error: it comes back with `visible`
/// cleared and the caller disables the window.
pub fn check_plane(
    profile: &HardwareProfile,
    desc: &WindowDesc,
    req: &PlaneRequest,
    mode: &DisplayMode,
) -> Vop2Result<WindowPlaneState> {
    let mut st = WindowPlaneState::invisible(req);
    let fb = match req.fb {
        Some(fb) => fb,
        None => return Ok(st),
    };

    st.xmirror = req.rotation.contains(Rotation::REFLECT_X);
    st.ymirror = req.rotation.contains(Rotation::REFLECT_Y);
    st.rotate_90 = req.rotation.contains(Rotation::ROTATE_90);
    st.rotate_270 = req.rotation.contains(Rotation::ROTATE_270);
    if st.rotate_90 && st.rotate_270 {
        log::error!("vop2: {} can't rotate 90 and 270 at the same time", desc.name);
        return Err(Vop2Error::RotationConflict);
    }

    if !src_within_fb(&req.src, &fb) {
        log::error!(
            "vop2: {} source {}x{}@{},{} outside {}x{} framebuffer",
            desc.name,
            req.src.width() >> 16,
            req.src.height() >> 16,
            req.src.x1 >> 16,
            req.src.y1 >> 16,
            fb.width,
            fb.height
        );
        return Err(Vop2Error::SourceOutsideFramebuffer);
    }

    let (src, dst) = match clip_to_mode(req.src, req.dst, mode.hdisplay as i32, mode.vdisplay as i32)? {
        Some(r) => r,
        None => {
            log::error!(
                "vop2: {} is invisible (src {}x{} dst {}x{}@{},{})",
                desc.name,
                req.src.width() >> 16,
                req.src.height() >> 16,
                req.dst.width(),
                req.dst.height(),
                req.dst.x1,
                req.dst.y1
            );
            return Ok(st);
        }
    };
    st.src = src;
    st.dst = dst;
    st.format = convert_format(fb.format)?;

    let src_w = (src.width() >> 16) as u32;
    let src_h = (src.height() >> 16) as u32;
    if src_w < 4 || src_h < 4 || dst.width() < 4 || dst.height() < 4 {
        log::error!(
            "vop2: invalid size {}x{}->{}x{}, min size is 4x4",
            src_w,
            src_h,
            dst.width(),
            dst.height()
        );
        return Ok(st);
    }

    let (max_w, max_h) = desc.max_input;
    if src_w > max_w || src_h > max_h {
        log::error!("vop2: invalid source {}x{}, max input {}x{}", src_w, src_h, max_w, max_h);
        return Err(Vop2Error::SourceTooLarge {
            width: src_w,
            height: src_h,
            max_width: max_w,
            max_height: max_h,
        });
    }

    st.afbc = fb.modifier.afbc && desc.feature.contains(WinFeature::AFBDC);
    st.tiled = fb.modifier.tiled;
    if fb.modifier.afbc && st.tiled.is_tiled() {
        log::error!("vop2: {} afbc and tiled can't be enabled at the same time", desc.name);
        return Err(Vop2Error::InvalidModifierCombination);
    }
    let tile_size = st.tiled.size();

    if profile.quirks.cluster_afbc_only && desc.is_cluster() && !st.afbc {
        log::error!("vop2: unsupported linear format at {}", desc.name);
        return Err(Vop2Error::LinearClusterUnsupported(desc.name));
    }

    let x1 = (src.x1 >> 16) as u32;
    let y1 = (src.y1 >> 16) as u32;
    let y2 = (src.y2 >> 16) as u32;
    if fb.format.is_yuv() && x1 % 2 != 0 {
        log::error!("vop2: yuv source x offset {} is odd", x1);
        return Err(Vop2Error::OddYuvOffset(x1));
    }

    let tile = tile_size as u64;
    let mut offset = align_down(x1, tile_size) as u64 * fb.format.bpp(0) as u64 / 8 * tile;
    st.offset = dma32(offset + fb.offsets[0] as u64)?;

    // afbc header pointer is always the start of the buffer
    if st.afbc {
        offset = 0;
    } else if st.ymirror {
        offset += (y2 as u64).saturating_sub(1) * fb.pitches[0] as u64;
    } else {
        offset += align_down(y1, tile_size) as u64 * fb.pitches[0] as u64;
    }
    st.yrgb_mst = dma32(fb.dma_addr[0] as u64 + offset + fb.offsets[0] as u64)?;

    if fb.format.is_yuv() {
        let hsub = fb.format.hsub() as u64;
        let vsub = fb.format.vsub() as u64;
        let pitch = fb.pitches[1] as u64;
        let mut uv = align_down(x1, tile_size) as u64 * fb.format.bpp(1) as u64 / hsub / 8 * tile;
        if st.tiled.is_tiled() {
            uv /= vsub;
        }
        uv += align_down(y1, tile_size) as u64 * pitch / vsub;
        // the requested height, not the clipped one
        let req_h = (req.src.height() >> 16) as u64;
        if st.ymirror && !st.afbc {
            uv += pitch * req_h.saturating_sub(2) / vsub;
        }
        st.uv_mst = dma32(fb.dma_addr[1] as u64 + uv + fb.offsets[1] as u64)?;

        // luma and chroma share one plane in 4x4 mode 0
        if st.tiled == TileMode::Block4x4Mode0 {
            st.yrgb_mst = dma32(st.yrgb_mst as u64 + uv)?;
        }
    }

    st.visible = true;
    Ok(st)
}

/// Sub block phase of the crop origin inside the AFBC superblock, for
/// every mirror and rotation combination.
pub fn afbc_transform_offset(st: &WindowPlaneState, fb: &Framebuffer) -> u32 {
    let bpp = fb.format.bpp(0).max(1);
    let vir_width = (fb.pitches[0] << 3) / bpp;
    let width = (st.src.width() >> 16) as u32;
    let height = (st.src.height() >> 16) as u32;
    let act_x = (st.src.x1 >> 16) as u32;
    let act_y = (st.src.y1 >> 16) as u32;
    let half = st.afbc_half_block();

    let align16_crop = if height & 0xf != 0 { 16 - (height & 0xf) } else { 0 };
    let height_tmp = height + align16_crop;
    let align64_crop = if height_tmp & 0x3f != 0 { 64 - (height_tmp & 0x3f) } else { 0 };

    // no top cropping is ever requested
    let top_crop_lines = 0u32;
    let bottom_crop_lines = align16_crop + align64_crop;
    let ymask = if half { 0x7 } else { 0xf };

    let right_edge = || 16u32.wrapping_sub((act_x + width) & 0xf);
    let (xoff, yoff) = if st.xmirror {
        if st.ymirror {
            (right_edge(), bottom_crop_lines.wrapping_sub(act_y) & ymask)
        } else if st.rotate_90 {
            (
                bottom_crop_lines.wrapping_sub(act_y) & 0xf,
                vir_width.wrapping_sub(width).wrapping_sub(act_x) & 0xf,
            )
        } else if st.rotate_270 {
            ((top_crop_lines + act_y) & 0xf, act_x & 0xf)
        } else {
            (right_edge(), (top_crop_lines + act_y) & ymask)
        }
    } else if st.ymirror {
        (act_x & 0xf, bottom_crop_lines.wrapping_sub(act_y) & ymask)
    } else if st.rotate_90 {
        (bottom_crop_lines.wrapping_sub(act_y) & 0xf, act_x & 0xf)
    } else if st.rotate_270 {
        ((top_crop_lines + act_y) & 0xf, vir_width.wrapping_sub(width).wrapping_sub(act_x) & 0xf)
    } else {
        (act_x & 0xf, (top_crop_lines + act_y) & ymask)
    };

    (xoff & 0xf) | ((yoff & 0xf) << 16)
}

/// Crop origin within a tile.
pub fn tile_transform_offset(st: &WindowPlaneState) -> u32 {
    if !st.tiled.is_tiled() {
        return 0;
    }
    let mask = st.tiled.size() - 1;
    let x = (st.src.x1 >> 16) as u32 & mask;
    let y = (st.src.y1 >> 16) as u32 & mask;
    (x & 0xf) | ((y & 0xf) << 16)
}

/// Cluster line buffer split: 0 full width, 1 two windows, 2 rotated.
pub fn cluster_lb_mode(desc: &WindowDesc, st: &WindowPlaneState) -> u32 {
    if st.rotate_90 || st.rotate_270 {
        2
    } else if desc.feature.contains(WinFeature::CLUSTER_SUB) {
        1
    } else {
        0
    }
}

/// Key color widened to the 10 bit compare the hardware does. `None`
/// disables keying.
pub fn color_key_value(format: Fourcc, key: Option<u32>) -> Option<u32> {
    let key = key?;
    let (r, g, b) = match format {
        Fourcc::Rgb565 | Fourcc::Bgr565 => (
            ((key & 0xf800) >> 11) << 5,
            ((key & 0x7e0) >> 5) << 4,
            (key & 0x1f) << 5,
        ),
        Fourcc::Xrgb8888
        | Fourcc::Argb8888
        | Fourcc::Xbgr8888
        | Fourcc::Abgr8888
        | Fourcc::Rgb888
        | Fourcc::Bgr888 => (((key & 0xff0000) >> 16) << 2, ((key & 0xff00) >> 8) << 2, (key & 0xff) << 2),
        _ => return None,
    };
    Some((r << 20) | (g << 10) | b)
}

/// Per-commit inputs of [`program_window`] that come from the port.
pub struct ProgramContext<'a> {
    pub profile: &'a HardwareProfile,
    pub port: usize,
    pub mode: &'a DisplayMode,
    pub csc: CscDecision,
    /// BT1120/BT656 outputs need clipped YUV levels.
    pub yuv_clip: bool,
}

/// Geometry actually programmed, reported for dumps and bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammedWindow {
    pub act_w: u32,
    pub act_h: u32,
    pub dsp_w: u32,
    pub dsp_h: u32,
}

/// Writes every register of one window for `st`. The window ends up
/// enabled; an invisible `st` must go through [`disable_window_regs`].
pub fn program_window(
    regs: &RegisterFile,
    ctx: &ProgramContext<'_>,
    desc: &WindowDesc,
    st: &WindowPlaneState,
    fb: &Framebuffer,
) -> ProgrammedWindow {
    let profile = ctx.profile;
    let vop3 = profile.is_vop3();
    let mode = ctx.mode;
    let w = &desc.regs;
    let afbc = &desc.afbc;
    let bpp = fb.format.bpp(0);

    let mut act_w = (st.src.width() >> 16) as u32;
    let mut act_h = (st.src.height() >> 16) as u32;
    let mut dsp_w = st.dst.width() as u32;
    let mut dsp_h = st.dst.height() as u32;
    let dst_x = st.dst.x1 as u32;
    let dst_y = st.dst.y1 as u32;

    if dst_x + dsp_w > mode.hdisplay {
        log::error!(
            "vop2: vp{} {} dst x {} + w {} exceeds hdisplay {}",
            ctx.port,
            desc.name,
            dst_x,
            dsp_w,
            mode.hdisplay
        );
        dsp_w = mode.hdisplay.saturating_sub(dst_x).max(4);
        act_w = dsp_w * act_w / st.dst.width() as u32;
    }
    if dst_y + dsp_h > mode.vdisplay {
        log::error!(
            "vop2: vp{} {} dst y {} + h {} exceeds vdisplay {}",
            ctx.port,
            desc.name,
            dst_y,
            dsp_h,
            mode.vdisplay
        );
        dsp_h = mode.vdisplay.saturating_sub(dst_y).max(4);
        act_h = dsp_h * act_h / st.dst.height() as u32;
    }

    if profile.quirks.act_width_fixup {
        if !desc.feature.contains(WinFeature::AFBDC) && act_w > dsp_w && act_w & 0xf == 1 {
            log::warn!("vop2: vp{} {} act_w {} mod 16 == 1", ctx.port, desc.name, act_w);
            act_w -= 1;
        }
        if st.afbc && act_w % 4 != 0 {
            log::error!("vop2: vp{} {} act_w {} must be 4 aligned for afbc", ctx.port, desc.name, act_w);
            act_w = align_down(act_w, 4);
        }
    }

    let mut act_info = (act_h - 1) << 16 | ((act_w - 1) & 0xffff);
    let dsp_info = (dsp_h - 1) << 16 | ((dsp_w - 1) & 0xffff);
    let dsp_st = dst_y << 16 | (dst_x & 0xffff);
    let mut stride = div_round_up(fb.pitches[0], 4);

    let mut format = if st.tiled.is_tiled() {
        let code = if vop3 {
            convert_tiled_format_v3(fb.format, st.tiled)
        } else {
            convert_tiled_format(fb.format)
        };
        code.unwrap_or(st.format)
    } else {
        st.format
    };

    log::debug!(
        "vop2: vp{} update {} [{}x{}->{}x{}@{}x{}] fmt {:?} addr {:#x} zpos {}",
        ctx.port,
        desc.name,
        act_w,
        act_h,
        dsp_w,
        dsp_h,
        dst_x,
        dst_y,
        fb.format,
        st.yrgb_mst,
        st.zpos
    );

    if profile.quirks.win_axi_cfg && desc.parent.is_none() {
        // the cluster sub window shares the main window's bus
        if !desc.feature.contains(WinFeature::CLUSTER_SUB) {
            regs.write_field(w.axi_id, desc.axi_id as u32);
        }
        regs.write_field(w.axi_yrgb_id, desc.axi_yrgb_id as u32);
        regs.write_field(w.axi_uv_id, desc.axi_uv_id as u32);
    }

    if vop3 && !desc.is_cluster() && desc.parent.is_none() {
        regs.write_field(w.scale_engine_num, desc.scale_engine_num as u32);
    }

    if st.afbc {
        let mut afbc_format = convert_afbc_format(fb.format).unwrap_or(0);
        if fb.modifier.afbc_ytr {
            afbc_format |= AFBC_FMT_YTR;
        }
        let tile_num = align_up(act_w, 16) >> 4;
        // afbc virtual width counts pixels
        stride = (fb.pitches[0] << 3) / bpp.max(1);
        if stride & 0x3f != 0 && (st.xmirror || st.rotate_90 || st.rotate_270) {
            log::error!(
                "vop2: vp{} {} stride {} must be 64 aligned for xmirror/rotation",
                ctx.port,
                desc.name,
                stride
            );
        }
        if profile.quirks.afbc_yuv10_as_444 && fb.format.is_yuv() && bpp == 10 {
            format = FMT_CLUSTER_YUV444_10;
        }

        regs.write_bool(desc.cluster.afbc_enable, true);
        regs.write_field(afbc.format, afbc_format);
        regs.write_bool(afbc.rb_swap, fb.format.afbc_rb_swap());
        regs.write_bool(afbc.uv_swap, fb.format.afbc_uv_swap());
        regs.write_bool(afbc.auto_gating_en, profile.quirks.afbc_auto_gating);
        regs.write_bool(afbc.block_split_en, false);
        regs.write_field(afbc.hdr_ptr, st.yrgb_mst);
        regs.write_field(afbc.pic_size, act_info);
        regs.write_field(w.transform_offset, afbc_transform_offset(st, fb));
        regs.write_field(afbc.pic_offset, ((st.src.x1 >> 16) as u32) | ((st.src.y1 >> 16) as u32) << 16);
        regs.write_field(afbc.dsp_offset, dst_x | dst_y << 16);
        regs.write_field(afbc.pic_vir_width, stride);
        regs.write_field(afbc.tile_num, tile_num);
        regs.write_bool(afbc.xmirror, st.xmirror);
        regs.write_bool(afbc.ymirror, st.ymirror);
        regs.write_bool(afbc.rotate_270, st.rotate_270);
        regs.write_bool(afbc.rotate_90, st.rotate_90);
    } else {
        regs.write_bool(desc.cluster.afbc_enable, false);
        regs.write_field(w.transform_offset, tile_transform_offset(st));
        regs.write_bool(w.ymirror, st.ymirror);
        regs.write_bool(w.xmirror, st.xmirror);
    }

    if st.rotate_90 || st.rotate_270 {
        act_info = swahw32(act_info);
        act_w = (st.src.height() >> 16) as u32;
        act_h = (st.src.width() >> 16) as u32;
    }
    regs.write_bool(afbc.half_block_en, st.afbc_half_block());

    regs.write_field(w.format, format);
    regs.write_field(w.yrgb_mst, st.yrgb_mst);

    let mut uv_swap = fb.format.win_uv_swap();
    if st.tiled.is_tiled() {
        uv_swap = true;
        stride *= st.tiled.size();
    }
    regs.write_bool(w.rb_swap, fb.format.win_rb_swap());
    regs.write_bool(w.uv_swap, uv_swap);

    let mut uv_stride = 0;
    if fb.format.is_yuv() {
        uv_stride = div_round_up(fb.pitches[1], 4);
        if st.tiled.is_tiled() {
            uv_stride = uv_stride * st.tiled.size() / fb.format.vsub();
            regs.write_bool(w.tile_mode, st.tiled == TileMode::Block4x4Mode0);
        }
        regs.write_field(w.uv_vir, uv_stride);
        regs.write_field(w.uv_mst, st.uv_mst);
    }

    if st.tiled == TileMode::Block4x4Mode0 {
        regs.write_field(w.yrgb_vir, stride + uv_stride);
    } else {
        regs.write_field(w.yrgb_vir, stride);
    }

    let scale = ScaleConfig::compute(
        profile,
        desc,
        &ScaleInput {
            format: fb.format,
            packed: st.afbc || st.tiled.is_tiled(),
            src_w: act_w,
            src_h: act_h,
            dst_w: dsp_w,
            dst_h: dsp_h,
        },
    );
    scale.apply(regs, desc);

    match color_key_value(fb.format, st.color_key) {
        Some(key) => {
            regs.write_bool(w.color_key_en, true);
            regs.write_field(w.color_key, key);
        }
        None => regs.write_bool(w.color_key_en, false),
    }

    regs.write_field(w.act_info, act_info);
    regs.write_field(w.dsp_info, dsp_info);
    regs.write_field(w.dsp_st, dsp_st);

    regs.write_bool(w.y2r_en, ctx.csc.y2r);
    regs.write_bool(w.r2y_en, ctx.csc.r2y);
    regs.write_field(w.csc_mode, ctx.csc.mode);
    if desc.feature.contains(WinFeature::Y2R_13BIT_DEPTH) && !desc.is_cluster() {
        regs.write_bool(w.csc_13bit_en, ctx.csc.is_13bit());
    }
    regs.write_bool(w.dither_up, fb.format.dither_up());

    regs.write_bool(w.enable, true);
    if desc.is_cluster() {
        let lb_mode = cluster_lb_mode(desc, st);
        regs.write_field(desc.cluster.lb_mode, lb_mode);
        regs.write_field(desc.cluster.scl_lb_mode, if lb_mode == 1 { 3 } else { 0 });
        regs.write_bool(desc.cluster.enable, true);
        regs.write_bool(desc.cluster.frm_reset_en, true);
    }
    if ctx.yuv_clip {
        regs.write_bool(w.yuv_clip, true);
    }

    ProgrammedWindow { act_w, act_h, dsp_w, dsp_h }
}

/// Turns window `idx` off, taking a cluster's sub window and a multi-area
/// parent's areas with it.
pub fn disable_window_regs(regs: &RegisterFile, profile: &HardwareProfile, idx: usize) {
    let Some(desc) = profile.windows.get(idx) else {
        return;
    };
    regs.write_bool(desc.regs.enable, false);

    if desc.feature.contains(WinFeature::CLUSTER_MAIN) {
        for sub in profile
            .windows
            .iter()
            .filter(|s| s.phys_id == desc.phys_id && s.feature.contains(WinFeature::CLUSTER_SUB))
        {
            regs.write_bool(sub.regs.enable, false);
        }
        regs.write_bool(desc.cluster.enable, false);
    }

    if desc.parent.is_none() && desc.feature.contains(WinFeature::MULTI_AREA) {
        for area in profile.windows.iter().filter(|a| a.parent == Some(idx)) {
            regs.write_bool(area.regs.enable, false);
        }
    }
}
