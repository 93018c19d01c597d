//! Alpha blending for the cascaded mixers
//!
//! Every mixer stage blends one layer (src, top) over the result of the
//! stages below it (dst, bottom) and is controlled by four words with the
//! same layout. The words are a pure function of [`AlphaConfig`].

use alloc::vec::Vec;

use super::regs::RegisterFile;

/// Global alpha value that has no effect.
pub const GLOBAL_ALPHA_OPAQUE: u16 = 0xff;

// color_mode
const ALPHA_SRC_NO_PRE_MUL: u32 = 0;
const ALPHA_SRC_PRE_MUL: u32 = 1;
// alpha_mode
const ALPHA_STRAIGHT: u32 = 0;
// blend_mode
pub const ALPHA_GLOBAL: u32 = 0;
pub const ALPHA_PER_PIX: u32 = 1;
pub const ALPHA_PER_PIX_GLOBAL: u32 = 2;
// alpha_cal_mode
const ALPHA_SATURATION: u32 = 0;
const ALPHA_NO_SATURATION: u32 = 1;
// factor_mode of dst and alpha words
const ALPHA_ONE: u32 = 1;
pub const ALPHA_SRC_INVERSE: u32 = 3;
// factor_mode of the src color word
pub const SRC_FAC_ALPHA_ONE: u32 = 1;
pub const SRC_FAC_ALPHA_SRC_GLOBAL: u32 = 5;

/// One blend control word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlphaCtrl {
    pub color_mode: u32,
    pub alpha_mode: u32,
    pub blend_mode: u32,
    pub alpha_cal_mode: u32,
    pub factor_mode: u32,
    pub alpha_en: bool,
    pub src_dst_swap: bool,
    pub glb_alpha: u16,
}

impl AlphaCtrl {
    pub fn bits(&self) -> u32 {
        (self.color_mode & 0x1)
            | (self.alpha_mode & 0x1) << 1
            | (self.blend_mode & 0x3) << 2
            | (self.alpha_cal_mode & 0x1) << 4
            | (self.factor_mode & 0x7) << 5
            | (self.alpha_en as u32) << 8
            | (self.src_dst_swap as u32) << 9
            | (self.glb_alpha as u32 & 0xff) << 16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaConfig {
    pub src_premulti: bool,
    pub dst_premulti: bool,
    pub src_pixel_alpha: bool,
    pub dst_pixel_alpha: bool,
    pub src_glb_alpha: u16,
    pub dst_glb_alpha: u16,
}

/// The four control words of one stage, in register order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlphaWords {
    pub src_color: AlphaCtrl,
    pub dst_color: AlphaCtrl,
    pub src_alpha: AlphaCtrl,
    pub dst_alpha: AlphaCtrl,
}

impl AlphaWords {
    pub fn to_regs(&self) -> [u32; 4] {
        [self.src_color.bits(), self.dst_color.bits(), self.src_alpha.bits(), self.dst_alpha.bits()]
    }

    /// Writes the stage whose src color word sits at `base`.
    pub fn write(&self, regs: &RegisterFile, base: u32) {
        for (i, v) in self.to_regs().into_iter().enumerate() {
            regs.write(base + i as u32 * 4, v);
        }
    }
}

/// Clears a stage at `base`.
pub fn clear_stage(regs: &RegisterFile, base: u32) {
    for i in 0..4 {
        regs.write(base + i * 4, 0);
    }
}

pub fn parse_alpha(cfg: &AlphaConfig) -> AlphaWords {
    let src_glb_alpha_en = cfg.src_glb_alpha != GLOBAL_ALPHA_OPAQUE;
    let dst_glb_alpha_en = cfg.dst_glb_alpha != GLOBAL_ALPHA_OPAQUE;
    let src_color_mode = if cfg.src_premulti { ALPHA_SRC_PRE_MUL } else { ALPHA_SRC_NO_PRE_MUL };
    let dst_color_mode = if cfg.dst_premulti { ALPHA_SRC_PRE_MUL } else { ALPHA_SRC_NO_PRE_MUL };

    let blend_mode = if !cfg.src_pixel_alpha {
        ALPHA_GLOBAL
    } else if !src_glb_alpha_en {
        ALPHA_PER_PIX
    } else {
        ALPHA_PER_PIX_GLOBAL
    };

    let (color_mode, factor_mode) = match blend_mode {
        ALPHA_GLOBAL => (src_color_mode, SRC_FAC_ALPHA_SRC_GLOBAL),
        ALPHA_PER_PIX => (src_color_mode, SRC_FAC_ALPHA_ONE),
        _ => (ALPHA_SRC_PRE_MUL, SRC_FAC_ALPHA_SRC_GLOBAL),
    };

    let src_color = AlphaCtrl {
        color_mode,
        alpha_mode: ALPHA_STRAIGHT,
        blend_mode,
        alpha_cal_mode: ALPHA_SATURATION,
        factor_mode,
        alpha_en: true,
        src_dst_swap: false,
        glb_alpha: cfg.src_glb_alpha,
    };
    let dst_color = AlphaCtrl {
        color_mode: dst_color_mode,
        alpha_mode: ALPHA_STRAIGHT,
        blend_mode: ALPHA_GLOBAL,
        alpha_cal_mode: ALPHA_SATURATION,
        factor_mode: ALPHA_SRC_INVERSE,
        glb_alpha: cfg.dst_glb_alpha,
        ..AlphaCtrl::default()
    };
    let src_alpha = AlphaCtrl {
        alpha_mode: ALPHA_STRAIGHT,
        blend_mode,
        alpha_cal_mode: ALPHA_SATURATION,
        factor_mode: ALPHA_ONE,
        ..AlphaCtrl::default()
    };
    let dst_alpha = AlphaCtrl {
        alpha_mode: ALPHA_STRAIGHT,
        blend_mode: if cfg.dst_pixel_alpha && !dst_glb_alpha_en {
            ALPHA_PER_PIX
        } else {
            ALPHA_PER_PIX_GLOBAL
        },
        alpha_cal_mode: ALPHA_NO_SATURATION,
        factor_mode: ALPHA_SRC_INVERSE,
        ..AlphaCtrl::default()
    };

    AlphaWords { src_color, dst_color, src_alpha, dst_alpha }
}

/// Blend relevant properties of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaLayer {
    /// Format carries per-pixel alpha.
    pub pixel_alpha: bool,
    pub premultiplied: bool,
    pub global_alpha: u16,
    /// Layer is a cluster, already blended inside the cluster stage.
    pub cluster: bool,
}

/// Pre-blend of a cluster's main and sub window.
///
/// The cluster mixer treats win1 as top unless the main window sits
/// higher, in which case src and dst are swapped. Without a sub window
/// the top is an all zero layer.
pub fn cluster_alpha(main: &AlphaLayer, main_zpos: u32, sub: Option<(&AlphaLayer, u32)>) -> AlphaWords {
    let (top, bottom, swap, src_glb) = match sub {
        None => (None, main, false, 0),
        Some((sub, sub_zpos)) => {
            if main_zpos > sub_zpos {
                (Some(main), sub, true, main.global_alpha)
            } else {
                (Some(sub), main, false, sub.global_alpha)
            }
        }
    };

    let cfg = AlphaConfig {
        src_premulti: top.map(|t| t.premultiplied).unwrap_or(false),
        dst_premulti: false,
        src_pixel_alpha: top.map(|t| t.pixel_alpha).unwrap_or(false),
        // alpha passes on to the next mixer
        dst_pixel_alpha: true,
        src_glb_alpha: src_glb,
        dst_glb_alpha: bottom.global_alpha,
    };
    let mut words = parse_alpha(&cfg);
    words.src_color.src_dst_swap = swap;
    words
}

/// What the HDR mixer stage gets this commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrMix {
    /// Stage is not written.
    Untouched,
    /// Stage bypassed, only the src color word is cleared.
    ClearSrcColor,
    /// Stage bypassed, all four words cleared.
    Clear,
    Blend(AlphaWords),
}

/// Blend words for one port's mixer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerAlpha {
    /// Stage `k` blends layer `k + 1` over the layers below it.
    pub stages: Vec<AlphaWords>,
    /// Written to the unused stages that follow.
    pub passthrough: AlphaWords,
    pub hdr: HdrMix,
}

/// Options that differ between mixer topologies.
#[derive(Debug, Clone, Copy)]
pub struct MixerOptions {
    pub per_port_mixer: bool,
    /// Port has an HDR mixer stage.
    pub has_hdr_mix: bool,
    pub hdr_en: bool,
}

/// Plans every stage for `layers`, ordered bottom first.
pub fn plan_mixer_alpha(layers: &[AlphaLayer], opts: MixerOptions) -> MixerAlpha {
    // A plain bottom layer with global alpha needs Cd = Cs + (1 - As) * Cd * Agd
    // one stage up. Clusters apply it in their own pre-blend.
    let bottom_alpha = layers
        .first()
        .filter(|b| b.global_alpha != GLOBAL_ALPHA_OPAQUE && !b.cluster)
        .copied();

    let mut hdr_premulti = match bottom_alpha {
        Some(b) if opts.per_port_mixer => b.premultiplied,
        _ => true,
    };

    let mut stages = Vec::with_capacity(layers.len().saturating_sub(1));
    for layer in layers.iter().skip(1) {
        let first = stages.is_empty();
        let cfg = match bottom_alpha {
            Some(b) if first => AlphaConfig {
                src_premulti: layer.premultiplied,
                dst_premulti: false,
                src_pixel_alpha: layer.pixel_alpha,
                dst_pixel_alpha: true,
                src_glb_alpha: layer.global_alpha,
                dst_glb_alpha: b.global_alpha,
            },
            _ if layer.cluster => AlphaConfig {
                src_premulti: layer.premultiplied,
                dst_premulti: true,
                src_pixel_alpha: true,
                dst_pixel_alpha: true,
                src_glb_alpha: GLOBAL_ALPHA_OPAQUE,
                dst_glb_alpha: GLOBAL_ALPHA_OPAQUE,
            },
            // Cd = Cs + (1 - As) * Cd
            _ => AlphaConfig {
                src_premulti: layer.premultiplied,
                dst_premulti: true,
                src_pixel_alpha: layer.pixel_alpha,
                dst_pixel_alpha: true,
                src_glb_alpha: layer.global_alpha,
                dst_glb_alpha: GLOBAL_ALPHA_OPAQUE,
            },
        };
        stages.push(parse_alpha(&cfg));
        if opts.per_port_mixer || first {
            hdr_premulti = layer.premultiplied;
        }
    }

    let passthrough = parse_alpha(&AlphaConfig {
        src_premulti: true,
        dst_premulti: true,
        src_pixel_alpha: false,
        dst_pixel_alpha: true,
        src_glb_alpha: GLOBAL_ALPHA_OPAQUE,
        dst_glb_alpha: GLOBAL_ALPHA_OPAQUE,
    });

    let hdr_words = || {
        parse_alpha(&AlphaConfig {
            src_premulti: hdr_premulti,
            dst_premulti: true,
            src_pixel_alpha: true,
            dst_pixel_alpha: true,
            src_glb_alpha: GLOBAL_ALPHA_OPAQUE,
            dst_glb_alpha: GLOBAL_ALPHA_OPAQUE,
        })
    };
    let want_hdr = bottom_alpha.is_some() || opts.hdr_en;
    let hdr = if opts.per_port_mixer {
        match (opts.has_hdr_mix, want_hdr) {
            (false, _) => HdrMix::Untouched,
            (true, true) => HdrMix::Blend(hdr_words()),
            (true, false) => HdrMix::Clear,
        }
    } else if stages.is_empty() {
        // the shared mixer only touches the hdr stage with a second layer
        HdrMix::Untouched
    } else if want_hdr {
        HdrMix::Blend(hdr_words())
    } else {
        HdrMix::ClearSrcColor
    };

    MixerAlpha { stages, passthrough, hdr }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque(pixel_alpha: bool) -> AlphaLayer {
        AlphaLayer { pixel_alpha, premultiplied: false, global_alpha: 0xff, cluster: false }
    }

    fn opts() -> MixerOptions {
        MixerOptions { per_port_mixer: false, has_hdr_mix: true, hdr_en: false }
    }

    #[test]
    fn test_parse_alpha_is_deterministic() {
        let cfg = AlphaConfig {
            src_premulti: true,
            dst_premulti: false,
            src_pixel_alpha: true,
            dst_pixel_alpha: true,
            src_glb_alpha: 0x80,
            dst_glb_alpha: 0xff,
        };
        assert_eq!(parse_alpha(&cfg).to_regs(), parse_alpha(&cfg).to_regs());
        let w = parse_alpha(&cfg);
        assert_eq!(w.src_color.blend_mode, ALPHA_PER_PIX_GLOBAL);
        assert_eq!(w.src_color.color_mode, ALPHA_SRC_PRE_MUL);
        assert_eq!(w.src_color.bits() >> 16, 0x80);
    }

    #[test]
    fn test_ctrl_word_layout() {
        let c = AlphaCtrl {
            color_mode: 1,
            alpha_mode: 0,
            blend_mode: ALPHA_PER_PIX_GLOBAL,
            alpha_cal_mode: 1,
            factor_mode: SRC_FAC_ALPHA_SRC_GLOBAL,
            alpha_en: true,
            src_dst_swap: true,
            glb_alpha: 0xff,
        };
        assert_eq!(c.bits(), 0x1 | 0x2 << 2 | 1 << 4 | 5 << 5 | 1 << 8 | 1 << 9 | 0xff << 16);
    }

    #[test]
    fn test_two_opaque_layers_blend_over() {
        let m = plan_mixer_alpha(&[opaque(false), opaque(false)], opts());
        assert_eq!(m.stages.len(), 1);
        let s = &m.stages[0];
        assert_eq!(s.src_color.blend_mode, ALPHA_GLOBAL);
        assert_eq!(s.src_color.factor_mode, SRC_FAC_ALPHA_SRC_GLOBAL);
        assert_eq!(s.src_color.color_mode, ALPHA_SRC_NO_PRE_MUL);
        assert!(s.src_color.alpha_en);
        // destination over: dst scaled by (1 - As), premultiplied path
        assert_eq!(s.dst_color.factor_mode, ALPHA_SRC_INVERSE);
        assert_eq!(s.dst_color.color_mode, ALPHA_SRC_PRE_MUL);
        assert_eq!(s.dst_color.glb_alpha, 0xff);
        assert_eq!(s.dst_alpha.blend_mode, ALPHA_PER_PIX);
        assert_eq!(m.hdr, HdrMix::ClearSrcColor);
    }

    #[test]
    fn test_bottom_layer_global_alpha_reaches_first_stage_only() {
        let mut bottom = opaque(false);
        bottom.global_alpha = 0x40;
        let layers = [bottom, opaque(true), opaque(true)];
        let m = plan_mixer_alpha(&layers, opts());
        assert_eq!(m.stages[0].dst_color.glb_alpha, 0x40);
        assert_eq!(m.stages[0].dst_color.color_mode, ALPHA_SRC_NO_PRE_MUL);
        assert_eq!(m.stages[0].dst_alpha.blend_mode, ALPHA_PER_PIX_GLOBAL);
        assert_eq!(m.stages[1].dst_color.glb_alpha, 0xff);
        assert!(matches!(m.hdr, HdrMix::Blend(_)));
    }

    #[test]
    fn test_cluster_bottom_alpha_is_not_special() {
        let mut bottom = opaque(false);
        bottom.global_alpha = 0x40;
        bottom.cluster = true;
        let m = plan_mixer_alpha(&[bottom, opaque(false)], opts());
        assert_eq!(m.stages[0].dst_color.glb_alpha, 0xff);
    }

    #[test]
    fn test_cluster_layer_only_carries_pixel_alpha() {
        let mut top = opaque(false);
        top.cluster = true;
        top.global_alpha = 0x10;
        let m = plan_mixer_alpha(&[opaque(false), top], opts());
        assert_eq!(m.stages[0].src_color.blend_mode, ALPHA_PER_PIX);
        assert_eq!(m.stages[0].src_color.glb_alpha, 0xff);
    }

    #[test]
    fn test_passthrough_keeps_alpha() {
        let m = plan_mixer_alpha(&[opaque(false)], opts());
        assert!(m.stages.is_empty());
        assert_eq!(m.passthrough.src_color.blend_mode, ALPHA_GLOBAL);
        assert_eq!(m.passthrough.src_color.color_mode, ALPHA_SRC_PRE_MUL);
        assert_eq!(m.hdr, HdrMix::Untouched);
    }

    #[test]
    fn test_per_port_mixer_hdr_stage() {
        let o = MixerOptions { per_port_mixer: true, has_hdr_mix: true, hdr_en: false };
        assert_eq!(plan_mixer_alpha(&[opaque(false)], o).hdr, HdrMix::Clear);
        let o = MixerOptions { hdr_en: true, ..o };
        match plan_mixer_alpha(&[opaque(false)], o).hdr {
            HdrMix::Blend(w) => assert_eq!(w.src_color.color_mode, ALPHA_SRC_PRE_MUL),
            other => panic!("unexpected {:?}", other),
        }
        let o = MixerOptions { has_hdr_mix: false, ..o };
        assert_eq!(plan_mixer_alpha(&[opaque(false)], o).hdr, HdrMix::Untouched);
    }

    #[test]
    fn test_cluster_pre_blend_swap() {
        let main = AlphaLayer { pixel_alpha: true, premultiplied: true, global_alpha: 0x20, cluster: true };
        let sub = AlphaLayer { pixel_alpha: false, premultiplied: false, global_alpha: 0x30, cluster: true };
        let w = cluster_alpha(&main, 2, Some((&sub, 1)));
        assert!(w.src_color.src_dst_swap);
        assert_eq!(w.src_color.glb_alpha, 0x20);
        assert_eq!(w.dst_color.glb_alpha, 0x30);

        let w = cluster_alpha(&main, 0, None);
        assert!(!w.src_color.src_dst_swap);
        assert_eq!(w.src_color.glb_alpha, 0);
        assert_eq!(w.src_color.blend_mode, ALPHA_GLOBAL);
        assert_eq!(w.dst_color.glb_alpha, 0x20);
    }
}
