//! Hardware capability descriptors
//!
//! Everything that differs between controller generations is captured
//! here as data: window inventory, per-port features and delays, mixer
//! counts and a small set of quirk switches. Programming code queries the
//! profile instead of comparing version numbers.

use alloc::boxed::Box;
use alloc::vec::Vec;
use bitflags::bitflags;

use super::hdr::{HdrTable, VIVID_MODES};
use super::layout::{AfbcRegs, ClusterRegs, SysRegs, VpRegs, WinRegs, SYS};
use super::regs::VopReg;

/// Most ports any generation has.
pub const MAX_VPS: usize = 4;
/// Layer selector value meaning "no window".
pub const LAYER_SEL_NONE: u8 = 0xff;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WinFeature: u32 {
        /// AFBC decoder present.
        const AFBDC           = 1 << 0;
        const CLUSTER_MAIN    = 1 << 1;
        const CLUSTER_SUB     = 1 << 2;
        /// Parent of (or area within) a multi-area window.
        const MULTI_AREA      = 1 << 3;
        /// YUV to RGB conversion runs at 13 bit depth.
        const Y2R_13BIT_DEPTH = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortFeature: u32 {
        const HDR10     = 1 << 0;
        const VIVID_HDR = 1 << 1;
        /// Post ACM block; the port always outputs through r2y when overlaying in YUV.
        const POST_ACM  = 1 << 2;
        const GAMMA     = 1 << 3;
        const CUBIC_LUT = 1 << 4;
        /// Port drives 10 bit per component in AAAA mode.
        const OUTPUT_10BIT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Rk3568,
    Rk3588,
    Rk3528,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinType {
    Cluster,
    Esmart,
    Smart,
}

/// Scaler filter taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFilter {
    Nearest,
    Bilinear,
    Bicubic,
    Average,
}

impl ScaleFilter {
    pub fn code(self) -> u32 {
        match self {
            ScaleFilter::Nearest => 0,
            ScaleFilter::Bilinear => 1,
            ScaleFilter::Bicubic | ScaleFilter::Average => 2,
        }
    }
}

/// Decimation ahead of the scaler on newer generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreScaleFilter {
    Gt,
    Avg,
}

/// Index into [`WindowDesc::dly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlyMode {
    Default = 0,
    /// HDR in, SDR out, SDR window.
    HisoS = 1,
    /// HDR in, HDR out, HDR window.
    HihoH = 2,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowDesc {
    pub name: &'static str,
    pub phys_id: u8,
    pub win_type: WinType,
    pub feature: WinFeature,
    pub regs: WinRegs,
    pub afbc: AfbcRegs,
    pub cluster: ClusterRegs,
    /// Selector this window answers to on each port's layers.
    pub layer_sel_id: [u8; MAX_VPS],
    pub max_input: (u32, u32),
    pub hsu_filter: ScaleFilter,
    pub hsd_filter: ScaleFilter,
    pub vsu_filter: ScaleFilter,
    pub vsd_filter: ScaleFilter,
    pub hsd_pre_filter: PreScaleFilter,
    pub vsd_pre_filter: PreScaleFilter,
    pub axi_id: u8,
    pub axi_yrgb_id: u8,
    pub axi_uv_id: u8,
    pub scale_engine_num: u8,
    /// Arena index of the multi-area parent.
    pub parent: Option<usize>,
    pub area_id: u8,
    pub dly: [u32; 3],
}

impl WindowDesc {
    pub fn is_cluster(&self) -> bool {
        self.win_type == WinType::Cluster
    }
}

pub struct PortDesc {
    pub id: usize,
    pub feature: PortFeature,
    /// Windows (by phys id bit) owned by this port after reset.
    pub plane_mask: u32,
    pub gamma_lut_len: u32,
    pub cubic_lut_len: u32,
    /// bg delay per hdr state: [default, sdr in/hdr out, hdr in/hdr out, sdr in/sdr out].
    pub pre_scan_max_dly: [u32; 4],
    pub hdr_table: Option<Box<HdrTable>>,
    pub win_dly: u32,
    pub layer_mix_dly: u32,
    pub hdr_mix_dly: u32,
    pub sdr2hdr_dly: u32,
    /// Latency of the vivid engine per [`super::hdr::VividMode`].
    pub hdrvivid_dly: [u32; VIVID_MODES],
    pub lut_dma_rid: u32,
    pub regs: VpRegs,
}

/// Behavioural differences that do not fit the register map.
#[derive(Debug, Clone, Copy)]
pub struct Quirks {
    /// One 3 bit config-done latch shared by all ports.
    pub shared_cfg_done: bool,
    /// Cluster windows fetch AFBC only.
    pub cluster_afbc_only: bool,
    /// Esmart can't scale down with act_w % 16 == 1 and afbc width must be 4 aligned.
    pub act_width_fixup: bool,
    pub afbc_auto_gating: bool,
    /// Cluster decodes all 10 bit AFBC YUV into 444.
    pub afbc_yuv10_as_444: bool,
    pub win_axi_cfg: bool,
    /// Two pixel per cycle scaler: vertical decimation kicks in earlier above 1920.
    pub ygt_2ppc: bool,
    /// Lower bound of hsync in pre-scan timing.
    pub min_prescan_hsync: u32,
    pub bt656_dclk_x4: bool,
    /// Gamma LUT must be disabled and drained before reload.
    pub gamma_disable_before_load: bool,
    /// Count post-buffer-empty on this port to trigger a reset.
    pub post_buf_empty_port: Option<usize>,
}

pub struct HardwareProfile {
    pub generation: Generation,
    pub version: u32,
    /// Layer mixer per port with its own selector (VOP3).
    pub vop3: bool,
    pub nr_mixers: u32,
    pub nr_layers: u32,
    pub ports: Vec<PortDesc>,
    pub windows: Vec<WindowDesc>,
    pub wb_fifo_depth: u32,
    pub sys: SysRegs,
    pub quirks: Quirks,
}

impl HardwareProfile {
    pub fn nr_vps(&self) -> usize {
        self.ports.len()
    }

    pub fn is_vop3(&self) -> bool {
        self.vop3
    }

    /// Arena index of the window that owns layer slot `phys_id`: cluster
    /// subs and multi-area children share their main window's phys id.
    pub fn window_by_phys(&self, phys_id: u8) -> Option<usize> {
        self.windows.iter().position(|w| {
            w.phys_id == phys_id && w.parent.is_none() && !w.feature.contains(WinFeature::CLUSTER_SUB)
        })
    }

    /// Highest phys id plus one.
    pub fn nr_phys(&self) -> usize {
        self.windows.iter().map(|w| w.phys_id as usize + 1).max().unwrap_or(0)
    }

    pub fn rk3568() -> Self {
        let mut windows = Vec::new();
        push_cluster(&mut windows, "Cluster0", 0, 0x1000, [0, 0, 0, LAYER_SEL_NONE], false);
        push_cluster(&mut windows, "Cluster1", 1, 0x1200, [1, 1, 1, LAYER_SEL_NONE], false);
        windows.push(esmart("Esmart0", 2, 0x1800, [2, 2, 2, LAYER_SEL_NONE], WinType::Esmart, false));
        windows.push(esmart("Esmart1", 3, 0x1a00, [6, 6, 6, LAYER_SEL_NONE], WinType::Esmart, false));
        let smart0 = windows.len();
        windows.push(esmart("Smart0", 4, 0x1c00, [3, 3, 3, LAYER_SEL_NONE], WinType::Smart, false));
        windows.push(area("Smart0-win1", smart0, 4, 0x1c00, 1));
        windows.push(esmart("Smart1", 5, 0x1e00, [7, 7, 7, LAYER_SEL_NONE], WinType::Smart, false));
        windows[smart0].feature |= WinFeature::MULTI_AREA;

        let mut vp0 = port(0, 0b01_0101, [69, 53, 53, 42], false);
        vp0.feature = PortFeature::HDR10 | PortFeature::GAMMA | PortFeature::OUTPUT_10BIT;
        vp0.hdr_table = Some(Box::new(HdrTable::generated()));
        vp0.gamma_lut_len = 1024;
        let mut vp1 = port(1, 0b10_1010, [40, 40, 40, 40], false);
        vp1.feature = PortFeature::GAMMA;
        vp1.gamma_lut_len = 1024;
        let mut vp2 = port(2, 0, [40, 40, 40, 40], false);
        vp2.feature = PortFeature::GAMMA;
        vp2.gamma_lut_len = 256;

        Self {
            generation: Generation::Rk3568,
            version: 0x40_15_8000,
            vop3: false,
            nr_mixers: 5,
            nr_layers: 6,
            ports: alloc::vec![vp0, vp1, vp2],
            windows,
            wb_fifo_depth: 1920,
            sys: SYS,
            quirks: Quirks {
                shared_cfg_done: true,
                cluster_afbc_only: true,
                act_width_fixup: true,
                afbc_auto_gating: false,
                afbc_yuv10_as_444: true,
                win_axi_cfg: false,
                ygt_2ppc: false,
                min_prescan_hsync: 0,
                bt656_dclk_x4: false,
                gamma_disable_before_load: true,
                post_buf_empty_port: None,
            },
        }
    }

    pub fn rk3588() -> Self {
        let mut windows = Vec::new();
        push_cluster(&mut windows, "Cluster0", 0, 0x1000, [0, 0, 0, 0], true);
        push_cluster(&mut windows, "Cluster1", 1, 0x1200, [1, 1, 1, 1], true);
        windows.push(esmart("Esmart0", 2, 0x1800, [2, 2, 2, 2], WinType::Esmart, true));
        windows.push(esmart("Esmart1", 3, 0x1a00, [3, 3, 3, 3], WinType::Esmart, true));
        push_cluster(&mut windows, "Cluster2", 4, 0x1400, [4, 4, 4, 4], true);
        push_cluster(&mut windows, "Cluster3", 5, 0x1600, [5, 5, 5, 5], true);
        windows.push(esmart("Esmart2", 6, 0x1c00, [6, 6, 6, 6], WinType::Esmart, true));
        windows.push(esmart("Esmart3", 7, 0x1e00, [7, 7, 7, 7], WinType::Esmart, true));

        let mut vp0 = port(0, 0b0000_0101, [42, 42, 42, 42], false);
        vp0.feature = PortFeature::HDR10
            | PortFeature::GAMMA
            | PortFeature::CUBIC_LUT
            | PortFeature::OUTPUT_10BIT
            | PortFeature::POST_ACM;
        vp0.gamma_lut_len = 1024;
        vp0.cubic_lut_len = 729;
        vp0.hdr_table = Some(Box::new(HdrTable::generated()));
        let mut vp1 = port(1, 0b0000_1010, [42, 42, 42, 42], false);
        vp1.feature = PortFeature::GAMMA | PortFeature::CUBIC_LUT | PortFeature::OUTPUT_10BIT;
        vp1.gamma_lut_len = 1024;
        vp1.cubic_lut_len = 729;
        let mut vp2 = port(2, 0b0101_0000, [52, 52, 52, 52], false);
        vp2.feature = PortFeature::GAMMA | PortFeature::CUBIC_LUT;
        vp2.gamma_lut_len = 1024;
        vp2.cubic_lut_len = 125;
        let vp3 = port(3, 0b1010_0000, [52, 52, 52, 52], false);

        Self {
            generation: Generation::Rk3588,
            version: 0x40_17_6786,
            vop3: false,
            nr_mixers: 7,
            nr_layers: 8,
            ports: alloc::vec![vp0, vp1, vp2, vp3],
            windows,
            wb_fifo_depth: 1920,
            sys: SYS,
            quirks: Quirks {
                shared_cfg_done: false,
                cluster_afbc_only: false,
                act_width_fixup: false,
                afbc_auto_gating: true,
                afbc_yuv10_as_444: false,
                win_axi_cfg: true,
                ygt_2ppc: false,
                min_prescan_hsync: 8,
                bt656_dclk_x4: false,
                gamma_disable_before_load: false,
                post_buf_empty_port: None,
            },
        }
    }

    pub fn rk3528() -> Self {
        let mut windows = Vec::new();
        push_cluster(&mut windows, "Cluster0", 0, 0x1000, [0, 0, 0, 0], true);
        for (i, name) in ["Esmart0", "Esmart1", "Esmart2", "Esmart3"].into_iter().enumerate() {
            let phys = 2 + i as u8;
            let sel = 1 + i as u8;
            let mut w = esmart(name, phys, 0x1800 + i as u32 * 0x200, [sel; MAX_VPS], WinType::Esmart, true);
            w.hsd_pre_filter = PreScaleFilter::Avg;
            w.vsd_pre_filter = PreScaleFilter::Avg;
            w.scale_engine_num = i as u8 % 2;
            windows.push(w);
        }

        let mut vp0 = port(0, 0b0000_1101, [10, 10, 10, 10], true);
        vp0.feature = PortFeature::VIVID_HDR | PortFeature::GAMMA | PortFeature::OUTPUT_10BIT;
        vp0.gamma_lut_len = 1024;
        vp0.win_dly = 10;
        vp0.layer_mix_dly = 6;
        vp0.hdr_mix_dly = 2;
        vp0.sdr2hdr_dly = 21;
        vp0.hdrvivid_dly = [17, 29, 32, 44, 15, 38, 1, 29, 0, 0];
        vp0.lut_dma_rid = 0;
        let mut vp1 = port(1, 0b0011_0000, [10, 10, 10, 10], true);
        vp1.win_dly = 8;
        vp1.layer_mix_dly = 8;

        let mut sys = SYS;
        sys.init_clear = VopReg::new(0x700, 0x3, 4);

        Self {
            generation: Generation::Rk3528,
            version: 0x50_17_0000,
            vop3: true,
            nr_mixers: 4,
            nr_layers: 4,
            ports: alloc::vec![vp0, vp1],
            windows,
            wb_fifo_depth: 1024,
            sys,
            quirks: Quirks {
                shared_cfg_done: false,
                cluster_afbc_only: false,
                act_width_fixup: false,
                afbc_auto_gating: true,
                afbc_yuv10_as_444: false,
                win_axi_cfg: true,
                ygt_2ppc: true,
                min_prescan_hsync: 8,
                bt656_dclk_x4: true,
                gamma_disable_before_load: false,
                post_buf_empty_port: Some(1),
            },
        }
    }
}

fn port(id: usize, plane_mask: u32, pre_scan_max_dly: [u32; 4], per_port_mixer: bool) -> PortDesc {
    PortDesc {
        id,
        feature: PortFeature::empty(),
        plane_mask,
        gamma_lut_len: 0,
        cubic_lut_len: 0,
        pre_scan_max_dly,
        hdr_table: None,
        win_dly: 0,
        layer_mix_dly: 0,
        hdr_mix_dly: 0,
        sdr2hdr_dly: 0,
        hdrvivid_dly: [0; VIVID_MODES],
        lut_dma_rid: id as u32,
        regs: VpRegs::new(id as u8, per_port_mixer),
    }
}

fn push_cluster(
    windows: &mut Vec<WindowDesc>,
    name: &'static str,
    phys_id: u8,
    base: u32,
    layer_sel_id: [u8; MAX_VPS],
    y2r_13bit: bool,
) {
    let depth = if y2r_13bit { WinFeature::Y2R_13BIT_DEPTH } else { WinFeature::empty() };
    let main = WindowDesc {
        name,
        phys_id,
        win_type: WinType::Cluster,
        feature: WinFeature::AFBDC | WinFeature::CLUSTER_MAIN | depth,
        regs: WinRegs::at(base),
        afbc: AfbcRegs::at(base),
        cluster: ClusterRegs::at(base),
        layer_sel_id,
        max_input: (4096, 2304),
        hsu_filter: ScaleFilter::Bicubic,
        hsd_filter: ScaleFilter::Bilinear,
        vsu_filter: ScaleFilter::Bicubic,
        vsd_filter: ScaleFilter::Bilinear,
        hsd_pre_filter: PreScaleFilter::Gt,
        vsd_pre_filter: PreScaleFilter::Gt,
        axi_id: 0,
        axi_yrgb_id: 2,
        axi_uv_id: 3,
        scale_engine_num: 0,
        parent: None,
        area_id: 0,
        dly: [0, 27, 21],
    };
    let sub_base = base + 0x80;
    let sub = WindowDesc {
        name: sub_name(name),
        feature: WinFeature::AFBDC | WinFeature::CLUSTER_SUB | depth,
        regs: WinRegs::at(sub_base),
        afbc: AfbcRegs::at(sub_base),
        axi_yrgb_id: 4,
        axi_uv_id: 5,
        layer_sel_id: [LAYER_SEL_NONE; MAX_VPS],
        ..main
    };
    windows.push(main);
    windows.push(sub);
}

fn sub_name(main: &'static str) -> &'static str {
    match main {
        "Cluster0" => "Cluster0-win1",
        "Cluster1" => "Cluster1-win1",
        "Cluster2" => "Cluster2-win1",
        "Cluster3" => "Cluster3-win1",
        _ => "Cluster-win1",
    }
}

fn esmart(
    name: &'static str,
    phys_id: u8,
    base: u32,
    layer_sel_id: [u8; MAX_VPS],
    win_type: WinType,
    y2r_13bit: bool,
) -> WindowDesc {
    let smart = win_type == WinType::Smart;
    WindowDesc {
        name,
        phys_id,
        win_type,
        feature: if y2r_13bit { WinFeature::Y2R_13BIT_DEPTH } else { WinFeature::empty() },
        regs: WinRegs::at(base),
        afbc: AfbcRegs::NONE,
        cluster: ClusterRegs::NONE,
        layer_sel_id,
        max_input: (4096, 2304),
        hsu_filter: if smart { ScaleFilter::Bilinear } else { ScaleFilter::Bicubic },
        hsd_filter: ScaleFilter::Bilinear,
        vsu_filter: ScaleFilter::Bilinear,
        vsd_filter: ScaleFilter::Bilinear,
        hsd_pre_filter: PreScaleFilter::Gt,
        vsd_pre_filter: PreScaleFilter::Gt,
        axi_id: 1,
        axi_yrgb_id: 0x6 + phys_id * 2,
        axi_uv_id: 0x7 + phys_id * 2,
        scale_engine_num: 0,
        parent: None,
        area_id: 0,
        dly: [7, 14, 21],
    }
}

fn area(name: &'static str, parent: usize, phys_id: u8, parent_base: u32, area_id: u8) -> WindowDesc {
    WindowDesc {
        name,
        phys_id,
        win_type: WinType::Smart,
        feature: WinFeature::MULTI_AREA,
        regs: WinRegs::area(parent_base + 0x100 + (area_id as u32 - 1) * 0x20),
        afbc: AfbcRegs::NONE,
        cluster: ClusterRegs::NONE,
        layer_sel_id: [LAYER_SEL_NONE; MAX_VPS],
        max_input: (4096, 2304),
        hsu_filter: ScaleFilter::Bilinear,
        hsd_filter: ScaleFilter::Bilinear,
        vsu_filter: ScaleFilter::Bilinear,
        vsd_filter: ScaleFilter::Bilinear,
        hsd_pre_filter: PreScaleFilter::Gt,
        vsd_pre_filter: PreScaleFilter::Gt,
        axi_id: 1,
        axi_yrgb_id: 0,
        axi_uv_id: 0,
        scale_engine_num: 0,
        parent: Some(parent),
        area_id,
        dly: [7, 14, 21],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariants(p: &HardwareProfile) {
        // every window that owns layers has a unique phys id
        let mut seen = 0u32;
        for w in &p.windows {
            if w.feature.contains(WinFeature::CLUSTER_SUB) || w.parent.is_some() {
                continue;
            }
            assert_eq!(seen & (1 << w.phys_id), 0, "{} duplicates a phys id", w.name);
            seen |= 1 << w.phys_id;
        }
        // reset plane masks are disjoint and only reference real windows
        let mut owned = 0u32;
        for port in &p.ports {
            assert_eq!(owned & port.plane_mask, 0);
            owned |= port.plane_mask;
        }
        assert_eq!(owned & !seen, 0);
    }

    #[test]
    fn test_builtin_profiles_are_consistent() {
        for p in [HardwareProfile::rk3568(), HardwareProfile::rk3588(), HardwareProfile::rk3528()] {
            check_invariants(&p);
            assert!(p.nr_vps() <= MAX_VPS);
        }
    }

    #[test]
    fn test_cluster_sub_follows_main() {
        let p = HardwareProfile::rk3568();
        let main = &p.windows[0];
        let sub = &p.windows[1];
        assert!(main.feature.contains(WinFeature::CLUSTER_MAIN));
        assert!(sub.feature.contains(WinFeature::CLUSTER_SUB));
        assert_eq!(main.phys_id, sub.phys_id);
        assert_eq!(sub.regs.enable.offset, main.regs.enable.offset + 0x80);
    }

    #[test]
    fn test_window_by_phys_skips_sub_and_area() {
        let p = HardwareProfile::rk3568();
        assert_eq!(p.window_by_phys(0), Some(0));
        assert_eq!(p.window_by_phys(1), Some(2));
        assert_eq!(p.windows[p.window_by_phys(4).unwrap()].name, "Smart0");
        assert_eq!(p.window_by_phys(9), None);
        assert_eq!(p.nr_phys(), 6);
        assert_eq!(HardwareProfile::rk3588().nr_phys(), 8);
    }

    #[test]
    fn test_area_window_has_parent() {
        let p = HardwareProfile::rk3568();
        let a = p.windows.iter().find(|w| w.name == "Smart0-win1").unwrap();
        let parent = &p.windows[a.parent.unwrap()];
        assert_eq!(parent.name, "Smart0");
        assert!(parent.feature.contains(WinFeature::MULTI_AREA));
    }
}
