//! Memory bandwidth estimate of a port's planes, for diagnostics.

use alloc::vec::Vec;

use super::crtc::DisplayMode;
use super::plane::WindowPlaneState;

/// Vertical span of one plane on screen and the bytes it fetches per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneBandwidth {
    pub y1: i32,
    pub y2: i32,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandwidthReport {
    /// Peak line fetch rate in MB/s.
    pub line_bw_mbyte: u64,
    pub frame_bw_mbyte: u64,
    pub plane_num: u32,
}

fn vskiplines(src_h: u64, dst_h: u64) -> u64 {
    if src_h >= dst_h * 4 {
        4
    } else if src_h >= dst_h * 2 {
        2
    } else {
        1
    }
}

/// Bytes fetched for one output line of `st`.
pub fn plane_line_bandwidth(st: &WindowPlaneState) -> u64 {
    let Some(fb) = st.active() else {
        return 0;
    };
    let src_w = (st.src.width() >> 16) as i64;
    let src_h = (st.src.height() >> 16) as i64;
    let dst_w = st.dst.width() as i64;
    let dst_h = st.dst.height() as i64;
    if src_w <= 0 || src_h <= 0 || dst_w <= 0 || dst_h <= 0 {
        return 0;
    }
    let (src_w, src_h, dst_w, dst_h) = (src_w as u64, src_h as u64, dst_w as u64, dst_h as u64);

    let mut bw = src_w * fb.format.bpp(0) as u64 / 8;
    bw = bw * src_w / dst_w;
    bw = bw * src_h / dst_h;
    bw / vskiplines(src_h, dst_h)
}

/// Largest sum over planes that overlap vertically, `bw` sorted by `y1`.
fn max_overlap(bw: &[PlaneBandwidth], start: usize, y2: i32) -> u64 {
    let mut max = 0;
    for (i, p) in bw.iter().enumerate().skip(start) {
        if p.y1 > y2 {
            continue;
        }
        let sum = p.bandwidth + max_overlap(bw, i + 1, p.y2.min(y2));
        max = max.max(sum);
    }
    max
}

/// Estimates the fetch load of `planes` scanned out with `mode`.
pub fn port_bandwidth(mode: &DisplayMode, planes: &[&WindowPlaneState]) -> BandwidthReport {
    let mut report = BandwidthReport::default();
    if mode.htotal == 0 || mode.vdisplay == 0 {
        return report;
    }

    let mut bw = Vec::with_capacity(planes.len());
    for st in planes {
        let Some(fb) = st.active() else {
            continue;
        };
        report.plane_num += 1;
        // empirical: compressed buffers fetch about half
        let afbc_fac = if fb.modifier.afbc { 2 } else { 1 };
        bw.push(PlaneBandwidth {
            y1: st.dst.y1,
            y2: st.dst.y2,
            bandwidth: plane_line_bandwidth(st) / afbc_fac,
        });

        let act_w = (st.src.width() >> 16).max(0) as u64;
        let act_h = (st.src.height() >> 16).max(0) as u64;
        let bpp = fb.format.bpp(0) as u64;
        report.frame_bw_mbyte += act_w * act_h / 1000 * bpp / 8 * mode.vrefresh() as u64 / afbc_fac / 1000;
    }

    bw.sort_unstable_by_key(|p| p.y1);
    let line = max_overlap(&bw, 0, mode.vdisplay as i32);
    report.line_bw_mbyte = line * mode.clock as u64 / (mode.htotal as u64 * 1000);
    report
}
