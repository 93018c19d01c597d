//! Write-back
//!
//! The write-back unit captures one port's blended output into memory. A
//! job is queued with [`Vop2::wb_submit`], programmed by that port's next
//! commit and retired two frame starts later: the first latches the
//! registers, the second marks the end of the captured frame.

use super::crtc::CrtcState;
use super::format::convert_wb_format;
use super::irq::{irq_enable, SysIrq};
use super::layout::WB;
use super::plane::Framebuffer;
use super::profile::ScaleFilter;
use super::scale::{scale_factor, ScaleMode};
use super::{DeviceState, Vop2};
use crate::util::{div_round_up, Vop2Error, Vop2Result};

pub const WB_JOB_MAX: usize = 2;
/// Frame starts from programming to a written frame.
const WB_DONE_FS: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WbJob {
    pub pending: bool,
    pub fs_vsync_cnt: u32,
}

/// Jobs in flight, shared with the ISR.
#[derive(Debug, Default)]
pub struct WbRing {
    pub jobs: [WbJob; WB_JOB_MAX],
    pub job_index: usize,
}

impl WbRing {
    pub fn in_flight(&self) -> usize {
        self.jobs.iter().filter(|j| j.pending).count()
    }
}

/// Validated write-back target, staged until its port commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WbState {
    pub port: usize,
    pub fb: Framebuffer,
    pub format: u32,
    pub yrgb_mst: u32,
    pub uv_mst: u32,
    pub scale_x_factor: u16,
    pub scale_x_en: bool,
    pub scale_y_en: bool,
}

/// Checks `fb` against the output of `crtc`. Only horizontal down
/// scaling and vertical halving are supported.
pub fn check_wb(port: usize, crtc: &CrtcState, fb: &Framebuffer) -> Vop2Result<WbState> {
    let mode = &crtc.mode;
    if !fb.format.is_yuv() && crtc.bus_format.is_yuv() {
        log::error!("vop2: YUV2RGB is not supported by writeback");
        return Err(Vop2Error::UnsupportedFormat(fb.format));
    }

    if fb.width > mode.hdisplay || (fb.height != mode.vdisplay && fb.height != mode.vdisplay >> 1) {
        log::debug!(
            "vop2: invalid wb size {}x{}, only x scale down and 1/2 y scale down",
            fb.width,
            fb.height
        );
        return Err(Vop2Error::ScaleOutOfRange);
    }

    let format = convert_wb_format(fb.format).ok_or(Vop2Error::UnsupportedFormat(fb.format))?;
    let yrgb_mst = fb.dma_addr[0];
    // uv follows yrgb without a gap, pitch padding included
    let uv_mst = if fb.format.is_yuv() {
        yrgb_mst + div_round_up(fb.width * fb.format.bpp(0), 8) * fb.height
    } else {
        0
    };

    Ok(WbState {
        port,
        fb: *fb,
        format,
        yrgb_mst,
        uv_mst,
        scale_x_factor: scale_factor(ScaleMode::Down, ScaleFilter::Bilinear, mode.hdisplay, fb.width),
        scale_x_en: fb.width < mode.hdisplay,
        scale_y_en: fb.height < mode.vdisplay,
    })
}

impl Vop2 {
    /// Queues a capture of `port`'s output into `fb`, programmed by the
    /// port's next commit.
    pub fn wb_submit(&self, port: usize, fb: &Framebuffer) -> Vop2Result<()> {
        let mut st = self.state.lock();
        let crtc = st
            .ports
            .get(port)
            .ok_or(Vop2Error::UnknownPort(port))?
            .crtc
            .ok_or(Vop2Error::PortDisabled(port))?;
        let wb = check_wb(port, &crtc, fb)?;

        let ring = self.wb.lock();
        if ring.jobs[ring.job_index].pending {
            return Err(Vop2Error::WriteBackBusy);
        }
        drop(ring);

        log::debug!("vop2: vp{} wb {}x{} staged", port, fb.width, fb.height);
        st.wb_staged = Some(wb);
        Ok(())
    }

    /// Write-back jobs completed so far are consumed one per call.
    pub fn wb_try_complete(&self) -> bool {
        self.wb_done.try_wait()
    }

    pub fn wb_in_flight(&self) -> usize {
        self.wb.lock().in_flight()
    }

    /// Programs a staged job of `port`. Caller holds `irq_lock`.
    pub(crate) fn wb_commit(&self, st: &mut DeviceState, port: usize, crtc: &CrtcState) {
        self.irq_lock.assert_held();
        let Some(wb) = st.wb_staged.filter(|w| w.port == port) else {
            return;
        };
        st.wb_staged = None;

        log::debug!(
            "vop2: enable wb {}x{} fmt: {} pitch: {} addr: {:#x}",
            wb.fb.width,
            wb.fb.height,
            wb.format,
            wb.fb.pitches[0],
            wb.yrgb_mst
        );

        {
            let mut ring = self.wb.lock();
            let idx = ring.job_index;
            ring.jobs[idx] = WbJob { pending: true, fs_vsync_cnt: 0 };
            ring.job_index = (idx + 1) % WB_JOB_MAX;
        }

        let fifo_throd = (wb.fb.pitches[0] >> 4).min(self.profile.wb_fifo_depth);
        let r2y = !crtc.yuv_overlay && wb.fb.format.is_yuv();

        // vp_id takes effect immediately
        self.regs.write_field(WB.vp_id, port as u32);
        self.regs.write_field(WB.format, wb.format);
        self.regs.write_field(WB.yrgb_mst, wb.yrgb_mst);
        self.regs.write_field(WB.uv_mst, wb.uv_mst);
        self.regs.write_field(WB.fifo_throd, fifo_throd);
        self.regs.write_field(WB.scale_x_factor, wb.scale_x_factor as u32);
        self.regs.write_bool(WB.scale_x_en, wb.scale_x_en);
        self.regs.write_bool(WB.scale_y_en, wb.scale_y_en);
        self.regs.write_bool(WB.r2y_en, r2y);
        self.regs.write_bool(WB.enable, true);

        let fifo = (SysIrq::WB_UV_FIFO_FULL | SysIrq::WB_YRGB_FIFO_FULL).bits();
        irq_enable(&self.regs, &self.profile.sys.axi_irq, fifo, true);
    }

    /// Frame start bookkeeping of the write-back unit, from the ISR.
    pub(crate) fn wb_handler(&self, port: usize) {
        if self.regs.read_field(WB.vp_id) != port as u32 {
            return;
        }

        // one shot: turn the unit off as soon as it has latched
        if self.regs.read_field(WB.enable) != 0 {
            self.regs.write_bool(WB.enable, false);
            self.wb_cfg_done(port);
        }

        let mut ring = self.wb.lock();
        for job in ring.jobs.iter_mut().filter(|j| j.pending) {
            job.fs_vsync_cnt += 1;
            if job.fs_vsync_cnt == WB_DONE_FS {
                *job = WbJob::default();
                self.wb_done.complete();
            }
        }
    }
}
