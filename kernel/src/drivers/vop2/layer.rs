//! Window to layer routing
//!
//! On the shared mixer chain every port's layers are stacked in port
//! order: port 0 owns the lowest layers, the next port starts where it
//! ends, and the port mux tells each port at which depth its overlay
//! output taps the chain. VOP3 gives each port its own short chain with a
//! private selector instead.
//!
//! [`Routing`] is the software view of that mapping. A hardware layer
//! must always select exactly one window, so moving a window onto a layer
//! swaps the layer's previous window onto the slot just vacated.

use super::layout::{OvlRegs, REG_OVL_LAYER_SEL, REG_OVL_PORT_SEL};
use super::profile::{HardwareProfile, LAYER_SEL_NONE, MAX_VPS};
use super::regs::{RegisterFile, VopReg};
use crate::sync::poll_timeout;
use crate::util::{ffs, hweight, Vop2Error, Vop2Result, WaitKind};

pub const MAX_LAYERS: usize = 8;
/// Phys ids are below this on every generation.
pub const MAX_WINS: usize = 8;

const NO_WIN: u8 = 0xff;
const NO_LAYER: u8 = 0xff;
/// Per-layer selector width in the layer select words.
const LAYER_SEL_BITS: u32 = 4;
const LAYER_SEL_MASK: u32 = 0xf;
/// Port mux value for a port without layers.
const PORT_MUX_EMPTY: u32 = 8;
/// The last port always sits at the top of the chain.
const PORT_MUX_LAST: u32 = 7;

pub const LAYER_CFG_TIMEOUT_US: u32 = 50_000;
pub const PORT_MUX_TIMEOUT_US: u32 = 50_000;
const POLL_STEP_US: u32 = 10;

/// Selector field of layer `layer` in the shared layer select word.
pub const fn layer_sel_field(layer: usize) -> VopReg {
    VopReg::new(REG_OVL_LAYER_SEL, LAYER_SEL_MASK, (layer as u32 * LAYER_SEL_BITS) as u8)
}

/// One active window in a port's stack, collected at commit begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZposEntry {
    pub phys_id: u8,
    /// Arena index, used as tie break between equal zpos.
    pub win: usize,
    pub zpos: u32,
}

/// Bottom first.
pub fn sort_zorder(entries: &mut [ZposEntry]) {
    entries.sort_unstable_by(|a, b| a.zpos.cmp(&b.zpos).then(a.win.cmp(&b.win)));
}

/// Port mux word plus the background delay each lower port gains from
/// its mixer depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMux {
    pub cfg: u32,
    pub bg_ovl_dly: [u32; MAX_VPS],
}

/// Routing state of the whole controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    /// Windows (phys id bits) each port owns on the mixer chain.
    pub win_mask: [u32; MAX_VPS],
    /// Port (one bit) each window is attached to.
    pub vp_mask: [u32; MAX_WINS],
    /// Port the window was last enabled on.
    pub old_vp_mask: [u32; MAX_WINS],
    /// Phys id selected by each hardware layer.
    pub layer_win: [u8; MAX_LAYERS],
    /// Layer each phys id is selected by.
    pub win_layer: [u8; MAX_WINS],
    /// Last port mux word written.
    pub port_mux_cfg: u32,
}

impl Default for Routing {
    fn default() -> Self {
        Self::new()
    }
}

impl Routing {
    pub const fn new() -> Self {
        Self {
            win_mask: [0; MAX_VPS],
            vp_mask: [0; MAX_WINS],
            old_vp_mask: [0; MAX_WINS],
            layer_win: [NO_WIN; MAX_LAYERS],
            win_layer: [NO_LAYER; MAX_WINS],
            port_mux_cfg: 0,
        }
    }

    /// Builds the reset routing on first enable. VOP2 hands each port its
    /// profile plane mask and programs the selectors to match; VOP3 adopts
    /// whatever port the hardware has each window on.
    pub fn initial(profile: &HardwareProfile, regs: &RegisterFile) -> Self {
        let mut r = Self::new();

        if profile.is_vop3() {
            for w in profile.windows.iter().filter(|w| w.parent.is_none()) {
                let phys = w.phys_id as usize;
                if phys >= MAX_WINS || r.vp_mask[phys] != 0 {
                    continue;
                }
                let vp = regs.read_field(OvlRegs::win_vp_id(w.phys_id)) as usize;
                if vp >= profile.nr_vps() {
                    continue;
                }
                r.vp_mask[phys] = 1 << vp;
                r.old_vp_mask[phys] = r.vp_mask[phys];
                r.win_mask[vp] |= 1 << phys;
            }
            return r;
        }

        let mut used = 0usize;
        for port in &profile.ports {
            r.win_mask[port.id] = port.plane_mask;
            for phys in crate::util::bits(port.plane_mask) {
                let Some(idx) = profile.window_by_phys(phys as u8) else {
                    log::error!("vop2: vp{} plane mask names missing window {}", port.id, phys);
                    continue;
                };
                let desc = &profile.windows[idx];
                let layer = used;
                used += 1;
                if layer >= MAX_LAYERS {
                    continue;
                }
                regs.write_field(OvlRegs::win_vp_id(desc.phys_id), port.id as u32);
                regs.write_field(layer_sel_field(layer), desc.layer_sel_id[port.id] as u32);
                r.vp_mask[phys] = 1 << port.id;
                r.old_vp_mask[phys] = r.vp_mask[phys];
                r.layer_win[layer] = desc.phys_id;
                r.win_layer[phys] = layer as u8;
                log::debug!("vop2: layer{} select {} for vp{}", layer, desc.name, port.id);
            }
        }

        let mux = calc_port_mux(profile, &r.win_mask);
        r.port_mux_cfg = mux.cfg;
        regs.write_field(super::layout::OVL.port_mux, mux.cfg);
        r
    }

    /// Port currently owning window `phys`, 0 when it has none.
    pub fn port_of(&self, phys: usize) -> usize {
        ffs(self.vp_mask[phys]).unwrap_or(0) as usize
    }

    /// Moves `phys` to `port`. Clearing the old port's bit here, at the
    /// new port's commit, is what defers the old port's mux change to it.
    pub fn claim(&mut self, port: usize, phys: usize) {
        let old = self.port_of(phys);
        self.win_mask[old] &= !(1 << phys);
        self.win_mask[port] |= 1 << phys;
        self.vp_mask[phys] = 1 << port;
    }

    /// First shared mixer stage of `port`.
    pub fn start_layer(&self, port: usize) -> usize {
        self.win_mask[..port].iter().map(|&m| hweight(m) as usize).sum()
    }

    /// Maps the bottom-first `stack` of `port` onto its layers, starting
    /// from the staged select word `old_cfg`. Returns the new select word.
    pub fn assign_layers(
        &mut self,
        profile: &HardwareProfile,
        regs: &RegisterFile,
        port: usize,
        stack: &[ZposEntry],
        old_cfg: u32,
    ) -> u32 {
        let used = self.start_layer(port);
        let sel_of = |phys: u8| -> Option<u32> {
            let idx = profile.window_by_phys(phys)?;
            Some(profile.windows[idx].layer_sel_id[port] as u32)
        };
        let update = |cfg: u32, layer: usize, sel: u32| {
            let f = layer_sel_field(layer);
            (cfg & !(f.mask << f.shift)) | f.place(sel)
        };

        let mut cfg = old_cfg;
        for (i, z) in stack.iter().enumerate() {
            let layer = used + i;
            if layer >= MAX_LAYERS {
                log::error!("vop2: vp{} has more windows than layers", port);
                break;
            }
            let phys = z.phys_id as usize;
            let vacated = self.win_layer[phys];
            let displaced = self.layer_win[layer];

            regs.write_field(OvlRegs::win_vp_id(z.phys_id), port as u32);
            if let Some(sel) = sel_of(z.phys_id) {
                cfg = update(cfg, layer, sel);
            }
            self.win_layer[phys] = layer as u8;
            self.layer_win[layer] = z.phys_id;

            // hand the vacated layer to the window that was just pushed out
            if vacated != NO_LAYER && displaced != NO_WIN {
                if let Some(sel) = sel_of(displaced) {
                    cfg = update(cfg, vacated as usize, sel);
                }
                self.win_layer[displaced as usize] = vacated;
                self.layer_win[vacated as usize] = displaced;
            }
        }
        cfg
    }

    /// Every window maps to one layer and every layer to at most one window.
    pub fn is_consistent(&self) -> bool {
        self.layer_win.iter().enumerate().all(|(layer, &w)| {
            w == NO_WIN || (w as usize) < MAX_WINS && self.win_layer[w as usize] as usize == layer
        }) && self.win_layer.iter().enumerate().all(|(phys, &l)| {
            l == NO_LAYER || (l as usize) < MAX_LAYERS && self.layer_win[l as usize] as usize == phys
        })
    }
}

/// Port mux word for the current window masks. Only the lower ports are
/// programmable: the last one is fixed at the top of the chain.
pub fn calc_port_mux(profile: &HardwareProfile, win_mask: &[u32; MAX_VPS]) -> PortMux {
    let mut mux = PortMux { cfg: 0, bg_ovl_dly: [0; MAX_VPS] };
    let nr_vps = profile.nr_vps();
    if nr_vps == 0 {
        return mux;
    }

    let mut used = 0;
    for id in 0..nr_vps - 1 {
        used += hweight(win_mask[id]);
        let port_mux = if used == 0 { PORT_MUX_EMPTY } else { used - 1 };
        mux.cfg |= port_mux << (id * 4);
        mux.bg_ovl_dly[id] = if port_mux > profile.nr_mixers {
            0
        } else {
            (profile.nr_mixers - port_mux) << 1
        };
    }
    mux.cfg |= PORT_MUX_LAST << (4 * (nr_vps - 1));
    mux
}

/// Writes the shared layer select word once the previous one has been
/// latched, then points the overlay config-done at `port`.
pub fn write_layer_sel(
    regs: &RegisterFile,
    port: usize,
    old_cfg: u32,
    new_cfg: u32,
    delay: &mut dyn FnMut(u32),
) -> Vop2Result<()> {
    let mut result = Ok(());
    let active = regs.read(REG_OVL_LAYER_SEL);
    if new_cfg != old_cfg && active != old_cfg {
        log::debug!("vop2: wait old layer sel {:#x}", old_cfg);
        let ok = poll_timeout(LAYER_CFG_TIMEOUT_US, POLL_STEP_US, delay, || {
            regs.read(REG_OVL_LAYER_SEL) == old_cfg
        });
        if !ok {
            log::error!(
                "vop2: wait layer cfg done timeout: {:#x}--{:#x}",
                regs.read(REG_OVL_LAYER_SEL),
                old_cfg
            );
            result = Err(Vop2Error::TimingTimeout(WaitKind::LayerConfig));
        }
    }

    regs.write(REG_OVL_LAYER_SEL, new_cfg);
    regs.write_field(super::layout::OVL.ovl_cfg_done_port, port as u32);
    regs.write_bool(super::layout::OVL.ovl_port_mux_cfg_done_imd, false);
    result
}

/// Polls until the hardware reports `cfg` as its port mux.
pub fn wait_port_mux(regs: &RegisterFile, cfg: u32, delay: &mut dyn FnMut(u32)) -> Vop2Result<()> {
    let read = || regs.read(REG_OVL_PORT_SEL) & 0xffff;
    if poll_timeout(PORT_MUX_TIMEOUT_US, POLL_STEP_US, delay, || read() == cfg) {
        Ok(())
    } else {
        log::error!("vop2: wait port_mux done timeout: {:#x}--{:#x}", read(), cfg);
        Err(Vop2Error::TimingTimeout(WaitKind::PortMux))
    }
}

/// VOP3 per-port selector: the stack fills the port's own layers bottom
/// up, the rest select nothing.
pub fn vop3_layer_sel(
    profile: &HardwareProfile,
    regs: &RegisterFile,
    routing: &Routing,
    port: usize,
    stack: &[ZposEntry],
) -> u32 {
    let mut layer_sel = 0u32;
    for i in 0..profile.nr_layers as usize {
        let mut sel = LAYER_SEL_MASK;
        if let Some(z) = stack.get(i) {
            let phys = z.phys_id as usize;
            let desc = &profile.windows[z.win];
            if routing.old_vp_mask[phys] != routing.vp_mask[phys] && regs.read_field(desc.regs.enable) != 0 {
                log::error!(
                    "vop2: must wait {} disabled and change vp_mask[{:#x}->{:#x}]",
                    desc.name,
                    routing.old_vp_mask[phys],
                    routing.vp_mask[phys]
                );
            }
            regs.write_field(OvlRegs::win_vp_id(z.phys_id), port as u32);
            let id = desc.layer_sel_id[port];
            if id != LAYER_SEL_NONE {
                sel = id as u32 & LAYER_SEL_MASK;
            }
        }
        layer_sel |= sel << (i as u32 * LAYER_SEL_BITS);
    }
    regs.write(profile.ports[port].regs.layer_sel, layer_sel);
    layer_sel
}
