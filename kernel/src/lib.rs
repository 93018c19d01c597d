//! Overlay composition and timing-sync engine for Rockchip VOP2/VOP3
//! display controllers.
//!
//! The driver core lives in [`drivers::vop2`]. It talks to the hardware
//! through a register window and a [`drivers::vop2::Platform`] supplied by
//! the integrator, so it runs unchanged inside a kernel or against fakes.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod sync;
pub mod util;
