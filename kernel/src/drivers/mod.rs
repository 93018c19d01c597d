//! Device drivers

pub mod vop2;
