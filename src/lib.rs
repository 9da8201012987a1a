//! LVM2 volume discovery and logical-volume activation for an initramfs
//! init agent.
//!
//! The crate reads on-disk LVM2 label/metadata structures directly (no
//! lvmetad, no locking daemon) to build an in-memory model of PVs, VGs and
//! LVs, then drives device-mapper directly over its ioctl interface to
//! activate a single named LV. See [`context::Context`] for the entry point.

pub mod blockdev;
pub mod context;
pub mod device;
pub mod dm;
pub mod error;
pub mod lv;
pub mod parser;
pub mod pv;
pub mod pvlabel;
pub mod tag;
pub mod vg;
mod util;

pub use context::Context;
pub use error::{Error, Result};
