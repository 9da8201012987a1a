// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The error kinds an LVM2 Context can report, and their fixed ABI codes.

use std::io;

use thiserror::Error;

/// The ABI codes callers reading `Context::errno()` depend on. These values
/// come from the original `lvm2app.h` and are not ours to renumber.
pub const OUT_OF_MEMORY: i32 = -100;
pub const SYSTEM: i32 = -2;
pub const DEVICE_OPEN: i32 = -3;
pub const DEVICE_IO: i32 = -4;
pub const DATA_AREA: i32 = -5;
pub const VG_METADATA: i32 = -6;
pub const PV: i32 = -7;
pub const DYNBUF: i32 = -8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,

    #[error("system error: {0}")]
    System(#[from] io::Error),

    /// Recoverable during `scan`: the scanner clears this per device and
    /// keeps going. Propagated as-is for single-device reads.
    #[error("could not open device: {0}")]
    DeviceOpen(String),

    #[error("device I/O error: {0}")]
    DeviceIo(String),

    #[error("PV has more than one data area, which is not supported")]
    DataArea,

    #[error("VG metadata error: {0}")]
    VgMetadata(String),

    #[error("PV binding error: {0}")]
    Pv(String),

    #[error("internal buffer error: {0}")]
    DynBuf(String),
}

impl Error {
    /// The fixed negative-integer code this error kind reports through
    /// `errno()`. Part of the public ABI -- see the constants above.
    pub fn code(&self) -> i32 {
        match self {
            Error::OutOfMemory => OUT_OF_MEMORY,
            Error::System(_) => SYSTEM,
            Error::DeviceOpen(_) => DEVICE_OPEN,
            Error::DeviceIo(_) => DEVICE_IO,
            Error::DataArea => DATA_AREA,
            Error::VgMetadata(_) => VG_METADATA,
            Error::Pv(_) => PV,
            Error::DynBuf(_) => DYNBUF,
        }
    }

    pub fn is_device_open(&self) -> bool {
        matches!(self, Error::DeviceOpen(_))
    }

    pub fn vg_metadata(msg: impl Into<String>) -> Error {
        Error::VgMetadata(msg.into())
    }

    pub fn device_open(msg: impl Into<String>) -> Error {
        Error::DeviceOpen(msg.into())
    }

    pub fn device_io(msg: impl Into<String>) -> Error {
        Error::DeviceIo(msg.into())
    }

    pub fn pv(msg: impl Into<String>) -> Error {
        Error::Pv(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
