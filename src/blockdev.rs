// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Walking `/sys/dev/block` to enumerate every block device the kernel
//! knows about, and resolving each to its `/dev` node.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::device::Device;
use crate::error::{Error, Result};

const SYS_DEV_BLOCK: &str = "/sys/dev/block";
const DEV_DIR: &str = "/dev";

/// One `(major, minor)` entry read from `/sys/dev/block`.
fn parse_entry_name(name: &str) -> Option<Device> {
    let mut parts = name.splitn(2, ':');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some(Device::new(major, minor))
}

/// Enumerate every `(major, minor)` pair the kernel currently exposes, in
/// directory-iteration order. This sequence is computed fresh every call,
/// so calling it again after a hotplug picks up new devices, even though
/// nothing upstream of a single scan relies on that.
pub fn enumerate() -> Result<Vec<Device>> {
    let entries = fs::read_dir(SYS_DEV_BLOCK)
        .map_err(|e| Error::System(e))?;

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::System(e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name == "." || name == ".." {
            continue;
        }

        let dev = parse_entry_name(&name)
            .ok_or_else(|| Error::device_io(format!("malformed block device entry {}", name)))?;
        devices.push(dev);
    }

    trace!("enumerated {} block devices under {}", devices.len(), SYS_DEV_BLOCK);
    Ok(devices)
}

/// Find the `/dev` node whose `st_rdev` matches `dev` and whose file type
/// is block-special. A device enumerated under `/sys/dev/block` but never
/// materializing a `/dev` node means `/dev` is inconsistent with the
/// kernel's own device list, which is a fatal system error, not a
/// recoverable per-device open failure.
pub fn resolve_node(dev: Device) -> Result<PathBuf> {
    find_node_in(Path::new(DEV_DIR), dev)?.ok_or_else(|| {
        Error::System(io::Error::new(io::ErrorKind::NotFound, format!("no device node found for {}", dev)))
    })
}

fn find_node_in(dir: &Path, dev: Device) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::System(e))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::System(e))?;
        let path = entry.path();

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };

        if meta.file_type().is_dir() {
            continue;
        }

        if !meta.file_type().is_block_device() {
            continue;
        }

        if Device::from_rdev(meta.rdev()) == dev {
            debug!("resolved {} to {}", dev, path.display());
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Open a block device node read-only for scanning.
pub fn open_device(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::device_open(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_entry_name() {
        assert_eq!(parse_entry_name("8:1"), Some(Device::new(8, 1)));
    }

    #[test]
    fn rejects_malformed_entry_name() {
        assert_eq!(parse_entry_name("nope"), None);
        assert_eq!(parse_entry_name("8"), None);
    }
}
