// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Physical Volumes, as recorded in a VG's text metadata.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::parser::{LvmTextMap, TextMapOps};

/// A Physical Volume within a Volume Group. `device` is `None` until `scan`
/// binds it to the actual block device that was read to discover it.
#[derive(Debug, PartialEq, Clone)]
pub struct PV {
    /// Name under `physical_volumes {}`, e.g. "pv0".
    pub name: String,
    /// 38-char dashed UUID.
    pub uuid: String,
    /// `(major, minor)`, bound by `scan` once the owning device is found.
    pub device: Option<Device>,
    /// PE start, in whatever unit the on-disk metadata's `pe_start` uses
    /// (see `util::hyphenate_uuid`'s sibling resolution in SPEC_FULL.md §9
    /// for the matching `extent_size` convention).
    pub start_sector: u64,
}

impl PV {
    pub fn from_textmap(name: &str, map: &LvmTextMap) -> Result<PV> {
        let id = map.get_str("id")?.to_string();
        let start_sector = map.get_num("pe_start")?;

        Ok(PV {
            name: name.to_string(),
            uuid: id,
            device: None,
            start_sector,
        })
    }

    /// Fail if this PV was declared in metadata but never bound to a real
    /// device during `scan`.
    pub fn require_bound(&self) -> Result<Device> {
        self.device
            .ok_or_else(|| Error::pv(format!("PV {} was never bound to a device", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::buf_to_textmap;

    #[test]
    fn builds_from_textmap() {
        let text = br#"pv0 { id = "012345-6789-abcd-ef01-2345-6789-abcdef" pe_start = 2048 }"#;
        let map = buf_to_textmap(text).unwrap();
        let pv = PV::from_textmap("pv0", map.get_block("pv0").unwrap()).unwrap();
        assert_eq!(pv.name, "pv0");
        assert_eq!(pv.start_sector, 2048);
        assert!(pv.device.is_none());
        assert!(pv.require_bound().is_err());
    }
}
