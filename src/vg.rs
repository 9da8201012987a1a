// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Volume Groups: the model builder (SPEC_FULL.md §4.D) and the
//! VG/PV registry (§4.E).

use std::collections::BTreeMap;

use log::{info, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::lv::{Area, LV};
use crate::parser::{buf_to_textmap, Entry, LvmTextMap, TextMapOps};
use crate::pv::PV;

/// A Volume Group allows multiple Physical Volumes to be treated as a
/// storage pool used to allocate Logical Volumes. The core is strictly
/// read-only: a VG is built once from its text metadata and never mutated
/// afterward, except to bind further PV `(major, minor)` fields as more
/// devices are scanned.
#[derive(Debug, PartialEq, Clone)]
pub struct VG {
    pub name: String,
    pub uuid: String,
    pub extent_size: u64,
    pub pvs: BTreeMap<String, PV>,
    pub lvs: BTreeMap<String, LV>,
    /// The raw metadata blob this VG was built from, retained so a later
    /// PV reporting the same VG UUID can be checked for byte-identity.
    pub raw_metadata: Vec<u8>,
}

impl VG {
    /// Parse a full metadata blob (`vg_name { ... }`) into a `VG`.
    pub fn from_blob(raw_metadata: &[u8]) -> Result<VG> {
        let top = buf_to_textmap(raw_metadata)?;

        let (name, map) = top
            .iter()
            .find_map(|(k, v)| match v {
                Entry::TextMap(m) => Some((k.clone(), m.as_ref())),
                _ => None,
            })
            .ok_or_else(|| Error::vg_metadata("metadata blob has no top-level VG block"))?;

        let uuid = map.get_str("id")?.to_string();
        if uuid.len() != 38 {
            return Err(Error::vg_metadata(format!("VG UUID {} is not 38 characters", uuid)));
        }
        let extent_size = map.get_num("extent_size")?;

        let pv_block = map.get_block("physical_volumes")?;
        let mut pvs = BTreeMap::new();
        for (key, value) in pv_block {
            let pv_map = match value {
                Entry::TextMap(m) => m.as_ref(),
                _ => return Err(Error::vg_metadata(format!("expected PV block for {}", key))),
            };
            pvs.insert(key.clone(), PV::from_textmap(key, pv_map)?);
        }

        let mut lvs = BTreeMap::new();
        if let Some(lv_block) = map.textmap_from_textmap("logical_volumes") {
            for (key, value) in lv_block {
                let lv_map = match value {
                    Entry::TextMap(m) => m.as_ref(),
                    _ => return Err(Error::vg_metadata(format!("expected LV block for {}", key))),
                };
                lvs.insert(key.clone(), LV::from_textmap(key, lv_map)?);
            }
        }

        let vg = VG {
            name,
            uuid,
            extent_size,
            pvs,
            lvs,
            raw_metadata: raw_metadata.to_vec(),
        };

        vg.validate_references()?;

        info!("built VG {} ({}): {} PVs, {} LVs", vg.name, vg.uuid, vg.pvs.len(), vg.lvs.len());
        Ok(vg)
    }

    /// P3: every `MapToPV` area must name a PV that exists in this VG.
    fn validate_references(&self) -> Result<()> {
        for lv in self.lvs.values() {
            for seg in &lv.segments {
                for area in &seg.areas {
                    if let Area::MapToPV { pv_name, .. } = area {
                        if !self.pvs.contains_key(pv_name) {
                            return Err(Error::vg_metadata(format!(
                                "LV {} segment references unknown PV {}",
                                lv.name, pv_name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn find_pv_by_name(&self, name: &str) -> Option<&PV> {
        self.pvs.get(name)
    }

    pub fn find_pv_by_uuid(&self, uuid: &str) -> Option<&PV> {
        self.pvs.values().find(|pv| pv.uuid == uuid)
    }

    pub fn find_lv_by_name(&self, name: &str) -> Option<&LV> {
        self.lvs.get(name)
    }

    fn find_pv_by_uuid_mut(&mut self, uuid: &str) -> Option<&mut PV> {
        self.pvs.values_mut().find(|pv| pv.uuid == uuid)
    }

    /// Bind a just-discovered device as the backing store for one of this
    /// VG's PVs (§4.E step 4). `pv_uuid` must already be present, and not
    /// already bound to a different device.
    pub fn bind_pv(&mut self, pv_uuid: &str, dev: Device) -> Result<()> {
        let pv = self
            .find_pv_by_uuid_mut(pv_uuid)
            .ok_or_else(|| Error::vg_metadata(format!("PV {} not declared in VG {}", pv_uuid, self.name)))?;

        if let Some(existing) = pv.device {
            if existing != dev {
                return Err(Error::pv(format!("PV {} already bound to {}", pv_uuid, existing)));
            }
            warn!("PV {} seen again at the same device {}", pv_uuid, dev);
            return Ok(());
        }

        pv.device = Some(dev);
        Ok(())
    }

    /// P1: `get_str(raw_metadata, "id") == uuid`.
    pub fn metadata_id_matches(&self) -> bool {
        buf_to_textmap(&self.raw_metadata)
            .ok()
            .and_then(|top| {
                top.values().find_map(|v| match v {
                    Entry::TextMap(m) => m.get_str("id").ok().map(|s| s == self.uuid),
                    _ => None,
                })
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> &'static [u8] {
        br#"vg0 {
            id = "AAAAAA-BBBB-CCCC-DDDD-EEEE-FFFF-111122"
            extent_size = 8192
            physical_volumes {
                pv0 { id = "012345-6789-abcd-ef01-2345-6789-abcdef" pe_start = 2048 }
            }
            logical_volumes {
                root {
                    id = "111111-2222-3333-4444-5555-6666-777788"
                    status = ["READ", "WRITE", "VISIBLE"]
                    segment_count = 1
                    segment1 {
                        start_extent = 0
                        extent_count = 100
                        type = "striped"
                        stripe_count = 1
                        stripes = ["pv0", 0]
                    }
                }
            }
        }"#
    }

    #[test]
    fn builds_vg_with_pv_and_lv() {
        let vg = VG::from_blob(sample_blob()).unwrap();
        assert_eq!(vg.name, "vg0");
        assert_eq!(vg.extent_size, 8192);
        assert!(vg.find_pv_by_name("pv0").is_some());
        assert!(vg.find_lv_by_name("root").is_some());
        assert!(vg.metadata_id_matches());
    }

    #[test]
    fn lv_size_matches_segment_sum() {
        let vg = VG::from_blob(sample_blob()).unwrap();
        let lv = vg.find_lv_by_name("root").unwrap();
        assert_eq!(lv.size_sectors(vg.extent_size), 100 * 8192);
    }

    #[test]
    fn bind_pv_then_rebind_different_device_fails() {
        let mut vg = VG::from_blob(sample_blob()).unwrap();
        let uuid = vg.find_pv_by_name("pv0").unwrap().uuid.clone();
        vg.bind_pv(&uuid, Device::new(8, 1)).unwrap();
        assert!(vg.bind_pv(&uuid, Device::new(8, 2)).is_err());
    }

    #[test]
    fn dangling_segment_reference_is_rejected() {
        let text = br#"vg0 {
            id = "AAAAAA-BBBB-CCCC-DDDD-EEEE-FFFF-111122"
            extent_size = 8192
            physical_volumes {
                pv0 { id = "012345-6789-abcd-ef01-2345-6789-abcdef" pe_start = 2048 }
            }
            logical_volumes {
                root {
                    id = "111111-2222-3333-4444-5555-6666-777788"
                    status = ["READ", "VISIBLE"]
                    segment_count = 1
                    segment1 {
                        start_extent = 0
                        extent_count = 100
                        type = "striped"
                        stripe_count = 1
                        stripes = ["pv1", 0]
                    }
                }
            }
        }"#;
        assert!(VG::from_blob(text).is_err());
    }
}
