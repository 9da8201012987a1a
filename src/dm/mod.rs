// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Communicating with the running kernel's device-mapper driver.

pub mod dm_ioctl;

use std::fs::{File, OpenOptions};
use std::mem;
use std::os::unix::fs::symlink;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use log::{debug, info};
use nix::ioctl_readwrite;

use crate::dm::dm_ioctl as dmi;
use crate::error::{Error, Result};
use crate::lv::{Area, SegmentKind, LV};
use crate::util::align_to;
use crate::vg::VG;

const DM_CTL_PATH: &str = "/dev/mapper/control";
const DM_MAPPER_DIR: &str = "/dev/mapper";

const DM_VERSION_MAJOR: u32 = 4;
const DM_VERSION_MINOR: u32 = 30;
const DM_VERSION_PATCHLEVEL: u32 = 0;

ioctl_readwrite!(dm_version_ioctl, dmi::DM_IOCTL, dmi::DM_VERSION_CMD, dmi::DmIoctl);
ioctl_readwrite!(dm_dev_create_ioctl, dmi::DM_IOCTL, dmi::DM_DEV_CREATE_CMD, dmi::DmIoctl);
ioctl_readwrite!(dm_dev_suspend_ioctl, dmi::DM_IOCTL, dmi::DM_DEV_SUSPEND_CMD, dmi::DmIoctl);
ioctl_readwrite!(dm_table_load_ioctl, dmi::DM_IOCTL, dmi::DM_TABLE_LOAD_CMD, dmi::DmIoctl);

/// A lazily-opened handle to `/dev/mapper/control`, cached for a Context's
/// lifetime.
pub struct DmClient {
    file: File,
}

impl DmClient {
    pub fn open() -> Result<DmClient> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DM_CTL_PATH)
            .map_err(Error::System)?;
        let client = DmClient { file };
        client.check_driver_version()?;
        Ok(client)
    }

    /// `DM_VERSION` round-trips the caller's interface version and fills in
    /// the running driver's; mismatched major versions mean the wire format
    /// assumed by this client (header layout, target-spec layout) no longer
    /// applies.
    fn check_driver_version(&self) -> Result<()> {
        let mut hdr = dmi::DmIoctl::default();
        Self::initialize_hdr(&mut hdr);
        hdr.data_size = hdr.data_start;

        unsafe { dm_version_ioctl(self.file.as_raw_fd(), &mut hdr) }
            .map_err(|e| Error::device_io(format!("DM_VERSION failed: {}", e)))?;

        if hdr.version[0] != DM_VERSION_MAJOR {
            return Err(Error::device_io(format!(
                "kernel device-mapper major version {} is incompatible with {}",
                hdr.version[0], DM_VERSION_MAJOR
            )));
        }

        debug!("device-mapper driver version {}.{}.{}", hdr.version[0], hdr.version[1], hdr.version[2]);
        Ok(())
    }

    fn initialize_hdr(hdr: &mut dmi::DmIoctl) {
        hdr.version = [DM_VERSION_MAJOR, DM_VERSION_MINOR, DM_VERSION_PATCHLEVEL];
        hdr.data_start = mem::size_of::<dmi::DmIoctl>() as u32;
    }

    fn hdr_set_name(hdr: &mut dmi::DmIoctl, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(dmi::DM_NAME_LEN - 1);
        hdr.name[..len].copy_from_slice(&bytes[..len]);
    }

    fn hdr_set_uuid(hdr: &mut dmi::DmIoctl, uuid: &str) {
        let bytes = uuid.as_bytes();
        let len = bytes.len().min(dmi::DM_UUID_LEN - 1);
        hdr.uuid[..len].copy_from_slice(&bytes[..len]);
    }

    /// `"<vg.name>.<lv.name>"` per §4.F step 1.
    fn dm_name(vg: &VG, lv: &LV) -> String {
        format!("{}.{}", vg.name, lv.name)
    }

    /// `"LVM-" + vg.uuid(no dashes) + lv.uuid(no dashes)`, 68 characters.
    fn dm_uuid(vg: &VG, lv: &LV) -> String {
        format!("LVM-{}{}", vg.uuid.replace('-', ""), lv.uuid.replace('-', ""))
    }

    fn create_device(&self, name: &str, uuid: &str) -> Result<crate::device::Device> {
        let mut hdr = dmi::DmIoctl::default();
        Self::initialize_hdr(&mut hdr);
        Self::hdr_set_name(&mut hdr, name);
        Self::hdr_set_uuid(&mut hdr, uuid);
        hdr.data_size = hdr.data_start;

        unsafe { dm_dev_create_ioctl(self.file.as_raw_fd(), &mut hdr) }
            .map_err(|e| Error::device_io(format!("DM_DEV_CREATE failed: {}", e)))?;

        Ok(crate::device::Device::from_rdev(hdr.dev))
    }

    /// Build one `dm_target_spec` + padded parameter string for a striped
    /// segment. Only single-area (linear) and multi-area striped targets
    /// are built; backslashes in the parameter string are doubled per the
    /// DM wire escaping rule.
    fn build_target(vg: &VG, seg: &crate::lv::Segment) -> Result<Vec<u8>> {
        if seg.kind != SegmentKind::Striped {
            return Err(Error::vg_metadata(format!("cannot activate unsupported segment kind {:?}", seg.kind)));
        }

        let mut param = String::new();
        if seg.areas.len() == 1 {
            let area = &seg.areas[0];
            let (pv_name, area_start) = match area {
                Area::MapToPV { pv_name, start_extent } => (pv_name, *start_extent),
                Area::MapToLV { .. } => {
                    return Err(Error::vg_metadata("LV-mapped areas are not supported for activation"))
                }
            };
            let pv = vg
                .find_pv_by_name(pv_name)
                .ok_or_else(|| Error::vg_metadata(format!("segment references unknown PV {}", pv_name)))?;
            let dev = pv.require_bound()?;
            let start_sector = pv.start_sector + area_start * vg.extent_size;
            param.push_str(&format!("{} {}", dev, start_sector));
        } else {
            param.push_str(&format!("{} {}", seg.areas.len(), seg.stripe_size.unwrap_or(0)));
            for area in &seg.areas {
                let (pv_name, area_start) = match area {
                    Area::MapToPV { pv_name, start_extent } => (pv_name, *start_extent),
                    Area::MapToLV { .. } => {
                        return Err(Error::vg_metadata("LV-mapped areas are not supported for activation"))
                    }
                };
                let pv = vg
                    .find_pv_by_name(pv_name)
                    .ok_or_else(|| Error::vg_metadata(format!("segment references unknown PV {}", pv_name)))?;
                let dev = pv.require_bound()?;
                let start_sector = pv.start_sector + area_start * vg.extent_size;
                param.push_str(&format!(" {} {}", dev, start_sector));
            }
        }

        let param = param.replace('\\', "\\\\");

        let mut targ = dmi::DmTargetSpec::default();
        targ.sector_start = seg.start_extent * vg.extent_size;
        targ.length = seg.extent_count * vg.extent_size;
        targ.status = 0;

        let type_name = if seg.areas.len() == 1 { b"linear" as &[u8] } else { b"striped" as &[u8] };
        targ.target_type[..type_name.len()].copy_from_slice(type_name);

        let mut param_bytes = param.into_bytes();
        param_bytes.push(0);
        let padded_len = align_to(param_bytes.len(), 8);
        param_bytes.resize(padded_len, 0);

        targ.next = (mem::size_of::<dmi::DmTargetSpec>() + param_bytes.len()) as u32;

        let mut buf = Vec::with_capacity(targ.next as usize);
        buf.extend_from_slice(unsafe { dmi::as_bytes(&targ) });
        buf.extend_from_slice(&param_bytes);

        Ok(buf)
    }

    fn load_device(&self, vg: &VG, lv: &LV, name: &str) -> Result<()> {
        let mut target_bufs = Vec::new();
        for seg in &lv.segments {
            target_bufs.push(Self::build_target(vg, seg)?);
        }

        let data_start = mem::size_of::<dmi::DmIoctl>();
        let data_size = data_start + target_bufs.iter().map(Vec::len).sum::<usize>();

        let mut hdr = dmi::DmIoctl::default();
        Self::initialize_hdr(&mut hdr);
        Self::hdr_set_name(&mut hdr, name);
        hdr.data_start = data_start as u32;
        hdr.data_size = data_size as u32;
        hdr.target_count = target_bufs.len() as u32;

        let mut buf = vec![0u8; data_size];
        buf[..data_start].copy_from_slice(unsafe { dmi::as_bytes(&hdr) });
        let mut offset = data_start;
        for t in &target_bufs {
            buf[offset..offset + t.len()].copy_from_slice(t);
            offset += t.len();
        }

        let hdr_ptr = buf.as_mut_ptr() as *mut dmi::DmIoctl;
        unsafe { dm_table_load_ioctl(self.file.as_raw_fd(), hdr_ptr) }
            .map_err(|e| Error::device_io(format!("DM_TABLE_LOAD failed: {}", e)))?;

        Ok(())
    }

    fn resume_device(&self, name: &str) -> Result<()> {
        let mut hdr = dmi::DmIoctl::default();
        Self::initialize_hdr(&mut hdr);
        Self::hdr_set_name(&mut hdr, name);
        hdr.data_size = hdr.data_start;
        // flags left at 0: DM_DEV_SUSPEND with no suspend flag resumes.

        unsafe { dm_dev_suspend_ioctl(self.file.as_raw_fd(), &mut hdr) }
            .map_err(|e| Error::device_io(format!("DM_DEV_SUSPEND (resume) failed: {}", e)))?;

        Ok(())
    }

    /// Run the full activation protocol (§4.F) for `lv` within `vg`:
    /// create, load, resume, then symlink `/dev/mapper/<name>`.
    pub fn activate_lv(&self, vg: &VG, lv: &LV) -> Result<()> {
        let name = Self::dm_name(vg, lv);
        let uuid = Self::dm_uuid(vg, lv);
        debug_assert_eq!(uuid.len(), 68);

        let dev = self.create_device(&name, &uuid)?;
        self.load_device(vg, lv, &name)?;
        self.resume_device(&name)?;

        let link_path = PathBuf::from(DM_MAPPER_DIR).join(&name);
        let target = format!("../dm-{}", dev.minor);
        match symlink(&target, &link_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(Error::System(e)),
        }

        info!("activated LV {} as {}", lv.name, link_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TextMapOps;

    #[test]
    fn dm_name_and_uuid_match_scenario() {
        let vg_name = "vg0";
        let vg_uuid = "AAAAAA-BBBB-CCCC-DDDD-EEEE-FFFF-111122";
        let lv_name = "root";
        let lv_uuid = "111111-2222-3333-4444-5555-6666-777788";

        let name = format!("{}.{}", vg_name, lv_name);
        let uuid = format!("LVM-{}{}", vg_uuid.replace('-', ""), lv_uuid.replace('-', ""));

        assert_eq!(name, "vg0.root");
        assert_eq!(uuid.len(), 68);
    }

    fn scenario1_vg_and_lv() -> (VG, LV) {
        let blob = br#"vg0 {
            id = "AAAAAA-BBBB-CCCC-DDDD-EEEE-FFFF-111122"
            extent_size = 8192
            physical_volumes {
                pv0 { id = "012345-6789-ABCD-EF01-2345-6789-ABCDEF" pe_start = 2048 }
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
        }"#;
        let mut vg = VG::from_blob(blob).unwrap();
        vg.bind_pv("012345-6789-ABCD-EF01-2345-6789-ABCDEF", crate::device::Device::new(8, 1)).unwrap();
        let lv = vg.find_lv_by_name("root").unwrap().clone();
        (vg, lv)
    }

    /// P6: a single-segment single-area striped LV produces exactly one
    /// `"linear"` target whose parameter string is
    /// `"<major>:<minor> <pv.start_sector + area.start_extent * vg.extent_size>"`.
    #[test]
    fn build_target_matches_linear_activation_scenario() {
        let (vg, lv) = scenario1_vg_and_lv();
        assert_eq!(lv.segments.len(), 1);

        let buf = DmClient::build_target(&vg, &lv.segments[0]).unwrap();
        let spec_len = mem::size_of::<dmi::DmTargetSpec>();
        let spec = unsafe { &*(buf.as_ptr() as *const dmi::DmTargetSpec) };

        assert_eq!(spec.sector_start, 0);
        assert_eq!(spec.length, 100 * 8192);

        let type_str = std::str::from_utf8(&spec.target_type).unwrap().trim_end_matches('\0');
        assert_eq!(type_str, "linear");

        let param = std::str::from_utf8(&buf[spec_len..]).unwrap().trim_end_matches('\0');
        assert_eq!(param, "8:1 2048");
    }

    #[test]
    fn build_target_rejects_unsupported_segment_kind() {
        let text = br#"lv0 {
            id = "x"
            status = ["READ"]
            segment_count = 1
            segment1 { start_extent = 0 extent_count = 1 type = "striped" stripe_count = 1 stripes = ["pv0", 0] }
        }"#;
        let map = crate::parser::buf_to_textmap(text).unwrap();
        let lv = crate::lv::LV::from_textmap("lv0", map.get_block("lv0").unwrap()).unwrap();
        let mut seg = lv.segments[0].clone();
        seg.kind = SegmentKind::Mirror;

        let vg = scenario1_vg_and_lv().0;
        assert!(DmClient::build_target(&vg, &seg).is_err());
    }
}
