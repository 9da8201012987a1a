// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The public entry point (SPEC_FULL.md §4.G): owns the VG registry, the
//! lazily-opened device-mapper control handle, and the last error.

use log::{debug, warn};

use crate::blockdev;
use crate::dm::DmClient;
use crate::error::{Error, Result};
use crate::parser::TextMapOps;
use crate::pvlabel::PvHeader;
use crate::tag::{Tag, TagCache, TagKind};
use crate::vg::VG;

/// A handle returned by [`Context::open_vg`]. Owns a snapshot of the VG
/// rather than borrowing it from the registry, so a caller can hold it
/// across the later `&mut self` call to `activate_lv` without fighting the
/// borrow checker the way a live reference into `Context` would.
pub struct VgHandle {
    vg: VG,
}

impl VgHandle {
    pub fn name(&self) -> &str {
        &self.vg.name
    }

    /// §4.G `lookup_lv`.
    pub fn lookup_lv(&self, name: &str) -> Option<LvHandle> {
        self.vg.find_lv_by_name(name).map(|lv| LvHandle { vg: self.vg.clone(), lv: lv.clone() })
    }
}

/// A handle to an LV within a VG, sufficient to drive `activate_lv` without
/// re-resolving the VG.
pub struct LvHandle {
    vg: VG,
    lv: crate::lv::LV,
}

impl LvHandle {
    pub fn name(&self) -> &str {
        &self.lv.name
    }
}

/// Owns every VG discovered by `scan`, the DM control handle (opened lazily
/// on first activation), and the most recently installed error.
///
/// Mirrors the `lvm2app.h` opaque-handle API: every fallible operation
/// returns a sentinel and installs `(code, message)` here rather than
/// returning a `Result` all the way out to FFI-shaped callers. The Rust
/// surface keeps `Result` internally (`scan`, `activate_lv`) and additionally
/// latches the error for callers that poll `errno`/`errmsg`, matching the
/// propagation policy in SPEC_FULL.md §7.
pub struct Context {
    vgs: Vec<VG>,
    dm: Option<DmClient>,
    last_error: Option<Error>,
}

impl Context {
    /// §4.G `init`. Infallible except for host allocation failure, which
    /// can't usefully be observed from safe Rust, so this just builds the
    /// empty registry.
    pub fn init() -> Context {
        Context { vgs: Vec::new(), dm: None, last_error: None }
    }

    /// The ABI error code of the most recent failure, or 0 if none has
    /// occurred yet. Successful calls do not clear this -- callers that
    /// care must check immediately after the call that might have failed.
    pub fn errno(&self) -> i32 {
        self.last_error.as_ref().map_or(0, Error::code)
    }

    pub fn errmsg(&self) -> String {
        self.last_error.as_ref().map_or_else(String::new, ToString::to_string)
    }

    /// Install `err` as the last error and return `false`, for use as the
    /// tail expression of any bool-returning API call.
    fn fail(&mut self, err: Error) -> bool {
        self.last_error = Some(err);
        false
    }

    /// §4.A + §4.B + §4.E: enumerate every block device, read its label and
    /// metadata area if present, and fold the result into the VG registry.
    /// `DEVICE_OPEN` failures on an individual device are swallowed so one
    /// dead optical drive doesn't abort the whole scan; anything else
    /// aborts and is left in `last_error`.
    pub fn scan(&mut self) -> bool {
        let devices = match blockdev::enumerate() {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };

        for dev in devices {
            let path = match blockdev::resolve_node(dev) {
                Ok(p) => p,
                Err(e) if e.is_device_open() => {
                    warn!("skipping {}: {}", dev, e);
                    continue;
                }
                Err(e) => return self.fail(e),
            };

            let pvheader = match PvHeader::find_in_dev(&path) {
                Ok(h) => h,
                Err(e) if e.is_device_open() => {
                    warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
                Err(Error::DeviceIo(_)) => {
                    // no LVM2 label in the first 4 sectors: not a PV, move on.
                    continue;
                }
                Err(e) => return self.fail(e),
            };

            let raw_metadata = match pvheader.read_metadata_blob() {
                Ok(blob) => blob,
                Err(e) => return self.fail(e),
            };

            if let Err(e) = self.fold_in_device(dev, &pvheader.uuid, &raw_metadata) {
                return self.fail(e);
            }
        }

        true
    }

    /// §4.E steps 1-4, given a device's decoded PV UUID and VG metadata blob.
    fn fold_in_device(&mut self, dev: crate::device::Device, pv_uuid: &str, raw_metadata: &[u8]) -> Result<()> {
        let vg_uuid = {
            let top = crate::parser::buf_to_textmap(raw_metadata)?;
            top.iter()
                .find_map(|(_, v)| match v {
                    crate::parser::Entry::TextMap(m) => m.get_str("id").ok().map(str::to_string),
                    _ => None,
                })
                .ok_or_else(|| Error::vg_metadata("metadata blob has no top-level VG block"))?
        };

        if vg_uuid.len() != 38 {
            return Err(Error::vg_metadata(format!("VG UUID {} is not 38 characters", vg_uuid)));
        }

        let idx = self.vgs.iter().position(|vg| vg.uuid == vg_uuid);

        let idx = match idx {
            Some(i) => {
                if self.vgs[i].raw_metadata != raw_metadata {
                    return Err(Error::vg_metadata(format!(
                        "conflicting metadata for VG {} seen on {}",
                        self.vgs[i].name, dev
                    )));
                }
                i
            }
            None => {
                let vg = VG::from_blob(raw_metadata)?;
                self.vgs.push(vg);
                self.vgs.len() - 1
            }
        };

        self.vgs[idx].bind_pv(pv_uuid, dev)?;
        debug!("bound PV {} to {} in VG {}", pv_uuid, dev, self.vgs[idx].name);
        Ok(())
    }

    /// §4.G `open_vg`: first (and only) matching VG by name.
    pub fn open_vg(&self, name: &str) -> Option<VgHandle> {
        self.vgs.iter().find(|vg| vg.name == name).map(|vg| VgHandle { vg: vg.clone() })
    }

    pub fn find_vg_by_uuid(&self, uuid: &str) -> Option<VgHandle> {
        self.vgs.iter().find(|vg| vg.uuid == uuid).map(|vg| VgHandle { vg: vg.clone() })
    }

    /// §4.G `activate_lv`, running the full §4.F protocol. The DM control
    /// handle is opened on first use and kept for the Context's lifetime.
    pub fn activate_lv(&mut self, lv: &LvHandle) -> bool {
        if self.dm.is_none() {
            match DmClient::open() {
                Ok(client) => self.dm = Some(client),
                Err(e) => return self.fail(e),
            }
        }

        match self.dm.as_ref().unwrap().activate_lv(&lv.vg, &lv.lv) {
            Ok(()) => true,
            Err(e) => self.fail(e),
        }
    }

    /// §4.I: build a tag resolver seeded with every PV and VG UUID this
    /// Context's scan already knows, on top of the generic bcachefs walk
    /// `TagCache::rebuild` performs on its own. A VG UUID resolves to
    /// whichever of its bound PVs is found first.
    pub fn build_tag_cache(&self) -> Result<TagCache> {
        let mut cache = TagCache::new();
        cache.rebuild()?;

        for vg in &self.vgs {
            let mut vg_device = None;
            for pv in vg.pvs.values() {
                let dev = match pv.device {
                    Some(d) => d,
                    None => continue,
                };
                let path = match blockdev::resolve_node(dev) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                cache.insert(Tag { kind: TagKind::Uuid, value: pv.uuid.clone() }, path.clone());
                vg_device.get_or_insert(path);
            }
            if let Some(path) = vg_device {
                cache.insert(Tag { kind: TagKind::Uuid, value: vg.uuid.clone() }, path);
            }
        }

        Ok(cache)
    }

    /// §4.G `quit`: release the registry and the DM control fd (if opened).
    /// Idempotent because it consumes the Context -- there is no handle left
    /// to call it on twice. Rust's `Drop` would do this anyway; this exists
    /// so callers that mirror the original `lvm_init`/`lvm_quit` pairing have
    /// an explicit call site.
    pub fn quit(self) {}
}

impl Default for Context {
    fn default() -> Context {
        Context::init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_no_error() {
        let ctx = Context::init();
        assert_eq!(ctx.errno(), 0);
        assert_eq!(ctx.errmsg(), "");
    }

    #[test]
    fn open_vg_on_empty_registry_returns_none() {
        let ctx = Context::init();
        assert!(ctx.open_vg("vg0").is_none());
    }

    #[test]
    fn fold_in_device_rejects_conflicting_metadata() {
        let mut ctx = Context::init();
        let a = br#"vg0 {
            id = "AAAAAA-BBBB-CCCC-DDDD-EEEE-FFFF-111122"
            extent_size = 8192
            physical_volumes {
                pv0 { id = "012345-6789-abcd-ef01-2345-6789-abcdef" pe_start = 0 }
            }
        }"#;
        let b = br#"vg0 {
            id = "AAAAAA-BBBB-CCCC-DDDD-EEEE-FFFF-111122"
            extent_size = 4096
            physical_volumes {
                pv0 { id = "012345-6789-abcd-ef01-2345-6789-abcdef" pe_start = 0 }
            }
        }"#;

        let dev0 = crate::device::Device::new(8, 0);
        let dev1 = crate::device::Device::new(8, 1);

        ctx.fold_in_device(dev0, "012345-6789-abcd-ef01-2345-6789-abcdef", a).unwrap();
        let err = ctx.fold_in_device(dev1, "012345-6789-abcd-ef01-2345-6789-abcdef", b).unwrap_err();
        assert!(err.to_string().contains("vg0"));
    }

    #[test]
    fn tag_cache_skips_unbound_pvs() {
        // No devices are bound in an empty registry, so the cache has
        // nothing to seed beyond whatever bcachefs scan of the real host
        // `rebuild` performs; this just asserts `build_tag_cache` doesn't
        // error out on an empty VG list.
        let ctx = Context::init();
        assert!(ctx.build_tag_cache().is_ok());
    }
}
