// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resolving device tags (`LABEL=`, `UUID=`, `UUID_SUB=`, `PARTUUID=`) to
//! device-node paths for external collaborators (mount helpers, the
//! init-script interpreter), plus bcachefs superblock recognition.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use log::trace;

use crate::blockdev;
use crate::error::{Error, Result};

const BCACHEFS_MAGIC_OFFSET: usize = 24;
const BCACHEFS_MAGIC_LEN: usize = 16;
const BCACHEFS_UUID_OFFSET: usize = 40;
const BCACHEFS_UUID_LEN: usize = 16;
const BCACHEFS_MAGIC: [u8; BCACHEFS_MAGIC_LEN] = [
    0xc6, 0x85, 0x73, 0xf6, 0x4e, 0x1a, 0x45, 0xca, 0x82, 0x65, 0xf5, 0x7f, 0x48, 0xba, 0x6d, 0x81,
];

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TagKind {
    Label,
    Uuid,
    UuidSub,
    PartUuid,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Tag {
    pub kind: TagKind,
    pub value: String,
}

impl Tag {
    /// Parse `LABEL=x` / `UUID=x` / `UUID_SUB=x` / `PARTUUID=x`.
    pub fn parse(s: &str) -> Result<Tag> {
        let (prefix, value) = s
            .split_once('=')
            .ok_or_else(|| Error::vg_metadata(format!("malformed tag {}", s)))?;

        let kind = match prefix {
            "LABEL" => TagKind::Label,
            "UUID" => TagKind::Uuid,
            "UUID_SUB" => TagKind::UuidSub,
            "PARTUUID" => TagKind::PartUuid,
            other => return Err(Error::vg_metadata(format!("unknown tag kind {}", other))),
        };

        Ok(Tag { kind, value: value.to_string() })
    }
}

/// An in-memory cache mapping `(tag-kind, value)` to a device-node path,
/// built once from the block devices visible at construction time. Stands
/// in for the OS-provided blkid cache the original init agent consults.
#[derive(Default)]
pub struct TagCache {
    entries: HashMap<Tag, PathBuf>,
}

impl TagCache {
    pub fn new() -> TagCache {
        TagCache { entries: HashMap::new() }
    }

    pub fn insert(&mut self, tag: Tag, path: PathBuf) {
        self.entries.insert(tag, path);
    }

    /// Rebuild the cache from every currently-visible block device via
    /// bcachefs superblock recognition. Devices that fail to open or don't
    /// carry a recognized identifier are silently skipped, mirroring the
    /// scanner's tolerance for unreadable media. LVM PV/VG UUID entries are
    /// not seeded here; `Context::build_tag_cache` adds those from its own
    /// scan results on top of this walk.
    pub fn rebuild(&mut self) -> Result<()> {
        self.entries.clear();

        for dev in blockdev::enumerate()? {
            let path = match blockdev::resolve_node(dev) {
                Ok(p) => p,
                Err(_) => continue,
            };

            if let Some(uuid) = read_bcachefs_uuid(&path) {
                self.insert(
                    Tag { kind: TagKind::Uuid, value: uuid },
                    path,
                );
            }
        }

        Ok(())
    }

    /// Resolve a tag to a device-node path, consulting bcachefs magic
    /// recognition directly for `UUID=` lookups that the generic cache
    /// missed (a device may not have been scanned into the cache yet).
    pub fn resolve(&self, tag: &Tag) -> Option<PathBuf> {
        if let Some(path) = self.entries.get(tag) {
            return Some(path.clone());
        }
        None
    }

    /// Poll `resolve` once a second until it succeeds. Intentionally has
    /// no timeout; the caller is expected to be killable by signal.
    pub fn wait_for_tag(&mut self, tag: &Tag) -> PathBuf {
        loop {
            if let Some(path) = self.resolve(tag) {
                return path;
            }
            trace!("tag {:?} not yet resolved, retrying in 1s", tag);
            sleep(Duration::from_secs(1));
            let _ = self.rebuild();
        }
    }
}

/// Read `device`'s bcachefs superblock magic at offset 24..40 and, if it
/// matches, return the filesystem UUID at offset 40..56.
pub fn read_bcachefs_uuid(device: &Path) -> Option<String> {
    let mut f = File::open(device).ok()?;
    let mut buf = [0u8; BCACHEFS_UUID_OFFSET + BCACHEFS_UUID_LEN];
    f.read_exact(&mut buf).ok()?;

    let magic = &buf[BCACHEFS_MAGIC_OFFSET..BCACHEFS_MAGIC_OFFSET + BCACHEFS_MAGIC_LEN];
    if magic != BCACHEFS_MAGIC {
        return None;
    }

    let uuid_bytes = &buf[BCACHEFS_UUID_OFFSET..BCACHEFS_UUID_OFFSET + BCACHEFS_UUID_LEN];
    Some(uuid_bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_forms() {
        assert_eq!(Tag::parse("LABEL=root").unwrap(), Tag { kind: TagKind::Label, value: "root".into() });
        assert_eq!(Tag::parse("UUID=abcd").unwrap(), Tag { kind: TagKind::Uuid, value: "abcd".into() });
        assert!(Tag::parse("garbage").is_err());
        assert!(Tag::parse("WRONGKIND=x").is_err());
    }

    #[test]
    fn recognizes_bcachefs_magic() {
        let mut buf = vec![0u8; 56];
        buf[BCACHEFS_MAGIC_OFFSET..BCACHEFS_MAGIC_OFFSET + BCACHEFS_MAGIC_LEN]
            .copy_from_slice(&BCACHEFS_MAGIC);
        for (i, b) in (0u8..16).enumerate() {
            buf[BCACHEFS_UUID_OFFSET + i] = b;
        }

        let dir = std::env::temp_dir().join(format!("bcachefs-magic-test-{}", std::process::id()));
        std::fs::write(&dir, &buf).unwrap();
        let uuid = read_bcachefs_uuid(&dir).unwrap();
        assert_eq!(uuid, "000102030405060708090a0b0c0d0e0f");
        std::fs::remove_file(&dir).unwrap();
    }

    #[test]
    fn rejects_mismatched_magic() {
        let mut buf = vec![0u8; 56];
        buf[BCACHEFS_MAGIC_OFFSET..BCACHEFS_MAGIC_OFFSET + BCACHEFS_MAGIC_LEN]
            .copy_from_slice(&BCACHEFS_MAGIC);
        buf[BCACHEFS_MAGIC_OFFSET] ^= 0xff;

        let dir = std::env::temp_dir().join(format!("bcachefs-magic-test-bad-{}", std::process::id()));
        std::fs::write(&dir, &buf).unwrap();
        assert!(read_bcachefs_uuid(&dir).is_none());
        std::fs::remove_file(&dir).unwrap();
    }
}
