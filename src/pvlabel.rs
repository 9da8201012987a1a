// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading LVM2 on-disk labels and metadata (read-only).
//
// label is at start of sectors 0-3, usually 1
// label includes offset of pvheader (also within 1st 4 sectors)
// pvheader includes ptrs to data (1), metadata(0-2), and boot(0-1) areas
// metadata area (MDA), located anywhere, starts with 512b mda header, then
//   large text area
// mda header has 40b of stuff, then rlocns[].
// rlocns point into mda text area. rlocn 0 used for text metadata, rlocn 1
//   points to precommitted data (not read by this engine)
// text metadata is read aligned to sector-size; text area is circular
//   and text may wrap across end to beginning

use std::cmp::min;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{Error, Result};
use crate::parser::LvmTextMap;
use crate::util::{crc32_calc, hyphenate_uuid};
use crate::{blockdev, parser};

const LABEL_SCAN_SECTORS: usize = 4;
const ID_LEN: usize = 32;
const MDA_MAGIC: &[u8] = b"\x20\x4c\x56\x4d\x32\x20\x78\x5b\x35\x41\x25\x72\x30\x4e\x2a\x3e";
pub const SECTOR_SIZE: usize = 512;
const MDA_HEADER_SIZE: usize = 512;

#[derive(Debug)]
struct LabelHeader {
    offset: u32,
}

impl LabelHeader {
    fn from_buf(buf: &[u8]) -> Result<LabelHeader> {
        for x in 0..LABEL_SCAN_SECTORS {
            let sec_buf = &buf[x * SECTOR_SIZE..x * SECTOR_SIZE + SECTOR_SIZE];
            if &sec_buf[..8] != b"LABELONE" {
                continue;
            }
            if &sec_buf[24..32] != b"LVM2 001" {
                continue;
            }

            let crc = LittleEndian::read_u32(&sec_buf[16..20]);
            if crc != crc32_calc(&sec_buf[20..SECTOR_SIZE]) {
                return Err(Error::vg_metadata("label CRC mismatch"));
            }

            let sector = LittleEndian::read_u64(&sec_buf[8..16]);
            if sector != x as u64 {
                return Err(Error::vg_metadata("label sector field mismatch"));
            }

            return Ok(LabelHeader {
                // rebase from "offset within label sector" to "offset from device start"
                offset: LittleEndian::read_u32(&sec_buf[20..24]) + (x * SECTOR_SIZE) as u32,
            });
        }

        Err(Error::device_io("no LVM2 label found in first 4 sectors"))
    }
}

/// One `(offset, size)` locator within a PV header or MDA header.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PvArea {
    pub offset: u64,
    pub size: u64,
}

struct PvAreaIter<'a> {
    area: &'a [u8],
}

impl<'a> Iterator for PvAreaIter<'a> {
    type Item = PvArea;

    fn next(&mut self) -> Option<PvArea> {
        let off = LittleEndian::read_u64(&self.area[..8]);
        let size = LittleEndian::read_u64(&self.area[8..16]);

        if off == 0 {
            None
        } else {
            self.area = &self.area[16..];
            Some(PvArea { offset: off, size })
        }
    }
}

fn iter_pv_area(buf: &[u8]) -> PvAreaIter {
    PvAreaIter { area: buf }
}

#[derive(Debug, PartialEq, Clone, Copy)]
struct RawLocn {
    offset: u64,
    size: u64,
    checksum: u32,
    ignored: bool,
}

struct RawLocnIter<'a> {
    area: &'a [u8],
}

impl<'a> Iterator for RawLocnIter<'a> {
    type Item = RawLocn;

    fn next(&mut self) -> Option<RawLocn> {
        let off = LittleEndian::read_u64(&self.area[..8]);
        let size = LittleEndian::read_u64(&self.area[8..16]);
        let checksum = LittleEndian::read_u32(&self.area[16..20]);
        let flags = LittleEndian::read_u32(&self.area[20..24]);

        if off == 0 {
            None
        } else {
            self.area = &self.area[24..];
            Some(RawLocn { offset: off, size, checksum, ignored: (flags & 1) > 0 })
        }
    }
}

fn iter_raw_locn(buf: &[u8]) -> RawLocnIter {
    RawLocnIter { area: buf }
}

/// A block device's PV header: identity, size and the locators for its
/// data and metadata areas.
#[derive(Debug, PartialEq, Clone)]
pub struct PvHeader {
    pub uuid: String,
    pub size: u64,
    pub data_areas: Vec<PvArea>,
    pub metadata_areas: Vec<PvArea>,
    pub dev_path: PathBuf,
}

impl PvHeader {
    // PV HEADER LAYOUT: static header (uuid, size), 0+ data areas (only 1
    // supported), blank terminator, 0+ metadata areas (max 2), blank
    // terminator, then an extension header we don't read (no bootloader
    // area support needed for root activation).
    fn from_buf(buf: &[u8], path: &Path) -> Result<PvHeader> {
        let mut rest = &buf[ID_LEN + 8..];

        let data_areas: Vec<_> = iter_pv_area(rest).collect();
        if data_areas.len() > 1 {
            return Err(Error::DataArea);
        }
        rest = &rest[(data_areas.len() + 1) * 16..];

        let metadata_areas: Vec<_> = iter_pv_area(rest).collect();

        Ok(PvHeader {
            uuid: hyphenate_uuid(&buf[..ID_LEN]),
            size: LittleEndian::read_u64(&buf[ID_LEN..ID_LEN + 8]),
            data_areas,
            metadata_areas,
            dev_path: path.to_owned(),
        })
    }

    /// Locate and parse the PV header on a device, per §4.B.
    pub fn find_in_dev(path: &Path) -> Result<PvHeader> {
        let mut f = blockdev::open_device(path)?;

        let mut buf = [0u8; LABEL_SCAN_SECTORS * SECTOR_SIZE];
        f.read(&mut buf).map_err(Error::System)?;

        let label_header = LabelHeader::from_buf(&buf)?;
        let pvheader = Self::from_buf(&buf[label_header.offset as usize..], path)?;

        debug!("found PV {} on {}", pvheader.uuid, path.display());
        Ok(pvheader)
    }

    fn read_mda_header(area: &PvArea, file: &mut File) -> Result<Option<RawLocn>> {
        if area.size as usize <= MDA_HEADER_SIZE {
            return Err(Error::vg_metadata("metadata area smaller than its own header"));
        }

        file.seek(SeekFrom::Start(area.offset)).map_err(Error::System)?;
        let mut hdr = [0u8; MDA_HEADER_SIZE];
        file.read(&mut hdr).map_err(Error::System)?;

        if LittleEndian::read_u32(&hdr[..4]) != crc32_calc(&hdr[4..MDA_HEADER_SIZE]) {
            return Err(Error::vg_metadata("MDA header checksum failure"));
        }

        if &hdr[4..20] != MDA_MAGIC {
            return Err(Error::vg_metadata(format!(
                "'{}' doesn't match MDA magic",
                String::from_utf8_lossy(&hdr[4..20])
            )));
        }

        let ver = LittleEndian::read_u32(&hdr[20..24]);
        if ver != 1 {
            return Err(Error::vg_metadata("unsupported MDA header version"));
        }

        let start = LittleEndian::read_u64(&hdr[24..32]);
        if start != area.offset {
            return Err(Error::vg_metadata("mda header start does not match pv area start"));
        }

        let size = LittleEndian::read_u64(&hdr[32..40]);
        if size != area.size {
            return Err(Error::vg_metadata("mda header size does not match pv area size"));
        }

        Ok(iter_raw_locn(&hdr[40..]).next())
    }

    /// Read the raw VG text metadata blob from the PV's single metadata-area
    /// locator, handling ring-buffer wraparound. Returns the bytes unparsed
    /// so callers can compare blobs for byte-identity (§4.E step 2) before
    /// paying for a parse. Only the first metadata area is consulted; a
    /// second copy, if present, is never read.
    pub fn read_metadata_blob(&self) -> Result<Vec<u8>> {
        let mut f = File::open(&self.dev_path).map_err(Error::System)?;

        let pvarea = self
            .metadata_areas
            .first()
            .ok_or_else(|| Error::vg_metadata("PV has no metadata area"))?;

        let rl = Self::read_mda_header(pvarea, &mut f)?
            .ok_or_else(|| Error::vg_metadata("metadata area has no raw locator"))?;

        if rl.ignored {
            return Err(Error::vg_metadata("metadata area's raw locator is marked ignored"));
        }

        let mut text = vec![0u8; rl.size as usize];
        let first_read = min(pvarea.size - rl.offset, rl.size) as usize;

        f.seek(SeekFrom::Start(pvarea.offset + rl.offset)).map_err(Error::System)?;
        f.read(&mut text[..first_read]).map_err(Error::System)?;

        if first_read != rl.size as usize {
            f.seek(SeekFrom::Start(pvarea.offset + MDA_HEADER_SIZE as u64)).map_err(Error::System)?;
            f.read(&mut text[first_read..]).map_err(Error::System)?;
        }

        if rl.checksum != crc32_calc(&text) {
            return Err(Error::vg_metadata("MDA text checksum failure"));
        }

        Ok(text)
    }

    /// Read and parse the VG text metadata from the first valid metadata
    /// area.
    pub fn read_metadata(&self) -> Result<LvmTextMap> {
        parser::buf_to_textmap(&self.read_metadata_blob()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_header_rejects_missing_magic() {
        let buf = vec![0u8; LABEL_SCAN_SECTORS * SECTOR_SIZE];
        assert!(LabelHeader::from_buf(&buf).is_err());
    }
}
