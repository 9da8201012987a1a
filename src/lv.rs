// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logical Volumes, their segments, and segment areas.

use crate::error::{Error, Result};
use crate::parser::{Entry, LvmTextMap, TextMapOps};

/// A Logical Volume within a Volume Group.
#[derive(Debug, PartialEq, Clone)]
pub struct LV {
    pub name: String,
    pub uuid: String,
    pub visible: bool,
    pub is_pvmove: bool,
    pub segments: Vec<Segment>,
}

impl LV {
    /// Total size in extents, summed across segments.
    pub fn extent_count(&self) -> u64 {
        self.segments.iter().map(|s| s.extent_count).sum()
    }

    /// Size in bytes given the owning VG's extent size (expressed in
    /// 512-byte sectors, per the resolution in SPEC_FULL.md §9).
    pub fn size_sectors(&self, vg_extent_size: u64) -> u64 {
        self.extent_count() * vg_extent_size
    }

    pub fn from_textmap(name: &str, map: &LvmTextMap) -> Result<LV> {
        let uuid = map.get_str("id")?.to_string();
        let visible = map.check_flag("status", "VISIBLE");
        let is_pvmove = map.check_flag("status", "PVMOVE");
        let segment_count = map.get_num("segment_count")?;

        let mut segments = Vec::with_capacity(segment_count as usize);
        for i in 0..segment_count {
            let key = format!("segment{}", i + 1);
            let seg_map = map.get_block(&key)?;
            segments.push(Segment::from_textmap(seg_map, is_pvmove)?);
        }

        Ok(LV {
            name: name.to_string(),
            uuid,
            visible,
            is_pvmove,
            segments,
        })
    }
}

/// The kind of mapping a segment performs. Only `Striped` (which subsumes
/// plain linear, the single-area case) is fully supported; the rest are
/// recognized so `activate_lv` can report a clean, specific error instead
/// of silently mis-activating an LV it doesn't understand.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SegmentKind {
    Striped,
    Mirror,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
}

impl SegmentKind {
    fn parse(ty: &str) -> Result<SegmentKind> {
        match ty {
            "striped" => Ok(SegmentKind::Striped),
            "mirror" => Ok(SegmentKind::Mirror),
            "raid4" => Ok(SegmentKind::Raid4),
            "raid5" => Ok(SegmentKind::Raid5),
            "raid6" => Ok(SegmentKind::Raid6),
            "raid10" => Ok(SegmentKind::Raid10),
            other => Err(Error::vg_metadata(format!("unsupported segment type {}", other))),
        }
    }
}

/// A contiguous run of extents within an LV, mapped to one or more areas.
#[derive(Debug, PartialEq, Clone)]
pub struct Segment {
    pub start_extent: u64,
    pub extent_count: u64,
    pub kind: SegmentKind,
    pub stripe_size: Option<u64>,
    pub areas: Vec<Area>,
}

impl Segment {
    fn from_textmap(map: &LvmTextMap, is_pvmove: bool) -> Result<Segment> {
        let start_extent = map.get_num("start_extent")?;
        let extent_count = map.get_num("extent_count")?;
        let ty = map.get_str("type")?;
        let kind = SegmentKind::parse(ty)?;

        if kind != SegmentKind::Striped {
            return Err(Error::vg_metadata(format!(
                "unsupported segment type {} (start_extent={})",
                ty, start_extent
            )));
        }

        let mut area_count = map.get_num("stripe_count")?;
        let stripe_size = if area_count > 1 {
            Some(map.get_num("stripe_size")?)
        } else {
            None
        };

        if is_pvmove {
            area_count = 1;
        }

        let stripes = map.get_kv_array("stripes")?;
        if stripes.len() as u64 != 2 * area_count {
            return Err(Error::vg_metadata(format!(
                "stripes array length {} does not match 2*stripe_count {}",
                stripes.len(),
                2 * area_count
            )));
        }

        let mut areas = Vec::with_capacity(area_count as usize);
        for chunk in stripes.chunks(2).take(area_count as usize) {
            let pv_name = match &chunk[0] {
                Entry::String(s) => s.clone(),
                other => return Err(Error::vg_metadata(format!("expected PV name, got {:?}", other))),
            };
            let area_start = match &chunk[1] {
                Entry::Number(n) => *n as u64,
                other => return Err(Error::vg_metadata(format!("expected start extent, got {:?}", other))),
            };
            areas.push(Area::MapToPV { pv_name, start_extent: area_start });
        }

        Ok(Segment {
            start_extent,
            extent_count,
            kind,
            stripe_size,
            areas,
        })
    }
}

/// A single stripe of a segment, naming the PV or (for pvmove staging) the
/// LV it maps to. Resolved by name within the owning VG at lookup time
/// rather than held as a borrowed reference, since VGs store PVs/LVs in
/// owned maps and a self-referential tree would need `Rc`/indices anyway.
#[derive(Debug, PartialEq, Clone)]
pub enum Area {
    MapToPV { pv_name: String, start_extent: u64 },
    MapToLV { lv_name: String, start_extent: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::buf_to_textmap;

    fn sample_lv() -> &'static [u8] {
        br#"root {
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
        }"#
    }

    #[test]
    fn builds_single_segment_lv() {
        let map = buf_to_textmap(sample_lv()).unwrap();
        let lv = LV::from_textmap("root", map.get_block("root").unwrap()).unwrap();
        assert!(lv.visible);
        assert!(!lv.is_pvmove);
        assert_eq!(lv.segments.len(), 1);
        assert_eq!(lv.extent_count(), 100);
        assert_eq!(lv.segments[0].areas, vec![Area::MapToPV { pv_name: "pv0".into(), start_extent: 0 }]);
    }

    #[test]
    fn unsupported_segment_type_is_fatal() {
        let text = br#"lv0 {
            id = "x"
            status = ["READ"]
            segment_count = 1
            segment1 { start_extent = 0 extent_count = 1 type = "raid5" }
        }"#;
        let map = buf_to_textmap(text).unwrap();
        let err = LV::from_textmap("lv0", map.get_block("lv0").unwrap()).unwrap_err();
        assert!(err.to_string().contains("raid5"));
    }
}
