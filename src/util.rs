// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crc32fast::Hasher;

const INITIAL_CRC: u32 = 0xf597a6cf;

/// Round `num` up to the next multiple of `align_to`, which must be a
/// power of two.
pub fn align_to(num: usize, align_to: usize) -> usize {
    let agn = align_to - 1;

    (num + agn) & !agn
}

/// LVM2's CRC32 variant: standard IEEE CRC32 (poly 0xedb88320), but both
/// the running state and the final result are bitwise negated relative to
/// the usual convention. `crc32fast` always starts from `!0`; working
/// backward from that lets us reuse it instead of hand-rolling a table.
pub fn crc32_calc(buf: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(!INITIAL_CRC);
    hasher.update(buf);
    !hasher.finalize()
}

/// Reformat a 32-byte on-disk PV/VG UUID into the dashed 38-character form
/// LVM2 uses everywhere else: a dash is inserted after source index `i`
/// whenever `i % 4 == 1`, except at `i == 1` and `i == 29` -- i.e. after
/// indices 5, 9, 13, 17, 21 and 25, giving groups of 6, 4, 4, 4, 4, 4 and 6
/// characters.
pub fn hyphenate_uuid(buf: &[u8]) -> String {
    debug_assert_eq!(buf.len(), 32);

    const DASH_AFTER: [usize; 6] = [5, 9, 13, 17, 21, 25];

    let mut out = String::with_capacity(38);
    for (i, &b) in buf.iter().enumerate() {
        out.push(b as char);
        if DASH_AFTER.contains(&i) {
            out.push('-');
        }
    }
    out
}

/// Inverse of `hyphenate_uuid`: strip dashes, returning the original
/// 32-character identifier.
pub fn dehyphenate_uuid(s: &str) -> String {
    s.chars().filter(|&c| c != '-').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_rounds_up_to_power_of_two() {
        assert_eq!(align_to(0, 8), 0);
        assert_eq!(align_to(1, 8), 8);
        assert_eq!(align_to(8, 8), 8);
        assert_eq!(align_to(9, 8), 16);
    }

    #[test]
    fn hyphenate_produces_38_char_id() {
        let formatted = hyphenate_uuid(b"0123456789abcdef0123456789abcdef");
        assert_eq!(formatted, "012345-6789-abcd-ef01-2345-6789-abcdef");
        assert_eq!(formatted.len(), 38);
    }

    #[test]
    fn hyphenate_dehyphenate_roundtrip() {
        let original = "0123456789abcdef0123456789abcdef";
        let formatted = hyphenate_uuid(original.as_bytes());
        assert_eq!(dehyphenate_uuid(&formatted), original);
    }
}
