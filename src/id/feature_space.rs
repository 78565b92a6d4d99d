//! §4.B "IDFeatureSpace" and "IDSubspace": the closed-form partitioning of
//! the 32-bit image-id space.
//!
//! Grounded on `examples/original_source/tupimage/id_manager.py`'s
//! `IDFeatures`/`IDSubspace` (there named `use_3rd_diacritic`; spec.md's
//! `use_4th_byte` terminology is authoritative here).

use serde::{Deserialize, Serialize};

/// One of the four disjoint classes of 32-bit nonzero ids (spec §3).
///
/// Byte layout (big-endian naming, matching the diacritic order emitted by
/// [`crate::placeholder`]): byte 0 is the low byte (8-bit color / subspace
/// byte for the three "color-bearing" variants), bytes 1-2 carry 24-bit
/// color, byte 3 is the optional 4th byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdFeatureSpace {
    /// 4th byte zero, bytes 1-2 zero: only the low byte carries an 8-bit
    /// color id.
    Color8,
    /// 4th byte zero, at least one of bytes 1-2 nonzero: 24-bit color id.
    Color24,
    /// 4th byte nonzero, bytes 1-2 zero. The low byte is unconstrained (can
    /// be zero): this is the "`color_bits=0`, ids occupy only the 4th byte"
    /// case from spec §4.B's subspace math.
    Color8Plus4th,
    /// 4th byte nonzero, at least one of bytes 1-2 nonzero.
    Color24Plus4th,
}

pub const ALL_FEATURE_SPACES: [IdFeatureSpace; 4] = [
    IdFeatureSpace::Color8,
    IdFeatureSpace::Color24,
    IdFeatureSpace::Color8Plus4th,
    IdFeatureSpace::Color24Plus4th,
];

impl IdFeatureSpace {
    /// A stable name, used as the SQLite table name for this feature-space.
    pub fn table_name(self) -> &'static str {
        match self {
            IdFeatureSpace::Color8 => "ids_color8",
            IdFeatureSpace::Color24 => "ids_color24",
            IdFeatureSpace::Color8Plus4th => "ids_color8_4th",
            IdFeatureSpace::Color24Plus4th => "ids_color24_4th",
        }
    }

    /// Invariant #1: the feature-space of any nonzero 32-bit id is unique.
    pub fn from_id(id: u32) -> Option<IdFeatureSpace> {
        if id == 0 {
            return None;
        }
        let [byte3, byte2, byte1, _byte0] = id.to_be_bytes();
        let fourth_nonzero = byte3 != 0;
        let mid_nonzero = byte2 != 0 || byte1 != 0;
        Some(match (fourth_nonzero, mid_nonzero) {
            (false, false) => IdFeatureSpace::Color8,
            (false, true) => IdFeatureSpace::Color24,
            (true, false) => IdFeatureSpace::Color8Plus4th,
            (true, true) => IdFeatureSpace::Color24Plus4th,
        })
    }

    pub fn contains(self, id: u32) -> bool {
        Self::from_id(id) == Some(self)
    }

    /// Whether this feature-space's 4th byte may be nonzero.
    pub fn use_4th_byte(self) -> bool {
        matches!(
            self,
            IdFeatureSpace::Color8Plus4th | IdFeatureSpace::Color24Plus4th
        )
    }

    /// Whether bytes 1-2 (24-bit color) are used.
    pub fn use_24bit_color(self) -> bool {
        matches!(
            self,
            IdFeatureSpace::Color24 | IdFeatureSpace::Color24Plus4th
        )
    }

    /// Which byte the subspace's `k` fixed bits come from: byte 0 when
    /// "color bits exist" for this space's nominal 8-bit color component,
    /// the 4th byte when only it is usable (spec §9 open question,
    /// resolved as documented in DESIGN.md).
    fn subspace_byte_shift(self) -> u32 {
        match self {
            IdFeatureSpace::Color8Plus4th => 24,
            _ => 0,
        }
    }

    fn subspace_mask32(self, k: u32) -> u32 {
        debug_assert!(k <= 8);
        let mask8: u32 = if k == 0 { 0 } else { (1u32 << k) - 1 };
        mask8 << self.subspace_byte_shift()
    }

    fn subspace_value32(self, v: u32, k: u32) -> u32 {
        debug_assert!(v < (1u32 << k));
        v << self.subspace_byte_shift()
    }

    /// Invariant #2: `fs.contains_and_in_subspace(id, sub) ⇔ (id &
    /// fs.subspace_mask(sub)) == fs.subspace_masked_value(sub)`.
    pub fn contains_and_in_subspace(self, id: u32, k: u32, v: u32) -> bool {
        self.contains(id) && (id & self.subspace_mask32(k)) == self.subspace_value32(v, k)
    }

    pub fn subspace_mask(self, k: u32) -> u32 {
        self.subspace_mask32(k)
    }

    pub fn subspace_masked_value(self, v: u32, k: u32) -> u32 {
        self.subspace_value32(v, k)
    }

    /// Invariant #3, closed form: `|{ id : contains_and_in_subspace(id,
    /// sub) }|`.
    pub fn subspace_size(self, k: u32, v: u32) -> u64 {
        debug_assert!(v < (1u32 << k));
        // Values the (8 - k)-bit free portion of the subspace byte can take.
        let free_bits_count: u64 = 1u64 << (8 - k);
        match self {
            IdFeatureSpace::Color8 => {
                // byte0 == v in its low k bits, bytes1-2-3 == 0; byte0 == 0
                // overall is excluded (id must be nonzero), which only
                // happens when v == 0.
                free_bits_count - if v == 0 { 1 } else { 0 }
            }
            IdFeatureSpace::Color8Plus4th => {
                // byte3 (the subspace byte here) matches in its low k bits
                // and must be nonzero overall; byte0 is fully free (256
                // values), bytes1-2 == 0.
                let byte3_choices = free_bits_count - if v == 0 { 1 } else { 0 };
                byte3_choices * 256
            }
            IdFeatureSpace::Color24 => {
                // byte0 matches (256 values possible, full range since
                // bytes1-2 nonzero already guarantees id != 0); bytes1-2 any
                // nonzero 16-bit value (65536 - 1).
                free_bits_count * 65535
            }
            IdFeatureSpace::Color24Plus4th => {
                // byte0 matches; byte3 any of 255 nonzero values; bytes1-2
                // any nonzero 16-bit value.
                free_bits_count * 255 * 65535
            }
        }
    }

    /// Lazily enumerate every id in `(self, k, v)`. Only used on the
    /// small-subspace path (§4.B.3), where the cap on `N` bounds iteration.
    pub fn all_ids(self, k: u32, v: u32) -> impl Iterator<Item = u32> {
        let mask = self.subspace_mask32(k);
        let value = self.subspace_value32(v, k);
        let use_4th = self.use_4th_byte();
        let use_24 = self.use_24bit_color();
        (0u32..=0xFFFFFFFFu32).filter(move |&id| {
            if id == 0 {
                return false;
            }
            if (id & mask) != value {
                return false;
            }
            let [byte3, byte2, byte1, _byte0] = id.to_be_bytes();
            let fourth_nonzero = byte3 != 0;
            let mid_nonzero = byte2 != 0 || byte1 != 0;
            fourth_nonzero == use_4th && mid_nonzero == use_24
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_and_total() {
        for id in [1u32, 0xFF, 0x100, 0x010000, 0x01000000, 0x01000001, 0xFFFFFFFF] {
            assert!(IdFeatureSpace::from_id(id).is_some());
        }
        assert!(IdFeatureSpace::from_id(0).is_none());
    }

    #[test]
    fn mask_correctness_small_subspace() {
        let fs = IdFeatureSpace::Color8;
        for k in 0..=4u32 {
            for v in 0..(1u32 << k) {
                let by_mask: Vec<u32> = (1u32..=0xFFu32)
                    .filter(|&id| fs.contains_and_in_subspace(id, k, v))
                    .collect();
                let by_enum: Vec<u32> = fs.all_ids(k, v).filter(|&id| id <= 0xFF).collect();
                assert_eq!(by_mask, by_enum, "k={k} v={v}");
            }
        }
    }

    #[test]
    fn subspace_size_matches_enumeration_color8() {
        let fs = IdFeatureSpace::Color8;
        for k in 0..=8u32 {
            for v in 0..(1u32 << k) {
                let count = fs.all_ids(k, v).take_while(|&id| id <= 0xFF).count() as u64;
                assert_eq!(fs.subspace_size(k, v), count, "k={k} v={v}");
            }
        }
    }

    #[test]
    fn subspace_size_matches_enumeration_color8_plus_4th_full_byte() {
        // k=8 fixes the whole 4th byte to v (1..=255, since 0 would make the
        // space empty); the low byte is fully free, giving exactly 256 ids.
        let fs = IdFeatureSpace::Color8Plus4th;
        for v in 1u32..=255 {
            let count = (0u32..=0xFFu32)
                .filter(|&byte0| fs.contains_and_in_subspace((v << 24) | byte0, 8, v))
                .count() as u64;
            assert_eq!(count, 256);
            assert_eq!(fs.subspace_size(8, v), 256);
        }
    }
}
