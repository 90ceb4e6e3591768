//! Global tile id resolution for Tiled-family formats.

/// Horizontal flip flag.
pub const FLIP_H: u32 = 0x8000_0000; // bit 31
/// Vertical flip flag.
pub const FLIP_V: u32 = 0x4000_0000; // bit 30
/// Diagonal flip flag.
pub const FLIP_D: u32 = 0x2000_0000; // bit 29
/// Bits that carry the id itself.
pub const GID_MASK: u32 = 0x1FFF_FFFF; // keep lower 29 bits (bit 28 is free)

/// Strips flip flags from a raw layer value.
#[inline]
pub fn clean(raw: u32) -> u32 {
    raw & GID_MASK
}

/// Global id range owned by one tileset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GidRange {
    /// Tileset key in the imported document.
    pub key: String,
    /// First global id of the tileset.
    pub first_gid: u32,
    /// 0 when unknown; the range is then open ended.
    pub tile_count: u32,
    /// Tiles per row.
    pub columns: u32,
}

/// A global id turned into tileset-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTile<'a> {
    /// Tileset key in the imported document.
    pub key: &'a str,
    /// First global id of the owning tileset.
    pub first_gid: u32,
    /// Index within the tileset.
    pub local_id: u32,
    /// Column in the tileset grid.
    pub tile_x: u32,
    /// Row in the tileset grid.
    pub tile_y: u32,
}

/// Tilesets ordered by descending `first_gid`; the first range whose
/// `first_gid <= gid` owns the id.
#[derive(Debug, Clone, Default)]
pub struct GidTable {
    ranges: Vec<GidRange>,
}

impl GidTable {
    /// Table over `ranges`, in any order.
    pub fn new(mut ranges: Vec<GidRange>) -> Self {
        ranges.sort_by(|a, b| b.first_gid.cmp(&a.first_gid));
        GidTable { ranges }
    }

    /// `None` for the empty id 0 and for ids no tileset covers.
    pub fn resolve(&self, raw: u32) -> Option<LocalTile<'_>> {
        let gid = clean(raw);
        if gid == 0 {
            return None;
        }
        let range = self.ranges.iter().find(|r| r.first_gid <= gid)?;
        let local_id = gid - range.first_gid;
        if range.tile_count > 0 && local_id >= range.tile_count {
            return None;
        }
        let cols = range.columns.max(1);
        Some(LocalTile {
            key: &range.key,
            first_gid: range.first_gid,
            local_id,
            tile_x: local_id % cols,
            tile_y: local_id / cols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> GidTable {
        GidTable::new(vec![
            GidRange { key: "a".into(), first_gid: 1, tile_count: 9, columns: 3 },
            GidRange { key: "c".into(), first_gid: 50, tile_count: 20, columns: 5 },
            GidRange { key: "b".into(), first_gid: 10, tile_count: 40, columns: 8 },
        ])
    }

    #[test]
    fn greatest_first_gid_not_above_id_wins() {
        let t = table();
        let hit = t.resolve(42).unwrap();
        assert_eq!(hit.key, "b");
        assert_eq!(hit.first_gid, 10);
        assert_eq!(hit.local_id, 32);
        assert_eq!((hit.tile_x, hit.tile_y), (0, 4));
    }

    #[test]
    fn boundaries_and_empty() {
        let t = table();
        assert_eq!(t.resolve(0), None);
        assert_eq!(t.resolve(9).unwrap().key, "a");
        assert_eq!(t.resolve(10).unwrap().local_id, 0);
        assert_eq!(t.resolve(69).unwrap().key, "c");
        assert_eq!(t.resolve(70), None);
    }

    #[test]
    fn flip_flags_are_ignored() {
        let t = table();
        let hit = t.resolve(42 | FLIP_H | FLIP_D).unwrap();
        assert_eq!(hit.local_id, 32);
        assert_eq!(clean(7 | FLIP_V), 7);
    }
}
