//! Offset relocation tables.
//!
//! A relocation table lists the positions of every offset slot in a file so
//! a loader can rebase them. Two encodings exist:
//!
//! - [`PackedRelocation`] (BINA and PACx): each entry is the distance from
//!   the previous position, divided by 4 and stored in 1, 2 or 4 bytes. The
//!   top two bits of the first byte select the width:
//!
//!   | Tag  | Bytes | Magnitude bits |
//!   | ---- | ----- | -------------- |
//!   | `01` | 1     | 6              |
//!   | `10` | 2     | 14             |
//!   | `11` | 4     | 30             |
//!
//!   A `00` tag ends the table. Multi-byte entries are stored most
//!   significant byte first whatever the file byte order.
//!
//! - [`FixedRelocation`] (Gens and Mirage): a `u32` count followed by one
//!   `u32` per slot holding its distance from the base offset.

use crate::{
    error::{Error, Result},
    order::{ByteOrder, Primitive},
};

const TAG_MASK: u8 = 0xC0;
const TAG_6: u8 = 0x40;
const TAG_14: u8 = 0x80;
const TAG_30: u8 = 0xC0;

const MAX_6: u32 = 0x3F;
const MAX_14: u32 = 0x3FFF;
const MAX_30: u32 = 0x3FFF_FFFF;

/// Encoding strategy for a relocation table.
pub trait RelocationCodec {
    /// Encode absolute slot positions.
    ///
    /// `positions` must be sorted ascending and not precede `base`.
    fn encode(&self, positions: &[u64], base: u64, order: ByteOrder) -> Result<Vec<u8>>;

    /// Decode a table back into absolute slot positions.
    fn decode(&self, table: &[u8], base: u64, order: ByteOrder) -> Result<Vec<u64>>;
}

/// Which relocation encoding a header dialect uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    Packed,
    Fixed,
}

impl RelocationKind {
    #[must_use]
    pub fn codec(self) -> &'static dyn RelocationCodec {
        match self {
            Self::Packed => &PackedRelocation,
            Self::Fixed => &FixedRelocation,
        }
    }
}

/// Tagged 6/14/30-bit delta encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedRelocation;

/// Append one delta, already divided by 4, using the narrowest tag.
pub fn encode_delta(value: u32, out: &mut Vec<u8>) -> Result<()> {
    if value <= MAX_6 {
        out.push(TAG_6 | value as u8);
    } else if value <= MAX_14 {
        out.push(TAG_14 | (value >> 8) as u8);
        out.push(value as u8);
    } else if value <= MAX_30 {
        out.push(TAG_30 | (value >> 24) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else {
        return Err(Error::invalid_format(
            "relocation table",
            format!("delta {value:#x} does not fit in 30 bits"),
        ));
    }
    Ok(())
}

/// Read one delta at `offset`, advancing it.
///
/// Returns `None` on a terminator tag or at the end of the table.
pub fn decode_delta(table: &[u8], offset: &mut usize) -> Result<Option<u32>> {
    let Some(&first) = table.get(*offset) else {
        return Ok(None);
    };
    let extra = match first & TAG_MASK {
        TAG_6 => 0,
        TAG_14 => 1,
        TAG_30 => 3,
        _ => return Ok(None),
    };
    let end = *offset + 1 + extra;
    if end > table.len() {
        return Err(Error::UnexpectedEndOfData {
            context: "relocation table",
        });
    }

    let value = table[*offset + 1..end]
        .iter()
        .fold(u32::from(first & !TAG_MASK), |acc, &b| {
            (acc << 8) | u32::from(b)
        });
    *offset = end;
    Ok(Some(value))
}

impl RelocationCodec for PackedRelocation {
    fn encode(&self, positions: &[u64], base: u64, _order: ByteOrder) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(positions.len());
        let mut previous = base;

        for &position in positions {
            let delta = position.checked_sub(previous).ok_or_else(|| {
                Error::invalid_format(
                    "relocation table",
                    format!("position {position:#x} precedes {previous:#x}"),
                )
            })?;
            if !delta.is_multiple_of(4) {
                return Err(Error::invalid_format(
                    "relocation table",
                    format!("delta {delta:#x} to {position:#x} is not 4-byte aligned"),
                ));
            }
            let value = u32::try_from(delta >> 2).map_err(|_| {
                Error::invalid_format(
                    "relocation table",
                    format!("delta {delta:#x} does not fit in 30 bits"),
                )
            })?;
            encode_delta(value, &mut out)?;
            previous = position;
        }

        Ok(out)
    }

    fn decode(&self, table: &[u8], base: u64, _order: ByteOrder) -> Result<Vec<u64>> {
        let mut positions = Vec::new();
        let mut offset = 0;
        let mut current = base;

        while let Some(value) = decode_delta(table, &mut offset)? {
            current += u64::from(value) << 2;
            positions.push(current);
        }

        Ok(positions)
    }
}

/// Count-prefixed table of 32-bit offsets from the base.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRelocation;

impl RelocationCodec for FixedRelocation {
    fn encode(&self, positions: &[u64], base: u64, order: ByteOrder) -> Result<Vec<u8>> {
        let count = u32::try_from(positions.len()).map_err(|_| {
            Error::invalid_format("relocation table", "too many offsets for a u32 count")
        })?;
        let mut out = Vec::with_capacity(4 + positions.len() * 4);
        count.encode(order, &mut out);

        for &position in positions {
            let relative = position
                .checked_sub(base)
                .and_then(|d| u32::try_from(d).ok())
                .ok_or_else(|| {
                    Error::invalid_format(
                        "relocation table",
                        format!("position {position:#x} is not within 32 bits after base {base:#x}"),
                    )
                })?;
            relative.encode(order, &mut out);
        }

        Ok(out)
    }

    fn decode(&self, table: &[u8], base: u64, order: ByteOrder) -> Result<Vec<u64>> {
        let eof = || Error::UnexpectedEndOfData {
            context: "relocation table",
        };
        let header = table.get(..4).ok_or_else(eof)?;
        let count = u32::decode(header, order) as usize;
        let entries = table.get(4..4 + count * 4).ok_or_else(eof)?;

        Ok(entries
            .chunks_exact(4)
            .map(|chunk| base + u64::from(u32::decode(chunk, order)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn encode_one(delta: u32) -> Vec<u8> {
        let mut out = Vec::new();
        encode_delta(delta >> 2, &mut out).unwrap();
        out
    }

    #[test]
    fn test_boundary_widths() {
        assert_eq!(encode_one(0), [0x40]);
        assert_eq!(encode_one(0xFC), [0x7F]);
        assert_eq!(encode_one(0x100), [0x80, 0x40]);
        assert_eq!(encode_one(0xFFFC), [0xBF, 0xFF]);
        assert_eq!(encode_one(0x10000), [0xC0, 0x00, 0x40, 0x00]);
        assert_eq!(encode_one(0x0010_0000), [0xC0, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn test_delta_too_wide() {
        let mut out = Vec::new();
        assert!(matches!(
            encode_delta(0x4000_0000, &mut out),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_packed_scenario() {
        // Slots at 0x40, 0x44 and 0x4000 with a base of 0x20.
        let positions = [0x40, 0x44, 0x4000];
        let table = PackedRelocation
            .encode(&positions, 0x20, ByteOrder::Little)
            .unwrap();
        // 0x20 >> 2 = 0x08, 0x04 >> 2 = 0x01, 0x3FBC >> 2 = 0xFEF.
        assert_eq!(table, [0x48, 0x41, 0x8F, 0xEF]);

        let decoded = PackedRelocation
            .decode(&table, 0x20, ByteOrder::Little)
            .unwrap();
        assert_eq!(decoded, positions);
    }

    #[test]
    fn test_packed_stops_at_terminator() {
        let table = [0x41, 0x42, 0x00, 0x41, 0x00];
        let decoded = PackedRelocation.decode(&table, 0, ByteOrder::Big).unwrap();
        assert_eq!(decoded, [4, 12]);
    }

    #[test]
    fn test_packed_truncated_entry() {
        let table = [0x41, 0xC0, 0x00];
        assert!(matches!(
            PackedRelocation.decode(&table, 0, ByteOrder::Big),
            Err(Error::UnexpectedEndOfData { .. })
        ));
    }

    #[test]
    fn test_packed_rejects_unsorted_and_unaligned() {
        assert!(matches!(
            PackedRelocation.encode(&[0x48, 0x44], 0x40, ByteOrder::Big),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(matches!(
            PackedRelocation.encode(&[0x42], 0x40, ByteOrder::Big),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(matches!(
            PackedRelocation.encode(&[0x10], 0x40, ByteOrder::Big),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_fixed_layout() {
        let table = FixedRelocation
            .encode(&[0x18, 0x20, 0x100], 0x18, ByteOrder::Big)
            .unwrap();
        assert_eq!(
            table,
            [0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0x08, 0, 0, 0x00, 0xE8]
        );
        let decoded = FixedRelocation.decode(&table, 0x18, ByteOrder::Big).unwrap();
        assert_eq!(decoded, [0x18, 0x20, 0x100]);
    }

    #[test]
    fn test_fixed_truncated() {
        let table = [0, 0, 0, 2, 0, 0, 0, 4];
        assert!(matches!(
            FixedRelocation.decode(&table, 0, ByteOrder::Big),
            Err(Error::UnexpectedEndOfData { .. })
        ));
        assert!(matches!(
            FixedRelocation.decode(&[0, 0], 0, ByteOrder::Big),
            Err(Error::UnexpectedEndOfData { .. })
        ));
    }

    #[test]
    fn test_kind_selects_codec() {
        let positions = [0x10, 0x14];
        let packed = RelocationKind::Packed
            .codec()
            .encode(&positions, 0, ByteOrder::Little)
            .unwrap();
        assert_eq!(packed, [0x44, 0x41]);
        let fixed = RelocationKind::Fixed
            .codec()
            .encode(&positions, 0, ByteOrder::Little)
            .unwrap();
        assert_eq!(fixed.len(), 12);
    }

    proptest! {
        #[test]
        fn prop_delta_round_trips(value in 0u32..=MAX_30) {
            let mut out = Vec::new();
            encode_delta(value, &mut out).unwrap();
            let expected_len = if value <= MAX_6 { 1 } else if value <= MAX_14 { 2 } else { 4 };
            prop_assert_eq!(out.len(), expected_len);

            let mut offset = 0;
            prop_assert_eq!(decode_delta(&out, &mut offset).unwrap(), Some(value));
            prop_assert_eq!(offset, out.len());
        }

        #[test]
        fn prop_packed_positions_round_trip(
            base in (0u64..0x1000).prop_map(|b| b * 4),
            steps in proptest::collection::vec(0u64..0x0100_0000, 0..64),
        ) {
            let mut positions = Vec::with_capacity(steps.len());
            let mut current = base;
            for step in steps {
                current += step * 4;
                positions.push(current);
            }
            let table = PackedRelocation.encode(&positions, base, ByteOrder::Big).unwrap();
            let decoded = PackedRelocation.decode(&table, base, ByteOrder::Big).unwrap();
            prop_assert_eq!(decoded, positions);
        }
    }
}
