//! Endian-aware stream writer with deferred offset patching.
//!
//! Offsets are written in two steps. [`BinaryWriter::reserve_offset`]
//! leaves a zero-filled slot under a name; once the target has been
//! written, [`BinaryWriter::patch_offset`] seeks back, stores the target
//! and returns to where writing left off. Every reserved slot is recorded
//! as a relocation so the container can emit its offset table.

use std::{
    collections::HashMap,
    io::{Seek, SeekFrom, Write},
};

use crate::{
    error::{Error, Result},
    order::{ByteOrder, Primitive},
    strings::StringTable,
};

/// Size of an offset slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetWidth {
    #[default]
    U32,
    U64,
}

impl OffsetWidth {
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// How a reserved offset is filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Target position; the current stream position when `None`.
    pub target: Option<u64>,
    /// Store the absolute position instead of the distance from the base.
    pub absolute: bool,
    /// Forget the name after patching so it can be reserved again.
    pub consume: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            target: None,
            absolute: false,
            consume: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    position: u64,
    width: OffsetWidth,
    /// Set once the slot has been written, even if the name is kept.
    patched: bool,
}

/// Writes primitives, strings and patchable offsets to a seekable stream.
///
/// The stream is handed back by [`BinaryWriter::into_inner`]; the writer
/// never closes it.
#[derive(Debug)]
pub struct BinaryWriter<W> {
    stream: W,
    order: ByteOrder,
    base_offset: u64,
    offset_width: OffsetWidth,
    pending: HashMap<String, Slot>,
    relocations: Vec<u64>,
    strings: StringTable,
    scratch: Vec<u8>,
}

impl<W: Write + Seek> BinaryWriter<W> {
    pub fn new(stream: W, order: ByteOrder) -> Self {
        Self {
            stream,
            order,
            base_offset: 0,
            offset_width: OffsetWidth::U32,
            pending: HashMap::new(),
            relocations: Vec::new(),
            strings: StringTable::new(),
            scratch: Vec::new(),
        }
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Run `f` with a temporary byte order, restoring the previous one after.
    pub fn with_byte_order<T>(
        &mut self,
        order: ByteOrder,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = std::mem::replace(&mut self.order, order);
        let result = f(self);
        self.order = previous;
        result
    }

    #[must_use]
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn set_base_offset(&mut self, base_offset: u64) {
        self.base_offset = base_offset;
    }

    #[must_use]
    pub fn offset_width(&self) -> OffsetWidth {
        self.offset_width
    }

    pub fn set_offset_width(&mut self, width: OffsetWidth) {
        self.offset_width = width;
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.stream.stream_position()?)
    }

    pub fn jump_to(&mut self, position: u64) -> Result<()> {
        self.stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Seek to the end of the stream, returning the new position.
    pub fn jump_to_end(&mut self) -> Result<u64> {
        Ok(self.stream.seek(SeekFrom::End(0))?)
    }

    /// Write a primitive using the current byte order.
    pub fn write<T: Primitive>(&mut self, value: T) -> Result<()> {
        self.scratch.clear();
        value.encode(self.order, &mut self.scratch);
        self.stream.write_all(&self.scratch)?;
        Ok(())
    }

    /// Write raw bytes without any byte-order conversion.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    /// Write `count` zero bytes.
    pub fn write_nulls(&mut self, count: usize) -> Result<()> {
        const ZEROS: [u8; 64] = [0; 64];
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(ZEROS.len());
            self.stream.write_all(&ZEROS[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    /// Pad with zeros up to the next multiple of `alignment`.
    ///
    /// An alignment of 0 or 1 writes nothing.
    pub fn align(&mut self, alignment: u64) -> Result<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let position = self.position()?;
        let padding = position.next_multiple_of(alignment) - position;
        self.write_nulls(usize::try_from(padding).unwrap_or(0))
    }

    /// Write a null-terminated, single-byte encoded string.
    pub fn write_null_terminated(&mut self, text: &str) -> Result<()> {
        let mut bytes = encode_single_byte(text)?;
        bytes.push(0);
        self.write_bytes(&bytes)
    }

    /// Write a magic signature verbatim.
    pub fn write_signature(&mut self, signature: &[u8]) -> Result<()> {
        self.write_bytes(signature)
    }

    /// Write a string into exactly `len` bytes, padding with nulls.
    pub fn write_fixed_string(&mut self, text: &str, len: usize) -> Result<()> {
        let bytes = encode_single_byte(text)?;
        if bytes.len() > len {
            return Err(Error::invalid_format(
                "fixed string",
                format!("\"{text}\" does not fit in {len} bytes"),
            ));
        }
        self.write_bytes(&bytes)?;
        self.write_nulls(len - bytes.len())
    }

    /// Reserve a zero-filled offset slot at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOffsetName`] if `name` is still reserved.
    pub fn reserve_offset(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.pending.contains_key(&name) {
            return Err(Error::DuplicateOffsetName { name });
        }
        let slot = Slot {
            position: self.position()?,
            width: self.offset_width,
            patched: false,
        };
        self.write_nulls(slot.width.size())?;
        self.relocations.push(slot.position);
        self.pending.insert(name, slot);
        Ok(())
    }

    /// Reserve `count` consecutive slots named `prefix_0..prefix_{count-1}`.
    pub fn reserve_offset_table(&mut self, prefix: &str, count: usize) -> Result<()> {
        for i in 0..count {
            self.reserve_offset(format!("{prefix}_{i}"))?;
        }
        Ok(())
    }

    /// Point a reserved offset at the current position, relative to the base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOffsetName`] if `name` is not reserved, and
    /// [`Error::InvalidFormat`] if the target precedes the base offset or
    /// does not fit the slot.
    pub fn patch_offset(&mut self, name: &str) -> Result<()> {
        self.patch_offset_with(name, PatchOptions::default())
    }

    /// Fill in a reserved offset as described by `options`.
    ///
    /// The stream position is restored afterwards.
    pub fn patch_offset_with(&mut self, name: &str, options: PatchOptions) -> Result<()> {
        let slot = if options.consume {
            self.pending.remove(name)
        } else {
            self.pending.get_mut(name).map(|slot| {
                slot.patched = true;
                *slot
            })
        }
        .ok_or_else(|| Error::UnknownOffsetName {
            name: name.to_owned(),
        })?;

        let resume = self.position()?;
        let target = options.target.unwrap_or(resume);
        let value = if options.absolute {
            target
        } else {
            target.checked_sub(self.base_offset).ok_or_else(|| {
                Error::invalid_format(
                    "offset",
                    format!(
                        "target {target:#x} of \"{name}\" precedes base offset {:#x}",
                        self.base_offset
                    ),
                )
            })?
        };

        self.jump_to(slot.position)?;
        match slot.width {
            OffsetWidth::U32 => {
                let value = u32::try_from(value).map_err(|_| {
                    Error::invalid_format(
                        "offset",
                        format!("value {value:#x} of \"{name}\" exceeds 32 bits"),
                    )
                })?;
                self.write(value)?;
            }
            OffsetWidth::U64 => self.write(value)?,
        }
        self.jump_to(resume)
    }

    /// Names reserved but never patched.
    ///
    /// A name patched with `consume: false` stays reserved for further
    /// patches but is not listed here.
    pub fn pending_offsets(&self) -> impl Iterator<Item = &str> {
        self.pending
            .iter()
            .filter(|(_, slot)| !slot.patched)
            .map(|(name, _)| name.as_str())
    }

    /// Positions of every slot reserved so far, in reservation order.
    #[must_use]
    pub fn relocations(&self) -> &[u64] {
        &self.relocations
    }

    /// Reference a string through a new offset named `offset_name`.
    ///
    /// Empty strings are written as a null offset and never enter the table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if `value` has characters outside
    /// the single-byte range; nothing is written in that case.
    pub fn add_string(&mut self, offset_name: impl Into<String>, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.write_nulls(self.offset_width.size());
        }
        encode_single_byte(value)?;
        let offset_name = offset_name.into();
        self.reserve_offset(offset_name.clone())?;
        self.strings.add(offset_name, value);
        Ok(())
    }

    #[must_use]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Write every pending string once and patch all offsets that use it.
    ///
    /// Returns the aligned start position of the table.
    pub fn flush_string_table(&mut self) -> Result<u64> {
        self.align(4)?;
        let start = self.position()?;
        for entry in self.strings.take() {
            for name in &entry.offset_names {
                self.patch_offset(name)?;
            }
            self.write_null_terminated(&entry.value)?;
        }
        self.align(4)?;
        Ok(start)
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.stream
    }

    pub fn into_inner(self) -> W {
        self.stream
    }
}

fn encode_single_byte(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(c).map_err(|_| {
                Error::invalid_format(
                    "string",
                    format!("character {c:?} in \"{text}\" is outside the single-byte range"),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn writer(order: ByteOrder) -> BinaryWriter<Cursor<Vec<u8>>> {
        BinaryWriter::new(Cursor::new(Vec::new()), order)
    }

    fn bytes(w: BinaryWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        w.into_inner().into_inner()
    }

    #[test]
    fn test_reserve_then_patch_relative_to_base() {
        let mut w = writer(ByteOrder::Little);
        w.write_nulls(0x10).unwrap();
        w.set_base_offset(0x10);
        w.reserve_offset("data").unwrap();
        w.write::<u32>(0xAABB_CCDD).unwrap();
        w.patch_offset("data").unwrap();
        w.write::<u8>(7).unwrap();

        assert_eq!(w.relocations(), &[0x10]);
        assert_eq!(w.pending_offsets().count(), 0);
        let out = bytes(w);
        // Target is position 0x18, stored as 0x18 - 0x10.
        assert_eq!(&out[0x10..0x14], &8u32.to_le_bytes());
        assert_eq!(out.len(), 0x19);
        assert_eq!(out[0x18], 7);
    }

    #[test]
    fn test_patch_explicit_absolute_target_big_endian() {
        let mut w = writer(ByteOrder::Big);
        w.set_base_offset(0x20);
        w.reserve_offset("a").unwrap();
        w.patch_offset_with(
            "a",
            PatchOptions {
                target: Some(0x1234),
                absolute: true,
                ..PatchOptions::default()
            },
        )
        .unwrap();
        assert_eq!(bytes(w), [0x00, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn test_patch_without_consume_keeps_name() {
        let mut w = writer(ByteOrder::Little);
        w.reserve_offset("a").unwrap();
        let keep = PatchOptions {
            consume: false,
            ..PatchOptions::default()
        };
        w.patch_offset_with("a", keep).unwrap();
        assert_eq!(w.pending_offsets().count(), 0);
        assert!(matches!(
            w.reserve_offset("a"),
            Err(Error::DuplicateOffsetName { .. })
        ));
        w.patch_offset("a").unwrap();
        assert!(matches!(
            w.patch_offset("a"),
            Err(Error::UnknownOffsetName { name }) if name == "a"
        ));
        // Consumed names may be reserved again.
        w.reserve_offset("a").unwrap();
    }

    #[test]
    fn test_unknown_and_duplicate_names() {
        let mut w = writer(ByteOrder::Little);
        assert!(matches!(
            w.patch_offset("missing"),
            Err(Error::UnknownOffsetName { .. })
        ));
        w.reserve_offset("x").unwrap();
        assert!(matches!(
            w.reserve_offset("x"),
            Err(Error::DuplicateOffsetName { .. })
        ));
    }

    #[test]
    fn test_target_before_base_is_rejected() {
        let mut w = writer(ByteOrder::Little);
        w.write_nulls(8).unwrap();
        w.set_base_offset(8);
        w.reserve_offset("back").unwrap();
        let options = PatchOptions {
            target: Some(4),
            ..PatchOptions::default()
        };
        assert!(matches!(
            w.patch_offset_with("back", options),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_reserve_offset_table_names() {
        let mut w = writer(ByteOrder::Little);
        w.reserve_offset_table("nodes", 3).unwrap();
        let mut names: Vec<_> = w.pending_offsets().collect();
        names.sort_unstable();
        assert_eq!(names, ["nodes_0", "nodes_1", "nodes_2"]);
        assert_eq!(w.relocations(), &[0, 4, 8]);
        for i in 0..3 {
            w.patch_offset(&format!("nodes_{i}")).unwrap();
        }
        let out = bytes(w);
        assert_eq!(out, [12, 0, 0, 0, 12, 0, 0, 0, 12, 0, 0, 0]);
    }

    #[test]
    fn test_wide_offsets() {
        let mut w = writer(ByteOrder::Little);
        w.set_offset_width(OffsetWidth::U64);
        w.reserve_offset("wide").unwrap();
        w.patch_offset("wide").unwrap();
        assert_eq!(bytes(w), 8u64.to_le_bytes());
    }

    #[test]
    fn test_duplicate_strings_written_once() {
        let mut w = writer(ByteOrder::Little);
        w.add_string("off1", "Sonic").unwrap();
        w.add_string("off2", "Sonic").unwrap();
        assert_eq!(w.strings().len(), 1);
        let start = w.flush_string_table().unwrap();
        assert_eq!(start, 8);

        let out = bytes(w);
        assert_eq!(&out[0..4], &8u32.to_le_bytes());
        assert_eq!(&out[4..8], &8u32.to_le_bytes());
        assert_eq!(&out[8..14], b"Sonic\0");
        assert_eq!(out.len(), 16);
        assert_eq!(out.windows(6).filter(|w| w == b"Sonic\0").count(), 1);
    }

    #[test]
    fn test_empty_string_writes_null_offset() {
        let mut w = writer(ByteOrder::Little);
        w.add_string("empty", "").unwrap();
        assert!(w.relocations().is_empty());
        assert!(w.strings().is_empty());
        w.flush_string_table().unwrap();
        assert_eq!(bytes(w), [0, 0, 0, 0]);
    }

    #[test]
    fn test_strings_written_in_first_insertion_order() {
        let mut w = writer(ByteOrder::Little);
        w.add_string("a", "zeta").unwrap();
        w.add_string("b", "alpha").unwrap();
        w.add_string("c", "zeta").unwrap();
        w.flush_string_table().unwrap();
        let out = bytes(w);
        assert_eq!(&out[12..], b"zeta\0alpha\0\0");
        assert_eq!(&out[0..4], &12u32.to_le_bytes());
        assert_eq!(&out[4..8], &17u32.to_le_bytes());
        assert_eq!(&out[8..12], &12u32.to_le_bytes());
    }

    #[test]
    fn test_non_latin1_rejected() {
        let mut w = writer(ByteOrder::Little);
        assert!(matches!(
            w.write_null_terminated("ソニック"),
            Err(Error::InvalidFormat { .. })
        ));
        w.write_null_terminated("caf\u{e9}").unwrap();
        assert_eq!(bytes(w), [b'c', b'a', b'f', 0xE9, 0]);
    }

    #[test]
    fn test_add_string_rejects_wide_characters_immediately() {
        let mut w = writer(ByteOrder::Little);
        w.add_string("first", "Sonic").unwrap();
        assert!(matches!(
            w.add_string("second", "ソニック"),
            Err(Error::InvalidFormat { .. })
        ));
        // Nothing was reserved for the rejected string.
        assert_eq!(w.relocations(), &[0]);
        assert_eq!(w.pending_offsets().collect::<Vec<_>>(), ["first"]);
        assert_eq!(w.flush_string_table().unwrap(), 4);
        assert_eq!(&bytes(w)[4..10], b"Sonic\0");
    }

    #[test]
    fn test_align_zero_or_one_is_a_no_op() {
        let mut w = writer(ByteOrder::Little);
        w.write::<u8>(1).unwrap();
        w.align(0).unwrap();
        w.align(1).unwrap();
        assert_eq!(w.position().unwrap(), 1);
        w.align(4).unwrap();
        assert_eq!(w.position().unwrap(), 4);
    }

    #[test]
    fn test_fixed_string_padding() {
        let mut w = writer(ByteOrder::Big);
        w.write_fixed_string("Node", 8).unwrap();
        assert!(w.write_fixed_string("TooLongName", 8).is_err());
        assert_eq!(bytes(w), *b"Node\0\0\0\0");
    }
}
