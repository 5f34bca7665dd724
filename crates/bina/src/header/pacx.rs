//! PACx package header.
//!
//! ```text
//! 0x00  [u8; 4]  "PACx"
//! 0x04  [u8; 3]  version digits
//! 0x07  u8       endian flag
//! 0x08  u32      package id
//! 0x0C  u32      file size
//! 0x10  u32      node tree length
//! 0x14  u32      split list length
//! 0x18  u32      file entries length
//! 0x1C  u32      string table length
//! 0x20  u32      data length
//! 0x24  u32      final table length
//! 0x28  u16      pack type
//! 0x2A  u16      0x108
//! 0x2C  u32      split count
//! 0x30           base offset
//! ```

use std::io::{Read, Seek, Write};

use super::{BodyLayout, Header, Span, order_from_flag, parse_version, to_u32, version_digits};
use crate::{
    error::{Error, Result},
    order::ByteOrder, reader::BinaryReader, relocation::RelocationKind,
    writer::BinaryWriter,
};

pub(super) const SIGNATURE: &[u8] = b"PACx";
const HEADER_LEN: u64 = 0x30;
const SENTINEL: u16 = 0x108;

/// How a package relates to its split packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacType {
    HasNoSplits,
    IsSplit,
    HasSplits,
    Unknown(u16),
}

impl From<u16> for PacType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::HasNoSplits,
            2 => Self::IsSplit,
            5 => Self::HasSplits,
            other => Self::Unknown(other),
        }
    }
}

impl From<PacType> for u16 {
    fn from(value: PacType) -> Self {
        match value {
            PacType::HasNoSplits => 1,
            PacType::IsSplit => 2,
            PacType::HasSplits => 5,
            PacType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacxHeader {
    pub version: u16,
    pub byte_order: ByteOrder,
    pub id: u32,
    pub file_size: u32,
    /// Lengths of the sections written by the package format itself.
    pub node_tree_length: u32,
    pub split_list_length: u32,
    pub file_entries_length: u32,
    pub string_table_length: u32,
    pub data_length: u32,
    pub final_table_length: u32,
    pub pac_type: PacType,
    pub split_count: u32,
    base: u64,
}

impl Default for PacxHeader {
    fn default() -> Self {
        Self {
            version: 301,
            byte_order: ByteOrder::Little,
            id: 0,
            file_size: 0,
            node_tree_length: 0,
            split_list_length: 0,
            file_entries_length: 0,
            string_table_length: 0,
            data_length: 0,
            final_table_length: 0,
            pac_type: PacType::HasNoSplits,
            split_count: 0,
            base: HEADER_LEN,
        }
    }
}

impl PacxHeader {
    #[must_use]
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            ..Self::default()
        }
    }
}

impl Header for PacxHeader {
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let start = reader.position()?;
        reader.read_signature(SIGNATURE)?;
        let version = parse_version(&reader.read_array::<3>()?)?;
        let byte_order = order_from_flag(reader.read()?, ByteOrder::Little);
        reader.set_byte_order(byte_order);

        let id = reader.read()?;
        let file_size = reader.read()?;
        let node_tree_length = reader.read()?;
        let split_list_length = reader.read()?;
        let file_entries_length = reader.read()?;
        let string_table_length = reader.read()?;
        let data_length = reader.read()?;
        let final_table_length = reader.read()?;
        let pac_type = PacType::from(reader.read::<u16>()?);
        if let PacType::Unknown(value) = pac_type {
            tracing::warn!(value, "unknown PACx pack type");
        }
        let sentinel: u16 = reader.read()?;
        if sentinel != SENTINEL {
            tracing::warn!(sentinel, "unexpected PACx sentinel");
        }
        let split_count = reader.read()?;

        if u64::from(file_size) < HEADER_LEN + u64::from(final_table_length) {
            return Err(Error::invalid_format(
                "PACx header",
                format!(
                    "file size {file_size:#x} cannot hold the header and a \
                     {final_table_length:#x} byte relocation table"
                ),
            ));
        }

        let base = start + HEADER_LEN;
        reader.set_base_offset(base);

        let header = Self {
            version,
            byte_order,
            id,
            file_size,
            node_tree_length,
            split_list_length,
            file_entries_length,
            string_table_length,
            data_length,
            final_table_length,
            pac_type,
            split_count,
            base,
        };
        tracing::debug!(?header, "read PACx header");
        Ok(header)
    }

    fn prepare_write<W: Write + Seek>(&self, writer: &mut BinaryWriter<W>) -> Result<()> {
        writer.set_byte_order(self.byte_order);
        let start = writer.position()?;
        writer.write_nulls(HEADER_LEN as usize)?;
        writer.set_base_offset(start + HEADER_LEN);
        Ok(())
    }

    fn finish_write<W: Write + Seek>(
        &mut self,
        writer: &mut BinaryWriter<W>,
        layout: &BodyLayout,
    ) -> Result<()> {
        let start = layout.base_offset - HEADER_LEN;
        let end = writer.position()?;
        let sections = u64::from(self.node_tree_length)
            + u64::from(self.split_list_length)
            + u64::from(self.file_entries_length);

        self.base = layout.base_offset;
        self.file_size = to_u32(end - start, "file size")?;
        self.string_table_length = to_u32(
            layout.final_table.start - layout.string_table.start,
            "string table length",
        )?;
        self.data_length = to_u32(
            (layout.string_table.start - layout.base_offset).saturating_sub(sections),
            "data length",
        )?;
        self.final_table_length = to_u32(layout.final_table.len(), "final table length")?;

        let version = version_digits(self.version)?;
        writer.jump_to(start)?;
        writer.with_byte_order(self.byte_order, |w| {
            w.write_signature(SIGNATURE)?;
            w.write_bytes(&version)?;
            w.write(self.byte_order.flag())?;
            w.write(self.id)?;
            w.write(self.file_size)?;
            w.write(self.node_tree_length)?;
            w.write(self.split_list_length)?;
            w.write(self.file_entries_length)?;
            w.write(self.string_table_length)?;
            w.write(self.data_length)?;
            w.write(self.final_table_length)?;
            w.write(u16::from(self.pac_type))?;
            w.write(SENTINEL)?;
            w.write(self.split_count)
        })?;
        writer.jump_to(end)
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn relocation_kind(&self) -> RelocationKind {
        RelocationKind::Packed
    }

    fn base_offset(&self) -> u64 {
        self.base
    }

    /// The relocation table is the last section of the file.
    fn final_table(&self) -> Span {
        let end = self.base.saturating_sub(HEADER_LEN) + u64::from(self.file_size);
        Span::new(end.saturating_sub(u64::from(self.final_table_length)), end)
    }

    fn file_size(&self) -> u32 {
        self.file_size
    }
}
