//! BINA v2 header with its `DATA` node.
//!
//! ```text
//! 0x00  [u8; 4]  "BINA"
//! 0x04  [u8; 3]  version digits
//! 0x07  u8       endian flag
//! 0x08  u32      file size
//! 0x0C  u16      node count
//! 0x0E  u16      padding
//! 0x10  [u8; 4]  "DATA"
//! 0x14  u32      data node length
//! 0x18  u32      string table offset (from base)
//! 0x1C  u32      string table length
//! 0x20  u32      final table length
//! 0x24  u16      additional data length
//! 0x26  u16      padding
//! 0x28           additional data, then the base offset
//! ```

use std::io::{Read, Seek, Write};

use super::{
    BodyLayout, Header, Span, order_from_flag, parse_version, to_u32, version_digits,
    warn_if_nonzero,
};
use crate::{
    error::Result, order::ByteOrder, reader::BinaryReader, relocation::RelocationKind,
    writer::BinaryWriter,
};

pub(super) const SIGNATURE: &[u8] = b"BINA";
const DATA_SIGNATURE: &[u8] = b"DATA";
const HEADER_LEN: u64 = 0x40;
const NODE_OFFSET: u64 = 0x10;
const ADDITIONAL_DATA_LEN: u16 = 0x18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaV2Header {
    pub version: u16,
    pub byte_order: ByteOrder,
    pub file_size: u32,
    pub node_count: u16,
    /// Length of the `DATA` node, from its signature to the end of the file.
    pub data_length: u32,
    /// String table position, relative to the base offset.
    pub string_table_offset: u32,
    pub string_table_length: u32,
    pub final_table_length: u32,
    pub additional_data_length: u16,
    base: u64,
}

impl Default for BinaV2Header {
    fn default() -> Self {
        Self {
            version: 210,
            byte_order: ByteOrder::Little,
            file_size: 0,
            node_count: 1,
            data_length: 0,
            string_table_offset: 0,
            string_table_length: 0,
            final_table_length: 0,
            additional_data_length: ADDITIONAL_DATA_LEN,
            base: HEADER_LEN,
        }
    }
}

impl BinaV2Header {
    #[must_use]
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            ..Self::default()
        }
    }
}

impl Header for BinaV2Header {
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let start = reader.position()?;
        reader.read_signature(SIGNATURE)?;
        let version = parse_version(&reader.read_array::<3>()?)?;
        let byte_order = order_from_flag(reader.read()?, ByteOrder::Little);
        reader.set_byte_order(byte_order);

        let file_size = reader.read()?;
        let node_count: u16 = reader.read()?;
        warn_if_nonzero("BINA v2 padding", reader.read::<u16>()?.into());

        let mut header = Self {
            version,
            byte_order,
            file_size,
            node_count,
            data_length: 0,
            string_table_offset: 0,
            string_table_length: 0,
            final_table_length: 0,
            additional_data_length: 0,
            base: start + NODE_OFFSET,
        };

        if node_count >= 1 {
            reader.read_signature(DATA_SIGNATURE)?;
            header.data_length = reader.read()?;
            header.string_table_offset = reader.read()?;
            header.string_table_length = reader.read()?;
            header.final_table_length = reader.read()?;
            header.additional_data_length = reader.read()?;
            warn_if_nonzero("BINA v2 DATA padding", reader.read::<u16>()?.into());
            reader.jump_ahead(u64::from(header.additional_data_length))?;
            header.base = reader.position()?;
        }
        if node_count > 1 {
            tracing::warn!(node_count, "BINA v2 nodes after DATA are ignored");
        }

        reader.set_base_offset(header.base);
        tracing::debug!(?header, "read BINA v2 header");
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

        self.base = layout.base_offset;
        self.node_count = 1;
        self.additional_data_length = ADDITIONAL_DATA_LEN;
        self.file_size = to_u32(end - start, "file size")?;
        self.data_length = to_u32(end - start - NODE_OFFSET, "data length")?;
        self.string_table_offset = to_u32(
            layout.string_table.start - layout.base_offset,
            "string table offset",
        )?;
        self.string_table_length = to_u32(
            layout.final_table.start - layout.string_table.start,
            "string table length",
        )?;
        self.final_table_length = to_u32(layout.final_table.len(), "final table length")?;

        let version = version_digits(self.version)?;
        writer.jump_to(start)?;
        writer.with_byte_order(self.byte_order, |w| {
            w.write_signature(SIGNATURE)?;
            w.write_bytes(&version)?;
            w.write(self.byte_order.flag())?;
            w.write(self.file_size)?;
            w.write(self.node_count)?;
            w.write(0u16)?;
            w.write_signature(DATA_SIGNATURE)?;
            w.write(self.data_length)?;
            w.write(self.string_table_offset)?;
            w.write(self.string_table_length)?;
            w.write(self.final_table_length)?;
            w.write(self.additional_data_length)?;
            w.write(0u16)?;
            w.write_nulls(usize::from(self.additional_data_length))
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

    fn final_table(&self) -> Span {
        let start = self.base
            + u64::from(self.string_table_offset)
            + u64::from(self.string_table_length);
        Span::new(start, start + u64::from(self.final_table_length))
    }

    fn file_size(&self) -> u32 {
        self.file_size
    }
}
