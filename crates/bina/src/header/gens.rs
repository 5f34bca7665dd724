//! Gens (Hedgehog Engine) header. Always big-endian.
//!
//! ```text
//! 0x00  u32  file size
//! 0x04  u32  root node type
//! 0x08  u32  root node size (final table offset from base)
//! 0x0C  u32  root node offset (base offset)
//! 0x10  u32  final table offset (absolute)
//! 0x14  u32  file end offset
//! ```

use std::io::{Read, Seek, Write};

use super::{BodyLayout, Header, Span, to_u32, warn_if_nonzero};
use crate::{
    error::{Error, Result},
    order::ByteOrder,
    reader::BinaryReader,
    relocation::RelocationKind,
    writer::BinaryWriter,
};

const HEADER_LEN: u64 = 0x18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GensHeader {
    pub file_size: u32,
    /// Format revision of the root node; chosen by the file format.
    pub root_node_type: u32,
    pub root_node_size: u32,
    pub root_node_offset: u32,
    pub final_table_offset: u32,
    pub file_end_offset: u32,
    start: u64,
}

impl Default for GensHeader {
    fn default() -> Self {
        Self {
            file_size: 0,
            root_node_type: 0,
            root_node_size: 0,
            root_node_offset: HEADER_LEN as u32,
            final_table_offset: 0,
            file_end_offset: 0,
            start: 0,
        }
    }
}

impl GensHeader {
    #[must_use]
    pub fn new(root_node_type: u32) -> Self {
        Self {
            root_node_type,
            ..Self::default()
        }
    }
}

impl Header for GensHeader {
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let start = reader.position()?;
        reader.set_byte_order(ByteOrder::Big);

        let header = Self {
            file_size: reader.read()?,
            root_node_type: reader.read()?,
            root_node_size: reader.read()?,
            root_node_offset: reader.read()?,
            final_table_offset: reader.read()?,
            file_end_offset: reader.read()?,
            start,
        };

        if u64::from(header.root_node_offset) < HEADER_LEN {
            return Err(Error::invalid_format(
                "Gens header",
                format!(
                    "root node offset {:#x} overlaps the header",
                    header.root_node_offset
                ),
            ));
        }
        if header.final_table_offset > header.file_size {
            return Err(Error::invalid_format(
                "Gens header",
                format!(
                    "final table offset {:#x} is past the file size {:#x}",
                    header.final_table_offset, header.file_size
                ),
            ));
        }
        warn_if_nonzero("Gens file end offset", header.file_end_offset.into());

        reader.set_base_offset(header.base_offset());
        tracing::debug!(?header, "read Gens header");
        Ok(header)
    }

    fn prepare_write<W: Write + Seek>(&self, writer: &mut BinaryWriter<W>) -> Result<()> {
        writer.set_byte_order(ByteOrder::Big);
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

        self.start = start;
        self.file_size = to_u32(end - start, "file size")?;
        self.root_node_offset = HEADER_LEN as u32;
        self.root_node_size = to_u32(
            layout.final_table.start - layout.base_offset,
            "root node size",
        )?;
        self.final_table_offset = to_u32(layout.final_table.start - start, "final table offset")?;
        self.file_end_offset = 0;

        writer.jump_to(start)?;
        writer.with_byte_order(ByteOrder::Big, |w| {
            w.write(self.file_size)?;
            w.write(self.root_node_type)?;
            w.write(self.root_node_size)?;
            w.write(self.root_node_offset)?;
            w.write(self.final_table_offset)?;
            w.write(self.file_end_offset)
        })?;
        writer.jump_to(end)
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Big
    }

    fn relocation_kind(&self) -> RelocationKind {
        RelocationKind::Fixed
    }

    fn base_offset(&self) -> u64 {
        self.start + u64::from(self.root_node_offset)
    }

    /// The relocation table runs from its offset to the end of the file.
    fn final_table(&self) -> Span {
        Span::new(
            self.start + u64::from(self.final_table_offset),
            self.start + u64::from(self.file_size),
        )
    }

    fn file_size(&self) -> u32 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_finish_then_read() {
        let mut header = GensHeader {
            root_node_type: 5,
            ..GensHeader::default()
        };
        let mut writer = BinaryWriter::new(Cursor::new(Vec::new()), ByteOrder::Little);
        header.prepare_write(&mut writer).unwrap();
        assert_eq!(writer.byte_order(), ByteOrder::Big);
        writer.write_nulls(8).unwrap();
        writer.write_bytes(&[0, 0, 0, 0]).unwrap();
        let layout = BodyLayout {
            base_offset: 0x18,
            string_table: Span::new(0x20, 0x20),
            final_table: Span::new(0x20, 0x24),
        };
        header.finish_write(&mut writer, &layout).unwrap();
        let bytes = writer.into_inner().into_inner();

        assert_eq!(
            &bytes[..0x18],
            &[
                0, 0, 0, 0x24, 0, 0, 0, 5, 0, 0, 0, 0x08, 0, 0, 0, 0x18, 0, 0, 0, 0x20, 0, 0, 0, 0
            ]
        );

        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Little);
        let read = GensHeader::read(&mut reader).unwrap();
        assert_eq!(read, header);
        assert_eq!(reader.byte_order(), ByteOrder::Big);
        assert_eq!(reader.base_offset(), 0x18);
        assert_eq!(read.final_table(), Span::new(0x20, 0x24));
    }

    #[test]
    fn test_rejects_root_node_inside_header() {
        let mut bytes = vec![0u8; 0x18];
        bytes[0x0C..0x10].copy_from_slice(&4u32.to_be_bytes());
        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Big);
        assert!(matches!(
            GensHeader::read(&mut reader),
            Err(Error::InvalidFormat { .. })
        ));
    }
}
