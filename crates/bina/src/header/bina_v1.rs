//! BINA v1 header.
//!
//! ```text
//! 0x00  u32      file size
//! 0x04  u32      final table offset (from base)
//! 0x08  u32      final table length
//! 0x0C  u32      reserved
//! 0x10  u16      unknown flag
//! 0x12  u16      footer magic present
//! 0x14  u32      reserved
//! 0x18  [u8; 3]  version digits
//! 0x1B  u8       endian flag
//! 0x1C  [u8; 4]  "BINA"
//! 0x20           base offset
//! ```
//!
//! The endian flag sits after the numeric fields it governs, so reading
//! takes a blind pass over the block to find it before parsing the fields.

use std::io::{Read, Seek, Write};

use super::{
    BodyLayout, Header, Span, order_from_flag, parse_version, to_u32, version_digits,
    warn_if_nonzero,
};
use crate::{
    error::{Error, Result},
    order::ByteOrder,
    reader::BinaryReader,
    relocation::RelocationKind,
    writer::BinaryWriter,
};

pub(super) const SIGNATURE: &[u8] = b"BINA";
const HEADER_LEN: u64 = 0x20;
const FLAG_AT: usize = 0x1B;
const FOOTER_MAGIC: u32 = 0x10;
const FOOTER_MARKER: &str = "bvh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaV1Header {
    pub version: u16,
    pub byte_order: ByteOrder,
    pub file_size: u32,
    /// Relocation table position, relative to the base offset.
    pub final_table_offset: u32,
    pub final_table_length: u32,
    pub unknown_flag: u16,
    /// Whether the `bvh` trailer follows the relocation table.
    pub has_footer_magic: bool,
    base: u64,
}

impl Default for BinaV1Header {
    fn default() -> Self {
        Self {
            version: 100,
            byte_order: ByteOrder::Big,
            file_size: 0,
            final_table_offset: 0,
            final_table_length: 0,
            unknown_flag: 0,
            has_footer_magic: false,
            base: HEADER_LEN,
        }
    }
}

impl BinaV1Header {
    #[must_use]
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            ..Self::default()
        }
    }

    /// Append the `bvh` trailer after the relocation table.
    #[must_use]
    pub fn with_footer_magic(mut self) -> Self {
        self.has_footer_magic = true;
        self
    }
}

impl Header for BinaV1Header {
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let start = reader.position()?;
        let raw: [u8; HEADER_LEN as usize] = reader.read_array()?;
        if &raw[0x1C..0x20] != SIGNATURE {
            return Err(Error::invalid_signature(SIGNATURE, &raw[0x1C..0x20]));
        }
        let byte_order = order_from_flag(raw[FLAG_AT], ByteOrder::Big);
        let version = parse_version(&raw[0x18..FLAG_AT])?;

        reader.set_byte_order(byte_order);
        reader.jump_to(start)?;
        let file_size = reader.read()?;
        let final_table_offset = reader.read()?;
        let final_table_length = reader.read()?;
        warn_if_nonzero("BINA v1 reserved", reader.read::<u32>()?.into());
        let unknown_flag = reader.read()?;
        let footer_flag: u16 = reader.read()?;
        if footer_flag > 1 {
            tracing::warn!(footer_flag, "unexpected BINA v1 footer magic flag");
        }
        warn_if_nonzero("BINA v1 padding", reader.read::<u32>()?.into());
        reader.jump_to(start + HEADER_LEN)?;

        let base = start + HEADER_LEN;
        reader.set_base_offset(base);

        let header = Self {
            version,
            byte_order,
            file_size,
            final_table_offset,
            final_table_length,
            unknown_flag,
            has_footer_magic: footer_flag != 0,
            base,
        };
        tracing::debug!(?header, "read BINA v1 header");
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
        self.base = layout.base_offset;
        self.final_table_offset = to_u32(
            layout.final_table.start - layout.base_offset,
            "final table offset",
        )?;
        self.final_table_length = to_u32(layout.final_table.len(), "final table length")?;

        if self.has_footer_magic {
            writer.write(FOOTER_MAGIC)?;
            writer.write_nulls(4)?;
            writer.write_null_terminated(FOOTER_MARKER)?;
        }
        let end = writer.position()?;
        self.file_size = to_u32(end - start, "file size")?;

        let version = version_digits(self.version)?;
        writer.jump_to(start)?;
        writer.with_byte_order(self.byte_order, |w| {
            w.write(self.file_size)?;
            w.write(self.final_table_offset)?;
            w.write(self.final_table_length)?;
            w.write(0u32)?;
            w.write(self.unknown_flag)?;
            w.write(u16::from(self.has_footer_magic))?;
            w.write(0u32)?;
            w.write_bytes(&version)?;
            w.write(self.byte_order.flag())?;
            w.write_signature(SIGNATURE)
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
        let start = self.base + u64::from(self.final_table_offset);
        Span::new(start, start + u64::from(self.final_table_length))
    }

    fn file_size(&self) -> u32 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Minimal header with a file size of 0x30 and a final table at base + 8.
    fn synthetic(order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::new();
        let mut word = |v: u32| match order {
            ByteOrder::Big => out.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::Little => out.extend_from_slice(&v.to_le_bytes()),
        };
        word(0x30);
        word(0x08);
        word(0x04);
        word(0);
        word(0);
        word(0);
        out.extend_from_slice(b"100");
        out.push(order.flag());
        out.extend_from_slice(b"BINA");
        out.extend_from_slice(&[0xAB; 0x10]);
        out
    }

    #[test]
    fn test_endian_flag_controls_field_order() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let mut reader = BinaryReader::new(Cursor::new(synthetic(order)), ByteOrder::Little);
            let header = BinaV1Header::read(&mut reader).unwrap();

            assert_eq!(header.byte_order, order);
            assert_eq!(reader.byte_order(), order);
            assert_eq!(header.file_size, 0x30);
            assert_eq!(header.final_table_offset, 0x08);
            assert_eq!(header.final_table_length, 0x04);
            assert_eq!(header.version, 100);
            assert!(!header.has_footer_magic);
            assert_eq!(reader.base_offset(), 0x20);
            assert_eq!(reader.position().unwrap(), 0x20);
            assert_eq!(header.final_table(), Span::new(0x28, 0x2C));

            // Subsequent reads honour the flag.
            let next: u32 = reader.read().unwrap();
            assert_eq!(next, 0xABAB_ABAB);
        }
    }

    #[test]
    fn test_invalid_signature() {
        let mut bytes = synthetic(ByteOrder::Big);
        bytes[0x1C..0x20].copy_from_slice(b"ANIB");
        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Big);
        match BinaV1Header::read(&mut reader) {
            Err(Error::InvalidSignature { expected, actual }) => {
                assert_eq!(expected, "BINA");
                assert_eq!(actual, "ANIB");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_header() {
        let bytes = synthetic(ByteOrder::Big)[..0x10].to_vec();
        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Big);
        assert!(matches!(
            BinaV1Header::read(&mut reader),
            Err(Error::UnexpectedEndOfData { .. })
        ));
    }

    #[test]
    fn test_finish_writes_fields_and_footer_magic() {
        let mut header = BinaV1Header {
            has_footer_magic: true,
            ..BinaV1Header::default()
        };
        let mut writer = BinaryWriter::new(Cursor::new(Vec::new()), ByteOrder::Little);
        header.prepare_write(&mut writer).unwrap();
        assert_eq!(writer.base_offset(), 0x20);
        assert_eq!(writer.byte_order(), ByteOrder::Big);

        writer.write_nulls(8).unwrap();
        writer.write_bytes(&[0x41, 0, 0, 0]).unwrap();
        let layout = BodyLayout {
            base_offset: 0x20,
            string_table: Span::new(0x28, 0x28),
            final_table: Span::new(0x28, 0x2C),
        };
        header.finish_write(&mut writer, &layout).unwrap();
        let bytes = writer.into_inner().into_inner();

        assert_eq!(bytes.len(), 0x38);
        assert_eq!(&bytes[0..4], &0x38u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &0x08u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0x04u32.to_be_bytes());
        assert_eq!(&bytes[0x12..0x14], &1u16.to_be_bytes());
        assert_eq!(&bytes[0x18..0x20], b"100BBINA");
        assert_eq!(&bytes[0x2C..0x30], &0x10u32.to_be_bytes());
        assert_eq!(&bytes[0x30..0x34], &[0; 4]);
        assert_eq!(&bytes[0x34..], b"bvh\0");

        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Little);
        let read = BinaV1Header::read(&mut reader).unwrap();
        assert_eq!(read, header);
    }
}
