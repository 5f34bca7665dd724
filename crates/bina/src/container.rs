//! Whole-file read and write sessions.

use std::io::{Read, Seek, Write};

use crate::{
    error::{Error, Result},
    header::{BodyLayout, Header, Span},
    order::ByteOrder,
    reader::BinaryReader,
    writer::BinaryWriter,
};

/// One relocated offset: the slot position and the position it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub slot: u64,
    pub target: u64,
}

/// Writes one container.
///
/// The header placeholder is emitted on creation; the body is written
/// through [`ContainerWriter::writer`], and [`ContainerWriter::finish`]
/// appends the string table and relocation table and fills in the header.
#[derive(Debug)]
pub struct ContainerWriter<W, H> {
    writer: BinaryWriter<W>,
    header: H,
}

impl<W: Write + Seek, H: Header> ContainerWriter<W, H> {
    pub fn new(stream: W, header: H) -> Result<Self> {
        let mut writer = BinaryWriter::new(stream, header.byte_order());
        header.prepare_write(&mut writer)?;
        Ok(Self { writer, header })
    }

    pub fn writer(&mut self) -> &mut BinaryWriter<W> {
        &mut self.writer
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    /// Complete the file and hand back the stream with the final header.
    pub fn finish(mut self) -> Result<(W, H)> {
        let base = self.writer.base_offset();
        let string_start = self.writer.flush_string_table()?;

        let mut pending: Vec<&str> = self.writer.pending_offsets().collect();
        pending.sort_unstable();
        for name in pending {
            tracing::warn!(name, "offset was reserved but never patched");
        }

        let mut positions = self.writer.relocations().to_vec();
        positions.sort_unstable();
        positions.dedup();
        let table = self.header.relocation_kind().codec().encode(
            &positions,
            base,
            self.header.byte_order(),
        )?;

        let table_start = self.writer.position()?;
        self.writer.write_bytes(&table)?;
        self.writer.align(4)?;
        let table_end = self.writer.position()?;

        let layout = BodyLayout {
            base_offset: base,
            string_table: Span::new(string_start, table_start),
            final_table: Span::new(table_start, table_end),
        };
        self.header.finish_write(&mut self.writer, &layout)?;
        tracing::debug!(
            relocations = positions.len(),
            table_len = layout.final_table.len(),
            file_size = self.header.file_size(),
            "finished container"
        );

        Ok((self.writer.into_inner(), self.header))
    }
}

/// An opened container: the parsed header and a reader positioned at the
/// start of the body.
#[derive(Debug)]
pub struct Container<R, H> {
    reader: BinaryReader<R>,
    header: H,
}

impl<R: Read + Seek, H: Header> Container<R, H> {
    pub fn open(stream: R) -> Result<Self> {
        let mut reader = BinaryReader::new(stream, ByteOrder::default());
        let header = H::read(&mut reader)?;
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    pub fn reader(&mut self) -> &mut BinaryReader<R> {
        &mut self.reader
    }

    /// Decode the relocation table into absolute slot positions.
    ///
    /// The reader position is preserved.
    pub fn relocations(&mut self) -> Result<Vec<u64>> {
        let span = self.header.final_table();
        if span.end > self.reader.stream_len()? {
            return Err(Error::UnexpectedEndOfData {
                context: "relocation table",
            });
        }
        let resume = self.reader.position()?;
        self.reader.jump_to(span.start)?;
        let table = self.reader.read_bytes(span.len() as usize);
        self.reader.jump_to(resume)?;

        let positions = self.header.relocation_kind().codec().decode(
            &table?,
            self.header.base_offset(),
            self.header.byte_order(),
        )?;
        tracing::debug!(count = positions.len(), "decoded relocation table");
        Ok(positions)
    }

    /// Decode the relocation table and follow every slot to its target.
    pub fn resolve_offsets(&mut self) -> Result<Vec<Relocation>> {
        let slots = self.relocations()?;
        let base = self.reader.base_offset();
        let resume = self.reader.position()?;

        let mut resolved = Vec::with_capacity(slots.len());
        for slot in slots {
            self.reader.jump_to(slot)?;
            let target = base + self.reader.read_offset()?;
            resolved.push(Relocation { slot, target });
        }

        self.reader.jump_to(resume)?;
        Ok(resolved)
    }

    pub fn into_parts(self) -> (BinaryReader<R>, H) {
        (self.reader, self.header)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::header::{BinaV2Header, GensHeader};

    #[test]
    fn test_offsets_resolve_to_targets() {
        let mut container =
            ContainerWriter::new(Cursor::new(Vec::new()), BinaV2Header::default()).unwrap();
        let w = container.writer();
        w.reserve_offset("first").unwrap();
        w.reserve_offset("second").unwrap();
        w.write(7u32).unwrap();
        w.patch_offset("second").unwrap();
        w.write(9u32).unwrap();
        w.patch_offset("first").unwrap();
        w.write(11u32).unwrap();
        let (stream, _) = container.finish().unwrap();

        let mut opened =
            Container::<_, BinaV2Header>::open(Cursor::new(stream.into_inner())).unwrap();
        let resolved = opened.resolve_offsets().unwrap();
        assert_eq!(
            resolved,
            vec![
                Relocation { slot: 0x40, target: 0x50 },
                Relocation { slot: 0x44, target: 0x4C },
            ]
        );
        assert_eq!(opened.reader().position().unwrap(), 0x40);
    }

    #[test]
    fn test_unpatched_offset_still_finishes() {
        let mut container =
            ContainerWriter::new(Cursor::new(Vec::new()), GensHeader::default()).unwrap();
        container.writer().reserve_offset("dangling").unwrap();
        assert_eq!(container.writer().pending_offsets().count(), 1);
        let (stream, header) = container.finish().unwrap();

        let bytes = stream.into_inner();
        assert_eq!(bytes.len() as u32, header.file_size);
        // Slot left at zero, listed in the table as one entry at base + 0.
        assert_eq!(&bytes[0x18..0x1C], &[0; 4]);
        assert_eq!(&bytes[0x1C..], &[0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_relocation_table_past_end_of_stream() {
        let mut container =
            ContainerWriter::new(Cursor::new(Vec::new()), BinaV2Header::default()).unwrap();
        container.writer().reserve_offset("a").unwrap();
        container.writer().patch_offset("a").unwrap();
        let (stream, _) = container.finish().unwrap();
        let mut bytes = stream.into_inner();
        bytes[0x20..0x24].copy_from_slice(&0x7FFF_FFFFu32.to_le_bytes());

        let mut opened = Container::<_, BinaV2Header>::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            opened.relocations(),
            Err(Error::UnexpectedEndOfData {
                context: "relocation table"
            })
        ));
        assert_eq!(opened.reader().position().unwrap(), 0x40);
    }
}
