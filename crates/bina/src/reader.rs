//! Endian-aware stream reader.

use std::io::{Read, Seek, SeekFrom};

use crate::{
    error::{Error, Result},
    order::{ByteOrder, Primitive},
    writer::OffsetWidth,
};

/// Reads primitives, strings and offsets from a seekable stream.
///
/// The reader owns its stream; dropping the reader drops the stream.
/// Offsets are interpreted relative to the base offset, which headers set
/// once they have been parsed.
#[derive(Debug)]
pub struct BinaryReader<R> {
    stream: R,
    order: ByteOrder,
    base_offset: u64,
    offset_width: OffsetWidth,
    scratch: Vec<u8>,
}

impl<R: Read + Seek> BinaryReader<R> {
    /// Create a reader with the given initial byte order.
    pub fn new(stream: R, order: ByteOrder) -> Self {
        Self {
            stream,
            order,
            base_offset: 0,
            offset_width: OffsetWidth::U32,
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

    /// Total length of the stream. The position is left unchanged.
    pub fn stream_len(&mut self) -> Result<u64> {
        let position = self.stream.stream_position()?;
        let len = self.stream.seek(SeekFrom::End(0))?;
        self.stream.seek(SeekFrom::Start(position))?;
        Ok(len)
    }

    /// Seek to an absolute position.
    pub fn jump_to(&mut self, position: u64) -> Result<()> {
        self.stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Seek to a position relative to the base offset.
    pub fn jump_to_offset(&mut self, offset: u64) -> Result<()> {
        self.jump_to(self.base_offset + offset)
    }

    /// Skip `count` bytes forward from the current position.
    pub fn jump_ahead(&mut self, count: u64) -> Result<()> {
        let count = i64::try_from(count)
            .map_err(|_| Error::invalid_format("seek", format!("cannot skip {count} bytes")))?;
        self.stream.seek(SeekFrom::Current(count))?;
        Ok(())
    }

    /// Skip forward to the next multiple of `alignment`.
    ///
    /// An alignment of 0 or 1 leaves the position unchanged.
    pub fn align(&mut self, alignment: u64) -> Result<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let position = self.position()?;
        let padded = position.next_multiple_of(alignment);
        if padded != position {
            self.jump_to(padded)?;
        }
        Ok(())
    }

    /// Read a primitive using the current byte order.
    pub fn read<T: Primitive>(&mut self) -> Result<T> {
        self.scratch.resize(T::SIZE, 0);
        self.stream.read_exact(&mut self.scratch)?;
        Ok(T::decode(&self.scratch, self.order))
    }

    /// Read `len` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEndOfData`] without allocating if fewer
    /// than `len` bytes remain in the stream.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let position = self.position()?;
        let remaining = self.stream_len()?.saturating_sub(position);
        if len as u64 > remaining {
            return Err(Error::UnexpectedEndOfData {
                context: "byte run",
            });
        }
        let mut bytes = vec![0; len];
        self.stream.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Read exactly `N` raw bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0; N];
        self.stream.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Read a magic value and compare it with `expected`.
    pub fn read_signature(&mut self, expected: &[u8]) -> Result<()> {
        let actual = self.read_bytes(expected.len())?;
        if actual != expected {
            return Err(Error::invalid_signature(expected, &actual));
        }
        Ok(())
    }

    /// Read a null-terminated, single-byte encoded string.
    pub fn read_null_terminated(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            let byte: u8 = self.read()?;
            if byte == 0 {
                return Ok(text);
            }
            text.push(char::from(byte));
        }
    }

    /// Read a fixed-width string, dropping trailing nulls and spaces.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        let end = bytes
            .iter()
            .rposition(|&b| b != 0 && b != b' ')
            .map_or(0, |i| i + 1);
        Ok(bytes[..end].iter().copied().map(char::from).collect())
    }

    /// Read an offset slot using the configured offset width.
    pub fn read_offset(&mut self) -> Result<u64> {
        match self.offset_width {
            OffsetWidth::U32 => Ok(u64::from(self.read::<u32>()?)),
            OffsetWidth::U64 => self.read::<u64>(),
        }
    }

    /// Read an offset slot and follow it to a null-terminated string.
    ///
    /// A zero offset reads as the empty string. The stream is left just
    /// past the offset slot.
    pub fn get_string(&mut self) -> Result<String> {
        let offset = self.read_offset()?;
        if offset == 0 {
            return Ok(String::new());
        }
        let resume = self.position()?;
        self.jump_to_offset(offset)?;
        let text = self.read_null_terminated();
        self.jump_to(resume)?;
        text
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.stream
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> R {
        self.stream
    }
}
